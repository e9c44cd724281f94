//! wasp-core — end-to-end encryption core for a private messenger.
//!
//! Covers the key hierarchy, the X3DH asynchronous key-agreement protocol,
//! the Double Ratchet continuous message cipher, the session manager that
//! wires the two together, and an independent media AEAD scheme. The relay,
//! persistent store, registration/auth, and UI are named interfaces only —
//! this crate never performs I/O.
//!
//! # Module layout
//! - `primitives` — X25519/Ed25519/HKDF/HMAC/AES-GCM wrappers and the
//!   protocol's fixed-label KDFs
//! - `identity`   — long-lived device identity (signing + DH key pairs)
//! - `prekey`     — signed pre-keys and one-time pre-keys, plus the bundle
//!   shape fetched to start a session
//! - `x3dh`       — the asynchronous 3-or-4-DH key agreement
//! - `ratchet`    — the Double Ratchet per-contact message cipher
//! - `session`    — orchestrates X3DH and the ratchet behind one API
//! - `envelope`   — the wire shape handed to the relay
//! - `media`      — independent file encryption (HMAC + SHA-256 digest)
//! - `config`     — tunable protocol limits
//! - `error`      — the unified error type
//! - `serde_hex`  — shared hex-encoding `serde` helpers for key material

pub mod config;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod media;
pub mod prekey;
pub mod primitives;
pub mod ratchet;
mod serde_hex;
pub mod session;
pub mod x3dh;

pub use config::RatchetLimits;
pub use envelope::{Envelope, MessageType};
pub use error::WaspError;
pub use identity::Identity;
pub use media::{decrypt_media, encrypt_media, EncryptedMedia};
pub use prekey::{
    generate_one_time_pre_keys, generate_signed_pre_key, OneTimePreKey, PreKeyBundle,
    SignedPreKey,
};
pub use ratchet::{RatchetHeader, RatchetMessage, RatchetSession};
pub use session::{create_outgoing_session, decrypt_incoming, PendingSession, Session, SessionFailure};
pub use x3dh::{x3dh_receive, x3dh_send, X3DHSendResult};
