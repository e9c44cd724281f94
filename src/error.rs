//! Unified error type for the WASP encryption core.
//!
//! Every kind here corresponds 1:1 to an error kind in the protocol
//! specification. Nothing is recovered inside the core: a failed operation
//! returns one of these variants and leaves the caller's state untouched.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaspError {
    /// A pre-key bundle's signed pre-key signature failed verification.
    #[error("signed pre-key signature verification failed")]
    InvalidSignature,

    /// AEAD tag mismatch on a ratcheted message or a media blob.
    #[error("authentication failed (tag mismatch)")]
    AuthFailure,

    /// `ratchet_encrypt` called before a sending chain exists.
    #[error("ratchet has no sending chain key yet")]
    NotInitialized,

    /// A decrypt would have to skip more than the configured `MAX_SKIP`.
    #[error("refusing to skip {requested} message keys (limit is {limit})")]
    TooManySkipped { requested: u64, limit: u64 },

    /// Envelope's `registration_id` does not match the one on file for the
    /// contact's stored identity.
    #[error("registration id mismatch for contact (stored {stored}, got {received})")]
    SessionConflict { stored: u32, received: u32 },

    /// Media blob failed its digest or truncated-MAC check.
    #[error("media integrity check failed")]
    MediaIntegrity,

    /// Malformed envelope or serialized session state.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Pre-key id space would overflow its 24-bit range.
    #[error("pre-key id space exhausted")]
    ExhaustedKeyIds,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}
