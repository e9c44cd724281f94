//! Signed pre-keys (medium-term, identity-authenticated) and one-time
//! pre-keys (single-use), plus the bundle shape fetched to start X3DH.

use ed25519_dalek::VerifyingKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

use crate::config::PRE_KEY_ID_MAX;
use crate::error::WaspError;
use crate::identity::Identity;
use crate::serde_hex;

/// A medium-term X25519 key pair, signed by the owning identity's Ed25519
/// key so peers can verify it without trusting the delivery channel.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignedPreKey {
    pub key_id: u32,
    #[serde(with = "serde_hex::x25519_public")]
    pub public: X25519PublicKey,
    #[serde(with = "serde_hex::x25519_secret")]
    pub private: X25519StaticSecret,
    #[serde(with = "serde_hex::bytes64")]
    pub signature: [u8; 64],
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

impl SignedPreKey {
    /// Verifies `signature` over `public` against `sign_pub`. Must hold
    /// before the pre-key is used in X3DH.
    pub fn verify(&self, sign_pub: &VerifyingKey) -> bool {
        crate::identity::verify_signature(sign_pub, self.public.as_bytes(), &self.signature)
    }
}

/// A single-use X25519 key pair. The private half must be destroyed
/// immediately after the one X3DH receive that consumes it.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OneTimePreKey {
    pub key_id: u32,
    #[serde(with = "serde_hex::x25519_public")]
    pub public: X25519PublicKey,
    #[serde(with = "serde_hex::x25519_secret")]
    pub private: X25519StaticSecret,
}

/// The payload fetched from the server to initiate a session with a peer.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreKeyBundle {
    pub user_id: String,
    pub registration_id: u16,
    #[serde(with = "serde_hex::x25519_public")]
    pub identity_dh_pub: X25519PublicKey,
    #[serde(with = "serde_hex::ed25519_public")]
    pub identity_sign_pub: VerifyingKey,
    pub signed_prekey_id: u32,
    #[serde(with = "serde_hex::x25519_public")]
    pub signed_prekey_pub: X25519PublicKey,
    #[serde(with = "serde_hex::bytes64")]
    pub signed_prekey_signature: [u8; 64],
    pub one_time_prekey_id: Option<u32>,
    #[serde(with = "serde_hex::option_x25519_public")]
    pub one_time_prekey_pub: Option<X25519PublicKey>,
}

/// Generates a fresh signed pre-key, signing its public half with
/// `identity.sign_priv`.
pub fn generate_signed_pre_key(identity: &Identity, key_id: u32, created_at_ms: i64) -> SignedPreKey {
    let private = X25519StaticSecret::random_from_rng(OsRng);
    let public = X25519PublicKey::from(&private);
    let signature = identity.sign(public.as_bytes());
    SignedPreKey {
        key_id,
        public,
        private,
        signature,
        created_at: created_at_ms,
    }
}

/// Generates `count` fresh one-time pre-keys with sequential ids starting at
/// `start_id`. Fails with `ExhaustedKeyIds` if the id range (24 bits) would
/// overflow.
pub fn generate_one_time_pre_keys(
    start_id: u32,
    count: u32,
) -> Result<Vec<OneTimePreKey>, WaspError> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let last_id = start_id
        .checked_add(count - 1)
        .ok_or(WaspError::ExhaustedKeyIds)?;
    if last_id > PRE_KEY_ID_MAX {
        return Err(WaspError::ExhaustedKeyIds);
    }
    Ok((start_id..=last_id)
        .map(|key_id| {
            let private = X25519StaticSecret::random_from_rng(OsRng);
            let public = X25519PublicKey::from(&private);
            OneTimePreKey {
                key_id,
                public,
                private,
            }
        })
        .collect())
}
