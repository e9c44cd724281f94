//! Long-lived device identity: the Ed25519 signing pair and the separate
//! X25519 DH pair, plus the registration id used for session-conflict
//! detection.
//!
//! The two key pairs are independently generated and never derived from one
//! another — deriving one from the other would let a break of one protocol
//! role (signing vs. key agreement) compromise the other.

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

use crate::error::WaspError;
use crate::primitives::{rand_registration_id, sign, verify};
use crate::serde_hex;

/// A device's long-lived identity. Created once at registration and never
/// rotated; the signing half authenticates pre-keys and session AAD, the DH
/// half participates in `DH1` of X3DH.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Identity {
    pub registration_id: u16,
    #[serde(with = "serde_hex::ed25519_public")]
    pub sign_pub: VerifyingKey,
    #[serde(with = "serde_hex::ed25519_secret")]
    pub sign_priv: SigningKey,
    #[serde(with = "serde_hex::x25519_public")]
    pub dh_pub: X25519PublicKey,
    #[serde(with = "serde_hex::x25519_secret")]
    pub dh_priv: X25519StaticSecret,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("registration_id", &self.registration_id)
            .field("sign_pub", &hex::encode(self.sign_pub.to_bytes()))
            .field("dh_pub", &hex::encode(self.dh_pub.as_bytes()))
            .field("sign_priv", &"<redacted>")
            .field("dh_priv", &"<redacted>")
            .finish()
    }
}

impl Identity {
    /// Draws a fresh Ed25519 pair and a separate fresh X25519 pair, plus a
    /// random 14-bit registration id.
    pub fn generate() -> Self {
        let sign_priv = SigningKey::generate(&mut OsRng);
        let dh_priv = X25519StaticSecret::random_from_rng(OsRng);
        Self {
            registration_id: rand_registration_id(),
            sign_pub: sign_priv.verifying_key(),
            dh_priv: dh_priv.clone(),
            dh_pub: X25519PublicKey::from(&dh_priv),
            sign_priv,
        }
    }

    /// Round-trip consistency: `sign_pub` must match what `sign_priv`
    /// derives, and `dh_pub` must match `dh_priv`. Only relevant after
    /// deserializing untrusted bytes (construction via `generate` always
    /// satisfies this by build).
    pub fn validate(&self) -> Result<(), WaspError> {
        if self.sign_priv.verifying_key() != self.sign_pub {
            return Err(WaspError::ParseError(
                "sign_pub does not match sign_priv".into(),
            ));
        }
        if X25519PublicKey::from(&self.dh_priv) != self.dh_pub {
            return Err(WaspError::ParseError(
                "dh_pub does not match dh_priv".into(),
            ));
        }
        Ok(())
    }

    /// Signs `msg` with the identity's Ed25519 key (used to sign SPKs).
    pub fn sign(&self, msg: &[u8]) -> [u8; 64] {
        sign(&self.sign_priv, msg)
    }
}

/// Verifies an Ed25519 signature against a bare public key, as used when
/// checking a peer's signed pre-key before trusting it.
pub fn verify_signature(sign_pub: &VerifyingKey, msg: &[u8], signature: &[u8; 64]) -> bool {
    verify(sign_pub, msg, signature)
}

/// A human-verifiable "safety number" for a peer's identity, used when the
/// caller surfaces an `InvalidSignature` or `SessionConflict` as an identity
/// change. Not part of the wire protocol; purely a display aid.
pub fn fingerprint(sign_pub: &VerifyingKey, dh_pub: &X25519PublicKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sign_pub.to_bytes());
    hasher.update(dh_pub.as_bytes());
    let digest = hasher.finalize();
    let hex_digest = hex::encode(&digest[..20]);
    hex_digest
        .as_bytes()
        .chunks(4)
        .map(|c| std::str::from_utf8(c).unwrap())
        .collect::<Vec<_>>()
        .join(" ")
}
