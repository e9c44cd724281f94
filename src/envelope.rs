//! The on-wire message shape handed to the relay. Opaque to the relay: it
//! reads only routing metadata, never plaintext. Keys and the header use
//! hex; `ciphertext` uses base64. Unknown fields are rejected to prevent a
//! downgrade to a weaker or ambiguous wire shape.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use x25519_dalek::PublicKey as X25519PublicKey;

use crate::ratchet::RatchetHeader;
use crate::serde_hex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Media,
    System,
}

mod base64_bytes {
    use super::{BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        BASE64.encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Wire envelope. A tagged record with explicit, enumerated fields rather
/// than a loosely-typed bag, so unknown fields are rejected up front instead
/// of silently ignored.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Envelope {
    pub is_pre_key_message: bool,
    pub header: RatchetHeader,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    pub message_type: MessageType,
    pub registration_id: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_hex::option_x25519_public"
    )]
    pub sender_identity_dh_key: Option<X25519PublicKey>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_hex::option_x25519_public"
    )]
    pub sender_ephemeral_key: Option<X25519PublicKey>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "option_ed25519_public"
    )]
    pub sender_identity_sign_key: Option<VerifyingKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_one_time_prekey_id: Option<u32>,
}

mod option_ed25519_public {
    use ed25519_dalek::VerifyingKey;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(key: &Option<VerifyingKey>, s: S) -> Result<S::Ok, S::Error> {
        key.map(|k| hex::encode(k.to_bytes())).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<VerifyingKey>, D::Error> {
        let hex_opt: Option<String> = Option::deserialize(d)?;
        match hex_opt {
            None => Ok(None),
            Some(hex_str) => {
                let bytes = hex::decode(hex_str).map_err(serde::de::Error::custom)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
                VerifyingKey::from_bytes(&arr)
                    .map(Some)
                    .map_err(serde::de::Error::custom)
            }
        }
    }
}

impl Envelope {
    /// `true` exactly when every pre-key-only field required for a first
    /// message is present.
    pub fn has_complete_prekey_fields(&self) -> bool {
        self.sender_identity_dh_key.is_some()
            && self.sender_ephemeral_key.is_some()
            && self.sender_identity_sign_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratchet::RatchetHeader;
    use x25519_dalek::StaticSecret as X25519StaticSecret;

    fn sample_header() -> RatchetHeader {
        let sk = X25519StaticSecret::random_from_rng(rand::rngs::OsRng);
        RatchetHeader {
            dh_ratchet_key: X25519PublicKey::from(&sk),
            pn: 0,
            n: 0,
        }
    }

    #[test]
    fn non_prekey_envelope_roundtrips_without_optional_fields() {
        let envelope = Envelope {
            is_pre_key_message: false,
            header: sample_header(),
            ciphertext: vec![1, 2, 3, 4],
            message_type: MessageType::Text,
            registration_id: 42,
            sender_identity_dh_key: None,
            sender_ephemeral_key: None,
            sender_identity_sign_key: None,
            used_one_time_prekey_id: None,
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(!json.contains("sender_identity_dh_key"));
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ciphertext, envelope.ciphertext);
        assert!(!back.has_complete_prekey_fields());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let raw = r#"{
            "is_pre_key_message": false,
            "header": {"dh_ratchet_key": "0000000000000000000000000000000000000000000000000000000000000000", "pn": 0, "n": 0},
            "ciphertext": "AQIDBA==",
            "message_type": "text",
            "registration_id": 1,
            "unexpected_field": true
        }"#;
        assert!(serde_json::from_str::<Envelope>(raw).is_err());
    }
}
