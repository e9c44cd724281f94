//! Custom `serde` modules for the lowercase-hex byte encoding used for every
//! persisted or wire key and digest, wrapping the dalek key types directly
//! so callers never see the raw byte arrays at the serialization boundary.

use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

pub mod bytes32 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        hex::encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let hex_str = String::deserialize(d)?;
        let bytes = hex::decode(hex_str).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

pub mod option_bytes32 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &Option<[u8; 32]>, s: S) -> Result<S::Ok, S::Error> {
        bytes.map(hex::encode).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<[u8; 32]>, D::Error> {
        let hex_opt: Option<String> = Option::deserialize(d)?;
        match hex_opt {
            None => Ok(None),
            Some(hex_str) => {
                let bytes = hex::decode(hex_str).map_err(serde::de::Error::custom)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
                Ok(Some(arr))
            }
        }
    }
}

pub mod bytes64 {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        hex::encode(&bytes[..]).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let hex_str = String::deserialize(d)?;
        let bytes = hex::decode(hex_str).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 64 bytes"))
    }
}

pub mod x25519_public {
    use super::*;

    pub fn serialize<S: Serializer>(key: &X25519PublicKey, s: S) -> Result<S::Ok, S::Error> {
        hex::encode(key.as_bytes()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<X25519PublicKey, D::Error> {
        let hex_str = String::deserialize(d)?;
        let bytes = hex::decode(hex_str).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
        Ok(X25519PublicKey::from(arr))
    }
}

pub mod option_x25519_public {
    use super::*;

    pub fn serialize<S: Serializer>(
        key: &Option<X25519PublicKey>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        key.map(|k| hex::encode(k.as_bytes())).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<X25519PublicKey>, D::Error> {
        let hex_opt: Option<String> = Option::deserialize(d)?;
        match hex_opt {
            None => Ok(None),
            Some(hex_str) => {
                let bytes = hex::decode(hex_str).map_err(serde::de::Error::custom)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
                Ok(Some(X25519PublicKey::from(arr)))
            }
        }
    }
}

pub mod x25519_secret {
    use super::*;

    pub fn serialize<S: Serializer>(key: &X25519StaticSecret, s: S) -> Result<S::Ok, S::Error> {
        hex::encode(key.to_bytes()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<X25519StaticSecret, D::Error> {
        let hex_str = String::deserialize(d)?;
        let bytes = hex::decode(hex_str).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
        Ok(X25519StaticSecret::from(arr))
    }
}

pub mod ed25519_public {
    use super::*;

    pub fn serialize<S: Serializer>(key: &VerifyingKey, s: S) -> Result<S::Ok, S::Error> {
        hex::encode(key.to_bytes()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<VerifyingKey, D::Error> {
        let hex_str = String::deserialize(d)?;
        let bytes = hex::decode(hex_str).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
        VerifyingKey::from_bytes(&arr).map_err(serde::de::Error::custom)
    }
}

pub mod ed25519_secret {
    use super::*;

    pub fn serialize<S: Serializer>(key: &SigningKey, s: S) -> Result<S::Ok, S::Error> {
        hex::encode(key.to_bytes()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<SigningKey, D::Error> {
        let hex_str = String::deserialize(d)?;
        let bytes = hex::decode(hex_str).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
        Ok(SigningKey::from_bytes(&arr))
    }
}
