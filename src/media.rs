//! Independent file encryption. Runs outside the ratchet so large blobs need
//! not flow through per-message chain state; only the 64-byte `media_key`
//! travels inside a ratcheted message.
//!
//! Uses AES-256-GCM plus a separate truncated HMAC over `iv || ciphertext`
//! and a whole-blob SHA-256 digest. The HMAC is redundant against GCM's own
//! tag, but is kept for wire compatibility with deployed blobs.

use sha2::{Digest, Sha256};

use crate::error::WaspError;
use crate::primitives::{aes_gcm_open, aes_gcm_seal, ct_eq, hmac, kdf_media, rand_bytes};

/// A self-contained encrypted blob ready to hand to the relay/storage layer.
pub struct EncryptedMedia {
    pub blob: Vec<u8>,
    pub media_key: [u8; 64],
    pub digest: [u8; 32],
}

const MAC_LEN: usize = 10;

/// Encrypts `plaintext` under a fresh random 64-byte media key.
pub fn encrypt_media(plaintext: &[u8]) -> Result<EncryptedMedia, WaspError> {
    let media_key: [u8; 64] = rand_bytes(64)
        .try_into()
        .expect("rand_bytes(64) returns exactly 64 bytes");
    let (iv16, cipher_key, mac_key) = kdf_media(&media_key)?;

    let mut iv12 = [0u8; 12];
    iv12.copy_from_slice(&iv16[..12]);
    let ct = aes_gcm_seal(&cipher_key, &iv12, plaintext, &[])?;

    let mut mac_input = Vec::with_capacity(iv16.len() + ct.len());
    mac_input.extend_from_slice(&iv16);
    mac_input.extend_from_slice(&ct);
    let mac_full = hmac(&mac_key, &mac_input);
    let mac10 = &mac_full[..MAC_LEN];

    let mut blob = Vec::with_capacity(iv16.len() + ct.len() + MAC_LEN);
    blob.extend_from_slice(&iv16);
    blob.extend_from_slice(&ct);
    blob.extend_from_slice(mac10);

    let digest: [u8; 32] = Sha256::digest(&blob).into();

    Ok(EncryptedMedia {
        blob,
        media_key,
        digest,
    })
}

/// Decrypts a blob produced by [`encrypt_media`]. Verifies, in order, the
/// whole-blob digest, then the truncated MAC, then the AEAD tag — any
/// mismatch fails closed with `MediaIntegrity` before any plaintext bytes
/// are released.
pub fn decrypt_media(
    blob: &[u8],
    media_key: &[u8; 64],
    expected_digest: &[u8; 32],
) -> Result<Vec<u8>, WaspError> {
    let actual_digest: [u8; 32] = Sha256::digest(blob).into();
    if !ct_eq(&actual_digest, expected_digest) {
        return Err(WaspError::MediaIntegrity);
    }

    if blob.len() < 16 + MAC_LEN {
        return Err(WaspError::MediaIntegrity);
    }
    let (iv16, rest) = blob.split_at(16);
    let (ct, mac10) = rest.split_at(rest.len() - MAC_LEN);

    // `iv16` read off the blob is only ever correct if `media_key` is the
    // one that produced it, since KDF_Media derives the iv from the key; a
    // wrong key surfaces here as a MAC mismatch on the next check, not a
    // separate iv comparison.
    let (_expected_iv, cipher_key, mac_key) = kdf_media(media_key)?;

    let mut mac_input = Vec::with_capacity(iv16.len() + ct.len());
    mac_input.extend_from_slice(iv16);
    mac_input.extend_from_slice(ct);
    let mac_full = hmac(&mac_key, &mac_input);
    if !ct_eq(&mac_full[..MAC_LEN], mac10) {
        return Err(WaspError::MediaIntegrity);
    }

    let mut iv12 = [0u8; 12];
    iv12.copy_from_slice(&iv16[..12]);
    aes_gcm_open(&cipher_key, &iv12, ct, &[]).map_err(|_| WaspError::MediaIntegrity)
}
