//! Constant-time wrappers over the core cryptographic building blocks.
//!
//! Pure functions only: no session state, no I/O. Every KDF label and byte
//! layout here is wire-visible and must stay bit-exact across implementations.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

use crate::error::WaspError;

type HmacSha256 = Hmac<Sha256>;

// ── X25519 ────────────────────────────────────────────────────────────────

/// `DH(priv, peer_pub) -> 32B`. Accepts the all-zero output per RFC 7748;
/// low-order points are not rejected.
pub fn dh(private: &X25519StaticSecret, peer_public: &X25519PublicKey) -> [u8; 32] {
    private.diffie_hellman(peer_public).to_bytes()
}

// ── Ed25519 ───────────────────────────────────────────────────────────────

pub fn sign(signing_key: &SigningKey, msg: &[u8]) -> [u8; 64] {
    signing_key.sign(msg).to_bytes()
}

/// Verification runs through `ed25519-dalek`'s constant-time signature check;
/// it does not short-circuit on the message contents.
pub fn verify(verifying_key: &VerifyingKey, msg: &[u8], signature: &[u8; 64]) -> bool {
    match Signature::try_from(&signature[..]) {
        Ok(sig) => verifying_key.verify(msg, &sig).is_ok(),
        Err(_) => false,
    }
}

// ── HKDF-SHA256 / HMAC-SHA256 ────────────────────────────────────────────

/// `hkdf(ikm, salt, info, L) -> L bytes`: standard Extract-then-Expand.
pub fn hkdf(ikm: &[u8], salt: &[u8], info: &[u8], out: &mut [u8]) -> Result<(), WaspError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    hk.expand(info, out)
        .map_err(|e| WaspError::KeyDerivation(e.to_string()))
}

/// `hmac(key, data) -> 32B`.
pub fn hmac(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

// ── AES-256-GCM ───────────────────────────────────────────────────────────

/// `aes_gcm_seal(key32, iv12, plaintext, aad) -> ciphertext‖tag16`.
pub fn aes_gcm_seal(
    key: &[u8; 32],
    iv: &[u8; 12],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, WaspError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| WaspError::AuthFailure)
}

/// `aes_gcm_open`. Fails closed: the underlying crate does not release any
/// plaintext bytes unless the tag verifies first.
pub fn aes_gcm_open(
    key: &[u8; 32],
    iv: &[u8; 12],
    ciphertext_and_tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, WaspError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Nonce::from_slice(iv);
    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext_and_tag,
                aad,
            },
        )
        .map_err(|_| WaspError::AuthFailure)
}

// ── Randomness ────────────────────────────────────────────────────────────

pub fn rand_bytes(n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut out);
    out
}

/// 14-bit registration id, range 1..=16380.
pub fn rand_registration_id() -> u16 {
    use rand::Rng;
    rand::rngs::OsRng.gen_range(
        crate::config::REGISTRATION_ID_MIN..=crate::config::REGISTRATION_ID_MAX,
    )
}

// ── Constant-time compare ────────────────────────────────────────────────

/// Length mismatch returns `false` but still walks the shorter length so the
/// timing signal does not reveal *how much* of a prefix matched.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    let n = a.len().min(b.len());
    let mut diff: u8 = 0;
    for i in 0..n {
        diff |= a[i] ^ b[i];
    }
    diff == 0 && a.len() == b.len()
}

// ── Key-schedule KDFs (fixed labels, bit-exact for interop) ──────────────

/// `KDF_RK(RK, dh_out) -> (new_RK, chain_key)`.
pub fn kdf_rk(rk: &[u8; 32], dh_out: &[u8; 32]) -> Result<([u8; 32], [u8; 32]), WaspError> {
    let mut okm = [0u8; 64];
    hkdf(dh_out, rk, b"WASP_ROOT_KEY", &mut okm)?;
    let mut new_rk = [0u8; 32];
    let mut chain_key = [0u8; 32];
    new_rk.copy_from_slice(&okm[..32]);
    chain_key.copy_from_slice(&okm[32..]);
    Ok((new_rk, chain_key))
}

/// `KDF_CK(CK) -> (next_CK, mk)`.
pub fn kdf_ck(ck: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let mk = hmac(ck, &[0x01]);
    let next_ck = hmac(ck, &[0x02]);
    (next_ck, mk)
}

/// `KDF_MK(mk) -> (cipher_key32, mac_key32, iv12)`. The trailing 4 bytes of
/// the 80-byte expansion are discarded.
pub fn kdf_mk(mk: &[u8; 32]) -> Result<([u8; 32], [u8; 32], [u8; 12]), WaspError> {
    let mut okm = [0u8; 80];
    hkdf(mk, &[], b"WASP_MESSAGE_KEY", &mut okm)?;
    let mut cipher_key = [0u8; 32];
    let mut mac_key = [0u8; 32];
    let mut iv = [0u8; 12];
    cipher_key.copy_from_slice(&okm[0..32]);
    mac_key.copy_from_slice(&okm[32..64]);
    iv.copy_from_slice(&okm[64..76]);
    Ok((cipher_key, mac_key, iv))
}

/// `KDF_X3DH(dh_outputs) -> SK`. `ikm = 0xFF*32 || DH1 || DH2 || DH3 [|| DH4]`.
pub fn kdf_x3dh(dh_outputs: &[[u8; 32]]) -> Result<[u8; 32], WaspError> {
    let mut ikm = vec![0xFFu8; 32];
    for dh_out in dh_outputs {
        ikm.extend_from_slice(dh_out);
    }
    let mut sk = [0u8; 32];
    hkdf(&ikm, &[0u8; 32], b"WASP_X3DH_MASTER_SECRET_v1", &mut sk)?;
    Ok(sk)
}

/// `KDF_Media(media_key64) -> (iv16, cipher_key32, mac_key32)`.
pub fn kdf_media(media_key: &[u8; 64]) -> Result<([u8; 16], [u8; 32], [u8; 32]), WaspError> {
    let mut okm = [0u8; 80];
    hkdf(media_key, &[], b"WASP_MEDIA_KEY_v1", &mut okm)?;
    let mut iv = [0u8; 16];
    let mut cipher_key = [0u8; 32];
    let mut mac_key = [0u8; 32];
    iv.copy_from_slice(&okm[0..16]);
    cipher_key.copy_from_slice(&okm[16..48]);
    mac_key.copy_from_slice(&okm[48..80]);
    Ok((iv, cipher_key, mac_key))
}
