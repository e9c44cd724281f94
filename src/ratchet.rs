//! The Double Ratchet: per-contact message encryption combining a DH
//! ratchet with two symmetric KDF chains.
//!
//! `encrypt`/`decrypt` consume `self` by value rather than mutating through
//! `&mut self`: a caller that drops the returned state cannot keep advancing
//! the old one, because the old one is moved, not just mutated behind a
//! reference. A dropped update becomes a compile error instead of silent
//! session corruption.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};
use zeroize::Zeroize;

use crate::config::RatchetLimits;
use crate::error::WaspError;
use crate::primitives::{aes_gcm_open, aes_gcm_seal, dh, kdf_ck, kdf_mk, kdf_rk};
use crate::serde_hex;

/// `H = (DHs.pub, PN, Ns)` carried alongside a ratcheted message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RatchetHeader {
    #[serde(with = "serde_hex::x25519_public")]
    pub dh_ratchet_key: X25519PublicKey,
    pub pn: u32,
    pub n: u32,
}

impl RatchetHeader {
    /// Exact wire layout used as the AEAD's associated data prefix: 32-byte
    /// key, then `pn` and `n` as 4-byte big-endian integers.
    pub fn header_bytes(&self) -> [u8; 40] {
        let mut out = [0u8; 40];
        out[..32].copy_from_slice(self.dh_ratchet_key.as_bytes());
        out[32..36].copy_from_slice(&self.pn.to_be_bytes());
        out[36..40].copy_from_slice(&self.n.to_be_bytes());
        out
    }
}

/// A ratcheted message: header plus the AES-GCM ciphertext (tag appended).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RatchetMessage {
    pub header: RatchetHeader,
    #[serde(with = "hex_bytes")]
    pub ciphertext: Vec<u8>,
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        hex::encode(bytes).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let hex_str = String::deserialize(d)?;
        hex::decode(hex_str).map_err(serde::de::Error::custom)
    }
}

fn skipped_cache_key(dh_pub: &X25519PublicKey, n: u32) -> String {
    format!("{}:{}", hex::encode(dh_pub.as_bytes()), n)
}

fn decrypt_with_message_key(
    mk: &[u8; 32],
    header: &RatchetHeader,
    ciphertext: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>, WaspError> {
    let (cipher_key, _mac_key, iv) = kdf_mk(mk)?;
    let mut aad = header.header_bytes().to_vec();
    aad.extend_from_slice(associated_data);
    aes_gcm_open(&cipher_key, &iv, ciphertext, &aad)
}

/// A decrypt that failed hands the untouched original session back so the
/// caller never loses live state on a dropped/tampered/replayed message.
#[derive(Debug)]
pub struct RatchetFailure {
    pub session: RatchetSession,
    pub error: WaspError,
}

impl std::fmt::Display for RatchetFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for RatchetFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Per-contact ratchet state.
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RatchetSession {
    #[serde(with = "serde_hex::x25519_secret")]
    pub dhs_priv: X25519StaticSecret,
    #[serde(with = "serde_hex::x25519_public")]
    pub dhs_pub: X25519PublicKey,
    #[serde(with = "serde_hex::option_x25519_public")]
    pub dhr: Option<X25519PublicKey>,
    #[serde(with = "serde_hex::bytes32")]
    pub rk: [u8; 32],
    #[serde(with = "serde_hex::option_bytes32")]
    pub cks: Option<[u8; 32]>,
    #[serde(with = "serde_hex::option_bytes32")]
    pub ckr: Option<[u8; 32]>,
    pub ns: u32,
    pub nr: u32,
    pub pn: u32,
    /// Insertion-ordered; iterating `mk_skipped_order` and looking each key
    /// up in `mk_skipped` reproduces the FIFO eviction order bit-for-bit
    /// across a serialize/deserialize round trip.
    #[serde(with = "skipped_map_serde")]
    pub mk_skipped: HashMap<String, [u8; 32]>,
    #[serde(skip)]
    mk_skipped_order: VecDeque<String>,
    #[serde(skip, default)]
    limits: RatchetLimits,
}

mod skipped_map_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        map: &HashMap<String, [u8; 32]>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<(String, String)> = map
            .iter()
            .map(|(k, v)| (k.clone(), hex::encode(v)))
            .collect();
        entries.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<HashMap<String, [u8; 32]>, D::Error> {
        let entries: Vec<(String, String)> = Vec::deserialize(d)?;
        entries
            .into_iter()
            .map(|(k, hex_str)| {
                let bytes = hex::decode(hex_str).map_err(serde::de::Error::custom)?;
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| serde::de::Error::custom("expected 32 bytes"))?;
                Ok((k, arr))
            })
            .collect()
    }
}

impl std::fmt::Debug for RatchetSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RatchetSession")
            .field("dhs_pub", &hex::encode(self.dhs_pub.as_bytes()))
            .field("dhr", &self.dhr.map(|k| hex::encode(k.as_bytes())))
            .field("ns", &self.ns)
            .field("nr", &self.nr)
            .field("pn", &self.pn)
            .field("skipped_keys", &self.mk_skipped.len())
            .finish()
    }
}

impl Drop for RatchetSession {
    fn drop(&mut self) {
        self.rk.zeroize();
        if let Some(ck) = self.cks.as_mut() {
            ck.zeroize();
        }
        if let Some(ck) = self.ckr.as_mut() {
            ck.zeroize();
        }
        for mk in self.mk_skipped.values_mut() {
            mk.zeroize();
        }
    }
}

impl RatchetSession {
    /// Sender init: fresh `DHs`, `DHr` set to the peer's signed pre-key, the
    /// first DH ratchet populates `CKs` immediately.
    pub fn init_sender(
        sk: &[u8; 32],
        peer_spk_pub: X25519PublicKey,
        limits: RatchetLimits,
    ) -> Result<Self, WaspError> {
        let dhs_priv = X25519StaticSecret::random_from_rng(rand::rngs::OsRng);
        let dhs_pub = X25519PublicKey::from(&dhs_priv);
        let dh_out = dh(&dhs_priv, &peer_spk_pub);
        let (rk, cks) = kdf_rk(sk, &dh_out)?;
        Ok(Self {
            dhs_priv,
            dhs_pub,
            dhr: Some(peer_spk_pub),
            rk,
            cks: Some(cks),
            ckr: None,
            ns: 0,
            nr: 0,
            pn: 0,
            mk_skipped: HashMap::new(),
            mk_skipped_order: VecDeque::new(),
            limits,
        })
    }

    /// Receiver init: reuses the owned signed pre-key pair as the starting
    /// ratchet key; `CKr` then `CKs` are populated by the first DH ratchet
    /// step on receipt.
    pub fn init_receiver(
        sk: [u8; 32],
        own_spk_priv: X25519StaticSecret,
        own_spk_pub: X25519PublicKey,
        limits: RatchetLimits,
    ) -> Self {
        Self {
            dhs_priv: own_spk_priv,
            dhs_pub: own_spk_pub,
            dhr: None,
            rk: sk,
            cks: None,
            ckr: None,
            ns: 0,
            nr: 0,
            pn: 0,
            mk_skipped: HashMap::new(),
            mk_skipped_order: VecDeque::new(),
            limits,
        }
    }

    /// Applies the configured limits to a session restored from storage
    /// (the limits themselves are never part of the persisted form).
    pub fn set_limits(&mut self, limits: RatchetLimits) {
        self.limits = limits;
    }

    pub fn limits(&self) -> RatchetLimits {
        self.limits
    }

    /// Encrypts `plaintext` under the current sending chain. Consumes
    /// `self`; on success returns the advanced state plus the message to
    /// send, on failure returns the untouched state inside `RatchetFailure`.
    pub fn encrypt(
        self,
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<(Self, RatchetMessage), RatchetFailure> {
        let mut state = self;
        let cks = match state.cks {
            Some(ck) => ck,
            None => {
                return Err(RatchetFailure {
                    session: state,
                    error: WaspError::NotInitialized,
                })
            }
        };

        let (next_cks, mk) = kdf_ck(&cks);
        let header = RatchetHeader {
            dh_ratchet_key: state.dhs_pub,
            pn: state.pn,
            n: state.ns,
        };

        let (cipher_key, _mac_key, iv) = match kdf_mk(&mk) {
            Ok(v) => v,
            Err(e) => return Err(RatchetFailure { session: state, error: e }),
        };
        let mut aad = header.header_bytes().to_vec();
        aad.extend_from_slice(associated_data);

        let ciphertext = match aes_gcm_seal(&cipher_key, &iv, plaintext, &aad) {
            Ok(c) => c,
            Err(e) => return Err(RatchetFailure { session: state, error: e }),
        };

        state.cks = Some(next_cks);
        state.ns += 1;

        Ok((state, RatchetMessage { header, ciphertext }))
    }

    /// Decrypts a received message, running a DH ratchet step first if the
    /// sender switched ratchet keys. Consumes `self`; the original is handed
    /// back untouched inside `RatchetFailure` on any error, so a
    /// dropped/replayed/tampered message never corrupts state.
    pub fn decrypt(
        self,
        msg: &RatchetMessage,
        associated_data: &[u8],
    ) -> Result<(Self, Vec<u8>), RatchetFailure> {
        let limits = self.limits;
        let trial = self.clone();
        match trial.try_decrypt(msg, associated_data, &limits) {
            Ok((next, plaintext)) => Ok((next, plaintext)),
            Err(error) => Err(RatchetFailure {
                session: self,
                error,
            }),
        }
    }

    fn try_decrypt(
        mut self,
        msg: &RatchetMessage,
        associated_data: &[u8],
        limits: &RatchetLimits,
    ) -> Result<(Self, Vec<u8>), WaspError> {
        let header = &msg.header;
        let cache_key = skipped_cache_key(&header.dh_ratchet_key, header.n);

        // 1. Skipped-key lookup resolves out-of-order delivery.
        if let Some(mk) = self.mk_skipped.get(&cache_key).copied() {
            let plaintext =
                decrypt_with_message_key(&mk, header, &msg.ciphertext, associated_data)?;
            self.mk_skipped.remove(&cache_key);
            self.mk_skipped_order.retain(|k| k != &cache_key);
            return Ok((self, plaintext));
        }

        // 2. DH ratchet step if the sender switched ratchet keys.
        if self.dhr.as_ref() != Some(&header.dh_ratchet_key) {
            self.dh_ratchet_step(header, limits)?;
        }

        // 3. Skip forward to H.n in the (now current) receiving chain.
        self.skip_message_keys(header.n, limits)?;

        // 4. Decrypt with the current receiving chain key.
        let ckr = self.ckr.ok_or(WaspError::NotInitialized)?;
        let (next_ckr, mk) = kdf_ck(&ckr);
        let plaintext = decrypt_with_message_key(&mk, header, &msg.ciphertext, associated_data)?;
        self.ckr = Some(next_ckr);
        self.nr = header.n + 1;

        Ok((self, plaintext))
    }

    fn dh_ratchet_step(&mut self, header: &RatchetHeader, limits: &RatchetLimits) -> Result<(), WaspError> {
        // a. Skip the remainder of the current receiving chain.
        self.skip_message_keys(header.pn, limits)?;

        // b. Fold in the DH output under the old DHs against the new DHr.
        let dh_out = dh(&self.dhs_priv, &header.dh_ratchet_key);
        let (rk_after_recv, ckr) = kdf_rk(&self.rk, &dh_out)?;
        self.rk = rk_after_recv;
        self.ckr = Some(ckr);

        // c. Adopt the peer's new ratchet key, generate our own, roll counters.
        self.dhr = Some(header.dh_ratchet_key);
        self.dhs_priv = X25519StaticSecret::random_from_rng(rand::rngs::OsRng);
        self.dhs_pub = X25519PublicKey::from(&self.dhs_priv);
        self.pn = self.ns;
        self.ns = 0;
        self.nr = 0;

        // d. Derive the new sending chain against the adopted DHr.
        let dh_out2 = dh(&self.dhs_priv, self.dhr.as_ref().expect("just set"));
        let (rk_after_send, cks) = kdf_rk(&self.rk, &dh_out2)?;
        self.rk = rk_after_send;
        self.cks = Some(cks);

        tracing::debug!(new_dhr = %hex::encode(header.dh_ratchet_key.as_bytes()), "dh ratchet step");
        Ok(())
    }

    /// Advances the receiving chain from `self.nr` up to (excluding) `until`,
    /// caching each skipped message key. No-op if there is no receiving
    /// chain yet (first-ever message in a fresh session).
    fn skip_message_keys(&mut self, until: u32, limits: &RatchetLimits) -> Result<(), WaspError> {
        let Some(mut ckr) = self.ckr else {
            return Ok(());
        };
        if until <= self.nr {
            self.ckr = Some(ckr);
            return Ok(());
        }
        let gap = (until - self.nr) as u64;
        if gap > limits.max_skip {
            self.ckr = Some(ckr);
            return Err(WaspError::TooManySkipped {
                requested: gap,
                limit: limits.max_skip,
            });
        }
        let dh_pub = self.dhr.ok_or(WaspError::NotInitialized)?;
        for i in self.nr..until {
            let (next_ckr, mk) = kdf_ck(&ckr);
            let key = skipped_cache_key(&dh_pub, i);
            self.insert_skipped(key, mk, limits);
            ckr = next_ckr;
        }
        self.ckr = Some(ckr);
        self.nr = until;
        Ok(())
    }

    fn insert_skipped(&mut self, key: String, mk: [u8; 32], limits: &RatchetLimits) {
        if !self.mk_skipped.contains_key(&key) && self.mk_skipped.len() >= limits.max_cache {
            if let Some(oldest) = self.mk_skipped_order.pop_front() {
                self.mk_skipped.remove(&oldest);
                tracing::debug!(evicted = %oldest, "skipped-key cache full, evicting oldest entry");
            }
        }
        if self.mk_skipped.insert(key.clone(), mk).is_none() {
            self.mk_skipped_order.push_back(key);
        }
    }
}
