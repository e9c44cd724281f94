//! Maps application intent (send to a contact / handle an incoming
//! envelope) onto X3DH and Double Ratchet operations.
//!
//! Whether an outgoing message is the session's first is not a
//! caller-supplied boolean that can be passed wrong: [`PendingSession`] can
//! only ever produce one first envelope, after which `encrypt_first`
//! consumes it and returns a plain [`Session`]. There is no second code path
//! capable of producing a pre-key message, so there is no flag to get wrong.

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::config::RatchetLimits;
use crate::envelope::{Envelope, MessageType};
use crate::error::WaspError;
use crate::identity::Identity;
use crate::prekey::{OneTimePreKey, PreKeyBundle, SignedPreKey};
use crate::ratchet::{RatchetMessage, RatchetSession};
use crate::x3dh::{x3dh_receive, x3dh_send};

fn associated_data(sender_sign_pub: &VerifyingKey, recipient_sign_pub: &VerifyingKey) -> Vec<u8> {
    let mut aad = Vec::with_capacity(64);
    aad.extend_from_slice(&sender_sign_pub.to_bytes());
    aad.extend_from_slice(&recipient_sign_pub.to_bytes());
    aad
}

/// An outgoing session that has not yet sent its first message. Carries the
/// X3DH "pending context" (our ephemeral key and, if used, the one-time
/// pre-key id) that must ride along on exactly one envelope.
pub struct PendingSession {
    contact_id: String,
    own_identity_sign_pub: VerifyingKey,
    own_identity_dh_pub: x25519_dalek::PublicKey,
    own_registration_id: u16,
    peer_identity_sign_pub: VerifyingKey,
    peer_registration_id: u32,
    ratchet: RatchetSession,
    ephemeral_public: x25519_dalek::PublicKey,
    used_one_time_prekey_id: Option<u32>,
    created_at: i64,
}

/// An established session: the pending X3DH context has been consumed (or
/// this session was born on the receiving side, which never has one).
#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Session {
    pub contact_id: String,
    #[serde(with = "crate::serde_hex::ed25519_public")]
    pub own_identity_sign_pub: VerifyingKey,
    pub own_registration_id: u16,
    #[serde(with = "crate::serde_hex::ed25519_public")]
    pub peer_identity_sign_pub: VerifyingKey,
    pub peer_registration_id: u32,
    pub ratchet: RatchetSession,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Runs X3DH send and initializes the sender ratchet; the returned
/// `PendingSession` owns the ephemeral key and used-OPK id until the first
/// envelope is built.
pub fn create_outgoing_session(
    identity: &Identity,
    bundle: &PreKeyBundle,
    contact_id: impl Into<String>,
) -> Result<PendingSession, WaspError> {
    let sent = x3dh_send(identity, bundle)?;
    let ratchet = RatchetSession::init_sender(
        &sent.sk,
        bundle.signed_prekey_pub,
        RatchetLimits::default(),
    )?;
    Ok(PendingSession {
        contact_id: contact_id.into(),
        own_identity_sign_pub: identity.sign_pub,
        own_identity_dh_pub: identity.dh_pub,
        own_registration_id: identity.registration_id,
        peer_identity_sign_pub: bundle.identity_sign_pub,
        peer_registration_id: bundle.registration_id as u32,
        ratchet,
        ephemeral_public: sent.ephemeral_public,
        used_one_time_prekey_id: sent.used_one_time_prekey_id,
        created_at: now_ms(),
    })
}

impl PendingSession {
    /// Builds the first envelope and transitions into a plain `Session`.
    /// The pending X3DH context is consumed here, once, by construction:
    /// there is no second method capable of emitting pre-key fields. The
    /// sender's own registration id rides along from the context captured at
    /// `create_outgoing_session` time rather than being taken again here,
    /// so it cannot disagree with the X3DH context it was derived alongside.
    pub fn encrypt_first(
        self,
        plaintext: &[u8],
        message_type: MessageType,
    ) -> Result<(Envelope, Session), WaspError> {
        let aad = associated_data(&self.own_identity_sign_pub, &self.peer_identity_sign_pub);
        let (ratchet, msg) = self
            .ratchet
            .encrypt(plaintext, &aad)
            .map_err(|failure| failure.error)?;

        let envelope = Envelope {
            is_pre_key_message: true,
            header: msg.header,
            ciphertext: msg.ciphertext,
            message_type,
            registration_id: self.own_registration_id as u32,
            sender_identity_dh_key: Some(self.own_identity_dh_pub),
            sender_ephemeral_key: Some(self.ephemeral_public),
            sender_identity_sign_key: Some(self.own_identity_sign_pub),
            used_one_time_prekey_id: self.used_one_time_prekey_id,
        };

        let session = Session {
            contact_id: self.contact_id,
            own_identity_sign_pub: self.own_identity_sign_pub,
            own_registration_id: self.own_registration_id,
            peer_identity_sign_pub: self.peer_identity_sign_pub,
            peer_registration_id: self.peer_registration_id,
            ratchet,
            created_at: self.created_at,
            updated_at: now_ms(),
        };

        Ok((envelope, session))
    }

    pub fn contact_id(&self) -> &str {
        &self.contact_id
    }
}

impl Session {
    /// Encrypts a message on an already established session.
    pub fn encrypt(
        self,
        plaintext: &[u8],
        message_type: MessageType,
    ) -> Result<(Envelope, Session), SessionFailure> {
        let aad = associated_data(&self.own_identity_sign_pub, &self.peer_identity_sign_pub);
        let Session {
            contact_id,
            own_identity_sign_pub,
            own_registration_id,
            peer_identity_sign_pub,
            peer_registration_id,
            ratchet,
            created_at,
            updated_at,
        } = self;

        match ratchet.encrypt(plaintext, &aad) {
            Ok((ratchet, msg)) => {
                let envelope = Envelope {
                    is_pre_key_message: false,
                    header: msg.header,
                    ciphertext: msg.ciphertext,
                    message_type,
                    registration_id: own_registration_id as u32,
                    sender_identity_dh_key: None,
                    sender_ephemeral_key: None,
                    sender_identity_sign_key: None,
                    used_one_time_prekey_id: None,
                };
                let session = Session {
                    contact_id,
                    own_identity_sign_pub,
                    own_registration_id,
                    peer_identity_sign_pub,
                    peer_registration_id,
                    ratchet,
                    created_at,
                    updated_at: now_ms(),
                };
                Ok((envelope, session))
            }
            Err(failure) => Err(SessionFailure {
                error: failure.error,
                session: Some(Session {
                    contact_id,
                    own_identity_sign_pub,
                    own_registration_id,
                    peer_identity_sign_pub,
                    peer_registration_id,
                    ratchet: failure.session,
                    created_at,
                    updated_at,
                }),
            }),
        }
    }
}

/// A session-manager-level failure. `session` carries back whatever state
/// the caller should keep using: the untouched prior session on an ordinary
/// decrypt failure, or `None` when this was a first pre-key message whose
/// derived session must not be persisted.
#[derive(Debug)]
pub struct SessionFailure {
    pub error: WaspError,
    pub session: Option<Session>,
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.error.fmt(f)
    }
}

impl std::error::Error for SessionFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("contact_id", &self.contact_id)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .field("ratchet", &self.ratchet)
            .finish()
    }
}

/// `existing_session` is `None` on first contact: the envelope must then be
/// a pre-key message, and X3DH receive plus receiver-ratchet init run
/// before the ratchet decrypt.
pub fn decrypt_incoming(
    identity: &Identity,
    spk: &SignedPreKey,
    opk: Option<OneTimePreKey>,
    existing_session: Option<Session>,
    envelope: &Envelope,
    contact_id: &str,
) -> Result<(Vec<u8>, Session), SessionFailure> {
    match existing_session {
        Some(session) => decrypt_with_existing_session(session, envelope),
        None => decrypt_bootstrapping_session(identity, spk, opk, envelope, contact_id),
    }
}

fn decrypt_with_existing_session(
    session: Session,
    envelope: &Envelope,
) -> Result<(Vec<u8>, Session), SessionFailure> {
    if envelope.registration_id != session.peer_registration_id {
        let stored = session.peer_registration_id;
        return Err(SessionFailure {
            error: WaspError::SessionConflict {
                stored,
                received: envelope.registration_id,
            },
            session: Some(session),
        });
    }

    let Session {
        contact_id,
        own_identity_sign_pub,
        own_registration_id,
        peer_identity_sign_pub,
        peer_registration_id,
        ratchet,
        created_at,
        updated_at,
    } = session;

    let aad = associated_data(&peer_identity_sign_pub, &own_identity_sign_pub);
    let msg = RatchetMessage {
        header: envelope.header.clone(),
        ciphertext: envelope.ciphertext.clone(),
    };

    match ratchet.decrypt(&msg, &aad) {
        Ok((ratchet, plaintext)) => {
            let session = Session {
                contact_id,
                own_identity_sign_pub,
                own_registration_id,
                peer_identity_sign_pub,
                peer_registration_id,
                ratchet,
                created_at,
                updated_at: now_ms(),
            };
            Ok((plaintext, session))
        }
        Err(failure) => Err(SessionFailure {
            error: failure.error,
            session: Some(Session {
                contact_id,
                own_identity_sign_pub,
                own_registration_id,
                peer_identity_sign_pub,
                peer_registration_id,
                ratchet: failure.session,
                created_at,
                updated_at,
            }),
        }),
    }
}

fn decrypt_bootstrapping_session(
    identity: &Identity,
    spk: &SignedPreKey,
    opk: Option<OneTimePreKey>,
    envelope: &Envelope,
    contact_id: &str,
) -> Result<(Vec<u8>, Session), SessionFailure> {
    if !envelope.is_pre_key_message || !envelope.has_complete_prekey_fields() {
        return Err(SessionFailure {
            error: WaspError::ParseError(
                "no existing session and envelope is not a complete pre-key message".into(),
            ),
            session: None,
        });
    }
    let sender_identity_dh_pub = envelope.sender_identity_dh_key.expect("checked above");
    let sender_ephemeral_pub = envelope.sender_ephemeral_key.expect("checked above");
    let sender_identity_sign_pub = envelope.sender_identity_sign_key.expect("checked above");

    if let (Some(used_id), Some(ref opk)) = (envelope.used_one_time_prekey_id, &opk) {
        if used_id != opk.key_id {
            return Err(SessionFailure {
                error: WaspError::ParseError(
                    "used_one_time_prekey_id does not match the supplied one-time pre-key".into(),
                ),
                session: None,
            });
        }
    }

    let sk = match x3dh_receive(
        identity,
        spk,
        opk,
        &sender_identity_dh_pub,
        &sender_ephemeral_pub,
    ) {
        Ok(sk) => sk,
        Err(error) => return Err(SessionFailure { error, session: None }),
    };

    let ratchet = RatchetSession::init_receiver(
        sk,
        spk.private.clone(),
        spk.public,
        RatchetLimits::default(),
    );

    let aad = associated_data(&sender_identity_sign_pub, &identity.sign_pub);
    let msg = RatchetMessage {
        header: envelope.header.clone(),
        ciphertext: envelope.ciphertext.clone(),
    };

    match ratchet.decrypt(&msg, &aad) {
        Ok((ratchet, plaintext)) => {
            let now = now_ms();
            let session = Session {
                contact_id: contact_id.to_string(),
                own_identity_sign_pub: identity.sign_pub,
                own_registration_id: identity.registration_id,
                peer_identity_sign_pub: sender_identity_sign_pub,
                peer_registration_id: envelope.registration_id,
                ratchet,
                created_at: now,
                updated_at: now,
            };
            Ok((plaintext, session))
        }
        // A first pre-key message that fails to decrypt is discarded
        // entirely, not persisted.
        Err(failure) => Err(SessionFailure {
            error: failure.error,
            session: None,
        }),
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prekey::{generate_one_time_pre_keys, generate_signed_pre_key};

    fn bundle_from(
        bob: &Identity,
        spk: &SignedPreKey,
        opk: Option<&OneTimePreKey>,
    ) -> PreKeyBundle {
        PreKeyBundle {
            user_id: "bob".into(),
            registration_id: bob.registration_id,
            identity_dh_pub: bob.dh_pub,
            identity_sign_pub: bob.sign_pub,
            signed_prekey_id: spk.key_id,
            signed_prekey_pub: spk.public,
            signed_prekey_signature: spk.signature,
            one_time_prekey_id: opk.map(|k| k.key_id),
            one_time_prekey_pub: opk.map(|k| k.public),
        }
    }

    #[test]
    fn end_to_end_first_message_with_one_time_prekey() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let spk = generate_signed_pre_key(&bob, 1, 0);
        let opks = generate_one_time_pre_keys(100, 10).unwrap();
        let bundle = bundle_from(&bob, &spk, Some(&opks[0]));

        let pending = create_outgoing_session(&alice, &bundle, "bob").unwrap();
        let (envelope, alice_session) = pending
            .encrypt_first(b"Hello, Bob!", MessageType::Text)
            .unwrap();

        assert!(envelope.is_pre_key_message);
        assert_eq!(envelope.used_one_time_prekey_id, Some(100));
        assert_eq!(envelope.header.n, 0);
        assert_eq!(envelope.header.pn, 0);

        let (plaintext, bob_session) = decrypt_incoming(
            &bob,
            &spk,
            Some(opks[0].clone()),
            None,
            &envelope,
            "alice",
        )
        .unwrap();

        assert_eq!(plaintext, b"Hello, Bob!");
        assert_eq!(bob_session.peer_registration_id as u16, alice.registration_id);
        let _ = alice_session;
    }

    #[test]
    fn session_conflict_on_registration_id_mismatch() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let spk = generate_signed_pre_key(&bob, 1, 0);
        let bundle = bundle_from(&bob, &spk, None);

        let pending = create_outgoing_session(&alice, &bundle, "bob").unwrap();
        let (envelope, alice_session) = pending
            .encrypt_first(b"hi", MessageType::Text)
            .unwrap();
        let (_pt, bob_session) =
            decrypt_incoming(&bob, &spk, None, None, &envelope, "alice").unwrap();

        let (envelope2, _alice_session2) =
            alice_session.encrypt(b"second", MessageType::Text).unwrap();
        let mut tampered = envelope2;
        tampered.registration_id = bob_session.peer_registration_id.wrapping_add(1);

        let failure =
            decrypt_with_existing_session(bob_session, &tampered).unwrap_err();
        assert!(matches!(failure.error, WaspError::SessionConflict { .. }));
        assert!(failure.session.is_some());
    }
}
