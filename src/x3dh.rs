//! Asynchronous 3-or-4-DH key agreement.

use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

use crate::error::WaspError;
use crate::identity::Identity;
use crate::prekey::{OneTimePreKey, PreKeyBundle, SignedPreKey};
use crate::primitives::{dh, kdf_x3dh};

/// Output of the sender side of X3DH: the shared secret plus the pieces the
/// receiver needs to reproduce it (carried in the pre-key message envelope).
pub struct X3DHSendResult {
    pub sk: [u8; 32],
    pub ephemeral_public: X25519PublicKey,
    pub used_one_time_prekey_id: Option<u32>,
}

/// Sender side of X3DH.
pub fn x3dh_send(identity: &Identity, bundle: &PreKeyBundle) -> Result<X3DHSendResult, WaspError> {
    if !crate::identity::verify_signature(
        &bundle.identity_sign_pub,
        bundle.signed_prekey_pub.as_bytes(),
        &bundle.signed_prekey_signature,
    ) {
        return Err(WaspError::InvalidSignature);
    }

    let ephemeral_private = X25519StaticSecret::random_from_rng(rand::rngs::OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_private);

    let dh1 = dh(&identity.dh_priv, &bundle.signed_prekey_pub);
    let dh2 = dh(&ephemeral_private, &bundle.identity_dh_pub);
    let dh3 = dh(&ephemeral_private, &bundle.signed_prekey_pub);

    let mut terms = vec![dh1, dh2, dh3];
    if let Some(opk_pub) = bundle.one_time_prekey_pub {
        terms.push(dh(&ephemeral_private, &opk_pub));
    }

    let sk = kdf_x3dh(&terms)?;

    Ok(X3DHSendResult {
        sk,
        ephemeral_public,
        used_one_time_prekey_id: bundle.one_time_prekey_pub.and(bundle.one_time_prekey_id),
    })
}

/// Receiver side of X3DH. Takes the used SPK pair by reference and the
/// consumed OPK by value so the caller is forced to decide what happens to
/// it: it must be destroyed immediately after this call, and this function
/// never persists it.
pub fn x3dh_receive(
    identity: &Identity,
    spk: &SignedPreKey,
    opk: Option<OneTimePreKey>,
    sender_identity_dh_pub: &X25519PublicKey,
    sender_ephemeral_pub: &X25519PublicKey,
) -> Result<[u8; 32], WaspError> {
    let dh1 = dh(&spk.private, sender_identity_dh_pub);
    let dh2 = dh(&identity.dh_priv, sender_ephemeral_pub);
    let dh3 = dh(&spk.private, sender_ephemeral_pub);

    let mut terms = vec![dh1, dh2, dh3];
    if let Some(ref one_time) = opk {
        terms.push(dh(&one_time.private, sender_ephemeral_pub));
    }
    // `opk` (and its private half) is dropped here, at the end of its scope,
    // immediately after the single DH it was allowed to contribute to.

    kdf_x3dh(&terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prekey::{generate_one_time_pre_keys, generate_signed_pre_key};

    fn bundle_from(
        bob: &Identity,
        spk: &SignedPreKey,
        opk: Option<&crate::prekey::OneTimePreKey>,
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
    fn matching_sk_with_one_time_prekey() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let spk = generate_signed_pre_key(&bob, 1, 0);
        let opks = generate_one_time_pre_keys(100, 1).unwrap();
        let bundle = bundle_from(&bob, &spk, Some(&opks[0]));

        let sent = x3dh_send(&alice, &bundle).unwrap();
        assert_eq!(sent.used_one_time_prekey_id, Some(100));

        let received = x3dh_receive(
            &bob,
            &spk,
            Some(opks[0].clone()),
            &alice.dh_pub,
            &sent.ephemeral_public,
        )
        .unwrap();

        assert_eq!(sent.sk, received);
    }

    #[test]
    fn matching_sk_without_one_time_prekey() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let spk = generate_signed_pre_key(&bob, 1, 0);
        let bundle = bundle_from(&bob, &spk, None);

        let sent = x3dh_send(&alice, &bundle).unwrap();
        assert_eq!(sent.used_one_time_prekey_id, None);

        let received =
            x3dh_receive(&bob, &spk, None, &alice.dh_pub, &sent.ephemeral_public).unwrap();

        assert_eq!(sent.sk, received);
    }

    #[test]
    fn rejects_tampered_signature() {
        let alice = Identity::generate();
        let bob = Identity::generate();
        let spk = generate_signed_pre_key(&bob, 1, 0);
        let mut bundle = bundle_from(&bob, &spk, None);
        bundle.signed_prekey_signature = [0u8; 64];

        let err = x3dh_send(&alice, &bundle).unwrap_err();
        assert!(matches!(err, WaspError::InvalidSignature));
    }
}
