//! End-to-end scenarios driven entirely through the public session-manager
//! and media APIs, with envelopes round-tripped through JSON to exercise
//! the wire shape, not just in-memory structs.

use wasp_core::{
    create_outgoing_session, decrypt_incoming, decrypt_media, encrypt_media,
    generate_one_time_pre_keys, generate_signed_pre_key, Envelope, Identity, MessageType,
    PreKeyBundle, WaspError,
};

fn bundle_from(
    peer: &Identity,
    spk: &wasp_core::SignedPreKey,
    opk: Option<&wasp_core::OneTimePreKey>,
) -> PreKeyBundle {
    PreKeyBundle {
        user_id: "bob".into(),
        registration_id: peer.registration_id,
        identity_dh_pub: peer.dh_pub,
        identity_sign_pub: peer.sign_pub,
        signed_prekey_id: spk.key_id,
        signed_prekey_pub: spk.public,
        signed_prekey_signature: spk.signature,
        one_time_prekey_id: opk.map(|k| k.key_id),
        one_time_prekey_pub: opk.map(|k| k.public),
    }
}

fn envelope_over_wire(envelope: &Envelope) -> Envelope {
    let json = serde_json::to_string(envelope).unwrap();
    serde_json::from_str(&json).unwrap()
}

/// Simple round trip with a one-time pre-key.
#[test]
fn s1_simple_round_trip() {
    let _ = tracing_subscriber::fmt::try_init();

    let alice = Identity::generate();
    let bob = Identity::generate();
    let spk = generate_signed_pre_key(&bob, 1, 0);
    let mut opks = generate_one_time_pre_keys(100, 10).unwrap();
    let used_opk = opks[0].clone();
    let bundle = bundle_from(&bob, &spk, Some(&used_opk));

    let pending = create_outgoing_session(&alice, &bundle, "bob").unwrap();
    let (envelope, _alice_session) = pending
        .encrypt_first(b"Hello, Bob!", MessageType::Text)
        .unwrap();
    let envelope = envelope_over_wire(&envelope);

    assert!(envelope.is_pre_key_message);
    assert_eq!(envelope.used_one_time_prekey_id, Some(100));
    assert_eq!(envelope.header.n, 0);
    assert_eq!(envelope.header.pn, 0);

    // Consuming the one-time pre-key removes it from the store, the way the
    // server-side OPK inventory would after a single X3DH receive.
    opks.remove(0);
    assert!(opks.iter().all(|k| k.key_id != 100));

    let (plaintext, _bob_session) =
        decrypt_incoming(&bob, &spk, Some(used_opk), None, &envelope, "alice").unwrap();
    assert_eq!(plaintext, b"Hello, Bob!");
}

/// Bidirectional exchange that triggers a DH ratchet step on each side.
#[test]
fn s2_bidirectional_with_dh_ratchet() {
    let alice = Identity::generate();
    let bob = Identity::generate();
    let spk = generate_signed_pre_key(&bob, 1, 0);
    let bundle = bundle_from(&bob, &spk, None);

    let pending = create_outgoing_session(&alice, &bundle, "bob").unwrap();
    let (envelope1, alice_session) = pending
        .encrypt_first(b"Hello, Bob!", MessageType::Text)
        .unwrap();
    let (plaintext1, bob_session) =
        decrypt_incoming(&bob, &spk, None, None, &envelope_over_wire(&envelope1), "alice")
            .unwrap();
    assert_eq!(plaintext1, b"Hello, Bob!");

    let alice_dhs_before = alice_session.ratchet.dhs_pub;

    let (envelope2, bob_session) = bob_session.encrypt(b"Hi Alice", MessageType::Text).unwrap();
    let bob_dhs_at_send = bob_session.ratchet.dhs_pub;
    let (plaintext2, alice_session) =
        decrypt_incoming(&alice, &spk, None, Some(alice_session), &envelope_over_wire(&envelope2), "bob")
            .unwrap();
    assert_eq!(plaintext2, b"Hi Alice");
    assert_eq!(alice_session.ratchet.dhr, Some(bob_dhs_at_send));

    let (envelope3, _alice_session) = alice_session.encrypt(b"back", MessageType::Text).unwrap();
    assert_eq!(envelope3.header.pn, 1);

    let (plaintext3, bob_session) = decrypt_incoming(
        &bob,
        &spk,
        None,
        Some(bob_session),
        &envelope_over_wire(&envelope3),
        "alice",
    )
    .unwrap();
    assert_eq!(plaintext3, b"back");
    assert_eq!(bob_session.ratchet.dhr, Some(alice_dhs_before));
}

/// Out-of-order delivery within a single sending chain. The handshake
/// message establishes both sessions first (bootstrap is not reorderable by
/// construction); `m1..m3` then arrive within the now-ongoing chain out of
/// order.
#[test]
fn s3_out_of_order_delivery() {
    let alice = Identity::generate();
    let bob = Identity::generate();
    let spk = generate_signed_pre_key(&bob, 1, 0);
    let bundle = bundle_from(&bob, &spk, None);

    let pending = create_outgoing_session(&alice, &bundle, "bob").unwrap();
    let (handshake, alice_session) = pending
        .encrypt_first(b"handshake", MessageType::Text)
        .unwrap();
    let (_pt0, bob_session) =
        decrypt_incoming(&bob, &spk, None, None, &envelope_over_wire(&handshake), "alice").unwrap();

    let (m1, alice_session) = alice_session.encrypt(b"m1", MessageType::Text).unwrap();
    let (m2, alice_session) = alice_session.encrypt(b"m2", MessageType::Text).unwrap();
    let (m3, _alice_session) = alice_session.encrypt(b"m3", MessageType::Text).unwrap();

    let (pt3, bob_session) = decrypt_incoming(
        &bob,
        &spk,
        None,
        Some(bob_session),
        &envelope_over_wire(&m3),
        "alice",
    )
    .unwrap();
    assert_eq!(pt3, b"m3");
    assert_eq!(bob_session.ratchet.mk_skipped.len(), 2);

    let (pt1, bob_session) = decrypt_incoming(
        &bob,
        &spk,
        None,
        Some(bob_session),
        &envelope_over_wire(&m1),
        "alice",
    )
    .unwrap();
    assert_eq!(pt1, b"m1");

    let (pt2, bob_session) = decrypt_incoming(
        &bob,
        &spk,
        None,
        Some(bob_session),
        &envelope_over_wire(&m2),
        "alice",
    )
    .unwrap();
    assert_eq!(pt2, b"m2");
    assert!(bob_session.ratchet.mk_skipped.is_empty());
}

/// Replaying a delivered message fails closed and never mutates state.
#[test]
fn s4_replay_rejection() {
    let alice = Identity::generate();
    let bob = Identity::generate();
    let spk = generate_signed_pre_key(&bob, 1, 0);
    let bundle = bundle_from(&bob, &spk, None);

    let pending = create_outgoing_session(&alice, &bundle, "bob").unwrap();
    let (envelope, _alice_session) = pending
        .encrypt_first(b"hi", MessageType::Text)
        .unwrap();
    let envelope = envelope_over_wire(&envelope);

    let (plaintext, bob_session) =
        decrypt_incoming(&bob, &spk, None, None, &envelope, "alice").unwrap();
    assert_eq!(plaintext, b"hi");

    let before = serde_json::to_string(&bob_session).unwrap();
    let failure =
        decrypt_incoming(&bob, &spk, None, Some(bob_session), &envelope, "alice").unwrap_err();
    assert!(matches!(failure.error, WaspError::AuthFailure));
    let after = serde_json::to_string(&failure.session.unwrap()).unwrap();
    assert_eq!(before, after);
}

/// Tampering with ciphertext or header causes a closed failure.
#[test]
fn s5_tamper_detection() {
    let alice = Identity::generate();
    let bob = Identity::generate();
    let spk = generate_signed_pre_key(&bob, 1, 0);
    let bundle = bundle_from(&bob, &spk, None);

    let pending = create_outgoing_session(&alice, &bundle, "bob").unwrap();
    let (mut envelope, _alice_session) = pending
        .encrypt_first(b"hi", MessageType::Text)
        .unwrap();
    envelope.ciphertext[0] ^= 0x01;

    let failure = decrypt_incoming(&bob, &spk, None, None, &envelope, "alice").unwrap_err();
    assert!(matches!(failure.error, WaspError::AuthFailure));

    let pending2 = create_outgoing_session(&alice, &bundle, "bob").unwrap();
    let (mut envelope2, _) = pending2
        .encrypt_first(b"hi again", MessageType::Text)
        .unwrap();
    envelope2.header.n = 1;
    let failure2 = decrypt_incoming(&bob, &spk, None, None, &envelope2, "alice").unwrap_err();
    assert!(matches!(
        failure2.error,
        WaspError::AuthFailure | WaspError::TooManySkipped { .. }
    ));
}

/// A tampered signed pre-key signature aborts session creation.
#[test]
fn s6_bundle_signature_tampering() {
    let alice = Identity::generate();
    let bob = Identity::generate();
    let spk = generate_signed_pre_key(&bob, 1, 0);
    let mut bundle = bundle_from(&bob, &spk, None);
    bundle.signed_prekey_signature = [0u8; 64];

    let err = create_outgoing_session(&alice, &bundle, "bob").unwrap_err();
    assert!(matches!(err, WaspError::InvalidSignature));
}

/// Media blob round trip and digest tamper detection.
#[test]
fn s7_media_round_trip_and_tamper() {
    let plaintext: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    let enc = encrypt_media(&plaintext).unwrap();
    let out = decrypt_media(&enc.blob, &enc.media_key, &enc.digest).unwrap();
    assert_eq!(out, plaintext);

    let mut bad_digest = enc.digest;
    let last = bad_digest.len() - 1;
    bad_digest[last] ^= 0xFF;
    let err = decrypt_media(&enc.blob, &enc.media_key, &bad_digest).unwrap_err();
    assert!(matches!(err, WaspError::MediaIntegrity));
}
