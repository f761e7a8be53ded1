//! Wire-format conformance tests for the sealed envelope scheme
//!
//! These pin the exact byte layout of the two base64 halves so that
//! independently written senders (e.g. gateway web clients) stay
//! interoperable with admin nodes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use lantern_crypto::*;

#[test]
fn payload_layout_is_nonce_then_ciphertext() {
    let admin = AdminKeyPair::generate();
    let plaintext = b"layout check";
    let sealed = seal_message(plaintext, &admin.public_key()).unwrap();

    let raw = BASE64.decode(&sealed.payload).unwrap();
    // nonce || ciphertext, where ciphertext = plaintext + 16-byte GCM tag
    assert_eq!(raw.len(), NONCE_SIZE + plaintext.len() + 16);
}

#[test]
fn wrapped_key_layout_is_pub_nonce_box() {
    let admin = AdminKeyPair::generate();
    let sealed = seal_message(b"x", &admin.public_key()).unwrap();

    let raw = BASE64.decode(&sealed.wrapped_key).unwrap();
    // ephemeral pub || nonce || sealed session key (32 + GCM tag)
    assert_eq!(raw.len(), PUBLIC_KEY_SIZE + NONCE_SIZE + SESSION_KEY_SIZE + 16);
}

#[test]
fn manual_two_step_open_matches_one_shot() {
    let admin = AdminKeyPair::generate();
    let sealed = seal_message(b"two-step", &admin.public_key()).unwrap();

    let session_key = unwrap_session_key(&sealed.wrapped_key, &admin).unwrap();
    let plaintext = open_payload(&sealed.payload, &session_key).unwrap();
    assert_eq!(plaintext, b"two-step");

    let one_shot = open_message(&sealed.payload, &sealed.wrapped_key, &admin).unwrap();
    assert_eq!(one_shot, plaintext);
}

#[test]
fn unicode_plaintext_survives() {
    let admin = AdminKeyPair::generate();
    let message = "Сбор у моста в 19:00 — передайте дальше";
    let sealed = seal_message(message.as_bytes(), &admin.public_key()).unwrap();

    let opened = open_message(&sealed.payload, &sealed.wrapped_key, &admin).unwrap();
    assert_eq!(String::from_utf8(opened).unwrap(), message);
}

#[test]
fn large_plaintext_roundtrip() {
    let admin = AdminKeyPair::generate();
    let message = vec![0x5au8; 256 * 1024];
    let sealed = seal_message(&message, &admin.public_key()).unwrap();

    let opened = open_message(&sealed.payload, &sealed.wrapped_key, &admin).unwrap();
    assert_eq!(opened, message);
}

#[test]
fn wrapped_key_from_distributed_public_half() {
    // A sender only ever holds the base64 public half the admin published.
    let admin = AdminKeyPair::generate();
    let distributed = admin.public_base64();

    let sender_view = parse_public_key(&distributed).unwrap();
    let sealed = seal_message(b"from afar", &sender_view).unwrap();

    let opened = open_message(&sealed.payload, &sealed.wrapped_key, &admin).unwrap();
    assert_eq!(opened, b"from afar");
}
