//! Dual-path envelope sealing (X25519 key wrap + AES-256-GCM payload)
//!
//! A sealed message travels as two base64 strings:
//! - `payload`: nonce || AES-256-GCM(plaintext) under a fresh session key
//! - `wrapped_key`: ephemeralPub || nonce || AES-256-GCM(session key) under
//!   the wrap key derived from ECDH(ephemeral, admin) via HKDF-SHA256
//!
//! Only the holder of the admin secret can recover the session key; relays
//! and the gateway see ciphertext on both paths.

use crate::error::CryptoError;
use crate::keys::{derive_wrap_key, public_key_from_slice, AdminKeyPair, PUBLIC_KEY_SIZE};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::{Zeroize, Zeroizing};

/// Algorithm tag carried by key envelopes
pub const ALGORITHM: &str = "x25519+aes-256-gcm";

/// AES-256-GCM nonce size (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Session key size (256 bits)
pub const SESSION_KEY_SIZE: usize = 32;

/// AES-GCM authentication tag size
const TAG_SIZE: usize = 16;

/// Exact length of a decoded wrapped key: ephemeral pub || nonce || sealed session key
const WRAPPED_KEY_LEN: usize = PUBLIC_KEY_SIZE + NONCE_SIZE + SESSION_KEY_SIZE + TAG_SIZE;

/// The two halves of a sealed message, ready to travel on separate paths
#[derive(Debug, Clone)]
pub struct SealedMessage {
    /// base64(nonce || ciphertext), the message-path payload
    pub payload: String,
    /// base64(ephemeralPub || nonce || wrapped session key), the key-path payload
    pub wrapped_key: String,
}

/// Seal a plaintext to the administrator's public key
///
/// Generates a fresh 256-bit session key, encrypts the plaintext under it,
/// and wraps the session key to the admin public key via an ephemeral
/// X25519 exchange. The session key is zeroized before returning.
pub fn seal_message(
    plaintext: &[u8],
    admin_public: &PublicKey,
) -> Result<SealedMessage, CryptoError> {
    let mut session_key = [0u8; SESSION_KEY_SIZE];
    OsRng
        .try_fill_bytes(&mut session_key)
        .map_err(|_| CryptoError::RandomGenerationFailed)?;

    let result = (|| -> Result<SealedMessage, CryptoError> {
        let payload = seal_payload(plaintext, &session_key)?;
        let wrapped_key = wrap_session_key(&session_key, admin_public)?;
        Ok(SealedMessage {
            payload,
            wrapped_key,
        })
    })();

    session_key.zeroize();
    result
}

/// Encrypt a plaintext under a session key, producing base64(nonce || ciphertext)
pub fn seal_payload(
    plaintext: &[u8],
    session_key: &[u8; SESSION_KEY_SIZE],
) -> Result<String, CryptoError> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng
        .try_fill_bytes(&mut nonce_bytes)
        .map_err(|_| CryptoError::RandomGenerationFailed)?;

    let cipher =
        Aes256Gcm::new_from_slice(session_key).map_err(|_| CryptoError::InvalidKey)?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(BASE64.encode(&out))
}

/// Decrypt base64(nonce || ciphertext) under a session key
pub fn open_payload(
    payload_b64: &str,
    session_key: &[u8; SESSION_KEY_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let data = BASE64
        .decode(payload_b64)
        .map_err(|_| CryptoError::InvalidBase64)?;
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::InvalidCiphertext);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher =
        Aes256Gcm::new_from_slice(session_key).map_err(|_| CryptoError::InvalidKey)?;
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Wrap a session key to the admin public key
///
/// Produces base64(ephemeralPub || nonce || AES-256-GCM(session key)) where
/// the wrap key is HKDF-SHA256 over the ephemeral-static shared secret.
pub fn wrap_session_key(
    session_key: &[u8; SESSION_KEY_SIZE],
    admin_public: &PublicKey,
) -> Result<String, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pub = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(admin_public);

    let mut wrap_key = derive_wrap_key(shared.as_bytes())?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    let filled = OsRng.try_fill_bytes(&mut nonce_bytes);

    let result = filled
        .map_err(|_| CryptoError::RandomGenerationFailed)
        .and_then(|_| {
            let cipher =
                Aes256Gcm::new_from_slice(&wrap_key).map_err(|_| CryptoError::InvalidKey)?;
            let nonce = Nonce::from_slice(&nonce_bytes);
            cipher
                .encrypt(nonce, session_key.as_slice())
                .map_err(|_| CryptoError::EncryptionFailed)
        });

    wrap_key.zeroize();

    let wrapped = result?;
    let mut out = Vec::with_capacity(WRAPPED_KEY_LEN);
    out.extend_from_slice(ephemeral_pub.as_bytes());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&wrapped);
    Ok(BASE64.encode(&out))
}

/// Recover a session key from a wrapped key using the admin secret
///
/// Validates the decoded layout against the exact X25519 public key and
/// AES-GCM nonce sizes before attempting decryption.
pub fn unwrap_session_key(
    wrapped_b64: &str,
    admin: &AdminKeyPair,
) -> Result<Zeroizing<[u8; SESSION_KEY_SIZE]>, CryptoError> {
    let data = BASE64
        .decode(wrapped_b64)
        .map_err(|_| CryptoError::InvalidBase64)?;
    if data.len() != WRAPPED_KEY_LEN {
        return Err(CryptoError::InvalidWrappedKey);
    }

    let ephemeral_pub = public_key_from_slice(&data[..PUBLIC_KEY_SIZE])?;
    let nonce_bytes = &data[PUBLIC_KEY_SIZE..PUBLIC_KEY_SIZE + NONCE_SIZE];
    let wrapped = &data[PUBLIC_KEY_SIZE + NONCE_SIZE..];

    let shared = admin.secret().diffie_hellman(&ephemeral_pub);
    let mut wrap_key = derive_wrap_key(shared.as_bytes())?;

    let cipher = Aes256Gcm::new_from_slice(&wrap_key).map_err(|_| CryptoError::InvalidKey);
    let opened = cipher.and_then(|cipher| {
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher
            .decrypt(nonce, wrapped)
            .map_err(|_| CryptoError::DecryptionFailed)
    });

    wrap_key.zeroize();

    let mut opened = opened?;
    let key: [u8; SESSION_KEY_SIZE] = opened
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidWrappedKey)?;
    opened.zeroize();
    Ok(Zeroizing::new(key))
}

/// Recover the plaintext from both halves of a sealed message
pub fn open_message(
    payload_b64: &str,
    wrapped_b64: &str,
    admin: &AdminKeyPair,
) -> Result<Vec<u8>, CryptoError> {
    let session_key = unwrap_session_key(wrapped_b64, admin)?;
    open_payload(payload_b64, &session_key)
}
