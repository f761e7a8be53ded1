//! Error types for Lantern Crypto

use thiserror::Error;

/// Cryptographic operation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid private key")]
    InvalidKey,

    #[error("Invalid public key format")]
    InvalidPublicKey,

    #[error("Administrator key not available")]
    AdminKeyMissing,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Invalid ciphertext format")]
    InvalidCiphertext,

    #[error("Invalid wrapped key format")]
    InvalidWrappedKey,

    #[error("Invalid base64 encoding")]
    InvalidBase64,

    #[error("Key derivation failed")]
    KeyDerivationFailed,

    #[error("Random number generation failed")]
    RandomGenerationFailed,
}
