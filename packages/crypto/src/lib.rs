//! Lantern Crypto - Cryptographic envelope primitives for the Lantern mesh
//!
//! This crate provides:
//! - X25519 administrator key pairs
//! - AES-256-GCM payload sealing under fresh session keys
//! - Ephemeral-static session-key wrapping to the admin public key
//!
//! The mesh itself never interprets these values; relays carry the two
//! base64 halves as opaque strings and only admin nodes join them.

mod error;
mod keys;
mod sealed;

pub use error::CryptoError;
pub use keys::{parse_public_key, public_key_from_slice, zeroize_key, AdminKeyPair, PUBLIC_KEY_SIZE};
pub use sealed::{
    open_message, open_payload, seal_message, seal_payload, unwrap_session_key, wrap_session_key,
    SealedMessage, ALGORITHM, NONCE_SIZE, SESSION_KEY_SIZE,
};

pub use x25519_dalek::PublicKey;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_tag() {
        assert_eq!(ALGORITHM, "x25519+aes-256-gcm");
    }
}
