//! Administrator key pairs and key derivation for Lantern mesh

use crate::error::CryptoError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

/// X25519 public key size in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// HKDF domain separation for the session-key wrap
const WRAP_KEY_SALT: &[u8] = b"LanternMesh-wrap-v1";
const WRAP_KEY_INFO: &[u8] = b"session-key-wrap";

/// Administrator key pair for decrypting mesh messages addressed to `"admin"`
///
/// SECURITY NOTES:
/// - Debug is manually implemented to redact the private key in logs/debug output
/// - The secret half must only ever be persisted on admin nodes
#[derive(Clone)]
pub struct AdminKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl fmt::Debug for AdminKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminKeyPair")
            .field("secret", &"[REDACTED]")
            .field("public", &self.public_base64())
            .finish()
    }
}

impl AdminKeyPair {
    /// Generate a fresh X25519 key pair from the OS RNG
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Rebuild a key pair from its base64-encoded secret half
    pub fn from_secret_base64(secret_b64: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(secret_b64)
            .map_err(|_| CryptoError::InvalidBase64)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Ok(Self { secret, public })
    }

    /// The secret half, base64-encoded for persistence
    pub fn secret_base64(&self) -> String {
        BASE64.encode(self.secret.to_bytes())
    }

    /// The public half, base64-encoded for distribution to senders
    pub fn public_base64(&self) -> String {
        BASE64.encode(self.public.as_bytes())
    }

    /// The public half
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}

/// Parse a base64-encoded X25519 public key, enforcing the exact key size
pub fn parse_public_key(public_b64: &str) -> Result<PublicKey, CryptoError> {
    let bytes = BASE64
        .decode(public_b64)
        .map_err(|_| CryptoError::InvalidBase64)?;
    public_key_from_slice(&bytes)
}

/// Build an X25519 public key from raw bytes, enforcing the exact key size
pub fn public_key_from_slice(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    let bytes: [u8; PUBLIC_KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    Ok(PublicKey::from(bytes))
}

/// Derive the 256-bit wrap key from an X25519 shared secret
///
/// Both the sender (ephemeral secret x admin public) and the admin
/// (admin secret x ephemeral public) arrive at the same wrap key.
pub(crate) fn derive_wrap_key(shared_secret: &[u8]) -> Result<[u8; 32], CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(WRAP_KEY_SALT), shared_secret);
    let mut wrap_key = [0u8; 32];
    hk.expand(WRAP_KEY_INFO, &mut wrap_key)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(wrap_key)
}

/// Securely zeroize key material
pub fn zeroize_key(mut key: Vec<u8>) {
    key.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_keypair() {
        let kp = AdminKeyPair::generate();
        assert_eq!(kp.public_key().as_bytes().len(), PUBLIC_KEY_SIZE);
    }

    #[test]
    fn test_secret_base64_roundtrip() {
        let kp = AdminKeyPair::generate();
        let restored = AdminKeyPair::from_secret_base64(&kp.secret_base64()).unwrap();
        assert_eq!(restored.public_base64(), kp.public_base64());
    }

    #[test]
    fn test_parse_public_key_rejects_wrong_size() {
        let short = BASE64.encode([0u8; 16]);
        assert_eq!(
            parse_public_key(&short),
            Err(CryptoError::InvalidPublicKey)
        );
    }

    #[test]
    fn test_parse_public_key_rejects_bad_base64() {
        assert_eq!(
            parse_public_key("not base64!!!"),
            Err(CryptoError::InvalidBase64)
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let kp = AdminKeyPair::generate();
        let rendered = format!("{:?}", kp);
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains(&kp.secret_base64()));
    }

    #[test]
    fn test_shared_wrap_key_agreement() {
        use x25519_dalek::EphemeralSecret;

        let admin = AdminKeyPair::generate();
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_pub = PublicKey::from(&ephemeral);

        let sender_shared = ephemeral.diffie_hellman(&admin.public_key());
        let admin_shared = admin.secret().diffie_hellman(&ephemeral_pub);

        let sender_key = derive_wrap_key(sender_shared.as_bytes()).unwrap();
        let admin_key = derive_wrap_key(admin_shared.as_bytes()).unwrap();
        assert_eq!(sender_key, admin_key);
    }
}
