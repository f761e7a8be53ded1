//! Node identity: persistent nodeId, display handle, admin key bootstrap

use lantern_crypto::AdminKeyPair;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::store::{MeshStore, StoreError, KEY_ADMIN_PRIVATE, KEY_ADMIN_PUBLIC, KEY_NODE_ID};

/// A node's stable identity: 128 random bits of hex plus the derived handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    node_id: String,
    pseudo_id: String,
}

impl NodeIdentity {
    /// Generate a fresh identity from the OS RNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self::from_node_id(hex::encode(bytes))
    }

    /// Wrap an existing nodeId (as loaded from the store)
    pub fn from_node_id(node_id: impl Into<String>) -> Self {
        let node_id = node_id.into();
        let pseudo_id = pseudo_id_for(&node_id);
        Self { node_id, pseudo_id }
    }

    /// Load the persisted identity or create and persist a new one
    pub fn load_or_create(store: &MeshStore) -> Result<Self, StoreError> {
        if let Some(node_id) = store.get_identity(KEY_NODE_ID)? {
            return Ok(Self::from_node_id(node_id));
        }
        let identity = Self::generate();
        store.set_identity(KEY_NODE_ID, &identity.node_id)?;
        log::info!("Generated node identity {}", identity.pseudo_id);
        Ok(identity)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn pseudo_id(&self) -> &str {
        &self.pseudo_id
    }
}

/// Derive the short display handle from a nodeId
pub fn pseudo_id_for(node_id: &str) -> String {
    let prefix: String = node_id.chars().take(8).collect();
    format!("user_{prefix}")
}

/// Load the persisted admin key pair, if this node has one
pub fn load_admin_keys(store: &MeshStore) -> Result<Option<AdminKeyPair>, StoreError> {
    match store.get_identity(KEY_ADMIN_PRIVATE)? {
        Some(secret_b64) => match AdminKeyPair::from_secret_base64(&secret_b64) {
            Ok(keys) => Ok(Some(keys)),
            Err(err) => {
                log::error!("Persisted admin key is unusable: {err}");
                Ok(None)
            }
        },
        None => Ok(None),
    }
}

/// Load the admin key pair, generating and persisting one when absent
pub fn load_or_create_admin_keys(store: &MeshStore) -> Result<AdminKeyPair, StoreError> {
    if let Some(keys) = load_admin_keys(store)? {
        return Ok(keys);
    }
    let keys = AdminKeyPair::generate();
    store.set_identity(KEY_ADMIN_PRIVATE, &keys.secret_base64())?;
    store.set_identity(KEY_ADMIN_PUBLIC, &keys.public_base64())?;
    log::info!(
        "Generated admin key pair; public half {}",
        keys.public_base64()
    );
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identity_shape() {
        let identity = NodeIdentity::generate();
        assert_eq!(identity.node_id().len(), 32);
        assert!(identity.node_id().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            identity.pseudo_id(),
            format!("user_{}", &identity.node_id()[..8])
        );
    }

    #[test]
    fn test_identities_are_unique() {
        assert_ne!(
            NodeIdentity::generate().node_id(),
            NodeIdentity::generate().node_id()
        );
    }

    #[test]
    fn test_load_or_create_is_stable() {
        let store = MeshStore::open_in_memory().unwrap();
        let first = NodeIdentity::load_or_create(&store).unwrap();
        let second = NodeIdentity::load_or_create(&store).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_admin_bootstrap_is_stable() {
        let store = MeshStore::open_in_memory().unwrap();
        assert!(load_admin_keys(&store).unwrap().is_none());

        let first = load_or_create_admin_keys(&store).unwrap();
        let second = load_or_create_admin_keys(&store).unwrap();
        assert_eq!(first.public_base64(), second.public_base64());
        assert_eq!(
            store.get_identity(KEY_ADMIN_PUBLIC).unwrap().unwrap(),
            first.public_base64()
        );
    }
}
