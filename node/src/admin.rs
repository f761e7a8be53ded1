//! Admin join: combining the message and key paths into plaintext
//!
//! An admin node watches both envelope streams. Whenever the ciphertext
//! and its wrapped session key have both arrived for the same identifier,
//! the pair is joined: unwrap the session key with the admin secret, open
//! the payload, persist and emit a DecryptedMessage. Arrival order does
//! not matter and there is no timeout; a lone half waits indefinitely.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::broadcast;

use lantern_crypto::AdminKeyPair;

use crate::envelope::{
    DecryptedMessage, EnvelopeKind, HopRecord, KeyEnvelope, MessageEnvelope, TO_ADMIN,
};
use crate::identity;
use crate::relay::NodeRelay;
use crate::store::{MeshStore, StoreError};

/// Join-side errors
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("This node holds no administrator key")]
    NotAnAdmin,

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Default)]
struct PendingPair {
    message: Option<MessageEnvelope>,
    key: Option<KeyEnvelope>,
}

/// Join state for one admin node
pub struct AdminJoin {
    keys: AdminKeyPair,
    store: Arc<MeshStore>,
    pending: Mutex<HashMap<String, PendingPair>>,
    emitted: Mutex<HashSet<String>>,
    decrypted_tx: broadcast::Sender<DecryptedMessage>,
}

impl AdminJoin {
    /// Load the admin key from the store; fails on non-admin nodes
    pub fn open(store: Arc<MeshStore>) -> Result<Arc<Self>, AdminError> {
        let keys = identity::load_admin_keys(&store)?.ok_or(AdminError::NotAnAdmin)?;
        Ok(Self::with_keys(store, keys))
    }

    /// Build a join around an already-loaded key pair
    pub fn with_keys(store: Arc<MeshStore>, keys: AdminKeyPair) -> Arc<Self> {
        let (decrypted_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            keys,
            store,
            pending: Mutex::new(HashMap::new()),
            emitted: Mutex::new(HashSet::new()),
            decrypted_tx,
        })
    }

    /// Subscribe to join results
    pub fn subscribe(&self) -> broadcast::Receiver<DecryptedMessage> {
        self.decrypted_tx.subscribe()
    }

    /// Register this join on a relay's message and key streams
    pub fn attach(self: &Arc<Self>, relay: &NodeRelay) {
        let join = self.clone();
        relay.on_message(move |env| join.offer_message(env));
        let join = self.clone();
        relay.on_key(move |key| join.offer_key(key));
    }

    /// Offer a message envelope to the join
    pub fn offer_message(&self, env: &MessageEnvelope) {
        if env.kind != EnvelopeKind::E2e {
            return;
        }
        self.pending
            .lock()
            .entry(env.msg_id.clone())
            .or_default()
            .message = Some(env.clone());
        self.try_join(&env.msg_id);
    }

    /// Offer a key envelope to the join
    pub fn offer_key(&self, key: &KeyEnvelope) {
        if key.to != TO_ADMIN {
            return;
        }
        self.pending
            .lock()
            .entry(key.msg_id.clone())
            .or_default()
            .key = Some(key.clone());
        self.try_join(&key.msg_id);
    }

    /// Re-offer everything in the log, e.g. after a restart
    ///
    /// Replay is idempotent: identifiers already joined are skipped, so a
    /// fresh admin node replaying the same log converges on the same set
    /// of decrypted messages.
    pub fn replay_log(&self) -> Result<(), StoreError> {
        for env in self.store.messages()? {
            self.offer_message(&env);
        }
        for key in self.store.keys()? {
            self.offer_key(&key);
        }
        Ok(())
    }

    fn try_join(&self, msg_id: &str) {
        // snapshot both halves; crypto runs outside the pending lock
        let (message, key) = {
            let pending = self.pending.lock();
            match pending.get(msg_id) {
                Some(pair) => (pair.message.clone(), pair.key.clone()),
                None => return,
            }
        };
        let (Some(message), Some(key)) = (message, key) else {
            return;
        };
        if message.kind != EnvelopeKind::E2e || key.to != TO_ADMIN {
            return;
        }

        // emit at most once per id, across restarts
        if self.emitted.lock().contains(msg_id) {
            self.pending.lock().remove(msg_id);
            return;
        }
        if self.store.has_decrypted(msg_id).unwrap_or(false) {
            self.emitted.lock().insert(msg_id.to_string());
            self.pending.lock().remove(msg_id);
            return;
        }

        match lantern_crypto::open_message(&message.payload, &key.wrapped_key, &self.keys) {
            Ok(plaintext) => {
                let record = DecryptedMessage {
                    msg_id: msg_id.to_string(),
                    content: String::from_utf8_lossy(&plaintext).into_owned(),
                    timestamp: message.timestamp,
                    from: message.from.clone(),
                    meta: message.meta.clone(),
                    message_path: message.hops.clone(),
                    key_path: vec![HopRecord::new(&key.from)],
                };
                if let Err(err) = self.store.save_decrypted(&record) {
                    // never partial-write: without the persisted record the
                    // pair stays pending and a later replay retries
                    log::error!("Failed to persist decrypted {msg_id}: {err}");
                    return;
                }
                self.emitted.lock().insert(msg_id.to_string());
                self.pending.lock().remove(msg_id);
                let _ = self.decrypted_tx.send(record);
                log::info!("Joined encrypted message {msg_id}");
            }
            Err(err) => {
                // kept pending: a later key envelope or log replay may
                // still resolve this pair; operators see it, users do not
                log::warn!("Decrypt failed for {msg_id}: {err}");
            }
        }
    }
}
