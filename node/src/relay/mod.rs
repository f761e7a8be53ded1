//! Node relay: the per-node state machine
//!
//! Receives frames from its hub session(s), deduplicates, persists,
//! delivers to local observers and forwards while hop budget remains.
//! Handlers run synchronously after the log write, so their invocation is
//! totally ordered with respect to persistence; they must not block.

pub mod session;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::broadcast;

use lantern_crypto::CryptoError;

use crate::dedupe::{SeenCache, SeenKind, DEDUPE_CAP};
use crate::envelope::{EnvelopeError, EnvelopeMeta, KeyEnvelope, MessageEnvelope};
use crate::identity::NodeIdentity;
use crate::store::{MeshStore, StoreError};
use crate::wire::{is_key_envelope, HubFrame, PeerFrame};

use session::{HubSession, SessionState};

/// Relay operation errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Not connected to hub: {0}")]
    NotConnected(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Relay is closed")]
    Closed,

    #[error("Frame encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Peer membership changes observed through the hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Discovered(String),
    Lost(String),
}

type MessageHandler = Arc<dyn Fn(&MessageEnvelope) + Send + Sync>;
type KeyHandler = Arc<dyn Fn(&KeyEnvelope) + Send + Sync>;

/// A single mesh participant
pub struct NodeRelay {
    identity: NodeIdentity,
    store: Arc<MeshStore>,
    dedupe: Mutex<SeenCache>,
    message_handlers: RwLock<Vec<MessageHandler>>,
    key_handlers: RwLock<Vec<KeyHandler>>,
    peers: RwLock<HashSet<String>>,
    peer_tx: broadcast::Sender<PeerEvent>,
    sessions: RwLock<Vec<Arc<HubSession>>>,
    closed: AtomicBool,
}

impl NodeRelay {
    /// Build a relay over an opened store, rebuilding the seen-set from
    /// the log's recent dedupe trail
    pub fn new(identity: NodeIdentity, store: Arc<MeshStore>) -> Result<Arc<Self>, StoreError> {
        let dedupe: SeenCache = store.recent_seen(DEDUPE_CAP)?.into_iter().collect();
        let (peer_tx, _) = broadcast::channel(64);
        Ok(Arc::new(Self {
            identity,
            store,
            dedupe: Mutex::new(dedupe),
            message_handlers: RwLock::new(Vec::new()),
            key_handlers: RwLock::new(Vec::new()),
            peers: RwLock::new(HashSet::new()),
            peer_tx,
            sessions: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn node_id(&self) -> &str {
        self.identity.node_id()
    }

    pub fn pseudo_id(&self) -> &str {
        self.identity.pseudo_id()
    }

    pub fn store(&self) -> &Arc<MeshStore> {
        &self.store
    }

    /// Open a session to a hub; may be called once per hub to bridge
    /// otherwise disconnected meshes
    ///
    /// The first connection attempt happens here, so an unreachable hub
    /// surfaces as `ConnectionFailed` to the caller. Once established,
    /// the session's supervisor task handles later losses with the fixed
    /// reconnect schedule.
    pub async fn connect(self: &Arc<Self>, url: &str) -> Result<(), RelayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::Closed);
        }
        let session = HubSession::new(url, self.node_id());
        let stream = session.establish().await?;
        self.sessions.write().push(session.clone());
        let relay = Arc::downgrade(self);
        tokio::spawn(session.run(stream, relay));
        Ok(())
    }

    /// True iff at least one hub session is registered
    pub async fn connected(&self) -> bool {
        let sessions: Vec<_> = self.sessions.read().clone();
        for session in sessions {
            if session.state().await == SessionState::Registered {
                return true;
            }
        }
        false
    }

    /// Register a message observer; runs inline after each log write
    pub fn on_message(&self, handler: impl Fn(&MessageEnvelope) + Send + Sync + 'static) {
        self.message_handlers.write().push(Arc::new(handler));
    }

    /// Register a key observer
    pub fn on_key(&self, handler: impl Fn(&KeyEnvelope) + Send + Sync + 'static) {
        self.key_handlers.write().push(Arc::new(handler));
    }

    /// Subscribe to peer membership changes
    pub fn on_peer_event(&self) -> broadcast::Receiver<PeerEvent> {
        self.peer_tx.subscribe()
    }

    /// Snapshot of the currently known peer ids
    pub fn peers(&self) -> HashSet<String> {
        self.peers.read().clone()
    }

    /// Originate a message envelope: persist, deliver locally, emit
    ///
    /// The origin marks its own id seen and fires handlers exactly once
    /// here; the copy coming back through the mesh is dropped by dedupe
    /// and no hop is appended for the origin's own emission.
    pub async fn broadcast(&self, env: MessageEnvelope) -> Result<(), RelayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::Closed);
        }
        env.validate()?;
        self.store.save_message(&env)?;
        self.mark_seen(&env.msg_id, SeenKind::Message);
        self.fire_message_handlers(&env);
        self.emit(&PeerFrame::message(&env)?).await
    }

    /// Originate a key envelope: persist, deliver locally, emit once
    pub async fn broadcast_key(&self, key: KeyEnvelope) -> Result<(), RelayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::Closed);
        }
        key.validate()?;
        self.store.save_key(&key)?;
        self.mark_seen(&key.msg_id, SeenKind::Key);
        self.fire_key_handlers(&key);
        self.emit(&PeerFrame::key(&key)?).await
    }

    /// Seal a plaintext to the admin public key and emit both halves,
    /// message first
    ///
    /// Fails immediately when no admin public key is known; an encrypted
    /// send has nowhere to go without one.
    pub async fn send_encrypted(
        &self,
        content: &str,
        meta: Option<EnvelopeMeta>,
        admin_public_b64: Option<&str>,
    ) -> Result<MessageEnvelope, RelayError> {
        let admin_public_b64 = admin_public_b64.ok_or(CryptoError::AdminKeyMissing)?;
        let admin_public = lantern_crypto::parse_public_key(admin_public_b64)?;
        let sealed = lantern_crypto::seal_message(content.as_bytes(), &admin_public)?;

        let env = MessageEnvelope::e2e(sealed.payload, meta, self.node_id(), self.pseudo_id());
        let key = KeyEnvelope::new(&env.msg_id, sealed.wrapped_key, self.pseudo_id());

        self.broadcast(env.clone()).await?;
        self.broadcast_key(key).await?;
        Ok(env)
    }

    /// Stop accepting sends and close every hub session cleanly
    ///
    /// Already-logged envelopes are unaffected.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let sessions: Vec<_> = self.sessions.read().clone();
        for session in sessions {
            session.close().await;
        }
        self.message_handlers.write().clear();
        self.key_handlers.write().clear();
    }

    // ---- inbound path ----------------------------------------------------

    /// Process one inbound hub frame
    ///
    /// The hub session reader drives this; an alternative transport can
    /// inject frames through it as well.
    pub async fn handle_hub_frame(&self, frame: HubFrame) {
        match frame {
            HubFrame::PeerList { peers } => {
                let fresh: HashSet<String> = peers.into_iter().collect();
                let added: Vec<String> = {
                    let mut known = self.peers.write();
                    let added = fresh.difference(&known).cloned().collect();
                    *known = fresh;
                    added
                };
                for peer in added {
                    let _ = self.peer_tx.send(PeerEvent::Discovered(peer));
                }
            }
            HubFrame::PeerConnected { peer_id } => {
                if self.peers.write().insert(peer_id.clone()) {
                    let _ = self.peer_tx.send(PeerEvent::Discovered(peer_id));
                }
            }
            HubFrame::PeerDisconnected { peer_id } => {
                if self.peers.write().remove(&peer_id) {
                    let _ = self.peer_tx.send(PeerEvent::Lost(peer_id));
                }
            }
            HubFrame::MeshMessage {
                envelope,
                envelope_type,
                ..
            } => {
                if is_key_envelope(&envelope_type) {
                    match serde_json::from_value::<KeyEnvelope>(envelope) {
                        Ok(key) => self.handle_key_env(key),
                        Err(err) => log::warn!("Dropping malformed key envelope: {err}"),
                    }
                } else {
                    match serde_json::from_value::<MessageEnvelope>(envelope) {
                        Ok(env) => self.handle_message_env(env).await,
                        Err(err) => log::warn!("Dropping malformed message envelope: {err}"),
                    }
                }
            }
        }
    }

    async fn handle_message_env(&self, env: MessageEnvelope) {
        if self.dedupe.lock().seen(&env.msg_id, SeenKind::Message) {
            log::debug!("Dropping duplicate message {}", env.msg_id);
            return;
        }
        self.mark_seen(&env.msg_id, SeenKind::Message);

        // persistence failure is fatal for this envelope: no delivery,
        // no forwarding
        if let Err(err) = self.store.save_message(&env) {
            log::error!("Failed to persist message {}: {err}", env.msg_id);
            return;
        }

        self.fire_message_handlers(&env);

        // forward only while hop budget remains after the decrement
        match env.add_hop(self.node_id()) {
            Ok(forwarded) if forwarded.ttl > 0 => match PeerFrame::message(&forwarded) {
                Ok(frame) => {
                    if let Err(err) = self.emit(&frame).await {
                        log::debug!("Forward of {} failed: {err}", env.msg_id);
                    }
                }
                Err(err) => log::warn!("Failed to encode forward frame: {err}"),
            },
            _ => {}
        }
    }

    fn handle_key_env(&self, key: KeyEnvelope) {
        if self.dedupe.lock().seen(&key.msg_id, SeenKind::Key) {
            log::debug!("Dropping duplicate key {}", key.msg_id);
            return;
        }
        self.mark_seen(&key.msg_id, SeenKind::Key);

        if let Err(err) = self.store.save_key(&key) {
            log::error!("Failed to persist key {}: {err}", key.msg_id);
            return;
        }

        self.fire_key_handlers(&key);
        // key envelopes are never relayed onward; the origin's hub fans
        // them out once
    }

    pub(crate) fn on_session_lost(&self, url: &str) {
        log::warn!("Hub session {url} lost; clearing peer set");
        let lost: Vec<String> = self.peers.write().drain().collect();
        for peer in lost {
            let _ = self.peer_tx.send(PeerEvent::Lost(peer));
        }
    }

    // ---- internals -------------------------------------------------------

    fn mark_seen(&self, msg_id: &str, kind: SeenKind) {
        self.dedupe.lock().mark(msg_id, kind);
        // the persisted trail only rebuilds the cache after restart;
        // its failure must not block delivery
        if let Err(err) = self.store.mark_seen(msg_id, kind) {
            log::warn!("Failed to persist dedupe entry for {msg_id}: {err}");
        }
    }

    fn fire_message_handlers(&self, env: &MessageEnvelope) {
        let handlers: Vec<MessageHandler> = self.message_handlers.read().clone();
        for handler in handlers {
            handler(env);
        }
    }

    fn fire_key_handlers(&self, key: &KeyEnvelope) {
        let handlers: Vec<KeyHandler> = self.key_handlers.read().clone();
        for handler in handlers {
            handler(key);
        }
    }

    /// Write a frame to every live session; succeeds if any accepted it
    async fn emit(&self, frame: &PeerFrame) -> Result<(), RelayError> {
        let sessions: Vec<_> = self.sessions.read().clone();
        if sessions.is_empty() {
            return Err(RelayError::NotConnected("no hub session".into()));
        }
        let mut last_err = None;
        let mut accepted = false;
        for session in sessions {
            match session.emit(frame).await {
                Ok(()) => accepted = true,
                Err(err) => last_err = Some(err),
            }
        }
        if accepted {
            Ok(())
        } else {
            Err(last_err.unwrap_or(RelayError::NotConnected("no hub session".into())))
        }
    }
}
