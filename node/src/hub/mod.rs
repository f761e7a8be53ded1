//! Hub relay: transparent fan-out between registered peers
//!
//! The hub holds one WebSocket session per registered peer and forwards
//! every `mesh_message` frame to all other sessions without parsing the
//! envelope value, so nodes can evolve the envelope schema without a hub
//! upgrade. It keeps no long-term state.
//!
//! One task runs per session; they share only the sessions map behind a
//! short critical section. A session whose outbound buffer saturates is
//! evicted rather than stalling the fan-out for everyone else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, State,
    },
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::config::HubConfig;
use crate::gateway;
use crate::wire::{HubFrame, PeerFrame};

struct PeerSession {
    session_id: u64,
    tx: mpsc::Sender<Message>,
    shutdown: Arc<Notify>,
}

/// Shared hub state: the peer sessions map and configuration
pub struct HubState {
    config: HubConfig,
    sessions: Mutex<HashMap<String, PeerSession>>,
    next_session_id: AtomicU64,
}

impl HubState {
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
        })
    }

    /// The hub's HTTP surface: peer sessions and gateway ingress
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route("/mesh", get(mesh_handler))
            .route("/gateway", get(gateway::page))
            .route("/gateway/submit", post(gateway::submit))
            .layer(DefaultBodyLimit::max(self.config.max_frame_bytes))
            .with_state(self.clone())
    }

    /// Serve on an already-bound listener until the process exits
    pub async fn serve(self: Arc<Self>, listener: tokio::net::TcpListener) -> std::io::Result<()> {
        log::info!("Hub listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await
    }

    /// Registered peer ids, for diagnostics
    pub fn peer_ids(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Fan a frame out to every registered session except the source
    ///
    /// Sessions that cannot keep up are closed: fan-out progress is worth
    /// more than one slow peer's connection.
    pub(crate) fn fan_out(&self, frame: &HubFrame, exclude_session: Option<u64>) {
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(err) => {
                log::error!("Failed to encode hub frame: {err}");
                return;
            }
        };

        let mut evicted: Vec<String> = Vec::new();
        {
            let sessions = self.sessions.lock();
            for (peer_id, session) in sessions.iter() {
                if Some(session.session_id) == exclude_session {
                    continue;
                }
                match session.tx.try_send(Message::Text(text.clone())) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        log::warn!("Evicting slow peer {peer_id}");
                        evicted.push(peer_id.clone());
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        evicted.push(peer_id.clone());
                    }
                }
            }
        }
        for peer_id in evicted {
            self.drop_peer(&peer_id);
        }
    }

    /// Bind a session to a peer id; an existing binding for the same id
    /// is closed first (last-write-wins)
    fn bind(&self, peer_id: &str, session_id: u64, tx: mpsc::Sender<Message>, shutdown: Arc<Notify>) {
        let old = {
            let mut sessions = self.sessions.lock();
            sessions.insert(
                peer_id.to_string(),
                PeerSession {
                    session_id,
                    tx: tx.clone(),
                    shutdown,
                },
            )
        };
        if let Some(old) = old {
            log::info!("Peer {peer_id} re-registered; closing previous session");
            old.shutdown.notify_one();
        }
        log::info!("Peer {peer_id} registered");

        self.fan_out(
            &HubFrame::PeerConnected {
                peer_id: peer_id.to_string(),
            },
            Some(session_id),
        );

        let peers: Vec<String> = {
            let sessions = self.sessions.lock();
            sessions
                .keys()
                .filter(|id| id.as_str() != peer_id)
                .cloned()
                .collect()
        };
        if let Ok(text) = serde_json::to_string(&HubFrame::PeerList { peers }) {
            let _ = tx.try_send(Message::Text(text));
        }
    }

    /// Remove a binding if it still belongs to the given session
    fn unbind(&self, peer_id: &str, session_id: u64) {
        let removed = {
            let mut sessions = self.sessions.lock();
            match sessions.get(peer_id) {
                Some(session) if session.session_id == session_id => {
                    sessions.remove(peer_id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            log::info!("Peer {peer_id} disconnected");
            self.fan_out(
                &HubFrame::PeerDisconnected {
                    peer_id: peer_id.to_string(),
                },
                None,
            );
        }
    }

    fn drop_peer(&self, peer_id: &str) {
        let removed = self.sessions.lock().remove(peer_id);
        if let Some(session) = removed {
            session.shutdown.notify_one();
            self.fan_out(
                &HubFrame::PeerDisconnected {
                    peer_id: peer_id.to_string(),
                },
                None,
            );
        }
    }
}

async fn mesh_handler(ws: WebSocketUpgrade, State(hub): State<Arc<HubState>>) -> impl IntoResponse {
    ws.max_message_size(hub.config.max_frame_bytes)
        .max_frame_size(hub.config.max_frame_bytes)
        .on_upgrade(move |socket| handle_socket(socket, hub))
}

/// One task per peer session: read frames until close, eviction or error
async fn handle_socket(socket: WebSocket, hub: Arc<HubState>) {
    let session_id = hub.next_session_id.fetch_add(1, Ordering::Relaxed);
    let shutdown = Arc::new(Notify::new());
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(hub.config.session_buffer);

    // writer: drains the outbound buffer into the socket
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut bound_peer: Option<String> = None;
    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(err)) => {
                        // includes frames over the size cap
                        log::warn!("Session {session_id} transport error: {err}");
                        break;
                    }
                    None => break,
                };
                match msg {
                    Message::Text(text) => {
                        handle_frame(&hub, session_id, &tx, &shutdown, &mut bound_peer, &text)
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    if let Some(peer_id) = bound_peer {
        hub.unbind(&peer_id, session_id);
    }
    drop(tx);
    let _ = writer.await;
}

fn handle_frame(
    hub: &Arc<HubState>,
    session_id: u64,
    tx: &mpsc::Sender<Message>,
    shutdown: &Arc<Notify>,
    bound_peer: &mut Option<String>,
    text: &str,
) {
    let frame: PeerFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            log::warn!("Dropping malformed frame from session {session_id}: {err}");
            return;
        }
    };

    match frame {
        PeerFrame::Register { peer_id } => {
            if let Some(bound) = bound_peer.as_ref() {
                log::warn!("Session {session_id} ({bound}) sent a second register; rejected");
                return;
            }
            hub.bind(&peer_id, session_id, tx.clone(), shutdown.clone());
            *bound_peer = Some(peer_id);
        }
        PeerFrame::MeshMessage {
            envelope,
            envelope_type,
        } => {
            let Some(peer_id) = bound_peer.as_ref() else {
                log::warn!("Session {session_id} sent mesh_message before register; dropped");
                return;
            };
            hub.fan_out(
                &HubFrame::MeshMessage {
                    envelope,
                    from_peer: peer_id.clone(),
                    envelope_type,
                },
                Some(session_id),
            );
        }
    }
}
