//! Hub WebSocket session
//!
//! One session per hub. The session owns the socket: `establish` connects
//! and registers (surfacing the failure to the caller), then a supervisor
//! task pumps inbound frames into the relay and retries lost connections
//! on a fixed delay until the attempt budget runs out.
//!
//! State machine: Disconnected -> Connecting -> Registered -> Lost, with
//! Lost feeding back into Connecting until the attempt cap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::relay::{NodeRelay, RelayError};
use crate::wire::{HubFrame, PeerFrame};

/// Fixed delay between reconnect attempts
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Reconnect attempts before the session gives up
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Hub connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Registered,
    Lost,
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A single peer-side hub connection
pub struct HubSession {
    url: String,
    peer_id: String,
    state: RwLock<SessionState>,
    sink: RwLock<Option<WsSink>>,
    closed: AtomicBool,
}

impl HubSession {
    pub(crate) fn new(url: impl Into<String>, peer_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            url: url.into(),
            peer_id: peer_id.into(),
            state: RwLock::new(SessionState::Disconnected),
            sink: RwLock::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Connect to the hub and register this peer
    ///
    /// Returns the inbound half of the socket for the read loop; the
    /// caller sees exactly why a connection attempt did not reach
    /// `Registered`.
    pub(crate) async fn establish(&self) -> Result<WsStream, RelayError> {
        *self.state.write().await = SessionState::Connecting;

        let ws = match connect_async(&self.url).await {
            Ok((ws, _)) => ws,
            Err(err) => {
                *self.state.write().await = SessionState::Lost;
                return Err(RelayError::ConnectionFailed(err.to_string()));
            }
        };

        let (sink, stream) = ws.split();
        *self.sink.write().await = Some(sink);

        let frame = PeerFrame::Register {
            peer_id: self.peer_id.clone(),
        };
        match self.send_raw(&frame).await {
            Ok(()) => {
                *self.state.write().await = SessionState::Registered;
                log::info!("Registered with hub {}", self.url);
                Ok(stream)
            }
            Err(err) => {
                *self.sink.write().await = None;
                *self.state.write().await = SessionState::Lost;
                Err(err)
            }
        }
    }

    /// Write a frame; the caller's envelope must already be persisted
    pub(crate) async fn emit(&self, frame: &PeerFrame) -> Result<(), RelayError> {
        if *self.state.read().await != SessionState::Registered {
            return Err(RelayError::NotConnected(self.url.clone()));
        }
        self.send_raw(frame).await
    }

    async fn send_raw(&self, frame: &PeerFrame) -> Result<(), RelayError> {
        let text = serde_json::to_string(frame)?;
        let mut sink = self.sink.write().await;
        match sink.as_mut() {
            Some(sink) => sink
                .send(Message::Text(text))
                .await
                .map_err(|e| RelayError::SendFailed(e.to_string())),
            None => Err(RelayError::NotConnected(self.url.clone())),
        }
    }

    /// Stop reconnecting and close the socket with a clean code
    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut sink = self.sink.write().await;
        if let Some(mut sink) = sink.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        *self.state.write().await = SessionState::Disconnected;
    }

    /// Supervisor loop over an established session: pump frames, then
    /// reconnect on loss with the fixed delay and attempt cap
    pub(crate) async fn run(self: Arc<Self>, stream: WsStream, relay: Weak<NodeRelay>) {
        let mut stream = stream;
        loop {
            self.read_loop(stream, &relay).await;

            *self.sink.write().await = None;
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            *self.state.write().await = SessionState::Lost;
            match relay.upgrade() {
                Some(relay) => relay.on_session_lost(&self.url),
                None => break,
            }

            let mut attempts: u32 = 0;
            stream = loop {
                attempts += 1;
                tokio::time::sleep(RECONNECT_DELAY).await;
                if self.closed.load(Ordering::SeqCst) {
                    return;
                }
                match self.establish().await {
                    Ok(stream) => break stream,
                    Err(err) => {
                        log::warn!("Reconnect to {} failed: {err}", self.url);
                        if attempts >= MAX_RECONNECT_ATTEMPTS {
                            log::error!(
                                "Giving up on hub {} after {attempts} attempts",
                                self.url
                            );
                            *self.state.write().await = SessionState::Disconnected;
                            return;
                        }
                    }
                }
            };
        }
    }

    async fn read_loop(&self, mut stream: WsStream, relay: &Weak<NodeRelay>) {
        while let Some(msg) = stream.next().await {
            if self.closed.load(Ordering::SeqCst) {
                break;
            }
            match msg {
                Ok(Message::Text(text)) => {
                    let Some(relay) = relay.upgrade() else {
                        break;
                    };
                    match serde_json::from_str::<HubFrame>(&text) {
                        Ok(frame) => relay.handle_hub_frame(frame).await,
                        Err(err) => log::warn!("Dropping malformed hub frame: {err}"),
                    }
                }
                Ok(Message::Close(_)) => {
                    log::info!("Hub {} closed the session", self.url);
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    log::warn!("Hub session {} error: {err}", self.url);
                    break;
                }
            }
        }
    }
}
