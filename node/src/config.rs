//! Runtime configuration for hub and node processes

use std::net::SocketAddr;

/// Default hub listen port
pub const DEFAULT_HUB_PORT: u16 = 3000;

/// Payload size cap per hub frame (10 MiB)
pub const MAX_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Outbound frames buffered per session before the peer is evicted
pub const SESSION_BUFFER: usize = 64;

/// Hub process configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Listen address for peer sessions and the gateway
    pub bind: SocketAddr,
    /// Per-frame size cap; violations close the session
    pub max_frame_bytes: usize,
    /// Per-session outbound buffer depth
    pub session_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_HUB_PORT)),
            max_frame_bytes: MAX_FRAME_BYTES,
            session_buffer: SESSION_BUFFER,
        }
    }
}
