//! Lantern mesh core
//!
//! An offline-first messaging fabric: nodes originate public broadcasts
//! and admin-addressed encrypted messages, hubs fan frames out between
//! registered peers, and every node deduplicates, persists and forwards
//! within a hop budget. Admin nodes additionally join the message and key
//! paths back into plaintext.

pub mod admin;
pub mod config;
pub mod dedupe;
pub mod envelope;
pub mod gateway;
pub mod hub;
pub mod identity;
pub mod relay;
pub mod store;
pub mod wire;

pub use admin::{AdminError, AdminJoin};
pub use config::HubConfig;
pub use envelope::{
    DecryptedMessage, EnvelopeError, EnvelopeKind, EnvelopeMeta, HopRecord, KeyEnvelope,
    MessageEnvelope, DEFAULT_TTL,
};
pub use gateway::GatewayError;
pub use hub::HubState;
pub use identity::NodeIdentity;
pub use relay::{NodeRelay, PeerEvent, RelayError};
pub use store::{MeshStore, StoreError};
