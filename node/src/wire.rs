//! Hub wire protocol frames
//!
//! Every frame is a JSON object with a `type` tag. The `envelope` value is
//! deliberately untyped here: the hub forwards it verbatim without parsing,
//! so a newer node can extend the envelope without a hub upgrade. Nodes
//! parse it into the typed model at the edge.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{KeyEnvelope, MessageEnvelope};

/// `envelopeType` marker distinguishing a KeyEnvelope on the wire
pub const ENVELOPE_TYPE_KEY: &str = "key";

/// Frames a peer sends to its hub
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerFrame {
    #[serde(rename_all = "camelCase")]
    Register { peer_id: String },
    #[serde(rename_all = "camelCase")]
    MeshMessage {
        envelope: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        envelope_type: Option<String>,
    },
}

impl PeerFrame {
    /// Frame a message envelope for emission
    pub fn message(envelope: &MessageEnvelope) -> Result<Self, serde_json::Error> {
        Ok(Self::MeshMessage {
            envelope: serde_json::to_value(envelope)?,
            envelope_type: None,
        })
    }

    /// Frame a key envelope for emission
    pub fn key(envelope: &KeyEnvelope) -> Result<Self, serde_json::Error> {
        Ok(Self::MeshMessage {
            envelope: serde_json::to_value(envelope)?,
            envelope_type: Some(ENVELOPE_TYPE_KEY.to_string()),
        })
    }
}

/// Frames a hub sends to its peers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubFrame {
    #[serde(rename_all = "camelCase")]
    PeerList { peers: Vec<String> },
    #[serde(rename_all = "camelCase")]
    PeerConnected { peer_id: String },
    #[serde(rename_all = "camelCase")]
    PeerDisconnected { peer_id: String },
    #[serde(rename_all = "camelCase")]
    MeshMessage {
        envelope: Value,
        from_peer: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        envelope_type: Option<String>,
    },
}

/// True iff a `mesh_message` frame's marker denotes a KeyEnvelope
pub fn is_key_envelope(envelope_type: &Option<String>) -> bool {
    envelope_type.as_deref() == Some(ENVELOPE_TYPE_KEY)
}
