//! Envelope model for the Lantern mesh
//!
//! Defines the canonical on-wire form of the two propagation units: the
//! MessageEnvelope (message path) and the KeyEnvelope (key path), plus the
//! DecryptedMessage record produced at admin nodes. Field names serialize
//! camelCase to match the hub wire protocol.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Default hop budget for a freshly originated envelope
pub const DEFAULT_TTL: u32 = 8;

/// Broadcast target
pub const TO_ALL: &str = "all";

/// End-to-end target
pub const TO_ADMIN: &str = "admin";

/// Envelope validation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(&'static str),

    #[error("TTL exhausted")]
    TtlExhausted,

    #[error("Envelope type does not match its target")]
    WrongTypeTarget,

    #[error("Payload encoding is invalid")]
    BadPayloadEncoding,
}

/// Message class: public broadcast or admin-addressed ciphertext
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    Broadcast,
    E2e,
}

/// Append-only witness of one forwarder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HopRecord {
    pub node_id: String,
    pub timestamp: DateTime<Utc>,
}

impl HopRecord {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Operator-facing metadata carried alongside a message; never secret
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

/// The unit that travels on the message path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    pub msg_id: String,
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub from: String,
    pub to: String,
    pub timestamp: DateTime<Utc>,
    pub ttl: u32,
    pub hops: Vec<HopRecord>,
    pub payload: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<EnvelopeMeta>,
}

impl MessageEnvelope {
    /// Build a broadcast envelope with a fresh identifier and a single
    /// origin hop
    pub fn broadcast(
        content: impl Into<String>,
        meta: Option<EnvelopeMeta>,
        node_id: &str,
        from: &str,
    ) -> Self {
        Self {
            msg_id: Uuid::new_v4().to_string(),
            kind: EnvelopeKind::Broadcast,
            from: from.to_string(),
            to: TO_ALL.to_string(),
            timestamp: Utc::now(),
            ttl: DEFAULT_TTL,
            hops: vec![HopRecord::new(node_id)],
            payload: content.into(),
            meta,
        }
    }

    /// Build an end-to-end envelope carrying an already sealed payload
    /// (base64 of nonce || ciphertext)
    pub fn e2e(
        sealed_payload: impl Into<String>,
        meta: Option<EnvelopeMeta>,
        node_id: &str,
        from: &str,
    ) -> Self {
        Self {
            msg_id: Uuid::new_v4().to_string(),
            kind: EnvelopeKind::E2e,
            from: from.to_string(),
            to: TO_ADMIN.to_string(),
            timestamp: Utc::now(),
            ttl: DEFAULT_TTL,
            hops: vec![HopRecord::new(node_id)],
            payload: sealed_payload.into(),
            meta,
        }
    }

    /// Override the hop budget at origin
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Copy for forwarding: one more hop appended, budget decremented
    pub fn add_hop(&self, node_id: &str) -> Result<Self, EnvelopeError> {
        if self.ttl == 0 {
            return Err(EnvelopeError::TtlExhausted);
        }
        let mut forwarded = self.clone();
        forwarded.ttl -= 1;
        forwarded.hops.push(HopRecord::new(node_id));
        Ok(forwarded)
    }

    /// Reject envelopes violating the model invariants
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.msg_id.is_empty() {
            return Err(EnvelopeError::MalformedEnvelope("empty msgId"));
        }
        if self.hops.is_empty() {
            return Err(EnvelopeError::MalformedEnvelope("empty hop list"));
        }
        match self.kind {
            EnvelopeKind::Broadcast => {
                if self.to != TO_ALL {
                    return Err(EnvelopeError::WrongTypeTarget);
                }
            }
            EnvelopeKind::E2e => {
                if self.to != TO_ADMIN {
                    return Err(EnvelopeError::WrongTypeTarget);
                }
                let decoded = BASE64
                    .decode(&self.payload)
                    .map_err(|_| EnvelopeError::BadPayloadEncoding)?;
                // nonce plus at least the AEAD tag
                if decoded.len() < lantern_crypto::NONCE_SIZE + 16 {
                    return Err(EnvelopeError::BadPayloadEncoding);
                }
            }
        }
        Ok(())
    }

    /// The origin node of this envelope (head of the hop list)
    pub fn origin(&self) -> Option<&HopRecord> {
        self.hops.first()
    }
}

/// The unit on the key path: a session key wrapped to the admin public key
///
/// Key envelopes carry no TTL and no hop list; they are fanned out once by
/// the origin's hub and never relayed onward.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KeyEnvelope {
    pub msg_id: String,
    pub from: String,
    pub to: String,
    pub wrapped_key: String,
    pub algorithm: String,
}

impl KeyEnvelope {
    /// Build the companion key envelope for a message identifier
    pub fn new(msg_id: impl Into<String>, wrapped_key: impl Into<String>, from: &str) -> Self {
        Self {
            msg_id: msg_id.into(),
            from: from.to_string(),
            to: TO_ADMIN.to_string(),
            wrapped_key: wrapped_key.into(),
            algorithm: lantern_crypto::ALGORITHM.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.msg_id.is_empty() {
            return Err(EnvelopeError::MalformedEnvelope("empty msgId"));
        }
        if self.to != TO_ADMIN {
            return Err(EnvelopeError::WrongTypeTarget);
        }
        BASE64
            .decode(&self.wrapped_key)
            .map_err(|_| EnvelopeError::BadPayloadEncoding)?;
        Ok(())
    }
}

/// Plaintext join result, produced at admin nodes only
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedMessage {
    pub msg_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<EnvelopeMeta>,
    pub message_path: Vec<HopRecord>,
    pub key_path: Vec<HopRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_envelope_shape() {
        let env = MessageEnvelope::broadcast("hello", None, "00aabb", "user_00aabb");
        assert_eq!(env.kind, EnvelopeKind::Broadcast);
        assert_eq!(env.to, TO_ALL);
        assert_eq!(env.ttl, DEFAULT_TTL);
        assert_eq!(env.hops.len(), 1);
        assert_eq!(env.hops[0].node_id, "00aabb");
        assert!(!env.msg_id.is_empty());
        env.validate().unwrap();
    }

    #[test]
    fn test_add_hop_decrements_ttl() {
        let env = MessageEnvelope::broadcast("hi", None, "a", "user_a");
        let forwarded = env.add_hop("b").unwrap();
        assert_eq!(forwarded.ttl, env.ttl - 1);
        assert_eq!(forwarded.hops.len(), 2);
        assert_eq!(forwarded.hops[1].node_id, "b");
        // the original copy is untouched
        assert_eq!(env.hops.len(), 1);
    }

    #[test]
    fn test_add_hop_on_spent_budget() {
        let env = MessageEnvelope::broadcast("hi", None, "a", "user_a").with_ttl(0);
        assert_eq!(env.add_hop("b"), Err(EnvelopeError::TtlExhausted));
    }

    #[test]
    fn test_validate_wrong_target() {
        let mut env = MessageEnvelope::broadcast("hi", None, "a", "user_a");
        env.to = TO_ADMIN.to_string();
        assert_eq!(env.validate(), Err(EnvelopeError::WrongTypeTarget));
    }

    #[test]
    fn test_validate_e2e_payload_encoding() {
        let mut env = MessageEnvelope::e2e("!!not base64!!", None, "a", "user_a");
        assert_eq!(env.validate(), Err(EnvelopeError::BadPayloadEncoding));

        // too short even when it decodes
        env.payload = BASE64.encode([0u8; 8]);
        assert_eq!(env.validate(), Err(EnvelopeError::BadPayloadEncoding));
    }

    #[test]
    fn test_validate_empty_hops() {
        let mut env = MessageEnvelope::broadcast("hi", None, "a", "user_a");
        env.hops.clear();
        assert_eq!(
            env.validate(),
            Err(EnvelopeError::MalformedEnvelope("empty hop list"))
        );
    }

    #[test]
    fn test_serde_uses_wire_field_names() {
        let env = MessageEnvelope::broadcast("hi", None, "a", "user_a");
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "broadcast");
        assert_eq!(json["to"], "all");
        assert!(json.get("msgId").is_some());
        assert!(json["hops"][0].get("nodeId").is_some());
        // meta is omitted entirely when absent
        assert!(json.get("meta").is_none());
    }

    #[test]
    fn test_envelope_roundtrip() {
        let meta = EnvelopeMeta {
            name: Some("field team".into()),
            location: Some("north gate".into()),
            contact: None,
            image_ref: None,
        };
        let env = MessageEnvelope::broadcast("hello", Some(meta), "a", "user_a");
        let json = serde_json::to_string(&env).unwrap();
        let parsed: MessageEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn test_key_envelope_shape() {
        let wrapped = BASE64.encode([0u8; 92]);
        let key = KeyEnvelope::new("m1", wrapped, "user_a");
        assert_eq!(key.to, TO_ADMIN);
        assert_eq!(key.algorithm, lantern_crypto::ALGORITHM);
        key.validate().unwrap();

        let json = serde_json::to_value(&key).unwrap();
        assert!(json.get("wrappedKey").is_some());
        assert!(json.get("msgId").is_some());
    }
}
