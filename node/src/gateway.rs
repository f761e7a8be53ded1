//! Gateway ingress: HTTP submission of pre-sealed messages
//!
//! Clients without a mesh relay (e.g. a browser) encrypt locally and POST
//! both halves here; the gateway synthesises the two envelopes and emits
//! them into the hub's fan-out, message first. It never sees plaintext or
//! session keys and is therefore untrusted by design.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::envelope::{
    EnvelopeKind, EnvelopeMeta, HopRecord, KeyEnvelope, MessageEnvelope, DEFAULT_TTL, TO_ADMIN,
};
use crate::hub::HubState;
use crate::wire::{HubFrame, ENVELOPE_TYPE_KEY};

/// Hop identity recorded for gateway-originated envelopes
pub const GATEWAY_NODE_ID: &str = "gateway";

/// Sender handle when the submission does not name one
pub const GATEWAY_FROM: &str = "gateway_user";

/// Delay between the message and key emissions; lets the message frame
/// reach admins first so the join resolves on key arrival
pub const KEY_SETTLE: Duration = Duration::from_millis(100);

/// Gateway ingress errors, rendered as JSON error bodies
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("missing field {0}")]
    MissingField(&'static str),

    #[error("envelope encoding failed")]
    EncodingFailed,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match self {
            GatewayError::MissingField(_) => StatusCode::BAD_REQUEST,
            GatewayError::EncodingFailed => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub encrypted_payload: Option<String>,
    pub wrapped_key: Option<String>,
    pub msg_id: Option<String>,
    pub from: Option<String>,
    pub meta: Option<EnvelopeMeta>,
}

/// `POST /gateway/submit`
pub async fn submit(
    State(hub): State<Arc<HubState>>,
    Json(req): Json<SubmitRequest>,
) -> Result<Json<Value>, GatewayError> {
    let encrypted_payload = req
        .encrypted_payload
        .ok_or(GatewayError::MissingField("encryptedPayload"))?;
    let wrapped_key = req
        .wrapped_key
        .ok_or(GatewayError::MissingField("wrappedKey"))?;
    let msg_id = req.msg_id.ok_or(GatewayError::MissingField("msgId"))?;

    let from = req.from.unwrap_or_else(|| GATEWAY_FROM.to_string());
    let envelope = MessageEnvelope {
        msg_id: msg_id.clone(),
        kind: EnvelopeKind::E2e,
        from: from.clone(),
        to: TO_ADMIN.to_string(),
        timestamp: Utc::now(),
        ttl: DEFAULT_TTL,
        hops: vec![HopRecord::new(GATEWAY_NODE_ID)],
        payload: encrypted_payload,
        meta: req.meta,
    };
    let key = KeyEnvelope::new(&msg_id, wrapped_key, &from);

    let message_value =
        serde_json::to_value(&envelope).map_err(|_| GatewayError::EncodingFailed)?;
    let key_value = serde_json::to_value(&key).map_err(|_| GatewayError::EncodingFailed)?;

    // message first, key after a brief settle; an admin that sees the key
    // first only parks it in pending, so ordering affects join latency,
    // not correctness
    hub.fan_out(
        &HubFrame::MeshMessage {
            envelope: message_value,
            from_peer: GATEWAY_NODE_ID.to_string(),
            envelope_type: None,
        },
        None,
    );
    tokio::time::sleep(KEY_SETTLE).await;
    hub.fan_out(
        &HubFrame::MeshMessage {
            envelope: key_value,
            from_peer: GATEWAY_NODE_ID.to_string(),
            envelope_type: Some(ENVELOPE_TYPE_KEY.to_string()),
        },
        None,
    );

    log::info!("Gateway accepted submission {msg_id} from {from}");
    Ok(Json(json!({"success": true, "msgId": msg_id})))
}

/// `GET /gateway` - the static ingress page
pub async fn page() -> Html<&'static str> {
    Html(include_str!("../assets/gateway.html"))
}
