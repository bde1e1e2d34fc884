//! Client Wire Protocol
//!
//! Outbound frames are JSON objects; several frames in one WebSocket message
//! are separated by newlines. Inbound frames carry an `action` tag.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

// ─────────────────────────────────────────────────────────────────────────────
// Server -> Client
// ─────────────────────────────────────────────────────────────────────────────

/// Event types pushed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum EventKind {
    Status,
    Monitor,
    Log,
    Metrics,
    UiRequest,
    Server,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EventBody {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: Value,
}

/// `{ "projectId": P, "event": { "type": T, "data": D } }`; `projectId` is
/// omitted for global events.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct EventFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    pub event: EventBody,
}

impl EventFrame {
    pub fn new(project_id: Option<&str>, kind: EventKind, data: Value) -> Self {
        Self {
            project_id: project_id.map(str::to_string),
            event: EventBody { kind, data },
        }
    }

    /// Serialize once so the text can be shared by every recipient.
    pub fn encode(&self) -> Result<Arc<str>, serde_json::Error> {
        serde_json::to_string(self).map(Arc::from)
    }
}

/// First frame every client receives.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export)]
pub enum HandshakeFrame {
    #[serde(rename_all = "camelCase")]
    Session { session_id: String },
}

/// Payload of a `ui_request` event.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UiRequestPayload {
    pub request_id: String,
    pub schema: Value,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client -> Server
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "action", rename_all = "snake_case")]
#[ts(export)]
pub enum ClientAction {
    #[serde(rename_all = "camelCase")]
    Subscribe { project_id: String },

    #[serde(rename_all = "camelCase")]
    Unsubscribe { project_id: String },

    /// Answer to a `ui_request`; `error` declines it.
    #[serde(rename_all = "camelCase")]
    UiResponse {
        project_id: String,
        request_id: String,
        #[serde(default)]
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Parse every newline-separated frame in one text message.
pub fn parse_actions(text: &str) -> Vec<Result<ClientAction, serde_json::Error>> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(serde_json::from_str)
        .collect()
}
