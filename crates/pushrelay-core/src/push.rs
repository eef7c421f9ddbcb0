//! Push envelope types — shared between the scheduler's push job and the gateway.

use serde::{Deserialize, Serialize};

/// A message delivered to a session's callback URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub title: String,
    pub content: String,
}

/// Identifying context of the receiving session, echoed back to the callback
/// so one endpoint can serve several sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "groupID")]
    pub group_id: Option<String>,
    /// Opaque client data attached when the session was registered.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
    /// Callback URL the envelope is POSTed to.
    pub hook: String,
}

/// JSON body POSTed to a session hook: `{"session": {...}, "message": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEnvelope {
    pub session: SessionInfo,
    pub message: Message,
}

impl PushEnvelope {
    pub fn new(session: SessionInfo, message: Message) -> Self {
        Self { session, message }
    }

    /// Serialize to the exact bytes stored in a push job record.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
