//! Peer-to-peer messages and the shared workspace used by the agent swarm.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Info,
    Request,
    Response,
}

/// A message delivered to a per-agent mailbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub from: String,
    pub to: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentMessage {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        kind: MessageKind,
        payload: Value,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// True for a supervisor help request.
    pub fn is_help_request(&self) -> bool {
        self.kind == MessageKind::Request
            && self
                .payload
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| t == "request_help")
    }
}

/// An append-only entry in the swarm's shared workspace.
///
/// Entries are totally ordered per workflow by the monotonic sequence number
/// assigned on append; they are never overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    pub topic: String,
    pub author: String,
    #[serde(default)]
    pub data: Value,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}
