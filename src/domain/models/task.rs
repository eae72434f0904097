//! Task input and result types - the boundary of every strategy invocation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::plan::Decomposition;

/// One turn of prior conversation carried into a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One-shot request to a strategy. Created at strategy entry and immutable
/// thereafter.
///
/// Context uses a `BTreeMap` so every iteration over it is in sorted-key
/// order; strategy code must never observe nondeterministic map order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskInput {
    /// The user's natural-language task.
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Free-form context propagated into agent prompts and pattern state.
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    /// Ordered conversation history.
    #[serde(default)]
    pub history: Vec<ConversationMessage>,
    /// Pre-planned decomposition; skips the decomposer activity when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decomposition: Option<Decomposition>,
    /// Set when this strategy runs as a child of another workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workflow_id: Option<String>,
    /// Skip synthesis when exactly one subtask succeeded (subject to the
    /// requires-synthesis guards).
    #[serde(default)]
    pub bypass_single_result: bool,
    /// Require a human approval signal before execution.
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default)]
    pub approval_timeout_secs: u64,
}

impl TaskInput {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Insert a context value, replacing any existing entry.
    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Fetch a string-typed context value.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }
}

/// The strategy's return value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskResult {
    pub result: String,
    pub success: bool,
    pub tokens_used: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Sorted-key metadata: model, provider, cost estimate, per-agent
    /// summaries, citations, verification digest, pattern trail.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl TaskResult {
    /// Successful result with no metadata yet.
    pub fn ok(result: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            result: result.into(),
            success: true,
            tokens_used,
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Failure result carrying the tokens consumed before the failure.
    pub fn failure(error: impl Into<String>, tokens_used: u64) -> Self {
        Self {
            result: String::new(),
            success: false,
            tokens_used,
            error: Some(error.into()),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
