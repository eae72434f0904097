//! Streaming event taxonomy emitted through the `EmitTaskUpdate` activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved agent id marking the user-facing final text in an `llm_output`
/// event.
pub const FINAL_OUTPUT_AGENT_ID: &str = "final_output";

/// Event kind streamed to telemetry dashboards and streaming clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskUpdateKind {
    WorkflowStarted,
    Progress,
    AgentStarted,
    AgentCompleted,
    LlmOutput,
    WorkflowCompleted,
}

impl std::fmt::Display for TaskUpdateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::WorkflowStarted => "workflow_started",
            Self::Progress => "progress",
            Self::AgentStarted => "agent_started",
            Self::AgentCompleted => "agent_completed",
            Self::LlmOutput => "llm_output",
            Self::WorkflowCompleted => "workflow_completed",
        };
        write!(f, "{s}")
    }
}

/// One streamed task update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub workflow_id: String,
    pub kind: TaskUpdateKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl TaskUpdate {
    pub fn new(workflow_id: impl Into<String>, kind: TaskUpdateKind) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            kind,
            agent_id: None,
            payload: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// The `llm_output` event carrying the user-facing final text.
    pub fn final_output(
        workflow_id: impl Into<String>,
        text: &str,
        tokens_used: u64,
        model_used: &str,
    ) -> Self {
        Self::new(workflow_id, TaskUpdateKind::LlmOutput)
            .with_agent(FINAL_OUTPUT_AGENT_ID)
            .with_payload(serde_json::json!({
                "text": text,
                "tokens_used": tokens_used,
                "model_used": model_used,
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(TaskUpdateKind::WorkflowCompleted.to_string(), "workflow_completed");
        assert_eq!(TaskUpdateKind::LlmOutput.to_string(), "llm_output");
    }

    #[test]
    fn test_final_output_event() {
        let event = TaskUpdate::final_output("wf-1", "the answer", 512, "medium-model");
        assert_eq!(event.agent_id.as_deref(), Some(FINAL_OUTPUT_AGENT_ID));
        assert_eq!(event.payload["tokens_used"], 512);
        assert_eq!(event.payload["model_used"], "medium-model");
    }
}
