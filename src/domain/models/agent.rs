//! Per-subtask agent execution results returned by the execution activity.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One tool invocation recorded during an agent execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool: String,
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Output of one agent execution. Exclusively owned by the strategy that
/// produced it; passed by value into post-processing and never mutated after
/// production.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentExecutionResult {
    pub agent_id: String,
    pub response: String,
    pub success: bool,
    pub tokens_used: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub tool_executions: Vec<ToolExecution>,
}

impl AgentExecutionResult {
    /// A failed result carrying only the agent id and error message. Used by
    /// patterns to keep the result list full when a dispatch fails outright.
    pub fn failed(agent_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// True when any recorded tool name matches a web-search style tool.
    pub fn used_web_search(&self) -> bool {
        self.tools_used.iter().any(|t| is_web_search_tool(t))
            || self
                .tool_executions
                .iter()
                .any(|t| is_web_search_tool(&t.tool))
    }
}

/// Web-search tools force re-synthesis so citations survive into the answer.
pub fn is_web_search_tool(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.contains("web_search") || name.contains("websearch") || name.contains("search_web")
}
