//! Activity port: external operations on the activity worker.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::OrchestratorResult;
use crate::domain::models::{
    AgentExecutionResult, AgentMessage, Citation, ConversationMessage, Decomposition,
    ToolExecution, WorkflowConfig, WorkspaceEntry,
};

/// Request for the `DecomposeTask` activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecomposeRequest {
    pub query: String,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub available_tools: Vec<String>,
}

/// Request for the `ExecuteSimpleTask` activity (trivial path).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimpleTaskRequest {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub session_ctx: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workflow_id: Option<String>,
}

/// Response of the `ExecuteSimpleTask` activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimpleTaskResponse {
    pub response: String,
    pub tokens_used: u64,
    pub model_used: String,
    pub success: bool,
}

/// Request for the `ExecuteAgent` activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRequest {
    pub query: String,
    pub agent_id: String,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    /// Execution mode label (role / persona hint for the gateway).
    #[serde(default)]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub history: Vec<ConversationMessage>,
    #[serde(default)]
    pub suggested_tools: Vec<String>,
    #[serde(default)]
    pub tool_parameters: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workflow_id: Option<String>,
}

/// Request for the `SynthesizeResultsLLM` activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub query: String,
    pub agent_results: Vec<AgentExecutionResult>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub collected_citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workflow_id: Option<String>,
}

/// Response of the `SynthesizeResultsLLM` activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisResponse {
    pub final_result: String,
    pub tokens_used: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub model_used: String,
    #[serde(default)]
    pub provider: String,
}

/// Request for the `AddCitations` activity (inline `[n]` insertion).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitationInsertRequest {
    pub report: String,
    pub citations: Vec<Citation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_workflow_id: Option<String>,
    #[serde(default)]
    pub model_tier: String,
}

/// Response of the `AddCitations` activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitationInsertResponse {
    pub cited_report: String,
    /// 1-based citation numbers actually used inline.
    #[serde(default)]
    pub citations_used: Vec<u32>,
    pub validation_passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
}

/// One member of a swarm roster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamMember {
    pub agent_id: String,
    pub task: String,
}

/// Request for the `AgentLoopStep` reason-and-plan activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopStepRequest {
    pub agent_id: String,
    pub task: String,
    pub iteration: u32,
    pub max_iterations: u32,
    #[serde(default)]
    pub messages: Vec<AgentMessage>,
    /// Observation history accumulated by the loop.
    #[serde(default)]
    pub history: Vec<String>,
    #[serde(default)]
    pub roster: Vec<TeamMember>,
    /// Workspace snippets since the loop's high-water mark.
    #[serde(default)]
    pub workspace: Vec<WorkspaceEntry>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

/// Decision returned by `AgentLoopStep`: the chosen action and its input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoopStepDecision {
    #[serde(default)]
    pub thought: String,
    /// Action name: `done`, `tool_call`, `send_message`, `publish_data`,
    /// `request_help`. Unknown names are treated as implicit tool calls.
    pub action: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// Response text (the final answer for `done`).
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub tokens_used: u64,
}

/// The activity worker surface consumed by the core.
///
/// Implementations perform the actual I/O (model gateway, tool registry,
/// telemetry); the core only ever calls them at suspension points.
#[async_trait]
pub trait Activities: Send + Sync {
    /// `GetWorkflowConfig` — loaded once per strategy invocation.
    async fn get_workflow_config(&self) -> OrchestratorResult<WorkflowConfig>;

    /// `DecomposeTask` — plan a query into a subtask DAG.
    async fn decompose_task(&self, req: DecomposeRequest) -> OrchestratorResult<Decomposition>;

    /// `ExecuteSimpleTask` — one-shot execution for trivial queries.
    async fn execute_simple_task(
        &self,
        req: SimpleTaskRequest,
    ) -> OrchestratorResult<SimpleTaskResponse>;

    /// `ExecuteAgent` — run one worker agent against the model gateway.
    async fn execute_agent(&self, req: AgentRequest) -> OrchestratorResult<AgentExecutionResult>;

    /// `SynthesizeResultsLLM` — combine agent results into a final answer.
    async fn synthesize_results(
        &self,
        req: SynthesisRequest,
    ) -> OrchestratorResult<SynthesisResponse>;

    /// `AddCitations` — rewrite a report with inline `[n]` markers.
    async fn add_citations(
        &self,
        req: CitationInsertRequest,
    ) -> OrchestratorResult<CitationInsertResponse>;

    /// `VerifyClaimsActivity` — claim verification digest.
    async fn verify_claims(
        &self,
        answer: &str,
        citations: &[Citation],
    ) -> OrchestratorResult<Value>;

    /// Direct tool invocation used by the react pattern and the agent loop.
    async fn invoke_tool(
        &self,
        tool: &str,
        params: &BTreeMap<String, Value>,
        session_id: Option<&str>,
    ) -> OrchestratorResult<ToolExecution>;

    /// `AgentLoopStep` — one reason-and-plan step of the persistent loop.
    async fn agent_loop_step(&self, req: LoopStepRequest)
        -> OrchestratorResult<LoopStepDecision>;

    /// `CostForTokens` — pricing helper; pure lookup, no I/O.
    fn cost_for_tokens(&self, model: &str, tokens: u64) -> f64;

    /// `RecordTokenUsage` — telemetry; failures are ignored by callers.
    async fn record_token_usage(
        &self,
        session_id: Option<&str>,
        model: &str,
        tokens: u64,
    ) -> OrchestratorResult<()>;

    /// `RecordPatternMetrics` — pattern-usage telemetry.
    async fn record_pattern_metrics(
        &self,
        pattern: &str,
        payload: Value,
    ) -> OrchestratorResult<()>;

    /// `UpdateSessionResult` + `RecordQuery` — session bookkeeping.
    async fn update_session_result(
        &self,
        session_id: &str,
        result: &str,
        tokens_used: u64,
    ) -> OrchestratorResult<()>;

    /// `PersistAgentExecutionStandalone` — vector-store persistence.
    async fn persist_agent_execution(
        &self,
        result: &AgentExecutionResult,
    ) -> OrchestratorResult<()>;
}
