//! Scripted activity worker for tests and engine-less embeddings.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{
    AgentExecutionResult, Citation, Decomposition, Subtask, ToolExecution, WorkflowConfig,
};
use crate::domain::ports::{
    Activities, AgentRequest, CitationInsertRequest, CitationInsertResponse, DecomposeRequest,
    LoopStepDecision, LoopStepRequest, SimpleTaskRequest, SimpleTaskResponse, SynthesisRequest,
    SynthesisResponse,
};

/// Per-agent behavior override.
#[derive(Debug, Clone, Default)]
struct AgentScript {
    response: Option<String>,
    /// Responses consumed one per call; the last repeats when exhausted.
    sequence: Vec<String>,
    tokens: Option<u64>,
    delay_ms: Option<u64>,
    fail: Option<String>,
    tool_output: Option<(String, Value)>,
}

/// Tool failure script.
#[derive(Debug, Clone)]
struct ToolScript {
    error: String,
    /// `None` fails forever; `Some(n)` fails the first `n` calls.
    remaining_failures: Option<u32>,
}

#[derive(Default)]
struct MockState {
    agent_scripts: HashMap<String, AgentScript>,
    prefix_responses: Vec<(String, String)>,
    sequence_cursors: HashMap<String, usize>,
    requests: Vec<AgentRequest>,
    dispatch_order: Vec<String>,
    active_agents: usize,
    max_active_agents: usize,
    tool_scripts: HashMap<String, ToolScript>,
    tool_invocations: Vec<String>,
    loop_script: Vec<LoopStepDecision>,
    loop_cursor: usize,
    loop_requests: Vec<LoopStepRequest>,
    simple_response: Option<SimpleTaskResponse>,
    simple_calls: usize,
    synthesis_response: Option<SynthesisResponse>,
    synthesis_calls: usize,
    citation_response: Option<CitationInsertResponse>,
    citation_failure: Option<String>,
    verification_digest: Option<Value>,
    decomposition: Option<Decomposition>,
    workflow_config: Option<WorkflowConfig>,
}

/// Scripted [`Activities`] implementation with call recording.
#[derive(Default)]
pub struct MockActivities {
    state: Arc<RwLock<MockState>>,
}

impl MockActivities {
    pub fn new() -> Self {
        Self::default()
    }

    async fn script_mut(&self, agent_id: &str) -> tokio::sync::RwLockWriteGuard<'_, MockState> {
        let mut state = self.state.write().await;
        state
            .agent_scripts
            .entry(agent_id.to_string())
            .or_default();
        state
    }

    // -- Agent scripting -----------------------------------------------------

    pub async fn set_agent_response(&self, agent_id: &str, response: &str) {
        let mut state = self.script_mut(agent_id).await;
        state.agent_scripts.get_mut(agent_id).unwrap().response = Some(response.to_string());
    }

    pub async fn set_agent_response_sequence(&self, agent_id: &str, responses: Vec<String>) {
        let mut state = self.script_mut(agent_id).await;
        state.agent_scripts.get_mut(agent_id).unwrap().sequence = responses;
    }

    /// Response for any agent id starting with `prefix` (exact scripts win).
    pub async fn set_agent_response_prefix(&self, prefix: &str, response: &str) {
        let mut state = self.state.write().await;
        state
            .prefix_responses
            .push((prefix.to_string(), response.to_string()));
    }

    pub async fn set_agent_tokens(&self, agent_id: &str, tokens: u64) {
        let mut state = self.script_mut(agent_id).await;
        state.agent_scripts.get_mut(agent_id).unwrap().tokens = Some(tokens);
    }

    pub async fn set_agent_delay_ms(&self, agent_id: &str, delay_ms: u64) {
        let mut state = self.script_mut(agent_id).await;
        state.agent_scripts.get_mut(agent_id).unwrap().delay_ms = Some(delay_ms);
    }

    pub async fn fail_agent(&self, agent_id: &str, error: &str) {
        let mut state = self.script_mut(agent_id).await;
        state.agent_scripts.get_mut(agent_id).unwrap().fail = Some(error.to_string());
    }

    /// Attach a successful tool execution to this agent's results.
    pub async fn set_agent_tool_output(&self, agent_id: &str, tool: &str, output: Value) {
        let mut state = self.script_mut(agent_id).await;
        state.agent_scripts.get_mut(agent_id).unwrap().tool_output =
            Some((tool.to_string(), output));
    }

    // -- Tool scripting ------------------------------------------------------

    pub async fn fail_tool(&self, tool: &str, error: &str) {
        let mut state = self.state.write().await;
        state.tool_scripts.insert(
            tool.to_string(),
            ToolScript {
                error: error.to_string(),
                remaining_failures: None,
            },
        );
    }

    /// Fail the first `failures` calls of `tool`, then succeed.
    pub async fn fail_tool_transiently(&self, tool: &str, error: &str, failures: u32) {
        let mut state = self.state.write().await;
        state.tool_scripts.insert(
            tool.to_string(),
            ToolScript {
                error: error.to_string(),
                remaining_failures: Some(failures),
            },
        );
    }

    // -- Loop scripting ------------------------------------------------------

    /// Decisions consumed one per `agent_loop_step` call; the last repeats.
    pub async fn set_loop_decisions(&self, decisions: Vec<LoopStepDecision>) {
        let mut state = self.state.write().await;
        state.loop_script = decisions;
        state.loop_cursor = 0;
    }

    // -- Other activity scripting --------------------------------------------

    pub async fn set_simple_response(&self, response: &str, tokens: u64, model: &str) {
        let mut state = self.state.write().await;
        state.simple_response = Some(SimpleTaskResponse {
            response: response.to_string(),
            tokens_used: tokens,
            model_used: model.to_string(),
            success: true,
        });
    }

    pub async fn set_synthesis_response(&self, final_result: &str, tokens: u64) {
        let mut state = self.state.write().await;
        state.synthesis_response = Some(SynthesisResponse {
            final_result: final_result.to_string(),
            tokens_used: tokens,
            model_used: "mock-model".to_string(),
            provider: "mock".to_string(),
            ..Default::default()
        });
    }

    pub async fn set_citation_response(
        &self,
        cited_report: &str,
        citations_used: Vec<u32>,
        validation_passed: bool,
    ) {
        let mut state = self.state.write().await;
        state.citation_response = Some(CitationInsertResponse {
            cited_report: cited_report.to_string(),
            citations_used,
            validation_passed,
            validation_error: None,
            tokens_used: 5,
        });
    }

    pub async fn fail_citations(&self, error: &str) {
        let mut state = self.state.write().await;
        state.citation_failure = Some(error.to_string());
    }

    pub async fn set_verification_digest(&self, digest: Value) {
        let mut state = self.state.write().await;
        state.verification_digest = Some(digest);
    }

    pub async fn set_decomposition(&self, decomposition: Decomposition) {
        let mut state = self.state.write().await;
        state.decomposition = Some(decomposition);
    }

    pub async fn set_workflow_config(&self, config: WorkflowConfig) {
        let mut state = self.state.write().await;
        state.workflow_config = Some(config);
    }

    // -- Inspection ----------------------------------------------------------

    /// The first recorded request for an agent id.
    pub async fn request_for(&self, agent_id: &str) -> Option<AgentRequest> {
        let state = self.state.read().await;
        state
            .requests
            .iter()
            .find(|r| r.agent_id == agent_id)
            .cloned()
    }

    /// Agent ids in dispatch order.
    pub async fn dispatch_order(&self) -> Vec<String> {
        self.state.read().await.dispatch_order.clone()
    }

    /// Highest concurrent `execute_agent` count observed.
    pub async fn max_concurrent_agents(&self) -> usize {
        self.state.read().await.max_active_agents
    }

    pub async fn tool_invocations(&self) -> Vec<String> {
        self.state.read().await.tool_invocations.clone()
    }

    pub async fn loop_request(&self, index: usize) -> Option<LoopStepRequest> {
        self.state.read().await.loop_requests.get(index).cloned()
    }

    pub async fn simple_task_calls(&self) -> usize {
        self.state.read().await.simple_calls
    }

    pub async fn synthesis_calls(&self) -> usize {
        self.state.read().await.synthesis_calls
    }

    /// Resolve the response text for one agent call.
    async fn resolve_response(&self, agent_id: &str) -> String {
        let mut state = self.state.write().await;
        if let Some(script) = state.agent_scripts.get(agent_id) {
            if !script.sequence.is_empty() {
                let sequence = script.sequence.clone();
                let cursor = state
                    .sequence_cursors
                    .entry(agent_id.to_string())
                    .or_insert(0);
                let response = sequence[(*cursor).min(sequence.len() - 1)].clone();
                *cursor += 1;
                return response;
            }
            if let Some(response) = &script.response {
                return response.clone();
            }
        }
        if let Some((_, response)) = state
            .prefix_responses
            .iter()
            .find(|(prefix, _)| agent_id.starts_with(prefix.as_str()))
        {
            return response.clone();
        }
        format!("mock response for {agent_id}")
    }
}

#[async_trait]
impl Activities for MockActivities {
    async fn get_workflow_config(&self) -> OrchestratorResult<WorkflowConfig> {
        Ok(self
            .state
            .read()
            .await
            .workflow_config
            .clone()
            .unwrap_or_default())
    }

    async fn decompose_task(&self, req: DecomposeRequest) -> OrchestratorResult<Decomposition> {
        let configured = self.state.read().await.decomposition.clone();
        Ok(configured.unwrap_or_else(|| Decomposition {
            complexity: 0.5,
            mode: "standard".to_string(),
            subtasks: vec![Subtask::new("auto", req.query)],
            ..Default::default()
        }))
    }

    async fn execute_simple_task(
        &self,
        _req: SimpleTaskRequest,
    ) -> OrchestratorResult<SimpleTaskResponse> {
        let mut state = self.state.write().await;
        state.simple_calls += 1;
        Ok(state.simple_response.clone().unwrap_or(SimpleTaskResponse {
            response: "simple answer".to_string(),
            tokens_used: 10,
            model_used: "mock-model".to_string(),
            success: true,
        }))
    }

    async fn execute_agent(&self, req: AgentRequest) -> OrchestratorResult<AgentExecutionResult> {
        let agent_id = req.agent_id.clone();
        let (delay_ms, failure, tokens, tool_output) = {
            let mut state = self.state.write().await;
            state.requests.push(req);
            state.dispatch_order.push(agent_id.clone());
            state.active_agents += 1;
            state.max_active_agents = state.max_active_agents.max(state.active_agents);
            let script = state.agent_scripts.get(&agent_id).cloned().unwrap_or_default();
            (
                script.delay_ms,
                script.fail,
                script.tokens,
                script.tool_output,
            )
        };

        if let Some(delay) = delay_ms {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }

        let response = self.resolve_response(&agent_id).await;
        {
            let mut state = self.state.write().await;
            state.active_agents -= 1;
        }

        if let Some(error) = failure {
            return Ok(AgentExecutionResult::failed(agent_id, error));
        }

        let tokens = tokens.unwrap_or(10);
        let mut result = AgentExecutionResult {
            agent_id,
            response,
            success: true,
            tokens_used: tokens,
            input_tokens: tokens / 2,
            output_tokens: tokens - tokens / 2,
            model: "mock-model".to_string(),
            provider: "mock".to_string(),
            duration_ms: 1,
            ..Default::default()
        };
        if let Some((tool, output)) = tool_output {
            result.tools_used.push(tool.clone());
            result.tool_executions.push(ToolExecution {
                tool,
                success: true,
                output,
                error: None,
            });
        }
        Ok(result)
    }

    async fn synthesize_results(
        &self,
        _req: SynthesisRequest,
    ) -> OrchestratorResult<SynthesisResponse> {
        let mut state = self.state.write().await;
        state.synthesis_calls += 1;
        Ok(state.synthesis_response.clone().unwrap_or(SynthesisResponse {
            final_result: "synthesized result".to_string(),
            tokens_used: 15,
            model_used: "mock-model".to_string(),
            provider: "mock".to_string(),
            ..Default::default()
        }))
    }

    async fn add_citations(
        &self,
        req: CitationInsertRequest,
    ) -> OrchestratorResult<CitationInsertResponse> {
        let state = self.state.read().await;
        if let Some(error) = &state.citation_failure {
            return Err(OrchestratorError::activity("AddCitations", error));
        }
        Ok(state
            .citation_response
            .clone()
            .unwrap_or(CitationInsertResponse {
                cited_report: req.report,
                citations_used: Vec::new(),
                validation_passed: true,
                validation_error: None,
                tokens_used: 5,
            }))
    }

    async fn verify_claims(
        &self,
        _answer: &str,
        citations: &[Citation],
    ) -> OrchestratorResult<Value> {
        let state = self.state.read().await;
        Ok(state
            .verification_digest
            .clone()
            .unwrap_or_else(|| json!({"status": "unverified", "citations": citations.len()})))
    }

    async fn invoke_tool(
        &self,
        tool: &str,
        params: &BTreeMap<String, Value>,
        _session_id: Option<&str>,
    ) -> OrchestratorResult<ToolExecution> {
        let mut state = self.state.write().await;
        state.tool_invocations.push(tool.to_string());

        if let Some(script) = state.tool_scripts.get_mut(tool) {
            let fails = match &mut script.remaining_failures {
                None => true,
                Some(0) => false,
                Some(n) => {
                    *n -= 1;
                    true
                }
            };
            if fails {
                let error = script.error.clone();
                return Ok(ToolExecution {
                    tool: tool.to_string(),
                    success: false,
                    output: Value::Null,
                    error: Some(error),
                });
            }
        }

        Ok(ToolExecution {
            tool: tool.to_string(),
            success: true,
            output: json!({"tool": tool, "params": params, "ok": true}),
            error: None,
        })
    }

    async fn agent_loop_step(
        &self,
        req: LoopStepRequest,
    ) -> OrchestratorResult<LoopStepDecision> {
        let mut state = self.state.write().await;
        state.loop_requests.push(req);
        if state.loop_script.is_empty() {
            return Ok(LoopStepDecision {
                action: "done".to_string(),
                tokens_used: 5,
                ..Default::default()
            });
        }
        let index = state.loop_cursor.min(state.loop_script.len() - 1);
        state.loop_cursor += 1;
        Ok(state.loop_script[index].clone())
    }

    fn cost_for_tokens(&self, _model: &str, tokens: u64) -> f64 {
        tokens as f64 * 1e-6
    }

    async fn record_token_usage(
        &self,
        _session_id: Option<&str>,
        _model: &str,
        _tokens: u64,
    ) -> OrchestratorResult<()> {
        Ok(())
    }

    async fn record_pattern_metrics(
        &self,
        _pattern: &str,
        _payload: Value,
    ) -> OrchestratorResult<()> {
        Ok(())
    }

    async fn update_session_result(
        &self,
        _session_id: &str,
        _result: &str,
        _tokens_used: u64,
    ) -> OrchestratorResult<()> {
        Ok(())
    }

    async fn persist_agent_execution(
        &self,
        _result: &AgentExecutionResult,
    ) -> OrchestratorResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_agent_response() {
        let mock = MockActivities::new();
        let result = mock
            .execute_agent(AgentRequest {
                agent_id: "x".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.response.contains("x"));
        assert_eq!(result.tokens_used, 10);
    }

    #[tokio::test]
    async fn test_sequence_repeats_last() {
        let mock = MockActivities::new();
        mock.set_agent_response_sequence("s", vec!["one".into(), "two".into()])
            .await;
        for expected in ["one", "two", "two"] {
            let result = mock
                .execute_agent(AgentRequest {
                    agent_id: "s".into(),
                    ..Default::default()
                })
                .await
                .unwrap();
            assert_eq!(result.response, expected);
        }
    }

    #[tokio::test]
    async fn test_transient_tool_script() {
        let mock = MockActivities::new();
        mock.fail_tool_transiently("t", "timeout", 2).await;
        let params = BTreeMap::new();
        assert!(!mock.invoke_tool("t", &params, None).await.unwrap().success);
        assert!(!mock.invoke_tool("t", &params, None).await.unwrap().success);
        assert!(mock.invoke_tool("t", &params, None).await.unwrap().success);
    }
}
