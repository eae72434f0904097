//! Rate-limited activity gateway.
//!
//! Wraps any [`Activities`] implementation with a request rate limiter and
//! per-class start-to-close timeouts, the dispatch discipline the durable
//! engine applies to activity workers. Model-bound calls share one limiter;
//! telemetry calls only get the short timeout.

use std::collections::BTreeMap;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{
    AgentExecutionResult, Citation, Decomposition, ToolExecution, WorkflowConfig,
};
use crate::domain::ports::{
    Activities, AgentRequest, CitationInsertRequest, CitationInsertResponse, DecomposeRequest,
    LoopStepDecision, LoopStepRequest, SimpleTaskRequest, SimpleTaskResponse, SynthesisRequest,
    SynthesisResponse,
};
use crate::services::retry::{EVENT_TIMEOUT, EXECUTION_TIMEOUT};

/// Activities wrapper enforcing rate limits and timeouts.
pub struct RateLimitedGateway {
    inner: Arc<dyn Activities>,
    limiter: DefaultDirectRateLimiter,
}

impl RateLimitedGateway {
    /// `requests_per_second` caps model-bound activity dispatches.
    pub fn new(inner: Arc<dyn Activities>, requests_per_second: u32) -> Self {
        let quota = Quota::per_second(
            NonZeroU32::new(requests_per_second.max(1)).unwrap_or(NonZeroU32::MIN),
        );
        Self {
            inner,
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Wait for a rate-limit slot, then run the call under `deadline`.
    async fn gated<T, Fut>(
        &self,
        what: &str,
        deadline: Duration,
        call: Fut,
    ) -> OrchestratorResult<T>
    where
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        self.limiter.until_ready().await;
        tokio::time::timeout(deadline, call)
            .await
            .map_err(|_| OrchestratorError::Timeout {
                what: what.to_string(),
                secs: deadline.as_secs(),
            })?
    }
}

#[async_trait]
impl Activities for RateLimitedGateway {
    async fn get_workflow_config(&self) -> OrchestratorResult<WorkflowConfig> {
        tokio::time::timeout(EVENT_TIMEOUT, self.inner.get_workflow_config())
            .await
            .map_err(|_| OrchestratorError::Timeout {
                what: "GetWorkflowConfig".to_string(),
                secs: EVENT_TIMEOUT.as_secs(),
            })?
    }

    async fn decompose_task(&self, req: DecomposeRequest) -> OrchestratorResult<Decomposition> {
        self.gated("DecomposeTask", EXECUTION_TIMEOUT, self.inner.decompose_task(req))
            .await
    }

    async fn execute_simple_task(
        &self,
        req: SimpleTaskRequest,
    ) -> OrchestratorResult<SimpleTaskResponse> {
        self.gated(
            "ExecuteSimpleTask",
            EXECUTION_TIMEOUT,
            self.inner.execute_simple_task(req),
        )
        .await
    }

    async fn execute_agent(&self, req: AgentRequest) -> OrchestratorResult<AgentExecutionResult> {
        self.gated("ExecuteAgent", EXECUTION_TIMEOUT, self.inner.execute_agent(req))
            .await
    }

    async fn synthesize_results(
        &self,
        req: SynthesisRequest,
    ) -> OrchestratorResult<SynthesisResponse> {
        self.gated(
            "SynthesizeResultsLLM",
            EXECUTION_TIMEOUT,
            self.inner.synthesize_results(req),
        )
        .await
    }

    async fn add_citations(
        &self,
        req: CitationInsertRequest,
    ) -> OrchestratorResult<CitationInsertResponse> {
        self.gated("AddCitations", EXECUTION_TIMEOUT, self.inner.add_citations(req))
            .await
    }

    async fn verify_claims(
        &self,
        answer: &str,
        citations: &[Citation],
    ) -> OrchestratorResult<Value> {
        self.gated(
            "VerifyClaimsActivity",
            EXECUTION_TIMEOUT,
            self.inner.verify_claims(answer, citations),
        )
        .await
    }

    async fn invoke_tool(
        &self,
        tool: &str,
        params: &BTreeMap<String, Value>,
        session_id: Option<&str>,
    ) -> OrchestratorResult<ToolExecution> {
        self.gated(
            "InvokeTool",
            EXECUTION_TIMEOUT,
            self.inner.invoke_tool(tool, params, session_id),
        )
        .await
    }

    async fn agent_loop_step(
        &self,
        req: LoopStepRequest,
    ) -> OrchestratorResult<LoopStepDecision> {
        self.gated("AgentLoopStep", EXECUTION_TIMEOUT, self.inner.agent_loop_step(req))
            .await
    }

    fn cost_for_tokens(&self, model: &str, tokens: u64) -> f64 {
        self.inner.cost_for_tokens(model, tokens)
    }

    async fn record_token_usage(
        &self,
        session_id: Option<&str>,
        model: &str,
        tokens: u64,
    ) -> OrchestratorResult<()> {
        tokio::time::timeout(
            EVENT_TIMEOUT,
            self.inner.record_token_usage(session_id, model, tokens),
        )
        .await
        .map_err(|_| OrchestratorError::Timeout {
            what: "RecordTokenUsage".to_string(),
            secs: EVENT_TIMEOUT.as_secs(),
        })?
    }

    async fn record_pattern_metrics(
        &self,
        pattern: &str,
        payload: Value,
    ) -> OrchestratorResult<()> {
        tokio::time::timeout(
            EVENT_TIMEOUT,
            self.inner.record_pattern_metrics(pattern, payload),
        )
        .await
        .map_err(|_| OrchestratorError::Timeout {
            what: "RecordPatternMetrics".to_string(),
            secs: EVENT_TIMEOUT.as_secs(),
        })?
    }

    async fn update_session_result(
        &self,
        session_id: &str,
        result: &str,
        tokens_used: u64,
    ) -> OrchestratorResult<()> {
        tokio::time::timeout(
            EVENT_TIMEOUT,
            self.inner.update_session_result(session_id, result, tokens_used),
        )
        .await
        .map_err(|_| OrchestratorError::Timeout {
            what: "UpdateSessionResult".to_string(),
            secs: EVENT_TIMEOUT.as_secs(),
        })?
    }

    async fn persist_agent_execution(
        &self,
        result: &AgentExecutionResult,
    ) -> OrchestratorResult<()> {
        tokio::time::timeout(EVENT_TIMEOUT, self.inner.persist_agent_execution(result))
            .await
            .map_err(|_| OrchestratorError::Timeout {
                what: "PersistAgentExecutionStandalone".to_string(),
                secs: EVENT_TIMEOUT.as_secs(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::inmemory::MockActivities;

    #[tokio::test]
    async fn test_passes_calls_through() {
        let mock = Arc::new(MockActivities::new());
        let gateway = RateLimitedGateway::new(mock, 100);

        let result = gateway
            .execute_agent(AgentRequest {
                agent_id: "x".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_rate_limits_bursts() {
        let mock = Arc::new(MockActivities::new());
        // One request per second: the second call must wait.
        let gateway = RateLimitedGateway::new(mock, 1);

        let started = std::time::Instant::now();
        for _ in 0..2 {
            gateway
                .execute_agent(AgentRequest {
                    agent_id: "x".into(),
                    ..Default::default()
                })
                .await
                .unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(500));
    }
}
