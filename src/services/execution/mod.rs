//! Execution patterns: parallel, sequential, and dependency-respecting
//! hybrid executors over a list of plan subtasks.
//!
//! All three share the same inputs and the same determinism contract:
//! results come back in the original task-list order regardless of
//! completion order, and the token total sums only observed usage.

mod hybrid;
mod numeric;
mod parallel;
mod sequential;

pub use hybrid::HybridPattern;
pub use numeric::extract_numeric_value;
pub use parallel::ParallelPattern;
pub use sequential::SequentialPattern;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::domain::models::{
    AgentExecutionResult, ConversationMessage, Subtask, TaskUpdate, TaskUpdateKind,
};
use crate::domain::ports::{Activities, AgentRequest, EventSink};

use super::retry::RetryPolicy;

/// A subtask adapted for pattern execution with its resolved role.
#[derive(Debug, Clone)]
pub struct PatternTask {
    pub subtask: Subtask,
    pub role: String,
}

impl PatternTask {
    pub fn new(subtask: Subtask, role: impl Into<String>) -> Self {
        Self {
            subtask,
            role: role.into(),
        }
    }
}

/// Pattern configuration derived from the workflow config and the plan.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Executor-level concurrency cap (parallel / hybrid).
    pub max_concurrency: usize,
    /// Plan-level cap; 0 = unbounded. The effective cap is the tighter of
    /// the two.
    pub concurrency_limit: usize,
    pub emit_events: bool,
    /// Context merged into every task's agent request.
    pub shared_context: BTreeMap<String, Value>,
    /// Sequential: thread the prior response into the next task.
    pub pass_previous_results: bool,
    /// Sequential: promote a parsed numeric from the prior response.
    pub extract_numeric_values: bool,
    /// Clear stale tool parameters on dependent tasks.
    pub clear_dependent_tool_params: bool,
    /// Hybrid: per-dependency wait deadline.
    pub dependency_wait_timeout: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            concurrency_limit: 0,
            emit_events: true,
            shared_context: BTreeMap::new(),
            pass_previous_results: true,
            extract_numeric_values: false,
            clear_dependent_tool_params: true,
            dependency_wait_timeout: Duration::from_secs(300),
        }
    }
}

impl ExecutionConfig {
    /// The tighter of the executor cap and the plan cap, never zero.
    pub fn effective_concurrency(&self, task_count: usize) -> usize {
        let mut cap = if self.max_concurrency == 0 {
            task_count.max(1)
        } else {
            self.max_concurrency
        };
        if self.concurrency_limit > 0 {
            cap = cap.min(self.concurrency_limit);
        }
        cap.max(1)
    }
}

/// Per-invocation identifiers and budget shared by all patterns.
#[derive(Debug, Clone, Default)]
pub struct ExecutionInputs {
    pub workflow_id: String,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub parent_workflow_id: Option<String>,
    pub history: Vec<ConversationMessage>,
    pub per_agent_token_budget: u64,
    pub model_tier: String,
}

/// Output of any execution pattern.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    /// One entry per input task, in the original task-list order.
    pub results: Vec<AgentExecutionResult>,
    /// Sum of observed per-task token counts; missing fields count as zero.
    pub total_tokens: u64,
}

impl ExecutionOutcome {
    pub fn from_ordered(results: Vec<AgentExecutionResult>) -> Self {
        let total_tokens = results.iter().map(|r| r.tokens_used).fold(0u64, u64::saturating_add);
        Self {
            results,
            total_tokens,
        }
    }
}

/// Dispatch one task to the `ExecuteAgent` activity.
///
/// Activity errors never escape: a failed dispatch becomes a
/// `success=false` result so the pattern always returns a full list.
pub(crate) async fn dispatch_task(
    activities: &Arc<dyn Activities>,
    retry: &RetryPolicy,
    task: &PatternTask,
    extra_context: BTreeMap<String, Value>,
    inputs: &ExecutionInputs,
    config: &ExecutionConfig,
    clear_tool_params: bool,
) -> AgentExecutionResult {
    let mut context = config.shared_context.clone();
    for (key, value) in extra_context {
        context.insert(key, value);
    }
    context.insert("role".into(), Value::String(task.role.clone()));
    context.insert(
        "model_tier".into(),
        Value::String(inputs.model_tier.clone()),
    );
    context.insert(
        "token_budget".into(),
        Value::from(inputs.per_agent_token_budget),
    );
    if let Some(persona) = &task.subtask.persona {
        context.insert("persona".into(), Value::String(persona.clone()));
    }

    let tool_parameters = if clear_tool_params {
        BTreeMap::new()
    } else {
        task.subtask.tool_parameters.clone()
    };

    let request = AgentRequest {
        query: task.subtask.description.clone(),
        agent_id: task.subtask.id.clone(),
        context,
        mode: task.role.clone(),
        session_id: inputs.session_id.clone(),
        history: inputs.history.clone(),
        suggested_tools: task.subtask.suggested_tools.clone(),
        tool_parameters,
        parent_workflow_id: inputs.parent_workflow_id.clone(),
    };

    let agent_id = request.agent_id.clone();
    match retry
        .run("ExecuteAgent", || activities.execute_agent(request.clone()))
        .await
    {
        Ok(result) => result,
        Err(err) => AgentExecutionResult::failed(agent_id, err.to_string()),
    }
}

/// Emit an agent lifecycle event; emission failures are dropped.
pub(crate) async fn emit_agent_event(
    events: &Arc<dyn EventSink>,
    config: &ExecutionConfig,
    inputs: &ExecutionInputs,
    kind: TaskUpdateKind,
    agent_id: &str,
    payload: Value,
) {
    if !config.emit_events {
        return;
    }
    let event = TaskUpdate::new(inputs.workflow_id.clone(), kind)
        .with_agent(agent_id)
        .with_payload(payload);
    let _ = events.emit(event).await;
}
