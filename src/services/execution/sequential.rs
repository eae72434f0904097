//! Sequential execution pattern: in-order pass-forward of prior outputs.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::domain::models::TaskUpdateKind;
use crate::domain::ports::{Activities, EventSink};
use crate::services::retry::RetryPolicy;

use super::{
    dispatch_task, emit_agent_event, extract_numeric_value, ExecutionConfig, ExecutionInputs,
    ExecutionOutcome, PatternTask,
};

/// Executes tasks in the given order, threading each task's response into
/// the next when `pass_previous_results` is set. When
/// `extract_numeric_values` is set, a numeric parsed from the prior response
/// is promoted as `prev_number`. When `clear_dependent_tool_params` is set,
/// tool parameters on non-initial tasks are cleared so the agent re-derives
/// them from context instead of stale plan literals.
pub struct SequentialPattern {
    activities: Arc<dyn Activities>,
    events: Arc<dyn EventSink>,
    retry: RetryPolicy,
}

impl SequentialPattern {
    pub fn new(activities: Arc<dyn Activities>, events: Arc<dyn EventSink>) -> Self {
        Self {
            activities,
            events,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn execute(
        &self,
        tasks: Vec<PatternTask>,
        inputs: &ExecutionInputs,
        config: &ExecutionConfig,
    ) -> ExecutionOutcome {
        let mut results = Vec::with_capacity(tasks.len());
        let mut previous_response: Option<String> = None;

        for (index, task) in tasks.into_iter().enumerate() {
            let mut extra: BTreeMap<String, Value> = BTreeMap::new();
            if config.pass_previous_results {
                if let Some(prev) = &previous_response {
                    extra.insert("previous_result".into(), Value::String(prev.clone()));
                    if config.extract_numeric_values {
                        if let Some(number) = extract_numeric_value(prev) {
                            extra.insert("prev_number".into(), json!(number));
                        }
                    }
                }
            }

            let clear_params = config.clear_dependent_tool_params && index > 0;

            emit_agent_event(
                &self.events,
                config,
                inputs,
                TaskUpdateKind::AgentStarted,
                &task.subtask.id,
                json!({"position": index}),
            )
            .await;

            let result = dispatch_task(
                &self.activities,
                &self.retry,
                &task,
                extra,
                inputs,
                config,
                clear_params,
            )
            .await;

            emit_agent_event(
                &self.events,
                config,
                inputs,
                TaskUpdateKind::AgentCompleted,
                &task.subtask.id,
                json!({"success": result.success, "tokens_used": result.tokens_used}),
            )
            .await;

            if result.success {
                previous_response = Some(result.response.clone());
            } else {
                debug!(agent_id = %result.agent_id, "sequential task failed, not threading output");
            }
            results.push(result);
        }

        ExecutionOutcome::from_ordered(results)
    }
}
