//! Parallel execution pattern: bounded fan-out over independent tasks.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::domain::models::{AgentExecutionResult, TaskUpdateKind};
use crate::domain::ports::{Activities, EventSink};
use crate::services::retry::RetryPolicy;

use super::{
    dispatch_task, emit_agent_event, ExecutionConfig, ExecutionInputs, ExecutionOutcome,
    PatternTask,
};

/// Dispatches every task as a concurrent activity, capped by the effective
/// concurrency limit, and awaits all of them.
///
/// Results come back in the original task-list order so downstream logic
/// and replay stay deterministic; per-task failures are `success=false`
/// rows, never errors.
pub struct ParallelPattern {
    activities: Arc<dyn Activities>,
    events: Arc<dyn EventSink>,
    retry: RetryPolicy,
}

impl ParallelPattern {
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
        if tasks.is_empty() {
            return ExecutionOutcome::default();
        }

        let cap = config.effective_concurrency(tasks.len());
        debug!(tasks = tasks.len(), cap, "parallel pattern dispatch");
        let semaphore = Arc::new(Semaphore::new(cap));

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let semaphore = semaphore.clone();
            let activities = self.activities.clone();
            let events = self.events.clone();
            let retry = self.retry.clone();
            let inputs = inputs.clone();
            let config = config.clone();

            handles.push(tokio::spawn(async move {
                // Semaphore closes only on drop, so acquisition cannot fail here.
                let _permit = semaphore.acquire_owned().await;

                emit_agent_event(
                    &events,
                    &config,
                    &inputs,
                    TaskUpdateKind::AgentStarted,
                    &task.subtask.id,
                    json!({"description": task.subtask.description}),
                )
                .await;

                let result = dispatch_task(
                    &activities,
                    &retry,
                    &task,
                    BTreeMap::new(),
                    &inputs,
                    &config,
                    false,
                )
                .await;

                emit_agent_event(
                    &events,
                    &config,
                    &inputs,
                    TaskUpdateKind::AgentCompleted,
                    &task.subtask.id,
                    json!({"success": result.success, "tokens_used": result.tokens_used}),
                )
                .await;

                result
            }));
        }

        // Awaiting handles in spawn order keeps the result list in the
        // original task-list order.
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(err) => results.push(AgentExecutionResult::failed(
                    "unknown",
                    format!("task join error: {err}"),
                )),
            }
        }

        ExecutionOutcome::from_ordered(results)
    }
}
