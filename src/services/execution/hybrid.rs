//! Hybrid execution pattern: dependency-respecting scheduler over a task DAG.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{watch, RwLock, Semaphore};
use tracing::debug;

use crate::domain::models::{AgentExecutionResult, TaskUpdateKind};
use crate::domain::ports::{Activities, EventSink};
use crate::services::retry::RetryPolicy;

use super::{
    dispatch_task, emit_agent_event, ExecutionConfig, ExecutionInputs, ExecutionOutcome,
    PatternTask,
};

/// Outcome of waiting on one task's dependencies.
enum DependencyWait {
    /// All dependencies completed successfully; their responses, keyed by id.
    Ready(BTreeMap<String, String>),
    /// A dependency finished with `success=false`.
    DependencyFailed(String),
    /// The wait deadline elapsed first.
    TimedOut,
}

/// Schedules a DAG of tasks: a task dispatches once every declared
/// dependency has completed successfully, with dependency results injected
/// into its context. Ready tasks run concurrently under the effective cap.
///
/// The result list matches the original task-list order, not completion
/// order; replay would otherwise observe nondeterministic map iteration.
pub struct HybridPattern {
    activities: Arc<dyn Activities>,
    events: Arc<dyn EventSink>,
    retry: RetryPolicy,
}

impl HybridPattern {
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
        debug!(tasks = tasks.len(), cap, "hybrid pattern dispatch");
        let semaphore = Arc::new(Semaphore::new(cap));

        // Completion board shared by all task futures. Writers insert their
        // result and bump the generation counter; waiters re-check on every
        // bump.
        let board: Arc<RwLock<HashMap<String, AgentExecutionResult>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let (generation_tx, generation_rx) = watch::channel(0u64);
        let generation_tx = Arc::new(generation_tx);

        let mut handles = Vec::with_capacity(tasks.len());
        for task in tasks {
            let semaphore = semaphore.clone();
            let activities = self.activities.clone();
            let events = self.events.clone();
            let retry = self.retry.clone();
            let inputs = inputs.clone();
            let config = config.clone();
            let board = board.clone();
            let generation_tx = generation_tx.clone();
            let generation_rx = generation_rx.clone();

            handles.push(tokio::spawn(async move {
                let result = run_task(
                    task,
                    &activities,
                    &events,
                    &retry,
                    &inputs,
                    &config,
                    &semaphore,
                    &board,
                    generation_rx,
                )
                .await;

                let mut guard = board.write().await;
                guard.insert(result.agent_id.clone(), result.clone());
                drop(guard);
                generation_tx.send_modify(|g| *g += 1);

                result
            }));
        }

        // Collect in spawn order: output order equals input order.
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

#[allow(clippy::too_many_arguments)]
async fn run_task(
    task: PatternTask,
    activities: &Arc<dyn Activities>,
    events: &Arc<dyn EventSink>,
    retry: &RetryPolicy,
    inputs: &ExecutionInputs,
    config: &ExecutionConfig,
    semaphore: &Arc<Semaphore>,
    board: &Arc<RwLock<HashMap<String, AgentExecutionResult>>>,
    generation_rx: watch::Receiver<u64>,
) -> AgentExecutionResult {
    let has_dependencies = !task.subtask.dependencies.is_empty();

    let dependency_results = if has_dependencies {
        match wait_for_dependencies(
            &task,
            board,
            generation_rx,
            config.dependency_wait_timeout,
        )
        .await
        {
            DependencyWait::Ready(results) => Some(results),
            DependencyWait::DependencyFailed(dep) => {
                return AgentExecutionResult::failed(
                    task.subtask.id.clone(),
                    format!("dependency {dep} failed"),
                );
            }
            DependencyWait::TimedOut => {
                return AgentExecutionResult::failed(
                    task.subtask.id.clone(),
                    format!(
                        "timed out after {}s waiting for dependencies",
                        config.dependency_wait_timeout.as_secs()
                    ),
                );
            }
        }
    } else {
        None
    };

    let _permit = semaphore.clone().acquire_owned().await;

    emit_agent_event(
        events,
        config,
        inputs,
        TaskUpdateKind::AgentStarted,
        &task.subtask.id,
        json!({"description": task.subtask.description}),
    )
    .await;

    let mut extra: BTreeMap<String, Value> = BTreeMap::new();
    let mut clear_params = false;
    if let Some(deps) = dependency_results {
        // BTreeMap renders dependency results in sorted-id order.
        extra.insert("dependency_results".into(), json!(deps));
        clear_params = config.clear_dependent_tool_params;
    }

    let result = dispatch_task(
        activities,
        retry,
        &task,
        extra,
        inputs,
        config,
        clear_params,
    )
    .await;

    emit_agent_event(
        events,
        config,
        inputs,
        TaskUpdateKind::AgentCompleted,
        &task.subtask.id,
        json!({"success": result.success, "tokens_used": result.tokens_used}),
    )
    .await;

    result
}

/// Block until every dependency of `task` has a successful result on the
/// board, a dependency fails, or the deadline elapses.
async fn wait_for_dependencies(
    task: &PatternTask,
    board: &Arc<RwLock<HashMap<String, AgentExecutionResult>>>,
    mut generation_rx: watch::Receiver<u64>,
    deadline: Duration,
) -> DependencyWait {
    let wait = async {
        loop {
            {
                let guard = board.read().await;
                let mut ready = BTreeMap::new();
                let mut missing = false;
                for dep in &task.subtask.dependencies {
                    match guard.get(dep) {
                        Some(result) if result.success => {
                            ready.insert(dep.clone(), result.response.clone());
                        }
                        Some(_) => {
                            return DependencyWait::DependencyFailed(dep.clone());
                        }
                        None => {
                            missing = true;
                            break;
                        }
                    }
                }
                if !missing {
                    return DependencyWait::Ready(ready);
                }
            }
            if generation_rx.changed().await.is_err() {
                // All writers gone without satisfying us; treat as timeout.
                return DependencyWait::TimedOut;
            }
        }
    };

    match tokio::time::timeout(deadline, wait).await {
        Ok(outcome) => outcome,
        Err(_) => DependencyWait::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Subtask;
    use crate::infrastructure::inmemory::{MockActivities, NullEventSink};

    fn task(id: &str, deps: &[&str]) -> PatternTask {
        PatternTask::new(
            Subtask::new(id, format!("task {id}"))
                .with_dependencies(deps.iter().map(|s| (*s).to_string()).collect()),
            "generalist",
        )
    }

    #[tokio::test]
    async fn test_dependent_runs_after_dependencies() {
        let activities = Arc::new(MockActivities::new());
        activities.set_agent_delay_ms("a", 40).await;
        activities.set_agent_delay_ms("b", 20).await;

        let pattern = HybridPattern::new(activities.clone(), Arc::new(NullEventSink));
        let outcome = pattern
            .execute(
                vec![task("a", &[]), task("b", &[]), task("c", &["a", "b"])],
                &ExecutionInputs::default(),
                &ExecutionConfig::default(),
            )
            .await;

        // Output order is input order.
        let ids: Vec<&str> = outcome.results.iter().map(|r| r.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(outcome.results.iter().all(|r| r.success));

        // "c" started only after both dependencies finished.
        let order = activities.dispatch_order().await;
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("c") > pos("a"));
        assert!(pos("c") > pos("b"));

        // The dependent saw both dependency responses.
        let request = activities.request_for("c").await.unwrap();
        let deps = request.context.get("dependency_results").unwrap();
        assert!(deps.get("a").is_some());
        assert!(deps.get("b").is_some());
    }

    #[tokio::test]
    async fn test_failed_dependency_fails_dependent() {
        let activities = Arc::new(MockActivities::new());
        activities.fail_agent("a", "boom").await;

        let pattern = HybridPattern::new(activities.clone(), Arc::new(NullEventSink));
        let outcome = pattern
            .execute(
                vec![task("a", &[]), task("b", &["a"])],
                &ExecutionInputs::default(),
                &ExecutionConfig::default(),
            )
            .await;

        assert!(!outcome.results[0].success);
        assert!(!outcome.results[1].success);
        assert!(outcome.results[1]
            .error
            .as_deref()
            .unwrap()
            .contains("dependency a failed"));
        // The dependent was never dispatched.
        assert!(activities.request_for("b").await.is_none());
    }

    #[tokio::test]
    async fn test_dependency_wait_timeout() {
        let activities = Arc::new(MockActivities::new());
        activities.set_agent_delay_ms("a", 500).await;

        let pattern = HybridPattern::new(activities, Arc::new(NullEventSink));
        let config = ExecutionConfig {
            dependency_wait_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let outcome = pattern
            .execute(
                vec![task("a", &[]), task("b", &["a"])],
                &ExecutionInputs::default(),
                &config,
            )
            .await;

        // "a" eventually succeeds, but "b" timed out waiting and is failed,
        // not retried.
        assert!(outcome.results[0].success);
        assert!(!outcome.results[1].success);
        assert!(outcome.results[1].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_diamond_order_stable_under_concurrency() {
        let activities = Arc::new(MockActivities::new());
        activities.set_agent_delay_ms("left", 50).await;
        activities.set_agent_delay_ms("right", 10).await;

        let pattern = HybridPattern::new(activities, Arc::new(NullEventSink));
        let outcome = pattern
            .execute(
                vec![
                    task("root", &[]),
                    task("left", &["root"]),
                    task("right", &["root"]),
                    task("join", &["left", "right"]),
                ],
                &ExecutionInputs::default(),
                &ExecutionConfig::default(),
            )
            .await;

        let ids: Vec<&str> = outcome.results.iter().map(|r| r.agent_id.as_str()).collect();
        assert_eq!(ids, vec!["root", "left", "right", "join"]);
    }
}
