//! Swarm strategy: a supervisor over persistent agent loops.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{
    AgentExecutionResult, PlanGraph, TaskInput, TaskResult, TaskUpdateKind,
};
use crate::domain::ports::{DecomposeRequest, SynthesisRequest, TeamMember};
use crate::services::agent_loop::{AgentLoop, AgentLoopConfig, SUPERVISOR_ID};
use crate::services::budget::TokenMeter;
use crate::services::postprocess::assemble_metadata;

use super::helpers::{base_context, emit_update, select_model_tier};
use super::StrategyContext;

pub struct SwarmStrategy {
    ctx: Arc<StrategyContext>,
}

impl SwarmStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, input: TaskInput) -> TaskResult {
        match self.run_inner(input).await {
            Ok(result) => result,
            Err(err) => TaskResult::failure(err.to_string(), 0),
        }
    }

    fn spawn_agent(
        &self,
        join_set: &mut JoinSet<()>,
        completions: mpsc::Sender<(String, AgentExecutionResult)>,
        agent_id: String,
        task: String,
        roster: Vec<TeamMember>,
        context: BTreeMap<String, Value>,
        loop_config: AgentLoopConfig,
    ) {
        let ctx = self.ctx.clone();
        join_set.spawn(async move {
            let agent_loop = AgentLoop::new(
                ctx.activities.clone(),
                ctx.mailbox.clone(),
                ctx.workspace.clone(),
                ctx.events.clone(),
                loop_config,
            )
            .with_retry(ctx.retry.clone());
            let result = agent_loop
                .run(&ctx.workflow_id, &agent_id, &task, roster, context)
                .await;
            let _ = completions.send((agent_id, result)).await;
        });
    }

    #[allow(clippy::too_many_lines)]
    async fn run_inner(&self, input: TaskInput) -> OrchestratorResult<TaskResult> {
        let ctx = &self.ctx;
        if input.query.trim().is_empty() {
            return Err(OrchestratorError::InvalidPlan("empty query".to_string()));
        }
        let config = ctx.load_config().await;
        let swarm = config.swarm.clone();
        let mut context = base_context(&input);
        // Child agents must not recursively re-enter the swarm strategy.
        context.remove("force_swarm");

        emit_update(
            &ctx.events,
            &ctx.workflow_id,
            TaskUpdateKind::WorkflowStarted,
            json!({"strategy": "swarm", "query": input.query}),
        )
        .await;

        ctx.control.checkpoint("before_decomposition").await?;
        let plan = match &input.decomposition {
            Some(plan) => plan.clone(),
            None => {
                ctx.retry
                    .run("DecomposeTask", || {
                        ctx.activities.decompose_task(DecomposeRequest {
                            query: input.query.clone(),
                            context: context.clone(),
                            available_tools: Vec::new(),
                        })
                    })
                    .await?
            }
        };
        let _graph = PlanGraph::build(&plan)?;
        if plan.subtasks.is_empty() {
            return Err(OrchestratorError::InvalidPlan(
                "empty decomposition".to_string(),
            ));
        }
        let tier = select_model_tier(&context, plan.complexity, &config);

        // -- Roster & spawn ---------------------------------------------------
        let members: Vec<TeamMember> = plan
            .subtasks
            .iter()
            .take(swarm.max_agents)
            .enumerate()
            .map(|(i, subtask)| TeamMember {
                agent_id: format!("agent-{}-{}", i + 1, subtask.id),
                task: subtask.description.clone(),
            })
            .collect();
        let mut roster = members.clone();
        info!(agents = roster.len(), "spawning swarm");

        let loop_config = AgentLoopConfig {
            max_iterations: swarm.max_iterations_per_agent,
            workspace_max_entries: swarm.workspace_max_entries,
            workspace_snippet_chars: swarm.workspace_snippet_chars,
            message_cap: swarm.message_cap,
            transient_backoff_base: Duration::from_secs(1),
        };

        let mut join_set = JoinSet::new();
        let (completion_tx, mut completion_rx) = mpsc::channel(swarm.max_agents.max(1) * 2);
        for member in &members {
            self.spawn_agent(
                &mut join_set,
                completion_tx.clone(),
                member.agent_id.clone(),
                member.task.clone(),
                roster.clone(),
                context.clone(),
                loop_config.clone(),
            );
        }

        // -- Supervisor loop --------------------------------------------------
        // Wait on completions; in parallel poll the supervisor mailbox for
        // help requests. Each requester gets at most one dynamic spawn,
        // bounded by remaining capacity.
        let mut results: BTreeMap<String, AgentExecutionResult> = BTreeMap::new();
        let mut expected = members.len();
        let mut helped: HashSet<String> = HashSet::new();
        let mut poll = tokio::time::interval(Duration::from_secs(swarm.help_poll_secs.max(1)));
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(swarm.timeout_secs);

        while results.len() < expected {
            tokio::select! {
                maybe = completion_rx.recv() => {
                    let Some((agent_id, result)) = maybe else { break };
                    debug!(agent_id = %agent_id, success = result.success, "agent completed");
                    results.insert(agent_id, result);
                    if ctx.control.is_canceled() {
                        return Err(OrchestratorError::Canceled);
                    }
                }
                _ = poll.tick() => {
                    let help_requests = ctx
                        .mailbox
                        .fetch(SUPERVISOR_ID)
                        .await
                        .unwrap_or_default();
                    for message in help_requests {
                        if !message.is_help_request() || !helped.insert(message.from.clone()) {
                            continue;
                        }
                        if expected >= swarm.max_agents {
                            debug!(from = %message.from, "help request denied: at capacity");
                            continue;
                        }
                        let reason = message
                            .payload
                            .get("reason")
                            .and_then(Value::as_str)
                            .unwrap_or("assist the swarm")
                            .to_string();
                        let helper_id = format!("agent-{}-helper", expected + 1);
                        info!(helper = %helper_id, from = %message.from, "spawning helper");
                        roster.push(TeamMember {
                            agent_id: helper_id.clone(),
                            task: reason.clone(),
                        });
                        expected += 1;
                        self.spawn_agent(
                            &mut join_set,
                            completion_tx.clone(),
                            helper_id,
                            format!("Help {}: {reason}", message.from),
                            roster.clone(),
                            context.clone(),
                            loop_config.clone(),
                        );
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    warn!(
                        collected = results.len(),
                        expected,
                        "swarm timed out; agents without results count as failed"
                    );
                    break;
                }
            }
        }
        join_set.shutdown().await;

        // Agents that never reported become failed rows so the collection
        // stays complete.
        for member in &roster {
            if !results.contains_key(&member.agent_id) {
                results.insert(
                    member.agent_id.clone(),
                    AgentExecutionResult::failed(member.agent_id.clone(), "swarm timeout"),
                );
            }
        }

        // -- Deterministic collection: sorted agent-id order ------------------
        // BTreeMap iteration is byte-wise ordered by key.
        let ordered: Vec<AgentExecutionResult> = results.into_values().collect();
        let mut meter = TokenMeter::new();
        meter.add_results(&ordered);

        let successes: Vec<&AgentExecutionResult> =
            ordered.iter().filter(|r| r.success).collect();
        if successes.is_empty() {
            warn!(total = ordered.len(), "all swarm agents failed");
            let mut failure = TaskResult::failure(
                format!("All {} agents failed", ordered.len()),
                meter.total(),
            );
            failure.metadata =
                assemble_metadata(&ordered, &context, tier.as_str(), &config, &*ctx.activities);
            return Ok(failure);
        }

        // -- Synthesis (bypassed for a lone success) --------------------------
        ctx.control.checkpoint("before_synthesis").await?;
        let mut trail = vec!["swarm".to_string()];
        let final_text = if successes.len() == 1 {
            trail.push("single_result_bypass".to_string());
            successes[0].response.clone()
        } else {
            trail.push("synthesis_llm".to_string());
            let request = SynthesisRequest {
                query: input.query.clone(),
                agent_results: ordered.clone(),
                context: context.clone(),
                collected_citations: Vec::new(),
                parent_workflow_id: input.parent_workflow_id.clone(),
            };
            match ctx
                .retry
                .run("SynthesizeResultsLLM", || {
                    ctx.activities.synthesize_results(request.clone())
                })
                .await
            {
                Ok(response) => {
                    meter.add(response.tokens_used);
                    response.final_result
                }
                Err(err) => {
                    warn!(error = %err, "swarm synthesis failed, joining agent responses");
                    successes
                        .iter()
                        .map(|r| r.response.as_str())
                        .collect::<Vec<_>>()
                        .join("\n\n")
                }
            }
        };

        ctx.control.checkpoint("before_completion").await?;
        let mut metadata =
            assemble_metadata(&ordered, &context, tier.as_str(), &config, &*ctx.activities);
        metadata.insert("patterns_used".into(), json!(trail));
        metadata.insert("swarm_size".into(), json!(expected));
        metadata.insert("helpers_spawned".into(), json!(expected - members.len()));
        metadata.insert("tokens_used".into(), json!(meter.total()));

        let _ = ctx
            .events
            .emit(crate::domain::models::TaskUpdate::final_output(
                ctx.workflow_id.clone(),
                &final_text,
                meter.total(),
                metadata.get("model").and_then(Value::as_str).unwrap_or(""),
            ))
            .await;
        emit_update(
            &ctx.events,
            &ctx.workflow_id,
            TaskUpdateKind::WorkflowCompleted,
            json!({"tokens_used": meter.total()}),
        )
        .await;

        let mut result = TaskResult::ok(final_text, meter.total());
        result.metadata = metadata;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Decomposition, Subtask, WorkflowConfig};
    use crate::infrastructure::inmemory::{MockActivities, RecordingEventSink};
    use crate::services::retry::RetryPolicy;

    fn swarm_input(subtask_ids: &[&str]) -> TaskInput {
        let mut input = TaskInput::new("team effort");
        input.decomposition = Some(Decomposition {
            complexity: 0.6,
            subtasks: subtask_ids
                .iter()
                .map(|id| Subtask::new(*id, format!("work on {id}")))
                .collect(),
            ..Default::default()
        });
        input
    }

    fn fast_poll_config() -> WorkflowConfig {
        let mut config = WorkflowConfig::default();
        config.swarm.help_poll_secs = 1;
        config.swarm.max_iterations_per_agent = 3;
        config
    }

    fn make_ctx(activities: Arc<MockActivities>) -> Arc<StrategyContext> {
        let events = Arc::new(RecordingEventSink::new());
        Arc::new(StrategyContext::new(activities, events).with_retry(RetryPolicy::none()))
    }

    #[tokio::test]
    async fn test_results_collected_in_sorted_agent_id_order() {
        let activities = Arc::new(MockActivities::new());
        activities.set_workflow_config(fast_poll_config()).await;
        activities
            .set_loop_decisions(vec![loop_done("finding")])
            .await;
        activities.set_synthesis_response("merged findings", 30).await;
        let ctx = make_ctx(activities);

        let result = SwarmStrategy::new(ctx)
            .run(swarm_input(&["alpha", "beta", "gamma"]))
            .await;

        assert!(result.success);
        let summaries = result.metadata.get("agent_summaries").unwrap().as_array().unwrap();
        let ids: Vec<&str> = summaries
            .iter()
            .map(|s| s["agent_id"].as_str().unwrap())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_all_agents_failed() {
        let activities = Arc::new(MockActivities::new());
        activities.set_workflow_config(fast_poll_config()).await;
        // Every loop step fails its tool three times in a row.
        activities.fail_tool("search", "invalid input").await;
        activities
            .set_loop_decisions(vec![
                loop_tool("search"),
                loop_tool("search"),
                loop_tool("search"),
            ])
            .await;
        let ctx = make_ctx(activities.clone());

        let result = SwarmStrategy::new(ctx)
            .run(swarm_input(&["a", "b", "c"]))
            .await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("All 3 agents failed"));
        assert_eq!(activities.synthesis_calls().await, 0);
    }

    #[tokio::test]
    async fn test_single_success_bypasses_synthesis() {
        let activities = Arc::new(MockActivities::new());
        activities.set_workflow_config(fast_poll_config()).await;
        activities
            .set_loop_decisions(vec![loop_done("solo answer")])
            .await;
        let ctx = make_ctx(activities.clone());

        let result = SwarmStrategy::new(ctx).run(swarm_input(&["only"])).await;

        assert!(result.success);
        assert_eq!(result.result, "solo answer");
        assert_eq!(activities.synthesis_calls().await, 0);
    }

    #[tokio::test]
    async fn test_force_swarm_stripped_from_context() {
        let activities = Arc::new(MockActivities::new());
        activities.set_workflow_config(fast_poll_config()).await;
        activities
            .set_loop_decisions(vec![loop_done("done")])
            .await;
        let ctx = make_ctx(activities.clone());

        let input = swarm_input(&["a"]).with_context("force_swarm", json!(true));
        SwarmStrategy::new(ctx).run(input).await;

        let step = activities.loop_request(0).await.unwrap();
        assert!(!step.context.contains_key("force_swarm"));
    }

    fn loop_done(response: &str) -> crate::domain::ports::LoopStepDecision {
        crate::domain::ports::LoopStepDecision {
            action: "done".into(),
            response: response.into(),
            tokens_used: 5,
            ..Default::default()
        }
    }

    fn loop_tool(tool: &str) -> crate::domain::ports::LoopStepDecision {
        let mut params = BTreeMap::new();
        params.insert("tool".to_string(), json!(tool));
        crate::domain::ports::LoopStepDecision {
            action: "tool_call".into(),
            params,
            tokens_used: 5,
            ..Default::default()
        }
    }
}
