//! Wide-research strategy: facet fan-out with channel-based collection.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{
    AgentExecutionResult, PlanGraph, TaskInput, TaskResult, TaskUpdateKind,
};
use crate::domain::ports::{AgentRequest, DecomposeRequest, SynthesisRequest};
use crate::services::budget::TokenMeter;
use crate::services::postprocess::assemble_metadata;
use crate::services::reasoning::parse_confidence;

use super::helpers::{base_context, emit_update, select_model_tier};
use super::StrategyContext;

pub struct WideResearchStrategy {
    ctx: Arc<StrategyContext>,
}

impl WideResearchStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, input: TaskInput) -> TaskResult {
        match self.run_inner(input).await {
            Ok(result) => result,
            Err(err) => TaskResult::failure(err.to_string(), 0),
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn run_inner(&self, input: TaskInput) -> OrchestratorResult<TaskResult> {
        let ctx = &self.ctx;
        if input.query.trim().is_empty() {
            return Err(OrchestratorError::InvalidPlan("empty query".to_string()));
        }
        let config = ctx.load_config().await;
        let wide = &config.wide_research;
        let context = base_context(&input);

        emit_update(
            &ctx.events,
            &ctx.workflow_id,
            TaskUpdateKind::WorkflowStarted,
            json!({"strategy": "wide_research", "query": input.query}),
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
        let mut meter = TokenMeter::new();

        // -- Fan out facets, every result lands on the channel --------------
        ctx.control.checkpoint("before_execution").await?;
        let expected = plan.subtasks.len();
        let semaphore = Arc::new(Semaphore::new(wide.max_parallel_agents.max(1)));
        let (result_tx, mut result_rx) = mpsc::channel::<(usize, AgentExecutionResult)>(expected);

        for (index, subtask) in plan.subtasks.iter().enumerate() {
            let activities = ctx.activities.clone();
            let retry = ctx.retry.clone();
            let semaphore = semaphore.clone();
            let result_tx = result_tx.clone();
            let mut facet_context = context.clone();
            facet_context.insert("role".into(), Value::String("researcher".into()));
            facet_context.insert(
                "model_tier".into(),
                Value::String(tier.as_str().to_string()),
            );
            let request = AgentRequest {
                query: subtask.description.clone(),
                agent_id: subtask.id.clone(),
                context: facet_context,
                mode: "researcher".to_string(),
                session_id: input.session_id.clone(),
                history: input.history.clone(),
                suggested_tools: subtask.suggested_tools.clone(),
                tool_parameters: subtask.tool_parameters.clone(),
                parent_workflow_id: Some(ctx.workflow_id.clone()),
            };

            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let agent_id = request.agent_id.clone();
                let result = match retry
                    .run("ExecuteAgent", || activities.execute_agent(request.clone()))
                    .await
                {
                    Ok(result) => result,
                    Err(err) => AgentExecutionResult::failed(agent_id, err.to_string()),
                };
                let _ = result_tx.send((index, result)).await;
            });
        }
        drop(result_tx);

        // -- Driver: collect exactly `expected` results ----------------------
        let mut slots: Vec<Option<AgentExecutionResult>> = vec![None; expected];
        let mut received = 0usize;
        while received < expected {
            let Some((index, result)) = result_rx.recv().await else {
                break;
            };
            if ctx.control.is_canceled() {
                return Err(OrchestratorError::Canceled);
            }
            received += 1;
            meter.add_result(&result);
            emit_update(
                &ctx.events,
                &ctx.workflow_id,
                TaskUpdateKind::Progress,
                json!({
                    "completed": received,
                    "expected": expected,
                    "agent_id": result.agent_id.clone(),
                    "success": result.success,
                }),
            )
            .await;
            slots[index] = Some(result);
        }
        let results: Vec<AgentExecutionResult> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    AgentExecutionResult::failed(
                        plan.subtasks[index].id.clone(),
                        "agent task dropped without result",
                    )
                })
            })
            .collect();

        let successes = results.iter().filter(|r| r.success).count();
        if successes == 0 {
            warn!(total = results.len(), "wide research: every facet failed");
            let mut failure = TaskResult::failure(
                format!("All {} agents failed", results.len()),
                meter.total(),
            );
            failure.metadata =
                assemble_metadata(&results, &context, tier.as_str(), &config, &*ctx.activities);
            return Ok(failure);
        }

        // -- Synthesis --------------------------------------------------------
        ctx.control.checkpoint("before_synthesis").await?;
        let request = SynthesisRequest {
            query: input.query.clone(),
            agent_results: results.clone(),
            context: context.clone(),
            collected_citations: Vec::new(),
            parent_workflow_id: input.parent_workflow_id.clone(),
        };
        let mut final_text = match ctx
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
                warn!(error = %err, "synthesis failed, joining facet responses");
                results
                    .iter()
                    .filter(|r| r.success)
                    .map(|r| r.response.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }
        };

        // -- Cross-verification ----------------------------------------------
        let mut metadata_extra: BTreeMap<String, Value> = BTreeMap::new();
        if wide.enable_cross_verification && successes >= 2 {
            debug!("running cross-verification over the synthesis");
            let verify_request = AgentRequest {
                query: format!(
                    "Critique this synthesis against the facet findings. \
                     Note contradictions and unsupported claims.\n\nSynthesis:\n{final_text}"
                ),
                agent_id: "cross_verifier".to_string(),
                context: context.clone(),
                mode: "verifier".to_string(),
                session_id: input.session_id.clone(),
                ..Default::default()
            };
            match ctx
                .retry
                .run("ExecuteAgent", || {
                    ctx.activities.execute_agent(verify_request.clone())
                })
                .await
            {
                Ok(critique) if critique.success => {
                    meter.add_result(&critique);
                    metadata_extra.insert(
                        "cross_verification_confidence".into(),
                        json!(parse_confidence(&critique.response).unwrap_or(0.5)),
                    );
                    final_text =
                        format!("{final_text}\n\n## Verification Notes\n{}", critique.response);
                }
                _ => {
                    metadata_extra.insert("cross_verification".into(), json!("failed"));
                }
            }
        }

        ctx.control.checkpoint("before_completion").await?;
        let mut metadata =
            assemble_metadata(&results, &context, tier.as_str(), &config, &*ctx.activities);
        metadata.insert("patterns_used".into(), json!(["wide_fanout"]));
        metadata.insert("facets".into(), json!(expected));
        metadata.extend(metadata_extra);
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
    use crate::domain::models::{Decomposition, Subtask};
    use crate::infrastructure::inmemory::{MockActivities, RecordingEventSink};
    use crate::services::retry::RetryPolicy;

    fn input_with_facets(facets: &[&str]) -> TaskInput {
        let mut input = TaskInput::new("broad research");
        input.decomposition = Some(Decomposition {
            complexity: 0.6,
            subtasks: facets
                .iter()
                .map(|id| Subtask::new(*id, format!("facet {id}")))
                .collect(),
            ..Default::default()
        });
        input
    }

    #[tokio::test]
    async fn test_collects_all_facets_with_progress() {
        let activities = Arc::new(MockActivities::new());
        activities.set_synthesis_response("wide synthesis", 20).await;
        activities
            .set_agent_response("cross_verifier", "checks out. Confidence: 0.8")
            .await;
        let events = Arc::new(RecordingEventSink::new());
        let ctx = Arc::new(
            StrategyContext::new(activities, events.clone()).with_retry(RetryPolicy::none()),
        );

        let result = WideResearchStrategy::new(ctx)
            .run(input_with_facets(&["f1", "f2", "f3"]))
            .await;

        assert!(result.success);
        assert!(result.result.contains("wide synthesis"));
        assert!(result.result.contains("## Verification Notes"));
        assert_eq!(result.metadata.get("facets"), Some(&json!(3)));
        assert_eq!(events.count_kind(TaskUpdateKind::Progress).await, 3);
    }

    #[tokio::test]
    async fn test_all_failed_short_circuits_synthesis() {
        let activities = Arc::new(MockActivities::new());
        for id in ["f1", "f2", "f3"] {
            activities.fail_agent(id, "boom").await;
        }
        let events = Arc::new(RecordingEventSink::new());
        let ctx = Arc::new(
            StrategyContext::new(activities.clone(), events).with_retry(RetryPolicy::none()),
        );

        let result = WideResearchStrategy::new(ctx)
            .run(input_with_facets(&["f1", "f2", "f3"]))
            .await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("All 3 agents failed"));
        assert_eq!(activities.synthesis_calls().await, 0);
    }

    #[tokio::test]
    async fn test_single_success_skips_cross_verification() {
        let activities = Arc::new(MockActivities::new());
        activities.fail_agent("f2", "boom").await;
        activities.set_synthesis_response("partial synthesis", 15).await;
        let events = Arc::new(RecordingEventSink::new());
        let ctx = Arc::new(
            StrategyContext::new(activities.clone(), events).with_retry(RetryPolicy::none()),
        );

        let result = WideResearchStrategy::new(ctx)
            .run(input_with_facets(&["f1", "f2"]))
            .await;

        assert!(result.success);
        assert!(!result.result.contains("Verification Notes"));
        assert!(activities.request_for("cross_verifier").await.is_none());
    }
}
