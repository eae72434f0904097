//! Research strategy: react for shallow queries, pattern execution plus
//! synthesis and reflection for the rest.

use std::sync::Arc;

use serde_json::json;

use crate::domain::errors::OrchestratorResult;
use crate::domain::models::{
    AgentExecutionResult, PlanGraph, TaskInput, TaskResult, TaskUpdateKind,
};
use crate::domain::ports::{DecomposeRequest, SynthesisRequest};
use crate::services::budget::TokenMeter;
use crate::services::execution::{ExecutionConfig, HybridPattern, ParallelPattern, PatternTask};
use crate::services::memory::{inject_memory, maybe_compress_context};
use crate::services::postprocess::assemble_metadata;
use crate::services::reasoning::{ReactConfig, ReactLoop, ReflectionPattern};

use super::helpers::{base_context, emit_update, execution_inputs, select_model_tier};
use super::StrategyContext;

/// Complexity below which the react loop handles the whole query.
const REACT_COMPLEXITY_BOUNDARY: f64 = 0.5;

pub struct ResearchStrategy {
    ctx: Arc<StrategyContext>,
}

impl ResearchStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, input: TaskInput) -> TaskResult {
        match self.run_inner(input).await {
            Ok(result) => result,
            Err(err) => TaskResult::failure(err.to_string(), 0),
        }
    }

    async fn run_inner(&self, input: TaskInput) -> OrchestratorResult<TaskResult> {
        let ctx = &self.ctx;
        if input.query.trim().is_empty() {
            return Err(crate::domain::errors::OrchestratorError::InvalidPlan(
                "empty query".to_string(),
            ));
        }
        let config = ctx.load_config().await;
        let mut context = base_context(&input);
        inject_memory(&ctx.memory, &ctx.versions, &input, &mut context).await;
        maybe_compress_context(&ctx.memory, &ctx.versions, &input).await;

        emit_update(
            &ctx.events,
            &ctx.workflow_id,
            TaskUpdateKind::WorkflowStarted,
            json!({"strategy": "research", "query": input.query}),
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
        let tier = select_model_tier(&context, plan.complexity, &config);
        let mut meter = TokenMeter::new();
        let mut trail: Vec<String> = Vec::new();

        // Low complexity or a near-empty plan routes through the react loop.
        let (mut final_text, results) = if plan.complexity < REACT_COMPLEXITY_BOUNDARY
            || plan.subtasks.len() <= 1
        {
            trail.push("react".to_string());
            let outcome = ReactLoop::new(
                ctx.activities.clone(),
                ctx.events.clone(),
                ReactConfig::default(),
            )
            .with_retry(ctx.retry.clone())
            .run(
                &ctx.workflow_id,
                &input.query,
                context.clone(),
                input.session_id.as_deref(),
            )
            .await;
            meter.add(outcome.total_tokens);
            let synthetic = AgentExecutionResult {
                agent_id: "react".to_string(),
                response: outcome.answer.clone(),
                success: true,
                tokens_used: outcome.total_tokens,
                ..Default::default()
            };
            (outcome.answer, vec![synthetic])
        } else {
            ctx.control.checkpoint("before_execution").await?;
            let tasks: Vec<PatternTask> = plan
                .subtasks
                .iter()
                .map(|s| PatternTask::new(s.clone(), plan.role_for(s, Some("researcher"))))
                .collect();
            let exec_config = ExecutionConfig {
                max_concurrency: config.parallel_max_concurrency,
                concurrency_limit: plan.concurrency_limit,
                shared_context: context.clone(),
                dependency_wait_timeout: std::time::Duration::from_secs(
                    config.hybrid_dependency_timeout_secs,
                ),
                ..Default::default()
            };
            let inputs = execution_inputs(ctx, &input, &config, tier);

            let outcome = if plan.has_dependencies() {
                trail.push("hybrid_execution".to_string());
                HybridPattern::new(ctx.activities.clone(), ctx.events.clone())
                    .with_retry(ctx.retry.clone())
                    .execute(tasks, &inputs, &exec_config)
                    .await
            } else {
                trail.push("parallel_execution".to_string());
                ParallelPattern::new(ctx.activities.clone(), ctx.events.clone())
                    .with_retry(ctx.retry.clone())
                    .execute(tasks, &inputs, &exec_config)
                    .await
            };
            meter.add(outcome.total_tokens);
            (String::new(), outcome.results)
        };

        // Always synthesize and reflect.
        ctx.control.checkpoint("before_synthesis").await?;
        trail.push("synthesis_llm".to_string());
        let request = SynthesisRequest {
            query: input.query.clone(),
            agent_results: results.clone(),
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
                final_text = response.final_result;
            }
            Err(_) if !final_text.is_empty() => {}
            Err(_) => {
                final_text = results
                    .iter()
                    .filter(|r| r.success)
                    .map(|r| r.response.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
            }
        }

        trail.push("reflection".to_string());
        let reflection = ReflectionPattern::new(
            ctx.activities.clone(),
            config.reflection.max_retries,
            config.reflection.confidence_threshold,
            config.reflection.criteria.clone(),
        )
        .run(
            &input.query,
            &final_text,
            &results,
            context.clone(),
            input.session_id.as_deref(),
        )
        .await;
        meter.add(reflection.total_tokens);
        if reflection.improved {
            final_text = reflection.result;
        }

        ctx.control.checkpoint("before_completion").await?;
        let mut metadata =
            assemble_metadata(&results, &context, tier.as_str(), &config, &*ctx.activities);
        metadata.insert("patterns_used".into(), json!(trail));
        metadata.insert("complexity".into(), json!(plan.complexity));
        metadata.insert(
            "reflection_confidence".into(),
            json!(reflection.confidence),
        );
        metadata.insert("tokens_used".into(), json!(meter.total()));

        let _ = ctx
            .events
            .emit(crate::domain::models::TaskUpdate::final_output(
                ctx.workflow_id.clone(),
                &final_text,
                meter.total(),
                metadata
                    .get("model")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or(""),
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

    fn strategy(activities: Arc<MockActivities>) -> ResearchStrategy {
        let events = Arc::new(RecordingEventSink::new());
        ResearchStrategy::new(Arc::new(
            StrategyContext::new(activities, events).with_retry(RetryPolicy::none()),
        ))
    }

    #[tokio::test]
    async fn test_low_complexity_routes_to_react() {
        let activities = Arc::new(MockActivities::new());
        activities
            .set_agent_response("actor", r#"{"action": "done", "input": {"answer": "quick"}}"#)
            .await;
        activities.set_synthesis_response("synthesized quick", 10).await;

        let mut input = TaskInput::new("small question");
        input.decomposition = Some(Decomposition {
            complexity: 0.2,
            subtasks: vec![Subtask::new("a", "x"), Subtask::new("b", "y")],
            ..Default::default()
        });

        let result = strategy(activities.clone()).run(input).await;
        assert!(result.success);
        let trail = result.metadata.get("patterns_used").unwrap();
        assert_eq!(trail[0], "react");
        // React path never dispatched the plan's subtasks.
        assert!(activities.request_for("a").await.is_none());
    }

    #[tokio::test]
    async fn test_high_complexity_executes_plan_then_synthesizes() {
        let activities = Arc::new(MockActivities::new());
        activities.set_synthesis_response("combined research", 25).await;
        activities
            .set_agent_response_prefix("reflect_critique", "solid. Confidence: 0.95")
            .await;

        let mut input = TaskInput::new("broad question");
        input.decomposition = Some(Decomposition {
            complexity: 0.8,
            subtasks: vec![Subtask::new("a", "facet one"), Subtask::new("b", "facet two")],
            ..Default::default()
        });

        let result = strategy(activities.clone()).run(input).await;
        assert!(result.success);
        assert_eq!(result.result, "combined research");
        assert_eq!(activities.synthesis_calls().await, 1);
        let trail = result.metadata.get("patterns_used").unwrap();
        assert_eq!(trail[0], "parallel_execution");
        // Reflection always runs for research.
        assert!(result.metadata.contains_key("reflection_confidence"));
    }
}
