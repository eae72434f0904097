//! Domain-analysis strategy: fixed analysis facets in parallel, then
//! synthesis with citations.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::domain::models::{Subtask, TaskInput, TaskResult, TaskUpdateKind};
use crate::domain::ports::SynthesisRequest;
use crate::services::budget::TokenMeter;
use crate::services::execution::{ExecutionConfig, ParallelPattern, PatternTask};
use crate::services::postprocess::{
    assemble_metadata, collect_citations, format_sources, inject_citation_context,
};

use super::helpers::{base_context, emit_update, execution_inputs, select_model_tier};
use super::StrategyContext;

/// The fixed analysis dimensions.
const FACETS: &[(&str, &str)] = &[
    ("landscape", "Map the current landscape and key players for"),
    ("technical", "Analyze the technical foundations and constraints of"),
    ("risks", "Identify the principal risks and failure modes of"),
    ("opportunities", "Identify opportunities and likely developments for"),
];

pub struct DomainAnalysisStrategy {
    ctx: Arc<StrategyContext>,
}

impl DomainAnalysisStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, input: TaskInput) -> TaskResult {
        let ctx = &self.ctx;
        if input.query.trim().is_empty() {
            return TaskResult::failure("Invalid task plan: empty query", 0);
        }
        let config = ctx.load_config().await;
        let mut context = base_context(&input);
        context.insert("role".into(), Value::String("data_analytics".into()));

        emit_update(
            &ctx.events,
            &ctx.workflow_id,
            TaskUpdateKind::WorkflowStarted,
            json!({"strategy": "domain_analysis", "query": input.query}),
        )
        .await;

        let tier = select_model_tier(&context, 0.6, &config);
        let mut meter = TokenMeter::new();

        let tasks: Vec<PatternTask> = FACETS
            .iter()
            .map(|(id, prompt)| {
                PatternTask::new(
                    Subtask::new(*id, format!("{prompt} {}", input.query)),
                    "data_analytics",
                )
            })
            .collect();
        let exec_config = ExecutionConfig {
            max_concurrency: config.parallel_max_concurrency,
            shared_context: context.clone(),
            ..Default::default()
        };
        let inputs = execution_inputs(ctx, &input, &config, tier);

        let outcome = ParallelPattern::new(ctx.activities.clone(), ctx.events.clone())
            .with_retry(ctx.retry.clone())
            .execute(tasks, &inputs, &exec_config)
            .await;
        meter.add(outcome.total_tokens);
        let results = outcome.results;

        if !results.iter().any(|r| r.success) {
            let mut failure = TaskResult::failure(
                format!("All {} agents failed", results.len()),
                meter.total(),
            );
            failure.metadata =
                assemble_metadata(&results, &context, tier.as_str(), &config, &*ctx.activities);
            return failure;
        }

        let citations = if config.enable_citations {
            collect_citations(&results)
        } else {
            Vec::new()
        };
        inject_citation_context(&mut context, &citations);

        let request = SynthesisRequest {
            query: input.query.clone(),
            agent_results: results.clone(),
            context: context.clone(),
            collected_citations: citations.clone(),
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
            Err(_) => results
                .iter()
                .filter(|r| r.success)
                .map(|r| format!("## {}\n{}\n", r.agent_id, r.response))
                .collect::<String>(),
        };
        if !citations.is_empty() {
            final_text.push_str(&format_sources(&citations, &[]));
        }

        let mut metadata =
            assemble_metadata(&results, &context, tier.as_str(), &config, &*ctx.activities);
        metadata.insert("patterns_used".into(), json!(["parallel_execution"]));
        metadata.insert("facets".into(), json!(FACETS.len()));
        if !citations.is_empty() {
            metadata.insert("citation_count".into(), json!(citations.len()));
        }
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
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::inmemory::{MockActivities, RecordingEventSink};
    use crate::services::retry::RetryPolicy;

    #[tokio::test]
    async fn test_runs_all_facets_and_synthesizes() {
        let activities = Arc::new(MockActivities::new());
        activities.set_synthesis_response("domain report", 40).await;
        let events = Arc::new(RecordingEventSink::new());
        let ctx = Arc::new(
            StrategyContext::new(activities.clone(), events).with_retry(RetryPolicy::none()),
        );

        let result = DomainAnalysisStrategy::new(ctx)
            .run(TaskInput::new("electric aviation"))
            .await;

        assert!(result.success);
        assert_eq!(result.result, "domain report");
        assert_eq!(result.metadata.get("facets"), Some(&json!(4)));
        for facet in ["landscape", "technical", "risks", "opportunities"] {
            assert!(activities.request_for(facet).await.is_some());
        }
    }
}
