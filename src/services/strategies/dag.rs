//! The central DAG strategy: plan, execute, synthesize, post-process.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{
    AgentExecutionResult, Citation, Decomposition, ExecutionStrategy, PlanGraph, TaskInput,
    TaskResult, TaskUpdate, TaskUpdateKind,
};
use crate::domain::ports::{
    CitationInsertRequest, DecomposeRequest, SimpleTaskRequest, SynthesisRequest,
};
use crate::services::budget::TokenMeter;
use crate::services::execution::{
    ExecutionConfig, HybridPattern, ParallelPattern, PatternTask, SequentialPattern,
};
use crate::services::postprocess::{
    assemble_metadata, collect_citations, format_sources, inject_citation_context, verify_claims,
};
use crate::services::reasoning::ReflectionPattern;

use super::helpers::{
    base_context, emit_update, execution_inputs, is_json_like, select_model_tier, ModelTier,
};
use super::StrategyContext;

/// How the final text was chosen; recorded in the pattern trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SynthesisSource {
    SingleResultBypass,
    SynthesisSubtask,
    SynthesisActivity,
    Fallback,
}

impl SynthesisSource {
    fn as_str(self) -> &'static str {
        match self {
            Self::SingleResultBypass => "single_result_bypass",
            Self::SynthesisSubtask => "synthesis_subtask",
            Self::SynthesisActivity => "synthesis_llm",
            Self::Fallback => "synthesis_fallback",
        }
    }
}

/// The central strategy. Plans the query into a subtask DAG, validates it,
/// picks an execution pattern, and runs the synthesis decision tree with
/// citation, reflection, and verification post-processing.
pub struct DagStrategy {
    ctx: Arc<StrategyContext>,
}

impl DagStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, input: TaskInput) -> TaskResult {
        match self.run_inner(input).await {
            Ok(result) => result,
            // Fatal errors become a failure TaskResult; no completion event
            // was emitted on these paths.
            Err(err) => TaskResult::failure(err.to_string(), 0),
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn run_inner(&self, input: TaskInput) -> OrchestratorResult<TaskResult> {
        if input.query.trim().is_empty() {
            return Err(OrchestratorError::InvalidPlan("empty query".to_string()));
        }

        let ctx = &self.ctx;
        let config = ctx.load_config().await;
        let mut context = base_context(&input);
        let mut meter = TokenMeter::new();
        let mut trail: Vec<String> = Vec::new();

        emit_update(
            &ctx.events,
            &ctx.workflow_id,
            TaskUpdateKind::WorkflowStarted,
            json!({"strategy": "dag", "query": input.query}),
        )
        .await;

        // -- Plan ------------------------------------------------------------
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

        // Cycles and dangling references are fatal plan errors.
        let _graph = PlanGraph::build(&plan)?;

        let tier = select_model_tier(&context, plan.complexity, &config);
        debug!(
            complexity = plan.complexity,
            tier = tier.as_str(),
            subtasks = plan.subtasks.len(),
            "plan accepted"
        );

        // -- Trivial path ----------------------------------------------------
        if is_trivial(&plan, &config) {
            trail.push("simple_task".to_string());
            return self
                .run_trivial(&input, &plan, &config, &context, tier, trail, meter)
                .await;
        }

        // -- Execute ---------------------------------------------------------
        ctx.control.checkpoint("before_execution").await?;

        let inherited_role = context.get("role").and_then(Value::as_str).map(str::to_string);
        let tasks: Vec<PatternTask> = plan
            .subtasks
            .iter()
            .map(|s| PatternTask::new(s.clone(), plan.role_for(s, inherited_role.as_deref())))
            .collect();

        let exec_config = ExecutionConfig {
            max_concurrency: config.parallel_max_concurrency,
            concurrency_limit: plan.concurrency_limit,
            emit_events: true,
            shared_context: context.clone(),
            pass_previous_results: config.sequential_pass_results,
            extract_numeric_values: config.sequential_extract_numeric,
            clear_dependent_tool_params: config.clear_dependent_tool_params,
            dependency_wait_timeout: std::time::Duration::from_secs(
                config.hybrid_dependency_timeout_secs,
            ),
        };
        let inputs = execution_inputs(ctx, &input, &config, tier);

        let outcome = if plan.has_dependencies() {
            trail.push("hybrid_execution".to_string());
            HybridPattern::new(ctx.activities.clone(), ctx.events.clone())
                .with_retry(ctx.retry.clone())
                .execute(tasks, &inputs, &exec_config)
                .await
        } else {
            match plan.execution_strategy {
                ExecutionStrategy::Sequential => {
                    trail.push("sequential_execution".to_string());
                    SequentialPattern::new(ctx.activities.clone(), ctx.events.clone())
                        .with_retry(ctx.retry.clone())
                        .execute(tasks, &inputs, &exec_config)
                        .await
                }
                _ => {
                    trail.push("parallel_execution".to_string());
                    ParallelPattern::new(ctx.activities.clone(), ctx.events.clone())
                        .with_retry(ctx.retry.clone())
                        .execute(tasks, &inputs, &exec_config)
                        .await
                }
            }
        };
        meter.add(outcome.total_tokens);
        let results = outcome.results;

        if !results.iter().any(|r| r.success) {
            warn!(total = results.len(), "every subtask failed");
            let mut failure = TaskResult::failure(
                format!("All {} agents failed", results.len()),
                meter.total(),
            );
            failure.metadata =
                assemble_metadata(&results, &context, tier.as_str(), &config, &*ctx.activities);
            return Ok(failure);
        }

        // Persist per-agent executions to the vector store.
        for result in &results {
            let _ = ctx.activities.persist_agent_execution(result).await;
        }

        // -- Synthesis decision tree ----------------------------------------
        ctx.control.checkpoint("before_synthesis").await?;

        let citations = if config.enable_citations {
            collect_citations(&results)
        } else {
            Vec::new()
        };
        let base_role = context
            .get("role")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let (mut final_text, source) = self
            .choose_final_text(
                &input,
                &plan,
                &results,
                &citations,
                &base_role,
                &mut context,
                &mut meter,
            )
            .await;
        trail.push(source.as_str().to_string());

        let mut metadata_extra: BTreeMap<String, Value> = BTreeMap::new();

        // -- Citation integration -------------------------------------------
        if !citations.is_empty() {
            let (cited, citation_meta) = self
                .insert_citations(&final_text, &citations, &input, tier, &mut meter)
                .await;
            if let Some(cited) = cited {
                final_text = cited;
                trail.push("citation_insertion".to_string());
            }
            metadata_extra.extend(citation_meta);
            metadata_extra.insert(
                "citations".into(),
                serde_json::to_value(&citations).unwrap_or(Value::Null),
            );
            metadata_extra.insert("citation_count".into(), Value::from(citations.len()));
        }

        // -- Reflection ------------------------------------------------------
        // Skipped whenever the plan carries a synthesis subtask, to preserve
        // user-specified formatting.
        if plan.complexity > config.complexity_medium_threshold
            && config.reflection.enabled
            && plan.synthesis_subtask().is_none()
        {
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
            metadata_extra.insert(
                "reflection_confidence".into(),
                Value::from(reflection.confidence),
            );
            if reflection.improved {
                final_text = reflection.result;
            }
            trail.push("reflection".to_string());
        }

        // -- Verification ----------------------------------------------------
        if config.enable_verification && !citations.is_empty() {
            if let Some(digest) =
                verify_claims(&ctx.activities, &ctx.retry, &final_text, &citations).await
            {
                metadata_extra.insert("verification".into(), digest);
                trail.push("verification".to_string());
            }
        }

        // -- Metadata & completion ------------------------------------------
        ctx.control.checkpoint("before_completion").await?;

        let mut metadata =
            assemble_metadata(&results, &context, tier.as_str(), &config, &*ctx.activities);
        metadata.insert(
            "mode".into(),
            Value::String(if plan.mode.is_empty() {
                "standard".to_string()
            } else {
                plan.mode.clone()
            }),
        );
        metadata.insert("complexity".into(), Value::from(plan.complexity));
        metadata.insert("patterns_used".into(), json!(trail));
        metadata.extend(metadata_extra);
        // Totals reflect synthesis and post-processing, not only agents.
        metadata.insert("tokens_used".into(), Value::from(meter.total()));

        self.record_and_complete(&input, &final_text, meter.total(), &metadata)
            .await;

        let mut result = TaskResult::ok(final_text, meter.total());
        result.metadata = metadata;
        Ok(result)
    }

    /// Trivial path: one `ExecuteSimpleTask` call, metadata, completion.
    #[allow(clippy::too_many_arguments)]
    async fn run_trivial(
        &self,
        input: &TaskInput,
        plan: &Decomposition,
        config: &crate::domain::models::WorkflowConfig,
        context: &BTreeMap<String, Value>,
        tier: ModelTier,
        mut trail: Vec<String>,
        mut meter: TokenMeter,
    ) -> OrchestratorResult<TaskResult> {
        let ctx = &self.ctx;
        info!(complexity = plan.complexity, "routing to trivial path");

        let query = plan
            .subtasks
            .first()
            .map_or_else(|| input.query.clone(), |s| s.description.clone());

        let response = ctx
            .retry
            .run("ExecuteSimpleTask", || {
                ctx.activities.execute_simple_task(SimpleTaskRequest {
                    query: query.clone(),
                    session_id: input.session_id.clone(),
                    user_id: input.user_id.clone(),
                    context: context.clone(),
                    session_ctx: BTreeMap::new(),
                    parent_workflow_id: input.parent_workflow_id.clone(),
                })
            })
            .await?;
        meter.add(response.tokens_used);

        let synthetic = AgentExecutionResult {
            agent_id: "simple".to_string(),
            response: response.response.clone(),
            success: response.success,
            tokens_used: response.tokens_used,
            model: response.model_used.clone(),
            ..Default::default()
        };
        let mut metadata = assemble_metadata(
            std::slice::from_ref(&synthetic),
            context,
            tier.as_str(),
            config,
            &*ctx.activities,
        );
        metadata.insert("mode".into(), Value::String("simple".to_string()));
        metadata.insert("complexity".into(), Value::from(plan.complexity));
        trail.push("trivial_path".to_string());
        metadata.insert("patterns_used".into(), json!(trail));

        if !response.success {
            let mut failure =
                TaskResult::failure("simple task execution failed", meter.total());
            failure.metadata = metadata;
            return Ok(failure);
        }

        self.record_and_complete(input, &response.response, meter.total(), &metadata)
            .await;

        let mut result = TaskResult::ok(response.response, meter.total());
        result.metadata = metadata;
        Ok(result)
    }

    /// The synthesis decision tree of the strategy.
    #[allow(clippy::too_many_arguments)]
    async fn choose_final_text(
        &self,
        input: &TaskInput,
        plan: &Decomposition,
        results: &[AgentExecutionResult],
        citations: &[Citation],
        base_role: &str,
        context: &mut BTreeMap<String, Value>,
        meter: &mut TokenMeter,
    ) -> (String, SynthesisSource) {
        let ctx = &self.ctx;
        let successes: Vec<&AgentExecutionResult> = results.iter().filter(|r| r.success).collect();

        // (a) Single-result bypass, unless a requires-synthesis guard trips.
        if input.bypass_single_result && successes.len() == 1 {
            let only = successes[0];
            let requires_synthesis = is_json_like(&only.response)
                || only.used_web_search()
                || !citations.is_empty()
                || base_role == "data_analytics";
            if !requires_synthesis {
                debug!("bypassing synthesis for single successful result");
                return (only.response.clone(), SynthesisSource::SingleResultBypass);
            }
        }

        // (b) A non-trivial synthesis-subtask result is used directly; the
        // citation pass handles inline numbering when citations exist.
        if let Some(synth_subtask) = plan.synthesis_subtask() {
            if let Some(result) = results
                .iter()
                .find(|r| r.agent_id == synth_subtask.id && r.success)
            {
                if result.response.len() >= 100 && result.tokens_used > 0 {
                    debug!(subtask = %synth_subtask.id, "using synthesis-subtask result");
                    return (result.response.clone(), SynthesisSource::SynthesisSubtask);
                }
            }
        }

        // (c) External synthesis over the full result set.
        inject_citation_context(context, citations);
        let request = SynthesisRequest {
            query: input.query.clone(),
            agent_results: results.to_vec(),
            context: context.clone(),
            collected_citations: citations.to_vec(),
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
                (response.final_result, SynthesisSource::SynthesisActivity)
            }
            Err(err) => {
                // Recoverable: fall back to the concatenated good text.
                warn!(error = %err, "synthesis failed, falling back to agent responses");
                let joined = successes
                    .iter()
                    .map(|r| r.response.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                (joined, SynthesisSource::Fallback)
            }
        }
    }

    /// Run the citation-insertion agent over the report. Returns the cited
    /// report (None when the original must stand) plus metadata notes.
    async fn insert_citations(
        &self,
        report: &str,
        citations: &[Citation],
        input: &TaskInput,
        tier: ModelTier,
        meter: &mut TokenMeter,
    ) -> (Option<String>, BTreeMap<String, Value>) {
        let ctx = &self.ctx;
        let mut notes = BTreeMap::new();
        let request = CitationInsertRequest {
            report: report.to_string(),
            citations: citations.to_vec(),
            parent_workflow_id: input.parent_workflow_id.clone(),
            model_tier: tier.as_str().to_string(),
        };
        match ctx
            .retry
            .run("AddCitations", || ctx.activities.add_citations(request.clone()))
            .await
        {
            Ok(response) if response.validation_passed => {
                meter.add(response.tokens_used);
                notes.insert(
                    "citations_used".into(),
                    json!(response.citations_used.clone()),
                );
                let sources = format_sources(citations, &response.citations_used);
                (Some(format!("{}{sources}", response.cited_report)), notes)
            }
            Ok(response) => {
                meter.add(response.tokens_used);
                // Validation failed: the original synthesis stands.
                notes.insert(
                    "citation_insertion".into(),
                    json!({
                        "status": "validation_failed",
                        "error": response.validation_error,
                    }),
                );
                (None, notes)
            }
            Err(err) => {
                warn!(error = %err, "citation insertion failed, keeping original report");
                notes.insert(
                    "citation_insertion".into(),
                    json!({"status": "failed", "error": err.to_string()}),
                );
                (None, notes)
            }
        }
    }

    /// Telemetry, session bookkeeping, and the final event pair.
    async fn record_and_complete(
        &self,
        input: &TaskInput,
        final_text: &str,
        tokens_used: u64,
        metadata: &BTreeMap<String, Value>,
    ) {
        let ctx = &self.ctx;
        let model = metadata
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let _ = ctx
            .activities
            .record_token_usage(input.session_id.as_deref(), model, tokens_used)
            .await;
        let _ = ctx
            .activities
            .record_pattern_metrics(
                "dag",
                metadata.get("patterns_used").cloned().unwrap_or(Value::Null),
            )
            .await;
        if let Some(session_id) = &input.session_id {
            let _ = ctx
                .activities
                .update_session_result(session_id, final_text, tokens_used)
                .await;
        }

        // Final streaming output, then workflow completion.
        let _ = ctx
            .events
            .emit(TaskUpdate::final_output(
                ctx.workflow_id.clone(),
                final_text,
                tokens_used,
                model,
            ))
            .await;
        emit_update(
            &ctx.events,
            &ctx.workflow_id,
            TaskUpdateKind::WorkflowCompleted,
            json!({"tokens_used": tokens_used}),
        )
        .await;
    }
}

/// Zero subtasks, or one simple-shape subtask under the simple threshold.
fn is_trivial(plan: &Decomposition, config: &crate::domain::models::WorkflowConfig) -> bool {
    match plan.subtasks.len() {
        0 => true,
        1 => plan.subtasks[0].is_simple_shape() && plan.complexity <= config.simple_threshold,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Subtask;
    use crate::infrastructure::inmemory::{MockActivities, RecordingEventSink};
    use crate::services::control::ControlSignals;
    use crate::services::retry::RetryPolicy;

    fn context_with(activities: Arc<MockActivities>) -> (Arc<StrategyContext>, Arc<RecordingEventSink>) {
        let events = Arc::new(RecordingEventSink::new());
        let ctx = Arc::new(
            StrategyContext::new(activities, events.clone())
                .with_retry(RetryPolicy::none())
                .with_workflow_id("wf-test"),
        );
        (ctx, events)
    }

    fn plan(subtasks: Vec<Subtask>, complexity: f64) -> Decomposition {
        Decomposition {
            complexity,
            subtasks,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_trivial_path_for_empty_plan() {
        let activities = Arc::new(MockActivities::new());
        activities
            .set_simple_response("hello there", 25, "small-1")
            .await;
        let (ctx, events) = context_with(activities);

        let mut input = TaskInput::new("hello");
        input.decomposition = Some(plan(vec![], 0.2));

        let result = DagStrategy::new(ctx).run(input).await;
        assert!(result.success);
        assert_eq!(result.metadata.get("mode"), Some(&json!("simple")));
        assert_eq!(result.metadata.get("num_agents"), Some(&json!(1)));
        assert!(result.metadata.contains_key("cost_usd"));
        assert!(result.metadata.contains_key("model"));
        assert!(events.saw_kind(TaskUpdateKind::WorkflowCompleted).await);
    }

    #[tokio::test]
    async fn test_single_tool_subtask_is_not_trivial() {
        let activities = Arc::new(MockActivities::new());
        let (ctx, _) = context_with(activities.clone());

        let mut input = TaskInput::new("search something");
        input.decomposition = Some(plan(
            vec![Subtask::new("a", "look it up").with_tools(vec!["web_search".into()])],
            0.2,
        ));

        let result = DagStrategy::new(ctx).run(input).await;
        assert!(result.success);
        // The pattern path ran ExecuteAgent, not ExecuteSimpleTask.
        assert!(activities.request_for("a").await.is_some());
        assert_eq!(activities.simple_task_calls().await, 0);
    }

    #[tokio::test]
    async fn test_cycle_is_fatal() {
        let activities = Arc::new(MockActivities::new());
        let (ctx, events) = context_with(activities);

        let mut input = TaskInput::new("anything");
        input.decomposition = Some(plan(
            vec![
                Subtask::new("x", "one").with_dependencies(vec!["y".into()]),
                Subtask::new("y", "two").with_dependencies(vec!["x".into()]),
            ],
            0.5,
        ));

        let result = DagStrategy::new(ctx).run(input).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("Invalid task plan"));
        // Fatal errors emit no completion event.
        assert!(!events.saw_kind(TaskUpdateKind::WorkflowCompleted).await);
    }

    #[tokio::test]
    async fn test_dependencies_select_hybrid_and_order_is_stable() {
        let activities = Arc::new(MockActivities::new());
        activities.set_agent_delay_ms("a", 40).await;
        let (ctx, _) = context_with(activities.clone());

        let mut input = TaskInput::new("multi-step");
        input.decomposition = Some(plan(
            vec![
                Subtask::new("a", "first"),
                Subtask::new("b", "second"),
                Subtask::new("c", "join").with_dependencies(vec!["a".into(), "b".into()]),
            ],
            0.6,
        ));

        let result = DagStrategy::new(ctx).run(input).await;
        assert!(result.success);
        let summaries = result.metadata.get("agent_summaries").unwrap().as_array().unwrap();
        let ids: Vec<&str> = summaries
            .iter()
            .map(|s| s["agent_id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_synthesis_subtask_result_used_without_synthesis_activity() {
        let activities = Arc::new(MockActivities::new());
        let long_report = "final report ".repeat(20);
        activities.set_agent_response("synth", long_report.trim()).await;
        let (ctx, _) = context_with(activities.clone());

        let mut synth = Subtask::new("synth", "combine everything");
        synth.task_type = Some("synthesis".into());
        let mut input = TaskInput::new("report");
        input.decomposition = Some(plan(vec![Subtask::new("a", "research"), synth], 0.6));

        let result = DagStrategy::new(ctx).run(input).await;
        assert!(result.success);
        assert!(result.result.starts_with("final report"));
        // Property: no synthesis-activity call when a valid synthesis
        // subtask result exists and no citations are present.
        assert_eq!(activities.synthesis_calls().await, 0);
        // Reflection is also skipped when a synthesis subtask exists.
        assert!(!result.metadata.contains_key("reflection_confidence"));
    }

    #[tokio::test]
    async fn test_bypass_single_result() {
        let activities = Arc::new(MockActivities::new());
        activities.set_agent_response("only", "plain prose answer").await;
        let (ctx, _) = context_with(activities.clone());

        let mut input = TaskInput::new("one thing");
        input.bypass_single_result = true;
        // Two subtasks so the plan is not trivial, one fails.
        activities.fail_agent("other", "boom").await;
        input.decomposition = Some(plan(
            vec![Subtask::new("only", "do it"), Subtask::new("other", "fail")],
            0.4,
        ));

        let result = DagStrategy::new(ctx).run(input).await;
        assert!(result.success);
        assert_eq!(result.result, "plain prose answer");
        assert_eq!(activities.synthesis_calls().await, 0);
    }

    #[tokio::test]
    async fn test_json_response_defeats_bypass() {
        let activities = Arc::new(MockActivities::new());
        activities
            .set_agent_response("only", r#"{"rows": [1, 2, 3]}"#)
            .await;
        activities.fail_agent("other", "boom").await;
        activities.set_synthesis_response("synthesized", 30).await;
        let (ctx, _) = context_with(activities.clone());

        let mut input = TaskInput::new("one thing");
        input.bypass_single_result = true;
        input.decomposition = Some(plan(
            vec![Subtask::new("only", "do it"), Subtask::new("other", "fail")],
            0.4,
        ));

        let result = DagStrategy::new(ctx).run(input).await;
        assert!(result.success);
        assert_eq!(result.result, "synthesized");
        assert_eq!(activities.synthesis_calls().await, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_execution_returns_failure_without_completion() {
        let activities = Arc::new(MockActivities::new());
        let events = Arc::new(RecordingEventSink::new());
        let (signals, handle) = ControlSignals::channel();
        signals.cancel();
        let ctx = Arc::new(
            StrategyContext::new(activities, events.clone())
                .with_retry(RetryPolicy::none())
                .with_control(handle),
        );

        let mut input = TaskInput::new("q");
        input.decomposition = Some(plan(vec![Subtask::new("a", "x"), Subtask::new("b", "y")], 0.5));

        let result = DagStrategy::new(ctx).run(input).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("canceled"));
        assert!(!events.saw_kind(TaskUpdateKind::WorkflowCompleted).await);
    }

    #[tokio::test]
    async fn test_all_failed_returns_failure() {
        let activities = Arc::new(MockActivities::new());
        activities.fail_agent("a", "boom").await;
        activities.fail_agent("b", "boom").await;
        let (ctx, _) = context_with(activities.clone());

        let mut input = TaskInput::new("q");
        input.decomposition = Some(plan(vec![Subtask::new("a", "x"), Subtask::new("b", "y")], 0.5));

        let result = DagStrategy::new(ctx).run(input).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("All 2 agents failed"));
        assert_eq!(activities.synthesis_calls().await, 0);
    }

    #[tokio::test]
    async fn test_citations_flow_into_report() {
        let activities = Arc::new(MockActivities::new());
        activities
            .set_agent_tool_output(
                "a",
                "web_search",
                json!({"results": [
                    {"url": "https://a.example/doc", "title": "Doc A"},
                    {"url": "https://b.example/doc", "title": "Doc B"},
                ]}),
            )
            .await;
        activities.set_synthesis_response("base report", 20).await;
        activities
            .set_citation_response("base report with [1] and [2]", vec![1, 2], true)
            .await;
        let (ctx, _) = context_with(activities.clone());

        let mut input = TaskInput::new("cited question");
        input.decomposition = Some(plan(
            vec![Subtask::new("a", "search"), Subtask::new("b", "more")],
            0.4,
        ));

        let result = DagStrategy::new(ctx).run(input).await;
        assert!(result.success);
        assert!(result.result.contains("[1]"));
        assert!(result.result.contains("## Sources"));
        assert_eq!(result.metadata.get("citation_count"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn test_citation_failure_leaves_report_unchanged() {
        let activities = Arc::new(MockActivities::new());
        activities
            .set_agent_tool_output(
                "a",
                "web_search",
                json!([{"url": "https://a.example", "title": "A"}]),
            )
            .await;
        activities.set_synthesis_response("original report", 20).await;
        activities.fail_citations("model refused").await;
        let (ctx, _) = context_with(activities.clone());

        let mut input = TaskInput::new("q");
        input.decomposition = Some(plan(
            vec![Subtask::new("a", "search"), Subtask::new("b", "more")],
            0.4,
        ));

        let result = DagStrategy::new(ctx).run(input).await;
        assert!(result.success);
        assert_eq!(result.result, "original report");
        assert!(result.metadata.contains_key("citation_insertion"));
    }
}
