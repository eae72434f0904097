//! Exploratory strategy: tree search, then debate, then reflection.

use std::sync::Arc;

use serde_json::json;

use crate::domain::models::{AgentExecutionResult, TaskInput, TaskResult, TaskUpdateKind};
use crate::services::budget::TokenMeter;
use crate::services::memory::{inject_memory, maybe_compress_context};
use crate::services::postprocess::assemble_metadata;
use crate::services::reasoning::{
    DebateConfig, DebatePattern, ReflectionPattern, TreeConfig, TreeOfThoughts,
};

use super::helpers::{base_context, emit_update, select_model_tier};
use super::StrategyContext;

/// Reflection runs when confidence is still below this after debate.
const REFLECTION_CONFIDENCE_BOUNDARY: f64 = 0.9;

pub struct ExploratoryStrategy {
    ctx: Arc<StrategyContext>,
}

impl ExploratoryStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, input: TaskInput) -> TaskResult {
        let ctx = &self.ctx;
        if input.query.trim().is_empty() {
            return TaskResult::failure("Invalid task plan: empty query", 0);
        }
        let config = ctx.load_config().await;
        let exploratory = &config.exploratory;
        let mut context = base_context(&input);
        inject_memory(&ctx.memory, &ctx.versions, &input, &mut context).await;
        maybe_compress_context(&ctx.memory, &ctx.versions, &input).await;

        emit_update(
            &ctx.events,
            &ctx.workflow_id,
            TaskUpdateKind::WorkflowStarted,
            json!({"strategy": "exploratory", "query": input.query}),
        )
        .await;

        let tier = select_model_tier(&context, 0.7, &config);
        let mut meter = TokenMeter::new();
        let mut trail = vec!["tree_of_thoughts".to_string()];

        let tree = TreeOfThoughts::new(
            ctx.activities.clone(),
            TreeConfig {
                max_depth: exploratory.max_depth,
                branching_factor: exploratory.branching_factor,
                pruning_threshold: exploratory.pruning_threshold,
                exploration_budget: exploratory.exploration_budget,
                backtrack_enabled: exploratory.backtrack_enabled,
            },
        )
        .run(&input.query, context.clone(), input.session_id.as_deref())
        .await;
        meter.add(tree.total_tokens);

        let mut answer = tree.solution.clone();
        let mut confidence = tree.confidence;

        // Debate contested answers.
        if confidence < exploratory.debate_confidence_threshold {
            trail.push("debate".to_string());
            let debate = DebatePattern::new(
                ctx.activities.clone(),
                DebateConfig {
                    num_debaters: exploratory.num_debaters,
                    max_rounds: exploratory.max_debate_rounds,
                    use_moderator: true,
                    enable_voting: true,
                    perspectives: Vec::new(),
                },
            )
            .run(
                &format!("{}\n\nCandidate answer: {answer}", input.query),
                context.clone(),
                input.session_id.as_deref(),
            )
            .await;
            meter.add(debate.total_tokens);
            if !debate.final_position.is_empty() {
                answer = debate.final_position;
            }
            if debate.consensus_reached {
                confidence = confidence.max(exploratory.debate_confidence_threshold);
            }
        }

        // Reflection as the last escalation.
        if confidence < REFLECTION_CONFIDENCE_BOUNDARY {
            trail.push("reflection".to_string());
            let reflection = ReflectionPattern::new(
                ctx.activities.clone(),
                config.reflection.max_retries,
                config.reflection.confidence_threshold,
                config.reflection.criteria.clone(),
            )
            .run(
                &input.query,
                &answer,
                &[],
                context.clone(),
                input.session_id.as_deref(),
            )
            .await;
            meter.add(reflection.total_tokens);
            if reflection.improved {
                answer = reflection.result;
            }
            confidence = confidence.max(reflection.confidence);
        }

        let final_text = format!(
            "## Answer\n{answer}\n\n## Exploration\n\
             Explored {} thoughts to depth {}.\n\n## Confidence\n{confidence:.2}\n",
            tree.thoughts_explored, tree.depth_reached,
        );

        let synthetic = AgentExecutionResult {
            agent_id: "exploratory".to_string(),
            response: final_text.clone(),
            success: true,
            tokens_used: meter.total(),
            ..Default::default()
        };
        let mut metadata = assemble_metadata(
            std::slice::from_ref(&synthetic),
            &context,
            tier.as_str(),
            &config,
            &*ctx.activities,
        );
        metadata.insert("patterns_used".into(), json!(trail));
        metadata.insert("confidence".into(), json!(confidence));
        metadata.insert("thoughts_explored".into(), json!(tree.thoughts_explored));

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
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::inmemory::{MockActivities, RecordingEventSink};
    use crate::services::retry::RetryPolicy;

    #[tokio::test]
    async fn test_confident_tree_skips_debate() {
        let activities = Arc::new(MockActivities::new());
        activities
            .set_agent_response_prefix("tot_expand", "strong idea")
            .await;
        activities.set_agent_response("tot_score", "0.95").await;

        let events = Arc::new(RecordingEventSink::new());
        let ctx = Arc::new(
            StrategyContext::new(activities, events).with_retry(RetryPolicy::none()),
        );

        let result = ExploratoryStrategy::new(ctx)
            .run(TaskInput::new("open question"))
            .await;

        assert!(result.success);
        let trail = result.metadata.get("patterns_used").unwrap();
        let trail: Vec<&str> = trail
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(trail.contains(&"tree_of_thoughts"));
        assert!(!trail.contains(&"debate"));
        assert!(result.result.contains("## Confidence"));
    }

    #[tokio::test]
    async fn test_low_confidence_escalates_to_debate_and_reflection() {
        let activities = Arc::new(MockActivities::new());
        activities.set_agent_response_prefix("tot_expand", "weak idea").await;
        activities.set_agent_response("tot_score", "0.4").await;
        activities
            .set_agent_response_prefix("reflect_critique", "fine. Confidence: 0.95")
            .await;

        let events = Arc::new(RecordingEventSink::new());
        let ctx = Arc::new(
            StrategyContext::new(activities, events).with_retry(RetryPolicy::none()),
        );

        let result = ExploratoryStrategy::new(ctx)
            .run(TaskInput::new("open question"))
            .await;

        let trail = result.metadata.get("patterns_used").unwrap();
        let trail: Vec<&str> = trail
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        assert!(trail.contains(&"debate"));
        assert!(trail.contains(&"reflection"));
    }
}
