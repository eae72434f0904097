//! Scientific strategy: hypotheses, debate, implications, rigor reflection.

use std::sync::Arc;

use serde_json::json;

use crate::domain::models::{AgentExecutionResult, TaskInput, TaskResult, TaskUpdateKind};
use crate::services::budget::TokenMeter;
use crate::services::memory::{inject_memory, maybe_compress_context};
use crate::services::postprocess::assemble_metadata;
use crate::services::reasoning::{
    ChainConfig, ChainOfThought, DebateConfig, DebatePattern, ReflectionPattern, TreeConfig,
    TreeOfThoughts,
};

use super::helpers::{base_context, emit_update, select_model_tier};
use super::StrategyContext;

pub struct ScientificStrategy {
    ctx: Arc<StrategyContext>,
}

impl ScientificStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    #[allow(clippy::too_many_lines)]
    pub async fn run(&self, input: TaskInput) -> TaskResult {
        let ctx = &self.ctx;
        if input.query.trim().is_empty() {
            return TaskResult::failure("Invalid task plan: empty query", 0);
        }
        let config = ctx.load_config().await;
        let scientific = &config.scientific;
        let mut context = base_context(&input);
        inject_memory(&ctx.memory, &ctx.versions, &input, &mut context).await;
        maybe_compress_context(&ctx.memory, &ctx.versions, &input).await;

        emit_update(
            &ctx.events,
            &ctx.workflow_id,
            TaskUpdateKind::WorkflowStarted,
            json!({"strategy": "scientific", "query": input.query}),
        )
        .await;

        let tier = select_model_tier(&context, 0.8, &config);
        let mut meter = TokenMeter::new();
        let mut trail = vec!["chain_of_thought".to_string()];

        // 1. Enumerate hypotheses.
        let chain = ChainOfThought::new(
            ctx.activities.clone(),
            ChainConfig {
                max_steps: scientific.num_hypotheses,
                prompt_template: Some(
                    "Question: {query}\nHypotheses so far:\n{steps}\n\
                     State one new testable hypothesis."
                        .to_string(),
                ),
            },
        )
        .run(&input.query, context.clone(), input.session_id.as_deref())
        .await;
        meter.add(chain.total_tokens);
        let hypotheses: Vec<String> = chain
            .steps
            .iter()
            .take(scientific.num_hypotheses as usize)
            .cloned()
            .collect();

        // 2. Contest them: one advocate per hypothesis.
        trail.push("debate".to_string());
        let perspectives: Vec<String> = (1..=hypotheses.len())
            .map(|i| format!("hypothesis_{i}"))
            .collect();
        let framing: String = hypotheses
            .iter()
            .enumerate()
            .map(|(i, h)| format!("hypothesis_{}: {h}\n", i + 1))
            .collect();
        let debate = DebatePattern::new(
            ctx.activities.clone(),
            DebateConfig {
                num_debaters: hypotheses.len().max(1) as u32,
                max_rounds: scientific.max_debate_rounds,
                use_moderator: scientific.use_moderator,
                enable_voting: true,
                perspectives,
            },
        )
        .run(
            &format!("{}\n\nCompeting hypotheses:\n{framing}", input.query),
            context.clone(),
            input.session_id.as_deref(),
        )
        .await;
        meter.add(debate.total_tokens);

        let winning_hypothesis = debate
            .votes
            .iter()
            .max_by(|(name_a, votes_a), (name_b, votes_b)| {
                votes_a.cmp(votes_b).then(name_b.cmp(name_a))
            })
            .and_then(|(name, _)| {
                name.strip_prefix("hypothesis_")
                    .and_then(|n| n.parse::<usize>().ok())
                    .and_then(|n| hypotheses.get(n - 1))
            })
            .cloned()
            .unwrap_or_else(|| debate.winning_argument.clone());

        // 3. Explore implications of the winner.
        trail.push("tree_of_thoughts".to_string());
        let implications = TreeOfThoughts::new(
            ctx.activities.clone(),
            TreeConfig {
                max_depth: scientific.implications_max_depth,
                ..Default::default()
            },
        )
        .run(
            &format!(
                "If this hypothesis holds, what follows?\n\nHypothesis: {winning_hypothesis}"
            ),
            context.clone(),
            input.session_id.as_deref(),
        )
        .await;
        meter.add(implications.total_tokens);

        // 4. Rigor pass.
        trail.push("reflection".to_string());
        let votes_rendered: String = debate
            .votes
            .iter()
            .map(|(name, count)| format!("- {name}: {count}\n"))
            .collect();
        let draft = format!(
            "# Scientific Analysis\n\n## Hypotheses\n{}\n## Winning Hypothesis\n{winning_hypothesis}\n\n\
             ## Consensus\n{}\n\n## Votes\n{votes_rendered}\n## Implications\n{}\n\n\
             ## Final Synthesis\n{}\n",
            hypotheses
                .iter()
                .enumerate()
                .map(|(i, h)| format!("{}. {h}\n", i + 1))
                .collect::<String>(),
            if debate.consensus_reached {
                "Consensus reached."
            } else {
                "No consensus."
            },
            implications.best_path.join(" → "),
            debate.final_position,
        );
        let reflection = ReflectionPattern::new(
            ctx.activities.clone(),
            config.reflection.max_retries,
            config.reflection.confidence_threshold,
            vec![
                "scientific_rigor".to_string(),
                "falsifiability".to_string(),
                "evidence_grounding".to_string(),
            ],
        )
        .run(
            &input.query,
            &draft,
            &[],
            context.clone(),
            input.session_id.as_deref(),
        )
        .await;
        meter.add(reflection.total_tokens);

        let final_text = format!(
            "{}\n## Confidence\n{:.2}\n",
            if reflection.improved {
                reflection.result.clone()
            } else {
                draft
            },
            reflection.confidence,
        );

        let synthetic = AgentExecutionResult {
            agent_id: "scientific".to_string(),
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
        metadata.insert("hypotheses".into(), json!(hypotheses));
        metadata.insert("consensus_reached".into(), json!(debate.consensus_reached));
        metadata.insert("confidence".into(), json!(reflection.confidence));

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
    async fn test_report_has_all_sections() {
        let activities = Arc::new(MockActivities::new());
        activities
            .set_agent_response("cot_step_1", "Hypothesis about X")
            .await;
        activities
            .set_agent_response("cot_step_2", "Hypothesis about Y")
            .await;
        activities
            .set_agent_response("cot_step_3", "Hypothesis about Z")
            .await;
        activities
            .set_agent_response_prefix("vote_", "hypothesis_1 is strongest")
            .await;
        activities
            .set_agent_response_prefix("reflect_critique", "rigorous. Confidence: 0.9")
            .await;

        let events = Arc::new(RecordingEventSink::new());
        let ctx = Arc::new(
            StrategyContext::new(activities, events).with_retry(RetryPolicy::none()),
        );

        let result = ScientificStrategy::new(ctx)
            .run(TaskInput::new("why does X happen?"))
            .await;

        assert!(result.success);
        for section in [
            "## Hypotheses",
            "## Winning Hypothesis",
            "## Consensus",
            "## Votes",
            "## Implications",
            "## Final Synthesis",
            "## Confidence",
        ] {
            assert!(result.result.contains(section), "missing {section}");
        }
        assert_eq!(result.metadata.get("consensus_reached"), Some(&json!(true)));
        assert!(result.result.contains("Hypothesis about X"));
    }
}
