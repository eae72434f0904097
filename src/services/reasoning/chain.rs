//! Chain-of-thought: linear reasoning-step generation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::domain::ports::Activities;
use crate::services::retry::RetryPolicy;

use super::{call_agent, parse_confidence};

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub max_steps: u32,
    /// Optional template; `{query}` and `{steps}` are substituted.
    pub prompt_template: Option<String>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_steps: 5,
            prompt_template: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChainOutcome {
    pub steps: Vec<String>,
    pub final_answer: String,
    pub confidence: f64,
    pub total_tokens: u64,
}

/// Produces up to `max_steps` reasoning steps, then a final answer with a
/// confidence estimate. A step that declares a final answer stops the chain
/// early.
pub struct ChainOfThought {
    activities: Arc<dyn Activities>,
    retry: RetryPolicy,
    config: ChainConfig,
}

impl ChainOfThought {
    pub fn new(activities: Arc<dyn Activities>, config: ChainConfig) -> Self {
        Self {
            activities,
            retry: RetryPolicy::default(),
            config,
        }
    }

    pub async fn run(
        &self,
        query: &str,
        context: BTreeMap<String, Value>,
        session_id: Option<&str>,
    ) -> ChainOutcome {
        let mut outcome = ChainOutcome::default();

        for step_index in 0..self.config.max_steps {
            let steps_so_far = outcome.steps.join("\n");
            let prompt = match &self.config.prompt_template {
                Some(template) => template
                    .replace("{query}", query)
                    .replace("{steps}", &steps_so_far),
                None => format!(
                    "Problem: {query}\n\nReasoning so far:\n{steps_so_far}\n\n\
                     Produce reasoning step {}.",
                    step_index + 1
                ),
            };

            let step = call_agent(
                &self.activities,
                &self.retry,
                &format!("cot_step_{}", step_index + 1),
                "reasoner",
                prompt,
                context.clone(),
                session_id,
            )
            .await;
            outcome.total_tokens = outcome.total_tokens.saturating_add(step.tokens_used);
            if !step.success {
                break;
            }
            let done = step.response.to_ascii_lowercase().contains("final answer");
            outcome.steps.push(step.response);
            if done {
                break;
            }
        }

        let final_prompt = format!(
            "Problem: {query}\n\nReasoning steps:\n{}\n\n\
             State the final answer, then your confidence in [0, 1].",
            outcome.steps.join("\n"),
        );
        let final_call = call_agent(
            &self.activities,
            &self.retry,
            "cot_final",
            "reasoner",
            final_prompt,
            context,
            session_id,
        )
        .await;
        outcome.total_tokens = outcome.total_tokens.saturating_add(final_call.tokens_used);
        outcome.final_answer = final_call.response;
        outcome.confidence = parse_confidence(&outcome.final_answer).unwrap_or(0.5);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::inmemory::MockActivities;

    #[tokio::test]
    async fn test_runs_steps_then_final() {
        let activities = Arc::new(MockActivities::new());
        activities
            .set_agent_response("cot_final", "The answer is 12. Confidence: 0.9")
            .await;

        let chain = ChainOfThought::new(
            activities,
            ChainConfig {
                max_steps: 3,
                prompt_template: None,
            },
        );
        let outcome = chain.run("2+10?", BTreeMap::new(), None).await;

        assert_eq!(outcome.steps.len(), 3);
        assert!(outcome.final_answer.contains("12"));
        assert!((outcome.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_early_stop_on_final_answer_marker() {
        let activities = Arc::new(MockActivities::new());
        activities
            .set_agent_response("cot_step_2", "Therefore the final answer is clear.")
            .await;

        let chain = ChainOfThought::new(activities, ChainConfig::default());
        let outcome = chain.run("question", BTreeMap::new(), None).await;

        assert_eq!(outcome.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_template_substitution() {
        let activities = Arc::new(MockActivities::new());
        let chain = ChainOfThought::new(
            activities.clone(),
            ChainConfig {
                max_steps: 1,
                prompt_template: Some("Q={query} S={steps}".to_string()),
            },
        );
        chain.run("my question", BTreeMap::new(), None).await;

        let request = activities.request_for("cot_step_1").await.unwrap();
        assert_eq!(request.query, "Q=my question S=");
    }
}
