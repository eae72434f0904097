//! Reflection: critique-and-rewrite with a confidence target.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::domain::models::AgentExecutionResult;
use crate::domain::ports::Activities;
use crate::services::retry::RetryPolicy;

use super::{call_agent, parse_confidence};

#[derive(Debug, Clone, Default)]
pub struct ReflectionOutcome {
    /// The (possibly improved) result text.
    pub result: String,
    pub confidence: f64,
    pub attempts: u32,
    pub improved: bool,
    pub total_tokens: u64,
}

/// Critiques a draft against criteria and rewrites until the estimated
/// confidence reaches the threshold or retries run out.
///
/// Callers must skip reflection when the plan contains a synthesis subtask,
/// to preserve user-specified formatting.
pub struct ReflectionPattern {
    activities: Arc<dyn Activities>,
    retry: RetryPolicy,
    max_retries: u32,
    confidence_threshold: f64,
    criteria: Vec<String>,
}

impl ReflectionPattern {
    pub fn new(
        activities: Arc<dyn Activities>,
        max_retries: u32,
        confidence_threshold: f64,
        criteria: Vec<String>,
    ) -> Self {
        Self {
            activities,
            retry: RetryPolicy::default(),
            max_retries,
            confidence_threshold,
            criteria,
        }
    }

    pub async fn run(
        &self,
        query: &str,
        draft: &str,
        agent_results: &[AgentExecutionResult],
        context: BTreeMap<String, Value>,
        session_id: Option<&str>,
    ) -> ReflectionOutcome {
        let mut outcome = ReflectionOutcome {
            result: draft.to_string(),
            confidence: 0.0,
            ..Default::default()
        };
        let criteria = self.criteria.join(", ");
        let findings: String = agent_results
            .iter()
            .filter(|r| r.success)
            .map(|r| format!("[{}] {}\n", r.agent_id, r.response))
            .collect();

        for attempt in 0..=self.max_retries {
            outcome.attempts = attempt + 1;
            let critique_prompt = format!(
                "Task: {query}\n\nDraft answer:\n{}\n\nSource findings:\n{findings}\n\
                 Critique the draft against: {criteria}. \
                 End with your confidence in [0, 1].",
                outcome.result,
            );
            let critique = call_agent(
                &self.activities,
                &self.retry,
                &format!("reflect_critique_{attempt}"),
                "critic",
                critique_prompt,
                context.clone(),
                session_id,
            )
            .await;
            outcome.total_tokens = outcome.total_tokens.saturating_add(critique.tokens_used);
            if !critique.success {
                break;
            }
            outcome.confidence = parse_confidence(&critique.response).unwrap_or(0.5);
            if outcome.confidence >= self.confidence_threshold {
                debug!(
                    attempt,
                    confidence = outcome.confidence,
                    "reflection confidence target reached"
                );
                break;
            }
            if attempt == self.max_retries {
                break;
            }

            let rewrite_prompt = format!(
                "Task: {query}\n\nDraft answer:\n{}\n\nCritique:\n{}\n\n\
                 Rewrite the answer addressing the critique. Keep the format.",
                outcome.result, critique.response,
            );
            let rewrite = call_agent(
                &self.activities,
                &self.retry,
                &format!("reflect_rewrite_{attempt}"),
                "editor",
                rewrite_prompt,
                context.clone(),
                session_id,
            )
            .await;
            outcome.total_tokens = outcome.total_tokens.saturating_add(rewrite.tokens_used);
            if rewrite.success && !rewrite.response.trim().is_empty() {
                outcome.result = rewrite.response;
                outcome.improved = true;
            }
        }

        outcome
    }
}
