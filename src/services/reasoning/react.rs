//! React loop: reason, act, observe, bounded.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::domain::ports::{Activities, EventSink};
use crate::domain::models::{TaskUpdate, TaskUpdateKind};
use crate::services::retry::RetryPolicy;
use crate::services::snippet::summarize_recent;

use super::call_agent;

/// Loop bounds and windows.
#[derive(Debug, Clone)]
pub struct ReactConfig {
    pub max_iterations: u32,
    /// Safety caps on produced elements.
    pub max_thoughts: u32,
    pub max_actions: u32,
    pub max_observations: u32,
    /// How many recent observations are carried into the next prompt.
    pub observation_window: usize,
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            max_thoughts: 15,
            max_actions: 12,
            max_observations: 12,
            observation_window: 5,
        }
    }
}

/// Loop state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReactState {
    Reasoning,
    Acting,
    Observing,
    Done,
}

/// Final report of a react loop run.
#[derive(Debug, Clone, Default)]
pub struct ReactOutcome {
    pub answer: String,
    pub iterations: u32,
    pub thoughts: u32,
    pub actions: u32,
    pub observations: u32,
    pub total_tokens: u64,
    pub success: bool,
}

/// Parsed actor proposal.
enum Proposal {
    Done(String),
    ToolCall { tool: String, params: BTreeMap<String, Value> },
    /// Reasoning-only iteration, no tool.
    Continue,
}

fn parse_proposal(text: &str) -> Proposal {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();
        let params: BTreeMap<String, Value> = value
            .get("input")
            .and_then(Value::as_object)
            .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        return match action.as_str() {
            "done" => Proposal::Done(
                value
                    .get("input")
                    .and_then(|i| i.get("answer"))
                    .and_then(Value::as_str)
                    .unwrap_or(trimmed)
                    .to_string(),
            ),
            "" | "none" | "continue" | "think" => Proposal::Continue,
            // Unknown action names are implicit tool calls.
            tool => Proposal::ToolCall {
                tool: tool.to_string(),
                params,
            },
        };
    }
    Proposal::Continue
}

/// Each iteration consumes one reasoner call and at most one actor call
/// plus one tool call. Terminates on an explicit `done`, on the iteration
/// bound, on any safety cap, or after three consecutive tool-less
/// iterations (reasoning-loop convergence, reported as a partial summary).
pub struct ReactLoop {
    activities: Arc<dyn Activities>,
    events: Arc<dyn EventSink>,
    retry: RetryPolicy,
    config: ReactConfig,
}

impl ReactLoop {
    pub fn new(
        activities: Arc<dyn Activities>,
        events: Arc<dyn EventSink>,
        config: ReactConfig,
    ) -> Self {
        Self {
            activities,
            events,
            retry: RetryPolicy::default(),
            config,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // The intermediate Acting/Observing assignments model the state machine
    // even where the next read is the loop condition.
    #[allow(unused_assignments)]
    pub async fn run(
        &self,
        workflow_id: &str,
        query: &str,
        context: BTreeMap<String, Value>,
        session_id: Option<&str>,
    ) -> ReactOutcome {
        let mut outcome = ReactOutcome::default();
        let mut history: Vec<String> = Vec::new();
        let mut state = if self.config.max_iterations == 0 {
            ReactState::Done
        } else {
            ReactState::Reasoning
        };
        let mut iterations_without_tool = 0u32;

        while state != ReactState::Done {
            if outcome.iterations >= self.config.max_iterations {
                outcome.answer = summarize_recent(&history, 3);
                break;
            }
            outcome.iterations += 1;
            let mut used_tool = false;

            // Reasoning: one reasoner call per iteration.
            debug_assert_eq!(state, ReactState::Reasoning);
            let window_start = history.len().saturating_sub(self.config.observation_window);
            let thought_prompt = format!(
                "Task: {query}\n\nRecent observations:\n{}\n\nThink about the next step.",
                history[window_start..].join("\n"),
            );
            let thought = call_agent(
                &self.activities,
                &self.retry,
                "reasoner",
                "reasoner",
                thought_prompt,
                context.clone(),
                session_id,
            )
            .await;
            outcome.total_tokens = outcome.total_tokens.saturating_add(thought.tokens_used);
            outcome.thoughts += 1;
            if outcome.thoughts > self.config.max_thoughts {
                outcome.answer = summarize_recent(&history, 3);
                break;
            }
            history.push(format!("thought: {}", thought.response));

            // Acting: propose at most one action.
            state = ReactState::Acting;
            let action_prompt = format!(
                "Task: {query}\nLatest thought: {}\n\nPropose the next action as JSON \
                 {{\"action\": \"<tool-or-done>\", \"input\": {{...}}}}.",
                thought.response,
            );
            let proposal_result = call_agent(
                &self.activities,
                &self.retry,
                "actor",
                "actor",
                action_prompt,
                context.clone(),
                session_id,
            )
            .await;
            outcome.total_tokens = outcome
                .total_tokens
                .saturating_add(proposal_result.tokens_used);
            outcome.actions += 1;
            if outcome.actions > self.config.max_actions {
                outcome.answer = summarize_recent(&history, 3);
                break;
            }

            match parse_proposal(&proposal_result.response) {
                Proposal::Done(answer) => {
                    outcome.answer = answer;
                    outcome.success = true;
                    state = ReactState::Done;
                    continue;
                }
                Proposal::ToolCall { tool, params } => {
                    // Observing: execute the action and fold the observation in.
                    state = ReactState::Observing;
                    used_tool = true;
                    let observation = match self
                        .activities
                        .invoke_tool(&tool, &params, session_id)
                        .await
                    {
                        Ok(execution) if execution.success => execution.output.to_string(),
                        Ok(execution) => format!(
                            "tool {tool} failed: {}",
                            execution.error.unwrap_or_else(|| "unknown error".into())
                        ),
                        Err(err) => format!("tool {tool} failed: {err}"),
                    };
                    outcome.observations += 1;
                    if outcome.observations > self.config.max_observations {
                        outcome.answer = summarize_recent(&history, 3);
                        break;
                    }
                    history.push(format!("observation: {observation}"));
                }
                Proposal::Continue => {}
            }

            if used_tool {
                iterations_without_tool = 0;
            } else {
                iterations_without_tool += 1;
                if iterations_without_tool >= 3 {
                    // Reasoning-loop convergence: no progress through tools.
                    debug!(
                        iterations = outcome.iterations,
                        "react loop converged without tool use"
                    );
                    outcome.answer = summarize_recent(&history, 3);
                    outcome.success = true;
                    state = ReactState::Done;
                    continue;
                }
            }

            let _ = self
                .events
                .emit(
                    TaskUpdate::new(workflow_id, TaskUpdateKind::Progress).with_payload(json!({
                        "pattern": "react",
                        "iteration": outcome.iterations,
                    })),
                )
                .await;

            state = ReactState::Reasoning;
        }

        if state == ReactState::Done && outcome.answer.is_empty() {
            // MaxIterations == 0: immediate done-summary.
            outcome.answer = summarize_recent(&history, 3);
            outcome.success = true;
        }
        if outcome.answer.is_empty() {
            outcome.answer = summarize_recent(&history, 3);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::inmemory::{MockActivities, NullEventSink};

    fn react(activities: Arc<MockActivities>, config: ReactConfig) -> ReactLoop {
        ReactLoop::new(activities, Arc::new(NullEventSink), config)
    }

    #[tokio::test]
    async fn test_zero_iterations_is_immediate_done() {
        let activities = Arc::new(MockActivities::new());
        let outcome = react(
            activities,
            ReactConfig {
                max_iterations: 0,
                ..Default::default()
            },
        )
        .run("wf", "query", BTreeMap::new(), None)
        .await;

        assert!(outcome.success);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(outcome.thoughts, 0);
    }

    #[tokio::test]
    async fn test_explicit_done_terminates() {
        let activities = Arc::new(MockActivities::new());
        activities
            .set_agent_response("actor", r#"{"action": "done", "input": {"answer": "42"}}"#)
            .await;

        let outcome = react(activities, ReactConfig::default())
            .run("wf", "query", BTreeMap::new(), None)
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.answer, "42");
        assert_eq!(outcome.iterations, 1);
    }

    #[tokio::test]
    async fn test_convergence_after_three_toolless_iterations() {
        let activities = Arc::new(MockActivities::new());
        // First iteration calls a tool, then the actor only reasons.
        activities
            .set_agent_response_sequence(
                "actor",
                vec![
                    r#"{"action": "web_search", "input": {"q": "x"}}"#.to_string(),
                    r#"{"action": "none"}"#.to_string(),
                    r#"{"action": "none"}"#.to_string(),
                    r#"{"action": "none"}"#.to_string(),
                ],
            )
            .await;

        let outcome = react(activities, ReactConfig::default())
            .run("wf", "query", BTreeMap::new(), None)
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.iterations, 4);
        assert!(outcome.answer.contains("Partial findings"));
    }

    #[tokio::test]
    async fn test_iteration_bound() {
        let activities = Arc::new(MockActivities::new());
        // Tool call every iteration: never converges, never done.
        activities
            .set_agent_response("actor", r#"{"action": "web_search", "input": {}}"#)
            .await;

        let outcome = react(
            activities,
            ReactConfig {
                max_iterations: 4,
                ..Default::default()
            },
        )
        .run("wf", "query", BTreeMap::new(), None)
        .await;

        assert_eq!(outcome.iterations, 4);
        assert_eq!(outcome.observations, 4);
        assert!(outcome.answer.contains("Partial findings"));
    }

    #[tokio::test]
    async fn test_unknown_action_is_implicit_tool_call() {
        let activities = Arc::new(MockActivities::new());
        activities
            .set_agent_response_sequence(
                "actor",
                vec![
                    r#"{"action": "mystery_probe", "input": {}}"#.to_string(),
                    r#"{"action": "done", "input": {"answer": "ok"}}"#.to_string(),
                ],
            )
            .await;

        let outcome = react(activities.clone(), ReactConfig::default())
            .run("wf", "query", BTreeMap::new(), None)
            .await;

        assert!(outcome.success);
        assert_eq!(activities.tool_invocations().await, vec!["mystery_probe"]);
    }
}
