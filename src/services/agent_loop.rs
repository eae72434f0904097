//! Persistent per-agent loop: mailbox, workspace, reason, act.
//!
//! Each iteration fetches pending peer messages and new workspace entries,
//! asks the reason-and-plan activity for the next action, and dispatches it.
//! Safety caps bound tool failures and reasoning-only convergence.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::domain::models::{
    AgentExecutionResult, AgentMessage, MessageKind, TaskUpdate, TaskUpdateKind, ToolExecution,
    WorkspaceEntry,
};
use crate::domain::ports::{Activities, EventSink, LoopStepRequest, Mailbox, TeamMember, Workspace};
use crate::services::retry::{is_transient_error, RetryPolicy};
use crate::services::snippet::{summarize_recent, value_snippet};

/// Mailbox address of the swarm supervisor.
pub const SUPERVISOR_ID: &str = "supervisor";

/// Consecutive permanent tool errors that abort the loop.
const MAX_CONSECUTIVE_TOOL_ERRORS: u32 = 3;
/// Consecutive tool-less iterations that count as convergence.
const MAX_TOOLLESS_ITERATIONS: u32 = 3;
/// Transient retries for one tool call before treating it as permanent.
const MAX_TRANSIENT_RETRIES: u32 = 5;
/// Ceiling for the escalating transient backoff.
const TRANSIENT_BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    pub max_iterations: u32,
    pub workspace_max_entries: usize,
    pub workspace_snippet_chars: usize,
    /// Outbound peer-message cap per agent.
    pub message_cap: usize,
    /// Base for the linearly escalating transient backoff.
    pub transient_backoff_base: Duration,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            workspace_max_entries: 20,
            workspace_snippet_chars: 400,
            message_cap: 20,
            transient_backoff_base: Duration::from_secs(1),
        }
    }
}

/// Persistent agent workflow cycling mailbox-fetch, workspace-fetch, reason
/// step, act.
pub struct AgentLoop {
    activities: Arc<dyn Activities>,
    mailbox: Arc<dyn Mailbox>,
    workspace: Arc<dyn Workspace>,
    events: Arc<dyn EventSink>,
    retry: RetryPolicy,
    config: AgentLoopConfig,
}

impl AgentLoop {
    pub fn new(
        activities: Arc<dyn Activities>,
        mailbox: Arc<dyn Mailbox>,
        workspace: Arc<dyn Workspace>,
        events: Arc<dyn EventSink>,
        config: AgentLoopConfig,
    ) -> Self {
        Self {
            activities,
            mailbox,
            workspace,
            events,
            retry: RetryPolicy::default(),
            config,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[allow(clippy::too_many_lines)]
    pub async fn run(
        &self,
        workflow_id: &str,
        agent_id: &str,
        task: &str,
        roster: Vec<TeamMember>,
        context: BTreeMap<String, Value>,
    ) -> AgentExecutionResult {
        let started = std::time::Instant::now();
        let mut result = AgentExecutionResult {
            agent_id: agent_id.to_string(),
            ..Default::default()
        };
        let mut history: Vec<String> = Vec::new();
        let mut workspace_high_water = 0u64;
        let mut consecutive_tool_errors = 0u32;
        let mut toolless_iterations = 0u32;
        let mut messages_sent = 0usize;
        let mut help_requested = false;

        let _ = self
            .events
            .emit(
                TaskUpdate::new(workflow_id, TaskUpdateKind::AgentStarted)
                    .with_agent(agent_id)
                    .with_payload(json!({"task": task})),
            )
            .await;

        for iteration in 0..self.config.max_iterations {
            let is_final = iteration + 1 == self.config.max_iterations;

            // 1. Pending peer messages.
            let messages = self.mailbox.fetch(agent_id).await.unwrap_or_default();

            // 2. New workspace entries above the local high-water mark,
            //    snippet-truncated without splitting multi-byte characters.
            let entries = self
                .workspace
                .list_since(workspace_high_water, self.config.workspace_max_entries)
                .await
                .unwrap_or_default();
            let snippets: Vec<WorkspaceEntry> = entries
                .into_iter()
                .map(|mut entry| {
                    workspace_high_water = workspace_high_water.max(entry.sequence);
                    entry.data = Value::String(value_snippet(
                        &entry.data,
                        self.config.workspace_snippet_chars,
                    ));
                    entry
                })
                .collect();

            // 3. Reason-and-plan step.
            let request = LoopStepRequest {
                agent_id: agent_id.to_string(),
                task: task.to_string(),
                iteration,
                max_iterations: self.config.max_iterations,
                messages,
                history: history.clone(),
                roster: roster.clone(),
                workspace: snippets,
                context: context.clone(),
            };
            let decision = match self
                .retry
                .run("AgentLoopStep", || {
                    self.activities.agent_loop_step(request.clone())
                })
                .await
            {
                Ok(decision) => decision,
                Err(err) => {
                    result.success = false;
                    result.error = Some(err.to_string());
                    result.response = summarize_recent(&history, 3);
                    result.duration_ms = started.elapsed().as_millis() as u64;
                    return result;
                }
            };
            result.tokens_used = result.tokens_used.saturating_add(decision.tokens_used);

            // Final iteration: force `done` so synthesis context stays bounded.
            let forced_done = is_final && decision.action != "done";
            let action = if forced_done {
                "done".to_string()
            } else {
                decision.action.to_ascii_lowercase()
            };

            let mut used_tool = false;
            match action.as_str() {
                "done" => {
                    result.response = if forced_done || decision.response.trim().is_empty() {
                        summarize_recent(&history, 3)
                    } else {
                        decision.response.clone()
                    };
                    result.success = true;
                    break;
                }
                "send_message" => {
                    if messages_sent >= self.config.message_cap {
                        history.push("send_message rejected: message cap reached".to_string());
                    } else {
                        let to = decision
                            .params
                            .get("to")
                            .and_then(Value::as_str)
                            .unwrap_or(SUPERVISOR_ID)
                            .to_string();
                        let payload = decision
                            .params
                            .get("payload")
                            .cloned()
                            .unwrap_or(Value::Null);
                        let message =
                            AgentMessage::new(agent_id, &to, MessageKind::Info, payload);
                        match self.mailbox.send(message).await {
                            Ok(()) => {
                                messages_sent += 1;
                                history.push(format!("sent message to {to}"));
                            }
                            Err(err) => history.push(format!("send_message failed: {err}")),
                        }
                    }
                }
                "publish_data" => {
                    let topic = decision
                        .params
                        .get("topic")
                        .and_then(Value::as_str)
                        .unwrap_or("general")
                        .to_string();
                    let data = decision.params.get("data").cloned().unwrap_or(Value::Null);
                    match self.workspace.append(&topic, agent_id, data).await {
                        Ok(entry) => history.push(format!(
                            "published to {topic} (sequence {})",
                            entry.sequence
                        )),
                        Err(err) => history.push(format!("publish_data failed: {err}")),
                    }
                }
                "request_help" => {
                    if help_requested {
                        history.push("help already requested".to_string());
                    } else {
                        help_requested = true;
                        let reason = decision
                            .params
                            .get("reason")
                            .and_then(Value::as_str)
                            .unwrap_or("unspecified")
                            .to_string();
                        let message = AgentMessage::new(
                            agent_id,
                            SUPERVISOR_ID,
                            MessageKind::Request,
                            json!({"type": "request_help", "reason": reason}),
                        );
                        match self.mailbox.send(message).await {
                            Ok(()) => history.push("requested help from supervisor".to_string()),
                            Err(err) => history.push(format!("request_help failed: {err}")),
                        }
                    }
                }
                // `tool_call` and every unknown action name dispatch a tool.
                other => {
                    used_tool = true;
                    let tool = decision
                        .params
                        .get("tool")
                        .and_then(Value::as_str)
                        .map_or_else(
                            || {
                                if other == "tool_call" {
                                    "unknown".to_string()
                                } else {
                                    other.to_string()
                                }
                            },
                            str::to_string,
                        );
                    match self
                        .invoke_tool_with_backoff(&tool, &decision.params, &context)
                        .await
                    {
                        Ok(execution) => {
                            consecutive_tool_errors = 0;
                            if !result.tools_used.contains(&tool) {
                                result.tools_used.push(tool.clone());
                            }
                            history.push(format!(
                                "{tool}: {}",
                                value_snippet(&execution.output, 500)
                            ));
                            result.tool_executions.push(execution);
                        }
                        Err(error_message) => {
                            consecutive_tool_errors += 1;
                            history.push(format!("tool {tool} error: {error_message}"));
                            result.tool_executions.push(ToolExecution {
                                tool: tool.clone(),
                                success: false,
                                output: Value::Null,
                                error: Some(error_message),
                            });
                            if consecutive_tool_errors >= MAX_CONSECUTIVE_TOOL_ERRORS {
                                warn!(agent_id, "aborting after consecutive tool errors");
                                result.success = false;
                                result.error = Some("consecutive tool errors".to_string());
                                result.response = summarize_recent(&history, 3);
                                result.duration_ms = started.elapsed().as_millis() as u64;
                                self.emit_completed(workflow_id, agent_id, &result).await;
                                return result;
                            }
                        }
                    }
                }
            }

            if used_tool {
                toolless_iterations = 0;
            } else {
                toolless_iterations += 1;
                if toolless_iterations >= MAX_TOOLLESS_ITERATIONS {
                    // Reasoning-loop convergence: wrap up with partial findings.
                    debug!(agent_id, iteration, "agent converged without tool use");
                    result.response = summarize_recent(&history, 3);
                    result.success = true;
                    break;
                }
            }

            let _ = self
                .events
                .emit(
                    TaskUpdate::new(workflow_id, TaskUpdateKind::Progress)
                        .with_agent(agent_id)
                        .with_payload(json!({"iteration": iteration + 1})),
                )
                .await;
        }

        if result.response.is_empty() {
            result.response = summarize_recent(&history, 3);
            result.success = true;
        }
        result.duration_ms = started.elapsed().as_millis() as u64;
        self.emit_completed(workflow_id, agent_id, &result).await;
        result
    }

    /// Invoke one tool, retrying transient failures with linearly escalating
    /// backoff capped at 30 s. Transient attempts do not count toward the
    /// consecutive-permanent-error threshold.
    async fn invoke_tool_with_backoff(
        &self,
        tool: &str,
        params: &BTreeMap<String, Value>,
        context: &BTreeMap<String, Value>,
    ) -> Result<ToolExecution, String> {
        let session_id = context
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut transient_attempts = 0u32;

        loop {
            let error_message = match self
                .activities
                .invoke_tool(tool, params, session_id.as_deref())
                .await
            {
                Ok(execution) if execution.success => return Ok(execution),
                Ok(execution) => execution
                    .error
                    .unwrap_or_else(|| "tool reported failure".to_string()),
                Err(err) => err.to_string(),
            };

            if is_transient_error(&error_message) && transient_attempts < MAX_TRANSIENT_RETRIES {
                transient_attempts += 1;
                let delay = self
                    .config
                    .transient_backoff_base
                    .saturating_mul(transient_attempts)
                    .min(TRANSIENT_BACKOFF_CAP);
                debug!(
                    tool,
                    attempt = transient_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "transient tool error, backing off"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            return Err(error_message);
        }
    }

    async fn emit_completed(
        &self,
        workflow_id: &str,
        agent_id: &str,
        result: &AgentExecutionResult,
    ) {
        let _ = self
            .events
            .emit(
                TaskUpdate::new(workflow_id, TaskUpdateKind::AgentCompleted)
                    .with_agent(agent_id)
                    .with_payload(json!({
                        "success": result.success,
                        "tokens_used": result.tokens_used,
                    })),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::inmemory::{
        InMemoryMailbox, InMemoryWorkspace, MockActivities, NullEventSink,
    };

    fn setup() -> (
        Arc<MockActivities>,
        Arc<InMemoryMailbox>,
        Arc<InMemoryWorkspace>,
        AgentLoop,
    ) {
        let activities = Arc::new(MockActivities::new());
        let mailbox = Arc::new(InMemoryMailbox::new());
        let workspace = Arc::new(InMemoryWorkspace::new());
        let agent_loop = AgentLoop::new(
            activities.clone(),
            mailbox.clone(),
            workspace.clone(),
            Arc::new(NullEventSink),
            AgentLoopConfig {
                transient_backoff_base: Duration::from_millis(1),
                ..Default::default()
            },
        );
        (activities, mailbox, workspace, agent_loop)
    }

    #[tokio::test]
    async fn test_done_action_returns_response() {
        let (activities, _, _, agent_loop) = setup();
        activities
            .set_loop_decisions(vec![decision("done", json!({}), "all finished")])
            .await;

        let result = agent_loop
            .run("wf", "agent-1", "do work", vec![], BTreeMap::new())
            .await;

        assert!(result.success);
        assert_eq!(result.response, "all finished");
    }

    #[tokio::test]
    async fn test_aborts_after_three_consecutive_permanent_tool_errors() {
        let (activities, _, _, agent_loop) = setup();
        activities.fail_tool("broken_tool", "invalid arguments").await;
        activities
            .set_loop_decisions(vec![
                decision("tool_call", json!({"tool": "broken_tool"}), ""),
                decision("tool_call", json!({"tool": "broken_tool"}), ""),
                decision("tool_call", json!({"tool": "broken_tool"}), ""),
                decision("done", json!({}), "never reached"),
            ])
            .await;

        let result = agent_loop
            .run("wf", "agent-1", "do work", vec![], BTreeMap::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("consecutive tool errors"));
        assert_eq!(result.tool_executions.len(), 3);
    }

    #[tokio::test]
    async fn test_transient_errors_do_not_count_as_permanent() {
        let (activities, _, _, agent_loop) = setup();
        // Two transient failures then success, repeated.
        activities
            .fail_tool_transiently("flaky_tool", "429 rate limit", 2)
            .await;
        activities
            .set_loop_decisions(vec![
                decision("tool_call", json!({"tool": "flaky_tool"}), ""),
                decision("done", json!({}), "finished"),
            ])
            .await;

        let result = agent_loop
            .run("wf", "agent-1", "do work", vec![], BTreeMap::new())
            .await;

        assert!(result.success);
        assert_eq!(result.response, "finished");
        // The flaky call eventually succeeded.
        assert_eq!(result.tool_executions.len(), 1);
        assert!(result.tool_executions[0].success);
    }

    #[tokio::test]
    async fn test_converges_after_three_toolless_iterations() {
        let (activities, _, _, agent_loop) = setup();
        activities
            .set_loop_decisions(vec![
                decision("send_message", json!({"to": "agent-2", "payload": {"n": 1}}), ""),
                decision("publish_data", json!({"topic": "notes", "data": "x"}), ""),
                decision("send_message", json!({"to": "agent-2", "payload": {"n": 2}}), ""),
                decision("done", json!({}), "never reached"),
            ])
            .await;

        let result = agent_loop
            .run("wf", "agent-1", "do work", vec![], BTreeMap::new())
            .await;

        assert!(result.success);
        assert!(result.response.contains("Partial findings"));
    }

    #[tokio::test]
    async fn test_final_iteration_forces_done_summary() {
        let activities = Arc::new(MockActivities::new());
        let mailbox = Arc::new(InMemoryMailbox::new());
        let workspace = Arc::new(InMemoryWorkspace::new());
        let agent_loop = AgentLoop::new(
            activities.clone(),
            mailbox,
            workspace,
            Arc::new(NullEventSink),
            AgentLoopConfig {
                max_iterations: 2,
                transient_backoff_base: Duration::from_millis(1),
                ..Default::default()
            },
        );
        activities
            .set_loop_decisions(vec![
                decision("tool_call", json!({"tool": "search"}), ""),
                decision("tool_call", json!({"tool": "search"}), ""),
            ])
            .await;

        let result = agent_loop
            .run("wf", "agent-1", "do work", vec![], BTreeMap::new())
            .await;

        assert!(result.success);
        assert!(result.response.contains("Partial findings"));
    }

    #[tokio::test]
    async fn test_help_requested_at_most_once() {
        let (activities, mailbox, _, agent_loop) = setup();
        activities
            .set_loop_decisions(vec![
                decision("request_help", json!({"reason": "stuck"}), ""),
                decision("request_help", json!({"reason": "still stuck"}), ""),
                decision("done", json!({}), "over"),
            ])
            .await;

        agent_loop
            .run("wf", "agent-1", "do work", vec![], BTreeMap::new())
            .await;

        let help = mailbox.fetch(SUPERVISOR_ID).await.unwrap();
        assert_eq!(help.len(), 1);
        assert!(help[0].is_help_request());
    }

    #[tokio::test]
    async fn test_message_cap_rejects_sends() {
        let activities = Arc::new(MockActivities::new());
        let mailbox = Arc::new(InMemoryMailbox::new());
        let workspace = Arc::new(InMemoryWorkspace::new());
        let agent_loop = AgentLoop::new(
            activities.clone(),
            mailbox.clone(),
            workspace,
            Arc::new(NullEventSink),
            AgentLoopConfig {
                message_cap: 1,
                max_iterations: 5,
                transient_backoff_base: Duration::from_millis(1),
                ..Default::default()
            },
        );
        activities
            .set_loop_decisions(vec![
                decision("send_message", json!({"to": "agent-2", "payload": 1}), ""),
                decision("send_message", json!({"to": "agent-2", "payload": 2}), ""),
                decision("done", json!({}), "over"),
            ])
            .await;

        agent_loop
            .run("wf", "agent-1", "do work", vec![], BTreeMap::new())
            .await;

        assert_eq!(mailbox.fetch("agent-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_workspace_high_water_advances() {
        let (activities, _, workspace, agent_loop) = setup();
        workspace.append("notes", "seed", json!("first")).await.unwrap();
        activities
            .set_loop_decisions(vec![
                decision("publish_data", json!({"topic": "notes", "data": "second"}), ""),
                decision("done", json!({}), "over"),
            ])
            .await;

        agent_loop
            .run("wf", "agent-1", "do work", vec![], BTreeMap::new())
            .await;

        // First step saw the seeded entry; second step saw only the new one.
        let first = activities.loop_request(0).await.unwrap();
        assert_eq!(first.workspace.len(), 1);
        let second = activities.loop_request(1).await.unwrap();
        assert_eq!(second.workspace.len(), 1);
        assert_eq!(second.workspace[0].author, "agent-1");
    }

    fn decision(action: &str, params: Value, response: &str) -> crate::domain::ports::LoopStepDecision {
        let params = params
            .as_object()
            .map(|o| o.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        crate::domain::ports::LoopStepDecision {
            thought: String::new(),
            action: action.to_string(),
            params,
            response: response.to_string(),
            tokens_used: 10,
        }
    }
}
