//! Reasoning patterns layered over the execution layer.
//!
//! Language-agnostic control templates: the react loop, chain-of-thought,
//! tree-of-thoughts search, multi-perspective debate, and reflection. Each
//! pattern only talks to the model through the `ExecuteAgent` activity.

mod chain;
mod debate;
mod react;
mod reflection;
mod tree;

pub use chain::{ChainConfig, ChainOutcome, ChainOfThought};
pub use debate::{DebateConfig, DebateOutcome, DebatePattern};
pub use react::{ReactConfig, ReactLoop, ReactOutcome};
pub use reflection::{ReflectionOutcome, ReflectionPattern};
pub use tree::{ThoughtNode, TreeConfig, TreeOfThoughts, TreeOutcome};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::domain::models::AgentExecutionResult;
use crate::domain::ports::{Activities, AgentRequest};
use crate::services::retry::RetryPolicy;

use super::execution::extract_numeric_value;

/// Dispatch one reasoning-role call. Failures come back as `success=false`
/// results so patterns can degrade instead of aborting.
pub(crate) async fn call_agent(
    activities: &Arc<dyn Activities>,
    retry: &RetryPolicy,
    agent_id: &str,
    role: &str,
    prompt: String,
    context: BTreeMap<String, Value>,
    session_id: Option<&str>,
) -> AgentExecutionResult {
    let request = AgentRequest {
        query: prompt,
        agent_id: agent_id.to_string(),
        context,
        mode: role.to_string(),
        session_id: session_id.map(str::to_string),
        ..Default::default()
    };
    match retry
        .run("ExecuteAgent", || activities.execute_agent(request.clone()))
        .await
    {
        Ok(result) => result,
        Err(err) => AgentExecutionResult::failed(agent_id, err.to_string()),
    }
}

/// Extract a confidence estimate from model text, normalized into `[0, 1]`.
///
/// Prefers a number following the word "confidence"; falls back to the
/// generic numeric scan. Values on a 0-10 or 0-100 scale are normalized.
pub(crate) fn parse_confidence(text: &str) -> Option<f64> {
    let lower = text.to_ascii_lowercase();
    let candidate = lower
        .find("confidence")
        .and_then(|at| extract_numeric_value(&lower[at..]))
        .or_else(|| extract_numeric_value(text))?;

    let normalized = if candidate > 10.0 {
        candidate / 100.0
    } else if candidate > 1.0 {
        candidate / 10.0
    } else {
        candidate
    };
    Some(normalized.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_confidence_prefers_labeled_value() {
        assert_eq!(parse_confidence("score 3, confidence: 0.85"), Some(0.85));
        assert_eq!(parse_confidence("Confidence is 85"), Some(0.85));
        assert_eq!(parse_confidence("confidence 7"), Some(0.7));
    }

    #[test]
    fn test_parse_confidence_fallback_scan() {
        assert_eq!(parse_confidence("roughly 0.5 certain"), Some(0.5));
        assert_eq!(parse_confidence("no numbers"), None);
    }

    #[test]
    fn test_parse_confidence_clamped() {
        assert_eq!(parse_confidence("confidence 150"), Some(1.0));
    }
}
