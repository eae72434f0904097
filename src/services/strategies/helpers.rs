//! Shared strategy helpers: tier selection, context assembly, and event
//! emission.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain::models::{TaskInput, TaskUpdate, TaskUpdateKind, WorkflowConfig};
use crate::domain::ports::EventSink;
use crate::services::execution::ExecutionInputs;

use super::StrategyContext;

/// Abstract model size label resolved to a concrete model by config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Small,
    Medium,
    Large,
}

impl ModelTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }

    fn parse(label: &str) -> Option<Self> {
        match label.to_ascii_lowercase().as_str() {
            "small" => Some(Self::Small),
            "medium" => Some(Self::Medium),
            "large" => Some(Self::Large),
            _ => None,
        }
    }
}

/// Select the model tier for a run.
///
/// Precedence: explicit `model_tier` in context; else `research_strategy`
/// (`quick` maps small, `standard`/`deep`/`academic` map medium); else the
/// config complexity thresholds.
pub fn select_model_tier(
    context: &BTreeMap<String, Value>,
    complexity: f64,
    config: &WorkflowConfig,
) -> ModelTier {
    if let Some(tier) = context
        .get("model_tier")
        .and_then(Value::as_str)
        .and_then(ModelTier::parse)
    {
        return tier;
    }
    if let Some(strategy) = context.get("research_strategy").and_then(Value::as_str) {
        match strategy.to_ascii_lowercase().as_str() {
            "quick" => return ModelTier::Small,
            "standard" | "deep" | "academic" => return ModelTier::Medium,
            _ => {}
        }
    }
    if complexity < config.complexity_simple_threshold {
        ModelTier::Small
    } else if complexity < config.complexity_medium_threshold {
        ModelTier::Medium
    } else {
        ModelTier::Large
    }
}

/// Merge task-input context with session identity into the base context
/// every downstream call sees.
pub fn base_context(input: &TaskInput) -> BTreeMap<String, Value> {
    let mut context = input.context.clone();
    if let Some(session_id) = &input.session_id {
        context.insert("session_id".into(), Value::String(session_id.clone()));
    }
    if let Some(user_id) = &input.user_id {
        context.insert("user_id".into(), Value::String(user_id.clone()));
    }
    if let Some(tenant_id) = &input.tenant_id {
        context.insert("tenant_id".into(), Value::String(tenant_id.clone()));
    }
    if let Some(parent) = &input.parent_workflow_id {
        context.insert("parent_workflow_id".into(), Value::String(parent.clone()));
    }
    context
}

/// Does a response look like structured JSON output that synthesis must not
/// bypass?
pub fn is_json_like(text: &str) -> bool {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return true;
    }
    // Quoted JSON: a string that itself parses into structure.
    if trimmed.starts_with('"') {
        if let Ok(Value::String(inner)) = serde_json::from_str::<Value>(trimmed) {
            let inner = inner.trim_start();
            return inner.starts_with('{') || inner.starts_with('[');
        }
    }
    false
}

/// Build the shared execution-pattern inputs for a strategy run.
pub fn execution_inputs(
    ctx: &StrategyContext,
    input: &TaskInput,
    config: &WorkflowConfig,
    tier: ModelTier,
) -> ExecutionInputs {
    ExecutionInputs {
        workflow_id: ctx.workflow_id.clone(),
        session_id: input.session_id.clone(),
        user_id: input.user_id.clone(),
        parent_workflow_id: input.parent_workflow_id.clone(),
        history: input.history.clone(),
        per_agent_token_budget: config.per_agent_token_budget,
        model_tier: tier.as_str().to_string(),
    }
}

/// Emit a strategy-level event; failures are dropped.
pub async fn emit_update(
    events: &std::sync::Arc<dyn EventSink>,
    workflow_id: &str,
    kind: TaskUpdateKind,
    payload: Value,
) {
    let _ = events
        .emit(TaskUpdate::new(workflow_id, kind).with_payload(payload))
        .await;
}
