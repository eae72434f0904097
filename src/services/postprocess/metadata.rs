//! Metadata aggregation over the per-agent result set.
//!
//! A pure function of its inputs: applying it twice to the same result set
//! yields equal metadata. All emitted maps are `BTreeMap`s so iteration at
//! replay boundaries stays in sorted-key order.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::domain::models::{AgentExecutionResult, WorkflowConfig};
use crate::domain::ports::Activities;

/// Infer a provider from a model name prefix.
pub fn detect_provider(model: &str) -> Option<&'static str> {
    let model = model.to_ascii_lowercase();
    const PREFIXES: &[(&str, &str)] = &[
        ("claude", "anthropic"),
        ("gpt", "openai"),
        ("o1", "openai"),
        ("o3", "openai"),
        ("gemini", "google"),
        ("deepseek", "deepseek"),
        ("mistral", "mistral"),
        ("llama", "meta"),
        ("qwen", "alibaba"),
    ];
    PREFIXES
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, provider)| *provider)
}

/// Resolve the provider with the strict precedence
/// `provider_override` > `provider` > `llm_provider` > detection-from-model
/// > tier default (detected from the tier's priority-one model).
pub fn resolve_provider(
    context: &BTreeMap<String, Value>,
    model: &str,
    tier: &str,
    config: &WorkflowConfig,
) -> String {
    for key in ["provider_override", "provider", "llm_provider"] {
        if let Some(value) = context.get(key).and_then(Value::as_str) {
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }
    if let Some(detected) = detect_provider(model) {
        return detected.to_string();
    }
    detect_provider(config.tier_default_model(tier))
        .unwrap_or("unknown")
        .to_string()
}

/// Aggregate per-agent model/provider/token data into result metadata.
pub fn assemble_metadata(
    results: &[AgentExecutionResult],
    context: &BTreeMap<String, Value>,
    tier: &str,
    config: &WorkflowConfig,
    activities: &dyn Activities,
) -> BTreeMap<String, Value> {
    let mut metadata = BTreeMap::new();

    // Model: first successful agent's model, else the tier's priority-one.
    let model = results
        .iter()
        .find(|r| r.success && !r.model.is_empty())
        .map_or_else(
            || config.tier_default_model(tier).to_string(),
            |r| r.model.clone(),
        );
    let provider = resolve_provider(context, &model, tier, config);

    let total_tokens: u64 = results.iter().map(|r| r.tokens_used).sum();
    let input_tokens: u64 = results.iter().map(|r| r.input_tokens).sum();
    let output_tokens: u64 = results.iter().map(|r| r.output_tokens).sum();

    metadata.insert("model".into(), Value::String(model.clone()));
    metadata.insert("provider".into(), Value::String(provider));
    metadata.insert("model_tier".into(), Value::String(tier.to_string()));
    metadata.insert("num_agents".into(), Value::from(results.len()));
    metadata.insert("tokens_used".into(), Value::from(total_tokens));
    metadata.insert("input_tokens".into(), Value::from(input_tokens));
    metadata.insert("output_tokens".into(), Value::from(output_tokens));
    metadata.insert(
        "cost_usd".into(),
        Value::from(activities.cost_for_tokens(&model, total_tokens)),
    );

    // Per-agent summaries in result order, which is already deterministic.
    let summaries: Vec<Value> = results
        .iter()
        .map(|r| {
            json!({
                "agent_id": r.agent_id,
                "model": r.model,
                "provider": r.provider,
                "tokens_used": r.tokens_used,
                "success": r.success,
                "duration_ms": r.duration_ms,
                "error": r.error,
            })
        })
        .collect();
    metadata.insert("agent_summaries".into(), Value::Array(summaries));

    // Tool errors in encounter order.
    let tool_errors: Vec<Value> = results
        .iter()
        .flat_map(|r| {
            r.tool_executions
                .iter()
                .filter(|t| !t.success)
                .map(move |t| {
                    json!({
                        "agent_id": r.agent_id,
                        "tool": t.tool,
                        "error": t.error,
                    })
                })
        })
        .collect();
    if !tool_errors.is_empty() {
        metadata.insert("tool_errors".into(), Value::Array(tool_errors));
    }

    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ToolExecution;
    use crate::infrastructure::inmemory::MockActivities;

    fn agent(id: &str, model: &str, tokens: u64, success: bool) -> AgentExecutionResult {
        AgentExecutionResult {
            agent_id: id.into(),
            model: model.into(),
            tokens_used: tokens,
            success,
            ..Default::default()
        }
    }

    #[test]
    fn test_provider_detection() {
        assert_eq!(detect_provider("claude-sonnet-4"), Some("anthropic"));
        assert_eq!(detect_provider("GPT-4o"), Some("openai"));
        assert_eq!(detect_provider("gemini-pro"), Some("google"));
        assert_eq!(detect_provider("unheard-of"), None);
    }

    #[test]
    fn test_provider_precedence() {
        let config = WorkflowConfig::default();
        let mut context = BTreeMap::new();
        context.insert("llm_provider".into(), json!("fallback-provider"));
        context.insert("provider".into(), json!("mid-provider"));

        // `provider` beats `llm_provider`.
        assert_eq!(
            resolve_provider(&context, "claude-x", "medium", &config),
            "mid-provider"
        );

        // `provider_override` beats both.
        context.insert("provider_override".into(), json!("top-provider"));
        assert_eq!(
            resolve_provider(&context, "claude-x", "medium", &config),
            "top-provider"
        );

        // Without context keys, detection from the model wins.
        let empty = BTreeMap::new();
        assert_eq!(
            resolve_provider(&empty, "gpt-4o", "medium", &config),
            "openai"
        );

        // Unknown model falls back to the tier default model's provider.
        assert_eq!(
            resolve_provider(&empty, "mystery", "medium", &config),
            "unknown"
        );
    }

    #[test]
    fn test_assemble_is_idempotent() {
        let activities = MockActivities::new();
        let config = WorkflowConfig::default();
        let context = BTreeMap::new();
        let results = vec![
            agent("a", "claude-x", 100, true),
            agent("b", "claude-x", 50, false),
        ];

        let first = assemble_metadata(&results, &context, "medium", &config, &activities);
        let second = assemble_metadata(&results, &context, "medium", &config, &activities);
        assert_eq!(first, second);
        assert_eq!(first.get("tokens_used"), Some(&json!(150)));
        assert_eq!(first.get("num_agents"), Some(&json!(2)));
        assert_eq!(first.get("model"), Some(&json!("claude-x")));
    }

    #[test]
    fn test_tier_default_when_no_success() {
        let activities = MockActivities::new();
        let config = WorkflowConfig::default();
        let results = vec![agent("a", "claude-x", 10, false)];
        let metadata = assemble_metadata(&results, &BTreeMap::new(), "large", &config, &activities);
        assert_eq!(metadata.get("model"), Some(&json!("large-1")));
    }

    #[test]
    fn test_tool_errors_collected() {
        let activities = MockActivities::new();
        let config = WorkflowConfig::default();
        let mut result = agent("a", "m", 10, true);
        result.tool_executions.push(ToolExecution {
            tool: "web_search".into(),
            success: false,
            output: Value::Null,
            error: Some("quota exceeded".into()),
        });

        let metadata =
            assemble_metadata(&[result], &BTreeMap::new(), "medium", &config, &activities);
        let errors = metadata.get("tool_errors").unwrap().as_array().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0]["tool"], "web_search");
    }
}
