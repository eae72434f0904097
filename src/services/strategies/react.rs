//! React strategy: top-level wrapper over the react reasoning loop.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::domain::models::{AgentExecutionResult, TaskInput, TaskResult, TaskUpdateKind};
use crate::services::memory::inject_memory;
use crate::services::postprocess::assemble_metadata;
use crate::services::reasoning::{ReactConfig, ReactLoop};

use super::helpers::{base_context, emit_update, select_model_tier};
use super::StrategyContext;

pub struct ReactStrategy {
    ctx: Arc<StrategyContext>,
}

impl ReactStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, input: TaskInput) -> TaskResult {
        let ctx = &self.ctx;
        if input.query.trim().is_empty() {
            return TaskResult::failure("Invalid task plan: empty query", 0);
        }
        let config = ctx.load_config().await;
        let mut context = base_context(&input);
        inject_memory(&ctx.memory, &ctx.versions, &input, &mut context).await;

        emit_update(
            &ctx.events,
            &ctx.workflow_id,
            TaskUpdateKind::WorkflowStarted,
            json!({"strategy": "react", "query": input.query}),
        )
        .await;

        let tier = select_model_tier(&context, 0.5, &config);
        let outcome = ReactLoop::new(
            ctx.activities.clone(),
            ctx.events.clone(),
            ReactConfig::default(),
        )
        .with_retry(ctx.retry.clone())
        .run(
            &ctx.workflow_id,
            &input.query,
            context.clone(),
            input.session_id.as_deref(),
        )
        .await;

        let synthetic = AgentExecutionResult {
            agent_id: "react".to_string(),
            response: outcome.answer.clone(),
            success: outcome.success,
            tokens_used: outcome.total_tokens,
            ..Default::default()
        };
        let mut metadata = assemble_metadata(
            std::slice::from_ref(&synthetic),
            &context,
            tier.as_str(),
            &config,
            &*ctx.activities,
        );
        metadata.insert("patterns_used".into(), json!(["react"]));
        metadata.insert("iterations".into(), Value::from(outcome.iterations));
        metadata.insert("thoughts".into(), Value::from(outcome.thoughts));
        metadata.insert("actions".into(), Value::from(outcome.actions));
        metadata.insert("observations".into(), Value::from(outcome.observations));

        let _ = ctx
            .events
            .emit(crate::domain::models::TaskUpdate::final_output(
                ctx.workflow_id.clone(),
                &outcome.answer,
                outcome.total_tokens,
                metadata.get("model").and_then(Value::as_str).unwrap_or(""),
            ))
            .await;
        emit_update(
            &ctx.events,
            &ctx.workflow_id,
            TaskUpdateKind::WorkflowCompleted,
            json!({"tokens_used": outcome.total_tokens}),
        )
        .await;

        let mut result = TaskResult {
            result: outcome.answer,
            success: true,
            tokens_used: outcome.total_tokens,
            error: None,
            metadata: Default::default(),
        };
        result.metadata = metadata;
        result
    }
}
