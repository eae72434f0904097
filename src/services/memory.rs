//! Memory retrieval and context compression helpers shared by strategies.
//!
//! Both paths are gated behind named version gates so histories recorded
//! before the features existed replay through the old branch.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::domain::models::TaskInput;
use crate::domain::ports::{MemoryStore, VersionGate};

/// Gate for memory retrieval into `agent_memory`.
pub const MEMORY_RETRIEVAL_GATE: &str = "memory_retrieval_v1";
/// Gate for the context-compression chain.
pub const CONTEXT_COMPRESS_GATE: &str = "context_compress_v1";

/// History length beyond which compression is considered.
const COMPRESSION_HISTORY_THRESHOLD: usize = 20;
/// Rough chars-per-token heuristic for the compression estimate.
const CHARS_PER_TOKEN: usize = 4;
/// Token estimate beyond which compression is worth asking about.
const COMPRESSION_TOKEN_THRESHOLD: usize = 8_000;

/// Items fetched per memory scope.
const MEMORY_FETCH_LIMIT: usize = 5;

/// Fetch hierarchical or session memory and inject retrieved items under
/// the `agent_memory` context key. Fetch failures leave the context as-is.
pub async fn inject_memory(
    memory: &Arc<dyn MemoryStore>,
    versions: &Arc<dyn VersionGate>,
    input: &TaskInput,
    context: &mut BTreeMap<String, Value>,
) {
    if !versions.enabled(MEMORY_RETRIEVAL_GATE) {
        return;
    }

    let mut items: Vec<Value> = Vec::new();
    if let Some(user_id) = &input.user_id {
        if let Ok(fetched) = memory
            .fetch_hierarchical_memory(user_id, &input.query, MEMORY_FETCH_LIMIT)
            .await
        {
            items.extend(fetched);
        }
    }
    if let Some(session_id) = &input.session_id {
        if let Ok(fetched) = memory
            .fetch_session_memory(session_id, &input.query, MEMORY_FETCH_LIMIT)
            .await
        {
            items.extend(fetched);
        }
    }
    if !items.is_empty() {
        debug!(count = items.len(), "injecting retrieved memory");
        context.insert("agent_memory".into(), Value::Array(items));
    }
}

/// Estimate tokens for the conversation history.
fn estimate_history_tokens(input: &TaskInput) -> usize {
    let chars: usize = input.history.iter().map(|m| m.content.len()).sum();
    chars / CHARS_PER_TOKEN
}

/// Run the compression chain when history length and token estimate warrant
/// it: `CheckCompressionNeeded` → `CompressAndStoreContext` →
/// `UpdateCompressionState`. Failures abandon the chain silently.
pub async fn maybe_compress_context(
    memory: &Arc<dyn MemoryStore>,
    versions: &Arc<dyn VersionGate>,
    input: &TaskInput,
) {
    if !versions.enabled(CONTEXT_COMPRESS_GATE) {
        return;
    }
    let Some(session_id) = &input.session_id else {
        return;
    };
    if input.history.len() <= COMPRESSION_HISTORY_THRESHOLD {
        return;
    }
    let estimated_tokens = estimate_history_tokens(input);
    if estimated_tokens < COMPRESSION_TOKEN_THRESHOLD {
        return;
    }

    let needed = memory
        .check_compression_needed(session_id, input.history.len(), estimated_tokens)
        .await
        .unwrap_or(false);
    if !needed {
        return;
    }
    if let Ok(outcome) = memory.compress_and_store(session_id, &input.history).await {
        debug!(
            compressed = outcome.compressed_count,
            "history compressed and stored"
        );
        let _ = memory
            .update_compression_state(session_id, outcome.compressed_count)
            .await;
    }
}
