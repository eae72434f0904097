//! Memory retrieval and context-compression port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::errors::OrchestratorResult;
use crate::domain::models::ConversationMessage;

/// Result of `CompressAndStoreContext`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionOutcome {
    pub summary: String,
    /// How many history messages the summary replaces.
    pub compressed_count: usize,
}

/// Session and hierarchical memory activities plus the compression chain.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// `FetchSessionMemory` — recent items scoped to one session.
    async fn fetch_session_memory(
        &self,
        session_id: &str,
        query: &str,
        limit: usize,
    ) -> OrchestratorResult<Vec<Value>>;

    /// `FetchHierarchicalMemory` — user/tenant-scoped retrieval.
    async fn fetch_hierarchical_memory(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> OrchestratorResult<Vec<Value>>;

    /// `CheckCompressionNeeded` — should the history be compressed?
    async fn check_compression_needed(
        &self,
        session_id: &str,
        history_len: usize,
        estimated_tokens: usize,
    ) -> OrchestratorResult<bool>;

    /// `CompressAndStoreContext` — summarize and persist older history.
    async fn compress_and_store(
        &self,
        session_id: &str,
        history: &[ConversationMessage],
    ) -> OrchestratorResult<CompressionOutcome>;

    /// `UpdateCompressionStateActivity` — record the new compaction point.
    async fn update_compression_state(
        &self,
        session_id: &str,
        compressed_count: usize,
    ) -> OrchestratorResult<()>;
}
