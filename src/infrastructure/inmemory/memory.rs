//! In-memory memory store with seedable retrieval and compression state.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::errors::OrchestratorResult;
use crate::domain::models::ConversationMessage;
use crate::domain::ports::{CompressionOutcome, MemoryStore};

#[derive(Default)]
struct MemoryState {
    session: HashMap<String, Vec<Value>>,
    hierarchical: HashMap<String, Vec<Value>>,
    compression_needed: bool,
    compression_state: HashMap<String, usize>,
}

#[derive(Default)]
pub struct InMemoryMemoryStore {
    state: RwLock<MemoryState>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_session_memory(&self, session_id: &str, items: Vec<Value>) {
        let mut state = self.state.write().await;
        state.session.insert(session_id.to_string(), items);
    }

    pub async fn seed_hierarchical_memory(&self, user_id: &str, items: Vec<Value>) {
        let mut state = self.state.write().await;
        state.hierarchical.insert(user_id.to_string(), items);
    }

    pub async fn set_compression_needed(&self, needed: bool) {
        self.state.write().await.compression_needed = needed;
    }

    pub async fn compression_state(&self, session_id: &str) -> Option<usize> {
        self.state
            .read()
            .await
            .compression_state
            .get(session_id)
            .copied()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn fetch_session_memory(
        &self,
        session_id: &str,
        _query: &str,
        limit: usize,
    ) -> OrchestratorResult<Vec<Value>> {
        let state = self.state.read().await;
        Ok(state
            .session
            .get(session_id)
            .map(|items| items.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn fetch_hierarchical_memory(
        &self,
        user_id: &str,
        _query: &str,
        limit: usize,
    ) -> OrchestratorResult<Vec<Value>> {
        let state = self.state.read().await;
        Ok(state
            .hierarchical
            .get(user_id)
            .map(|items| items.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn check_compression_needed(
        &self,
        _session_id: &str,
        _history_len: usize,
        _estimated_tokens: usize,
    ) -> OrchestratorResult<bool> {
        Ok(self.state.read().await.compression_needed)
    }

    async fn compress_and_store(
        &self,
        _session_id: &str,
        history: &[ConversationMessage],
    ) -> OrchestratorResult<CompressionOutcome> {
        // Keep the last few messages; summarize the rest by count.
        let compressed_count = history.len().saturating_sub(5);
        Ok(CompressionOutcome {
            summary: format!("compressed {compressed_count} messages"),
            compressed_count,
        })
    }

    async fn update_compression_state(
        &self,
        session_id: &str,
        compressed_count: usize,
    ) -> OrchestratorResult<()> {
        let mut state = self.state.write().await;
        state
            .compression_state
            .insert(session_id.to_string(), compressed_count);
        Ok(())
    }
}
