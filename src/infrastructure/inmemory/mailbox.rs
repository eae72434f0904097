//! In-memory mailbox and workspace.
//!
//! Both serialize writes through a single lock, mirroring the engine's
//! history-serialized activity semantics: appends are totally ordered and
//! the workspace sequence is monotonic per instance.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::domain::errors::OrchestratorResult;
use crate::domain::models::{AgentMessage, WorkspaceEntry};
use crate::domain::ports::{Mailbox, Workspace};

/// Per-recipient message queues.
#[derive(Default)]
pub struct InMemoryMailbox {
    queues: Mutex<HashMap<String, Vec<AgentMessage>>>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Mailbox for InMemoryMailbox {
    async fn send(&self, message: AgentMessage) -> OrchestratorResult<()> {
        let mut queues = self.queues.lock().await;
        queues.entry(message.to.clone()).or_default().push(message);
        Ok(())
    }

    async fn fetch(&self, recipient: &str) -> OrchestratorResult<Vec<AgentMessage>> {
        let mut queues = self.queues.lock().await;
        Ok(queues.remove(recipient).unwrap_or_default())
    }
}

/// Append-only log with a monotonic sequence.
#[derive(Default)]
pub struct InMemoryWorkspace {
    entries: Mutex<Vec<WorkspaceEntry>>,
}

impl InMemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Workspace for InMemoryWorkspace {
    async fn append(
        &self,
        topic: &str,
        author: &str,
        data: Value,
    ) -> OrchestratorResult<WorkspaceEntry> {
        let mut entries = self.entries.lock().await;
        let entry = WorkspaceEntry {
            topic: topic.to_string(),
            author: author.to_string(),
            data,
            sequence: entries.len() as u64 + 1,
            timestamp: Utc::now(),
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    async fn list_since(
        &self,
        after: u64,
        limit: usize,
    ) -> OrchestratorResult<Vec<WorkspaceEntry>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|e| e.sequence > after)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> OrchestratorResult<Vec<WorkspaceEntry>> {
        Ok(self.entries.lock().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_mailbox_fetch_drains() {
        let mailbox = InMemoryMailbox::new();
        mailbox
            .send(AgentMessage::new(
                "a",
                "b",
                crate::domain::models::MessageKind::Info,
                json!(1),
            ))
            .await
            .unwrap();

        assert_eq!(mailbox.fetch("b").await.unwrap().len(), 1);
        assert!(mailbox.fetch("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_workspace_sequence_monotonic() {
        let workspace = InMemoryWorkspace::new();
        let first = workspace.append("t", "a", json!("one")).await.unwrap();
        let second = workspace.append("t", "b", json!("two")).await.unwrap();
        assert!(second.sequence > first.sequence);

        let since = workspace.list_since(first.sequence, 10).await.unwrap();
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].author, "b");
    }

    #[tokio::test]
    async fn test_list_since_respects_limit() {
        let workspace = InMemoryWorkspace::new();
        for i in 0..5 {
            workspace.append("t", "a", json!(i)).await.unwrap();
        }
        assert_eq!(workspace.list_since(0, 3).await.unwrap().len(), 3);
    }
}
