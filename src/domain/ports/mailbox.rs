//! Mailbox and workspace ports.
//!
//! Both are append-only logs keyed by `(workflow_id, recipient|topic)` with
//! writes serialized through the engine's history; the core never shares
//! in-process mutable state across agents.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::errors::OrchestratorResult;
use crate::domain::models::{AgentMessage, WorkspaceEntry};

/// Per-agent message queue (`SendAgentMessage` / `FetchAgentMessages`).
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Deliver a message to the recipient's mailbox.
    async fn send(&self, message: AgentMessage) -> OrchestratorResult<()>;

    /// Drain pending messages for a recipient, in delivery order.
    async fn fetch(&self, recipient: &str) -> OrchestratorResult<Vec<AgentMessage>>;
}

/// Shared append-only workspace (`WorkspaceAppend` / `WorkspaceListAll`).
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Append an entry; the implementation assigns the monotonic sequence.
    async fn append(
        &self,
        topic: &str,
        author: &str,
        data: Value,
    ) -> OrchestratorResult<WorkspaceEntry>;

    /// Entries with sequence greater than `after`, oldest first, capped at
    /// `limit`. Readers carry the high-water mark themselves.
    async fn list_since(&self, after: u64, limit: usize)
        -> OrchestratorResult<Vec<WorkspaceEntry>>;

    /// All entries, oldest first.
    async fn list_all(&self) -> OrchestratorResult<Vec<WorkspaceEntry>>;
}
