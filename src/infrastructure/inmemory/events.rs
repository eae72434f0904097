//! Event sinks: a discarding sink and a recording sink for tests.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::OrchestratorResult;
use crate::domain::models::{TaskUpdate, TaskUpdateKind};
use crate::domain::ports::EventSink;

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn emit(&self, _event: TaskUpdate) -> OrchestratorResult<()> {
        Ok(())
    }
}

/// Buffers every event for later inspection.
#[derive(Default)]
pub struct RecordingEventSink {
    events: RwLock<Vec<TaskUpdate>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<TaskUpdate> {
        self.events.read().await.clone()
    }

    pub async fn saw_kind(&self, kind: TaskUpdateKind) -> bool {
        self.events.read().await.iter().any(|e| e.kind == kind)
    }

    pub async fn count_kind(&self, kind: TaskUpdateKind) -> usize {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    /// Events for one agent id, in emission order.
    pub async fn for_agent(&self, agent_id: &str) -> Vec<TaskUpdate> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.agent_id.as_deref() == Some(agent_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn emit(&self, event: TaskUpdate) -> OrchestratorResult<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}
