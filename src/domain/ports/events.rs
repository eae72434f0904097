//! Event sink port (`EmitTaskUpdate`).

use async_trait::async_trait;

use crate::domain::errors::OrchestratorResult;
use crate::domain::models::TaskUpdate;

/// Streams task updates to telemetry dashboards and streaming clients.
///
/// Emission failures are recoverable everywhere; callers drop the error.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: TaskUpdate) -> OrchestratorResult<()>;
}
