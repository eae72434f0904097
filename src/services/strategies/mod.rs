//! Top-level workflow strategies.
//!
//! Each strategy is an entry point that composes the execution and
//! reasoning layers with its own policy for memory retrieval, reflection,
//! citations, and metadata. The set is closed: strategies are dispatched
//! through [`StrategyKind`], never a registry, so control flow stays
//! statically inspectable.

mod dag;
mod domain_analysis;
mod exploratory;
pub mod helpers;
mod react;
mod research;
mod scientific;
mod swarm;
mod wide;

pub use dag::DagStrategy;
pub use domain_analysis::DomainAnalysisStrategy;
pub use exploratory::ExploratoryStrategy;
pub use react::ReactStrategy;
pub use research::ResearchStrategy;
pub use scientific::ScientificStrategy;
pub use swarm::SwarmStrategy;
pub use wide::WideResearchStrategy;

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::models::{TaskInput, TaskResult, WorkflowConfig};
use crate::domain::ports::{
    Activities, EventSink, Mailbox, MemoryStore, StaticVersionGate, VersionGate, Workspace,
};
use crate::infrastructure::inmemory::{InMemoryMailbox, InMemoryMemoryStore, InMemoryWorkspace};
use crate::services::control::ControlHandle;
use crate::services::retry::RetryPolicy;

/// Everything a strategy needs to run: ports, control, and identity.
pub struct StrategyContext {
    pub activities: Arc<dyn Activities>,
    pub events: Arc<dyn EventSink>,
    pub mailbox: Arc<dyn Mailbox>,
    pub workspace: Arc<dyn Workspace>,
    pub memory: Arc<dyn MemoryStore>,
    pub versions: Arc<dyn VersionGate>,
    pub control: ControlHandle,
    pub retry: RetryPolicy,
    /// Workflow identity minted at entry, outside the deterministic region.
    pub workflow_id: String,
}

impl StrategyContext {
    /// Context with in-memory mailbox/workspace/memory and no attached
    /// control signals. Production embeddings swap ports via the builders.
    pub fn new(activities: Arc<dyn Activities>, events: Arc<dyn EventSink>) -> Self {
        Self {
            activities,
            events,
            mailbox: Arc::new(InMemoryMailbox::new()),
            workspace: Arc::new(InMemoryWorkspace::new()),
            memory: Arc::new(InMemoryMemoryStore::new()),
            versions: Arc::new(StaticVersionGate),
            control: ControlHandle::unattached(),
            retry: RetryPolicy::default(),
            workflow_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_mailbox(mut self, mailbox: Arc<dyn Mailbox>) -> Self {
        self.mailbox = mailbox;
        self
    }

    pub fn with_workspace(mut self, workspace: Arc<dyn Workspace>) -> Self {
        self.workspace = workspace;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_versions(mut self, versions: Arc<dyn VersionGate>) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_control(mut self, control: ControlHandle) -> Self {
        self.control = control;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = workflow_id.into();
        self
    }

    /// Load the workflow config, falling back to defaults when the activity
    /// is unavailable.
    pub(crate) async fn load_config(&self) -> WorkflowConfig {
        self.activities
            .get_workflow_config()
            .await
            .unwrap_or_default()
    }
}

/// The closed set of strategy entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Dag,
    React,
    Research,
    Exploratory,
    Scientific,
    WideResearch,
    Swarm,
    DomainAnalysis,
}

impl StrategyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dag => "dag",
            Self::React => "react",
            Self::Research => "research",
            Self::Exploratory => "exploratory",
            Self::Scientific => "scientific",
            Self::WideResearch => "wide_research",
            Self::Swarm => "swarm",
            Self::DomainAnalysis => "domain_analysis",
        }
    }
}

/// Routes a task to a strategy. Strategies compose patterns through direct
/// calls; the orchestrator is only the dispatch point.
pub struct Orchestrator {
    ctx: Arc<StrategyContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, strategy: StrategyKind, input: TaskInput) -> TaskResult {
        match strategy {
            StrategyKind::Dag => DagStrategy::new(self.ctx.clone()).run(input).await,
            StrategyKind::React => ReactStrategy::new(self.ctx.clone()).run(input).await,
            StrategyKind::Research => ResearchStrategy::new(self.ctx.clone()).run(input).await,
            StrategyKind::Exploratory => {
                ExploratoryStrategy::new(self.ctx.clone()).run(input).await
            }
            StrategyKind::Scientific => ScientificStrategy::new(self.ctx.clone()).run(input).await,
            StrategyKind::WideResearch => {
                WideResearchStrategy::new(self.ctx.clone()).run(input).await
            }
            StrategyKind::Swarm => SwarmStrategy::new(self.ctx.clone()).run(input).await,
            StrategyKind::DomainAnalysis => {
                DomainAnalysisStrategy::new(self.ctx.clone()).run(input).await
            }
        }
    }
}
