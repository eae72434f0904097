//! Domain models for the orchestration core.

pub mod agent;
pub mod citation;
pub mod config;
pub mod dag;
pub mod event;
pub mod message;
pub mod plan;
pub mod task;

pub use agent::{AgentExecutionResult, ToolExecution};
pub use citation::Citation;
pub use config::{
    ExploratoryConfig, ReflectionConfig, ScientificConfig, SwarmConfig, WideResearchConfig,
    WorkflowConfig,
};
pub use dag::PlanGraph;
pub use event::{TaskUpdate, TaskUpdateKind, FINAL_OUTPUT_AGENT_ID};
pub use message::{AgentMessage, MessageKind, WorkspaceEntry};
pub use plan::{Decomposition, ExecutionStrategy, Subtask};
pub use task::{ConversationMessage, TaskInput, TaskResult};
