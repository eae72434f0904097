//! Maestro - durable multi-agent orchestration core.
//!
//! Converts a natural-language task into a plan of subtasks, executes the
//! plan across a pool of language-model-backed worker agents under
//! concurrency and budget constraints, and synthesizes a single answer with
//! citations and quality metadata. All I/O goes through activity ports so a
//! durable-workflow engine can record and replay every decision:
//! - Execution patterns: parallel, sequential, dependency-respecting hybrid
//! - Reasoning patterns: react, chain-of-thought, tree-of-thoughts, debate,
//!   reflection
//! - Persistent agent loop with peer messaging and a shared workspace
//! - Top-level strategies composing the layers (DAG, swarm, wide research, ...)
//! - Citation / metadata / verification post-processing

pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::errors::{OrchestratorError, OrchestratorResult};
pub use domain::models::{TaskInput, TaskResult};
pub use services::strategies::{Orchestrator, StrategyContext, StrategyKind};
