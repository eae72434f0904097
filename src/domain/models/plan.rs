//! Decomposition plan types produced by the external planner.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How subtasks of a plan are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    #[default]
    Parallel,
    Sequential,
    Hybrid,
}

impl ExecutionStrategy {
    /// Parse a planner label; anything unrecognized falls back to parallel.
    pub fn parse(label: &str) -> Self {
        match label.to_ascii_lowercase().as_str() {
            "sequential" => Self::Sequential,
            "hybrid" => Self::Hybrid,
            _ => Self::Parallel,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Sequential => "sequential",
            Self::Hybrid => "hybrid",
        }
    }
}

/// One node in the decomposition plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Subtask {
    /// Identifier unique within the plan.
    pub id: String,
    /// Natural-language description handed to the executing agent.
    pub description: String,
    /// Task-type tag; `synthesis` and `summarization` are recognized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub suggested_tools: Vec<String>,
    #[serde(default)]
    pub tool_parameters: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Ids of subtasks whose results must be available first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Artifact names this subtask produces / consumes. Only consulted as a
    /// "needs tools" signal here; richer artifact flow belongs to the planner.
    #[serde(default)]
    pub produces: Vec<String>,
    #[serde(default)]
    pub consumes: Vec<String>,
}

impl Subtask {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.suggested_tools = tools;
        self
    }

    /// Simple-shape: no dependencies, no tools, no artifact relations, and
    /// no tool parameters. Such a lone subtask routes to the trivial path.
    pub fn is_simple_shape(&self) -> bool {
        self.dependencies.is_empty()
            && self.suggested_tools.is_empty()
            && self.produces.is_empty()
            && self.consumes.is_empty()
            && self.tool_parameters.is_empty()
    }

    /// True when the task type marks this subtask as the plan's synthesis step.
    pub fn is_synthesis(&self) -> bool {
        matches!(
            self.task_type.as_deref(),
            Some("synthesis") | Some("summarization")
        )
    }
}

/// Plan produced by the external decomposer and consumed by strategies.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Decomposition {
    /// Complexity score in `[0.0, 1.0]`.
    pub complexity: f64,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub cognitive_strategy: String,
    #[serde(default)]
    pub execution_strategy: ExecutionStrategy,
    /// Concurrency cap for this plan; 0 means unbounded.
    #[serde(default)]
    pub concurrency_limit: usize,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    /// Per-subtask agent-type overrides keyed by subtask id.
    #[serde(default)]
    pub agent_types: BTreeMap<String, String>,
}

impl Decomposition {
    /// Find the synthesis/summarization subtask, if the plan carries one.
    pub fn synthesis_subtask(&self) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.is_synthesis())
    }

    /// True when at least one subtask declares dependencies.
    pub fn has_dependencies(&self) -> bool {
        self.subtasks.iter().any(|s| !s.dependencies.is_empty())
    }

    /// Resolve the role for a subtask: plan agent-type override first, then
    /// the subtask's own role, then the inherited context role.
    pub fn role_for(&self, subtask: &Subtask, inherited: Option<&str>) -> String {
        self.agent_types
            .get(&subtask.id)
            .cloned()
            .or_else(|| subtask.role.clone())
            .or_else(|| inherited.map(str::to_string))
            .unwrap_or_else(|| "generalist".to_string())
    }
}
