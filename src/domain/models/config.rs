//! Workflow configuration record.
//!
//! One record loaded per strategy invocation via the `GetWorkflowConfig`
//! activity (falling back to defaults when unavailable). Every policy knob
//! is an explicit field; there is no global mutable state.

use serde::{Deserialize, Serialize};

/// Reflection pattern knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReflectionConfig {
    pub enabled: bool,
    pub max_retries: u32,
    pub confidence_threshold: f64,
    pub criteria: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            confidence_threshold: 0.8,
            criteria: vec![
                "accuracy".to_string(),
                "completeness".to_string(),
                "clarity".to_string(),
            ],
            timeout_ms: 60_000,
        }
    }
}

/// Exploratory strategy knobs (tree-of-thoughts + debate escalation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExploratoryConfig {
    pub max_depth: u32,
    pub branching_factor: u32,
    pub pruning_threshold: f64,
    pub exploration_budget: u32,
    pub backtrack_enabled: bool,
    /// Debate runs when tree confidence lands below this.
    pub debate_confidence_threshold: f64,
    pub num_debaters: u32,
    pub max_debate_rounds: u32,
}

impl Default for ExploratoryConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            branching_factor: 3,
            pruning_threshold: 0.3,
            exploration_budget: 20,
            backtrack_enabled: true,
            debate_confidence_threshold: 0.7,
            num_debaters: 3,
            max_debate_rounds: 2,
        }
    }
}

/// Scientific strategy knobs (hypotheses + debate + implications).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScientificConfig {
    pub num_hypotheses: u32,
    pub max_debate_rounds: u32,
    pub use_moderator: bool,
    pub implications_max_depth: u32,
}

impl Default for ScientificConfig {
    fn default() -> Self {
        Self {
            num_hypotheses: 3,
            max_debate_rounds: 2,
            use_moderator: true,
            implications_max_depth: 2,
        }
    }
}

/// Swarm caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub max_agents: usize,
    pub max_iterations_per_agent: u32,
    pub timeout_secs: u64,
    pub workspace_max_entries: usize,
    pub workspace_snippet_chars: usize,
    /// Per-agent outbound message cap.
    pub message_cap: usize,
    /// Supervisor mailbox poll interval.
    pub help_poll_secs: u64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_agents: 5,
            max_iterations_per_agent: 10,
            timeout_secs: 600,
            workspace_max_entries: 20,
            workspace_snippet_chars: 400,
            message_cap: 20,
            help_poll_secs: 3,
        }
    }
}

/// Wide-research fan-out knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WideResearchConfig {
    pub max_parallel_agents: usize,
    pub enable_cross_verification: bool,
}

impl Default for WideResearchConfig {
    fn default() -> Self {
        Self {
            max_parallel_agents: 8,
            enable_cross_verification: true,
        }
    }
}

/// Model names per abstract tier, in priority order (first entry is the
/// priority-one model used for metadata defaults).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelTiersConfig {
    pub small: Vec<String>,
    pub medium: Vec<String>,
    pub large: Vec<String>,
}

impl Default for ModelTiersConfig {
    fn default() -> Self {
        Self {
            small: vec!["small-1".to_string()],
            medium: vec!["medium-1".to_string()],
            large: vec!["large-1".to_string()],
        }
    }
}

/// The workflow configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Complexity at or below which a lone simple-shape subtask routes to the
    /// trivial path.
    pub simple_threshold: f64,
    /// Complexity thresholds mapping complexity to model tiers and gating
    /// reflection (simple / medium boundaries).
    pub complexity_simple_threshold: f64,
    pub complexity_medium_threshold: f64,
    pub max_parallel_agents: usize,
    pub parallel_max_concurrency: usize,
    pub hybrid_dependency_timeout_secs: u64,
    pub sequential_pass_results: bool,
    pub sequential_extract_numeric: bool,
    /// Clear stale tool parameters on dependent tasks so agents re-derive
    /// them from context.
    pub clear_dependent_tool_params: bool,
    pub enable_citations: bool,
    pub enable_verification: bool,
    pub per_agent_token_budget: u64,
    pub reflection: ReflectionConfig,
    pub exploratory: ExploratoryConfig,
    pub scientific: ScientificConfig,
    pub swarm: SwarmConfig,
    pub wide_research: WideResearchConfig,
    pub model_tiers: ModelTiersConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            simple_threshold: 0.3,
            complexity_simple_threshold: 0.3,
            complexity_medium_threshold: 0.5,
            max_parallel_agents: 8,
            parallel_max_concurrency: 4,
            hybrid_dependency_timeout_secs: 300,
            sequential_pass_results: true,
            sequential_extract_numeric: false,
            clear_dependent_tool_params: true,
            enable_citations: true,
            enable_verification: false,
            per_agent_token_budget: 50_000,
            reflection: ReflectionConfig::default(),
            exploratory: ExploratoryConfig::default(),
            scientific: ScientificConfig::default(),
            swarm: SwarmConfig::default(),
            wide_research: WideResearchConfig::default(),
            model_tiers: ModelTiersConfig::default(),
        }
    }
}

impl WorkflowConfig {
    /// Priority-one model for a tier label (`small`/`medium`/`large`).
    pub fn tier_default_model(&self, tier: &str) -> &str {
        let list = match tier {
            "small" => &self.model_tiers.small,
            "large" => &self.model_tiers.large,
            _ => &self.model_tiers.medium,
        };
        list.first().map_or("medium-1", String::as_str)
    }
}
