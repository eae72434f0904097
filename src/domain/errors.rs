//! Domain errors for the Maestro orchestration core.

use thiserror::Error;

/// Errors surfaced by strategies, patterns, and activity ports.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Fatal plan error: cyclic dependencies, empty decomposition after
    /// fallback, dangling dependency ids, or an empty query.
    #[error("Invalid task plan: {0}")]
    InvalidPlan(String),

    /// An activity call failed after the retry policy was exhausted.
    /// Wraps the originating activity name.
    #[error("Activity {activity} failed: {message}")]
    ActivityFailed {
        activity: &'static str,
        message: String,
    },

    /// The workflow was canceled via a control signal.
    #[error("Workflow canceled")]
    Canceled,

    /// Every spawned agent returned a failure; no synthesis attempted.
    #[error("All {total} agents failed")]
    AllAgentsFailed { total: usize },

    /// An activity or dependency wait exceeded its deadline.
    #[error("{what} timed out after {secs}s")]
    Timeout { what: String, secs: u64 },

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization failure when crossing an activity boundary.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl OrchestratorError {
    /// Wrap an arbitrary failure with the name of the activity that produced it.
    pub fn activity(activity: &'static str, err: impl std::fmt::Display) -> Self {
        Self::ActivityFailed {
            activity,
            message: err.to_string(),
        }
    }

    /// True for errors that a strategy treats as fatal rather than recoverable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidPlan(_) | Self::Canceled | Self::AllAgentsFailed { .. }
        )
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
