//! Workflow-config loader with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::WorkflowConfig;

/// Configuration validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_parallel_agents: {0}. Must be between 1 and 100")]
    InvalidMaxParallelAgents(usize),

    #[error("Invalid swarm max_agents: {0}. Must be between 1 and 100")]
    InvalidSwarmMaxAgents(usize),

    #[error("Invalid reflection confidence_threshold: {0}. Must be in (0, 1]")]
    InvalidConfidenceThreshold(f64),

    #[error(
        "Invalid complexity thresholds: simple ({0}) must not exceed medium ({1}), both in [0, 1]"
    )]
    InvalidComplexityThresholds(f64, f64),

    #[error("Invalid workspace_snippet_chars: {0}. Cannot be 0")]
    InvalidSnippetChars(usize),

    #[error("Invalid hybrid_dependency_timeout_secs: {0}. Cannot be 0")]
    InvalidDependencyTimeout(u64),
}

/// Loads the workflow config record for engine-less embeddings.
///
/// Precedence (lowest to highest):
/// 1. Programmatic defaults
/// 2. `.maestro/config.yaml` (project config)
/// 3. `.maestro/local.yaml` (local overrides, optional)
/// 4. Environment variables (`MAESTRO_` prefix, `__` nesting)
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load() -> Result<WorkflowConfig> {
        let config: WorkflowConfig = Figment::new()
            .merge(Serialized::defaults(WorkflowConfig::default()))
            .merge(Yaml::file(".maestro/config.yaml"))
            .merge(Yaml::file(".maestro/local.yaml"))
            .merge(Env::prefixed("MAESTRO_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load from a specific file over the defaults.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<WorkflowConfig> {
        let config: WorkflowConfig = Figment::new()
            .merge(Serialized::defaults(WorkflowConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &WorkflowConfig) -> Result<(), ConfigError> {
        if config.max_parallel_agents == 0 || config.max_parallel_agents > 100 {
            return Err(ConfigError::InvalidMaxParallelAgents(
                config.max_parallel_agents,
            ));
        }
        if config.swarm.max_agents == 0 || config.swarm.max_agents > 100 {
            return Err(ConfigError::InvalidSwarmMaxAgents(config.swarm.max_agents));
        }
        let threshold = config.reflection.confidence_threshold;
        if threshold <= 0.0 || threshold > 1.0 {
            return Err(ConfigError::InvalidConfidenceThreshold(threshold));
        }
        let (simple, medium) = (
            config.complexity_simple_threshold,
            config.complexity_medium_threshold,
        );
        if !(0.0..=1.0).contains(&simple) || !(0.0..=1.0).contains(&medium) || simple > medium {
            return Err(ConfigError::InvalidComplexityThresholds(simple, medium));
        }
        if config.swarm.workspace_snippet_chars == 0 {
            return Err(ConfigError::InvalidSnippetChars(
                config.swarm.workspace_snippet_chars,
            ));
        }
        if config.hybrid_dependency_timeout_secs == 0 {
            return Err(ConfigError::InvalidDependencyTimeout(
                config.hybrid_dependency_timeout_secs,
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        ConfigLoader::validate(&WorkflowConfig::default()).unwrap();
    }

    #[test]
    fn test_load_from_file_overrides() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "max_parallel_agents: 12\nswarm:\n  max_agents: 9\n  workspace_snippet_chars: 256\n"
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.max_parallel_agents, 12);
        assert_eq!(config.swarm.max_agents, 9);
        assert_eq!(config.swarm.workspace_snippet_chars, 256);
        // Untouched keys keep their defaults.
        assert!(config.enable_citations);
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut config = WorkflowConfig::default();
        config.complexity_simple_threshold = 0.9;
        config.complexity_medium_threshold = 0.5;
        let err = ConfigLoader::validate(&config).unwrap_err();
        assert!(err.to_string().contains("complexity thresholds"));
    }

    #[test]
    fn test_zero_swarm_agents_rejected() {
        let mut config = WorkflowConfig::default();
        config.swarm.max_agents = 0;
        assert!(ConfigLoader::validate(&config).is_err());
    }
}
