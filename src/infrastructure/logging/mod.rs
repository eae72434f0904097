//! Tracing setup: env-filtered subscriber with json/pretty output and
//! optional rotating file logs.

use std::io;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Stdout log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
    /// When set, a daily-rotated JSON log file is written here.
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            log_dir: None,
        }
    }
}

/// Initialized logger; the guard keeps the file writer alive.
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

impl Logger {
    pub fn init(config: &LogConfig) -> Result<Self> {
        let default_level = parse_log_level(&config.level)?;
        let env_filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy();

        let guard = if let Some(log_dir) = &config.log_dir {
            let file_appender = rolling::daily(log_dir, "maestro.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            // File output is always JSON for structured ingestion.
            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .with_filter(env_filter);

            match config.format {
                LogFormat::Json => tracing_subscriber::registry()
                    .with(file_layer)
                    .with(tracing_subscriber::fmt::layer().json().with_writer(io::stdout))
                    .init(),
                LogFormat::Pretty => tracing_subscriber::registry()
                    .with(file_layer)
                    .with(tracing_subscriber::fmt::layer().pretty().with_writer(io::stdout))
                    .init(),
            }
            Some(guard)
        } else {
            match config.format {
                LogFormat::Json => tracing_subscriber::registry()
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(io::stdout)
                            .with_filter(env_filter),
                    )
                    .init(),
                LogFormat::Pretty => tracing_subscriber::registry()
                    .with(
                        tracing_subscriber::fmt::layer()
                            .pretty()
                            .with_writer(io::stdout)
                            .with_filter(env_filter),
                    )
                    .init(),
            }
            None
        };

        Ok(Self { _guard: guard })
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(anyhow!(
            "invalid log level '{other}'; expected trace|debug|info|warn|error"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert!(parse_log_level("loud").is_err());
    }
}
