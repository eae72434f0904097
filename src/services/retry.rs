//! Activity retry policy: bounded attempts with exponential backoff.
//!
//! Transient failures (rate limits, timeouts, 5xx) are retried; permanent
//! failures propagate immediately wrapped with the activity name.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use tracing::warn;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};

/// Start-to-close timeout for agent/synthesis execution activities.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);
/// Start-to-close timeout for event emission.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(30);
/// Start-to-close timeout for peer-to-peer mailbox activities.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(10);

/// Markers that classify an error message as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "429",
    "timeout",
    "503",
    "502",
    "temporary",
    "unavailable",
];

/// True when the message indicates a transient condition worth retrying.
pub fn is_transient_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

/// Bounded-attempt retry policy with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// No retries; one attempt only.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Run `op`, retrying transient failures until attempts are exhausted.
    /// The final error is wrapped with `activity` for propagation.
    pub async fn run<F, Fut, T>(&self, activity: &'static str, mut op: F) -> OrchestratorResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_max_interval(self.max_backoff)
            .with_max_elapsed_time(None)
            .build();

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let transient = is_transient_error(&err.to_string());
                    if !transient || attempt >= self.max_attempts {
                        return Err(OrchestratorError::activity(activity, err));
                    }
                    let delay = backoff.next_backoff().unwrap_or(self.max_backoff);
                    warn!(
                        activity,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient activity failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
