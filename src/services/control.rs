//! Pause / resume / cancel control for a running strategy.
//!
//! A `ControlSignals` half lives with whoever owns the inbound signal
//! channel; the `ControlHandle` half is carried by the strategy and polled
//! at declared checkpoints. While paused the checkpoint blocks; on cancel it
//! unwinds with [`OrchestratorError::Canceled`].

use tokio::sync::watch;
use tracing::debug;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};

/// Sender half: wired to the engine's signal delivery.
#[derive(Debug)]
pub struct ControlSignals {
    paused_tx: watch::Sender<bool>,
    canceled_tx: watch::Sender<bool>,
}

impl ControlSignals {
    /// Create a connected signal/handle pair.
    pub fn channel() -> (Self, ControlHandle) {
        let (paused_tx, paused_rx) = watch::channel(false);
        let (canceled_tx, canceled_rx) = watch::channel(false);
        (
            Self {
                paused_tx,
                canceled_tx,
            },
            ControlHandle {
                paused: paused_rx,
                canceled: canceled_rx,
            },
        )
    }

    pub fn pause(&self) {
        let _ = self.paused_tx.send(true);
    }

    pub fn resume(&self) {
        let _ = self.paused_tx.send(false);
    }

    pub fn cancel(&self) {
        let _ = self.canceled_tx.send(true);
    }
}

/// Receiver half carried by strategies.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    paused: watch::Receiver<bool>,
    canceled: watch::Receiver<bool>,
}

impl ControlHandle {
    /// A handle with no attached signals; checkpoints always pass.
    pub fn unattached() -> Self {
        let (_, handle) = ControlSignals::channel();
        handle
    }

    pub fn is_canceled(&self) -> bool {
        *self.canceled.borrow()
    }

    /// Declared pause-point. Blocks while paused; fails with `Canceled` once
    /// the cancel signal is observed.
    pub async fn checkpoint(&self, name: &str) -> OrchestratorResult<()> {
        let mut paused = self.paused.clone();
        let mut canceled = self.canceled.clone();

        loop {
            if *canceled.borrow() {
                debug!(checkpoint = name, "canceled at checkpoint");
                return Err(OrchestratorError::Canceled);
            }
            if !*paused.borrow() {
                return Ok(());
            }
            debug!(checkpoint = name, "paused at checkpoint");
            tokio::select! {
                changed = paused.changed() => {
                    if changed.is_err() {
                        // Signal side dropped; treat as resumed.
                        return Ok(());
                    }
                }
                changed = canceled.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_checkpoint_passes_when_idle() {
        let handle = ControlHandle::unattached();
        handle.checkpoint("before_execution").await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_fails_checkpoint() {
        let (signals, handle) = ControlSignals::channel();
        signals.cancel();
        let err = handle.checkpoint("before_synthesis").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Canceled));
    }

    #[tokio::test]
    async fn test_pause_blocks_until_resume() {
        let (signals, handle) = ControlSignals::channel();
        signals.pause();

        let waiter = tokio::spawn(async move { handle.checkpoint("before_completion").await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        signals.resume();
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_while_paused() {
        let (signals, handle) = ControlSignals::channel();
        signals.pause();

        let waiter = tokio::spawn(async move { handle.checkpoint("before_execution").await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        signals.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, OrchestratorError::Canceled));
    }
}
