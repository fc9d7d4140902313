// src/utils/stop.rs

//! Process-wide cooperative stop signal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Settable and clearable stop flag shared by the crawler and the enricher.
///
/// Waits taken through [`StopSignal::sleep`] end early as soon as the flag
/// is set.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request a stop.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Re-enable processing.
    pub fn clear(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Sleep for `duration` unless a stop arrives first.
    ///
    /// Returns `false` when the wait was cut short (or the flag was already
    /// set), `true` when the full duration elapsed.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }

        let mut rx = self.tx.subscribe();
        let stopped = async move {
            loop {
                if *rx.borrow_and_update() {
                    return;
                }
                if rx.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_stopped(),
            _ = stopped => false,
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
