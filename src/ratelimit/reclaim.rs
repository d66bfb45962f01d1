//! Background eviction of expired windows.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::limiter::RateLimiter;

/// Periodically sweeps a limiter's store so expired windows do not pile up.
pub struct Reclaimer;

impl Reclaimer {
    /// Spawn a sweep task on the current tokio runtime.
    ///
    /// The first sweep happens one `period` after spawning. A zero period is
    /// raised to one millisecond.
    pub fn spawn(limiter: RateLimiter, period: Duration) -> ReclaimerHandle {
        let period = period.max(Duration::from_millis(1));
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            let period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);
            info!(period_ms, "Reclaimer started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = limiter.sweep();
                        debug!(evicted, "Reclaimer pass complete");
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Reclaimer stopped");
        });

        ReclaimerHandle { shutdown_tx, task }
    }
}

/// Handle to a running [`Reclaimer`] task.
///
/// Dropping the handle also stops the task.
pub struct ReclaimerHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReclaimerHandle {
    /// Stop the task and wait for it to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
