//! Lifecycle-bound background reclamation.
//!
//! A periodic task that sweeps a strategy's store for expired entries
//! and re-enforces the capacity bound, so low-traffic keys are
//! eventually reclaimed even without new requests. The task acquires
//! the same lock as the request path and is owned by its limiter:
//! started and stopped explicitly, aborted if the limiter is dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use super::limiter::Inner;
use super::now_ms;

pub(crate) struct ReclaimerHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ReclaimerHandle {
    /// Spawn the periodic sweep. Must run inside a tokio runtime.
    pub(crate) fn spawn(inner: Arc<Mutex<Inner>>, every: Duration) -> Self {
        let (shutdown, mut rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the first sweep
            // should happen one full interval from now.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut rx => break,
                    _ = ticker.tick() => {
                        let removed = {
                            let mut inner = inner.lock().await;
                            inner.strategy.reclaim(now_ms())
                        };
                        if removed > 0 {
                            debug!(removed, "background reclaim");
                        }
                    }
                }
            }
        });

        Self { shutdown, task }
    }

    /// Signal the task and wait for it to exit.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = self.task.await;
    }

    /// Kill the task without waiting (drop path).
    pub(crate) fn abort(&self) {
        self.task.abort();
    }
}
