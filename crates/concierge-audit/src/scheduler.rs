//! Timer that flushes the audit queue on a fixed interval.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{debug, info};

use crate::queue::{BatchQueue, FlushTrigger};

/// Handle to the background flush task.
pub struct FlushScheduler {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl FlushScheduler {
    /// Start the scheduler in a background task.
    ///
    /// The first tick fires one `period` after start; ticks on an empty queue
    /// do nothing.
    pub fn start(queue: Arc<BatchQueue>, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let first_tick = Instant::now() + period;

        let task = tokio::spawn(async move {
            info!(
                flush_interval_ms = period.as_millis() as u64,
                batch_size = queue.batch_size(),
                "Audit flush scheduler started"
            );

            let mut ticker = interval_at(first_tick, period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !queue.is_empty() {
                            queue.flush(FlushTrigger::Timer).await;
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Audit flush scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        });

        Self { shutdown_tx, task }
    }

    /// Cancel the timer and wait for an in-progress flush to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}
