//! Polling worker that drives engine ticks until shut down.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Counters reported when a worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub ticks: u64,
    pub processed: u64,
    pub errors: u64,
}

pub struct Worker {
    engine: Engine,
    poll_interval: Duration,
    shutdown: Arc<Notify>,
}

impl Worker {
    pub fn new(engine: Engine, poll_interval: Duration) -> Self {
        Self {
            engine,
            poll_interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle for stopping this worker from another task.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Run ticks until shut down.
    ///
    /// Ticks run back to back while work is available; an idle tick sleeps
    /// for the poll interval. A tick in flight always completes.
    pub async fn run(&self) -> WorkerStats {
        let mut stats = WorkerStats::default();
        info!(worker = %self.engine.worker_id(), "Worker started");

        loop {
            let report = self.engine.tick().await;
            stats.ticks += 1;
            if let Some(ref error) = report.error {
                stats.errors += 1;
                warn!(worker = %self.engine.worker_id(), error = %error, "Tick reported an error");
            }

            if report.ran {
                stats.processed += 1;
                debug!(
                    worker = %self.engine.worker_id(),
                    intent_id = ?report.intent_id,
                    status = ?report.status,
                    "Tick complete"
                );
                tokio::select! {
                    biased;
                    _ = self.shutdown.notified() => break,
                    _ = tokio::task::yield_now() => {}
                }
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = self.shutdown.notified() => break,
                }
            }
        }

        info!(
            worker = %self.engine.worker_id(),
            ticks = stats.ticks,
            processed = stats.processed,
            errors = stats.errors,
            "Worker stopped"
        );
        stats
    }

    /// Signal the worker to stop after its current tick.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
