//! Background drain loop
//!
//! Runs `drain_and_schedule` on a blocking thread whenever a chunk arrives or
//! the poll interval elapses. The poll keeps the lookahead topped up and
//! detects underruns while no chunks are arriving.

use crate::error::Error;
use crate::playback::scheduler::Scheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Handle to the drain task
pub struct SchedulerDriver {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SchedulerDriver {
    /// Spawn the drain task on the current tokio runtime
    pub fn spawn(scheduler: Arc<Scheduler>, poll_interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(drain_loop(scheduler, poll_interval, shutdown_rx));
        info!("Scheduler driver started (poll every {:?})", poll_interval);
        Self { shutdown_tx, handle }
    }

    /// True once the drain task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the drain task and wait for it
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            warn!("Scheduler driver task ended abnormally: {}", e);
        }
        info!("Scheduler driver stopped");
    }
}

async fn drain_loop(
    scheduler: Arc<Scheduler>,
    poll_interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                debug!("Scheduler driver received shutdown");
                break;
            }
            _ = ticker.tick() => {}
            _ = scheduler.chunk_arrived() => {}
        }

        if !scheduler.is_streaming() {
            continue;
        }

        // Decode is CPU-bound; keep it off the async workers
        let worker = Arc::clone(&scheduler);
        match tokio::task::spawn_blocking(move || worker.drain_and_schedule()).await {
            Ok(Ok(_)) => {}
            Ok(Err(Error::SinkFatal(e))) => {
                // Stream is already stopped; a new pipeline is needed
                error!("Scheduler driver exiting after sink failure: {}", e);
                break;
            }
            Ok(Err(e)) => warn!("Drain failed: {}", e),
            Err(e) => {
                error!("Drain task panicked: {}", e);
                break;
            }
        }
    }
}
