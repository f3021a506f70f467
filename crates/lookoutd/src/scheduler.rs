//! Fixed-rate frame scheduler with drop-if-busy admission.
//!
//! A tick that fires while the previous cycle is still running is dropped,
//! never queued. The admission token is an owned semaphore permit moved
//! into the cycle task, so it is released however the cycle ends.

use crate::pipeline::Pipeline;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Single-slot admission token: at most one cycle in flight.
pub struct TickGate {
    slot: Arc<Semaphore>,
}

impl TickGate {
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    /// Take the token without waiting; `None` while a cycle is running.
    pub fn try_enter(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slot).try_acquire_owned().ok()
    }

    /// Wait for the running cycle, if any, to finish.
    pub async fn drain(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.slot).acquire_owned().await.ok()
    }
}

#[derive(Debug, Default)]
pub struct TickStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickCounts {
    pub accepted: u64,
    pub dropped: u64,
    pub failed: u64,
}

impl TickStats {
    pub fn snapshot(&self) -> TickCounts {
        TickCounts {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

pub struct SchedulerHandle {
    stop: Arc<watch::Sender<bool>>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the timer, wait for an in-flight cycle, then release the device.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "scheduler task ended abnormally");
        }
    }
}

/// Start firing `pipeline` every `period`.
pub fn spawn(pipeline: Arc<Pipeline>, period: Duration) -> SchedulerHandle {
    let (stop_tx, stop_rx) = watch::channel(false);
    let stop = Arc::new(stop_tx);
    let task = tokio::spawn(run(pipeline, period, stop_rx, Arc::clone(&stop)));
    SchedulerHandle { stop, task }
}

async fn run(
    pipeline: Arc<Pipeline>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    halt: Arc<watch::Sender<bool>>,
) {
    let gate = TickGate::new();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(period_ms = period.as_millis() as u64, "frame scheduler started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
        }
        if *stop.borrow() {
            break;
        }

        let stats = &pipeline.context().stats;
        let Some(permit) = gate.try_enter() else {
            stats.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::trace!("tick dropped; previous cycle still running");
            continue;
        };
        stats.accepted.fetch_add(1, Ordering::Relaxed);

        let pipeline = Arc::clone(&pipeline);
        let halt = Arc::clone(&halt);
        tokio::spawn(async move {
            let _permit = permit;
            let ctx = pipeline.context();
            match pipeline.run_tick().await {
                Ok(outcome) => tracing::debug!(?outcome, "tick complete"),
                Err(e) if e.is_device_fault() => {
                    ctx.stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(error = %e, "capture device fault; stopping scheduler");
                    ctx.surface.set_status(format!(
                        "Capture failed: {e}. Check if the camera is disconnected and restart the daemon."
                    ));
                    let _ = halt.send(true);
                }
                Err(e) => {
                    ctx.stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, "tick aborted");
                }
            }
        });
    }

    drop(ticker);
    let _last = gate.drain().await;
    pipeline.capture().release();
    tracing::info!(stats = ?pipeline.context().stats.snapshot(), "frame scheduler stopped");
}
