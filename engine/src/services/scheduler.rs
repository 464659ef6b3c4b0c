//! Periodic poll driver
//!
//! Runs one cycle immediately, then one per interval. A manual refresh runs a
//! cycle now and restarts the interval. Only one cycle is ever in flight;
//! refreshes that arrive meanwhile are folded into it.

use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use utoipa::ToSchema;

/// What a cycle asks the scheduler to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Continue,
    Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// A new cycle will run now
    Scheduled,
    /// Absorbed by a cycle that is already running or queued
    Coalesced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    #[error("Polling halted")]
    Halted,
    #[error("Polling cancelled")]
    Cancelled,
}

#[derive(Debug, Default)]
struct Flags {
    in_flight: AtomicBool,
    halted: AtomicBool,
    cancelled: AtomicBool,
}

pub struct PollingScheduler {
    refresh_tx: mpsc::Sender<()>,
    cancel_tx: watch::Sender<bool>,
    flags: Arc<Flags>,
    handle: JoinHandle<()>,
}

impl PollingScheduler {
    pub fn spawn<F, Fut>(period: Duration, mut cycle: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = PollOutcome> + Send + 'static,
    {
        let (refresh_tx, mut refresh_rx) = mpsc::channel::<()>(1);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let flags = Arc::new(Flags::default());
        let task_flags = flags.clone();

        // tokio intervals reject a zero period
        let period = period.max(Duration::from_millis(1));
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => break,
                    _ = interval.tick() => {}
                    Some(()) = refresh_rx.recv() => {
                        debug!("Manual refresh");
                        interval.reset();
                    }
                }

                task_flags.in_flight.store(true, Ordering::SeqCst);
                let outcome = tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => break,
                    outcome = cycle() => outcome,
                };
                task_flags.in_flight.store(false, Ordering::SeqCst);

                // Refreshes that raced the cycle were served by it
                while refresh_rx.try_recv().is_ok() {}

                if outcome == PollOutcome::Halt {
                    info!("Polling halted");
                    task_flags.halted.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        Self {
            refresh_tx,
            cancel_tx,
            flags,
            handle,
        }
    }

    pub fn refresh(&self) -> Result<RefreshOutcome, SchedulerError> {
        if self.is_halted() {
            return Err(SchedulerError::Halted);
        }
        if self.flags.cancelled.load(Ordering::SeqCst) {
            return Err(SchedulerError::Cancelled);
        }
        if self.flags.in_flight.load(Ordering::SeqCst) {
            return Ok(RefreshOutcome::Coalesced);
        }
        match self.refresh_tx.try_send(()) {
            Ok(()) => Ok(RefreshOutcome::Scheduled),
            Err(mpsc::error::TrySendError::Full(())) => Ok(RefreshOutcome::Coalesced),
            Err(mpsc::error::TrySendError::Closed(())) if self.is_halted() => Err(SchedulerError::Halted),
            Err(mpsc::error::TrySendError::Closed(())) => Err(SchedulerError::Cancelled),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.flags.halted.load(Ordering::SeqCst)
    }

    /// Stops polling; an in-flight cycle is dropped where it is suspended
    pub fn cancel(&self) {
        self.flags.cancelled.store(true, Ordering::SeqCst);
        let _ = self.cancel_tx.send(true);
        self.handle.abort();
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.cancel();
    }
}
