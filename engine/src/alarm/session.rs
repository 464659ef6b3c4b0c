use super::{AlarmEvent, AlarmKind, HaltReason, RefreshError, RefreshResult};
use crate::config::AlarmSettings;
use crate::error::{ErrorClass, NetworkError};
use crate::models::{BoardedBus, BusPosition, RemainTime};
use crate::services::bus::EventBus;
use crate::services::notifier::Notifier;
use crate::services::scheduler::{PollOutcome, PollingScheduler, SchedulerError};
use crate::services::throttle::Throttle;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};
use utoipa::ToSchema;

/// What observers see of an armed alarm between polls
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct AlarmProgress {
    /// Vehicle being tracked (get-on) or matched as boarded (get-off)
    pub vehicle: Option<BusPosition>,
    pub boarded_bus: Option<BoardedBus>,
    pub remaining_stations: Option<u32>,
    pub remain_time: Option<RemainTime>,
    /// Latest approach message
    pub message: Option<String>,
    pub network_degraded: bool,
    pub halted: Option<HaltReason>,
    /// Set when only the local countdown moved since the last snapshot
    pub changed_by_timer: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AlarmProgress {
    /// One second of local decay. Returns false when nothing changed.
    pub(crate) fn tick(&mut self) -> bool {
        match self.remain_time.as_mut() {
            Some(remain) if remain.total_seconds().is_some() && !remain.is_zero() => {
                remain.decrement();
                self.changed_by_timer = true;
                true
            }
            _ => false,
        }
    }
}

/// Events and notifications produced by one state transition
#[derive(Debug, Default)]
pub(crate) struct Effects {
    pub events: Vec<AlarmEvent>,
    pub notifications: Vec<(String, String)>,
    pub terminate: bool,
}

impl Effects {
    pub fn notify(&mut self, title: &str, body: String) {
        self.notifications.push((title.to_string(), body));
    }

    pub fn deliver(self, events: &EventBus<AlarmEvent>, notifier: &dyn Notifier) {
        for event in self.events {
            events.publish(event);
        }
        for (title, body) in self.notifications {
            notifier.notify(&title, &body);
        }
    }
}

/// Hooks the session tasks call back into
pub(crate) trait Coordinator: Send + Sync + 'static {
    fn poll(self: Arc<Self>, session_id: u64) -> BoxFuture<'static, PollOutcome>;
    fn tick(&self, session_id: u64);
}

/// Background work of one armed session
///
/// Dropping it cancels the scheduler and every task; completions that race
/// the drop are rejected by the session id check in the coordinator.
pub(crate) struct Session {
    pub id: u64,
    kind: AlarmKind,
    scheduler: PollingScheduler,
    tasks: Vec<JoinHandle<()>>,
    throttle: Throttle,
    degraded: bool,
    pub halted: Option<HaltReason>,
}

impl Session {
    pub fn start<C: Coordinator>(coordinator: &Arc<C>, id: u64, kind: AlarmKind, settings: &AlarmSettings) -> Self {
        let weak = Arc::downgrade(coordinator);
        let scheduler = PollingScheduler::spawn(settings.poll_interval(), move || {
            let weak: Weak<C> = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(coordinator) => coordinator.poll(id).await,
                    None => PollOutcome::Halt,
                }
            }
        });

        let weak = Arc::downgrade(coordinator);
        let period = settings.countdown_tick();
        let countdown = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(coordinator) = weak.upgrade() else { break };
                coordinator.tick(id);
            }
        });

        debug!(?kind, session_id = id, "Alarm session started");
        Self {
            id,
            kind,
            scheduler,
            tasks: vec![countdown],
            throttle: Throttle::new(settings.refresh_throttle()),
            degraded: false,
            halted: None,
        }
    }

    /// Attaches another task whose lifetime ends with the session
    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    pub fn refresh(&mut self) -> RefreshResult {
        if let Some(reason) = self.halted {
            return Err(RefreshError::Halted(reason));
        }
        if !self.throttle.try_acquire() {
            return Err(RefreshError::Throttled);
        }
        self.scheduler.refresh().map_err(|e| match e {
            SchedulerError::Halted => RefreshError::Halted(self.halted.unwrap_or(HaltReason::RouteUnsupported)),
            SchedulerError::Cancelled => RefreshError::Inactive,
        })
    }

    /// Clears a degraded streak after a successful poll
    pub fn record_success(&mut self, progress: &mut AlarmProgress, effects: &mut Effects) {
        progress.network_degraded = false;
        if self.degraded {
            self.degraded = false;
            debug!(kind = ?self.kind, "Network restored");
            effects.events.push(AlarmEvent::NetworkRestored { kind: self.kind });
        }
    }

    /// Classifies a failed poll and tells the scheduler whether to go on
    pub fn record_failure(
        &mut self,
        err: NetworkError,
        progress: &mut AlarmProgress,
        effects: &mut Effects,
    ) -> PollOutcome {
        let kind = self.kind;
        match err.class() {
            ErrorClass::Transient => {
                warn!(?kind, error = %err, "Poll failed, retrying on next tick");
                progress.network_degraded = true;
                if !self.degraded {
                    self.degraded = true;
                    effects.events.push(AlarmEvent::NetworkDegraded {
                        kind,
                        error: err.to_string(),
                    });
                }
                PollOutcome::Continue
            }
            ErrorClass::Fatal => {
                let (reason, event) = match err {
                    NetworkError::TrafficExceed => (HaltReason::QuotaExhausted, AlarmEvent::QuotaExhausted { kind }),
                    _ => (HaltReason::AccessKeyRejected, AlarmEvent::AccessKeyRejected { kind }),
                };
                error!(?kind, error = %err, "Poll failed fatally, halting");
                self.halt(reason, progress);
                effects.events.push(event);
                PollOutcome::Halt
            }
            ErrorClass::Unsupported => {
                warn!(?kind, "No live data for this alarm, halting");
                self.halt(HaltReason::RouteUnsupported, progress);
                effects.events.push(AlarmEvent::RouteUnsupported { kind });
                PollOutcome::Halt
            }
        }
    }

    fn halt(&mut self, reason: HaltReason, progress: &mut AlarmProgress) {
        self.halted = Some(reason);
        progress.halted = Some(reason);
        self.tasks.iter().for_each(JoinHandle::abort);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.scheduler.cancel();
        self.tasks.iter().for_each(JoinHandle::abort);
        debug!(kind = ?self.kind, session_id = self.id, "Alarm session ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_only_decays_countdowns() {
        let mut progress = AlarmProgress {
            remain_time: Some(RemainTime::from_seconds(61)),
            ..AlarmProgress::default()
        };
        assert!(progress.tick());
        assert_eq!(progress.remain_time, Some(RemainTime::from_seconds(60)));
        assert!(progress.changed_by_timer);

        progress.remain_time = Some(RemainTime::Stops { count: 3 });
        assert!(!progress.tick());

        progress.remain_time = Some(RemainTime::from_seconds(0));
        assert!(!progress.tick());
    }
}
