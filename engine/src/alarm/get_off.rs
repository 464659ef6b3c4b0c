use super::session::{AlarmProgress, Coordinator, Effects, Session};
use super::{check_arm, AlarmEvent, AlarmKind, ArmConflict, RefreshError, RefreshResult};
use crate::config::AlarmSettings;
use crate::error::NetworkError;
use crate::models::{BoardedBus, BusPosition, GetOffAlarmStatus, LocationSample, RemainTime, StationInfo};
use crate::providers::BusApi;
use crate::services::board_matcher::BoardMatcher;
use crate::services::bus::{EventBus, EventSubscription, ObservationBus, Subscription};
use crate::services::notifier::Notifier;
use crate::services::scheduler::PollOutcome;
use crate::services::throttle::Debounce;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info};

const NOTIFICATION_TITLE: &str = "하차 알람";
const TERMINATED_BODY: &str = "하차 정거장에 도착하여 알람이 종료되었습니다.";

/// Alighting alarm coordinator
///
/// Cheap to clone; every clone drives the same coordinator.
#[derive(Clone)]
pub struct GetOffAlarm {
    inner: Arc<Inner>,
}

struct Inner {
    api: BusApi,
    settings: AlarmSettings,
    notifier: Arc<dyn Notifier>,
    location: watch::Receiver<Option<LocationSample>>,
    status: ObservationBus<Option<GetOffAlarmStatus>>,
    progress: ObservationBus<AlarmProgress>,
    events: EventBus<AlarmEvent>,
    state: Mutex<State>,
}

struct State {
    armed: Option<GetOffAlarmStatus>,
    session: Option<Session>,
    sessions_started: u64,
    stations: Option<Arc<Vec<StationInfo>>>,
    positions: Vec<BusPosition>,
    matcher: BoardMatcher,
    /// Remaining count of the last approach message sent
    last_notified: Option<u32>,
    terminated: bool,
    progress: AlarmProgress,
}

impl State {
    fn current(&self, session_id: u64) -> bool {
        self.armed.is_some() && self.session.as_ref().is_some_and(|s| s.id == session_id)
    }
}

impl GetOffAlarm {
    pub fn new(
        api: BusApi,
        settings: AlarmSettings,
        notifier: Arc<dyn Notifier>,
        location: watch::Receiver<Option<LocationSample>>,
        events: EventBus<AlarmEvent>,
    ) -> Self {
        let matcher = BoardMatcher::from_settings(&settings);
        Self {
            inner: Arc::new(Inner {
                api,
                settings,
                notifier,
                location,
                status: ObservationBus::new(None),
                progress: ObservationBus::new(AlarmProgress::default()),
                events,
                state: Mutex::new(State {
                    armed: None,
                    session: None,
                    sessions_started: 0,
                    stations: None,
                    positions: Vec::new(),
                    matcher,
                    last_notified: None,
                    terminated: false,
                    progress: AlarmProgress::default(),
                }),
            }),
        }
    }

    /// Arms the alarm unless one is already armed
    pub fn start(&self, bus_route_id: &str, target_ord: u32, ars_id: &str) -> Result<(), ArmConflict> {
        let requested = GetOffAlarmStatus {
            target_ord,
            bus_route_id: bus_route_id.to_string(),
            ars_id: ars_id.to_string(),
        };

        let mut state = self.inner.lock();
        check_arm(state.armed.as_ref(), &requested)?;

        info!(bus_route_id, target_ord, ars_id, "Get-off alarm armed");
        state.armed = Some(requested.clone());
        self.inner.begin_session(&mut state);
        self.inner.status.publish(Some(requested));
        Ok(())
    }

    /// Disarms; a no-op when nothing is armed
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        self.inner.disarm(&mut state);
    }

    pub fn refresh(&self) -> RefreshResult {
        let mut state = self.inner.lock();
        if state.armed.is_none() {
            return Err(RefreshError::Inactive);
        }
        state.session.as_mut().ok_or(RefreshError::Inactive)?.refresh()
    }

    /// Starts a fresh session for the armed alarm, clearing a halt
    pub fn reset(&self) -> Result<(), RefreshError> {
        let mut state = self.inner.lock();
        if state.armed.is_none() {
            return Err(RefreshError::Inactive);
        }
        info!("Get-off alarm session reset");
        self.inner.begin_session(&mut state);
        Ok(())
    }

    pub fn status(&self) -> Option<GetOffAlarmStatus> {
        self.inner.status.current()
    }

    pub fn progress(&self) -> AlarmProgress {
        self.inner.progress.current()
    }

    pub fn subscribe_status(&self) -> Subscription<Option<GetOffAlarmStatus>> {
        self.inner.status.subscribe()
    }

    pub fn subscribe_progress(&self) -> Subscription<AlarmProgress> {
        self.inner.progress.subscribe()
    }

    pub fn subscribe_events(&self) -> EventSubscription<AlarmEvent> {
        self.inner.events.subscribe()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin_session(self: &Arc<Self>, state: &mut State) {
        state.session = None;
        state.sessions_started += 1;
        let id = state.sessions_started;

        state.stations = None;
        state.positions.clear();
        state.matcher = BoardMatcher::from_settings(&self.settings);
        state.last_notified = None;
        state.terminated = false;
        state.progress = AlarmProgress::default();
        self.progress.publish(state.progress.clone());

        let mut session = Session::start(self, id, AlarmKind::GetOff, &self.settings);
        session.attach(self.spawn_location_watch(id));
        state.session = Some(session);
    }

    fn disarm(&self, state: &mut State) {
        if state.armed.take().is_none() {
            return;
        }
        info!("Get-off alarm disarmed");
        state.session = None;
        state.stations = None;
        state.positions.clear();
        state.progress = AlarmProgress::default();
        self.progress.publish(AlarmProgress::default());
        self.status.publish(None);
    }

    /// Re-matches on settled bursts of location samples
    fn spawn_location_watch(self: &Arc<Self>, session_id: u64) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let mut location = self.location.clone();
        let mut debounce = Debounce::new(self.settings.location_debounce());

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = location.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        debounce.poke();
                    }
                    _ = debounce.settled() => {
                        let Some(inner) = weak.upgrade() else { break };
                        inner.on_location(session_id);
                    }
                }
            }
        })
    }

    fn on_location(&self, session_id: u64) {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.current(session_id) || state.stations.is_none() {
            return;
        }
        debug!(session_id, "Re-matching after location update");

        let mut effects = Effects::default();
        self.evaluate(state, &mut effects);
        state.progress.changed_by_timer = false;
        self.settle(state, &effects);
        drop(guard);
        effects.deliver(&self.events, self.notifier.as_ref());
    }

    async fn run_poll(self: Arc<Self>, session_id: u64) -> PollOutcome {
        let (route_id, cached_stations) = {
            let state = self.lock();
            let Some(armed) = state.armed.as_ref().filter(|_| state.current(session_id)) else {
                return PollOutcome::Halt;
            };
            (armed.bus_route_id.clone(), state.stations.clone())
        };

        let fetched = async {
            let stations = match cached_stations {
                Some(stations) => stations,
                None => Arc::new(self.api.stations_by_route(&route_id).await?),
            };
            let positions = self.api.bus_positions_by_route(&route_id).await?;
            Ok::<_, NetworkError>((stations, positions))
        }
        .await;

        self.apply_poll(session_id, fetched)
    }

    fn apply_poll(
        &self,
        session_id: u64,
        fetched: Result<(Arc<Vec<StationInfo>>, Vec<BusPosition>), NetworkError>,
    ) -> PollOutcome {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.current(session_id) {
            debug!(session_id, "Discarding poll result of a finished session");
            return PollOutcome::Halt;
        }
        let Some(session) = state.session.as_mut() else {
            return PollOutcome::Halt;
        };

        let mut effects = Effects::default();
        let outcome = match fetched {
            Ok((stations, positions)) => {
                session.record_success(&mut state.progress, &mut effects);
                state.stations = Some(stations);
                state.positions = positions;
                self.evaluate(state, &mut effects);
                PollOutcome::Continue
            }
            Err(err) => session.record_failure(err, &mut state.progress, &mut effects),
        };

        state.progress.changed_by_timer = false;
        state.progress.updated_at = Some(Utc::now());
        let disarmed = self.settle(state, &effects);
        drop(guard);
        effects.deliver(&self.events, self.notifier.as_ref());

        if disarmed {
            PollOutcome::Halt
        } else {
            outcome
        }
    }

    /// Publishes the new snapshot and disarms if the target was reached.
    /// Returns true when it disarmed. Effects are delivered by the caller
    /// once the state lock is released, so a notifier may call back in.
    fn settle(&self, state: &mut State, effects: &Effects) -> bool {
        self.progress.publish(state.progress.clone());
        if effects.terminate {
            self.disarm(state);
        }
        effects.terminate
    }

    /// Board-matches against cached positions and checks for arrival
    fn evaluate(&self, state: &mut State, effects: &mut Effects) {
        let (Some(armed), Some(stations)) = (state.armed.clone(), state.stations.clone()) else {
            return;
        };
        if state.terminated {
            return;
        }

        let sample = *self.location.borrow();
        let matched = state.matcher.find_boarded(sample.as_ref(), &state.positions, Utc::now());
        let Some(matched) = matched else {
            state.progress.vehicle = None;
            state.progress.boarded_bus = None;
            state.progress.remaining_stations = None;
            state.progress.remain_time = None;
            return;
        };

        let ord = matched.position.ord;
        let remaining = armed.target_ord.saturating_sub(ord);
        state.progress.boarded_bus = Some(BoardedBus {
            vehicle_id: matched.position.vehicle_id.clone(),
            location: matched.location,
            remain_station: remaining,
        });
        state.progress.remaining_stations = Some(remaining);
        state.progress.remain_time =
            remaining_seconds(&stations, ord, armed.target_ord).map(RemainTime::from_seconds);
        state.progress.vehicle = Some(matched.position.clone());

        if ord >= armed.target_ord {
            state.terminated = true;
            info!(
                vehicle_id = %matched.position.vehicle_id,
                ord,
                target_ord = armed.target_ord,
                "Get-off target reached"
            );
            effects.events.push(AlarmEvent::Terminated {
                kind: AlarmKind::GetOff,
                target_ord: armed.target_ord,
                vehicle_id: matched.position.vehicle_id,
            });
            effects.notify(NOTIFICATION_TITLE, TERMINATED_BODY.to_string());
            effects.terminate = true;
            return;
        }

        if remaining <= self.settings.approach_threshold_stops && state.last_notified != Some(remaining) {
            state.last_notified = Some(remaining);
            let target_name = stations
                .iter()
                .find(|s| s.ord == armed.target_ord)
                .map(|s| s.name.as_str())
                .unwrap_or("하차 정거장");
            let message = format!("{target_name}까지 {remaining}정거장 남았습니다.");
            state.progress.message = Some(message.clone());
            effects.events.push(AlarmEvent::Approaching {
                kind: AlarmKind::GetOff,
                remaining_stations: remaining,
                message: message.clone(),
            });
            effects.notify(NOTIFICATION_TITLE, message);
        }
    }

    fn on_tick(&self, session_id: u64) {
        let mut state = self.lock();
        if !state.current(session_id) {
            return;
        }
        if state.progress.tick() {
            self.progress.publish(state.progress.clone());
        }
    }
}

impl Coordinator for Inner {
    fn poll(self: Arc<Self>, session_id: u64) -> BoxFuture<'static, PollOutcome> {
        self.run_poll(session_id).boxed()
    }

    fn tick(&self, session_id: u64) {
        self.on_tick(session_id)
    }
}

/// Sum of the section times after `from_ord` up to and including `to_ord`
/// `None` while stops remain but no section on the way has a known time
fn remaining_seconds(stations: &[StationInfo], from_ord: u32, to_ord: u32) -> Option<u32> {
    if from_ord >= to_ord {
        return Some(0);
    }
    stations
        .iter()
        .filter(|s| s.ord > from_ord && s.ord <= to_ord)
        .filter_map(|s| s.estimated_seconds)
        .fold(None, |total, seconds| Some(total.unwrap_or(0u32).saturating_add(seconds)))
}
