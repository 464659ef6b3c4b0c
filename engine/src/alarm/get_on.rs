use super::session::{AlarmProgress, Coordinator, Effects, Session};
use super::{check_arm, AlarmEvent, AlarmKind, ArmConflict, RefreshError, RefreshResult};
use crate::config::AlarmSettings;
use crate::error::NetworkError;
use crate::models::{ArrivalInfo, BusPosition, GetOnAlarmStatus};
use crate::providers::BusApi;
use crate::services::bus::{EventBus, EventSubscription, ObservationBus, Subscription};
use crate::services::notifier::Notifier;
use crate::services::scheduler::PollOutcome;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const NOTIFICATION_TITLE: &str = "승차 알람";

/// Boarding alarm coordinator: waits for one vehicle to reach one stop
#[derive(Clone)]
pub struct GetOnAlarm {
    inner: Arc<Inner>,
}

struct Inner {
    api: BusApi,
    settings: AlarmSettings,
    notifier: Arc<dyn Notifier>,
    status: ObservationBus<Option<GetOnAlarmStatus>>,
    progress: ObservationBus<AlarmProgress>,
    events: EventBus<AlarmEvent>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    armed: Option<GetOnAlarmStatus>,
    session: Option<Session>,
    sessions_started: u64,
    last_notified: Option<u32>,
    terminated: bool,
    progress: AlarmProgress,
}

impl State {
    fn current(&self, session_id: u64) -> bool {
        self.armed.is_some() && self.session.as_ref().is_some_and(|s| s.id == session_id)
    }
}

/// One poll's worth of data about the awaited vehicle
struct Observation {
    position: BusPosition,
    arrival: Option<ArrivalInfo>,
}

impl GetOnAlarm {
    pub fn new(api: BusApi, settings: AlarmSettings, notifier: Arc<dyn Notifier>, events: EventBus<AlarmEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                settings,
                notifier,
                status: ObservationBus::new(None),
                progress: ObservationBus::new(AlarmProgress::default()),
                events,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Arms the alarm unless one is already armed
    pub fn start(
        &self,
        target_ord: u32,
        vehicle_id: &str,
        bus_name: &str,
        bus_route_id: &str,
        station_id: &str,
    ) -> Result<(), ArmConflict> {
        let requested = GetOnAlarmStatus {
            target_ord,
            vehicle_id: vehicle_id.to_string(),
            bus_name: bus_name.to_string(),
            bus_route_id: bus_route_id.to_string(),
            station_id: station_id.to_string(),
        };

        let mut state = self.inner.lock();
        check_arm(state.armed.as_ref(), &requested)?;

        info!(vehicle_id, bus_name, target_ord, station_id, "Get-on alarm armed");
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

    pub fn reset(&self) -> Result<(), RefreshError> {
        let mut state = self.inner.lock();
        if state.armed.is_none() {
            return Err(RefreshError::Inactive);
        }
        info!("Get-on alarm session reset");
        self.inner.begin_session(&mut state);
        Ok(())
    }

    pub fn status(&self) -> Option<GetOnAlarmStatus> {
        self.inner.status.current()
    }

    pub fn progress(&self) -> AlarmProgress {
        self.inner.progress.current()
    }

    pub fn subscribe_status(&self) -> Subscription<Option<GetOnAlarmStatus>> {
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
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn begin_session(self: &Arc<Self>, state: &mut State) {
        state.session = None;
        state.sessions_started += 1;
        state.last_notified = None;
        state.terminated = false;
        state.progress = AlarmProgress::default();
        self.progress.publish(AlarmProgress::default());

        state.session = Some(Session::start(self, state.sessions_started, AlarmKind::GetOn, &self.settings));
    }

    fn disarm(&self, state: &mut State) {
        if state.armed.take().is_none() {
            return;
        }
        info!("Get-on alarm disarmed");
        state.session = None;
        state.progress = AlarmProgress::default();
        self.progress.publish(AlarmProgress::default());
        self.status.publish(None);
    }

    async fn run_poll(self: Arc<Self>, session_id: u64) -> PollOutcome {
        let armed = {
            let state = self.lock();
            match state.armed.clone().filter(|_| state.current(session_id)) {
                Some(armed) => armed,
                None => return PollOutcome::Halt,
            }
        };

        let fetched = async {
            let position = self.api.bus_position_by_vehicle(&armed.vehicle_id).await?;
            // Once the vehicle is at the stop its countdown is moot
            if position.ord >= armed.target_ord {
                return Ok(Observation { position, arrival: None });
            }
            let arrival = self
                .api
                .arrivals_by_route(&armed.station_id, &armed.bus_route_id, armed.target_ord)
                .await?
                .into_iter()
                .find(|a| a.vehicle_id == armed.vehicle_id);
            Ok::<_, NetworkError>(Observation { position, arrival })
        }
        .await;

        self.apply_poll(session_id, fetched)
    }

    fn apply_poll(&self, session_id: u64, fetched: Result<Observation, NetworkError>) -> PollOutcome {
        let mut guard = self.lock();
        let state = &mut *guard;
        if !state.current(session_id) {
            debug!(session_id, "Discarding poll result of a finished session");
            return PollOutcome::Halt;
        }
        let (Some(session), Some(armed)) = (state.session.as_mut(), state.armed.clone()) else {
            return PollOutcome::Halt;
        };

        let mut effects = Effects::default();
        let outcome = match fetched {
            Ok(observation) => {
                session.record_success(&mut state.progress, &mut effects);
                self.evaluate(
                    &armed,
                    observation,
                    &mut state.last_notified,
                    &mut state.terminated,
                    &mut state.progress,
                    &mut effects,
                );
                PollOutcome::Continue
            }
            Err(err) => session.record_failure(err, &mut state.progress, &mut effects),
        };

        state.progress.changed_by_timer = false;
        state.progress.updated_at = Some(Utc::now());
        self.progress.publish(state.progress.clone());

        let terminate = effects.terminate;
        if terminate {
            self.disarm(state);
        }
        drop(guard);
        // Unlocked, so a notifier may call back into the alarm
        effects.deliver(&self.events, self.notifier.as_ref());

        if terminate {
            PollOutcome::Halt
        } else {
            outcome
        }
    }

    fn evaluate(
        &self,
        armed: &GetOnAlarmStatus,
        observation: Observation,
        last_notified: &mut Option<u32>,
        terminated: &mut bool,
        progress: &mut AlarmProgress,
        effects: &mut Effects,
    ) {
        if *terminated {
            return;
        }

        let Observation { position, arrival } = observation;
        let remaining = armed.target_ord.saturating_sub(position.ord);
        progress.remaining_stations = Some(remaining);
        progress.remain_time = arrival.map(|a| a.message.remain);
        progress.vehicle = Some(position.clone());

        if position.ord >= armed.target_ord {
            *terminated = true;
            info!(vehicle_id = %armed.vehicle_id, ord = position.ord, "Awaited bus reached the boarding stop");
            effects.events.push(AlarmEvent::Terminated {
                kind: AlarmKind::GetOn,
                target_ord: armed.target_ord,
                vehicle_id: armed.vehicle_id.clone(),
            });
            effects.notify(NOTIFICATION_TITLE, format!("{} 버스가 도착했습니다.", armed.bus_name));
            effects.terminate = true;
            return;
        }

        if remaining <= self.settings.approach_threshold_stops && *last_notified != Some(remaining) {
            *last_notified = Some(remaining);
            let message = format!("{} 버스가 {}정거장 전에 있습니다.", armed.bus_name, remaining);
            progress.message = Some(message.clone());
            effects.events.push(AlarmEvent::Approaching {
                kind: AlarmKind::GetOn,
                remaining_stations: remaining,
                message: message.clone(),
            });
            effects.notify(NOTIFICATION_TITLE, message);
        }
    }

    fn on_tick(&self, session_id: u64) {
        let mut state = self.lock();
        if state.current(session_id) && state.progress.tick() {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{Endpoint, Fetch, Params};
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Serves vehicle positions from a script, arrival info from a fixed body
    struct ScriptedFetch {
        ords: Mutex<VecDeque<Result<u32, NetworkError>>>,
    }

    impl Fetch for ScriptedFetch {
        fn fetch(&self, endpoint: Endpoint, _params: Params) -> BoxFuture<'_, Result<String, NetworkError>> {
            let body = match endpoint {
                Endpoint::BusPositionByVehicle => {
                    let next = self.ords.lock().unwrap().pop_front().unwrap_or(Ok(99));
                    next.map(|ord| {
                        format!(
                            r#"{{"msgHeader":{{"headerCd":"0"}},"msgBody":{{"itemList":[
                                {{"vehId":"111033115","plainNo":"서울74사3082","stOrd":"{ord}",
                                  "gpsX":"126.95","gpsY":"37.48","dataTm":"","stopFlag":"0"}}]}}}}"#
                        )
                    })
                }
                _ => Ok(r#"{"msgHeader":{"headerCd":"0"},"msgBody":{"itemList":[
                        {"vehId1":"111033115","plainNo1":"서울74사3082","arrmsg1":"3분후[2번째 전]",
                         "vehId2":"0","plainNo2":"","arrmsg2":"운행종료"}]}}"#
                    .to_string()),
            };
            async move { body }.boxed()
        }
    }

    fn alarm(script: Vec<Result<u32, NetworkError>>) -> GetOnAlarm {
        let fetch = ScriptedFetch {
            ords: Mutex::new(script.into()),
        };
        GetOnAlarm::new(
            BusApi::new(Arc::new(fetch)),
            AlarmSettings::default(),
            Arc::new(crate::services::notifier::TracingNotifier),
            EventBus::new(32),
        )
    }

    fn arm(alarm: &GetOnAlarm) -> Result<(), ArmConflict> {
        alarm.start(12, "111033115", "273", "100100046", "112000001")
    }

    #[tokio::test(start_paused = true)]
    async fn approach_then_arrival_terminates_once() {
        let alarm = alarm(vec![Ok(9), Ok(10), Ok(12), Ok(13)]);
        let mut events = alarm.subscribe_events();
        arm(&alarm).unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        let progress = alarm.progress();
        assert_eq!(progress.remaining_stations, Some(3));
        assert_eq!(progress.remain_time, Some(crate::models::RemainTime::from_seconds(180)));

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(matches!(
            events.try_recv(),
            Some(AlarmEvent::Approaching { remaining_stations: 2, .. })
        ));

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(matches!(events.try_recv(), Some(AlarmEvent::Terminated { target_ord: 12, .. })));
        assert_eq!(alarm.status(), None);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(events.try_recv(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_decays_between_polls() {
        let alarm = alarm(vec![Ok(9)]);
        arm(&alarm).unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        let mut progress = alarm.subscribe_progress();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let decayed = progress.latest();
        assert_eq!(decayed.remain_time, Some(crate::models::RemainTime::from_seconds(179)));
        assert!(decayed.changed_by_timer);
        drop(progress);
        alarm.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_vehicle_halts_but_stays_armed() {
        let alarm = alarm(vec![Err(NetworkError::NoData)]);
        let mut events = alarm.subscribe_events();
        arm(&alarm).unwrap();

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(matches!(events.try_recv(), Some(AlarmEvent::RouteUnsupported { .. })));
        assert!(alarm.status().is_some());
        assert!(matches!(alarm.refresh(), Err(RefreshError::Halted(_))));

        alarm.stop();
        alarm.stop();
        assert_eq!(alarm.status(), None);
        assert_eq!(alarm.refresh(), Err(RefreshError::Inactive));
    }

    #[tokio::test(start_paused = true)]
    async fn conflicting_arm_leaves_armed_alarm_untouched() {
        let alarm = alarm(vec![Ok(5)]);
        arm(&alarm).unwrap();
        let armed = alarm.status();

        assert_eq!(arm(&alarm), Err(ArmConflict::SameAlarm));
        assert_eq!(
            alarm.start(12, "999999999", "273", "100100046", "112000001"),
            Err(ArmConflict::Duplicated)
        );
        assert_eq!(alarm.status(), armed);
        alarm.stop();
    }

    /// Re-arms once from inside the termination notification
    struct RearmingNotifier {
        alarm: std::sync::OnceLock<GetOnAlarm>,
        rearmed: Mutex<Vec<Result<(), ArmConflict>>>,
    }

    impl Notifier for RearmingNotifier {
        fn notify(&self, _title: &str, body: &str) {
            let mut rearmed = self.rearmed.lock().unwrap();
            if !body.ends_with("도착했습니다.") || !rearmed.is_empty() {
                return;
            }
            if let Some(alarm) = self.alarm.get() {
                rearmed.push(alarm.start(20, "111033115", "273", "100100046", "112000001"));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn notifier_may_call_back_into_the_alarm() {
        let notifier = Arc::new(RearmingNotifier {
            alarm: std::sync::OnceLock::new(),
            rearmed: Mutex::new(Vec::new()),
        });
        let fetch = ScriptedFetch {
            ords: Mutex::new(vec![Ok(12), Ok(15)].into()),
        };
        let alarm = GetOnAlarm::new(
            BusApi::new(Arc::new(fetch)),
            AlarmSettings::default(),
            notifier.clone(),
            EventBus::new(32),
        );
        let _ = notifier.alarm.set(alarm.clone());

        arm(&alarm).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(*notifier.rearmed.lock().unwrap(), vec![Ok(())]);
        assert_eq!(alarm.status().map(|s| s.target_ord), Some(20));
        assert_eq!(alarm.progress().remaining_stations, Some(5));
        alarm.stop();
    }
}
