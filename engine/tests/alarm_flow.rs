use bbus_engine::alarm::RefreshError;
use bbus_engine::error::NetworkError;
use bbus_engine::providers::{BusApi, Endpoint, Fetch, Params};
use bbus_engine::services::notifier::BroadcastNotifier;
use bbus_engine::{AlarmEngine, AlarmEvent, AlarmSettings, ArmConflict, HaltReason};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const ROUTE: &str = "100100223";
const BUS_LAT: f64 = 37.5665;
const BUS_LON: f64 = 126.978;

/// Serves a fixed route and plays back one bus ord per position request
struct RouteFeed {
    ords: Mutex<VecDeque<u32>>,
    header_code: &'static str,
    /// Position requests that time out before the feed starts answering
    dropped_requests: AtomicU32,
    position_requests: AtomicU32,
}

impl RouteFeed {
    fn new(ords: Vec<u32>) -> Self {
        Self {
            ords: Mutex::new(ords.into()),
            header_code: "0",
            dropped_requests: AtomicU32::new(0),
            position_requests: AtomicU32::new(0),
        }
    }

    fn failing_with(header_code: &'static str) -> Self {
        Self {
            header_code,
            ..Self::new(Vec::new())
        }
    }

    fn flaky(ords: Vec<u32>, dropped_requests: u32) -> Self {
        Self {
            dropped_requests: AtomicU32::new(dropped_requests),
            ..Self::new(ords)
        }
    }

    fn stations() -> String {
        let items: Vec<String> = (1..=15)
            .map(|ord| {
                let name = if ord == 12 { "광화문".to_string() } else { format!("정류장{ord}") };
                format!(
                    r#"{{"seq":"{ord}","stationNm":"{name}","arsId":"{}","station":"1120000{ord:02}",
                        "gpsX":"126.97","gpsY":"37.56","fullSectDist":"300","sectSpd":"18"}}"#,
                    14050 + ord
                )
            })
            .collect();
        format!(
            r#"{{"msgHeader":{{"headerCd":"0"}},"msgBody":{{"itemList":[{}]}}}}"#,
            items.join(",")
        )
    }

    fn positions(&self) -> String {
        let ord = {
            let mut ords = self.ords.lock().unwrap();
            // Hold the last position once the script runs out
            if ords.len() > 1 {
                ords.pop_front()
            } else {
                ords.front().copied()
            }
        };
        let items = ord
            .map(|ord| {
                format!(
                    r#"{{"vehId":"111033115","plainNo":"서울74사3082","sectOrd":"{ord}",
                        "gpsX":"{BUS_LON}","gpsY":"{BUS_LAT}","dataTm":"","stopFlag":"0"}}"#
                )
            })
            .unwrap_or_default();
        format!(r#"{{"msgHeader":{{"headerCd":"0"}},"msgBody":{{"itemList":[{items}]}}}}"#)
    }
}

impl Fetch for RouteFeed {
    fn fetch(&self, endpoint: Endpoint, _params: Params) -> BoxFuture<'_, Result<String, NetworkError>> {
        if endpoint == Endpoint::BusPositionsByRoute {
            self.position_requests.fetch_add(1, Ordering::SeqCst);
            let dropped = self
                .dropped_requests
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if dropped {
                return async { Err(NetworkError::NoResponse) }.boxed();
            }
        }

        let body = if self.header_code != "0" {
            format!(r#"{{"msgHeader":{{"headerCd":"{}","headerMsg":"refused"}}}}"#, self.header_code)
        } else {
            match endpoint {
                Endpoint::StationsByRoute => Self::stations(),
                Endpoint::BusPositionsByRoute => self.positions(),
                _ => r#"{"msgHeader":{"headerCd":"4"}}"#.to_string(),
            }
        };
        async move { Ok(body) }.boxed()
    }
}

fn engine(feed: RouteFeed) -> (AlarmEngine, BroadcastNotifier) {
    shared_engine(Arc::new(feed))
}

fn shared_engine(feed: Arc<RouteFeed>) -> (AlarmEngine, BroadcastNotifier) {
    let notifier = BroadcastNotifier::new(32);
    let engine = AlarmEngine::new(
        BusApi::new(feed),
        AlarmSettings::default(),
        Arc::new(notifier.clone()),
    );
    (engine, notifier)
}

#[tokio::test(start_paused = true)]
async fn rearming_is_refused_until_stopped() {
    let (engine, _) = engine(RouteFeed::new(vec![3]));
    let alarm = engine.get_off();

    assert_eq!(alarm.start(ROUTE, 12, "14062"), Ok(()));
    assert_eq!(alarm.start(ROUTE, 12, "14062"), Err(ArmConflict::SameAlarm));
    assert_eq!(alarm.start(ROUTE, 20, "14062"), Err(ArmConflict::Duplicated));
    assert_eq!(alarm.status().map(|s| s.target_ord), Some(12));

    alarm.stop();
    assert_eq!(alarm.start(ROUTE, 20, "14062"), Ok(()));
    alarm.stop();
}

#[tokio::test(start_paused = true)]
async fn boarded_bus_reaching_target_terminates_once() {
    let (engine, notifier) = engine(RouteFeed::new(vec![9, 10, 11, 12]));
    let mut events = engine.subscribe_events();
    let mut notifications = notifier.subscribe();

    engine.update_location(BUS_LAT, BUS_LON).unwrap();
    engine.get_off().start(ROUTE, 12, "14062").unwrap();

    tokio::time::sleep(Duration::from_millis(1)).await;
    let progress = engine.get_off().progress();
    assert_eq!(progress.remaining_stations, Some(3));
    assert_eq!(progress.boarded_bus.map(|b| b.vehicle_id).as_deref(), Some("111033115"));

    // Three more polls: ord 10, 11, then 12
    tokio::time::sleep(Duration::from_secs(46)).await;
    assert_eq!(engine.get_off().status(), None);

    tokio::time::sleep(Duration::from_secs(60)).await;

    let mut seen = Vec::new();
    while let Some(event) = events.try_recv() {
        seen.push(event);
    }
    let approaching: Vec<u32> = seen
        .iter()
        .filter_map(|e| match e {
            AlarmEvent::Approaching { remaining_stations, .. } => Some(*remaining_stations),
            _ => None,
        })
        .collect();
    assert_eq!(approaching, vec![2, 1]);
    let terminated = seen
        .iter()
        .filter(|e| matches!(e, AlarmEvent::Terminated { target_ord: 12, .. }))
        .count();
    assert_eq!(terminated, 1);

    let mut bodies = Vec::new();
    while let Some(notification) = notifications.try_recv() {
        bodies.push(notification.body);
    }
    assert_eq!(
        bodies,
        vec![
            "광화문까지 2정거장 남았습니다.".to_string(),
            "광화문까지 1정거장 남았습니다.".to_string(),
            "하차 정거장에 도착하여 알람이 종료되었습니다.".to_string(),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_quota_halts_polling_but_keeps_the_alarm() {
    let (engine, _) = engine(RouteFeed::failing_with("22"));
    let mut events = engine.subscribe_events();
    let alarm = engine.get_off();

    alarm.start(ROUTE, 12, "14062").unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert!(matches!(events.try_recv(), Some(AlarmEvent::QuotaExhausted { .. })));
    assert!(alarm.status().is_some());
    assert_eq!(alarm.progress().halted, Some(HaltReason::QuotaExhausted));
    assert_eq!(alarm.refresh(), Err(RefreshError::Halted(HaltReason::QuotaExhausted)));

    // No further polls once halted
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(events.try_recv(), None);

    // A reset starts over and meets the same refusal
    alarm.reset().unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(matches!(events.try_recv(), Some(AlarmEvent::QuotaExhausted { .. })));

    alarm.stop();
    assert_eq!(alarm.refresh(), Err(RefreshError::Inactive));
}

#[tokio::test(start_paused = true)]
async fn rejected_access_key_is_reported() {
    let (engine, _) = engine(RouteFeed::failing_with("30"));
    let mut events = engine.subscribe_events();

    engine.get_off().start(ROUTE, 12, "14062").unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert!(matches!(events.try_recv(), Some(AlarmEvent::AccessKeyRejected { .. })));
    assert_eq!(engine.get_off().progress().halted, Some(HaltReason::AccessKeyRejected));
}

fn drain(events: &mut bbus_engine::services::bus::EventSubscription<AlarmEvent>) -> Vec<AlarmEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn bus_skipping_the_target_stop_still_terminates_once() {
    let (engine, _) = engine(RouteFeed::new(vec![10, 13]));
    let mut events = engine.subscribe_events();

    engine.update_location(BUS_LAT, BUS_LON).unwrap();
    engine.get_off().start(ROUTE, 12, "14062").unwrap();

    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(engine.get_off().status(), None);

    tokio::time::sleep(Duration::from_secs(60)).await;
    let seen = drain(&mut events);
    assert!(matches!(seen[0], AlarmEvent::Approaching { remaining_stations: 2, .. }));
    assert!(matches!(seen[1], AlarmEvent::Terminated { target_ord: 12, .. }));
    assert_eq!(seen.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn location_update_alone_can_terminate() {
    let (engine, notifier) = engine(RouteFeed::new(vec![12]));
    let mut events = engine.subscribe_events();
    let mut notifications = notifier.subscribe();

    // No location yet, so the first poll cannot match the bus
    engine.get_off().start(ROUTE, 12, "14062").unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(engine.get_off().status().is_some());
    assert!(engine.get_off().progress().boarded_bus.is_none());

    // Matched on the debounced sample, well before the next poll
    engine.update_location(BUS_LAT, BUS_LON).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(engine.get_off().status(), None);
    let seen = drain(&mut events);
    assert_eq!(seen.len(), 1);
    assert!(matches!(seen[0], AlarmEvent::Terminated { target_ord: 12, .. }));
    assert_eq!(
        notifications.try_recv().map(|n| n.body).as_deref(),
        Some("하차 정거장에 도착하여 알람이 종료되었습니다.")
    );
}

#[tokio::test(start_paused = true)]
async fn network_errors_degrade_then_recover() {
    let feed = Arc::new(RouteFeed::flaky(vec![3], 2));
    let (engine, _) = shared_engine(feed.clone());
    let mut events = engine.subscribe_events();
    let alarm = engine.get_off();

    engine.update_location(BUS_LAT, BUS_LON).unwrap();
    alarm.start(ROUTE, 12, "14062").unwrap();

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(alarm.progress().network_degraded);
    assert!(matches!(
        events.try_recv(),
        Some(AlarmEvent::NetworkDegraded { .. })
    ));

    // Second failure of the same streak stays quiet
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(alarm.progress().network_degraded);
    assert_eq!(events.try_recv(), None);

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(!alarm.progress().network_degraded);
    assert!(matches!(events.try_recv(), Some(AlarmEvent::NetworkRestored { .. })));
    assert_eq!(alarm.progress().remaining_stations, Some(9));
    assert_eq!(feed.position_requests.load(Ordering::SeqCst), 3);
    assert!(alarm.status().is_some());
    assert_eq!(alarm.progress().halted, None);

    alarm.stop();
}
