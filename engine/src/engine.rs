use crate::alarm::{AlarmEvent, GetOffAlarm, GetOnAlarm};
use crate::config::AlarmSettings;
use crate::models::{Coordinate, LocationSample};
use crate::providers::BusApi;
use crate::services::bus::{EventBus, EventSubscription};
use crate::services::notifier::Notifier;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

const EVENT_CAPACITY: usize = 64;

/// The alarm service: both coordinators plus the device location feed
///
/// Build one per process and hand clones to every consumer.
#[derive(Clone)]
pub struct AlarmEngine {
    get_on: GetOnAlarm,
    get_off: GetOffAlarm,
    location: Arc<watch::Sender<Option<LocationSample>>>,
    events: EventBus<AlarmEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum LocationError {
    #[error("Invalid coordinate ({lat}, {lon})")]
    InvalidCoordinate { lat: f64, lon: f64 },
}

impl AlarmEngine {
    pub fn new(api: BusApi, settings: AlarmSettings, notifier: Arc<dyn Notifier>) -> Self {
        let (location, location_rx) = watch::channel(None);
        let events = EventBus::new(EVENT_CAPACITY);

        let get_on = GetOnAlarm::new(api.clone(), settings.clone(), notifier.clone(), events.clone());
        let get_off = GetOffAlarm::new(api, settings, notifier, location_rx, events.clone());

        Self {
            get_on,
            get_off,
            location: Arc::new(location),
            events,
        }
    }

    pub fn get_on(&self) -> &GetOnAlarm {
        &self.get_on
    }

    pub fn get_off(&self) -> &GetOffAlarm {
        &self.get_off
    }

    /// Records a device location sample; only the latest one is kept
    pub fn update_location(&self, lat: f64, lon: f64) -> Result<(), LocationError> {
        let coordinate = Coordinate::new(lat, lon);
        if !coordinate.is_valid() {
            return Err(LocationError::InvalidCoordinate { lat, lon });
        }
        debug!(lat, lon, "Location updated");
        self.location.send_replace(Some(LocationSample {
            coordinate,
            observed_at: Utc::now(),
        }));
        Ok(())
    }

    pub fn location(&self) -> Option<LocationSample> {
        *self.location.borrow()
    }

    /// Events of both coordinators
    pub fn subscribe_events(&self) -> EventSubscription<AlarmEvent> {
        self.events.subscribe()
    }
}
