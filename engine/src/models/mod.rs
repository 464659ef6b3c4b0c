mod remain_time;

pub use remain_time::{ArrivalMessage, ArrivalStatus, RemainTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// WGS84 position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance in meters (Haversine)
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let r = 6371000.0; // Earth radius in meters

        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let delta_lat = (other.lat - self.lat).to_radians();
        let delta_lon = (other.lon - self.lon).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);

        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        r * c
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
            && !(self.lat == 0.0 && self.lon == 0.0)
    }
}

/// A device location sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct LocationSample {
    pub coordinate: Coordinate,
    pub observed_at: DateTime<Utc>,
}

/// One stop of a route, in traversal order
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StationInfo {
    /// Ordinal position along the route
    pub ord: u32,
    pub name: String,
    pub ars_id: String,
    pub station_id: String,
    pub coordinate: Option<Coordinate>,
    /// Travel time of the section that ends at this stop
    pub estimated_seconds: Option<u32>,
}

/// Live position of one vehicle running a route
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BusPosition {
    pub vehicle_id: String,
    pub plate_no: String,
    /// Ord of the stop the vehicle is at or last passed
    pub ord: u32,
    pub coordinate: Option<Coordinate>,
    pub observed_at: Option<DateTime<Utc>>,
    pub stopped: bool,
}

/// The vehicle the rider is matched to
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct BoardedBus {
    pub vehicle_id: String,
    pub location: Coordinate,
    /// Stops left until the target; zero once reached or passed
    pub remain_station: u32,
}

/// Arrival prediction of one vehicle at one stop
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ArrivalInfo {
    pub vehicle_id: String,
    pub plate_no: String,
    pub message: ArrivalMessage,
}

/// Armed boarding alarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GetOnAlarmStatus {
    pub target_ord: u32,
    pub vehicle_id: String,
    pub bus_name: String,
    pub bus_route_id: String,
    pub station_id: String,
}

impl GetOnAlarmStatus {
    /// Same vehicle waited for at the same stop
    pub fn same_alarm(&self, other: &Self) -> bool {
        self.vehicle_id == other.vehicle_id && self.target_ord == other.target_ord
    }
}

/// Armed alighting alarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct GetOffAlarmStatus {
    pub target_ord: u32,
    pub bus_route_id: String,
    pub ars_id: String,
}

impl GetOffAlarmStatus {
    pub fn same_alarm(&self, other: &Self) -> bool {
        self.bus_route_id == other.bus_route_id
            && self.target_ord == other.target_ord
            && self.ars_id == other.ars_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_between_nearby_points() {
        // Two points ~111 m apart along a meridian
        let a = Coordinate::new(37.5665, 126.9780);
        let b = Coordinate::new(37.5675, 126.9780);
        let d = a.distance_to(&b);
        assert!((d - 111.2).abs() < 1.0, "distance was {d}");
    }

    #[test]
    fn null_island_is_invalid() {
        assert!(!Coordinate::new(0.0, 0.0).is_valid());
        assert!(!Coordinate::new(f64::NAN, 126.9).is_valid());
        assert!(Coordinate::new(37.5, 126.9).is_valid());
    }

    #[test]
    fn get_off_key_covers_route_ord_and_stop() {
        let armed = GetOffAlarmStatus {
            target_ord: 12,
            bus_route_id: "100100223".into(),
            ars_id: "14062".into(),
        };
        let mut other = armed.clone();
        assert!(armed.same_alarm(&other));

        other.target_ord = 20;
        assert!(!armed.same_alarm(&other));
    }
}
