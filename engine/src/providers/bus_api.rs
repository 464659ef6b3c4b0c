//! Typed client for the Seoul bus information API
//!
//! Sits on top of any [`Fetch`] implementation: builds the query parameters
//! for each operation, unwraps the `msgHeader`/`msgBody` envelope and maps the
//! API's header codes onto [`NetworkError`].

use super::{Endpoint, Fetch};
use crate::error::NetworkError;
use crate::models::{ArrivalInfo, ArrivalMessage, BusPosition, Coordinate, StationInfo};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    msg_header: MsgHeader,
    msg_body: Option<MsgBody<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MsgHeader {
    header_cd: String,
    #[serde(default)]
    header_msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MsgBody<T> {
    item_list: Option<Vec<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StationItem {
    #[serde(default)]
    seq: String,
    #[serde(default)]
    station_nm: String,
    #[serde(default)]
    ars_id: String,
    #[serde(default)]
    station: String,
    #[serde(default)]
    gps_x: String,
    #[serde(default)]
    gps_y: String,
    #[serde(default)]
    full_sect_dist: String,
    #[serde(default)]
    sect_spd: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BusPositionItem {
    #[serde(default)]
    veh_id: String,
    #[serde(default)]
    plain_no: String,
    /// Present on route-wide queries
    #[serde(default)]
    sect_ord: Option<String>,
    /// Present on single-vehicle queries
    #[serde(default)]
    st_ord: Option<String>,
    #[serde(default)]
    gps_x: String,
    #[serde(default)]
    gps_y: String,
    #[serde(default)]
    data_tm: String,
    #[serde(default)]
    stop_flag: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrivalItem {
    #[serde(default)]
    veh_id1: String,
    #[serde(default)]
    plain_no1: String,
    #[serde(default)]
    arrmsg1: String,
    #[serde(default)]
    veh_id2: String,
    #[serde(default)]
    plain_no2: String,
    #[serde(default)]
    arrmsg2: String,
}

#[derive(Clone)]
pub struct BusApi {
    fetcher: Arc<dyn Fetch>,
}

impl BusApi {
    pub fn new(fetcher: Arc<dyn Fetch>) -> Self {
        Self { fetcher }
    }

    /// Ordered stop sequence of a route. An empty route is `NoData`.
    pub async fn stations_by_route(&self, bus_route_id: &str) -> Result<Vec<StationInfo>, NetworkError> {
        let items: Vec<StationItem> = self
            .call(
                Endpoint::StationsByRoute,
                vec![("busRouteId", bus_route_id.to_string())],
            )
            .await?;

        let mut stations: Vec<StationInfo> = items
            .into_iter()
            .filter_map(|item| {
                let Ok(ord) = item.seq.trim().parse::<u32>() else {
                    warn!(bus_route_id, seq = %item.seq, "Skipping station with invalid seq");
                    return None;
                };
                Some(StationInfo {
                    ord,
                    estimated_seconds: section_seconds(&item.full_sect_dist, &item.sect_spd),
                    coordinate: parse_coordinate(&item.gps_y, &item.gps_x),
                    name: item.station_nm,
                    ars_id: item.ars_id,
                    station_id: item.station,
                })
            })
            .collect();

        if stations.is_empty() {
            return Err(NetworkError::NoData);
        }
        stations.sort_by_key(|s| s.ord);

        debug!(bus_route_id, count = stations.len(), "Fetched route stations");
        Ok(stations)
    }

    /// Every vehicle currently running a route. No vehicles is not an error.
    pub async fn bus_positions_by_route(&self, bus_route_id: &str) -> Result<Vec<BusPosition>, NetworkError> {
        let result: Result<Vec<BusPositionItem>, NetworkError> = self
            .call(
                Endpoint::BusPositionsByRoute,
                vec![("busRouteId", bus_route_id.to_string())],
            )
            .await;

        let items = match result {
            Ok(items) => items,
            Err(NetworkError::NoData) => Vec::new(),
            Err(e) => return Err(e),
        };

        let positions: Vec<BusPosition> = items.into_iter().filter_map(BusPosition::from_item).collect();
        debug!(bus_route_id, count = positions.len(), "Fetched route bus positions");
        Ok(positions)
    }

    /// Position of one vehicle. A vehicle the API no longer knows is `NoData`.
    pub async fn bus_position_by_vehicle(&self, vehicle_id: &str) -> Result<BusPosition, NetworkError> {
        let items: Vec<BusPositionItem> = self
            .call(
                Endpoint::BusPositionByVehicle,
                vec![("vehId", vehicle_id.to_string())],
            )
            .await?;

        items
            .into_iter()
            .filter_map(BusPosition::from_item)
            .find(|p| p.vehicle_id == vehicle_id)
            .ok_or(NetworkError::NoData)
    }

    /// The next two arrivals of a route at one stop
    pub async fn arrivals_by_route(
        &self,
        station_id: &str,
        bus_route_id: &str,
        ord: u32,
    ) -> Result<Vec<ArrivalInfo>, NetworkError> {
        let items: Vec<ArrivalItem> = self
            .call(
                Endpoint::ArrivalByRoute,
                vec![
                    ("stId", station_id.to_string()),
                    ("busRouteId", bus_route_id.to_string()),
                    ("ord", ord.to_string()),
                ],
            )
            .await?;

        let mut arrivals = Vec::new();
        for item in items {
            for (vehicle_id, plate_no, message) in [
                (item.veh_id1, item.plain_no1, item.arrmsg1),
                (item.veh_id2, item.plain_no2, item.arrmsg2),
            ] {
                if vehicle_id.is_empty() || vehicle_id == "0" {
                    continue;
                }
                match ArrivalMessage::parse(&message) {
                    Some(message) => arrivals.push(ArrivalInfo {
                        vehicle_id,
                        plate_no,
                        message,
                    }),
                    None => debug!(vehicle_id = %vehicle_id, arrmsg = %message, "Unrecognised arrival message"),
                }
            }
        }
        Ok(arrivals)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        params: super::Params,
    ) -> Result<Vec<T>, NetworkError> {
        let body = self.fetcher.fetch(endpoint, params).await?;
        parse_envelope(&body)
    }
}

fn parse_envelope<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, NetworkError> {
    let envelope: Envelope<T> = serde_json::from_str(body)
        .map_err(|e| NetworkError::Response(format!("Malformed API response: {}", e)))?;

    match envelope.msg_header.header_cd.trim() {
        "0" => {}
        "4" => return Err(NetworkError::NoData),
        "2" | "7" | "20" | "30" | "31" => return Err(NetworkError::AccessKey),
        "8" | "22" => return Err(NetworkError::TrafficExceed),
        code => {
            return Err(NetworkError::Response(format!(
                "{} ({})",
                envelope.msg_header.header_msg, code
            )))
        }
    }

    Ok(envelope
        .msg_body
        .and_then(|body| body.item_list)
        .unwrap_or_default())
}

impl BusPosition {
    fn from_item(item: BusPositionItem) -> Option<Self> {
        let ord = item
            .st_ord
            .as_deref()
            .or(item.sect_ord.as_deref())
            .and_then(|o| o.trim().parse::<u32>().ok());
        let Some(ord) = ord else {
            warn!(vehicle_id = %item.veh_id, "Skipping bus position without ord");
            return None;
        };

        Some(Self {
            coordinate: parse_coordinate(&item.gps_y, &item.gps_x),
            observed_at: parse_data_time(&item.data_tm),
            stopped: item.stop_flag.trim() == "1",
            vehicle_id: item.veh_id,
            plate_no: item.plain_no,
            ord,
        })
    }
}

/// The API reports `gpsX` as longitude and `gpsY` as latitude
fn parse_coordinate(gps_y: &str, gps_x: &str) -> Option<Coordinate> {
    let coordinate = Coordinate::new(gps_y.trim().parse().ok()?, gps_x.trim().parse().ok()?);
    coordinate.is_valid().then_some(coordinate)
}

/// `dataTm` is local Seoul time formatted as `yyyyMMddHHmmss`
fn parse_data_time(raw: &str) -> Option<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), "%Y%m%d%H%M%S").ok()?;
    let kst = chrono::FixedOffset::east_opt(9 * 3600)?;
    kst.from_local_datetime(&naive)
        .single()
        .map(|t| t.with_timezone(&Utc))
}

/// Section distance in meters over section speed in km/h
fn section_seconds(distance_m: &str, speed_kmh: &str) -> Option<u32> {
    let distance: f64 = distance_m.trim().parse().ok()?;
    let speed: f64 = speed_kmh.trim().parse().ok()?;
    if distance <= 0.0 || speed <= 0.0 {
        return None;
    }
    Some((distance / (speed / 3.6)).round() as u32)
}
