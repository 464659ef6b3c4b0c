//! Works out which vehicle the rider is aboard from GPS proximity
//!
//! Best effort: stale or missing data means "no boarded bus", never an error.

use crate::config::AlarmSettings;
use crate::models::{BusPosition, Coordinate, LocationSample};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct BoardMatcher {
    tolerance_meters: f64,
    tie_margin_meters: f64,
    max_age: Duration,
    last_matched: Option<String>,
}

/// A candidate the rider is probably aboard
#[derive(Debug, Clone, PartialEq)]
pub struct BoardMatch {
    pub position: BusPosition,
    /// Where the vehicle was reported
    pub location: Coordinate,
    pub distance_meters: f64,
}

impl BoardMatcher {
    pub fn new(tolerance_meters: f64, tie_margin_meters: f64, max_age: Duration) -> Self {
        Self {
            tolerance_meters,
            tie_margin_meters,
            max_age,
            last_matched: None,
        }
    }

    pub fn from_settings(settings: &AlarmSettings) -> Self {
        Self::new(
            settings.board_match_tolerance_meters,
            settings.board_match_tie_margin_meters,
            Duration::seconds(settings.position_max_age_secs),
        )
    }

    /// Nearest candidate within tolerance. The previous match wins ties
    /// within the margin, so two buses travelling together do not flap.
    pub fn find_boarded(
        &mut self,
        sample: Option<&LocationSample>,
        candidates: &[BusPosition],
        now: DateTime<Utc>,
    ) -> Option<BoardMatch> {
        let Some(sample) = sample.filter(|s| self.is_fresh(s.observed_at, now) && s.coordinate.is_valid()) else {
            debug!("No fresh location sample, skipping board matching");
            self.last_matched = None;
            return None;
        };

        let in_range: Vec<BoardMatch> = candidates
            .iter()
            .filter(|c| c.observed_at.map_or(true, |t| self.is_fresh(t, now)))
            .filter_map(|c| {
                let location = c.coordinate?;
                let distance_meters = sample.coordinate.distance_to(&location);
                (distance_meters <= self.tolerance_meters).then(|| BoardMatch {
                    position: c.clone(),
                    location,
                    distance_meters,
                })
            })
            .collect();

        let nearest = in_range
            .iter()
            .min_by(|a, b| {
                a.distance_meters
                    .partial_cmp(&b.distance_meters)
                    // Use unwrap_or to handle NaN - treat NaN as greater
                    .unwrap_or(std::cmp::Ordering::Greater)
            })?
            .clone();

        let sticky = self.last_matched.as_deref().and_then(|last| {
            in_range.iter().find(|m| {
                m.position.vehicle_id == last
                    && m.distance_meters - nearest.distance_meters <= self.tie_margin_meters
            })
        });

        let chosen = sticky.cloned().unwrap_or(nearest);
        if self.last_matched.as_deref() != Some(chosen.position.vehicle_id.as_str()) {
            debug!(
                vehicle_id = %chosen.position.vehicle_id,
                distance = chosen.distance_meters,
                "Board match changed"
            );
        }
        self.last_matched = Some(chosen.position.vehicle_id.clone());
        Some(chosen)
    }

    fn is_fresh(&self, observed_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - observed_at <= self.max_age
    }
}
