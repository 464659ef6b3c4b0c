//! Get-on and get-off alarm coordinators
//!
//! Each coordinator owns at most one armed alarm. Arming never overwrites an
//! armed alarm: the caller gets an [`ArmConflict`] and must `stop()` first.
//! While armed, a polling session keeps the progress snapshot current and
//! fires the termination event exactly once.

mod get_off;
mod get_on;
mod session;

pub use get_off::GetOffAlarm;
pub use get_on::GetOnAlarm;
pub use session::AlarmProgress;

use crate::models::{GetOffAlarmStatus, GetOnAlarmStatus};
use crate::services::scheduler::RefreshOutcome;
use serde::Serialize;
use utoipa::ToSchema;

/// Why an arm request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum ArmConflict {
    /// The exact same alarm is already armed
    #[error("This alarm is already set")]
    SameAlarm,
    /// A different alarm of the same kind is armed
    #[error("Another alarm is already set")]
    Duplicated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlarmKind {
    GetOn,
    GetOff,
}

/// Why a session stopped polling while its alarm stays armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    #[error("daily request quota exhausted")]
    QuotaExhausted,
    #[error("API access key rejected")]
    AccessKeyRejected,
    #[error("route has no live data")]
    RouteUnsupported,
}

/// One-off occurrences published to observers
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AlarmEvent {
    Approaching {
        kind: AlarmKind,
        remaining_stations: u32,
        message: String,
    },
    Terminated {
        kind: AlarmKind,
        target_ord: u32,
        vehicle_id: String,
    },
    NetworkDegraded {
        kind: AlarmKind,
        error: String,
    },
    NetworkRestored {
        kind: AlarmKind,
    },
    QuotaExhausted {
        kind: AlarmKind,
    },
    AccessKeyRejected {
        kind: AlarmKind,
    },
    RouteUnsupported {
        kind: AlarmKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error("No alarm is armed")]
    Inactive,
    #[error("Polling halted: {0}")]
    Halted(HaltReason),
    #[error("Refresh requested too soon")]
    Throttled,
}

pub type RefreshResult = Result<RefreshOutcome, RefreshError>;

/// Identity of an armed alarm, used to tell re-arms from conflicts
pub trait AlarmKey {
    fn same_alarm(&self, other: &Self) -> bool;
}

impl AlarmKey for GetOnAlarmStatus {
    fn same_alarm(&self, other: &Self) -> bool {
        GetOnAlarmStatus::same_alarm(self, other)
    }
}

impl AlarmKey for GetOffAlarmStatus {
    fn same_alarm(&self, other: &Self) -> bool {
        GetOffAlarmStatus::same_alarm(self, other)
    }
}

/// Decides whether `requested` may be armed given what is armed now
pub fn check_arm<S: AlarmKey>(armed: Option<&S>, requested: &S) -> Result<(), ArmConflict> {
    match armed {
        None => Ok(()),
        Some(current) if current.same_alarm(requested) => Err(ArmConflict::SameAlarm),
        Some(_) => Err(ArmConflict::Duplicated),
    }
}
