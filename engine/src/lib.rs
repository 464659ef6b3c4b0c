//! Get-on and get-off bus alarms driven by Seoul live bus data
//!
//! [`AlarmEngine`] owns both alarm coordinators and the device location feed.
//! The [`api`] module exposes it over HTTP; the binary wires both together.

pub mod alarm;
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod providers;
pub mod services;
pub mod store;

pub use alarm::{AlarmEvent, AlarmKind, AlarmProgress, ArmConflict, GetOffAlarm, GetOnAlarm, HaltReason, RefreshError};
pub use config::{AlarmSettings, Config};
pub use engine::{AlarmEngine, LocationError};
