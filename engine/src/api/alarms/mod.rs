mod get_off;
mod get_on;

pub use get_off::*;
pub use get_on::*;

use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::api::AppState;
use crate::services::scheduler::RefreshOutcome;

#[derive(Debug, Serialize, ToSchema)]
pub struct RefreshResponse {
    pub outcome: RefreshOutcome,
}

pub fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(get_on_alarm, start_get_on_alarm, stop_get_on_alarm))
        .routes(routes!(refresh_get_on_alarm))
        .routes(routes!(reset_get_on_alarm))
        .routes(routes!(get_off_alarm, start_get_off_alarm, stop_get_off_alarm))
        .routes(routes!(refresh_get_off_alarm))
        .routes(routes!(reset_get_off_alarm))
}
