use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::RefreshResponse;
use crate::alarm::AlarmProgress;
use crate::api::error::{arm_conflict, refresh_error, ApiError};
use crate::api::{AppState, ErrorResponse};
use crate::models::GetOffAlarmStatus;

#[derive(Debug, Serialize, ToSchema)]
pub struct GetOffAlarmView {
    pub status: Option<GetOffAlarmStatus>,
    pub progress: AlarmProgress,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StartGetOffRequest {
    pub bus_route_id: String,
    /// Ord of the stop to alight at
    pub target_ord: u32,
    /// ARS number of that stop
    pub ars_id: String,
}

fn view(state: &AppState) -> GetOffAlarmView {
    let alarm = state.engine.get_off();
    GetOffAlarmView {
        status: alarm.status(),
        progress: alarm.progress(),
    }
}

/// Current alighting alarm and its progress
#[utoipa::path(
    get,
    path = "/api/alarms/get-off",
    responses(
        (status = 200, description = "Alighting alarm state", body = GetOffAlarmView)
    ),
    tag = "alarms"
)]
pub async fn get_off_alarm(State(state): State<AppState>) -> Json<GetOffAlarmView> {
    Json(view(&state))
}

/// Arm the alighting alarm
#[utoipa::path(
    post,
    path = "/api/alarms/get-off",
    request_body = StartGetOffRequest,
    responses(
        (status = 201, description = "Alarm armed", body = GetOffAlarmView),
        (status = 409, description = "An alarm is already armed", body = ErrorResponse)
    ),
    tag = "alarms"
)]
pub async fn start_get_off_alarm(
    State(state): State<AppState>,
    Json(request): Json<StartGetOffRequest>,
) -> Result<(StatusCode, Json<GetOffAlarmView>), ApiError> {
    state
        .engine
        .get_off()
        .start(&request.bus_route_id, request.target_ord, &request.ars_id)
        .map_err(arm_conflict)?;

    Ok((StatusCode::CREATED, Json(view(&state))))
}

#[utoipa::path(
    delete,
    path = "/api/alarms/get-off",
    responses(
        (status = 204, description = "Alarm disarmed")
    ),
    tag = "alarms"
)]
pub async fn stop_get_off_alarm(State(state): State<AppState>) -> StatusCode {
    state.engine.get_off().stop();
    StatusCode::NO_CONTENT
}

#[utoipa::path(
    post,
    path = "/api/alarms/get-off/refresh",
    responses(
        (status = 202, description = "Refresh scheduled or merged into one in flight", body = RefreshResponse),
        (status = 404, description = "No alarm armed", body = ErrorResponse),
        (status = 409, description = "Polling halted", body = ErrorResponse),
        (status = 429, description = "Refreshed too recently", body = ErrorResponse)
    ),
    tag = "alarms"
)]
pub async fn refresh_get_off_alarm(State(state): State<AppState>) -> Result<(StatusCode, Json<RefreshResponse>), ApiError> {
    let outcome = state.engine.get_off().refresh().map_err(refresh_error)?;
    Ok((StatusCode::ACCEPTED, Json(RefreshResponse { outcome })))
}

#[utoipa::path(
    post,
    path = "/api/alarms/get-off/reset",
    responses(
        (status = 204, description = "Session restarted"),
        (status = 404, description = "No alarm armed", body = ErrorResponse)
    ),
    tag = "alarms"
)]
pub async fn reset_get_off_alarm(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.engine.get_off().reset().map_err(refresh_error)?;
    Ok(StatusCode::NO_CONTENT)
}
