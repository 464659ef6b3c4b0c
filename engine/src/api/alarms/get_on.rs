use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::info;
use utoipa::ToSchema;

use super::RefreshResponse;
use crate::alarm::AlarmProgress;
use crate::api::error::{arm_conflict, refresh_error, ApiError};
use crate::api::{AppState, ErrorResponse};
use crate::models::GetOnAlarmStatus;

#[derive(Debug, Serialize, ToSchema)]
pub struct GetOnAlarmView {
    /// `null` while nothing is armed
    pub status: Option<GetOnAlarmStatus>,
    pub progress: AlarmProgress,
}

fn view(state: &AppState) -> GetOnAlarmView {
    let alarm = state.engine.get_on();
    GetOnAlarmView {
        status: alarm.status(),
        progress: alarm.progress(),
    }
}

/// Current boarding alarm and its progress
#[utoipa::path(
    get,
    path = "/api/alarms/get-on",
    responses(
        (status = 200, description = "Boarding alarm state", body = GetOnAlarmView)
    ),
    tag = "alarms"
)]
pub async fn get_on_alarm(State(state): State<AppState>) -> Json<GetOnAlarmView> {
    Json(view(&state))
}

/// Arm the boarding alarm
#[utoipa::path(
    post,
    path = "/api/alarms/get-on",
    request_body = GetOnAlarmStatus,
    responses(
        (status = 201, description = "Alarm armed", body = GetOnAlarmView),
        (status = 409, description = "An alarm is already armed", body = ErrorResponse)
    ),
    tag = "alarms"
)]
pub async fn start_get_on_alarm(
    State(state): State<AppState>,
    Json(request): Json<GetOnAlarmStatus>,
) -> Result<(StatusCode, Json<GetOnAlarmView>), ApiError> {
    state
        .engine
        .get_on()
        .start(
            request.target_ord,
            &request.vehicle_id,
            &request.bus_name,
            &request.bus_route_id,
            &request.station_id,
        )
        .map_err(arm_conflict)?;

    Ok((StatusCode::CREATED, Json(view(&state))))
}

/// Disarm the boarding alarm; succeeds when nothing is armed
#[utoipa::path(
    delete,
    path = "/api/alarms/get-on",
    responses(
        (status = 204, description = "Alarm disarmed")
    ),
    tag = "alarms"
)]
pub async fn stop_get_on_alarm(State(state): State<AppState>) -> StatusCode {
    state.engine.get_on().stop();
    StatusCode::NO_CONTENT
}

/// Ask for an immediate poll of the boarding alarm
#[utoipa::path(
    post,
    path = "/api/alarms/get-on/refresh",
    responses(
        (status = 202, description = "Refresh scheduled or merged into one in flight", body = RefreshResponse),
        (status = 404, description = "No alarm armed", body = ErrorResponse),
        (status = 409, description = "Polling halted", body = ErrorResponse),
        (status = 429, description = "Refreshed too recently", body = ErrorResponse)
    ),
    tag = "alarms"
)]
pub async fn refresh_get_on_alarm(State(state): State<AppState>) -> Result<(StatusCode, Json<RefreshResponse>), ApiError> {
    let outcome = state.engine.get_on().refresh().map_err(refresh_error)?;
    Ok((StatusCode::ACCEPTED, Json(RefreshResponse { outcome })))
}

/// Restart polling for the armed boarding alarm, clearing a halt
#[utoipa::path(
    post,
    path = "/api/alarms/get-on/reset",
    responses(
        (status = 204, description = "Session restarted"),
        (status = 404, description = "No alarm armed", body = ErrorResponse)
    ),
    tag = "alarms"
)]
pub async fn reset_get_on_alarm(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.engine.get_on().reset().map_err(refresh_error)?;
    info!("Get-on alarm reset over HTTP");
    Ok(StatusCode::NO_CONTENT)
}
