use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::api::error::{unprocessable, ApiError};
use crate::api::{AppState, ErrorResponse};
use crate::models::LocationSample;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LocationUpdate {
    pub lat: f64,
    pub lon: f64,
}

pub fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(get_location, update_location))
}

/// Latest device location, if any was reported
#[utoipa::path(
    get,
    path = "/api/location",
    responses(
        (status = 200, description = "Latest location sample", body = Option<LocationSample>)
    ),
    tag = "location"
)]
pub async fn get_location(State(state): State<AppState>) -> Json<Option<LocationSample>> {
    Json(state.engine.location())
}

/// Report a device location sample
#[utoipa::path(
    post,
    path = "/api/location",
    request_body = LocationUpdate,
    responses(
        (status = 204, description = "Location recorded"),
        (status = 422, description = "Coordinate out of range", body = ErrorResponse)
    ),
    tag = "location"
)]
pub async fn update_location(
    State(state): State<AppState>,
    Json(update): Json<LocationUpdate>,
) -> Result<StatusCode, ApiError> {
    state
        .engine
        .update_location(update.lat, update.lon)
        .map_err(|e| unprocessable(e.to_string()))?;
    Ok(StatusCode::NO_CONTENT)
}
