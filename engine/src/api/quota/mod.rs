use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::api::{internal_error, AppState, ErrorResponse};

#[derive(Debug, Serialize, ToSchema)]
pub struct QuotaResponse {
    pub used_today: u32,
    pub daily_limit: u32,
    pub remaining: u32,
}

pub fn router() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(get_quota))
}

/// Requests spent against today's API budget
#[utoipa::path(
    get,
    path = "/api/quota",
    responses(
        (status = 200, description = "Today's request usage", body = QuotaResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "quota"
)]
pub async fn get_quota(
    State(state): State<AppState>,
) -> Result<Json<QuotaResponse>, (StatusCode, Json<ErrorResponse>)> {
    let used_today = state.quota.used_today().await.map_err(internal_error)?;
    let daily_limit = state.quota.daily_limit();

    Ok(Json(QuotaResponse {
        used_today,
        daily_limit,
        remaining: daily_limit.saturating_sub(used_today),
    }))
}

#[cfg(test)]
mod tests {
    use crate::api::{router, test_support};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    #[tokio::test]
    async fn reports_usage_against_the_limit() {
        let state = test_support::state().await;
        state.quota.acquire().await.unwrap();
        state.quota.acquire().await.unwrap();

        let response = router(state)
            .oneshot(Request::get("/api/quota").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let quota: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(quota["used_today"], 2);
        assert_eq!(quota["remaining"], 298);
    }
}
