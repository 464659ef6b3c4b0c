pub mod alarms;
pub mod error;
pub mod events;
pub mod location;
pub mod quota;

pub use error::{internal_error, ApiError, ErrorResponse};

use axum::Router;
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

use crate::engine::AlarmEngine;
use crate::providers::RequestQuota;
use crate::services::notifier::BroadcastNotifier;

#[derive(Clone)]
pub struct AppState {
    pub engine: AlarmEngine,
    pub quota: RequestQuota,
    pub notifier: BroadcastNotifier,
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "BBus alarm engine",
        description = "Get-on and get-off alarms over live Seoul bus data"
    ),
    tags(
        (name = "alarms", description = "Arm, inspect and disarm alarms"),
        (name = "location", description = "Device location feed"),
        (name = "quota", description = "Daily API request budget"),
        (name = "events", description = "Live alarm updates")
    )
)]
pub struct ApiDoc;

/// Full HTTP surface, including the Swagger UI at `/swagger-ui`
pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .merge(alarms::router())
        .merge(location::router())
        .merge(quota::router())
        .merge(events::router())
        .with_state(state)
        .split_for_parts();

    router.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::AppState;
    use crate::config::AlarmSettings;
    use crate::engine::AlarmEngine;
    use crate::error::NetworkError;
    use crate::providers::{BusApi, Endpoint, Fetch, Params, RequestQuota};
    use crate::services::notifier::BroadcastNotifier;
    use crate::store::KeyValueStore;
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::sync::Arc;

    struct Offline;

    impl Fetch for Offline {
        fn fetch(&self, _endpoint: Endpoint, _params: Params) -> BoxFuture<'_, Result<String, NetworkError>> {
            async { Err(NetworkError::NoResponse) }.boxed()
        }
    }

    pub async fn state() -> AppState {
        let store = KeyValueStore::in_memory().await.unwrap();
        let notifier = BroadcastNotifier::new(16);
        let engine = AlarmEngine::new(
            BusApi::new(Arc::new(Offline)),
            AlarmSettings::default(),
            Arc::new(notifier.clone()),
        );
        AppState {
            engine,
            quota: RequestQuota::new(store, 300),
            notifier,
        }
    }
}
