pub mod connectivity;
pub mod extensions;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use kitsune_extensions::{ConnectivityMonitor, ExtensionManager};
use serde::Serialize;

/// Shared state of every handler.
pub struct AppState {
    pub manager: Arc<ExtensionManager>,
    pub connectivity: ConnectivityMonitor,
}

pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub fn error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (
        status,
        Json(serde_json::json!({ "error": message.to_string() })),
    )
}

#[derive(Serialize)]
struct ApiStatus {
    status: &'static str,
    version: &'static str,
}

async fn healthz() -> Json<ApiStatus> {
    Json(ApiStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Full application router, without middleware layers.
pub fn router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/extensions", get(extensions::list_extensions))
        .route(
            "/extensions/sources",
            post(extensions::add_source).delete(extensions::remove_source),
        )
        .route("/extensions/reload", post(extensions::reload_extensions))
        .route("/extensions/validate", post(extensions::validate_extension))
        .route("/extensions/enabled", put(extensions::set_enabled))
        .route("/connectivity", put(connectivity::set_connectivity));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api_routes)
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use kitsune_extensions::{
        BridgeEndpoint, ExtensionCode, ExtensionError, ExtensionKey, ExtensionRuntime,
        InitializeOptions, InitializeResult, MemoryCache, RuntimeConfig, RuntimeFactory,
        SettingsStore, TracingNotifier,
    };

    struct AcceptAll;

    impl ExtensionRuntime for AcceptAll {
        fn initialize(
            &mut self,
            _key: &ExtensionKey,
            _code: ExtensionCode,
            _options: InitializeOptions,
        ) -> Result<InitializeResult, ExtensionError> {
            Ok(InitializeResult::accepted())
        }

        fn validate(&mut self) -> Result<bool, ExtensionError> {
            Ok(true)
        }
    }

    struct AcceptAllFactory;

    impl RuntimeFactory for AcceptAllFactory {
        fn create(
            &self,
            _key: &ExtensionKey,
            _bridge: Option<BridgeEndpoint>,
        ) -> Box<dyn ExtensionRuntime> {
            Box::new(AcceptAll)
        }
    }

    pub fn test_state() -> Arc<AppState> {
        let connectivity = ConnectivityMonitor::default();
        let manager = ExtensionManager::new(
            RuntimeConfig::default(),
            SettingsStore::default(),
            Arc::new(MemoryCache::new()),
            Arc::new(TracingNotifier),
            connectivity.clone(),
            Arc::new(AcceptAllFactory),
        );
        Arc::new(AppState {
            manager,
            connectivity,
        })
    }

    pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_healthz() {
        let app = router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
