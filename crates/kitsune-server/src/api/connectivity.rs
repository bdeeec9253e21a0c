use std::sync::Arc;

use axum::{extract::State, Json};
use kitsune_extensions::Connectivity;
use serde::{Deserialize, Serialize};

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ConnectivityRequest {
    pub online: bool,
}

#[derive(Debug, Serialize)]
pub struct ConnectivityResponse {
    pub status: Connectivity,
}

/// PUT /api/connectivity — Report network reachability.
///
/// Going back online revalidates every inactive extension.
pub async fn set_connectivity(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ConnectivityRequest>,
) -> Json<ConnectivityResponse> {
    let status = if body.online {
        Connectivity::Online
    } else {
        Connectivity::Offline
    };
    state.connectivity.set(status);
    Json(ConnectivityResponse {
        status: state.connectivity.current(),
    })
}

#[cfg(test)]
mod tests {
    use crate::api::router;
    use crate::api::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_set_offline_then_online() {
        let state = test_state();

        let resp = router(state.clone())
            .oneshot(json_request("PUT", "/api/connectivity", json!({"online": false})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"status": "offline"}));
        assert!(state.connectivity.is_offline());

        let resp = router(state.clone())
            .oneshot(json_request("PUT", "/api/connectivity", json!({"online": true})))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await, json!({"status": "online"}));
    }

    #[tokio::test]
    async fn test_rejects_malformed_body() {
        let resp = router(test_state())
            .oneshot(json_request("PUT", "/api/connectivity", json!({"online": "yes"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
