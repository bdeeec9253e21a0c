//! Host-side network requests on behalf of trusted workers.

use serde_json::{Map, Value};

use crate::error::ExtensionError;
use crate::protocol::{FetchOutcome, FetchRequest, FetchResult};

/// Performs `FETCH` requests and produces the matching `RESULT`.
#[derive(Debug, Clone)]
pub struct ProxyBridge {
    http: reqwest::Client,
}

impl ProxyBridge {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn handle(&self, request: FetchRequest) -> FetchResult {
        let outcome = match self.perform(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(url = %request.url, error = %e, "proxied request failed");
                FetchOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };
        FetchResult {
            request_id: request.request_id,
            outcome,
        }
    }

    async fn perform(&self, request: &FetchRequest) -> Result<FetchOutcome, ExtensionError> {
        let method = request.options.method.as_deref().unwrap_or("GET");
        let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ExtensionError::Worker(format!("invalid HTTP method '{method}'")))?;

        let mut builder = self.http.request(method, &request.url);
        for (name, value) in &request.options.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.options.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;
        let json = serde_json::from_str(&text).unwrap_or_else(|_| Value::Object(Map::new()));

        Ok(FetchOutcome::Response {
            ok: status.is_success(),
            status: status.as_u16(),
            text,
            json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FetchOptions;
    use serde_json::json;
    use std::collections::BTreeMap;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(url: String, options: FetchOptions) -> FetchRequest {
        FetchRequest {
            request_id: 42,
            url,
            options,
        }
    }

    #[tokio::test]
    async fn test_json_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"title": "x"}])))
            .mount(&server)
            .await;

        let bridge = ProxyBridge::new(reqwest::Client::new());
        let result = bridge
            .handle(request(format!("{}/search", server.uri()), FetchOptions::default()))
            .await;
        assert_eq!(result.request_id, 42);
        match result.outcome {
            FetchOutcome::Response {
                ok, status, json, ..
            } => {
                assert!(ok);
                assert_eq!(status, 200);
                assert_eq!(json, json!([{"title": "x"}]));
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_body_yields_empty_object() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("<html>down</html>"))
            .mount(&server)
            .await;

        let bridge = ProxyBridge::new(reqwest::Client::new());
        let result = bridge
            .handle(request(server.uri(), FetchOptions::default()))
            .await;
        assert_eq!(
            result.outcome,
            FetchOutcome::Response {
                ok: false,
                status: 503,
                text: "<html>down</html>".into(),
                json: json!({}),
            }
        );
    }

    #[tokio::test]
    async fn test_method_headers_and_body_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rpc"))
            .and(header("x-token", "abc"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let options = FetchOptions {
            method: Some("post".into()),
            headers: BTreeMap::from([("x-token".to_string(), "abc".to_string())]),
            body: Some("payload".into()),
        };
        let bridge = ProxyBridge::new(reqwest::Client::new());
        let result = bridge
            .handle(request(format!("{}/rpc", server.uri()), options))
            .await;
        assert!(matches!(result.outcome, FetchOutcome::Response { ok: true, .. }));
    }

    #[tokio::test]
    async fn test_transport_failure_yields_error() {
        let bridge = ProxyBridge::new(reqwest::Client::new());
        let result = bridge
            .handle(request(
                "http://127.0.0.1:1/unreachable".into(),
                FetchOptions::default(),
            ))
            .await;
        assert!(matches!(result.outcome, FetchOutcome::Failed { .. }));
    }
}
