//! Manifest resolution across source schemes.

use serde_json::Value;

use crate::error::ExtensionError;
use crate::locator::{cdn_manifest_url, file_url_path, local_locale, local_manifest_url, Locator};
use crate::notify::Reporter;

#[derive(Clone)]
pub struct ManifestResolver {
    http: reqwest::Client,
    cdn_base: String,
    reporter: Reporter,
}

impl ManifestResolver {
    pub fn new(http: reqwest::Client, cdn_base: impl Into<String>, reporter: Reporter) -> Self {
        Self {
            http,
            cdn_base: cdn_base.into(),
            reporter,
        }
    }

    /// Resolve a source into its manifest entries.
    ///
    /// Rate limiting and outages during background update checks are
    /// silent; every other failure is reported.
    pub async fn resolve(&self, source: &str, is_update_check: bool) -> Option<Vec<Value>> {
        self.try_resolve(source, is_update_check).await.ok()
    }

    /// Like [`resolve`](Self::resolve), handing back the failure.
    pub async fn try_resolve(
        &self,
        source: &str,
        is_update_check: bool,
    ) -> Result<Vec<Value>, ExtensionError> {
        let err = match self.fetch(source).await {
            Ok(entries) => return Ok(entries),
            Err(e) => e,
        };
        if is_update_check && err.is_transient() {
            tracing::debug!(source = %source, error = %err, "update check skipped");
        } else {
            tracing::warn!(source = %source, error = %err, "failed to resolve manifest");
            self.reporter.error(
                "Failed to fetch Source",
                &format!("Unable to load manifest for: {source}"),
                &err,
            );
        }
        Err(err)
    }

    /// Resolve without reporting.
    pub async fn fetch(&self, source: &str) -> Result<Vec<Value>, ExtensionError> {
        match Locator::parse(source, "source")? {
            Locator::Http(url) => remote_entries(self.get_json(&url).await?),
            Locator::Cdn { scheme, path } => {
                let url = cdn_manifest_url(&self.cdn_base, scheme, &path);
                remote_entries(self.get_json(&url).await?)
            }
            Locator::Local(input) => read_local(&input).await,
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value, ExtensionError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtensionError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.json().await?)
    }
}

fn into_entries(payload: Value) -> Result<Vec<Value>, ExtensionError> {
    match payload {
        Value::Array(entries) => Ok(entries),
        _ => Err(ExtensionError::NotAnArray),
    }
}

/// `locale` only ever comes from [`read_local`]; remote manifests cannot set it.
fn remote_entries(payload: Value) -> Result<Vec<Value>, ExtensionError> {
    let mut entries = into_entries(payload)?;
    for entry in &mut entries {
        if let Some(obj) = entry.as_object_mut() {
            obj.remove("locale");
        }
    }
    Ok(entries)
}

/// Read a manifest from disk, anchoring every extension entry to its directory.
async fn read_local(input: &str) -> Result<Vec<Value>, ExtensionError> {
    let path = file_url_path(&local_manifest_url(input))?;
    tracing::debug!(path = %path.display(), "reading local manifest");
    let bytes = tokio::fs::read(&path).await?;
    let mut entries = into_entries(serde_json::from_slice(&bytes)?)?;

    let locale = local_locale(input);
    for entry in &mut entries {
        if let Some(obj) = entry.as_object_mut() {
            if obj.contains_key("id") {
                obj.insert("locale".into(), Value::String(locale.clone()));
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityMonitor;
    use crate::error::ExtensionError;
    use crate::notify::Notifier;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Recording(Mutex<Vec<String>>);

    impl Notifier for Recording {
        fn report(&self, title: &str, _description: &str, _error: &ExtensionError) {
            self.0.lock().unwrap().push(title.to_string());
        }
    }

    fn resolver(cdn_base: &str) -> (ManifestResolver, Arc<Recording>) {
        let notifier = Arc::new(Recording::default());
        let reporter = Reporter::new(notifier.clone(), ConnectivityMonitor::default());
        (
            ManifestResolver::new(reqwest::Client::new(), cdn_base, reporter),
            notifier,
        )
    }

    #[tokio::test]
    async fn test_http_manifest() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": "a"}])))
            .mount(&server)
            .await;

        let (resolver, _) = resolver(&server.uri());
        let entries = resolver
            .resolve(&format!("{}/index.json", server.uri()), false)
            .await
            .unwrap();
        assert_eq!(entries, vec![json!({"id": "a"})]);
    }

    #[tokio::test]
    async fn test_cdn_manifest_appends_index() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gh/owner/repo/index.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let (resolver, _) = resolver(&server.uri());
        assert_eq!(
            resolver.fetch("gh:owner/repo").await.unwrap(),
            Vec::<Value>::new()
        );
    }

    #[tokio::test]
    async fn test_remote_manifest_cannot_set_locale() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "a", "main": "passwd", "locale": "extension://etc/"}
            ])))
            .mount(&server)
            .await;

        let (resolver, _) = resolver(&server.uri());
        let entries = resolver
            .fetch(&format!("{}/index.json", server.uri()))
            .await
            .unwrap();
        assert_eq!(entries, vec![json!({"id": "a", "main": "passwd"})]);
        let entries = resolver.fetch("gh:owner/repo").await.unwrap();
        assert!(entries[0].get("locale").is_none());
    }

    #[tokio::test]
    async fn test_try_resolve_returns_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (resolver, notifier) = resolver(&server.uri());
        let err = resolver
            .try_resolve(&format!("{}/index.json", server.uri()), false)
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(notifier.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_not_an_array() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "a"})))
            .mount(&server)
            .await;

        let (resolver, notifier) = resolver(&server.uri());
        let err = resolver.fetch("npm:pkg").await.unwrap_err();
        assert!(matches!(err, ExtensionError::NotAnArray));
        assert!(resolver.resolve("npm:pkg", false).await.is_none());
        assert_eq!(notifier.0.lock().unwrap().as_slice(), ["Failed to fetch Source"]);
    }

    #[tokio::test]
    async fn test_transient_failure_silent_on_update_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let (resolver, notifier) = resolver(&server.uri());
        let url = format!("{}/index.json", server.uri());
        assert!(resolver.resolve(&url, true).await.is_none());
        assert!(notifier.0.lock().unwrap().is_empty());

        assert!(resolver.resolve(&url, false).await.is_none());
        assert_eq!(notifier.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_not_found_reported_even_on_update_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (resolver, notifier) = resolver(&server.uri());
        assert!(resolver
            .resolve(&format!("{}/index.json", server.uri()), true)
            .await
            .is_none());
        assert_eq!(notifier.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_protocol() {
        let (resolver, _) = resolver("http://unused");
        assert!(matches!(
            resolver.fetch("ftp://x/index.json").await,
            Err(ExtensionError::UnknownProtocol("source"))
        ));
    }

    #[tokio::test]
    async fn test_local_manifest_sets_locale() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("index.json"),
            serde_json::to_vec(&json!([
                {"id": "a", "name": "A", "version": "1", "main": "a.wasm", "update": "https://x"},
                {"main": "gh:o/r"}
            ]))
            .unwrap(),
        )
        .unwrap();

        let (resolver, _) = resolver("http://unused");
        let source = dir.path().to_string_lossy().to_string();
        let entries = resolver.fetch(&source).await.unwrap();

        let expected = format!(
            "extension://{}/",
            source.trim_start_matches('/').trim_end_matches('/')
        );
        assert_eq!(entries[0]["locale"], json!(expected));
        assert!(entries[1].get("locale").is_none());
    }
}
