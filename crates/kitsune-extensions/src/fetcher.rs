//! Extension code retrieval.

use crate::cache::is_blank;
use crate::error::ExtensionError;
use crate::locator::{cdn_module_url, with_module_suffix, Locator};
use crate::notify::Reporter;

/// Executable payload of an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionCode {
    /// Inline module bytes; cacheable.
    Module(Vec<u8>),
    /// Local module referenced by `extension://` path; never cached.
    Reference(String),
}

impl ExtensionCode {
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Module(bytes) => is_blank(bytes),
            Self::Reference(path) => path.trim().is_empty(),
        }
    }
}

/// Resolves an entry point locator into [`ExtensionCode`].
#[derive(Clone)]
pub struct CodeFetcher {
    http: reqwest::Client,
    cdn_base: String,
    reporter: Reporter,
}

impl CodeFetcher {
    pub fn new(http: reqwest::Client, cdn_base: impl Into<String>, reporter: Reporter) -> Self {
        Self {
            http,
            cdn_base: cdn_base.into(),
            reporter,
        }
    }

    /// Fetch the code behind `locator`. Failures are reported and yield `None`.
    pub async fn fetch_code(&self, name: &str, locator: &str) -> Option<ExtensionCode> {
        match self.fetch(locator).await {
            Ok(code) => Some(code),
            Err(e @ ExtensionError::UnknownProtocol(_)) => {
                self.reporter.error(
                    "Failed to fetch Extension",
                    &format!("Unsupported extension locator: {locator}"),
                    &e,
                );
                None
            }
            Err(e) => {
                tracing::warn!(extension = %name, locator = %locator, error = %e, "failed to fetch extension code");
                self.reporter.error(
                    &format!("Failed to load extension {name}"),
                    "Unable to fetch extension code",
                    &e,
                );
                None
            }
        }
    }

    /// Fetch without reporting.
    pub async fn fetch(&self, locator: &str) -> Result<ExtensionCode, ExtensionError> {
        match Locator::parse(locator, "extension")? {
            Locator::Http(url) => self.download(&url).await.map(ExtensionCode::Module),
            Locator::Local(path) if path.starts_with("extension:") => {
                Ok(ExtensionCode::Reference(with_module_suffix(&path)))
            }
            Locator::Local(_) => Err(ExtensionError::UnknownProtocol("extension")),
            Locator::Cdn { scheme, path } => {
                let url = cdn_module_url(&self.cdn_base, scheme, &path);
                self.download(&url).await.map(ExtensionCode::Module)
            }
        }
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ExtensionError> {
        tracing::debug!(url = %url, "downloading extension code");
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtensionError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response.bytes().await?.to_vec();
        if is_blank(&bytes) {
            return Err(ExtensionError::EmptyCode(url.to_string()));
        }
        Ok(bytes)
    }
}
