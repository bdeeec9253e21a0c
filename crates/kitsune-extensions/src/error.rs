//! Extension runtime error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error(
        "unknown protocol for {0}, expected: 'gh:', 'npm:', 'file:', 'extension:', or 'http(s)'"
    )]
    UnknownProtocol(&'static str),

    #[error("invalid locator '{0}'")]
    InvalidLocator(String),

    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("manifest is not an array")]
    NotAnArray,

    #[error("invalid extension config: {0}")]
    InvalidDescriptor(String),

    #[error("extension code is empty: {0}")]
    EmptyCode(String),

    #[error("WASM validation error: {0}")]
    WasmValidation(String),

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("execution timeout: extension {0} exceeded fuel limit")]
    FuelExhausted(String),

    #[error("memory limit exceeded: extension {0}")]
    MemoryExceeded(String),

    #[error("worker for {0} is gone")]
    WorkerGone(String),

    #[error("worker error: {0}")]
    Worker(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl ExtensionError {
    /// HTTP status code carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Rate limiting or a service outage: 429 and every 5xx.
    pub fn is_transient(&self) -> bool {
        matches!(self.status(), Some(429) | Some(500..=599))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_display_unknown_protocol() {
        let err = ExtensionError::UnknownProtocol("source");
        assert_eq!(
            err.to_string(),
            "unknown protocol for source, expected: 'gh:', 'npm:', 'file:', 'extension:', or 'http(s)'"
        );
    }

    #[test]
    fn test_display_status() {
        let err = ExtensionError::Status {
            url: "https://x/index.json".into(),
            status: 404,
        };
        assert_eq!(
            err.to_string(),
            "request to https://x/index.json failed with status 404"
        );
    }

    #[test]
    fn test_display_fuel_exhausted() {
        let err = ExtensionError::FuelExhausted("https://x/a".into());
        assert_eq!(
            err.to_string(),
            "execution timeout: extension https://x/a exceeded fuel limit"
        );
    }

    #[test]
    fn test_transient_statuses() {
        for status in [429, 500, 502, 503] {
            let err = ExtensionError::Status {
                url: "u".into(),
                status,
            };
            assert!(err.is_transient(), "{status} should be transient");
        }
        for status in [400, 403, 404] {
            let err = ExtensionError::Status {
                url: "u".into(),
                status,
            };
            assert!(!err.is_transient(), "{status} should not be transient");
        }
        assert!(!ExtensionError::NotAnArray.is_transient());
    }

    #[test]
    fn test_status_absent_for_non_http() {
        assert_eq!(ExtensionError::NotAnArray.status(), None);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err: ExtensionError = io_err.into();
        assert!(matches!(err, ExtensionError::Io(_)));
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("bad json{{{").unwrap_err();
        let err: ExtensionError = json_err.into();
        assert!(matches!(err, ExtensionError::Serialization(_)));
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error;
        let err: ExtensionError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(err.source().is_some());
        assert!(ExtensionError::Sandbox("trap".into()).source().is_none());
    }
}
