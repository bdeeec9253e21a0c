//! Runtime configuration, read from the environment.

use std::time::Duration;

use crate::locator::DEFAULT_CDN_BASE;
use crate::sandbox::SandboxConfig;

/// Default max module size: 50 MB.
const DEFAULT_MAX_MODULE_SIZE_MB: u64 = 50;

/// Cached module code expires after a random number of days in this range.
pub const CACHE_TTL_DAYS: std::ops::RangeInclusive<i64> = 7..=14;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Base URL of the module CDN serving `gh:` and `npm:` sources.
    pub cdn_base: String,
    /// Timeout applied to every manifest, code and proxied request.
    pub http_timeout: Duration,
    /// The platform blocks cross-origin requests made from inside workers,
    /// so trusted extensions are routed through the proxy bridge.
    pub cross_origin_blocked: bool,
    /// Maximum accepted module size in bytes.
    pub max_module_size: u64,
    pub sandbox: SandboxConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cdn_base: DEFAULT_CDN_BASE.to_string(),
            http_timeout: Duration::from_secs(30),
            cross_origin_blocked: false,
            max_module_size: DEFAULT_MAX_MODULE_SIZE_MB * 1024 * 1024,
            sandbox: SandboxConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        Self {
            cdn_base: std::env::var("EXTENSION_CDN_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| DEFAULT_CDN_BASE.to_string()),
            http_timeout: Duration::from_secs(
                std::env::var("EXTENSION_HTTP_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(30),
            ),
            cross_origin_blocked: std::env::var("EXTENSION_PROXY_BRIDGE")
                .unwrap_or_default()
                .eq_ignore_ascii_case("true"),
            max_module_size: std::env::var("EXTENSION_MAX_MODULE_SIZE_MB")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(DEFAULT_MAX_MODULE_SIZE_MB)
                * 1024
                * 1024,
            sandbox: SandboxConfig::from_env(),
        }
    }

    /// Shared HTTP client honouring the configured timeout.
    pub fn http_client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .user_agent(concat!("kitsune/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.cdn_base, "https://esm.sh");
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert!(!config.cross_origin_blocked);
        assert_eq!(config.max_module_size, 50 * 1024 * 1024);
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("EXTENSION_CDN_BASE", "http://localhost:9999/");
        std::env::set_var("EXTENSION_HTTP_TIMEOUT_SECS", "5");
        std::env::set_var("EXTENSION_PROXY_BRIDGE", "TRUE");
        std::env::set_var("EXTENSION_MAX_MODULE_SIZE_MB", "2");

        let config = RuntimeConfig::from_env();
        assert_eq!(config.cdn_base, "http://localhost:9999");
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert!(config.cross_origin_blocked);
        assert_eq!(config.max_module_size, 2 * 1024 * 1024);

        std::env::remove_var("EXTENSION_CDN_BASE");
        std::env::remove_var("EXTENSION_HTTP_TIMEOUT_SECS");
        std::env::remove_var("EXTENSION_PROXY_BRIDGE");
        std::env::remove_var("EXTENSION_MAX_MODULE_SIZE_MB");
    }
}
