use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_SETTINGS_PATH: &str = "./data/extensions.json";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Host process configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub settings_path: PathBuf,
    pub bind_addr: SocketAddr,
    /// Allowed CORS origins; empty means no cross-origin access.
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let bind_addr = std::env::var("KITSUNE_BIND_ADDR")
            .ok()
            .and_then(|v| match v.parse() {
                Ok(addr) => Some(addr),
                Err(e) => {
                    tracing::warn!(value = %v, "invalid KITSUNE_BIND_ADDR, using default: {e}");
                    None
                }
            })
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

        Self {
            settings_path: std::env::var("KITSUNE_SETTINGS_PATH")
                .unwrap_or_else(|_| DEFAULT_SETTINGS_PATH.to_string())
                .into(),
            bind_addr,
            cors_origins: std::env::var("KITSUNE_CORS_ORIGINS")
                .unwrap_or_default()
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}
