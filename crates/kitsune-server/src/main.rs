use std::sync::Arc;

use axum::http::HeaderValue;
use kitsune_extensions::{
    ConnectivityMonitor, ExtensionManager, MemoryCache, RuntimeConfig, SandboxRuntimeFactory,
    SettingsStore, TracingNotifier,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod api;
mod config;
mod persist;

use api::AppState;
use config::ServerConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let server_config = ServerConfig::from_env();
    let runtime_config = RuntimeConfig::from_env();
    tracing::info!(
        cdn = %runtime_config.cdn_base,
        proxy_bridge = runtime_config.cross_origin_blocked,
        "extension runtime configured"
    );

    let settings = SettingsStore::load(&server_config.settings_path)
        .await
        .expect("failed to load extension settings");
    persist::spawn(settings.clone(), server_config.settings_path.clone());

    let connectivity = ConnectivityMonitor::default();
    let factory = Arc::new(SandboxRuntimeFactory::new(
        runtime_config.sandbox.clone(),
        runtime_config.max_module_size,
    ));
    let manager = ExtensionManager::new(
        runtime_config,
        settings,
        Arc::new(MemoryCache::new()),
        Arc::new(TracingNotifier),
        connectivity.clone(),
        factory,
    );
    manager.start();

    let state = Arc::new(AppState {
        manager: manager.clone(),
        connectivity,
    });

    let cors = if server_config.cors_origins.is_empty() {
        tracing::warn!("KITSUNE_CORS_ORIGINS not set, cross-origin requests are rejected");
        CorsLayer::new()
    } else {
        let origins: Vec<HeaderValue> = server_config
            .cors_origins
            .iter()
            .filter_map(|s| HeaderValue::from_str(s).ok())
            .collect();
        tracing::info!("CORS allowed origins: {:?}", origins);
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers(tower_http::cors::Any)
    };

    let app = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr = server_config.bind_addr;
    tracing::info!(%addr, "server started");

    axum::serve(
        tokio::net::TcpListener::bind(addr)
            .await
            .expect("failed to bind listener"),
        app,
    )
    .with_graceful_shutdown(async {
        tokio::signal::ctrl_c().await.ok();
    })
    .await
    .expect("server error");

    manager.shutdown().await;
}
