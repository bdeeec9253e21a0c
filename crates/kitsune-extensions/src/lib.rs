//! Kitsune Extension Runtime
//!
//! Content-source extensions are discovered from remote or local manifests,
//! fetched as WASM modules, and run inside isolated worker threads using
//! Extism (wasmtime). The [`ExtensionManager`] owns every live worker and
//! drives loading, validation, updates and removal from the settings store
//! without restarting the host.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod descriptor;
pub mod error;
pub mod fetcher;
pub mod locator;
pub mod manager;
pub mod notify;
pub mod protocol;
pub mod proxy;
pub mod resolver;
pub mod sandbox;
pub mod settings;
pub mod worker;

pub use cache::{CacheStore, MemoryCache, EXTENSIONS_NAMESPACE};
pub use config::RuntimeConfig;
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use descriptor::{
    is_trusted_id, ExtensionDescriptor, ExtensionKey, Manifest, ManifestEntry, RuntimeEntry,
};
pub use error::ExtensionError;
pub use fetcher::{CodeFetcher, ExtensionCode};
pub use manager::{AddSourceOutcome, ExtensionManager, ExtensionState, ExtensionStatus};
pub use notify::{Notifier, Reporter, TracingNotifier};
pub use protocol::{FetchOptions, FetchRequest, FetchResult, InitializeOptions, InitializeResult};
pub use proxy::ProxyBridge;
pub use resolver::ManifestResolver;
pub use sandbox::{SandboxConfig, SandboxRuntime, SandboxRuntimeFactory};
pub use settings::{ExtensionSettings, SettingsStore};
pub use worker::{BridgeEndpoint, ExtensionRuntime, RuntimeFactory, WorkerHandle, WorkerSupervisor};
