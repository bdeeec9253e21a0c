//! Extension runtime manager.
//!
//! Owns the live worker tables and reconciles them with the settings
//! store: installs sources, checks for updates, loads code (cache first,
//! network fallback), spawns and initializes workers, and revalidates
//! inactive workers when connectivity returns.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::cache::{is_blank, CacheStore, EXTENSIONS_NAMESPACE};
use crate::config::{RuntimeConfig, CACHE_TTL_DAYS};
use crate::connectivity::{Connectivity, ConnectivityMonitor};
use crate::descriptor::{is_trusted_id, ExtensionDescriptor, ExtensionKey, Manifest};
use crate::error::ExtensionError;
use crate::fetcher::{CodeFetcher, ExtensionCode};
use crate::notify::{Notifier, Reporter};
use crate::protocol::InitializeOptions;
use crate::proxy::ProxyBridge;
use crate::resolver::ManifestResolver;
use crate::settings::SettingsStore;
use crate::worker::{RuntimeFactory, WorkerHandle, WorkerSupervisor};

type Sources = BTreeMap<ExtensionKey, ExtensionDescriptor>;

// ─── Public types ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtensionState {
    Active,
    Inactive,
    Loading,
    NotLoaded,
}

/// One installed extension as seen by callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    pub key: ExtensionKey,
    pub id: String,
    pub name: String,
    pub version: String,
    pub update: String,
    pub trusted: bool,
    pub enabled: bool,
    pub state: ExtensionState,
}

/// Result of [`ExtensionManager::add_source`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddSourceOutcome {
    Installed(Vec<ExtensionKey>),
    CatalogStored,
    CatalogUnchanged,
    Failed(String),
}

impl fmt::Display for AddSourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Installed(keys) => write!(
                f,
                "Installed {} extension{}",
                keys.len(),
                if keys.len() == 1 { "" } else { "s" }
            ),
            Self::CatalogStored => f.write_str("Stored source repository"),
            Self::CatalogUnchanged => f.write_str("Source repository unchanged"),
            Self::Failed(message) => f.write_str(message),
        }
    }
}

// ─── Worker table ───────────────────────────────────────────────────────

/// Active and inactive handles. A key lives on at most one side.
#[derive(Default)]
struct WorkerTable {
    active: HashMap<ExtensionKey, WorkerHandle>,
    inactive: HashMap<ExtensionKey, WorkerHandle>,
}

impl WorkerTable {
    /// Install `handle` as active; returns the handles it displaced.
    fn activate(&mut self, key: ExtensionKey, handle: WorkerHandle) -> Vec<WorkerHandle> {
        let mut displaced = Vec::new();
        displaced.extend(self.inactive.remove(&key));
        displaced.extend(self.active.insert(key, handle.clone()));
        displaced.retain(|old| !old.same_instance(&handle));
        displaced
    }

    /// Install `handle` as inactive; returns the handles it displaced.
    fn deactivate(&mut self, key: ExtensionKey, handle: WorkerHandle) -> Vec<WorkerHandle> {
        let mut displaced = Vec::new();
        displaced.extend(self.active.remove(&key));
        displaced.extend(self.inactive.insert(key, handle.clone()));
        displaced.retain(|old| !old.same_instance(&handle));
        displaced
    }

    fn remove(&mut self, key: &ExtensionKey) -> Vec<WorkerHandle> {
        self.active
            .remove(key)
            .into_iter()
            .chain(self.inactive.remove(key))
            .collect()
    }

    fn drain(&mut self) -> Vec<WorkerHandle> {
        self.active
            .drain()
            .chain(self.inactive.drain())
            .map(|(_, handle)| handle)
            .collect()
    }
}

fn terminate_all(handles: Vec<WorkerHandle>) {
    for handle in handles {
        handle.terminate();
    }
}

// ─── Manager ────────────────────────────────────────────────────────────

pub struct ExtensionManager {
    config: RuntimeConfig,
    settings: SettingsStore,
    cache: Arc<dyn CacheStore>,
    reporter: Reporter,
    connectivity: ConnectivityMonitor,
    resolver: ManifestResolver,
    fetcher: CodeFetcher,
    supervisor: WorkerSupervisor,
    workers: RwLock<WorkerTable>,
    /// In-flight `add_source` calls by URL.
    pending: Mutex<HashMap<String, Shared<BoxFuture<'static, AddSourceOutcome>>>>,
    /// In-flight load cycles by key.
    loading: Mutex<HashMap<ExtensionKey, Shared<BoxFuture<'static, ()>>>>,
    ready: watch::Sender<bool>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ExtensionManager {
    pub fn new(
        config: RuntimeConfig,
        settings: SettingsStore,
        cache: Arc<dyn CacheStore>,
        notifier: Arc<dyn Notifier>,
        connectivity: ConnectivityMonitor,
        factory: Arc<dyn RuntimeFactory>,
    ) -> Arc<Self> {
        let http = config.http_client();
        let reporter = Reporter::new(notifier, connectivity.clone());
        let (ready, _) = watch::channel(false);

        Arc::new(Self {
            resolver: ManifestResolver::new(http.clone(), config.cdn_base.clone(), reporter.clone()),
            fetcher: CodeFetcher::new(http.clone(), config.cdn_base.clone(), reporter.clone()),
            supervisor: WorkerSupervisor::new(factory, ProxyBridge::new(http)),
            config,
            settings,
            cache,
            reporter,
            connectivity,
            workers: RwLock::new(WorkerTable::default()),
            pending: Mutex::new(HashMap::new()),
            loading: Mutex::new(HashMap::new()),
            ready,
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Start watching settings and connectivity.
    pub fn start(self: &Arc<Self>) {
        let settings_task = tokio::spawn(self.clone().watch_settings());
        let connectivity_task = tokio::spawn(self.clone().watch_connectivity());
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(settings_task);
        tasks.push(connectivity_task);
    }

    /// Stop the watchers and terminate every worker.
    pub async fn shutdown(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        terminate_all(self.workers.write().await.drain());
        tracing::info!("extension manager stopped");
    }

    async fn watch_settings(self: Arc<Self>) {
        let mut rx = self.settings.subscribe();
        let mut known: Option<BTreeSet<ExtensionKey>> = None;
        loop {
            let value = rx.borrow_and_update().clone();
            let keys: BTreeSet<ExtensionKey> = value.sources_new.keys().cloned().collect();

            if known.as_ref() != Some(&keys) {
                known = Some(keys.clone());
                if keys.is_empty() {
                    self.ready.send_replace(true);
                } else {
                    tracing::debug!(count = keys.len(), "installed extensions changed");
                    self.ready.send_replace(false);
                    let this = self.clone();
                    tokio::spawn(async move {
                        let updated = this
                            .update_extensions(&value.sources_new, &value.extension_sources)
                            .await;
                        let latest = this.settings.value().sources_new;
                        this.load_extensions(latest, updated).await;
                    });
                }
            }

            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    async fn watch_connectivity(self: Arc<Self>) {
        let mut rx = self.connectivity.subscribe();
        while rx.changed().await.is_ok() {
            let status = *rx.borrow_and_update();
            if status == Connectivity::Online {
                tracing::info!("back online, revalidating inactive extensions");
                self.revalidate_inactive().await;
            }
        }
    }

    // ─── Readiness and queries ──────────────────────────────────────────

    /// Resolves once the current load pass has dispatched every cycle.
    pub async fn when_ready(&self) {
        let mut rx = self.ready.subscribe();
        let _ = rx.wait_for(|ready| *ready).await;
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Active handle for `key`, waiting for an in-flight load if needed.
    pub async fn when_extension_ready(&self, key: &ExtensionKey) -> Option<WorkerHandle> {
        {
            let workers = self.workers.read().await;
            if let Some(handle) = workers.active.get(key) {
                return Some(handle.clone());
            }
            if workers.inactive.contains_key(key) {
                return None;
            }
        }
        let cycle = self.loading.lock().await.get(key).cloned()?;
        cycle.await;
        self.workers.read().await.active.get(key).cloned()
    }

    pub async fn is_active(&self, key: &ExtensionKey) -> bool {
        self.workers.read().await.active.contains_key(key)
    }

    pub async fn is_inactive(&self, key: &ExtensionKey) -> bool {
        self.workers.read().await.inactive.contains_key(key)
    }

    pub async fn extension_state(&self, key: &ExtensionKey) -> ExtensionState {
        {
            let workers = self.workers.read().await;
            if workers.active.contains_key(key) {
                return ExtensionState::Active;
            }
            if workers.inactive.contains_key(key) {
                return ExtensionState::Inactive;
            }
        }
        if self.loading.lock().await.contains_key(key) {
            ExtensionState::Loading
        } else {
            ExtensionState::NotLoaded
        }
    }

    /// Every installed extension with its current state.
    pub async fn snapshot(&self) -> Vec<ExtensionStatus> {
        let settings = self.settings.value();
        let mut statuses = Vec::with_capacity(settings.sources_new.len());
        for (key, descriptor) in &settings.sources_new {
            statuses.push(ExtensionStatus {
                key: key.clone(),
                id: descriptor.id.clone(),
                name: descriptor.name.clone(),
                version: descriptor.version.clone(),
                update: descriptor.update.clone(),
                trusted: descriptor.trusted,
                enabled: settings
                    .extensions_new
                    .get(key)
                    .copied()
                    .unwrap_or_default()
                    .enabled,
                state: self.extension_state(key).await,
            });
        }
        statuses
    }

    // ─── Sources ────────────────────────────────────────────────────────

    /// Install every extension listed at `url`, or store it as a catalog.
    ///
    /// Concurrent calls for the same URL share one resolution.
    pub async fn add_source(self: &Arc<Self>, url: &str) -> AddSourceOutcome {
        let shared = {
            let mut pending = self.pending.lock().await;
            match pending.get(url) {
                Some(existing) => existing.clone(),
                None => {
                    let this = self.clone();
                    let owned = url.to_string();
                    let task = tokio::spawn(async move {
                        let outcome = this.install_source(&owned).await;
                        this.pending.lock().await.remove(&owned);
                        outcome
                    });
                    let shared = async move {
                        task.await.unwrap_or_else(|e| {
                            AddSourceOutcome::Failed(format!("source installation aborted: {e}"))
                        })
                    }
                    .boxed()
                    .shared();
                    pending.insert(url.to_string(), shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    async fn install_source(&self, url: &str) -> AddSourceOutcome {
        let entries = match self.resolver.try_resolve(url, false).await {
            Ok(entries) => entries,
            Err(e) => {
                let reason = if self.reporter.is_offline() {
                    "no network connection!"
                } else {
                    "the source is not valid."
                };
                self.reporter
                    .error("Failed to load source", &format!("{url}: {reason}"), &e);
                return AddSourceOutcome::Failed(format!(
                    "Failed to load extension(s) from the provided source '{url}': {reason}"
                ));
            }
        };

        match Manifest::classify(entries) {
            Ok(Manifest::Catalog(entries)) => {
                if self.store_catalog(url, entries) {
                    tracing::info!(url = %url, "stored source repository");
                    AddSourceOutcome::CatalogStored
                } else {
                    tracing::debug!(url = %url, "source repository unchanged");
                    AddSourceOutcome::CatalogUnchanged
                }
            }
            Ok(Manifest::Extensions(descriptors)) => {
                let keys = self.install(descriptors);
                tracing::info!(url = %url, count = keys.len(), "installed extensions");
                AddSourceOutcome::Installed(keys)
            }
            Err(e) => {
                self.reporter.error(
                    "Invalid extension format",
                    &format!("Invalid extension config: {url}"),
                    &e,
                );
                AddSourceOutcome::Failed(format!(
                    "Failed to load extension(s) from '{url}': invalid extension format."
                ))
            }
        }
    }

    /// Merge descriptors into settings with trust assigned.
    fn install(&self, descriptors: Vec<ExtensionDescriptor>) -> Vec<ExtensionKey> {
        let keys: Vec<ExtensionKey> = descriptors.iter().map(ExtensionDescriptor::key).collect();
        self.settings.update(|s| {
            for mut descriptor in descriptors {
                descriptor.trusted = is_trusted_id(&descriptor.id);
                let key = descriptor.key();
                s.extensions_new.entry(key.clone()).or_default();
                s.sources_new.insert(key, descriptor);
            }
        });
        keys
    }

    /// Store a catalog; false when it equals the stored one.
    fn store_catalog(&self, url: &str, entries: Vec<Value>) -> bool {
        if self.settings.value().extension_sources.get(url) == Some(&entries) {
            return false;
        }
        self.settings.update(|s| {
            s.extension_sources.insert(url.to_string(), entries);
        });
        true
    }

    /// Uninstall every extension whose update URL is `url`.
    pub async fn remove_source(&self, url: &str) {
        let settings = self.settings.value();
        let removed: Vec<(ExtensionKey, ExtensionKey)> = settings
            .sources_new
            .iter()
            .filter(|(_, descriptor)| descriptor.update == url)
            .map(|(key, descriptor)| (key.clone(), descriptor.key()))
            .collect();
        let has_catalog = settings.extension_sources.contains_key(url);
        if removed.is_empty() && !has_catalog {
            return;
        }

        {
            let mut workers = self.workers.write().await;
            for (_, worker_key) in &removed {
                terminate_all(workers.remove(worker_key));
            }
        }

        self.settings.update(|s| {
            for (key, _) in &removed {
                s.sources_new.remove(key);
                s.extensions_new.remove(key);
            }
            s.extension_sources.remove(url);
        });

        for (key, _) in &removed {
            if let Err(e) = self.cache.delete(EXTENSIONS_NAMESPACE, key.as_str()).await {
                tracing::debug!(key = %key, error = %e, "failed to delete cache entry for removed source");
            }
        }
        tracing::info!(url = %url, count = removed.len(), "removed source");
    }

    /// Flip the user toggle for `key`. False if `key` is not installed.
    pub fn set_enabled(&self, key: &ExtensionKey, enabled: bool) -> bool {
        if !self.settings.value().sources_new.contains_key(key) {
            return false;
        }
        self.settings.update(|s| {
            s.extensions_new.entry(key.clone()).or_default().enabled = enabled;
        });
        true
    }

    // ─── Updates ────────────────────────────────────────────────────────

    /// Reconcile installed descriptors with their latest manifests.
    ///
    /// Returns true when at least one extension was updated.
    pub async fn update_extensions(
        &self,
        current: &Sources,
        catalogs: &BTreeMap<String, Vec<Value>>,
    ) -> bool {
        if current.is_empty() {
            return false;
        }

        let urls: BTreeSet<&str> = current
            .values()
            .map(ExtensionDescriptor::update_source)
            .filter(|url| !url.is_empty())
            .collect();
        let manifests: Vec<Vec<Value>> = join_all(urls.iter().map(|url| self.resolver.resolve(url, true)))
            .await
            .into_iter()
            .flatten()
            .collect();
        if manifests.is_empty() {
            tracing::debug!("no manifests retrieved during update check");
            return false;
        }
        let latest: Vec<ExtensionDescriptor> = manifests
            .iter()
            .flat_map(|entries| Manifest::descriptors(entries))
            .collect();

        let queued: Vec<(ExtensionKey, ExtensionDescriptor)> = current
            .iter()
            .filter_map(|(key, installed)| {
                let candidate = latest.iter().find(|d| d.id == installed.id)?;
                (candidate.version != installed.version || candidate.update != installed.update)
                    .then(|| (key.clone(), candidate.clone()))
            })
            .collect();

        if queued.is_empty() {
            if !catalogs.is_empty() {
                tracing::debug!(count = catalogs.len(), "checking source repositories for updates");
                join_all(catalogs.keys().map(|url| self.update_catalog(url))).await;
            }
            return false;
        }

        {
            let mut workers = self.workers.write().await;
            for (key, _) in &queued {
                if let Some(handle) = workers.active.remove(key) {
                    handle.terminate();
                }
            }
        }

        let mut rekeyed = Vec::new();
        self.settings.update(|s| {
            for (old_key, latest) in &queued {
                let mut latest = latest.clone();
                latest.trusted = s
                    .sources_new
                    .get(old_key)
                    .or_else(|| current.get(old_key))
                    .is_some_and(|d| d.trusted);
                let new_key = latest.key();
                s.sources_new.insert(new_key.clone(), latest);
                if &new_key != old_key {
                    s.sources_new.remove(old_key);
                    if let Some(entry) = s.extensions_new.remove(old_key) {
                        s.extensions_new.insert(new_key, entry);
                    }
                    rekeyed.push(old_key.clone());
                }
            }
        });

        for old_key in &rekeyed {
            terminate_all(self.workers.write().await.remove(old_key));
            if let Err(e) = self.cache.delete(EXTENSIONS_NAMESPACE, old_key.as_str()).await {
                tracing::debug!(key = %old_key, error = %e, "failed to delete stale cache entry");
            }
        }

        let names = queued
            .iter()
            .map(|(key, _)| {
                current
                    .get(key)
                    .map_or_else(|| key.to_string(), |d| d.name.clone())
            })
            .collect::<Vec<_>>()
            .join(", ");
        tracing::info!(count = queued.len(), extensions = %names, "updated extensions");
        self.reporter.notice(
            &format!(
                "Updated {} extension{}",
                queued.len(),
                if queued.len() > 1 { "s" } else { "" }
            ),
            &names,
        );
        true
    }

    /// Refresh a stored catalog. True when it changed.
    pub async fn update_catalog(&self, url: &str) -> bool {
        let Some(entries) = self.resolver.resolve(url, true).await else {
            return false;
        };
        match Manifest::classify(entries) {
            Ok(Manifest::Catalog(entries)) => {
                let changed = self.store_catalog(url, entries);
                if changed {
                    tracing::info!(url = %url, "source repository updated");
                }
                changed
            }
            _ => false,
        }
    }

    // ─── Loading ────────────────────────────────────────────────────────

    /// Load every descriptor that is not already active.
    ///
    /// `update` skips the cache so freshly updated code is fetched.
    pub async fn load_extensions(self: &Arc<Self>, sources: Sources, update: bool) -> bool {
        if sources.is_empty() {
            self.ready.send_replace(true);
            return false;
        }

        let mut cycles = Vec::with_capacity(sources.len());
        {
            let mut loading = self.loading.lock().await;
            for (key, descriptor) in sources {
                if let Some(existing) = loading.get(&key) {
                    cycles.push(existing.clone());
                    continue;
                }
                let this = self.clone();
                let cycle_key = key.clone();
                let task = tokio::spawn(async move {
                    this.load_one(&cycle_key, &descriptor, update).await;
                    this.loading.lock().await.remove(&cycle_key);
                });
                let cycle = async move {
                    if let Err(e) = task.await {
                        tracing::error!(error = %e, "extension load cycle aborted");
                    }
                }
                .boxed()
                .shared();
                loading.insert(key, cycle.clone());
                cycles.push(cycle);
            }
        }

        self.ready.send_replace(true);
        join_all(cycles).await;
        true
    }

    /// Terminate every worker and load all installed extensions again.
    pub async fn reload_extensions(self: &Arc<Self>) -> bool {
        terminate_all(self.workers.write().await.drain());
        self.ready.send_replace(false);
        let sources = self.settings.value().sources_new;
        tracing::info!(count = sources.len(), "reloading extensions");
        self.load_extensions(sources, false).await
    }

    async fn load_one(&self, key: &ExtensionKey, descriptor: &ExtensionDescriptor, update: bool) {
        if self.is_active(key).await {
            return;
        }
        let Some(code) = self.module_code(key, descriptor, update).await else {
            return;
        };
        self.start_worker(key, descriptor, code).await;
    }

    async fn module_code(
        &self,
        key: &ExtensionKey,
        descriptor: &ExtensionDescriptor,
        update: bool,
    ) -> Option<ExtensionCode> {
        if !update {
            match self.cached_code(key).await {
                Some(code) => return Some(code),
                None => tracing::debug!(key = %key, "no usable cached module, fetching"),
            }
        }

        let name = if descriptor.name.is_empty() {
            &descriptor.id
        } else {
            &descriptor.name
        };
        match self.fetcher.fetch_code(name, &descriptor.entry_point()).await {
            Some(ExtensionCode::Module(bytes)) if descriptor.locale.is_none() => {
                Some(ExtensionCode::Module(self.store_code(key, bytes).await))
            }
            Some(code) if !code.is_blank() => Some(code),
            _ => {
                tracing::debug!(key = %key, "fetch failed, trying cached version");
                let cached = self.cached_code(key).await;
                if cached.is_none() {
                    tracing::debug!(key = %key, "no cache fallback, skipping extension");
                    if let Err(e) = self.cache.delete(EXTENSIONS_NAMESPACE, key.as_str()).await {
                        tracing::debug!(key = %key, error = %e, "failed to delete empty cache entry");
                    }
                }
                cached
            }
        }
    }

    /// Cached module bytes, stale entries included. Blank values are misses.
    async fn cached_code(&self, key: &ExtensionKey) -> Option<ExtensionCode> {
        match self.cache.get(EXTENSIONS_NAMESPACE, key.as_str(), true).await {
            Ok(Some(bytes)) if !is_blank(&bytes) => Some(ExtensionCode::Module(bytes)),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "failed to read cache");
                None
            }
        }
    }

    /// Write fresh code to the cache; falls back to the fetched bytes.
    async fn store_code(&self, key: &ExtensionKey, bytes: Vec<u8>) -> Vec<u8> {
        let days = rand::rng().random_range(CACHE_TTL_DAYS);
        let expires_at = Utc::now() + chrono::Duration::days(days);
        match self
            .cache
            .set(
                EXTENSIONS_NAMESPACE,
                key.as_str(),
                serde_json::json!({ "mappings": true }),
                bytes.clone(),
                expires_at,
            )
            .await
        {
            Ok(Some(stored)) if !is_blank(&stored) => stored,
            Ok(_) => {
                tracing::debug!(key = %key, "cache write failed, using code directly");
                bytes
            }
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "cache write failed, using code directly");
                bytes
            }
        }
    }

    async fn start_worker(
        &self,
        key: &ExtensionKey,
        descriptor: &ExtensionDescriptor,
        code: ExtensionCode,
    ) {
        let options = InitializeOptions {
            bypass_cors: self.config.cross_origin_blocked && descriptor.trusted,
        };
        let title = format!("Failed to load extension {key}");

        let handle = match self.supervisor.spawn(key, descriptor, options) {
            Ok(handle) => handle,
            Err(e) => {
                self.reporter.error(&title, "Initialization has failed", &e);
                return;
            }
        };

        let initialized = handle.initialize(key, code, options).await;
        let failure = match initialized {
            Ok(result) if result.validated => {
                let displaced = self.workers.write().await.activate(key.clone(), handle);
                terminate_all(displaced);
                self.settings.touch();
                tracing::info!(key = %key, "extension active");
                return;
            }
            Ok(result) => ExtensionError::Validation(
                result
                    .error
                    .unwrap_or_else(|| "extension rejected initialization".into()),
            ),
            Err(e) => e,
        };

        tracing::warn!(key = %key, error = %failure, "extension inactive");
        let displaced = self.workers.write().await.deactivate(key.clone(), handle);
        terminate_all(displaced);
        self.settings.touch();
        self.reporter.error(&title, "Initialization has failed", &failure);
    }

    // ─── Revalidation ───────────────────────────────────────────────────

    /// Revalidate an inactive worker; true if `key` is active afterwards.
    pub async fn validate_extension(&self, key: &ExtensionKey) -> bool {
        let handle = {
            let workers = self.workers.read().await;
            if workers.active.contains_key(key) {
                return true;
            }
            match workers.inactive.get(key) {
                Some(handle) => handle.clone(),
                None => return false,
            }
        };
        self.revalidate(key, handle).await
    }

    async fn revalidate_inactive(&self) {
        let inactive: Vec<(ExtensionKey, WorkerHandle)> = self
            .workers
            .read()
            .await
            .inactive
            .iter()
            .map(|(key, handle)| (key.clone(), handle.clone()))
            .collect();
        join_all(
            inactive
                .into_iter()
                .map(|(key, handle)| async move { self.revalidate(&key, handle).await }),
        )
        .await;
    }

    async fn revalidate(&self, key: &ExtensionKey, handle: WorkerHandle) -> bool {
        let failure = match handle.validate().await {
            Ok(true) => None,
            Ok(false) => Some(ExtensionError::Validation(
                "The content source appears to be unreachable.".into(),
            )),
            Err(e) => Some(e),
        };
        if let Some(e) = failure {
            self.reporter.error(
                &format!("Failed to load extension {key}"),
                "Validation has failed",
                &e,
            );
            return false;
        }

        let mut workers = self.workers.write().await;
        if workers.active.get(key).is_some_and(|h| h.same_instance(&handle)) {
            return true;
        }
        if !workers.inactive.get(key).is_some_and(|h| h.same_instance(&handle)) {
            // Replaced or removed while validating.
            return false;
        }
        let displaced = workers.activate(key.clone(), handle);
        drop(workers);
        terminate_all(displaced);
        self.settings.touch();
        tracing::info!(key = %key, "extension revalidated");
        true
    }
}
