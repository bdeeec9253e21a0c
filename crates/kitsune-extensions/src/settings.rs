//! Observable settings store holding installed sources.
//!
//! The store is the single source of truth for what is installed. The
//! runtime manager subscribes to it and re-derives its in-memory worker
//! state from every change.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::descriptor::{ExtensionDescriptor, ExtensionKey, RuntimeEntry};
use crate::error::ExtensionError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSettings {
    /// Installed extensions by key.
    #[serde(default)]
    pub sources_new: BTreeMap<ExtensionKey, ExtensionDescriptor>,
    /// Per-key enable toggles.
    #[serde(default)]
    pub extensions_new: BTreeMap<ExtensionKey, RuntimeEntry>,
    /// Source repository catalogs by URL.
    #[serde(default)]
    pub extension_sources: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    tx: watch::Sender<ExtensionSettings>,
}

impl SettingsStore {
    pub fn new(initial: ExtensionSettings) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Load settings from a JSON file; a missing file yields defaults.
    pub async fn load(path: &Path) -> Result<Self, ExtensionError> {
        let settings = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no settings file, starting empty");
                ExtensionSettings::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self::new(settings))
    }

    /// Write the current value to a JSON file.
    pub async fn save(&self, path: &Path) -> Result<(), ExtensionError> {
        let bytes = serde_json::to_vec_pretty(&self.value())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    pub fn subscribe(&self) -> watch::Receiver<ExtensionSettings> {
        self.tx.subscribe()
    }

    pub fn value(&self) -> ExtensionSettings {
        self.tx.borrow().clone()
    }

    /// Mutate the settings and notify subscribers.
    pub fn update(&self, f: impl FnOnce(&mut ExtensionSettings)) {
        self.tx.send_modify(f);
    }

    /// Re-emit the current value so observers refresh.
    pub fn touch(&self) {
        self.tx.send_modify(|_| {});
    }
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self::new(ExtensionSettings::default())
    }
}
