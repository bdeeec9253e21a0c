//! Writes the settings store to disk whenever it changes.

use std::path::PathBuf;

use kitsune_extensions::SettingsStore;
use tokio::task::JoinHandle;

pub fn spawn(settings: SettingsStore, path: PathBuf) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = settings.subscribe();
        let mut last = rx.borrow_and_update().clone();
        while rx.changed().await.is_ok() {
            let current = rx.borrow_and_update().clone();
            // `touch` re-emits unchanged values.
            if current == last {
                continue;
            }
            last = current;
            match settings.save(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "settings saved"),
                Err(e) => tracing::error!(path = %path.display(), "failed to save settings: {e}"),
            }
        }
    })
}
