//! User-visible failure notifications.

use std::sync::Arc;

use crate::connectivity::ConnectivityMonitor;
use crate::error::ExtensionError;

/// Sink for user-visible notifications. Implementations must not fail.
pub trait Notifier: Send + Sync {
    fn report(&self, title: &str, description: &str, error: &ExtensionError);

    /// Informational notice (e.g. extensions were updated).
    fn notice(&self, title: &str, description: &str) {
        tracing::info!(title = %title, "{description}");
    }
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn report(&self, title: &str, description: &str, error: &ExtensionError) {
        tracing::error!(title = %title, "{description}: {error}");
    }
}

/// Routes failures to the notifier unless the host is offline.
#[derive(Clone)]
pub struct Reporter {
    notifier: Arc<dyn Notifier>,
    connectivity: ConnectivityMonitor,
}

impl Reporter {
    pub fn new(notifier: Arc<dyn Notifier>, connectivity: ConnectivityMonitor) -> Self {
        Self {
            notifier,
            connectivity,
        }
    }

    pub fn error(&self, title: &str, description: &str, error: &ExtensionError) {
        if self.connectivity.is_offline() {
            tracing::debug!(title = %title, "offline, suppressing report: {error}");
            return;
        }
        self.notifier.report(title, description, error);
    }

    pub fn notice(&self, title: &str, description: &str) {
        self.notifier.notice(title, description);
    }

    pub fn is_offline(&self) -> bool {
        self.connectivity.is_offline()
    }
}
