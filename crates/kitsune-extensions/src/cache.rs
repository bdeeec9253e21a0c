//! Key-value cache façade with expiry.
//!
//! The runtime only depends on [`CacheStore`]; hosts plug in their own
//! persistent store. [`MemoryCache`] is the in-process default.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::ExtensionError;

/// Namespace holding extension module code.
pub const EXTENSIONS_NAMESPACE: &str = "extensions";

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Read an entry. Expired entries are returned only with `allow_stale`.
    async fn get(
        &self,
        namespace: &str,
        key: &str,
        allow_stale: bool,
    ) -> Result<Option<Vec<u8>>, ExtensionError>;

    /// Store an entry and return the stored value.
    async fn set(
        &self,
        namespace: &str,
        key: &str,
        metadata: serde_json::Value,
        value: Vec<u8>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Vec<u8>>, ExtensionError>;

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), ExtensionError>;
}

/// Metadata passed to [`CacheStore::set`] is not kept.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// In-memory cache, keyed by `(namespace, key)`.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(
        &self,
        namespace: &str,
        key: &str,
        allow_stale: bool,
    ) -> Result<Option<Vec<u8>>, ExtensionError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(namespace.to_string(), key.to_string()))
            .filter(|entry| allow_stale || entry.expires_at > Utc::now())
            .map(|entry| entry.value.clone()))
    }

    async fn set(
        &self,
        namespace: &str,
        key: &str,
        _metadata: serde_json::Value,
        value: Vec<u8>,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Vec<u8>>, ExtensionError> {
        let mut entries = self.entries.write().await;
        entries.insert(
            (namespace.to_string(), key.to_string()),
            CacheEntry {
                value: value.clone(),
                expires_at,
            },
        );
        Ok(Some(value))
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<(), ExtensionError> {
        self.entries
            .write()
            .await
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }
}

/// Empty or whitespace-only values count as a miss.
pub fn is_blank(value: &[u8]) -> bool {
    value.iter().all(u8::is_ascii_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = MemoryCache::new();
        let stored = cache
            .set(
                EXTENSIONS_NAMESPACE,
                "https://x/a",
                serde_json::json!({"mappings": true}),
                b"\0asm".to_vec(),
                Utc::now() + Duration::days(7),
            )
            .await
            .unwrap();
        assert_eq!(stored.as_deref(), Some(&b"\0asm"[..]));
        let got = cache
            .get(EXTENSIONS_NAMESPACE, "https://x/a", false)
            .await
            .unwrap();
        assert_eq!(got.as_deref(), Some(&b"\0asm"[..]));
    }

    #[tokio::test]
    async fn test_expired_entry_needs_allow_stale() {
        let cache = MemoryCache::new();
        cache
            .set(
                EXTENSIONS_NAMESPACE,
                "k",
                serde_json::Value::Null,
                b"code".to_vec(),
                Utc::now() - Duration::seconds(1),
            )
            .await
            .unwrap();
        assert!(cache
            .get(EXTENSIONS_NAMESPACE, "k", false)
            .await
            .unwrap()
            .is_none());
        assert!(cache
            .get(EXTENSIONS_NAMESPACE, "k", true)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated_and_delete() {
        let cache = MemoryCache::new();
        let later = Utc::now() + Duration::days(1);
        cache
            .set("a", "k", serde_json::Value::Null, b"1".to_vec(), later)
            .await
            .unwrap();
        assert!(cache.get("b", "k", true).await.unwrap().is_none());
        cache.delete("a", "k").await.unwrap();
        assert!(cache.is_empty().await);
    }

    #[test]
    fn test_is_blank() {
        assert!(is_blank(b""));
        assert!(is_blank(b" \n\t"));
        assert!(!is_blank(b"\0asm"));
    }
}
