//! Manifest entries, extension descriptors and their identity keys.
//!
//! Manifests are untyped JSON arrays. Every entry is classified at the
//! ingestion boundary as a catalog listing, an installable extension, or
//! an invalid entry before anything reaches the settings store.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ExtensionError;

/// Fields every installable manifest entry must carry.
pub const REQUIRED_FIELDS: &[&str] = &["id", "name", "version", "main", "update"];

/// Ids matching any of these (case-insensitive) are trusted.
const TRUSTED_ID_PATTERNS: &[&str] = &["nyaa", "sukebei"];

/// Whether an extension id is on the trust allow-list.
pub fn is_trusted_id(id: &str) -> bool {
    let id = id.to_lowercase();
    TRUSTED_ID_PATTERNS.iter().any(|p| id.contains(p))
}

// ─── Key ────────────────────────────────────────────────────────────────

/// Identity of an installed extension: `(locale ?? update + '/') + id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtensionKey(String);

impl ExtensionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExtensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ExtensionKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExtensionKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ExtensionKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ─── Descriptor ─────────────────────────────────────────────────────────

/// An installable extension as listed in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    pub id: String,
    pub name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,
    pub main: String,
    pub update: String,
    /// Base path for extensions loaded from a local source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default)]
    pub trusted: bool,
    /// Manifest fields the runtime does not interpret (icon, type, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Versions are opaque, but some manifests publish them as numbers.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "version must be a string or number, got {other}"
        ))),
    }
}

impl ExtensionDescriptor {
    /// The base every relative locator of this descriptor hangs off.
    pub fn origin(&self) -> String {
        match &self.locale {
            Some(locale) => locale.clone(),
            None => format!("{}/", self.update),
        }
    }

    pub fn key(&self) -> ExtensionKey {
        ExtensionKey(format!("{}{}", self.origin(), self.id))
    }

    /// Locator of the extension's entry point.
    pub fn entry_point(&self) -> String {
        format!("{}{}", self.origin(), self.main)
    }

    /// URL used when checking this extension for updates.
    pub fn update_source(&self) -> &str {
        self.locale.as_deref().unwrap_or(&self.update)
    }

    /// Parse a raw manifest entry, enforcing the required fields.
    pub fn from_value(value: &Value) -> Result<Self, ExtensionError> {
        if !is_well_formed(value) {
            return Err(ExtensionError::InvalidDescriptor(value.to_string()));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| ExtensionError::InvalidDescriptor(format!("{value}: {e}")))
    }
}

/// Per-key user toggle, independent of load state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeEntry {
    pub enabled: bool,
}

impl Default for RuntimeEntry {
    fn default() -> Self {
        Self { enabled: true }
    }
}

// ─── Classification ─────────────────────────────────────────────────────

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(_) => true,
    }
}

/// An object carrying every required field.
pub fn is_well_formed(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| REQUIRED_FIELDS.iter().all(|field| obj.contains_key(*field)))
}

/// A listing in a source repository: has a `main` but no `update`.
pub fn is_catalog_entry(value: &Value) -> bool {
    truthy(value.get("main")) && !truthy(value.get("update"))
}

/// One manifest entry after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum ManifestEntry {
    Catalog(Value),
    Extension(ExtensionDescriptor),
    Invalid(Value),
}

impl ManifestEntry {
    pub fn classify(value: &Value) -> Self {
        if is_catalog_entry(value) {
            return Self::Catalog(value.clone());
        }
        match ExtensionDescriptor::from_value(value) {
            Ok(descriptor) => Self::Extension(descriptor),
            Err(_) => Self::Invalid(value.clone()),
        }
    }
}

/// A whole manifest after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    /// Every entry is a catalog listing (source repository).
    Catalog(Vec<Value>),
    /// Every entry is a well-formed installable extension.
    Extensions(Vec<ExtensionDescriptor>),
}

impl Manifest {
    /// Classify a manifest; a single invalid entry rejects the batch.
    pub fn classify(entries: Vec<Value>) -> Result<Self, ExtensionError> {
        if entries.iter().all(is_catalog_entry) {
            return Ok(Self::Catalog(entries));
        }
        entries
            .iter()
            .map(ExtensionDescriptor::from_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Self::Extensions)
    }

    /// Well-formed descriptors only, dropping anything else.
    pub fn descriptors(entries: &[Value]) -> Vec<ExtensionDescriptor> {
        entries
            .iter()
            .filter_map(|entry| match ManifestEntry::classify(entry) {
                ManifestEntry::Extension(descriptor) => Some(descriptor),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(update: &str, locale: Option<&str>) -> ExtensionDescriptor {
        ExtensionDescriptor {
            id: "a".into(),
            name: "A".into(),
            version: "1".into(),
            main: "a.wasm".into(),
            update: update.into(),
            locale: locale.map(str::to_string),
            trusted: false,
            extra: Map::new(),
        }
    }

    #[test]
    fn test_key_from_update_url() {
        let d = descriptor("https://x", None);
        assert_eq!(d.key().as_str(), "https://x/a");
        assert_eq!(d.key(), d.key());
        assert_eq!(d.entry_point(), "https://x/a.wasm");
    }

    #[test]
    fn test_key_prefers_locale() {
        let d = descriptor("https://x", Some("extension://home/me/exts/"));
        assert_eq!(d.key().as_str(), "extension://home/me/exts/a");
        assert_eq!(d.update_source(), "extension://home/me/exts/");
    }

    #[test]
    fn test_key_changes_with_update_or_id() {
        let a = descriptor("https://x", None);
        let mut b = a.clone();
        b.version = "2".into();
        assert_eq!(a.key(), b.key());
        b.update = "https://y".into();
        assert_ne!(a.key(), b.key());
        let mut c = a.clone();
        c.id = "b".into();
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_trusted_ids() {
        assert!(is_trusted_id("nyaa"));
        assert!(is_trusted_id("NyaaSI"));
        assert!(is_trusted_id("sukebei-nyaa"));
        assert!(!is_trusted_id("animetosho"));
    }

    #[test]
    fn test_from_value_requires_all_fields() {
        let value = json!({"id": "a", "name": "A", "version": "1", "main": "a.wasm"});
        assert!(matches!(
            ExtensionDescriptor::from_value(&value),
            Err(ExtensionError::InvalidDescriptor(_))
        ));
        assert!(ExtensionDescriptor::from_value(&json!(null)).is_err());
    }

    #[test]
    fn test_from_value_numeric_version_and_extra_fields() {
        let value = json!({
            "id": "a", "name": "A", "version": 3, "main": "a.wasm",
            "update": "https://x", "icon": "https://x/icon.png"
        });
        let d = ExtensionDescriptor::from_value(&value).unwrap();
        assert_eq!(d.version, "3");
        assert_eq!(d.extra["icon"], "https://x/icon.png");
        assert!(!d.trusted);
        let back = serde_json::to_value(&d).unwrap();
        assert_eq!(back["icon"], "https://x/icon.png");
        assert!(back.get("locale").is_none());
    }

    #[test]
    fn test_classify_catalog() {
        let entries = vec![
            json!({"main": "gh:owner/repo", "name": "Repo"}),
            json!({"main": "npm:pkg", "update": ""}),
        ];
        assert!(matches!(
            Manifest::classify(entries),
            Ok(Manifest::Catalog(e)) if e.len() == 2
        ));
    }

    #[test]
    fn test_classify_extensions() {
        let entries = vec![json!({
            "id": "a", "name": "A", "version": "1", "main": "a.wasm", "update": "https://x"
        })];
        match Manifest::classify(entries).unwrap() {
            Manifest::Extensions(d) => assert_eq!(d[0].key().as_str(), "https://x/a"),
            other => panic!("expected extensions, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_rejects_batch_with_one_invalid_entry() {
        let entries = vec![
            json!({"id": "a", "name": "A", "version": "1", "main": "a.wasm", "update": "https://x"}),
            json!({"id": "b", "name": "B"}),
        ];
        assert!(Manifest::classify(entries).is_err());
    }

    #[test]
    fn test_descriptors_filters_invalid() {
        let entries = vec![
            json!({"id": "a", "name": "A", "version": "1", "main": "a.wasm", "update": "https://x"}),
            json!({"id": "b"}),
            json!(42),
        ];
        let d = Manifest::descriptors(&entries);
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].id, "a");
    }

    #[test]
    fn test_manifest_entry_variants() {
        assert!(matches!(
            ManifestEntry::classify(&json!({"main": "x"})),
            ManifestEntry::Catalog(_)
        ));
        assert!(matches!(
            ManifestEntry::classify(&json!({"main": "x", "update": "https://x"})),
            ManifestEntry::Invalid(_)
        ));
    }

    #[test]
    fn test_runtime_entry_default_enabled() {
        assert!(RuntimeEntry::default().enabled);
    }
}
