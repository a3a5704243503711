//! Boundary to the configuration store that providers read from.
//!
//! The engine never implements the store itself; it only defines the lookup
//! contract. [`InMemoryConfigStore`] exists for bootstrapping and tests.

use std::{
    collections::HashMap,
    fmt, fs,
    path::Path,
    sync::{Mutex, PoisonError},
};

use anyhow::{Context, Result, anyhow};
use confmap_types::{MappingIdentity, Properties};
use serde_json::Value;
use thiserror::Error;

/// The store could not answer a lookup at all (as opposed to answering "absent").
#[derive(Debug, Error)]
#[error("configuration '{kind}{}' unavailable: {reason}", instance.as_deref().map(|i| format!(":{i}")).unwrap_or_default())]
pub struct ConfigUnavailable {
    pub kind: String,
    pub instance: Option<String>,
    pub reason: String,
}

impl ConfigUnavailable {
    pub fn new(kind: impl Into<String>, instance: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            instance: instance.map(str::to_string),
            reason: reason.into(),
        }
    }
}

/// Lookup service keyed by configuration kind and optional instance id.
pub trait ConfigStore: Send + Sync + fmt::Debug {
    /// Returns the stored record, `Ok(None)` when no record exists.
    fn lookup(&self, kind: &str, instance: Option<&str>) -> Result<Option<Properties>, ConfigUnavailable>;
}

/// Store with no records.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyConfigStore;

impl ConfigStore for EmptyConfigStore {
    fn lookup(&self, _kind: &str, _instance: Option<&str>) -> Result<Option<Properties>, ConfigUnavailable> {
        Ok(None)
    }
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    records: Mutex<HashMap<MappingIdentity, Properties>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a JSON fixture of the form `{ "kind": {...}, "kind:instance": {...} }`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("read store file {}", path.display()))?;
        let raw: Value = serde_json::from_str(&content).with_context(|| format!("parse store file {}", path.display()))?;
        let Value::Object(entries) = raw else {
            return Err(anyhow!("store file {} must contain a JSON object", path.display()));
        };

        let store = Self::new();
        for (key, record) in entries {
            let identity: MappingIdentity = key.parse().with_context(|| format!("invalid store key '{key}'"))?;
            let Value::Object(fields) = record else {
                return Err(anyhow!("store record '{key}' must be a JSON object"));
            };
            store.insert(identity, fields.into_iter().collect());
        }
        Ok(store)
    }

    pub fn insert(&self, identity: MappingIdentity, record: Properties) -> Option<Properties> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).insert(identity, record)
    }

    pub fn remove(&self, identity: &MappingIdentity) -> Option<Properties> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).remove(identity)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn lookup(&self, kind: &str, instance: Option<&str>) -> Result<Option<Properties>, ConfigUnavailable> {
        let identity = MappingIdentity::with_optional_instance(kind, instance.map(str::to_string));
        Ok(self.records.lock().unwrap_or_else(PoisonError::into_inner).get(&identity).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_memory_store_distinguishes_instances() {
        let store = InMemoryConfigStore::new();
        store.insert(MappingIdentity::new("ddf.platform"), Properties::from([("host".to_string(), json!("a"))]));
        store.insert(
            MappingIdentity::instance("ddf.platform", "east"),
            Properties::from([("host".to_string(), json!("b"))]),
        );

        let singleton = store.lookup("ddf.platform", None).expect("lookup").expect("record");
        assert_eq!(singleton["host"], json!("a"));
        let east = store.lookup("ddf.platform", Some("east")).expect("lookup").expect("record");
        assert_eq!(east["host"], json!("b"));
        assert!(store.lookup("ddf.platform", Some("west")).expect("lookup").is_none());
    }

    #[test]
    fn loads_json_fixture() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        fs::write(&path, r#"{ "ddf.platform": { "port": 8993 }, "ddf.sts:primary": { "issuer": "local" } }"#).expect("write");

        let store = InMemoryConfigStore::from_json_file(&path).expect("load store");
        assert_eq!(store.len(), 2);
        let sts = store.lookup("ddf.sts", Some("primary")).expect("lookup").expect("record");
        assert_eq!(sts["issuer"], json!("local"));
    }

    #[test]
    fn rejects_non_object_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        fs::write(&path, r#"{ "ddf.platform": [1, 2] }"#).expect("write");

        let err = InMemoryConfigStore::from_json_file(&path).expect_err("array record rejected");
        assert!(err.to_string().contains("ddf.platform"));
    }

    #[test]
    fn unavailable_display_includes_instance() {
        let err = ConfigUnavailable::new("ddf.sts", Some("primary"), "not loaded");
        assert_eq!(err.to_string(), "configuration 'ddf.sts:primary' unavailable: not loaded");
        let err = ConfigUnavailable::new("ddf.sts", None, "not loaded");
        assert_eq!(err.to_string(), "configuration 'ddf.sts' unavailable: not loaded");
    }
}
