//! Writes resolved property maps into JSON files.
//!
//! In [`SyncMode::Overwrite`] the file holds exactly the resolved map. In
//! [`SyncMode::Merge`] keys the map manages are replaced, keys explicitly
//! removed during resolution are deleted, and every other key already in the
//! file is preserved.

use std::{
    fs,
    io::{ErrorKind, Write},
    path::Path,
};

use confmap_types::Properties;
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncMode {
    /// Replace the whole file with the resolved map.
    #[default]
    Overwrite,
    /// Update managed keys and leave unmanaged keys alone.
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Written,
    /// The file already held the target content.
    Unchanged,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync I/O error for '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sync serialization error for '{path}': {source}")]
    Serialization {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("existing file '{path}' does not contain a JSON object")]
    NotAnObject { path: String },
}

impl SyncError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn serialization(path: &Path, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Brings the JSON object stored at `path` in line with `properties`.
///
/// `removed` lists keys that resolution deleted explicitly; merge mode drops
/// them from the existing file. The file is replaced atomically and left
/// untouched when its content would not change.
pub fn sync_json_file(path: &Path, properties: &Properties, removed: &[String], mode: SyncMode) -> Result<SyncOutcome, SyncError> {
    let existing = read_object(path)?;
    let target = match mode {
        SyncMode::Overwrite => properties_to_object(properties),
        SyncMode::Merge => {
            let mut merged = existing.clone().unwrap_or_default();
            for key in removed {
                merged.remove(key);
            }
            for (key, value) in properties {
                merged.insert(key.clone(), value.clone());
            }
            merged
        }
    };

    if existing.as_ref() == Some(&target) {
        debug!(path = %path.display(), "sync target already up to date");
        return Ok(SyncOutcome::Unchanged);
    }

    write_atomically(path, &Value::Object(target))?;
    debug!(path = %path.display(), mode = ?mode, "sync target written");
    Ok(SyncOutcome::Written)
}

fn properties_to_object(properties: &Properties) -> JsonMap<String, Value> {
    properties
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn read_object(path: &Path) -> Result<Option<JsonMap<String, Value>>, SyncError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(SyncError::io(path, error)),
    };
    if content.trim().is_empty() {
        return Ok(Some(JsonMap::new()));
    }
    match serde_json::from_str(&content).map_err(|error| SyncError::serialization(path, error))? {
        Value::Object(object) => Ok(Some(object)),
        _ => Err(SyncError::NotAnObject {
            path: path.display().to_string(),
        }),
    }
}

fn write_atomically(path: &Path, value: &Value) -> Result<(), SyncError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|error| SyncError::io(path, error))?;

    let mut content = serde_json::to_string_pretty(value).map_err(|error| SyncError::serialization(path, error))?;
    content.push('\n');

    let mut temp = NamedTempFile::new_in(parent).map_err(|error| SyncError::io(path, error))?;
    temp.write_all(content.as_bytes()).map_err(|error| SyncError::io(path, error))?;
    temp.persist(path).map_err(|error| SyncError::io(path, error.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(entries: &[(&str, Value)]) -> Properties {
        entries.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
    }

    fn read(path: &Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).expect("read synced file")).expect("parse synced file")
    }

    #[test]
    fn overwrite_replaces_whole_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sts.json");
        fs::write(&path, r#"{ "unmanaged": 1, "issuer": "old" }"#).expect("seed");

        let outcome = sync_json_file(&path, &props(&[("issuer", json!("new"))]), &[], SyncMode::Overwrite).expect("sync");
        assert_eq!(outcome, SyncOutcome::Written);
        assert_eq!(read(&path), json!({ "issuer": "new" }));
    }

    #[test]
    fn merge_preserves_unmanaged_and_drops_removed_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sts.json");
        fs::write(&path, r#"{ "unmanaged": 1, "issuer": "old", "legacy": true }"#).expect("seed");

        let removed = vec!["legacy".to_string()];
        sync_json_file(&path, &props(&[("issuer", json!("new"))]), &removed, SyncMode::Merge).expect("sync");
        assert_eq!(read(&path), json!({ "unmanaged": 1, "issuer": "new" }));
    }

    #[test]
    fn missing_file_is_created_with_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("out.json");

        let outcome = sync_json_file(&path, &props(&[("a", json!(1))]), &[], SyncMode::Merge).expect("sync");
        assert_eq!(outcome, SyncOutcome::Written);
        assert_eq!(read(&path), json!({ "a": 1 }));
    }

    #[test]
    fn unchanged_content_is_not_rewritten() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.json");
        let properties = props(&[("a", json!(1))]);

        assert_eq!(sync_json_file(&path, &properties, &[], SyncMode::Overwrite).expect("first"), SyncOutcome::Written);
        assert_eq!(sync_json_file(&path, &properties, &[], SyncMode::Overwrite).expect("second"), SyncOutcome::Unchanged);
        assert_eq!(sync_json_file(&path, &properties, &[], SyncMode::Merge).expect("merge"), SyncOutcome::Unchanged);
    }

    #[test]
    fn non_object_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.json");
        fs::write(&path, "[1, 2, 3]").expect("seed");

        let error = sync_json_file(&path, &props(&[("a", json!(1))]), &[], SyncMode::Merge).expect_err("array rejected");
        assert!(matches!(error, SyncError::NotAnObject { .. }));
    }
}
