//! Record store persistence.
//!
//! The store is a pretty-printed JSON document:
//!
//! ```json
//! { "version": 1, "apps": { "<key>": { ...record... } } }
//! ```
//!
//! Loading never fails. A missing, unreadable, malformed or
//! version-mismatched file yields an empty mapping and the next pass
//! rebuilds it from disk.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AppIndexError, Result};
use crate::types::Records;

/// Store format version - increment when changing the record layout.
pub const STORE_VERSION: u32 = 1;

#[derive(Deserialize)]
struct PersistedStore {
    version: u32,
    apps: Records,
}

#[derive(Serialize)]
struct PersistedStoreRef<'a> {
    version: u32,
    apps: &'a Records,
}

/// Result of reading the store file.
#[derive(Debug)]
pub enum StoreLoad {
    Loaded(Records),
    Missing,
    Corrupt(String),
}

impl StoreLoad {
    /// Records to start from; empty unless the file was read cleanly.
    pub fn into_records(self) -> Records {
        match self {
            Self::Loaded(records) => records,
            Self::Missing | Self::Corrupt(_) => Records::new(),
        }
    }

    /// True when the file on disk does not reflect any usable state.
    pub fn needs_rewrite(&self) -> bool {
        !matches!(self, Self::Loaded(_))
    }
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
}

impl CacheStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> StoreLoad {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return StoreLoad::Missing,
            Err(error) => {
                log::warn!("app store read failed for {}: {error}", self.path.display());
                return StoreLoad::Corrupt(error.to_string());
            }
        };

        let store: PersistedStore = match serde_json::from_slice(&bytes) {
            Ok(store) => store,
            Err(error) => {
                log::warn!("app store parse failed for {}: {error}", self.path.display());
                return StoreLoad::Corrupt(error.to_string());
            }
        };

        if store.version != STORE_VERSION {
            log::debug!(
                "app store version mismatch: {} != {}",
                store.version,
                STORE_VERSION
            );
            return StoreLoad::Corrupt(format!("unsupported store version {}", store.version));
        }

        let mut apps = store.apps;
        for (key, record) in apps.iter_mut() {
            if record.key != *key {
                record.key = key.clone();
            }
        }
        log::debug!(
            "loaded app store from {} ({} apps)",
            self.path.display(),
            apps.len()
        );
        StoreLoad::Loaded(apps)
    }

    /// Reads the store, falling back to an empty mapping.
    pub fn load(&self) -> Records {
        self.read().into_records()
    }

    /// Drops records with duplicate display names, then writes the mapping
    /// atomically (temp file + rename).
    ///
    /// Returns the keys removed as duplicates.
    pub fn save(&self, records: &mut Records) -> Result<Vec<String>> {
        let dropped: Vec<String> = dedup_by_name(records)
            .into_iter()
            .map(|duplicate| {
                log::debug!(
                    "dropping duplicate app {} from store (name held by {})",
                    duplicate.key,
                    duplicate.owner
                );
                duplicate.key
            })
            .collect();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                AppIndexError::Internal(format!(
                    "failed to create app store directory {}: {error}",
                    parent.display()
                ))
            })?;
        }

        let serialized = serde_json::to_vec_pretty(&PersistedStoreRef {
            version: STORE_VERSION,
            apps: records,
        })?;

        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, serialized).map_err(|error| {
            AppIndexError::Internal(format!(
                "failed to write app store {}: {error}",
                tmp_path.display()
            ))
        })?;
        fs::rename(&tmp_path, &self.path).map_err(|error| {
            AppIndexError::Internal(format!(
                "failed to finalize app store {}: {error}",
                self.path.display()
            ))
        })?;

        log::debug!(
            "wrote app store to {} ({} apps)",
            self.path.display(),
            records.len()
        );
        Ok(dropped)
    }
}

/// A record dropped because an earlier key already holds its display name.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Duplicate {
    pub key: String,
    pub location: PathBuf,
    /// Key of the record that keeps the name.
    pub owner: String,
}

/// Keeps the first record (in key order) for every display name.
pub fn dedup_by_name(records: &mut Records) -> Vec<Duplicate> {
    let mut owners: HashMap<String, String> = HashMap::new();
    let mut dropped = Vec::new();
    records.retain(|key, record| match owners.get(&record.name) {
        Some(owner) => {
            dropped.push(Duplicate {
                key: key.clone(),
                location: record.location.clone(),
                owner: owner.clone(),
            });
            false
        }
        None => {
            owners.insert(record.name.clone(), key.clone());
            true
        }
    });
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AppRecord, BundleTimestamps};
    use tempfile::tempdir;

    fn record(key: &str, name: &str) -> AppRecord {
        let mut record = AppRecord::new(
            key.to_string(),
            PathBuf::from(format!("/Applications/{name}.app")),
            name.to_string(),
        );
        record.metadata = Some(BundleTimestamps {
            created: 1,
            opened: 2,
        });
        record.viewer_for.insert("txt".to_string());
        record
    }

    #[test]
    fn save_then_load_returns_same_records() {
        let dir = tempdir().expect("tempdir");
        let store = CacheStore::new(dir.path().join("apps.json"));
        let mut records = Records::new();
        records.insert("notes".to_string(), record("notes", "Notes"));
        records.insert("safari".to_string(), record("safari", "Safari"));

        store.save(&mut records).expect("save");
        let loaded = store.load();
        assert_eq!(loaded, records);
    }

    #[test]
    fn save_drops_later_duplicate_names() {
        let dir = tempdir().expect("tempdir");
        let store = CacheStore::new(dir.path().join("apps.json"));
        let mut records = Records::new();
        records.insert("chrome".to_string(), record("chrome", "Chrome"));
        records.insert("chrome beta".to_string(), record("chrome beta", "Chrome"));
        records.insert("zed".to_string(), record("zed", "Zed"));

        let dropped = store.save(&mut records).expect("save");
        assert_eq!(dropped, vec!["chrome beta".to_string()]);

        let loaded = store.load();
        let names: Vec<_> = loaded.values().map(|record| record.name.as_str()).collect();
        assert_eq!(names, vec!["Chrome", "Zed"]);
        assert!(loaded.contains_key("chrome"));
    }

    #[test]
    fn dedup_reports_owner_of_each_dropped_name() {
        let mut records = Records::new();
        records.insert("chrome".to_string(), record("chrome", "Chrome"));
        records.insert("chrome canary".to_string(), record("chrome canary", "Chrome"));
        records.insert("chromium".to_string(), record("chromium", "Chromium"));

        let dropped = dedup_by_name(&mut records);
        assert_eq!(
            dropped,
            vec![Duplicate {
                key: "chrome canary".to_string(),
                location: PathBuf::from("/Applications/Chrome.app"),
                owner: "chrome".to_string(),
            }]
        );
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn missing_store_is_empty() {
        let dir = tempdir().expect("tempdir");
        let store = CacheStore::new(dir.path().join("absent.json"));
        assert!(matches!(store.read(), StoreLoad::Missing));
        assert!(store.load().is_empty());
    }

    #[test]
    fn corrupt_store_is_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        fs::write(&path, "{ this is not json").expect("write");
        let store = CacheStore::new(path);
        let load = store.read();
        assert!(load.needs_rewrite());
        assert!(matches!(load, StoreLoad::Corrupt(_)));
        assert!(store.load().is_empty());
    }

    #[test]
    fn version_mismatch_is_treated_as_corrupt() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        fs::write(&path, r#"{ "version": 99, "apps": {} }"#).expect("write");
        assert!(matches!(CacheStore::new(path).read(), StoreLoad::Corrupt(_)));
    }

    #[test]
    fn loaded_keys_match_map_keys() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("apps.json");
        fs::write(
            &path,
            r#"{ "version": 1, "apps": { "mail": { "key": "stale", "location": "/Applications/Mail.app", "name": "Mail" } } }"#,
        )
        .expect("write");
        let records = CacheStore::new(path).load();
        assert_eq!(records["mail"].key, "mail");
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let dir = tempdir().expect("tempdir");
        let store = CacheStore::new(dir.path().join("apps.json"));
        let mut records = Records::new();
        records.insert("notes".to_string(), record("notes", "Notes"));
        store.save(&mut records).expect("save");
        assert!(!dir.path().join("apps.tmp").exists());
        assert!(dir.path().join("apps.json").exists());
    }
}
