// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use crate::StoreError;

/// Write `value` to `path` atomically: serialise into a temp file in the same
/// directory, then rename over the target.  Readers never observe a partial
/// file.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(tmp.as_file(), value)?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// A single keyed mapping persisted as one JSON file, written atomically on
/// every mutation and loaded on open.
///
/// Entries keep their insertion order — routing ties and provider resolution
/// both depend on it — which is why the in-memory form is a `Vec` of pairs
/// rather than a map.
pub struct KeyedStore<T> {
    path: PathBuf,
    entries: Mutex<Vec<(String, T)>>,
}

impl<T: Serialize + DeserializeOwned + Clone> KeyedStore<T> {
    /// Open the store at `path`.  A missing file is an empty store; a file
    /// that fails to parse is an error surfaced to the caller.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let entries = if path.is_file() {
            let text = std::fs::read_to_string(&path)?;
            let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&text)?;
            let mut entries = Vec::with_capacity(map.len());
            for (k, v) in map {
                entries.push((k, serde_json::from_value(v)?));
            }
            entries
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), count = entries.len(), "opened keyed store");
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().unwrap().iter().any(|(k, _)| k == key)
    }

    /// Insert or replace `key`, persisting the whole mapping.  A replaced
    /// entry keeps its original position.
    pub fn insert(&self, key: impl Into<String>, value: T) -> Result<(), StoreError> {
        let key = key.into();
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => entries.push((key, value)),
        }
        self.persist(&entries)
    }

    /// Remove `key`; returns the removed value if it was present.
    pub fn remove(&self, key: &str) -> Result<Option<T>, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let pos = entries.iter().position(|(k, _)| k == key);
        let removed = pos.map(|i| entries.remove(i).1);
        if removed.is_some() {
            self.persist(&entries)?;
        }
        Ok(removed)
    }

    /// All values in insertion order.
    pub fn values(&self) -> Vec<T> {
        self.entries.lock().unwrap().iter().map(|(_, v)| v.clone()).collect()
    }

    /// All `(key, value)` pairs in insertion order.
    pub fn entries(&self) -> Vec<(String, T)> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    fn persist(&self, entries: &[(String, T)]) -> Result<(), StoreError> {
        let mut map = serde_json::Map::new();
        for (k, v) in entries {
            map.insert(k.clone(), serde_json::to_value(v)?);
        }
        atomic_write_json(&self.path, &map)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
