// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::{read_json, write_json};

/// Simple persisted key-value preferences
///
/// Reads never fail: a missing key reads as empty. Writes are grouped into a
/// [`PreferencesEdit`] that is applied atomically, so related keys (such as
/// the added/removed pair of a change tracker) are never observed half
/// updated.
pub trait Preferences: Send + Sync {
    fn string_set(&self, key: &str) -> BTreeSet<String>;

    fn long(&self, key: &str) -> Option<i64>;

    fn string(&self, key: &str) -> Option<String>;

    /// Apply every change of `edit` in one step
    fn commit(&self, edit: PreferencesEdit) -> Result<(), StorageError>;
}

/// A shared reference to a preferences backend
pub type SharedPreferences = Arc<dyn Preferences>;

#[derive(Debug, Clone)]
enum Change {
    StringSet(String, BTreeSet<String>),
    Long(String, i64),
    String(String, String),
    Remove(String),
}

/// A batch of preference writes
#[derive(Debug, Clone, Default)]
pub struct PreferencesEdit {
    changes: Vec<Change>,
}

impl PreferencesEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_string_set(mut self, key: impl Into<String>, value: BTreeSet<String>) -> Self {
        self.changes.push(Change::StringSet(key.into(), value));
        self
    }

    pub fn put_long(mut self, key: impl Into<String>, value: i64) -> Self {
        self.changes.push(Change::Long(key.into(), value));
        self
    }

    pub fn put_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.changes.push(Change::String(key.into(), value.into()));
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.changes.push(Change::Remove(key.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Serializable contents of a preferences backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferenceValues {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    string_sets: BTreeMap<String, BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    longs: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    strings: BTreeMap<String, String>,
}

impl PreferenceValues {
    fn apply(&mut self, edit: PreferencesEdit) {
        for change in edit.changes {
            match change {
                Change::StringSet(key, value) => {
                    self.string_sets.insert(key, value);
                }
                Change::Long(key, value) => {
                    self.longs.insert(key, value);
                }
                Change::String(key, value) => {
                    self.strings.insert(key, value);
                }
                Change::Remove(key) => {
                    self.string_sets.remove(&key);
                    self.longs.remove(&key);
                    self.strings.remove(&key);
                }
            }
        }
    }
}

fn lock(values: &Mutex<PreferenceValues>) -> MutexGuard<'_, PreferenceValues> {
    values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Preferences kept in memory only
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<PreferenceValues>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new MemoryPreferences wrapped in an Arc
    pub fn shared() -> SharedPreferences {
        Arc::new(Self::new())
    }
}

impl Preferences for MemoryPreferences {
    fn string_set(&self, key: &str) -> BTreeSet<String> {
        lock(&self.values).string_sets.get(key).cloned().unwrap_or_default()
    }

    fn long(&self, key: &str) -> Option<i64> {
        lock(&self.values).longs.get(key).copied()
    }

    fn string(&self, key: &str) -> Option<String> {
        lock(&self.values).strings.get(key).cloned()
    }

    fn commit(&self, edit: PreferencesEdit) -> Result<(), StorageError> {
        lock(&self.values).apply(edit);
        Ok(())
    }
}

/// Preferences persisted to a JSON file, rewritten on every commit
#[derive(Debug)]
pub struct JsonFilePreferences {
    path: PathBuf,
    values: Mutex<PreferenceValues>,
}

impl JsonFilePreferences {
    /// Open the preferences file at `path`, starting empty if it is missing
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let values = read_json(path)?.unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Preferences for JsonFilePreferences {
    fn string_set(&self, key: &str) -> BTreeSet<String> {
        lock(&self.values).string_sets.get(key).cloned().unwrap_or_default()
    }

    fn long(&self, key: &str) -> Option<i64> {
        lock(&self.values).longs.get(key).copied()
    }

    fn string(&self, key: &str) -> Option<String> {
        lock(&self.values).strings.get(key).cloned()
    }

    fn commit(&self, edit: PreferencesEdit) -> Result<(), StorageError> {
        let mut values = lock(&self.values);
        let mut updated = values.clone();
        updated.apply(edit);
        // Only adopt the new values once they are on disk
        write_json(&self.path, &updated)?;
        *values = updated;
        Ok(())
    }
}
