// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::error::StorageError;
use crate::prefs::{PreferencesEdit, SharedPreferences};

use super::ProviderId;

/// Copy of the tracked subscription changes at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSnapshot {
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl ChangeSnapshot {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Persisted record of subscriptions added and removed locally since the
/// last successful sync with one provider
///
/// An id is never in both sets: recording it on one side evicts it from
/// the other. Every read-modify-write of the pair happens under one lock and
/// is committed as a single preferences edit.
pub struct LocalChangeTracker {
    prefs: SharedPreferences,
    added_key: String,
    removed_key: String,
    lock: Mutex<()>,
}

impl LocalChangeTracker {
    pub fn new(prefs: SharedPreferences, provider: &ProviderId) -> Self {
        Self {
            prefs,
            added_key: format!("sync.{provider}.podcasts.added"),
            removed_key: format!("sync.{provider}.podcasts.removed"),
            lock: Mutex::new(()),
        }
    }

    fn modify(
        &self,
        f: impl FnOnce(&mut BTreeSet<String>, &mut BTreeSet<String>) -> bool,
    ) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut added = self.prefs.string_set(&self.added_key);
        let mut removed = self.prefs.string_set(&self.removed_key);

        if !f(&mut added, &mut removed) {
            return Ok(());
        }

        self.prefs.commit(
            PreferencesEdit::new()
                .put_string_set(&self.added_key, added)
                .put_string_set(&self.removed_key, removed),
        )
    }

    pub fn record_added(&self, id: &str) -> Result<(), StorageError> {
        self.modify(|added, removed| {
            let inserted = added.insert(id.to_string());
            removed.remove(id) | inserted
        })
    }

    pub fn record_removed(&self, id: &str) -> Result<(), StorageError> {
        self.modify(|added, removed| {
            let inserted = removed.insert(id.to_string());
            added.remove(id) | inserted
        })
    }

    pub fn snapshot_added(&self) -> BTreeSet<String> {
        self.snapshot().added
    }

    pub fn snapshot_removed(&self) -> BTreeSet<String> {
        self.snapshot().removed
    }

    /// Both sets, read under the same lock
    pub fn snapshot(&self) -> ChangeSnapshot {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        ChangeSnapshot {
            added: self.prefs.string_set(&self.added_key),
            removed: self.prefs.string_set(&self.removed_key),
        }
    }

    /// Forget exactly the given ids after they were synchronized
    ///
    /// Ids recorded after the snapshot that produced `processed_added` and
    /// `processed_removed` stay tracked for the next sync.
    pub fn clear(
        &self,
        processed_added: &BTreeSet<String>,
        processed_removed: &BTreeSet<String>,
    ) -> Result<(), StorageError> {
        self.modify(|added, removed| {
            let before = added.len() + removed.len();
            added.retain(|id| !processed_added.contains(id));
            removed.retain(|id| !processed_removed.contains(id));
            added.len() + removed.len() != before
        })
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
