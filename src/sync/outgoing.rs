// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::prefs::{PreferencesEdit, SharedPreferences};

use super::ProviderId;
use super::remote::{ChangeKind, EpisodeChange};

/// A local episode change waiting to be pushed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Increases with every recorded change
    pub seq: u64,
    pub change: EpisodeChange,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredBuffer {
    next_seq: u64,
    entries: Vec<PendingChange>,
}

type Key = (String, ChangeKind);

#[derive(Debug, Clone, Default)]
struct Buffer {
    next_seq: u64,
    entries: BTreeMap<Key, PendingChange>,
}

impl Buffer {
    fn to_stored(&self) -> StoredBuffer {
        let mut entries: Vec<PendingChange> = self.entries.values().cloned().collect();
        entries.sort_by_key(|pending| pending.seq);
        StoredBuffer {
            next_seq: self.next_seq,
            entries,
        }
    }

    fn from_stored(stored: StoredBuffer) -> Self {
        let mut buffer = Buffer {
            next_seq: stored.next_seq,
            entries: BTreeMap::new(),
        };
        for pending in stored.entries {
            buffer.next_seq = buffer.next_seq.max(pending.seq + 1);
            let key = (pending.change.episode_url.clone(), pending.change.action.kind());
            buffer.entries.insert(key, pending);
        }
        buffer
    }
}

/// Persisted queue of local episode changes for one provider
///
/// Changes are coalesced per episode and field, latest wins, so marking a
/// whole podcast as listened twice still queues one entry per episode.
pub struct OutgoingChanges {
    prefs: SharedPreferences,
    key: String,
    buffer: Mutex<Buffer>,
}

impl OutgoingChanges {
    /// Open the queue of `provider`, restoring what a previous run left
    pub fn new(prefs: SharedPreferences, provider: &ProviderId) -> Self {
        let key = format!("sync.{provider}.episodes.pending");
        let buffer = match prefs.string(&key) {
            Some(json) => match serde_json::from_str::<StoredBuffer>(&json) {
                Ok(stored) => Buffer::from_stored(stored),
                Err(e) => {
                    tracing::warn!(%provider, error = %e, "Discarding unreadable pending episode changes");
                    Buffer::default()
                }
            },
            None => Buffer::default(),
        };

        Self {
            prefs,
            key,
            buffer: Mutex::new(buffer),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, buffer: &Buffer) -> Result<(), StorageError> {
        let json = serde_json::to_string(&buffer.to_stored())?;
        self.prefs
            .commit(PreferencesEdit::new().put_string(&self.key, json))
    }

    pub fn record(&self, change: EpisodeChange) -> Result<(), StorageError> {
        self.record_all(std::iter::once(change))
    }

    /// Queue several changes, persisting once
    ///
    /// Nothing changes in memory unless the queue was persisted.
    pub fn record_all(
        &self,
        changes: impl IntoIterator<Item = EpisodeChange>,
    ) -> Result<(), StorageError> {
        let mut buffer = self.lock();
        let mut updated = buffer.clone();
        let mut recorded = false;
        for change in changes {
            let seq = updated.next_seq;
            updated.next_seq += 1;
            let key = (change.episode_url.clone(), change.action.kind());
            updated.entries.insert(key, PendingChange { seq, change });
            recorded = true;
        }

        if recorded {
            self.persist(&updated)?;
            *buffer = updated;
        }
        Ok(())
    }

    /// Pending changes in the order they were recorded
    pub fn snapshot(&self) -> Vec<PendingChange> {
        self.lock().to_stored().entries
    }

    pub fn has_pending(&self, episode_url: &str, kind: ChangeKind) -> bool {
        self.lock()
            .entries
            .contains_key(&(episode_url.to_string(), kind))
    }

    /// Drop changes the provider confirmed
    ///
    /// An entry is only dropped if it was not replaced by a newer change
    /// after `pushed` was taken from [`snapshot`](Self::snapshot).
    pub fn remove_pushed(&self, pushed: &[PendingChange]) -> Result<usize, StorageError> {
        let mut buffer = self.lock();
        let mut updated = buffer.clone();
        let mut removed = 0;
        for pending in pushed {
            let key = (pending.change.episode_url.clone(), pending.change.action.kind());
            if updated.entries.get(&key).is_some_and(|current| current.seq == pending.seq) {
                updated.entries.remove(&key);
                removed += 1;
            }
        }

        if removed > 0 {
            self.persist(&updated)?;
            *buffer = updated;
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}
