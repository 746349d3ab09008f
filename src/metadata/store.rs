// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::watch;

use crate::error::StorageError;
use crate::events::{AppEvent, EventBus};
use crate::podcast::{EpisodeRef, Podcast};
use crate::storage::{read_json, write_json};

use super::record::EpisodeMetadata;

/// Per-episode state of every known episode
///
/// Records are keyed by episode id. Reads hand out copies, and every
/// mutation runs under one write lock, so background sync and event
/// callbacks may use the store concurrently. State, playlist and download
/// operations live in their own modules as separate `impl` blocks.
pub struct EpisodeMetadataStore {
    records: RwLock<HashMap<String, EpisodeMetadata>>,
    dirty: AtomicBool,
    loaded: watch::Sender<bool>,
    events: Arc<EventBus>,
}

impl EpisodeMetadataStore {
    pub fn new(events: Arc<EventBus>) -> Self {
        let (loaded, _) = watch::channel(false);
        Self {
            records: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
            loaded,
            events,
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, HashMap<String, EpisodeMetadata>> {
        self.records
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, EpisodeMetadata>> {
        self.records
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn emit(&self, event: AppEvent) {
        self.events.emit(event);
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Mutate the record of `episode`, creating it if needed
    ///
    /// Returns whatever `f` returns along with whether the record changed.
    /// The lock is released before returning, so callers emit events after
    /// this call, never inside `f`.
    pub(crate) fn update<R>(
        &self,
        episode: &EpisodeRef,
        f: impl FnOnce(&mut EpisodeMetadata) -> R,
    ) -> (R, bool) {
        let mut records = self.write();
        let record = records.entry(episode.episode_url.clone()).or_default();
        let before = record.clone();

        let result = f(record);
        if record.podcast_url.is_none() && !record.is_empty() {
            record.podcast_url = Some(episode.podcast_url.clone());
        }

        let changed = *record != before;
        if !changed && before == EpisodeMetadata::default() {
            // Do not leave behind a record we only created to look at
            records.remove(&episode.episode_url);
        }
        drop(records);

        if changed {
            self.mark_dirty();
        }
        (result, changed)
    }

    pub fn get(&self, episode_id: &str) -> Option<EpisodeMetadata> {
        self.read().get(episode_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of all records, safe to iterate while the store keeps changing
    pub fn snapshot(&self) -> HashMap<String, EpisodeMetadata> {
        self.read().clone()
    }

    /// Return and reset the "changed since last save" flag
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Signal that persisted metadata has been read into the store
    pub fn mark_loaded(&self) {
        self.loaded.send_replace(true);
    }

    pub fn is_loaded(&self) -> bool {
        *self.loaded.borrow()
    }

    /// Wait until [`mark_loaded`](Self::mark_loaded) has been called
    ///
    /// Sync runs await this before reading or applying episode state.
    pub async fn wait_until_loaded(&self) {
        let mut loaded = self.loaded.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = loaded.wait_for(|loaded| *loaded).await;
    }

    /// Replace the store's contents with the records persisted at `path`
    pub fn load(&self, path: &Path) -> Result<usize, StorageError> {
        let stored: BTreeMap<String, EpisodeMetadata> = read_json(path)?.unwrap_or_default();
        let count = stored.len();
        *self.write() = stored.into_iter().collect();
        self.dirty.store(false, Ordering::SeqCst);
        self.mark_loaded();
        Ok(count)
    }

    /// Persist all records to `path` and clear the dirty flag
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        let ordered: BTreeMap<String, EpisodeMetadata> = self.snapshot().into_iter().collect();
        write_json(path, &ordered)?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Drop records of `podcast` that hold no state and whose episode is
    /// gone from the freshly loaded feed
    pub fn collect_garbage(&self, podcast: &Podcast) -> usize {
        let present: HashSet<&str> = podcast.episodes.iter().map(|e| e.id()).collect();

        let mut records = self.write();
        let before = records.len();
        records.retain(|id, record| {
            let owned = record.podcast_url.as_deref() == Some(podcast.url.as_str());
            !(owned && record.is_empty() && !present.contains(id.as_str()))
        });
        let removed = before - records.len();
        drop(records);

        if removed > 0 {
            self.mark_dirty();
            tracing::debug!(podcast = %podcast.url, removed, "Collected episode metadata");
        }
        removed
    }

    /// Drop the records of an unsubscribed podcast, keeping those still
    /// referenced by the playlist or a download
    pub fn forget_podcast(&self, podcast_url: &str) -> usize {
        let mut records = self.write();
        let before = records.len();
        records.retain(|_, record| {
            record.podcast_url.as_deref() != Some(podcast_url) || record.is_pinned()
        });
        let removed = before - records.len();
        drop(records);

        if removed > 0 {
            self.mark_dirty();
            tracing::debug!(podcast = %podcast_url, removed, "Forgot episode metadata");
        }
        removed
    }
}

impl std::fmt::Debug for EpisodeMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpisodeMetadataStore")
            .field("records", &self.len())
            .field("dirty", &self.is_dirty())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::events::ChangeSource;
    use crate::podcast::Episode;
    use tempfile::tempdir;

    const FEED: &str = "https://example.com/feed";

    fn store() -> EpisodeMetadataStore {
        EpisodeMetadataStore::new(Arc::new(EventBus::new()))
    }

    fn episode(id: &str) -> Episode {
        Episode {
            podcast_url: FEED.to_string(),
            media_url: Some(id.to_string()),
            guid: None,
            title: id.to_string(),
        }
    }

    #[test]
    fn update_records_provenance() {
        let store = store();
        let ep = episode("https://example.com/1.mp3").reference();

        store.set_old(&ep, Some(true), ChangeSource::Local);

        let record = store.get("https://example.com/1.mp3").unwrap();
        assert_eq!(record.podcast_url.as_deref(), Some(FEED));
        assert!(store.take_dirty());
        assert!(!store.is_dirty());
    }

    #[test]
    fn reading_does_not_create_records() {
        let store = store();
        let ep = episode("https://example.com/1.mp3").reference();

        assert!(!store.is_old(&ep));
        store.set_resume_at(&ep, None, ChangeSource::Local);

        assert!(store.is_empty());
        assert!(!store.is_dirty());
    }

    #[test]
    fn garbage_collection_drops_empty_records_of_vanished_episodes() {
        let store = store();
        let kept = episode("https://example.com/kept.mp3");
        let vanished = episode("https://example.com/vanished.mp3");
        let vanished_with_state = episode("https://example.com/old.mp3");

        for ep in [&kept, &vanished, &vanished_with_state] {
            store.set_old(&ep.reference(), Some(true), ChangeSource::Local);
        }
        // Reset to all-null; only provenance remains
        store.set_old(&kept.reference(), None, ChangeSource::Local);
        store.set_old(&vanished.reference(), None, ChangeSource::Local);

        let mut podcast = Podcast::new(FEED, "Feed");
        podcast.episodes = vec![kept.clone()];

        assert_eq!(store.collect_garbage(&podcast), 1);
        assert!(store.get(kept.id()).is_some());
        assert!(store.get(vanished.id()).is_none());
        assert!(store.get(vanished_with_state.id()).is_some());
    }

    #[test]
    fn garbage_collection_ignores_other_podcasts() {
        let store = store();
        let other = Episode {
            podcast_url: "https://other.example.com/feed".into(),
            ..episode("https://other.example.com/1.mp3")
        };
        store.set_old(&other.reference(), Some(true), ChangeSource::Local);
        store.set_old(&other.reference(), None, ChangeSource::Local);

        let podcast = Podcast::new(FEED, "Feed");
        assert_eq!(store.collect_garbage(&podcast), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn forgetting_podcast_keeps_playlist_entries() {
        let store = store();
        let listened = episode("https://example.com/1.mp3").reference();
        let queued = episode("https://example.com/2.mp3").reference();

        store.set_old(&listened, Some(true), ChangeSource::Local);
        store.append_to_playlist(&queued, ChangeSource::Local);

        assert_eq!(store.forget_podcast(FEED), 1);
        assert!(store.get(&listened.episode_url).is_none());
        assert_eq!(store.playlist_position(&queued), Some(0));
    }

    #[test]
    fn save_and_load_restore_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metadata.json");

        let original = store();
        let ep = episode("https://example.com/1.mp3").reference();
        original.set_resume_at(&ep, Some(90_000), ChangeSource::Local);
        original.save(&path).unwrap();
        assert!(!original.is_dirty());

        let restored = store();
        assert_eq!(restored.load(&path).unwrap(), 1);
        assert!(restored.is_loaded());
        assert_eq!(restored.resume_at(&ep), 90_000);
    }

    #[tokio::test]
    async fn wait_until_loaded_resolves_after_mark_loaded() {
        let store = Arc::new(store());
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.wait_until_loaded().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        store.mark_loaded();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
