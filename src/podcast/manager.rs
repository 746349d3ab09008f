// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{FeedError, StorageError};
use crate::events::{AppEvent, ChangeSource, EventBus};
use crate::metadata::EpisodeMetadataStore;
use crate::storage::{read_json, write_json};

use super::model::{Podcast, normalize_feed_url};

/// Loads a podcast's feed, validating that it is reachable and well formed
#[async_trait]
pub trait PodcastLoader: Send + Sync {
    async fn load(&self, podcast: &Podcast) -> Result<Podcast, FeedError>;
}

/// The list of subscribed podcasts
///
/// Every mutation emits an [`AppEvent`] tagged with its [`ChangeSource`] so
/// sync controllers can track local subscription changes.
pub struct PodcastManager {
    podcasts: RwLock<Vec<Podcast>>,
    loader: Arc<dyn PodcastLoader>,
    metadata: Arc<EpisodeMetadataStore>,
    events: Arc<EventBus>,
}

impl PodcastManager {
    pub fn new(
        loader: Arc<dyn PodcastLoader>,
        metadata: Arc<EpisodeMetadataStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            podcasts: RwLock::new(Vec::new()),
            loader,
            metadata,
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Podcast>> {
        self.podcasts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Podcast>> {
        self.podcasts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn find_podcast_for_url(&self, url: &str) -> Option<Podcast> {
        let url = normalize_feed_url(url);
        self.read().iter().find(|podcast| podcast.url == url).cloned()
    }

    pub fn podcast_list(&self) -> Vec<Podcast> {
        self.read().clone()
    }

    /// Normalized feed URLs of all subscriptions
    pub fn podcast_urls(&self) -> BTreeSet<String> {
        self.read().iter().map(|podcast| podcast.url.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn contains(&self, podcast: &Podcast) -> bool {
        self.read().contains(podcast)
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.find_podcast_for_url(url).is_some()
    }

    /// Subscribe to `podcast`. Returns false if it already is subscribed.
    pub fn add_podcast(&self, podcast: Podcast, source: ChangeSource) -> bool {
        let url = podcast.url.clone();
        {
            let mut podcasts = self.write();
            if podcasts.contains(&podcast) {
                return false;
            }
            podcasts.push(podcast);
        }

        tracing::debug!(podcast = %url, ?source, "Podcast added");
        self.events.emit(AppEvent::PodcastAdded { url, source });
        true
    }

    /// Unsubscribe the podcast at `index`
    pub fn remove_podcast(&self, index: usize, source: ChangeSource) -> Option<Podcast> {
        let removed = {
            let mut podcasts = self.write();
            if index >= podcasts.len() {
                return None;
            }
            podcasts.remove(index)
        };

        self.metadata.forget_podcast(&removed.url);
        tracing::debug!(podcast = %removed.url, ?source, "Podcast removed");
        self.events.emit(AppEvent::PodcastRemoved {
            url: removed.url.clone(),
            source,
        });
        Some(removed)
    }

    pub fn remove_podcast_by_url(&self, url: &str, source: ChangeSource) -> Option<Podcast> {
        let url = normalize_feed_url(url);
        let index = self.read().iter().position(|podcast| podcast.url == url)?;
        self.remove_podcast(index, source)
    }

    /// Load `podcast`'s feed through the configured loader
    ///
    /// When the podcast is subscribed, its stored entry picks up the fresh
    /// episode list and stale episode metadata is collected.
    pub async fn load_podcast(&self, podcast: &Podcast) -> Result<Podcast, FeedError> {
        let mut loaded = self.loader.load(podcast).await?;
        let at = loaded.loaded_at.unwrap_or_else(Utc::now);
        loaded.loaded_at = Some(at);

        let subscribed = {
            let mut podcasts = self.write();
            match podcasts.iter_mut().find(|existing| **existing == loaded) {
                Some(existing) => {
                    existing.episodes = loaded.episodes.clone();
                    existing.loaded_at = Some(at);
                    true
                }
                None => false,
            }
        };

        if subscribed {
            self.metadata.collect_garbage(&loaded);
            self.events.emit(AppEvent::PodcastLoaded {
                url: loaded.url.clone(),
                at,
            });
        }
        Ok(loaded)
    }

    /// Persist the subscription list (URL, name and credentials)
    pub fn save(&self, path: &Path) -> Result<(), StorageError> {
        write_json(path, &*self.read())
    }

    /// Replace the subscription list with the one stored at `path`
    ///
    /// Emits no events: restoring state is not a user change.
    pub fn load(&self, path: &Path) -> Result<usize, StorageError> {
        let stored: Vec<Podcast> = read_json(path)?.unwrap_or_default();
        let mut podcasts = self.write();
        podcasts.clear();
        for entry in stored {
            let mut podcast = Podcast::new(&entry.url, entry.name);
            podcast.credentials = entry.credentials;
            if !podcasts.contains(&podcast) {
                podcasts.push(podcast);
            }
        }
        Ok(podcasts.len())
    }
}

impl std::fmt::Debug for PodcastManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodcastManager")
            .field("podcasts", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;

    use crate::events::AppEventListener;
    use crate::podcast::Episode;
    use tempfile::tempdir;

    /// Serves a fixed episode list for every URL containing "good"
    struct StaticLoader;

    #[async_trait]
    impl PodcastLoader for StaticLoader {
        async fn load(&self, podcast: &Podcast) -> Result<Podcast, FeedError> {
            if !podcast.url.contains("good") {
                return Err(FeedError::HttpStatus {
                    url: podcast.url.clone(),
                    status: 404,
                });
            }
            let mut loaded = Podcast::new(&podcast.url, "Loaded");
            loaded.episodes = vec![Episode {
                podcast_url: podcast.url.clone(),
                media_url: Some(format!("{}/1.mp3", podcast.url)),
                guid: None,
                title: "One".into(),
            }];
            Ok(loaded)
        }
    }

    #[derive(Default)]
    struct Collector(Mutex<Vec<AppEvent>>);

    impl AppEventListener for Collector {
        fn on_event(&self, event: &AppEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn manager() -> (PodcastManager, Arc<Collector>) {
        let events = Arc::new(EventBus::new());
        let collector = Arc::new(Collector::default());
        events.subscribe(collector.clone());
        let metadata = Arc::new(EpisodeMetadataStore::new(events.clone()));
        (
            PodcastManager::new(Arc::new(StaticLoader), metadata, events),
            collector,
        )
    }

    #[test]
    fn add_is_idempotent_and_normalized() {
        let (manager, events) = manager();

        assert!(manager.add_podcast(Podcast::new("https://good.example.com/feed", "A"), ChangeSource::Local));
        assert!(!manager.add_podcast(Podcast::new("HTTPS://GOOD.example.com/feed", "A"), ChangeSource::Local));

        assert_eq!(manager.len(), 1);
        assert!(manager.contains_url("https://good.EXAMPLE.com/feed"));
        assert_eq!(events.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn remove_emits_event_with_source() {
        let (manager, events) = manager();
        manager.add_podcast(Podcast::new("https://good.example.com/feed", "A"), ChangeSource::Local);

        let source = ChangeSource::Sync(crate::sync::ProviderId::new("dropbox"));
        let removed = manager.remove_podcast_by_url("https://good.example.com/feed", source.clone());

        assert!(removed.is_some());
        assert!(manager.is_empty());
        assert!(manager.remove_podcast(0, ChangeSource::Local).is_none());
        let events = events.0.lock().unwrap();
        assert!(matches!(
            events.last(),
            Some(AppEvent::PodcastRemoved { source: s, .. }) if *s == source
        ));
    }

    #[tokio::test]
    async fn load_updates_subscribed_podcast() {
        let (manager, events) = manager();
        let podcast = Podcast::new("https://good.example.com/feed", "A");
        manager.add_podcast(podcast.clone(), ChangeSource::Local);

        let loaded = manager.load_podcast(&podcast).await.unwrap();

        assert_eq!(loaded.episodes.len(), 1);
        let stored = manager.find_podcast_for_url(&podcast.url).unwrap();
        assert!(stored.is_loaded());
        assert_eq!(stored.episodes.len(), 1);
        assert_eq!(stored.name, "A");
        assert!(matches!(
            events.0.lock().unwrap().last(),
            Some(AppEvent::PodcastLoaded { .. })
        ));
    }

    #[tokio::test]
    async fn failed_load_changes_nothing() {
        let (manager, _) = manager();
        let podcast = Podcast::new("https://bad.example.com/feed", "B");

        assert!(manager.load_podcast(&podcast).await.is_err());
        assert!(manager.is_empty());
    }

    #[test]
    fn save_and_load_roundtrip_subscriptions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("podcasts.json");
        let (original, _) = manager();
        original.add_podcast(Podcast::new("https://good.example.com/a", "A"), ChangeSource::Local);
        original.add_podcast(Podcast::new("https://good.example.com/b", "B"), ChangeSource::Local);
        original.save(&path).unwrap();

        let (restored, events) = manager();
        assert_eq!(restored.load(&path).unwrap(), 2);
        assert_eq!(restored.podcast_urls(), original.podcast_urls());
        assert!(events.0.lock().unwrap().is_empty());
    }
}
