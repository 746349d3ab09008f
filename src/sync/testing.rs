// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Test doubles for sync controllers: a scripted remote with failure
//! injection, loaders and a recording listener.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use tokio::runtime::Handle;

use crate::config::SyncOptions;
use crate::error::{FeedError, RemoteError, SyncError};
use crate::events::{ChangeSource, EventBus};
use crate::metadata::EpisodeMetadataStore;
use crate::podcast::{EpisodeRef, Podcast, PodcastLoader, PodcastManager};
use crate::prefs::{MemoryPreferences, PreferencesEdit};

use super::{
    EpisodeChange, ProviderId, RemoteEpisodeChanges, RemoteStore, RemoteSubscriptions,
    SyncContext, SyncController, SyncListener,
};

pub fn feed(n: u32) -> String {
    format!("https://feeds.example.com/{n}/rss")
}

pub fn episode(feed_n: u32, n: u32) -> EpisodeRef {
    EpisodeRef::new(
        &feed(feed_n),
        &format!("https://media.example.com/{feed_n}/{n}.mp3"),
    )
}

/// Loader that fails every feed
pub struct NoLoader;

#[async_trait]
impl PodcastLoader for NoLoader {
    async fn load(&self, podcast: &Podcast) -> Result<Podcast, FeedError> {
        Err(FeedError::HttpStatus {
            url: podcast.url.clone(),
            status: 404,
        })
    }
}

/// Loader that returns the podcast it is given, except for listed feeds
#[derive(Default)]
pub struct EchoLoader {
    failing: BTreeSet<String>,
    hang: bool,
}

impl EchoLoader {
    pub fn shared() -> Arc<dyn PodcastLoader> {
        Arc::new(Self::default())
    }

    pub fn failing(urls: &[&str]) -> Arc<dyn PodcastLoader> {
        Arc::new(Self {
            failing: urls.iter().map(|url| url.to_string()).collect(),
            hang: false,
        })
    }

    /// Loads never finish
    pub fn hanging() -> Arc<dyn PodcastLoader> {
        Arc::new(Self {
            failing: BTreeSet::new(),
            hang: true,
        })
    }
}

#[async_trait]
impl PodcastLoader for EchoLoader {
    async fn load(&self, podcast: &Podcast) -> Result<Podcast, FeedError> {
        if self.hang {
            futures::future::pending::<()>().await;
        }
        if self.failing.contains(&podcast.url) {
            return Err(FeedError::HttpStatus {
                url: podcast.url.clone(),
                status: 404,
            });
        }
        let mut loaded = podcast.clone();
        loaded.loaded_at = Some(Utc::now());
        Ok(loaded)
    }
}

#[derive(Default)]
struct RemoteState {
    subscriptions: RemoteSubscriptions,
    changes: Vec<EpisodeChange>,
    settings: BTreeMap<String, String>,
    clock: i64,
    pushed: Vec<EpisodeChange>,
    puts: usize,
    pulls: usize,
    last_since: Option<Option<i64>>,
}

/// In-memory remote whose calls can be made to fail
#[derive(Default)]
pub struct ScriptedRemote {
    state: Mutex<RemoteState>,
    fail_get_subscriptions: AtomicBool,
    fail_put_subscriptions: AtomicBool,
    fail_pull: AtomicBool,
    fail_push: AtomicBool,
    deactivations: AtomicUsize,
    on_get_subscriptions: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl ScriptedRemote {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap()
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<(), RemoteError> {
        if flag.load(Ordering::SeqCst) {
            Err(RemoteError::Transport(format!("{what} failed")))
        } else {
            Ok(())
        }
    }

    pub fn fail_get_subscriptions(&self, fail: bool) {
        self.fail_get_subscriptions.store(fail, Ordering::SeqCst);
    }

    pub fn fail_put_subscriptions(&self, fail: bool) {
        self.fail_put_subscriptions.store(fail, Ordering::SeqCst);
    }

    pub fn fail_pull(&self, fail: bool) {
        self.fail_pull.store(fail, Ordering::SeqCst);
    }

    pub fn fail_push(&self, fail: bool) {
        self.fail_push.store(fail, Ordering::SeqCst);
    }

    /// Run `f` once, while the next subscription fetch is in flight
    pub fn during_get_subscriptions(&self, f: impl FnOnce() + Send + 'static) {
        *self.on_get_subscriptions.lock().unwrap() = Some(Box::new(f));
    }

    pub fn set_subscriptions(&self, subscriptions: RemoteSubscriptions) {
        self.state().subscriptions = subscriptions;
    }

    pub fn subscription_urls(&self) -> BTreeSet<String> {
        self.state().subscriptions.keys().cloned().collect()
    }

    /// Record a change as if another device had pushed it
    pub fn add_change(&self, change: EpisodeChange) {
        let mut state = self.state();
        state.clock = state.clock.max(change.timestamp);
        state.changes.push(change);
    }

    pub fn set_setting(&self, key: &str, value: &str) {
        self.state()
            .settings
            .insert(key.to_string(), value.to_string());
    }

    pub fn setting(&self, key: &str) -> Option<String> {
        self.state().settings.get(key).cloned()
    }

    /// Every change pushed so far, in push order
    pub fn pushed(&self) -> Vec<EpisodeChange> {
        self.state().pushed.clone()
    }

    pub fn put_count(&self) -> usize {
        self.state().puts
    }

    pub fn pull_count(&self) -> usize {
        self.state().pulls
    }

    /// The `since` argument of the latest pull, `None` before any pull
    pub fn last_pull_since(&self) -> Option<Option<i64>> {
        self.state().last_since
    }

    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for ScriptedRemote {
    async fn get_subscriptions(&self) -> Result<RemoteSubscriptions, RemoteError> {
        Self::check(&self.fail_get_subscriptions, "get subscriptions")?;
        let subscriptions = self.state().subscriptions.clone();
        let hook = self.on_get_subscriptions.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(subscriptions)
    }

    async fn put_subscriptions(&self, urls: &BTreeSet<String>) -> Result<(), RemoteError> {
        Self::check(&self.fail_put_subscriptions, "put subscriptions")?;
        let mut state = self.state();
        state.puts += 1;
        let previous = std::mem::take(&mut state.subscriptions);
        state.subscriptions = urls
            .iter()
            .map(|url| (url.clone(), previous.get(url).cloned().flatten()))
            .collect();
        Ok(())
    }

    async fn pull_episode_changes(
        &self,
        since: Option<i64>,
    ) -> Result<RemoteEpisodeChanges, RemoteError> {
        let mut state = self.state();
        state.pulls += 1;
        state.last_since = Some(since);
        Self::check(&self.fail_pull, "pull")?;

        let after = since.unwrap_or(i64::MIN);
        Ok(RemoteEpisodeChanges {
            changes: state
                .changes
                .iter()
                .filter(|change| change.timestamp > after)
                .cloned()
                .collect(),
            timestamp: state.clock,
        })
    }

    async fn push_episode_changes(&self, changes: &[EpisodeChange]) -> Result<i64, RemoteError> {
        Self::check(&self.fail_push, "push")?;
        let mut state = self.state();
        for change in changes {
            state.clock += 1;
            let mut stored = change.clone();
            stored.timestamp = state.clock;
            state.changes.push(stored);
            state.pushed.push(change.clone());
        }
        Ok(state.clock)
    }

    async fn get_settings(&self) -> Result<BTreeMap<String, String>, RemoteError> {
        Ok(self.state().settings.clone())
    }

    async fn put_settings(&self, settings: &BTreeMap<String, String>) -> Result<(), RemoteError> {
        self.state().settings = settings.clone();
        Ok(())
    }

    fn on_deactivate(&self) {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Listener that counts callbacks
#[derive(Default)]
pub struct RecordingListener {
    triggered: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    last_error: Mutex<Option<String>>,
}

impl RecordingListener {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn triggered(&self) -> usize {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }
}

impl SyncListener for RecordingListener {
    fn on_sync_triggered(&self, _provider: &ProviderId) {
        self.triggered.fetch_add(1, Ordering::SeqCst);
    }

    fn on_sync_completed(&self, _provider: &ProviderId) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_sync_failed(&self, _provider: &ProviderId, error: &SyncError) {
        self.failed.fetch_add(1, Ordering::SeqCst);
        *self.last_error.lock().unwrap() = Some(error.to_string());
    }
}

/// An app session with in-memory preferences and loaded metadata
pub struct TestApp {
    pub ctx: SyncContext,
}

impl TestApp {
    /// Must be called inside a tokio runtime
    pub fn new(loader: Arc<dyn PodcastLoader>) -> Self {
        let events = Arc::new(EventBus::new());
        let episodes = Arc::new(EpisodeMetadataStore::new(events.clone()));
        episodes.mark_loaded();
        let podcasts = Arc::new(PodcastManager::new(loader, episodes.clone(), events.clone()));
        Self {
            ctx: SyncContext::new(
                podcasts,
                episodes,
                MemoryPreferences::shared(),
                events,
                Handle::current(),
            ),
        }
    }

    pub fn subscribe(&self, url: &str) {
        self.ctx
            .podcasts
            .add_podcast(Podcast::new(url, url), ChangeSource::Local);
    }

    pub fn controller(&self, provider: &str, remote: Arc<ScriptedRemote>) -> Arc<SyncController> {
        self.controller_with(provider, remote, SyncOptions::default())
    }

    pub fn controller_with(
        &self,
        provider: &str,
        remote: Arc<ScriptedRemote>,
        options: SyncOptions,
    ) -> Arc<SyncController> {
        SyncController::new(ProviderId::new(provider), remote, self.ctx.clone(), options)
    }

    /// Pretend `controller` completed a sync in an earlier session
    pub fn mark_synced_before(&self, controller: &SyncController) {
        self.ctx
            .prefs
            .commit(PreferencesEdit::new().put_long(
                format!("sync.{}.podcasts.first_sync_done", controller.provider()),
                1,
            ))
            .unwrap();
    }
}
