// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use chrono::Utc;
use tokio::sync::{Semaphore, watch};

use crate::config::SyncOptions;
use crate::error::SyncError;
use crate::events::{AppEvent, AppEventListener, ChangeSource, ListenerId};
use crate::podcast::Podcast;
use crate::prefs::PreferencesEdit;

use super::context::SyncContext;
use super::episodes::{apply_remote_changes, changes_for_event};
use super::listener::{ListenerSet, SharedSyncListener};
use super::outgoing::OutgoingChanges;
use super::remote::{EpisodeChange, RemoteStore};
use super::subscriptions::{SubscriptionInput, reconcile_subscriptions};
use super::tracker::LocalChangeTracker;
use super::{ProviderId, SyncKind, SyncMode};

#[derive(Debug, Default)]
struct RunState {
    running: HashSet<SyncKind>,
    round_failed: bool,
}

/// Synchronizes local state with one provider
///
/// Each [`SyncKind`] runs as its own task on the context's runtime and is
/// started at most once at a time. Runs of one controller are serialized,
/// so a podcast list sync never races the episode sync of the same
/// provider. Failures are reported to the registered listeners and leave
/// all pending local changes in place for the next run.
///
/// The controller follows application events from the moment it is created
/// until [`deactivate`](Self::deactivate) is called.
pub struct SyncController {
    this: Weak<SyncController>,
    provider: ProviderId,
    remote: Arc<dyn RemoteStore>,
    ctx: SyncContext,
    options: SyncOptions,
    mode: RwLock<SyncMode>,
    run: Mutex<RunState>,
    idle: watch::Sender<bool>,
    listeners: ListenerSet,
    tracker: LocalChangeTracker,
    outgoing: OutgoingChanges,
    serial: tokio::sync::Mutex<()>,
    subscription: Mutex<Option<ListenerId>>,
    deactivated: AtomicBool,
    first_sync_key: String,
    watermark_key: String,
}

/// Forwards bus events without keeping the controller alive
struct EventForwarder(Weak<SyncController>);

impl AppEventListener for EventForwarder {
    fn on_event(&self, event: &AppEvent) {
        if let Some(controller) = self.0.upgrade() {
            controller.handle_event(event);
        }
    }
}

impl SyncController {
    pub fn new(
        provider: ProviderId,
        remote: Arc<dyn RemoteStore>,
        ctx: SyncContext,
        options: SyncOptions,
    ) -> Arc<Self> {
        let (idle, _) = watch::channel(true);
        let controller = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            tracker: LocalChangeTracker::new(ctx.prefs.clone(), &provider),
            outgoing: OutgoingChanges::new(ctx.prefs.clone(), &provider),
            first_sync_key: format!("sync.{provider}.podcasts.first_sync_done"),
            watermark_key: format!("sync.{provider}.episodes.watermark"),
            provider,
            remote,
            ctx,
            options,
            mode: RwLock::new(SyncMode::default()),
            run: Mutex::new(RunState::default()),
            idle,
            listeners: ListenerSet::default(),
            serial: tokio::sync::Mutex::new(()),
            subscription: Mutex::new(None),
            deactivated: AtomicBool::new(false),
        });

        let id = controller
            .ctx
            .events
            .subscribe(Arc::new(EventForwarder(Arc::downgrade(&controller))));
        *controller.lock_subscription() = Some(id);
        tracing::debug!(provider = %controller.provider, "Sync controller activated");
        controller
    }

    fn run_state(&self) -> MutexGuard<'_, RunState> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_subscription(&self) -> MutexGuard<'_, Option<ListenerId>> {
        self.subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn provider(&self) -> &ProviderId {
        &self.provider
    }

    pub fn mode(&self) -> SyncMode {
        *self.mode.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Takes effect with the next started run
    pub fn set_mode(&self, mode: SyncMode) {
        *self
            .mode
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = mode;
        tracing::info!(provider = %self.provider, ?mode, "Sync mode changed");
    }

    /// Local subscription changes not yet synchronized with this provider
    pub fn tracker(&self) -> &LocalChangeTracker {
        &self.tracker
    }

    /// Local episode changes not yet pushed to this provider
    pub fn outgoing(&self) -> &OutgoingChanges {
        &self.outgoing
    }

    pub fn add_listener(&self, listener: SharedSyncListener) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &SharedSyncListener) -> bool {
        self.listeners.remove(listener)
    }

    pub fn is_running(&self) -> bool {
        !self.run_state().running.is_empty()
    }

    pub fn is_active(&self) -> bool {
        !self.deactivated.load(Ordering::SeqCst)
    }

    /// Wait until no run of this controller is in progress
    pub async fn wait_until_idle(&self) {
        let mut idle = self.idle.subscribe();
        // The sender lives in self, so the channel cannot close while we wait
        let _ = idle.wait_for(|idle| *idle).await;
    }

    /// Start every kind of sync that is not already running
    pub fn sync(&self) {
        for kind in SyncKind::ALL {
            self.start(kind);
        }
    }

    /// Returns false if a settings sync is already running
    pub fn sync_settings(&self) -> bool {
        self.start(SyncKind::Settings)
    }

    /// Returns false if a podcast list sync is already running
    pub fn sync_podcast_list(&self) -> bool {
        self.start(SyncKind::PodcastList)
    }

    /// Returns false if an episode metadata sync is already running
    pub fn sync_episode_metadata(&self) -> bool {
        self.start(SyncKind::EpisodeMetadata)
    }

    /// Stop following application events and release the provider
    ///
    /// Runs already in progress finish; no new ones start afterwards.
    pub fn deactivate(&self) {
        if self.deactivated.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(id) = self.lock_subscription().take() {
            self.ctx.events.unsubscribe(id);
        }
        self.remote.on_deactivate();
        tracing::info!(provider = %self.provider, "Sync controller deactivated");
    }

    fn start(&self, kind: SyncKind) -> bool {
        if !self.is_active() {
            return false;
        }
        let Some(this) = self.this.upgrade() else {
            return false;
        };

        let round_started = {
            let mut run = self.run_state();
            if !run.running.insert(kind) {
                tracing::trace!(provider = %self.provider, %kind, "Sync already running");
                return false;
            }
            if run.running.len() == 1 {
                run.round_failed = false;
                self.idle.send_replace(false);
                true
            } else {
                false
            }
        };

        if round_started {
            self.listeners.triggered(&self.provider);
        }
        self.ctx.runtime.spawn(async move { this.run(kind).await });
        true
    }

    async fn run(self: Arc<Self>, kind: SyncKind) {
        let result = {
            let _serial = self.serial.lock().await;
            tracing::info!(provider = %self.provider, %kind, "Sync started");
            match kind {
                SyncKind::Settings => self.run_settings().await,
                SyncKind::PodcastList => self.run_podcast_list().await,
                SyncKind::EpisodeMetadata => self.run_episode_metadata().await,
            }
        };

        if let Err(e) = &result {
            tracing::error!(provider = %self.provider, %kind, error = %e, "Sync failed");
            self.listeners.failed(&self.provider, e);
        } else {
            tracing::info!(provider = %self.provider, %kind, "Sync finished");
        }

        let round_completed = {
            let mut run = self.run_state();
            run.running.remove(&kind);
            run.round_failed |= result.is_err();
            let round_over = run.running.is_empty();
            if round_over {
                self.idle.send_replace(true);
            }
            round_over && !run.round_failed
        };

        if round_completed {
            self.listeners.completed(&self.provider);
        }
    }

    async fn run_settings(&self) -> Result<(), SyncError> {
        let keys = &self.options.synced_settings;
        if keys.is_empty() {
            return Ok(());
        }

        let remote = self.remote.get_settings().await?;

        if self.mode().receives() {
            let mut edit = PreferencesEdit::new();
            for key in keys {
                if let Some(value) = remote.get(key)
                    && self.ctx.prefs.string(key).as_ref() != Some(value)
                {
                    edit = edit.put_string(key, value.clone());
                }
            }
            if !edit.is_empty() {
                self.ctx.prefs.commit(edit)?;
            }
        }

        // Keys other devices sync stay as they are
        let mut merged = remote.clone();
        for key in keys {
            if let Some(value) = self.ctx.prefs.string(key) {
                merged.insert(key.clone(), value);
            }
        }
        if merged != remote {
            self.remote.put_settings(&merged).await?;
        }
        Ok(())
    }

    async fn run_podcast_list(&self) -> Result<(), SyncError> {
        // Read the list before the tracker: a podcast subscribed in between
        // is then tracked as added rather than found locally untracked
        let local = self.ctx.podcasts.podcast_urls();
        let tracked = self.tracker.snapshot();
        let first_sync = self.ctx.prefs.long(&self.first_sync_key).is_none();
        let remote = self.remote.get_subscriptions().await?;

        let plan = reconcile_subscriptions(SubscriptionInput {
            local: &local,
            tracked: &tracked,
            remote: &remote,
            mode: self.mode(),
            first_sync,
        });
        tracing::debug!(
            provider = %self.provider,
            push = plan.push.is_some(),
            add = plan.add_locally.len(),
            remove = plan.remove_locally.len(),
            "Subscription plan ready"
        );

        if let Some(urls) = &plan.push {
            self.remote.put_subscriptions(urls).await?;
        }

        // Local changes made since the snapshot win over the plan
        let added_since = self.tracker.snapshot_added();
        let removed_since = self.tracker.snapshot_removed();

        let source = ChangeSource::Sync(self.provider.clone());
        for url in plan
            .remove_locally
            .iter()
            .filter(|url| !added_since.contains(*url))
        {
            self.ctx.podcasts.remove_podcast_by_url(url, source.clone());
        }
        let additions = plan
            .add_locally
            .into_iter()
            .filter(|(url, _)| !removed_since.contains(url))
            .collect();
        self.add_podcasts(additions, source).await?;

        self.tracker.clear(&tracked.added, &tracked.removed)?;
        if first_sync {
            self.ctx
                .prefs
                .commit(PreferencesEdit::new().put_long(&self.first_sync_key, 1))?;
        }
        Ok(())
    }

    /// Load and subscribe `additions` concurrently, waiting for all of them
    ///
    /// Feeds that fail to load are skipped. Loads still running when the
    /// addition timeout expires keep going, but the run fails so the
    /// tracked changes are kept.
    async fn add_podcasts(
        &self,
        additions: BTreeMap<String, Option<String>>,
        source: ChangeSource,
    ) -> Result<(), SyncError> {
        if additions.is_empty() {
            return Ok(());
        }

        let total = additions.len();
        let slots = Arc::new(Semaphore::new(self.options.max_concurrent_additions.max(1)));
        let finished = Arc::new(Semaphore::new(0));

        for (url, name) in additions {
            let podcasts = self.ctx.podcasts.clone();
            let slots = slots.clone();
            let finished = finished.clone();
            let source = source.clone();
            let provider = self.provider.clone();

            self.ctx.runtime.spawn(async move {
                // The pool is never closed
                let _slot = slots.acquire_owned().await;
                let podcast = Podcast::new(&url, name.unwrap_or_else(|| url.clone()));
                match podcasts.load_podcast(&podcast).await {
                    Ok(loaded) => {
                        podcasts.add_podcast(loaded, source);
                    }
                    Err(e) => {
                        tracing::warn!(%provider, podcast = %url, error = %e, "Skipping podcast that failed to load");
                    }
                }
                finished.add_permits(1);
            });
        }

        let needed = u32::try_from(total).unwrap_or(u32::MAX);
        let timeout = self.options.addition_timeout();
        match tokio::time::timeout(timeout, finished.acquire_many(needed)).await {
            Ok(_) => Ok(()),
            Err(_) => Err(SyncError::AdditionsTimedOut {
                pending: total.saturating_sub(finished.available_permits()),
                timeout,
            }),
        }
    }

    async fn run_episode_metadata(&self) -> Result<(), SyncError> {
        self.ctx.episodes.wait_until_loaded().await;

        let since = self.ctx.prefs.long(&self.watermark_key);
        let pulled = self.remote.pull_episode_changes(since).await?;

        if self.mode().receives() {
            let report = apply_remote_changes(
                &pulled.changes,
                &self.ctx.podcasts,
                &self.ctx.episodes,
                &self.outgoing,
                &self.provider,
                self.options.resume_tolerance_ms,
            );
            tracing::debug!(provider = %self.provider, ?report, "Applied remote episode changes");
        }

        let pending = self.outgoing.snapshot();
        for batch in pending.chunks(self.options.push_batch_size.max(1)) {
            let changes: Vec<EpisodeChange> =
                batch.iter().map(|pending| pending.change.clone()).collect();
            let acknowledged = self.remote.push_episode_changes(&changes).await?;
            self.outgoing.remove_pushed(batch)?;
            tracing::debug!(provider = %self.provider, pushed = changes.len(), acknowledged, "Pushed episode changes");
        }

        self.ctx
            .prefs
            .commit(PreferencesEdit::new().put_long(&self.watermark_key, pulled.timestamp))?;
        Ok(())
    }

    fn handle_event(&self, event: &AppEvent) {
        if !self.is_active() {
            return;
        }
        if event
            .source()
            .is_some_and(|source| source.is_sync_of(&self.provider))
        {
            return;
        }

        match event {
            AppEvent::PodcastAdded { url, .. } => {
                if let Err(e) = self.tracker.record_added(url) {
                    tracing::error!(provider = %self.provider, podcast = %url, error = %e, "Failed to track added podcast");
                }
                self.sync_podcast_list();
            }
            AppEvent::PodcastRemoved { url, .. } => {
                if let Err(e) = self.tracker.record_removed(url) {
                    tracing::error!(provider = %self.provider, podcast = %url, error = %e, "Failed to track removed podcast");
                }
                self.sync_podcast_list();
            }
            AppEvent::PodcastLoaded { url, at } => {
                let recent = Utc::now()
                    .signed_duration_since(*at)
                    .to_std()
                    .map_or(true, |age| age <= self.options.recent_load_window());
                if recent {
                    tracing::trace!(provider = %self.provider, podcast = %url, "Podcast loaded, syncing episodes");
                    self.sync_episode_metadata();
                }
            }
            _ => {
                let changes = changes_for_event(event, Utc::now().timestamp_millis());
                if let Err(e) = self.outgoing.record_all(changes) {
                    tracing::error!(provider = %self.provider, error = %e, "Failed to queue episode changes");
                }
            }
        }
    }
}

impl std::fmt::Debug for SyncController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncController")
            .field("provider", &self.provider)
            .field("mode", &self.mode())
            .field("running", &self.is_running())
            .field("active", &self.is_active())
            .finish()
    }
}
