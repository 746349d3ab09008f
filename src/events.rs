// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Application events shared between the podcast manager, the episode
//! metadata store and the sync controllers.
//!
//! Listeners are notified synchronously on the emitting thread. `emit`
//! works on a snapshot of the registrations, so a listener may subscribe or
//! unsubscribe (itself included) while an event is being delivered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::podcast::EpisodeRef;
use crate::sync::ProviderId;

/// Where a state change originated
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeSource {
    /// A user or app action on this device
    Local,
    /// Applied by the sync controller of the given provider
    Sync(ProviderId),
}

impl ChangeSource {
    /// Whether this change was applied by `provider`'s own sync run
    pub fn is_sync_of(&self, provider: &ProviderId) -> bool {
        matches!(self, ChangeSource::Sync(p) if p == provider)
    }
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    PodcastAdded {
        url: String,
        source: ChangeSource,
    },

    PodcastRemoved {
        url: String,
        source: ChangeSource,
    },

    /// A podcast feed was (re)loaded
    PodcastLoaded { url: String, at: DateTime<Utc> },

    EpisodeStateChanged {
        episode: EpisodeRef,
        is_old: Option<bool>,
        source: ChangeSource,
    },

    /// Many episodes changed state in one user action
    EpisodeStatesChanged {
        episodes: Vec<EpisodeRef>,
        is_old: bool,
        source: ChangeSource,
    },

    ResumeAtChanged {
        episode: EpisodeRef,
        resume_at_millis: Option<u64>,
        source: ChangeSource,
    },

    PlaylistChanged {
        episode: EpisodeRef,
        position: Option<u32>,
        source: ChangeSource,
    },

    DownloadCompleted {
        episode: EpisodeRef,
        source: ChangeSource,
    },
}

impl AppEvent {
    /// Origin of the change, `None` for events that are not changes
    pub fn source(&self) -> Option<&ChangeSource> {
        match self {
            AppEvent::PodcastAdded { source, .. }
            | AppEvent::PodcastRemoved { source, .. }
            | AppEvent::EpisodeStateChanged { source, .. }
            | AppEvent::EpisodeStatesChanged { source, .. }
            | AppEvent::ResumeAtChanged { source, .. }
            | AppEvent::PlaylistChanged { source, .. }
            | AppEvent::DownloadCompleted { source, .. } => Some(source),
            AppEvent::PodcastLoaded { .. } => None,
        }
    }
}

/// Receives application events
pub trait AppEventListener: Send + Sync {
    fn on_event(&self, event: &AppEvent);
}

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Broadcasts [`AppEvent`]s to registered listeners
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn AppEventListener>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn AppEventListener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, listener));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn emit(&self, event: AppEvent) {
        let snapshot: Vec<Arc<dyn AppEventListener>> = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        for listener in snapshot {
            listener.on_event(&event);
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
