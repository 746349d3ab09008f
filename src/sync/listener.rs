// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::{Arc, RwLock};

use crate::error::SyncError;

use super::ProviderId;

/// Trait for observing sync runs of a controller.
///
/// All methods default to doing nothing, so implementations only override
/// what they display. Callbacks run on the sync task, not the caller of
/// `sync()`.
pub trait SyncListener: Send + Sync {
    /// A controller went from idle to running
    fn on_sync_triggered(&self, _provider: &ProviderId) {}

    /// Every sub-sync of the round finished and none failed
    fn on_sync_completed(&self, _provider: &ProviderId) {}

    /// A sub-sync failed; local changes are kept for the next attempt
    fn on_sync_failed(&self, _provider: &ProviderId, _error: &SyncError) {}
}

/// A shared reference to a sync listener
pub type SharedSyncListener = Arc<dyn SyncListener>;

/// A no-op listener that silently ignores all callbacks.
/// Useful for tests or quiet mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl SyncListener for NoopListener {}

impl NoopListener {
    /// Create a new NoopListener wrapped in an Arc
    pub fn shared() -> SharedSyncListener {
        Arc::new(Self)
    }
}

/// Registered listeners, notified from a snapshot of the list
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: RwLock<Vec<SharedSyncListener>>,
}

impl ListenerSet {
    pub fn add(&self, listener: SharedSyncListener) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !listeners.iter().any(|existing| Arc::ptr_eq(existing, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove(&self, listener: &SharedSyncListener) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = listeners.len();
        listeners.retain(|existing| !Arc::ptr_eq(existing, listener));
        listeners.len() != before
    }

    fn snapshot(&self) -> Vec<SharedSyncListener> {
        self.listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn triggered(&self, provider: &ProviderId) {
        for listener in self.snapshot() {
            listener.on_sync_triggered(provider);
        }
    }

    pub fn completed(&self, provider: &ProviderId) {
        for listener in self.snapshot() {
            listener.on_sync_completed(provider);
        }
    }

    pub fn failed(&self, provider: &ProviderId, error: &SyncError) {
        for listener in self.snapshot() {
            listener.on_sync_failed(provider, error);
        }
    }
}
