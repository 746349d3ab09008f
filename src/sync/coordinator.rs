// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::join_all;

use super::controller::SyncController;
use super::listener::SharedSyncListener;
use super::{ProviderId, SyncMode};

/// The active sync controllers of an app session, one per provider
///
/// Requests made here are fanned out to every controller; listeners added
/// here are attached to current and future controllers alike.
#[derive(Default)]
pub struct SyncCoordinator {
    controllers: RwLock<BTreeMap<ProviderId, Arc<SyncController>>>,
    listeners: RwLock<Vec<SharedSyncListener>>,
}

impl SyncCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ProviderId, Arc<SyncController>>> {
        self.controllers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ProviderId, Arc<SyncController>>> {
        self.controllers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self) -> Vec<Arc<SyncController>> {
        self.read().values().cloned().collect()
    }

    /// Register `controller`, deactivating the one it replaces
    pub fn add_controller(&self, controller: Arc<SyncController>) {
        for listener in self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
        {
            controller.add_listener(listener.clone());
        }

        let provider = controller.provider().clone();
        let replaced = self.write().insert(provider.clone(), controller);
        if let Some(previous) = replaced {
            tracing::info!(%provider, "Replacing sync controller");
            previous.deactivate();
        }
    }

    /// Unregister and deactivate the controller of `provider`
    pub fn remove_controller(&self, provider: &ProviderId) -> Option<Arc<SyncController>> {
        let removed = self.write().remove(provider)?;
        removed.deactivate();
        Some(removed)
    }

    pub fn controller(&self, provider: &ProviderId) -> Option<Arc<SyncController>> {
        self.read().get(provider).cloned()
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        self.read().keys().cloned().collect()
    }

    pub fn add_listener(&self, listener: SharedSyncListener) {
        for controller in self.snapshot() {
            controller.add_listener(listener.clone());
        }
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !listeners.iter().any(|existing| Arc::ptr_eq(existing, &listener)) {
            listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &SharedSyncListener) {
        for controller in self.snapshot() {
            controller.remove_listener(listener);
        }
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|existing| !Arc::ptr_eq(existing, listener));
    }

    pub fn sync_all(&self) {
        for controller in self.snapshot() {
            controller.sync();
        }
    }

    pub fn sync_podcast_lists(&self) {
        for controller in self.snapshot() {
            controller.sync_podcast_list();
        }
    }

    pub fn sync_episode_metadata(&self) {
        for controller in self.snapshot() {
            controller.sync_episode_metadata();
        }
    }

    /// Change the mode of `provider`. Returns false if it has no controller.
    ///
    /// Several providers may receive at once, but their changes then race
    /// each other, so this is logged.
    pub fn set_mode(&self, provider: &ProviderId, mode: SyncMode) -> bool {
        let Some(controller) = self.controller(provider) else {
            return false;
        };

        if mode.receives() {
            let others: Vec<ProviderId> = self
                .snapshot()
                .iter()
                .filter(|other| other.provider() != provider && other.mode().receives())
                .map(|other| other.provider().clone())
                .collect();
            if !others.is_empty() {
                tracing::warn!(%provider, ?others, "Several providers apply remote changes");
            }
        }

        controller.set_mode(mode);
        true
    }

    pub fn is_running(&self) -> bool {
        self.read().values().any(|controller| controller.is_running())
    }

    /// Wait until every controller is idle
    pub async fn wait_until_idle(&self) {
        let controllers = self.snapshot();
        join_all(controllers.iter().map(|controller| controller.wait_until_idle())).await;
    }

    /// Deactivate and drop all controllers, e.g. at the end of a session
    pub fn deactivate_all(&self) {
        let controllers = std::mem::take(&mut *self.write());
        for controller in controllers.into_values() {
            controller.deactivate();
        }
    }
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("providers", &self.providers())
            .finish()
    }
}
