// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synchronization of subscriptions and episode state with remote providers.
//!
//! A [`SyncController`] per provider reconciles local state with one
//! [`RemoteStore`]; the [`SyncCoordinator`] fans app-level requests out to
//! all active controllers.

mod context;
mod controller;
mod coordinator;
mod episodes;
mod listener;
mod outgoing;
mod remote;
mod subscriptions;
mod tracker;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use context::SyncContext;
pub use controller::SyncController;
pub use coordinator::SyncCoordinator;
pub use episodes::{ApplyReport, apply_remote_changes};
pub use listener::{NoopListener, SharedSyncListener, SyncListener};
pub use outgoing::{OutgoingChanges, PendingChange};
pub use remote::{
    ChangeKind, EpisodeAction, EpisodeChange, RemoteEpisodeChanges, RemoteStore,
    RemoteSubscriptions,
};
pub use subscriptions::{SubscriptionInput, SubscriptionPlan, reconcile_subscriptions};
pub use tracker::{ChangeSnapshot, LocalChangeTracker};

/// Identifies a sync provider, e.g. "gpodder" or "dropbox"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(String);

impl ProviderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Direction in which a controller synchronizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Push local changes, never change local state
    #[default]
    SendOnly,
    /// Push local changes and apply remote ones
    SendReceive,
}

impl SyncMode {
    pub fn receives(self) -> bool {
        self == SyncMode::SendReceive
    }
}

/// The independently schedulable parts of a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncKind {
    Settings,
    PodcastList,
    EpisodeMetadata,
}

impl SyncKind {
    pub const ALL: [SyncKind; 3] = [
        SyncKind::Settings,
        SyncKind::PodcastList,
        SyncKind::EpisodeMetadata,
    ];
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncKind::Settings => "settings",
            SyncKind::PodcastList => "podcast list",
            SyncKind::EpisodeMetadata => "episode metadata",
        })
    }
}
