// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::podcast::EpisodeRef;

/// Remote subscription list: feed URL to display name, if the provider
/// stores one
pub type RemoteSubscriptions = BTreeMap<String, Option<String>>;

/// A change to one episode's state
///
/// Resetting the resume position is its own action because a position of 0
/// already means "never played".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EpisodeAction {
    Played { position_ms: u64 },
    ResetPosition,
    MarkedOld,
    MarkedNew,
    PlaylistAdded { position: u32 },
    PlaylistRemoved,
    Downloaded,
}

/// Which field of the episode an action touches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    State,
    Position,
    Playlist,
    Download,
}

impl EpisodeAction {
    pub fn kind(&self) -> ChangeKind {
        match self {
            EpisodeAction::Played { .. } | EpisodeAction::ResetPosition => ChangeKind::Position,
            EpisodeAction::MarkedOld | EpisodeAction::MarkedNew => ChangeKind::State,
            EpisodeAction::PlaylistAdded { .. } | EpisodeAction::PlaylistRemoved => {
                ChangeKind::Playlist
            }
            EpisodeAction::Downloaded => ChangeKind::Download,
        }
    }
}

/// A time-stamped episode action, as exchanged with a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeChange {
    pub podcast_url: String,
    pub episode_url: String,
    #[serde(flatten)]
    pub action: EpisodeAction,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl EpisodeChange {
    pub fn new(episode: &EpisodeRef, action: EpisodeAction, timestamp: i64) -> Self {
        Self {
            podcast_url: episode.podcast_url.clone(),
            episode_url: episode.episode_url.clone(),
            action,
            timestamp,
        }
    }

    pub fn episode(&self) -> EpisodeRef {
        EpisodeRef::new(&self.podcast_url, &self.episode_url)
    }
}

/// Result of pulling episode changes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteEpisodeChanges {
    pub changes: Vec<EpisodeChange>,
    /// Provider time of the pull, the watermark for the next one
    pub timestamp: i64,
}

/// Opaque remote state of one provider
///
/// Implementations own the wire format; the sync core only sees these
/// primitives. Every method may fail with a transport or auth error, which
/// aborts the running sub-sync.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get_subscriptions(&self) -> Result<RemoteSubscriptions, RemoteError>;

    /// Replace the remote subscription list
    async fn put_subscriptions(&self, urls: &BTreeSet<String>) -> Result<(), RemoteError>;

    /// Episode changes recorded after `since` (everything when `None`)
    async fn pull_episode_changes(
        &self,
        since: Option<i64>,
    ) -> Result<RemoteEpisodeChanges, RemoteError>;

    /// Upload changes, returning the provider's acknowledgement time
    async fn push_episode_changes(&self, changes: &[EpisodeChange]) -> Result<i64, RemoteError>;

    async fn get_settings(&self) -> Result<BTreeMap<String, String>, RemoteError> {
        Ok(BTreeMap::new())
    }

    async fn put_settings(&self, _settings: &BTreeMap<String, String>) -> Result<(), RemoteError> {
        Ok(())
    }

    /// Provider-specific teardown when its controller is deactivated
    fn on_deactivate(&self) {}
}
