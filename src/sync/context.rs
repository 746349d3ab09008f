// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::events::EventBus;
use crate::metadata::EpisodeMetadataStore;
use crate::podcast::PodcastManager;
use crate::prefs::SharedPreferences;

/// App-session services shared by all sync controllers
#[derive(Clone)]
pub struct SyncContext {
    pub podcasts: Arc<PodcastManager>,
    pub episodes: Arc<EpisodeMetadataStore>,
    pub prefs: SharedPreferences,
    pub events: Arc<EventBus>,
    /// Runtime sync tasks are spawned on, whatever thread triggers them
    pub runtime: Handle,
}

impl SyncContext {
    pub fn new(
        podcasts: Arc<PodcastManager>,
        episodes: Arc<EpisodeMetadataStore>,
        prefs: SharedPreferences,
        events: Arc<EventBus>,
        runtime: Handle,
    ) -> Self {
        Self {
            podcasts,
            episodes,
            prefs,
            events,
            runtime,
        }
    }
}
