// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::events::{AppEvent, ChangeSource};
use crate::podcast::EpisodeRef;

use super::store::EpisodeMetadataStore;

/// Index of finished episode downloads
impl EpisodeMetadataStore {
    pub fn download_id(&self, episode: &EpisodeRef) -> Option<u64> {
        self.read()
            .get(&episode.episode_url)
            .and_then(|record| record.download_id)
    }

    pub fn is_downloaded(&self, episode: &EpisodeRef) -> bool {
        self.download_id(episode).is_some()
    }

    /// Forget a download, e.g. after its file was deleted
    pub fn clear_download(&self, episode: &EpisodeRef) -> bool {
        let (_, changed) = self.update(episode, |record| record.download_id = None);
        changed
    }

    /// Record a finished download and notify listeners
    pub fn download_completed(&self, episode: &EpisodeRef, download_id: u64, source: ChangeSource) {
        self.update(episode, |record| record.download_id = Some(download_id));
        self.emit(AppEvent::DownloadCompleted {
            episode: episode.clone(),
            source,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::events::EventBus;

    use super::*;

    #[test]
    fn completed_download_is_indexed_until_cleared() {
        let store = EpisodeMetadataStore::new(Arc::new(EventBus::new()));
        let episode = EpisodeRef::new("https://example.com/feed", "https://example.com/1.mp3");

        store.download_completed(&episode, 7, ChangeSource::Local);
        assert!(store.is_downloaded(&episode));
        assert_eq!(store.download_id(&episode), Some(7));
        assert!(store.get(&episode.episode_url).unwrap().is_pinned());

        assert!(store.clear_download(&episode));
        assert!(!store.is_downloaded(&episode));
    }
}
