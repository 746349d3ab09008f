// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;

use crate::events::{AppEvent, ChangeSource};
use crate::podcast::EpisodeRef;

use super::record::EpisodeMetadata;
use super::store::EpisodeMetadataStore;

/// Episode ids currently in the playlist, in order
fn ordered(records: &HashMap<String, EpisodeMetadata>) -> Vec<String> {
    let mut entries: Vec<(u32, &String)> = records
        .iter()
        .filter_map(|(id, record)| record.playlist_position.map(|position| (position, id)))
        .collect();
    entries.sort();
    entries.into_iter().map(|(_, id)| id.clone()).collect()
}

/// Assign dense positions 0..n in the given order
fn renumber(records: &mut HashMap<String, EpisodeMetadata>, order: &[String]) {
    for (position, id) in order.iter().enumerate() {
        if let Some(record) = records.get_mut(id) {
            record.playlist_position = Some(position as u32);
        }
    }
}

/// Play queue, stored as a position on each episode record
impl EpisodeMetadataStore {
    pub fn playlist(&self) -> Vec<String> {
        ordered(&self.read())
    }

    pub fn playlist_position(&self, episode: &EpisodeRef) -> Option<u32> {
        self.read()
            .get(&episode.episode_url)
            .and_then(|record| record.playlist_position)
    }

    /// Add an episode to the end of the playlist
    ///
    /// Returns its position, or `None` if it was already queued.
    pub fn append_to_playlist(&self, episode: &EpisodeRef, source: ChangeSource) -> Option<u32> {
        if self.playlist_position(episode).is_some() {
            return None;
        }
        Some(self.insert_into_playlist(episode, u32::MAX, source))
    }

    /// Move or insert an episode at `position`, clamped to the playlist length
    pub fn insert_into_playlist(
        &self,
        episode: &EpisodeRef,
        position: u32,
        source: ChangeSource,
    ) -> u32 {
        let mut records = self.write();
        let mut order = ordered(&records);
        let previous = order.iter().position(|id| *id == episode.episode_url);
        if let Some(index) = previous {
            order.remove(index);
        }
        let index = (position as usize).min(order.len());
        order.insert(index, episode.episode_url.clone());

        let record = records.entry(episode.episode_url.clone()).or_default();
        if record.podcast_url.is_none() {
            record.podcast_url = Some(episode.podcast_url.clone());
        }
        renumber(&mut records, &order);
        drop(records);

        if previous != Some(index) {
            self.mark_dirty();
            self.emit(AppEvent::PlaylistChanged {
                episode: episode.clone(),
                position: Some(index as u32),
                source,
            });
        }
        index as u32
    }

    pub fn remove_from_playlist(&self, episode: &EpisodeRef, source: ChangeSource) -> bool {
        let mut records = self.write();
        let mut order = ordered(&records);
        let Some(index) = order.iter().position(|id| *id == episode.episode_url) else {
            return false;
        };
        order.remove(index);
        if let Some(record) = records.get_mut(&episode.episode_url) {
            record.playlist_position = None;
        }
        renumber(&mut records, &order);
        drop(records);

        self.mark_dirty();
        self.emit(AppEvent::PlaylistChanged {
            episode: episode.clone(),
            position: None,
            source,
        });
        true
    }
}
