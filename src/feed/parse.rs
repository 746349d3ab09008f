// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::Utc;

use crate::error::FeedError;
use crate::podcast::{Episode, Podcast};

/// Parse RSS feed XML bytes into a loaded [`Podcast`]
///
/// Items without an enclosure and without a GUID cannot be identified and
/// are skipped.
pub fn parse_feed(xml_bytes: &[u8], feed_url: &str) -> Result<Podcast, FeedError> {
    let channel = rss::Channel::read_from(xml_bytes)?;

    let mut podcast = Podcast::new(feed_url, channel.title().trim());
    podcast.episodes = channel
        .items()
        .iter()
        .filter_map(|item| parse_episode(item, &podcast.url))
        .collect();
    podcast.loaded_at = Some(Utc::now());

    Ok(podcast)
}

fn parse_episode(item: &rss::Item, podcast_url: &str) -> Option<Episode> {
    let media_url = item
        .enclosure()
        .map(|enclosure| enclosure.url().trim().to_string())
        .filter(|url| !url.is_empty());
    let guid = item
        .guid()
        .map(|g| g.value().trim().to_string())
        .filter(|guid| !guid.is_empty());

    if media_url.is_none() && guid.is_none() {
        return None;
    }

    Some(Episode {
        podcast_url: podcast_url.to_string(),
        media_url,
        guid,
        title: item
            .title()
            .map(String::from)
            .unwrap_or_else(|| "Untitled Episode".to_string()),
    })
}
