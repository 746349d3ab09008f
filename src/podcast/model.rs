// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Normalize a feed URL so that equivalent spellings compare equal
///
/// Scheme and host are lower-cased and the path is percent-encoded
/// canonically by the `url` crate; fragments never identify a feed and are
/// dropped. Input that does not parse as a URL is only trimmed.
pub fn normalize_feed_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Login for feeds behind HTTP authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// A subscribed podcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Podcast {
    /// Normalized feed URL, the podcast's identity
    pub url: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    /// Episodes of the last successful load; empty until loaded
    #[serde(skip)]
    pub episodes: Vec<Episode>,
    #[serde(skip)]
    pub loaded_at: Option<DateTime<Utc>>,
}

impl Podcast {
    pub fn new(url: &str, name: impl Into<String>) -> Self {
        Self {
            url: normalize_feed_url(url),
            name: name.into(),
            credentials: None,
            episodes: Vec::new(),
            loaded_at: None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded_at.is_some()
    }

    /// Find an episode by its id (media URL or GUID)
    pub fn episode(&self, id: &str) -> Option<&Episode> {
        self.episodes.iter().find(|episode| episode.id() == id)
    }
}

impl PartialEq for Podcast {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for Podcast {}

/// A single episode of a podcast
///
/// Episodes are rebuilt on every feed load, so nothing is ever stored on
/// them; persistent per-episode state lives in the metadata store, keyed by
/// [`Episode::id`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub podcast_url: String,
    pub media_url: Option<String>,
    pub guid: Option<String>,
    pub title: String,
}

impl Episode {
    /// Media URL, falling back to the GUID for episodes without one
    pub fn id(&self) -> &str {
        self.media_url
            .as_deref()
            .or(self.guid.as_deref())
            .unwrap_or_default()
    }

    pub fn reference(&self) -> EpisodeRef {
        EpisodeRef::new(&self.podcast_url, self.id())
    }
}

/// Identifies an episode independently of any loaded feed
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpisodeRef {
    pub podcast_url: String,
    pub episode_url: String,
}

impl EpisodeRef {
    pub fn new(podcast_url: &str, episode_url: &str) -> Self {
        Self {
            podcast_url: normalize_feed_url(podcast_url),
            episode_url: episode_url.to_string(),
        }
    }
}
