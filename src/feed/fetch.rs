// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use url::Url;

use crate::error::FeedError;
use crate::http::HttpClient;
use crate::podcast::{Credentials, Podcast, PodcastLoader};

use super::parse::parse_feed;

/// Fetch and parse a podcast feed from a URL
pub async fn fetch_feed<C: HttpClient>(
    client: &C,
    url: &str,
    credentials: Option<&Credentials>,
) -> Result<Podcast, FeedError> {
    Url::parse(url)?;

    let response = client
        .get(url, credentials)
        .await
        .map_err(|e| FeedError::FetchFailed {
            url: url.to_string(),
            source: e,
        })?;

    if response.status >= 400 {
        return Err(FeedError::HttpStatus {
            url: url.to_string(),
            status: response.status,
        });
    }

    parse_feed(&response.body, url)
}

/// [`PodcastLoader`] that downloads and parses the RSS feed
#[derive(Clone)]
pub struct FeedLoader<C> {
    client: C,
}

impl<C: HttpClient> FeedLoader<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: HttpClient> PodcastLoader for FeedLoader<C> {
    async fn load(&self, podcast: &Podcast) -> Result<Podcast, FeedError> {
        let mut loaded = fetch_feed(&self.client, &podcast.url, podcast.credentials.as_ref()).await?;
        loaded.credentials = podcast.credentials.clone();
        if loaded.name.is_empty() {
            loaded.name = podcast.name.clone();
        }
        Ok(loaded)
    }
}
