// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when loading a podcast feed
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to fetch feed from {url}: {source}")]
    FetchFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("Failed to parse RSS feed: {0}")]
    ParseFailed(#[from] rss::Error),

    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Errors that can occur while reading or writing persisted JSON files
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to read {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse JSON in {path}: {source}")]
    JsonParseFailed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize JSON: {0}")]
    JsonSerializeFailed(#[from] serde_json::Error),
}

/// Errors reported by a remote sync provider
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),
}

/// Top-level errors for a sub-sync run
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{pending} podcast additions still pending after {timeout:?}")]
    AdditionsTimedOut { pending: usize, timeout: Duration },
}

impl SyncError {
    /// Whether the failure came from talking to the provider
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::Remote(RemoteError::Transport(_) | RemoteError::Timeout(_))
                | SyncError::AdditionsTimedOut { .. }
        )
    }
}
