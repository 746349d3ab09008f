// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::read_json;

/// Options for podcast synchronization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Remote resume positions closer than this to the local one are ignored
    pub resume_tolerance_ms: u64,
    /// A podcast load younger than this re-triggers episode sync
    pub recent_load_window_secs: u64,
    /// How long a podcast list sync waits for auto-added feeds to load
    pub addition_timeout_secs: u64,
    /// Maximum number of feeds loaded concurrently while auto-adding
    pub max_concurrent_additions: usize,
    /// HTTP timeout for a single feed download
    pub feed_timeout_secs: u64,
    /// Maximum number of episode changes per push
    pub push_batch_size: usize,
    /// String preferences mirrored by settings sync
    pub synced_settings: Vec<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            resume_tolerance_ms: 1000,
            recent_load_window_secs: 60,
            addition_timeout_secs: 120,
            max_concurrent_additions: 4,
            feed_timeout_secs: 30,
            push_batch_size: 500,
            synced_settings: Vec::new(),
        }
    }
}

impl SyncOptions {
    /// Read options from a JSON file; missing fields keep their defaults
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        Ok(read_json(path)?.unwrap_or_default())
    }

    pub fn recent_load_window(&self) -> Duration {
        Duration::from_secs(self.recent_load_window_secs)
    }

    pub fn addition_timeout(&self) -> Duration {
        Duration::from_secs(self.addition_timeout_secs)
    }

    pub fn feed_timeout(&self) -> Duration {
        Duration::from_secs(self.feed_timeout_secs)
    }
}
