// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::RemoteError;
use crate::storage::partial_path;
use crate::sync::{
    EpisodeChange, RemoteEpisodeChanges, RemoteStore, RemoteSubscriptions,
};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Document {
    subscriptions: RemoteSubscriptions,
    actions: Vec<EpisodeChange>,
    settings: BTreeMap<String, String>,
    /// Timestamp of the newest action, in milliseconds
    timestamp: i64,
}

impl Document {
    /// A timestamp later than every one handed out before
    fn next_timestamp(&mut self) -> i64 {
        self.timestamp = Utc::now().timestamp_millis().max(self.timestamp + 1);
        self.timestamp
    }

    /// Keep only the newest action per episode and field
    fn compact(&mut self) {
        let mut seen = HashSet::new();
        let mut kept: Vec<EpisodeChange> = self
            .actions
            .drain(..)
            .rev()
            .filter(|change| seen.insert((change.episode_url.clone(), change.action.kind())))
            .collect();
        kept.reverse();
        self.actions = kept;
    }
}

/// A remote store kept in a single JSON file
///
/// Several devices can share the file through any file synchronization
/// service. Pushed actions are stamped with strictly increasing times, and
/// pulls return the actions stamped after the given watermark.
pub struct FileRemoteStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileRemoteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Document, RemoteError> {
        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::default()),
            Err(e) => {
                return Err(RemoteError::Transport(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        serde_json::from_slice(&content).map_err(|e| {
            RemoteError::Transport(format!("Corrupt remote file {}: {e}", self.path.display()))
        })
    }

    async fn write(&self, document: &Document) -> Result<(), RemoteError> {
        let json = serde_json::to_vec_pretty(document)
            .map_err(|e| RemoteError::Transport(format!("Failed to encode remote file: {e}")))?;
        let write_failed = |e: std::io::Error| {
            RemoteError::Transport(format!("Failed to write {}: {e}", self.path.display()))
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
        }
        let partial = partial_path(&self.path);
        tokio::fs::write(&partial, json).await.map_err(write_failed)?;
        tokio::fs::rename(&partial, &self.path)
            .await
            .map_err(write_failed)
    }

    /// Read, modify and write back the document under the store's lock
    async fn modify<R>(&self, f: impl FnOnce(&mut Document) -> R) -> Result<R, RemoteError> {
        let _guard = self.lock.lock().await;
        let mut document = self.read().await?;
        let result = f(&mut document);
        self.write(&document).await?;
        Ok(result)
    }
}

#[async_trait]
impl RemoteStore for FileRemoteStore {
    async fn get_subscriptions(&self) -> Result<RemoteSubscriptions, RemoteError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.subscriptions)
    }

    async fn put_subscriptions(&self, urls: &BTreeSet<String>) -> Result<(), RemoteError> {
        self.modify(|document| {
            let previous = std::mem::take(&mut document.subscriptions);
            document.subscriptions = urls
                .iter()
                .map(|url| (url.clone(), previous.get(url).cloned().flatten()))
                .collect();
        })
        .await
    }

    async fn pull_episode_changes(
        &self,
        since: Option<i64>,
    ) -> Result<RemoteEpisodeChanges, RemoteError> {
        let _guard = self.lock.lock().await;
        let document = self.read().await?;
        let after = since.unwrap_or(i64::MIN);
        Ok(RemoteEpisodeChanges {
            changes: document
                .actions
                .into_iter()
                .filter(|change| change.timestamp > after)
                .collect(),
            timestamp: document.timestamp,
        })
    }

    async fn push_episode_changes(&self, changes: &[EpisodeChange]) -> Result<i64, RemoteError> {
        self.modify(|document| {
            for change in changes {
                let mut stored = change.clone();
                stored.timestamp = document.next_timestamp();
                document.actions.push(stored);
            }
            document.compact();
            document.timestamp
        })
        .await
    }

    async fn get_settings(&self) -> Result<BTreeMap<String, String>, RemoteError> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.settings)
    }

    async fn put_settings(&self, settings: &BTreeMap<String, String>) -> Result<(), RemoteError> {
        self.modify(|document| document.settings = settings.clone())
            .await
    }

    fn on_deactivate(&self) {
        tracing::debug!(path = %self.path.display(), "File remote released");
    }
}
