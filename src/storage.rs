// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StorageError;

/// Path of the temporary file a JSON document is written to before it
/// replaces the target
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

/// Serialize `value` and atomically replace the file at `path`
///
/// The document is written to `<path>.partial` first and renamed over the
/// target, so a crash mid-write never leaves a truncated file behind.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(value)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::WriteFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let partial = partial_path(path);
    std::fs::write(&partial, json).map_err(|e| StorageError::WriteFailed {
        path: partial.clone(),
        source: e,
    })?;
    std::fs::rename(&partial, path).map_err(|e| StorageError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Read a JSON document, returning `None` when the file does not exist yet
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StorageError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| StorageError::JsonParseFailed {
            path: path.to_path_buf(),
            source: e,
        })
}
