// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

/// Persisted per-episode state, keyed by episode id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_old: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_at_millis: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist_position: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_id: Option<u64>,
    /// Feed the episode was last seen in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub podcast_url: Option<String>,
}

impl EpisodeMetadata {
    /// Whether the record carries no state worth keeping
    pub fn is_empty(&self) -> bool {
        self.is_old.is_none()
            && self.resume_at_millis.is_none()
            && self.playlist_position.is_none()
            && self.download_id.is_none()
    }

    /// Whether the record must survive its podcast being unsubscribed
    pub fn is_pinned(&self) -> bool {
        self.playlist_position.is_some() || self.download_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provenance_alone_is_empty() {
        let record = EpisodeMetadata {
            podcast_url: Some("https://example.com/feed".into()),
            ..Default::default()
        };
        assert!(record.is_empty());
    }

    #[test]
    fn any_state_field_makes_record_non_empty() {
        let old = EpisodeMetadata {
            is_old: Some(false),
            ..Default::default()
        };
        let resumed = EpisodeMetadata {
            resume_at_millis: Some(0),
            ..Default::default()
        };
        assert!(!old.is_empty());
        assert!(!resumed.is_empty());
        assert!(!old.is_pinned());
    }

    #[test]
    fn serialization_skips_unset_fields() {
        let record = EpisodeMetadata {
            is_old: Some(true),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"is_old":true}"#);
    }
}
