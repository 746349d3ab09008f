// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::events::{AppEvent, ChangeSource};
use crate::metadata::EpisodeMetadataStore;
use crate::podcast::{EpisodeRef, PodcastManager};

use super::ProviderId;
use super::outgoing::OutgoingChanges;
use super::remote::{EpisodeAction, EpisodeChange};

/// Outcome of applying pulled episode changes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Changes that modified local state
    pub applied: usize,
    /// Changes that matched local state already
    pub unchanged: usize,
    /// Changes for podcasts not subscribed here
    pub unknown_podcast: usize,
    /// Changes overridden by a pending local change to the same field
    pub superseded: usize,
}

/// Apply pulled remote changes to local episode state
///
/// Changes are applied oldest first through the store's setters, tagged
/// with `provider` as their source so that provider's controller does not
/// queue them for upload again. A change is skipped when its podcast is
/// unknown, when a local change to the same field is still waiting to be
/// pushed, or when it would move the resume position by no more than
/// `tolerance_ms`.
pub fn apply_remote_changes(
    changes: &[EpisodeChange],
    podcasts: &PodcastManager,
    episodes: &EpisodeMetadataStore,
    outgoing: &OutgoingChanges,
    provider: &ProviderId,
    tolerance_ms: u64,
) -> ApplyReport {
    let mut ordered: Vec<&EpisodeChange> = changes.iter().collect();
    ordered.sort_by_key(|change| change.timestamp);

    let mut report = ApplyReport::default();
    for change in ordered {
        if !podcasts.contains_url(&change.podcast_url) {
            tracing::debug!(%provider, podcast = %change.podcast_url, "Skipping change for unknown podcast");
            report.unknown_podcast += 1;
            continue;
        }
        if outgoing.has_pending(&change.episode_url, change.action.kind()) {
            report.superseded += 1;
            continue;
        }

        let episode = change.episode();
        let source = ChangeSource::Sync(provider.clone());
        if apply_action(episodes, &episode, change.action, source, tolerance_ms) {
            report.applied += 1;
        } else {
            report.unchanged += 1;
        }
    }

    if report.unknown_podcast > 0 {
        tracing::warn!(
            %provider,
            skipped = report.unknown_podcast,
            "Remote episode changes reference podcasts that are not subscribed"
        );
    }
    report
}

fn apply_action(
    episodes: &EpisodeMetadataStore,
    episode: &EpisodeRef,
    action: EpisodeAction,
    source: ChangeSource,
    tolerance_ms: u64,
) -> bool {
    match action {
        EpisodeAction::Played { position_ms } => {
            let local = episodes.resume_at(episode);
            local.abs_diff(position_ms) > tolerance_ms
                && episodes.set_resume_at(episode, Some(position_ms), source)
        }
        EpisodeAction::ResetPosition => episodes.set_resume_at(episode, None, source),
        EpisodeAction::MarkedOld => {
            episodes.set_state_and_resume(episode, Some(true), None, source)
        }
        EpisodeAction::MarkedNew => {
            episodes.set_state_and_resume(episode, Some(false), None, source)
        }
        EpisodeAction::PlaylistAdded { position } => {
            if episodes.playlist_position(episode).is_some() {
                return false;
            }
            episodes.insert_into_playlist(episode, position, source);
            true
        }
        EpisodeAction::PlaylistRemoved => episodes.remove_from_playlist(episode, source),
        EpisodeAction::Downloaded => false,
    }
}

/// Translate an application event into the episode changes to upload
pub(crate) fn changes_for_event(event: &AppEvent, timestamp: i64) -> Vec<EpisodeChange> {
    match event {
        AppEvent::EpisodeStateChanged {
            episode, is_old, ..
        } => {
            let action = if *is_old == Some(true) {
                EpisodeAction::MarkedOld
            } else {
                EpisodeAction::MarkedNew
            };
            vec![EpisodeChange::new(episode, action, timestamp)]
        }
        AppEvent::EpisodeStatesChanged {
            episodes, is_old, ..
        } => {
            let action = if *is_old {
                EpisodeAction::MarkedOld
            } else {
                EpisodeAction::MarkedNew
            };
            episodes
                .iter()
                .map(|episode| EpisodeChange::new(episode, action, timestamp))
                .collect()
        }
        AppEvent::ResumeAtChanged {
            episode,
            resume_at_millis,
            ..
        } => {
            let action = match resume_at_millis {
                Some(position_ms) if *position_ms > 0 => EpisodeAction::Played {
                    position_ms: *position_ms,
                },
                _ => EpisodeAction::ResetPosition,
            };
            vec![EpisodeChange::new(episode, action, timestamp)]
        }
        AppEvent::PlaylistChanged {
            episode, position, ..
        } => {
            let action = match position {
                Some(position) => EpisodeAction::PlaylistAdded {
                    position: *position,
                },
                None => EpisodeAction::PlaylistRemoved,
            };
            vec![EpisodeChange::new(episode, action, timestamp)]
        }
        AppEvent::DownloadCompleted { episode, .. } => {
            vec![EpisodeChange::new(episode, EpisodeAction::Downloaded, timestamp)]
        }
        AppEvent::PodcastAdded { .. }
        | AppEvent::PodcastRemoved { .. }
        | AppEvent::PodcastLoaded { .. } => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::events::EventBus;
    use crate::podcast::Podcast;
    use crate::prefs::MemoryPreferences;
    use crate::sync::testing::NoLoader;

    const FEED: &str = "https://example.com/feed";

    struct Fixture {
        podcasts: PodcastManager,
        episodes: Arc<EpisodeMetadataStore>,
        outgoing: OutgoingChanges,
        provider: ProviderId,
    }

    impl Fixture {
        fn new() -> Self {
            let events = Arc::new(EventBus::new());
            let episodes = Arc::new(EpisodeMetadataStore::new(events.clone()));
            let podcasts = PodcastManager::new(Arc::new(NoLoader), episodes.clone(), events);
            podcasts.add_podcast(Podcast::new(FEED, "Feed"), ChangeSource::Local);
            let provider = ProviderId::new("gpodder");
            Self {
                podcasts,
                episodes,
                outgoing: OutgoingChanges::new(MemoryPreferences::shared(), &provider),
                provider,
            }
        }

        fn apply(&self, changes: &[EpisodeChange]) -> ApplyReport {
            apply_remote_changes(
                changes,
                &self.podcasts,
                &self.episodes,
                &self.outgoing,
                &self.provider,
                1000,
            )
        }
    }

    fn ep(n: u32) -> EpisodeRef {
        EpisodeRef::new(FEED, &format!("https://example.com/{n}.mp3"))
    }

    #[test]
    fn resume_within_tolerance_is_ignored() {
        let fixture = Fixture::new();
        fixture
            .episodes
            .set_resume_at(&ep(1), Some(60_000), ChangeSource::Local);

        let report = fixture.apply(&[EpisodeChange::new(
            &ep(1),
            EpisodeAction::Played { position_ms: 61_000 },
            1,
        )]);

        assert_eq!(report.unchanged, 1);
        assert_eq!(fixture.episodes.resume_at(&ep(1)), 60_000);
    }

    #[test]
    fn resume_beyond_tolerance_is_applied() {
        let fixture = Fixture::new();
        fixture
            .episodes
            .set_resume_at(&ep(1), Some(60_000), ChangeSource::Local);

        let report = fixture.apply(&[EpisodeChange::new(
            &ep(1),
            EpisodeAction::Played { position_ms: 61_001 },
            1,
        )]);

        assert_eq!(report.applied, 1);
        assert_eq!(fixture.episodes.resume_at(&ep(1)), 61_001);
    }

    #[test]
    fn marking_old_clears_resume_position() {
        let fixture = Fixture::new();
        fixture
            .episodes
            .set_resume_at(&ep(1), Some(5_000), ChangeSource::Local);

        fixture.apply(&[EpisodeChange::new(&ep(1), EpisodeAction::MarkedOld, 1)]);

        assert!(fixture.episodes.is_old(&ep(1)));
        assert_eq!(fixture.episodes.get(&ep(1).episode_url).unwrap().resume_at_millis, None);
    }

    #[test]
    fn changes_apply_in_timestamp_order() {
        let fixture = Fixture::new();
        fixture.apply(&[
            EpisodeChange::new(&ep(1), EpisodeAction::MarkedNew, 20),
            EpisodeChange::new(&ep(1), EpisodeAction::MarkedOld, 10),
        ]);

        assert_eq!(fixture.episodes.state(&ep(1)), Some(false));
    }

    #[test]
    fn unknown_podcasts_are_skipped() {
        let fixture = Fixture::new();
        let stranger = EpisodeRef::new("https://unknown.example.com/feed", "https://unknown.example.com/1.mp3");

        let report = fixture.apply(&[EpisodeChange::new(&stranger, EpisodeAction::MarkedOld, 1)]);

        assert_eq!(report.unknown_podcast, 1);
        assert!(fixture.episodes.is_empty());
    }

    #[test]
    fn pending_local_change_wins() {
        let fixture = Fixture::new();
        fixture
            .outgoing
            .record(EpisodeChange::new(&ep(1), EpisodeAction::Played { position_ms: 90_000 }, 5))
            .unwrap();

        let report = fixture.apply(&[EpisodeChange::new(
            &ep(1),
            EpisodeAction::Played { position_ms: 10_000 },
            1,
        )]);

        assert_eq!(report.superseded, 1);
        assert_eq!(fixture.episodes.resume_at(&ep(1)), 0);
    }

    #[test]
    fn playlist_actions_apply_once() {
        let fixture = Fixture::new();
        let added = EpisodeChange::new(&ep(1), EpisodeAction::PlaylistAdded { position: 3 }, 1);

        assert_eq!(fixture.apply(&[added.clone()]).applied, 1);
        assert_eq!(fixture.apply(&[added]).unchanged, 1);
        assert_eq!(fixture.episodes.playlist_position(&ep(1)), Some(0));

        let removed = EpisodeChange::new(&ep(1), EpisodeAction::PlaylistRemoved, 2);
        assert_eq!(fixture.apply(&[removed]).applied, 1);
        assert!(fixture.episodes.playlist().is_empty());
    }

    #[test]
    fn resume_zero_maps_to_reset() {
        let event = AppEvent::ResumeAtChanged {
            episode: ep(1),
            resume_at_millis: Some(0),
            source: ChangeSource::Local,
        };
        let changes = changes_for_event(&event, 7);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, EpisodeAction::ResetPosition);
        assert_eq!(changes[0].timestamp, 7);
    }

    #[test]
    fn bulk_state_change_expands_per_episode() {
        let event = AppEvent::EpisodeStatesChanged {
            episodes: vec![ep(1), ep(2)],
            is_old: true,
            source: ChangeSource::Local,
        };
        let changes = changes_for_event(&event, 1);
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().all(|c| c.action == EpisodeAction::MarkedOld));
    }
}
