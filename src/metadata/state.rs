// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::events::{AppEvent, ChangeSource};
use crate::podcast::EpisodeRef;

use super::store::EpisodeMetadataStore;

/// Listened flag and resume position
impl EpisodeMetadataStore {
    /// Stored listened flag, `None` if never set
    pub fn state(&self, episode: &EpisodeRef) -> Option<bool> {
        self.read()
            .get(&episode.episode_url)
            .and_then(|record| record.is_old)
    }

    pub fn is_old(&self, episode: &EpisodeRef) -> bool {
        self.state(episode).unwrap_or(false)
    }

    /// Resume position in milliseconds, 0 if never played
    pub fn resume_at(&self, episode: &EpisodeRef) -> u64 {
        self.read()
            .get(&episode.episode_url)
            .and_then(|record| record.resume_at_millis)
            .unwrap_or(0)
    }

    pub fn set_old(&self, episode: &EpisodeRef, is_old: Option<bool>, source: ChangeSource) -> bool {
        let (_, changed) = self.update(episode, |record| record.is_old = is_old);
        if changed {
            self.emit(AppEvent::EpisodeStateChanged {
                episode: episode.clone(),
                is_old,
                source,
            });
        }
        changed
    }

    /// Set the listened flag of many episodes at once
    ///
    /// Emits a single bulk event listing only the episodes that actually
    /// changed. Returns how many did.
    pub fn set_old_for_all(
        &self,
        episodes: &[EpisodeRef],
        is_old: bool,
        source: ChangeSource,
    ) -> usize {
        let changed: Vec<EpisodeRef> = episodes
            .iter()
            .filter(|episode| {
                let (_, changed) = self.update(episode, |record| record.is_old = Some(is_old));
                changed
            })
            .cloned()
            .collect();

        let count = changed.len();
        if count > 0 {
            self.emit(AppEvent::EpisodeStatesChanged {
                episodes: changed,
                is_old,
                source,
            });
        }
        count
    }

    pub fn set_resume_at(
        &self,
        episode: &EpisodeRef,
        resume_at_millis: Option<u64>,
        source: ChangeSource,
    ) -> bool {
        let (_, changed) = self.update(episode, |record| record.resume_at_millis = resume_at_millis);
        if changed {
            self.emit(AppEvent::ResumeAtChanged {
                episode: episode.clone(),
                resume_at_millis,
                source,
            });
        }
        changed
    }

    /// Set listened flag and resume position in one step
    ///
    /// Both fields are written under the same lock; an event is emitted for
    /// each field that changed.
    pub fn set_state_and_resume(
        &self,
        episode: &EpisodeRef,
        is_old: Option<bool>,
        resume_at_millis: Option<u64>,
        source: ChangeSource,
    ) -> bool {
        let ((state_changed, resume_changed), changed) = self.update(episode, |record| {
            let state_changed = record.is_old != is_old;
            let resume_changed = record.resume_at_millis != resume_at_millis;
            record.is_old = is_old;
            record.resume_at_millis = resume_at_millis;
            (state_changed, resume_changed)
        });

        if state_changed {
            self.emit(AppEvent::EpisodeStateChanged {
                episode: episode.clone(),
                is_old,
                source: source.clone(),
            });
        }
        if resume_changed {
            self.emit(AppEvent::ResumeAtChanged {
                episode: episode.clone(),
                resume_at_millis,
                source,
            });
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::events::{AppEventListener, EventBus};

    use super::*;

    #[derive(Default)]
    struct Collector(Mutex<Vec<AppEvent>>);

    impl AppEventListener for Collector {
        fn on_event(&self, event: &AppEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    fn setup() -> (EpisodeMetadataStore, Arc<Collector>) {
        let bus = Arc::new(EventBus::new());
        let collector = Arc::new(Collector::default());
        bus.subscribe(collector.clone());
        (EpisodeMetadataStore::new(bus), collector)
    }

    fn ep(n: u32) -> EpisodeRef {
        EpisodeRef::new("https://example.com/feed", &format!("https://example.com/{n}.mp3"))
    }

    #[test]
    fn unchanged_values_emit_nothing() {
        let (store, events) = setup();

        assert!(store.set_old(&ep(1), Some(true), ChangeSource::Local));
        assert!(!store.set_old(&ep(1), Some(true), ChangeSource::Local));

        assert_eq!(events.0.lock().unwrap().len(), 1);
        assert!(store.is_old(&ep(1)));
    }

    #[test]
    fn bulk_update_emits_one_event_for_changed_episodes() {
        let (store, events) = setup();
        store.set_old(&ep(1), Some(true), ChangeSource::Local);
        events.0.lock().unwrap().clear();

        let changed = store.set_old_for_all(&[ep(1), ep(2), ep(3)], true, ChangeSource::Local);

        assert_eq!(changed, 2);
        let events = events.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            AppEvent::EpisodeStatesChanged { episodes, is_old, .. } => {
                assert_eq!(episodes, &vec![ep(2), ep(3)]);
                assert!(*is_old);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn combined_update_reports_each_changed_field() {
        let (store, events) = setup();
        store.set_resume_at(&ep(1), Some(5_000), ChangeSource::Local);
        events.0.lock().unwrap().clear();

        let source = ChangeSource::Sync(crate::sync::ProviderId::new("gpodder"));
        assert!(store.set_state_and_resume(&ep(1), Some(true), None, source.clone()));

        assert!(store.is_old(&ep(1)));
        assert_eq!(store.resume_at(&ep(1)), 0);
        let events = events.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            AppEvent::ResumeAtChanged { resume_at_millis: None, source: s, .. } if *s == source
        ));
    }
}
