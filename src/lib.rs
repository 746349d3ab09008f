pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod http;
pub mod metadata;
pub mod podcast;
pub mod prefs;
pub mod providers;
pub mod storage;
pub mod sync;

// Re-export main types for convenience
pub use config::SyncOptions;
pub use error::{FeedError, RemoteError, StorageError, SyncError};
pub use events::{AppEvent, AppEventListener, ChangeSource, EventBus, ListenerId};
pub use feed::{FeedLoader, fetch_feed, parse_feed};
pub use http::{HttpClient, HttpResponse, ReqwestClient};
pub use metadata::{EpisodeMetadata, EpisodeMetadataStore};
pub use podcast::{
    Credentials, Episode, EpisodeRef, Podcast, PodcastLoader, PodcastManager, normalize_feed_url,
};
pub use prefs::{JsonFilePreferences, MemoryPreferences, Preferences, PreferencesEdit, SharedPreferences};
pub use providers::FileRemoteStore;
pub use sync::{
    NoopListener, ProviderId, SharedSyncListener, SyncContext, SyncController, SyncCoordinator,
    SyncKind, SyncListener, SyncMode,
};
