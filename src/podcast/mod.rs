mod manager;
mod model;

pub use manager::{PodcastLoader, PodcastManager};
pub use model::{Credentials, Episode, EpisodeRef, Podcast, normalize_feed_url};
