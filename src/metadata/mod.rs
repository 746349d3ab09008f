mod download;
mod playlist;
mod record;
mod state;
mod store;

pub use record::EpisodeMetadata;
pub use store::EpisodeMetadataStore;
