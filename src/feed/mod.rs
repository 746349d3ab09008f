mod fetch;
mod parse;

pub use fetch::{FeedLoader, fetch_feed};
pub use parse::parse_feed;
