//! Feed pagination, content filtering and thread assembly for a client of
//! the social indexer API.

pub mod api;
pub mod backfill;
pub mod config;
pub mod connections;
pub mod content_filter;
pub mod cursor;
pub mod error;
pub mod feed;
pub mod fetcher;
pub mod filter;
pub mod generation;
pub mod models;
pub mod moderation;
pub mod session;
pub mod store;
pub mod telemetry;
pub mod thread;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use api::IndexerClient;
pub use backfill::BackfillAggregator;
pub use config::FeedConfig;
pub use connections::ConnectionList;
pub use cursor::Cursor;
pub use error::{FeedError, FeedResult};
pub use feed::{ApplyOutcome, FeedSnapshot, FeedSource, FeedView, FeedViewState, ViewKey};
pub use fetcher::{ConnectionFetcher, ConnectionKind, PageFetcher, PageQuery};
pub use filter::{FeedControls, Filter, SavedView};
pub use models::{Page, Post};
pub use session::ViewerSession;
pub use store::PostStore;
pub use thread::{ThreadAssembler, ThreadController, ThreadRow};
