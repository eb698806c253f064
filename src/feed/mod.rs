//! RSS feed document handling.
//!
//! - [`merge`] - [`FeedMerger`], which splices an item into an RSS 2.0 document
//!   by streaming it through `quick-xml`, or builds a fresh one
//! - [`parser`] - reads a document back with `feed-rs` to confirm it is a valid feed
//! - [`store`] - [`FeedStore`], the on-disk file with atomic replacement
//!
//! # Example
//!
//! ```ignore
//! use sprouts_feed::feed::{FeedMerger, FeedStore, MergeMode};
//!
//! let store = FeedStore::new("feed.xml");
//! let existing = store.read().await?;
//! let doc = FeedMerger::default().merge(existing.as_deref(), &item, MergeMode::Append)?;
//! store.write(&doc)?;
//! ```

mod merge;
mod parser;
mod store;

pub use merge::{
    starts_fresh, ChannelMeta, FeedMerger, MergeError, MergeMode, Placement, CONTENT_NS,
};
pub use parser::{parse_feed, ParsedFeed, ParsedItem};
pub use store::{FeedStore, StoreError};
