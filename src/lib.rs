//! Weekly newsletter RSS generator.
//!
//! Asks a chat-completion model for a newsletter, turns the JSON it returns
//! into an RSS item and merges that item into `feed.xml`.

pub mod config;
pub mod content;
pub mod feed;
pub mod newsletter;
pub mod pipeline;
