//! In-process realtime feed.

mod extractor;
mod hub;

pub use extractor::FeedExtractor;
pub use hub::{FeedEvent, FeedHub, VendorTick};
