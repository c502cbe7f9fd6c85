//! Reference extractors for seriesflow.
//!
//! ```text
//!   producer ──publish()──► FeedHub ──broadcast──► FeedExtractor session ─┐
//!                                                                        ├─► SeriesIndex ─► Record
//!   <root>/<schema>.csv ──► ReplayExtractor session (sorted, ranged) ────┘
//! ```
//!
//! [`register_feed`] and [`register_replay`] install them in an
//! [`seriesflow_core::extractors::ExtractorFactory`].

pub mod errors;
pub mod feed;
pub mod registry;
pub mod replay;

pub use errors::{ExtractorError, RetryClass};
pub use feed::{FeedEvent, FeedExtractor, FeedHub, VendorTick};
pub use registry::{register_feed, register_replay};
pub use replay::ReplayExtractor;
