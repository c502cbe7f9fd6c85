//! Extractor capability contract and the deduplicating factory.
//!
//! ```text
//! [SeriesDefinition] ──group()──► ExtractorKey ─► [SeriesDefinition]
//!                                     │
//!                 ExtractorFactory::instantiate (one instance per key)
//!                                     │
//!                               ExtractorHandle
//!                                     │ start(series)
//!                                     ▼
//!                           Box<dyn ExtractorSession> ──records()──► Record stream
//! ```

mod demux;
mod factory;
mod traits;

pub use demux::SeriesIndex;
pub use factory::{group, ExtractorContext, ExtractorFactory, ExtractorKey};
pub use traits::{
    ExtractorHandle, ExtractorSession, HistoricalExtractor, HistoricalRange, RealtimeExtractor,
    RecordStream,
};
