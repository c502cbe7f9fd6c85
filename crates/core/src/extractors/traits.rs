//! Extractor trait definitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::sync::Arc;

use crate::errors::ConnectionError;
use crate::records::Record;
use crate::series::{ExtractorKind, SeriesDefinition};

/// Lazy, possibly infinite sequence of records from one session.
///
/// A stream error ends the session; the only way to resume is a new `start`.
pub type RecordStream<'a> = BoxStream<'a, Result<Record, ConnectionError>>;

/// Bounds for a historical pull. Start inclusive, end exclusive, either open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoricalRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl HistoricalRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts < e)
    }
}

/// A live vendor session.
///
/// Owned by exactly one orchestrator task. `stop` is always called, on every
/// exit path, before the session is dropped.
#[async_trait]
pub trait ExtractorSession: Send {
    fn records(&mut self) -> RecordStream<'_>;

    /// Releases vendor resources (sockets, subscriptions, file handles).
    async fn stop(self: Box<Self>);
}

/// Continuous vendor feed.
///
/// Implementations receive every series assigned to their key and are
/// responsible for mapping vendor messages to the right `series_id`
/// (see [`super::SeriesIndex`]).
#[async_trait]
pub trait RealtimeExtractor: Send + Sync {
    fn data_source(&self) -> &str;

    async fn start(
        &self,
        series: &[SeriesDefinition],
    ) -> Result<Box<dyn ExtractorSession>, ConnectionError>;
}

/// Bounded pull that runs to completion.
#[async_trait]
pub trait HistoricalExtractor: Send + Sync {
    fn data_source(&self) -> &str;

    async fn start(
        &self,
        series: &[SeriesDefinition],
        range: &HistoricalRange,
    ) -> Result<Box<dyn ExtractorSession>, ConnectionError>;
}

/// An instantiated extractor of either kind.
#[derive(Clone)]
pub enum ExtractorHandle {
    Realtime(Arc<dyn RealtimeExtractor>),
    Historical(Arc<dyn HistoricalExtractor>),
}

impl ExtractorHandle {
    pub fn kind(&self) -> ExtractorKind {
        match self {
            ExtractorHandle::Realtime(_) => ExtractorKind::Realtime,
            ExtractorHandle::Historical(_) => ExtractorKind::Historical,
        }
    }

    pub fn data_source(&self) -> &str {
        match self {
            ExtractorHandle::Realtime(e) => e.data_source(),
            ExtractorHandle::Historical(e) => e.data_source(),
        }
    }

    /// Opens a session. `range` is ignored by realtime extractors.
    pub async fn start(
        &self,
        series: &[SeriesDefinition],
        range: &HistoricalRange,
    ) -> Result<Box<dyn ExtractorSession>, ConnectionError> {
        match self {
            ExtractorHandle::Realtime(e) => e.start(series).await,
            ExtractorHandle::Historical(e) => e.start(series, range).await,
        }
    }

    /// Whether two handles point at the same extractor instance.
    pub fn same_instance(&self, other: &ExtractorHandle) -> bool {
        match (self, other) {
            (ExtractorHandle::Realtime(a), ExtractorHandle::Realtime(b)) => Arc::ptr_eq(a, b),
            (ExtractorHandle::Historical(a), ExtractorHandle::Historical(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for ExtractorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExtractorHandle({}:{})", self.kind(), self.data_source())
    }
}
