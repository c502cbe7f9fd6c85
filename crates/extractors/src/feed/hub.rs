use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::errors::ExtractorError;
use seriesflow_core::records::FieldValue;

/// Default number of buffered events per subscriber before it starts lagging.
const DEFAULT_CAPACITY: usize = 4096;

/// One vendor message: a symbol's values in one schema at one instant.
///
/// The schema's timestamp field travels in `timestamp`, not in `fields`.
#[derive(Debug, Clone, PartialEq)]
pub struct VendorTick {
    pub symbol: String,
    pub schema: String,
    pub timestamp: DateTime<Utc>,
    pub fields: IndexMap<String, FieldValue>,
}

impl VendorTick {
    pub fn new(symbol: impl Into<String>, schema: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            schema: schema.into(),
            timestamp,
            fields: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub enum FeedEvent {
    Tick(Arc<VendorTick>),
    /// The vendor dropped every open session.
    Disconnect(String),
}

/// In-process market data bus for one data source.
///
/// Stands in for a vendor connection: producers publish ticks, every open
/// [`super::FeedExtractor`] session receives all of them and keeps the ones
/// its series subscribe to.
pub struct FeedHub {
    data_source: String,
    sender: broadcast::Sender<FeedEvent>,
    available: AtomicBool,
}

impl FeedHub {
    pub fn new(data_source: impl Into<String>) -> Self {
        Self::with_capacity(data_source, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(data_source: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            data_source: data_source.into(),
            sender,
            available: AtomicBool::new(true),
        }
    }

    pub fn data_source(&self) -> &str {
        &self.data_source
    }

    /// Publishes a tick. Returns how many sessions received it.
    pub fn publish(&self, tick: VendorTick) -> usize {
        self.sender
            .send(FeedEvent::Tick(Arc::new(tick)))
            .unwrap_or_default()
    }

    /// Ends every open session with a retryable error.
    pub fn disconnect(&self, reason: impl Into<String>) {
        let reason = reason.into();
        info!("Feed {} disconnecting sessions: {}", self.data_source, reason);
        let _ = self.sender.send(FeedEvent::Disconnect(reason));
    }

    /// While unavailable, new sessions are refused.
    pub fn set_available(&self, available: bool) {
        debug!("Feed {} available: {}", self.data_source, available);
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    pub fn session_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub(crate) fn subscribe(&self) -> Result<broadcast::Receiver<FeedEvent>, ExtractorError> {
        if !self.is_available() {
            return Err(ExtractorError::Unavailable {
                data_source: self.data_source.clone(),
            });
        }
        Ok(self.sender.subscribe())
    }
}
