use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::errors::SinkError;
use crate::events::{PipelineEvent, PipelineEventSink};

/// Per-destination outcome of one dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchResult {
    pub delivered: BTreeSet<String>,
    pub failed: BTreeMap<String, SinkError>,
}

impl DispatchResult {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Acknowledgements still owed for an enqueued record.
///
/// Dropping a ticket does not cancel the writes; it only discards their results.
#[must_use = "a ticket does nothing unless waited on"]
pub struct DispatchTicket {
    series_id: String,
    pending: Vec<(String, oneshot::Receiver<Result<(), SinkError>>)>,
    rejected: BTreeMap<String, SinkError>,
    events: Arc<dyn PipelineEventSink>,
}

impl DispatchTicket {
    pub(crate) fn new(series_id: impl Into<String>, events: Arc<dyn PipelineEventSink>) -> Self {
        Self {
            series_id: series_id.into(),
            pending: Vec::new(),
            rejected: BTreeMap::new(),
            events,
        }
    }

    pub(crate) fn push(&mut self, destination: String, ack: oneshot::Receiver<Result<(), SinkError>>) {
        self.pending.push((destination, ack));
    }

    pub(crate) fn reject(&mut self, destination: String, error: SinkError) {
        self.rejected.insert(destination, error);
    }

    pub fn series_id(&self) -> &str {
        &self.series_id
    }

    /// Awaits every destination concurrently. Failures are also emitted as
    /// `DispatchFailed` events.
    pub async fn wait(self) -> DispatchResult {
        let DispatchTicket {
            series_id,
            pending,
            rejected,
            events,
        } = self;

        let (destinations, acks): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
        let outcomes = join_all(acks).await;

        let mut result = DispatchResult {
            delivered: BTreeSet::new(),
            failed: rejected,
        };
        for (destination, outcome) in destinations.into_iter().zip(outcomes) {
            // a dropped reply means the worker is gone
            match outcome.unwrap_or(Err(SinkError::Closed)) {
                Ok(()) => {
                    result.delivered.insert(destination);
                }
                Err(e) => {
                    result.failed.insert(destination, e);
                }
            }
        }

        if !result.failed.is_empty() {
            events.emit_batch(
                result
                    .failed
                    .iter()
                    .map(|(dest, err)| PipelineEvent::dispatch_failed(&series_id, dest, err))
                    .collect(),
            );
        }
        result
    }
}
