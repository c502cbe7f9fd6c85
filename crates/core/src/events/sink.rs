//! Pipeline event sink trait and implementations.

use log::{error, info, warn};
use std::sync::{Arc, Mutex};

use super::PipelineEvent;
use crate::orchestrator::ExtractorState;

/// Receives pipeline events.
///
/// `emit()` is called from hot paths (router, sink workers, extractor tasks)
/// and must not block or fail.
pub trait PipelineEventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);

    fn emit_batch(&self, events: Vec<PipelineEvent>) {
        for event in events {
            self.emit(event);
        }
    }
}

/// Discards every event.
#[derive(Clone, Default)]
pub struct NoOpPipelineEventSink;

impl PipelineEventSink for NoOpPipelineEventSink {
    fn emit(&self, _event: PipelineEvent) {}
}

/// Writes events to the `log` facade at a level matching their severity.
#[derive(Clone, Default)]
pub struct LogPipelineEventSink;

impl PipelineEventSink for LogPipelineEventSink {
    fn emit(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::ExtractorStateChanged {
                key,
                from,
                to: ExtractorState::Failed,
                reason,
            } => error!(
                "Extractor {} failed (was {:?}): {}",
                key,
                from,
                reason.unwrap_or_default()
            ),
            PipelineEvent::ExtractorStateChanged {
                key,
                from,
                to,
                reason,
            } => match reason {
                Some(reason) => info!("Extractor {}: {:?} -> {:?} ({})", key, from, to, reason),
                None => info!("Extractor {}: {:?} -> {:?}", key, from, to),
            },
            PipelineEvent::BackpressureDrop {
                key,
                series_id,
                timestamp,
            } => warn!(
                "Backpressure: dropped {} record at {} from extractor {}",
                series_id, timestamp, key
            ),
            PipelineEvent::DispatchFailed {
                series_id,
                destination,
                error,
            } => warn!(
                "Dispatch of {} to '{}' failed: {}",
                series_id, destination, error
            ),
            PipelineEvent::TransformFailed { transformer, error } => {
                warn!("Transformer '{}' dropped an input set: {}", transformer, error)
            }
            PipelineEvent::DrainDeadlineExceeded {
                pending_keys,
                released_sinks,
            } => error!(
                "Drain deadline exceeded; forcing stop of [{}], sinks closed undrained: [{}]",
                pending_keys.join(", "),
                released_sinks.join(", ")
            ),
            PipelineEvent::FeedLagged {
                data_source,
                skipped,
            } => warn!("Feed {} lagged, {} ticks lost", data_source, skipped),
        }
    }
}

/// Collects events for assertions.
#[derive(Clone, Default)]
pub struct MockPipelineEventSink {
    events: Arc<Mutex<Vec<PipelineEvent>>>,
}

impl MockPipelineEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl PipelineEventSink for MockPipelineEventSink {
    fn emit(&self, event: PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
