//! Pipeline event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::orchestrator::ExtractorState;

/// Facts about the running pipeline that operators and tests observe.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// An extractor key moved through its lifecycle.
    ExtractorStateChanged {
        key: String,
        from: ExtractorState,
        to: ExtractorState,
        reason: Option<String>,
    },

    /// The ingest queue stayed full past the enqueue timeout and a record was dropped.
    /// Never reported as a sink failure.
    BackpressureDrop {
        key: String,
        series_id: String,
        timestamp: DateTime<Utc>,
    },

    /// One destination failed to accept a record.
    DispatchFailed {
        series_id: String,
        destination: String,
        error: String,
    },

    /// A transformer invocation failed; its input set was dropped.
    TransformFailed { transformer: String, error: String },

    /// Shutdown did not finish draining before the deadline.
    DrainDeadlineExceeded {
        pending_keys: Vec<String>,
        /// Sinks closed while their queues still held records.
        released_sinks: Vec<String>,
    },

    /// A realtime feed fell behind and the vendor skipped ticks.
    FeedLagged { data_source: String, skipped: u64 },
}

impl PipelineEvent {
    pub fn state_changed(
        key: impl Into<String>,
        from: ExtractorState,
        to: ExtractorState,
        reason: Option<String>,
    ) -> Self {
        PipelineEvent::ExtractorStateChanged {
            key: key.into(),
            from,
            to,
            reason,
        }
    }

    pub fn dispatch_failed(
        series_id: impl Into<String>,
        destination: impl Into<String>,
        error: impl ToString,
    ) -> Self {
        PipelineEvent::DispatchFailed {
            series_id: series_id.into(),
            destination: destination.into(),
            error: error.to_string(),
        }
    }

    pub fn transform_failed(transformer: impl Into<String>, error: impl ToString) -> Self {
        PipelineEvent::TransformFailed {
            transformer: transformer.into(),
            error: error.to_string(),
        }
    }
}
