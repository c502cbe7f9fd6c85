//! Core error types for seriesflow.
//!
//! This module defines the storage- and vendor-agnostic error taxonomy. Concrete
//! sinks and extractors convert their own failures (diesel, io, channel errors)
//! into these types at the crate boundary.
//!
//! | Error | Raised by | Fatal? |
//! |-------|-----------|--------|
//! | [`ConfigError`] | registry, transformer wiring, routing | yes, at startup |
//! | [`SchemaError`] | schema resolution | yes, at startup |
//! | [`Error::ExtractorUnavailable`] | extractor factory | yes, at startup |
//! | [`ConnectionError`] | extractor sessions | no, retried per key |
//! | [`TransformationError`] | transformer invocations | no, input set dropped |
//! | [`SinkError`] | sink writes | no, reported per dispatch |

use std::time::Duration;
use thiserror::Error;

use crate::series::ExtractorKind;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type for the engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("No extractor registered for {kind} data source '{data_source}'")]
    ExtractorUnavailable {
        kind: ExtractorKind,
        data_source: String,
    },

    #[error("Extractor connection failed: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Transformation failed: {0}")]
    Transformation(#[from] TransformationError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Startup-class errors abort the process before any extractor starts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Schema(_) | Error::ExtractorUnavailable { .. }
        )
    }
}

/// Malformed registry, transformer declarations or routing configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to read '{path}': {message}")]
    Io { path: String, message: String },

    #[error("Malformed registry: {0}")]
    Malformed(String),

    #[error("Registry is missing required column '{0}'")]
    MissingColumn(String),

    #[error("Row {row}: {message}")]
    InvalidRow { row: usize, message: String },

    #[error("Row {row}: duplicate series_id '{series_id}'")]
    DuplicateSeriesId { row: usize, series_id: String },

    #[error("Row {row}: unknown extractor_type '{value}' (expected realtime or historical)")]
    UnknownExtractorKind { row: usize, value: String },

    #[error("Row {row}: unknown schema '{schema}'")]
    UnknownSchema { row: usize, schema: String },

    #[error("Row {row}: series '{series_id}' has no assets")]
    EmptyAssets { row: usize, series_id: String },

    #[error("Row {row}: series '{series_id}' has no output destinations")]
    EmptyDestinations { row: usize, series_id: String },

    #[error("Series '{series_id}' routes to unconfigured destination '{destination}'")]
    UnknownDestination {
        series_id: String,
        destination: String,
    },

    #[error("Cannot infer sink kind for destination '{0}'")]
    UnknownDestinationKind(String),

    #[error("Series id '{0}' is declared more than once")]
    SeriesIdCollision(String),

    #[error("Transformer '{transformer}': {message}")]
    InvalidTransformer { transformer: String, message: String },

    #[error("Transformer graph contains a cycle through: {}", .0.join(" -> "))]
    CyclicTransformers(Vec<String>),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Missing configuration key: {0}")]
    MissingKey(String),
}

impl From<csv::Error> for ConfigError {
    fn from(err: csv::Error) -> Self {
        match err.position() {
            // csv lines are 1-based and include the header row
            Some(pos) => ConfigError::InvalidRow {
                row: pos.line().saturating_sub(1) as usize,
                message: err.to_string(),
            },
            None => ConfigError::Malformed(err.to_string()),
        }
    }
}

/// Schema resolution failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Schema '{0}' not found")]
    NotFound(String),

    #[error("Schema '{schema}' is invalid: {message}")]
    Invalid { schema: String, message: String },
}

/// Extractor session failure. Recoverable unless `retryable` is false.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{data_source}: {message}")]
pub struct ConnectionError {
    pub data_source: String,
    pub message: String,
    pub retryable: bool,
}

impl ConnectionError {
    pub fn new(data_source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// A failure that restarting the session cannot fix (bad credentials, bad input).
    pub fn terminal(data_source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            ..Self::new(data_source, message)
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// A single transformer invocation failed; its input set is dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformationError {
    #[error("Required input '{0}' is missing")]
    MissingInput(String),

    #[error("Input '{series_id}' is missing field '{field}'")]
    MissingField { series_id: String, field: String },

    #[error("Field '{field}' has an unusable value: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Transformer emitted series '{actual}' but declares '{expected}'")]
    OutputMismatch { expected: String, actual: String },

    #[error("{0}")]
    Failed(String),
}

/// A write to one sink failed. Isolated to that sink.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("Transient sink failure: {0}")]
    Transient(String),

    #[error("Sink write failed: {0}")]
    Permanent(String),

    #[error("Record rejected: {0}")]
    InvalidRecord(String),

    #[error("Sink write timed out after {0:?}")]
    Timeout(Duration),

    #[error("Sink queue stayed full for {0:?}")]
    QueueFull(Duration),

    #[error("Destination '{0}' is not configured")]
    UnknownDestination(String),

    #[error("Sink is closed")]
    Closed,
}

impl SinkError {
    /// Whether the sink's retry policy may try the write again.
    ///
    /// A timed out write is never retried: the sink may still complete it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}
