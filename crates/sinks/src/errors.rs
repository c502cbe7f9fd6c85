//! Storage-specific error types for the reference sinks.
//!
//! Diesel, r2d2, io and csv failures are wrapped in [`StorageError`] inside
//! this crate and converted to the storage-agnostic
//! [`seriesflow_core::errors::SinkError`] at the `OutputSink` boundary.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use seriesflow_core::errors::{Error, SinkError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("Query execution failed: {0}")]
    QueryFailed(#[from] DieselError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Writer actor stopped")]
    WriterStopped,

    #[error("Internal storage error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

impl From<StorageError> for SinkError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConnectionFailed(e) => SinkError::Transient(e.to_string()),
            StorageError::PoolError(e) => SinkError::Transient(e.to_string()),
            StorageError::QueryFailed(DieselError::DatabaseError(
                DatabaseErrorKind::NotNullViolation | DatabaseErrorKind::CheckViolation,
                info,
            )) => SinkError::InvalidRecord(info.message().to_string()),
            StorageError::QueryFailed(e) => SinkError::Permanent(e.to_string()),
            StorageError::Io(e) => SinkError::Transient(e.to_string()),
            StorageError::Csv(e) => SinkError::Permanent(e.to_string()),
            StorageError::SerializationError(e) => SinkError::InvalidRecord(e),
            StorageError::WriterStopped => SinkError::Closed,
            StorageError::Internal(e) => SinkError::Permanent(e),
        }
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Sink(err.into())
    }
}
