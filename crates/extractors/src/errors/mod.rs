//! Error types and retry classification for the reference extractors.
//!
//! Extractor failures surface to the orchestrator as core
//! [`ConnectionError`]s; [`ExtractorError::into_connection_error`] carries the
//! [`RetryClass`] across as the retryable flag.

mod retry;

pub use retry::RetryClass;

use seriesflow_core::errors::{ConnectionError, SchemaError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractorError {
    /// The feed refuses new subscriptions.
    #[error("Feed unavailable: {data_source}")]
    Unavailable { data_source: String },

    /// The feed dropped an open session.
    #[error("Feed disconnected: {data_source} - {reason}")]
    Disconnected { data_source: String, reason: String },

    #[error("Replay file not found: {0}")]
    MissingFile(String),

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Malformed replay data in {path} at line {line}: {message}")]
    Malformed {
        path: String,
        line: u64,
        message: String,
    },

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
}

impl ExtractorError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Unavailable { .. } | Self::Disconnected { .. } | Self::Io { .. } => {
                RetryClass::WithBackoff
            }
            Self::MissingFile(_) | Self::Malformed { .. } | Self::Schema(_) => RetryClass::Never,
        }
    }

    pub fn into_connection_error(self, data_source: &str) -> ConnectionError {
        match self.retry_class() {
            RetryClass::WithBackoff => ConnectionError::new(data_source, self.to_string()),
            RetryClass::Never => ConnectionError::terminal(data_source, self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_class_maps_to_connection_error() {
        let offline = ExtractorError::Unavailable {
            data_source: "VENDOR_X".into(),
        };
        assert_eq!(offline.retry_class(), RetryClass::WithBackoff);
        assert!(offline.into_connection_error("VENDOR_X").is_retryable());

        let bad = ExtractorError::Malformed {
            path: "trades.csv".into(),
            line: 3,
            message: "price: not a number".into(),
        };
        assert_eq!(bad.retry_class(), RetryClass::Never);
        let err = bad.into_connection_error("REPLAY");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("line 3"));
    }
}
