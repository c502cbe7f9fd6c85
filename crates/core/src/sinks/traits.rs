use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::route::SeriesRoute;
use crate::errors::{ConfigError, SinkError};
use crate::records::Record;
use crate::retry::RetryPolicy;
use crate::schema::SchemaModel;

/// Storage family of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Database,
    Cache,
    File,
}

impl SinkKind {
    /// Infers the family from a destination id such as `db_main`,
    /// `redis_live` or `file_archive`.
    pub fn infer(destination: &str) -> Result<Self, ConfigError> {
        let id = destination.to_ascii_lowercase();
        if id.contains("database") || id.contains("db") {
            Ok(SinkKind::Database)
        } else if id.contains("cache") || id.contains("redis") {
            Ok(SinkKind::Cache)
        } else if id.contains("file") {
            Ok(SinkKind::File)
        } else {
            Err(ConfigError::UnknownDestinationKind(destination.to_string()))
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SinkKind::Database => "database",
            SinkKind::Cache => "cache",
            SinkKind::File => "file",
        };
        f.write_str(name)
    }
}

/// One output destination.
///
/// A sink instance lives for the whole process and is shared by every series
/// routed to it. The allocator drives each sink from a single worker task, so
/// calls for one sink arrive in FIFO order; implementations still have to be
/// `Sync` because `close` may race with a late write during forced shutdown.
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Destination id this sink is registered under.
    fn id(&self) -> &str;

    fn kind(&self) -> SinkKind;

    /// Retry policy the allocator applies to retryable [`SinkError`]s.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::none()
    }

    /// Whether dropping an unfinished `ensure_schema` or `write` future
    /// guarantees that nothing was applied.
    ///
    /// Sinks that hand work to a blocking thread or a writer actor return
    /// `false`. The allocator then awaits their calls past the sink timeout and
    /// reports the real outcome instead of [`SinkError::Timeout`].
    fn cancel_safe(&self) -> bool {
        true
    }

    /// Idempotent create-or-migrate of the native representation of `schema`.
    /// Called once per schema before the first write.
    async fn ensure_schema(&self, _schema: &SchemaModel) -> Result<(), SinkError> {
        Ok(())
    }

    /// Persists `record` whole, or not at all.
    async fn write(
        &self,
        record: &Record,
        route: &SeriesRoute,
        schema: &SchemaModel,
    ) -> Result<(), SinkError>;

    /// Flushes and releases resources. No writes follow.
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
