//! Cache sink: latest value and a capped stream per destination key.

mod store;

pub use store::{InMemoryStore, KeyValueStore};

use async_trait::async_trait;
use log::{debug, info};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::StorageError;
use seriesflow_core::errors::SinkError;
use seriesflow_core::records::Record;
use seriesflow_core::retry::RetryPolicy;
use seriesflow_core::schema::SchemaModel;
use seriesflow_core::sinks::{OutputSink, SeriesRoute, SinkKind};

pub const DEFAULT_MAX_LEN: usize = 10_000;

/// Writes each record as a JSON entry under its destination key
/// (`dataSource:assetType:symbol:schemaName`).
pub struct CacheSink {
    id: String,
    store: Arc<dyn KeyValueStore>,
    max_len: usize,
    retry: RetryPolicy,
}

impl CacheSink {
    pub fn new(id: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            id: id.into(),
            store,
            max_len: DEFAULT_MAX_LEN,
            retry: RetryPolicy::exponential(Duration::from_millis(200), 3),
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len.max(1);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}

/// JSON object with the series id, symbol and every schema field in order.
/// Absent nullable fields are written as `null`.
pub fn encode_entry(record: &Record, schema: &SchemaModel) -> Result<String, StorageError> {
    let mut entry = Map::new();
    entry.insert("series_id".into(), Value::from(record.series_id()));
    entry.insert("symbol".into(), Value::from(record.symbol()));
    for (def, value) in schema.fields().iter().zip(schema.values(record)) {
        entry.insert(def.name.clone(), serde_json::to_value(&value)?);
    }
    Ok(serde_json::to_string(&entry)?)
}

#[async_trait]
impl OutputSink for CacheSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SinkKind {
        SinkKind::Cache
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    async fn write(
        &self,
        record: &Record,
        route: &SeriesRoute,
        schema: &SchemaModel,
    ) -> Result<(), SinkError> {
        let key = route.destination_key(record);
        let entry = encode_entry(record, schema)?;
        self.store.append(&key, entry, self.max_len).await?;
        debug!("Sink {} appended to {}", self.id, key);
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        info!("Sink {} closed", self.id);
        Ok(())
    }
}
