use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;

use crate::errors::StorageError;

/// Minimal key-value stream store the cache sink writes to.
///
/// Each key holds a capped, append-only stream of entries plus the latest
/// entry. A network-backed store implements this trait.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Appends `entry` to the stream at `key`, trimming the oldest entries
    /// beyond `max_len`, and records it as the latest value.
    async fn append(&self, key: &str, entry: String, max_len: usize) -> Result<(), StorageError>;

    async fn latest(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Stream contents, oldest first.
    async fn range(&self, key: &str) -> Result<Vec<String>, StorageError>;

    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// Process-local [`KeyValueStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    streams: DashMap<String, VecDeque<String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn append(&self, key: &str, entry: String, max_len: usize) -> Result<(), StorageError> {
        let mut stream = self.streams.entry(key.to_string()).or_default();
        stream.push_back(entry);
        while stream.len() > max_len.max(1) {
            stream.pop_front();
        }
        Ok(())
    }

    async fn latest(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.streams.get(key).and_then(|s| s.back().cloned()))
    }

    async fn range(&self, key: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .streams
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self.streams.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }
}
