//! Grouping of series by extractor identity and the extractor lookup table.

use indexmap::IndexMap;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::traits::ExtractorHandle;
use crate::errors::{Error, Result};
use crate::events::{NoOpPipelineEventSink, PipelineEventSink};
use crate::schema::SchemaResolver;
use crate::series::{ExtractorKind, SeriesDefinition};

/// `(kind, data_source)`: identifies one long-lived extractor session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExtractorKey {
    pub kind: ExtractorKind,
    pub data_source: String,
}

impl ExtractorKey {
    pub fn new(kind: ExtractorKind, data_source: impl Into<String>) -> Self {
        Self {
            kind,
            data_source: data_source.into(),
        }
    }

    pub fn of(series: &SeriesDefinition) -> Self {
        Self::new(series.extractor_kind, series.data_source.clone())
    }
}

impl fmt::Display for ExtractorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.data_source)
    }
}

/// Partitions `series` by extractor key.
///
/// Keys appear in order of first appearance and each group keeps registry
/// order, so the result is deterministic for a given input.
pub fn group(series: &[SeriesDefinition]) -> IndexMap<ExtractorKey, Vec<SeriesDefinition>> {
    let mut groups: IndexMap<ExtractorKey, Vec<SeriesDefinition>> = IndexMap::new();
    for s in series {
        groups.entry(ExtractorKey::of(s)).or_default().push(s.clone());
    }
    groups
}

/// Everything a constructor gets to build one extractor.
pub struct ExtractorContext<'a> {
    pub key: &'a ExtractorKey,
    pub series: &'a [SeriesDefinition],
    pub schemas: &'a Arc<SchemaResolver>,
    /// Where the extractor reports record loss it detects itself.
    pub events: &'a Arc<dyn PipelineEventSink>,
}

type Constructor = Arc<dyn Fn(&ExtractorContext<'_>) -> Result<ExtractorHandle> + Send + Sync>;

/// Lookup table of extractor constructors, built at startup.
///
/// Instances are cached per key: however often `instantiate` is called for a
/// key, its constructor runs once.
pub struct ExtractorFactory {
    constructors: HashMap<ExtractorKey, Constructor>,
    instances: Mutex<HashMap<ExtractorKey, ExtractorHandle>>,
    schemas: Arc<SchemaResolver>,
    events: Arc<dyn PipelineEventSink>,
}

impl ExtractorFactory {
    pub fn new(schemas: Arc<SchemaResolver>) -> Self {
        Self {
            constructors: HashMap::new(),
            instances: Mutex::new(HashMap::new()),
            schemas,
            events: Arc::new(NoOpPipelineEventSink),
        }
    }

    /// Sink handed to constructors through [`ExtractorContext::events`].
    pub fn set_events(&mut self, events: Arc<dyn PipelineEventSink>) {
        self.events = events;
    }

    /// Registers the constructor for `(kind, data_source)`, replacing any previous one.
    pub fn register<F>(
        &mut self,
        kind: ExtractorKind,
        data_source: impl Into<String>,
        constructor: F,
    ) -> &mut Self
    where
        F: Fn(&ExtractorContext<'_>) -> Result<ExtractorHandle> + Send + Sync + 'static,
    {
        let key = ExtractorKey::new(kind, data_source);
        debug!("Registered extractor constructor for {}", key);
        if self.constructors.insert(key.clone(), Arc::new(constructor)).is_some() {
            warn!("Extractor constructor for {} was replaced", key);
        }
        self
    }

    pub fn is_registered(&self, key: &ExtractorKey) -> bool {
        self.constructors.contains_key(key)
    }

    pub fn registered_keys(&self) -> Vec<ExtractorKey> {
        let mut keys: Vec<_> = self.constructors.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Returns the extractor for `key`, constructing it on first use.
    ///
    /// Fails with [`Error::ExtractorUnavailable`] when nothing is registered
    /// for the key, or with whatever the constructor reports.
    pub fn instantiate(
        &self,
        key: &ExtractorKey,
        series: &[SeriesDefinition],
    ) -> Result<ExtractorHandle> {
        let mut instances = self.lock_instances();
        if let Some(existing) = instances.get(key) {
            return Ok(existing.clone());
        }

        let constructor = self
            .constructors
            .get(key)
            .ok_or_else(|| Error::ExtractorUnavailable {
                kind: key.kind,
                data_source: key.data_source.clone(),
            })?;

        if let Some(stray) = series.iter().find(|s| ExtractorKey::of(s) != *key) {
            return Err(Error::Unexpected(format!(
                "series '{}' does not belong to extractor {}",
                stray.series_id, key
            )));
        }

        let handle = constructor(&ExtractorContext {
            key,
            series,
            schemas: &self.schemas,
            events: &self.events,
        })?;
        if handle.kind() != key.kind {
            return Err(Error::Unexpected(format!(
                "constructor for {} built a {} extractor",
                key,
                handle.kind()
            )));
        }

        info!(
            "Instantiated {} extractor serving {} series",
            key,
            series.len()
        );
        instances.insert(key.clone(), handle.clone());
        Ok(handle)
    }

    /// Number of extractor instances built so far.
    pub fn instance_count(&self) -> usize {
        self.lock_instances().len()
    }

    fn lock_instances(&self) -> MutexGuard<'_, HashMap<ExtractorKey, ExtractorHandle>> {
        self.instances.lock().unwrap_or_else(|poisoned| {
            warn!("Extractor instance table was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
