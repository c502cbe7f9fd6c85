//! Builds sink instances for the destination ids named by the registry.

use log::info;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cache::{CacheSink, InMemoryStore, KeyValueStore, DEFAULT_MAX_LEN};
use crate::db::db_path;
use crate::file::{FileFormat, FileSink};
use crate::sqlite::SqliteSink;
use seriesflow_core::errors::Result;
use seriesflow_core::sinks::{OutputSink, SinkKind};

#[derive(Clone)]
pub struct SinkSettings {
    /// Root for database files (`<id>.db`) and file sink trees (`<id>/`).
    pub data_dir: PathBuf,
    pub file_format: FileFormat,
    pub cache_max_len: usize,
    /// Store shared by every cache destination.
    pub cache_store: Arc<dyn KeyValueStore>,
}

impl SinkSettings {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            file_format: FileFormat::default(),
            cache_max_len: DEFAULT_MAX_LEN,
            cache_store: Arc::new(InMemoryStore::new()),
        }
    }
}

/// One sink per distinct destination id, kind inferred from the id.
///
/// Database sinks spawn their writer actor, so this must run inside a tokio
/// runtime.
pub fn build_sinks<'a>(
    destinations: impl IntoIterator<Item = &'a str>,
    settings: &SinkSettings,
) -> Result<Vec<Arc<dyn OutputSink>>> {
    let mut seen = HashSet::new();
    let mut sinks: Vec<Arc<dyn OutputSink>> = Vec::new();

    for id in destinations {
        if !seen.insert(id) {
            continue;
        }
        let sink: Arc<dyn OutputSink> = match SinkKind::infer(id)? {
            SinkKind::Database => Arc::new(SqliteSink::open(id, &db_path(&settings.data_dir, id))?),
            SinkKind::Cache => Arc::new(
                CacheSink::new(id, Arc::clone(&settings.cache_store))
                    .with_max_len(settings.cache_max_len),
            ),
            SinkKind::File => Arc::new(FileSink::new(
                id,
                settings.data_dir.join(id),
                settings.file_format,
            )),
        };
        info!("Built {} sink '{}'", sink.kind(), id);
        sinks.push(sink);
    }
    Ok(sinks)
}
