use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use log::{debug, info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::parse::{parse_timestamp, parse_value};
use crate::errors::ExtractorError;
use seriesflow_core::errors::ConnectionError;
use seriesflow_core::extractors::{
    ExtractorSession, HistoricalExtractor, HistoricalRange, RecordStream, SeriesIndex,
};
use seriesflow_core::records::{FieldValue, Record};
use seriesflow_core::schema::{SchemaModel, SchemaResolver};
use seriesflow_core::series::SeriesDefinition;

const SYMBOL_COLUMN: &str = "symbol";

/// Historical extractor over CSV files, one per schema: `<root>/<schema>.csv`.
///
/// Each file needs a `symbol` column and the schema's timestamp column; other
/// schema fields are optional, unknown columns are ignored. A session yields
/// every in-range row for the assigned series, ordered by timestamp.
#[derive(Clone)]
pub struct ReplayExtractor {
    data_source: String,
    root: PathBuf,
    schemas: Arc<SchemaResolver>,
}

impl ReplayExtractor {
    pub fn new(
        data_source: impl Into<String>,
        root: impl Into<PathBuf>,
        schemas: Arc<SchemaResolver>,
    ) -> Self {
        Self {
            data_source: data_source.into(),
            root: root.into(),
            schemas,
        }
    }

    pub fn file_for(&self, schema_name: &str) -> PathBuf {
        self.root.join(format!("{schema_name}.csv"))
    }

    fn load(
        &self,
        series: &[SeriesDefinition],
        range: HistoricalRange,
    ) -> Result<Vec<Record>, ExtractorError> {
        let index = SeriesIndex::new(series);
        let mut schema_names: Vec<&str> = Vec::new();
        for s in series {
            if !schema_names.contains(&s.schema_name.as_str()) {
                schema_names.push(&s.schema_name);
            }
        }

        let mut records = Vec::new();
        for name in schema_names {
            let schema = self.schemas.resolve(name)?;
            let path = self.file_for(name);
            let loaded = read_file(&path, &schema, &index, range)?;
            debug!(
                "Replay {} loaded {} records from {}",
                self.data_source,
                loaded.len(),
                path.display()
            );
            records.extend(loaded);
        }
        // stable, so rows sharing a timestamp keep file order
        records.sort_by_key(|r| r.timestamp());
        Ok(records)
    }
}

fn read_file(
    path: &Path,
    schema: &SchemaModel,
    index: &SeriesIndex,
    range: HistoricalRange,
) -> Result<Vec<Record>, ExtractorError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ExtractorError::MissingFile(display.clone()),
        _ => ExtractorError::Io {
            path: display.clone(),
            message: e.to_string(),
        },
    })?;
    let malformed = |line: u64, message: String| ExtractorError::Malformed {
        path: display.clone(),
        line,
        message,
    };

    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
    let headers = reader
        .headers()
        .map_err(|e| malformed(1, e.to_string()))?
        .clone();

    let ts_name = &schema.timestamp_field().name;
    let column = |name: &str| headers.iter().position(|h| h == name);
    let symbol_col = column(SYMBOL_COLUMN)
        .ok_or_else(|| malformed(1, format!("missing '{SYMBOL_COLUMN}' column")))?;
    let ts_col = column(ts_name).ok_or_else(|| malformed(1, format!("missing '{ts_name}' column")))?;

    let mut value_cols = Vec::new();
    for (i, header) in headers.iter().enumerate() {
        if i == symbol_col || i == ts_col {
            continue;
        }
        match schema.field(header) {
            Some(def) => value_cols.push((i, def.name.clone(), def.field_type)),
            None => warn!("Ignoring column '{}' in {}: not in schema {}", header, display, schema.name()),
        }
    }

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| {
            let line = e.position().map(|p| p.line()).unwrap_or_default();
            malformed(line, e.to_string())
        })?;
        let line = row.position().map(|p| p.line()).unwrap_or_default();

        let symbol = row.get(symbol_col).unwrap_or_default();
        if index.lookup(symbol, schema.name()).is_empty() {
            continue;
        }
        let ts = parse_timestamp(row.get(ts_col).unwrap_or_default())
            .map_err(|e| malformed(line, format!("{ts_name}: {e}")))?;
        if !range.contains(ts) {
            continue;
        }

        let mut fields: IndexMap<String, FieldValue> = IndexMap::with_capacity(value_cols.len());
        for (i, name, field_type) in &value_cols {
            let value = parse_value(*field_type, row.get(*i).unwrap_or_default())
                .map_err(|e| malformed(line, format!("{name}: {e}")))?;
            if !value.is_null() {
                fields.insert(name.clone(), value);
            }
        }
        records.extend(index.records_for(symbol, schema.name(), ts, &fields));
    }
    Ok(records)
}

#[async_trait]
impl HistoricalExtractor for ReplayExtractor {
    fn data_source(&self) -> &str {
        &self.data_source
    }

    async fn start(
        &self,
        series: &[SeriesDefinition],
        range: &HistoricalRange,
    ) -> Result<Box<dyn ExtractorSession>, ConnectionError> {
        let this = self.clone();
        let series = series.to_vec();
        let range = *range;

        let loaded = tokio::task::spawn_blocking(move || this.load(&series, range))
            .await
            .map_err(|e| ConnectionError::new(&self.data_source, format!("replay task: {e}")))?
            .map_err(|e| e.into_connection_error(&self.data_source))?;

        info!(
            "Replay {} session opened with {} records",
            self.data_source,
            loaded.len()
        );
        Ok(Box::new(ReplaySession {
            data_source: self.data_source.clone(),
            records: Some(loaded),
        }))
    }
}

struct ReplaySession {
    data_source: String,
    records: Option<Vec<Record>>,
}

#[async_trait]
impl ExtractorSession for ReplaySession {
    fn records(&mut self) -> RecordStream<'_> {
        let records = self.records.take().unwrap_or_default();
        stream::iter(records.into_iter().map(Ok)).boxed()
    }

    async fn stop(self: Box<Self>) {
        debug!("Replay {} session closed", self.data_source);
    }
}
