//! Flat-file sink.
//!
//! ```text
//! <root>/<dataSource>/<assetType>/<symbol>/<schemaName>.<csv|jsonl>
//! ```
//!
//! CSV files get one header row (schema field order, prefixed by
//! `series_id`) when created; every write appends one positional row.
//! Each key segment must be a single plain path component, so a vendor
//! symbol can never address a file outside the sink root.

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::cache::encode_entry;
use crate::errors::StorageError;
use seriesflow_core::errors::SinkError;
use seriesflow_core::records::{FieldValue, Record};
use seriesflow_core::schema::SchemaModel;
use seriesflow_core::sinks::{OutputSink, SeriesRoute, SinkKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Csv,
    Jsonl,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Jsonl => "jsonl",
        }
    }
}

impl FromStr for FileFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(FileFormat::Csv),
            "jsonl" | "ndjson" => Ok(FileFormat::Jsonl),
            other => Err(format!("unknown file format '{other}'")),
        }
    }
}

enum Payload {
    Csv { header: Vec<String>, row: Vec<String> },
    Line(String),
}

pub struct FileSink {
    id: String,
    root: PathBuf,
    format: FileFormat,
}

impl FileSink {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            format,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File that records of `route` for `record.symbol()` are appended to.
    pub fn path_for(&self, record: &Record, route: &SeriesRoute) -> Result<PathBuf, SinkError> {
        let key = route.key_parts(record);
        for segment in key.segments() {
            check_segment(segment)?;
        }
        let [data_source, asset_type, symbol, schema_name] = key.segments();
        Ok(self
            .root
            .join(data_source)
            .join(asset_type)
            .join(symbol)
            .join(format!("{schema_name}.{}", self.format.extension())))
    }
}

fn check_segment(segment: &str) -> Result<(), SinkError> {
    let mut components = Path::new(segment).components();
    let plain = matches!(components.next(), Some(Component::Normal(_)))
        && components.next().is_none()
        && !segment.contains(['/', '\\', '\0']);
    if plain {
        Ok(())
    } else {
        Err(SinkError::InvalidRecord(format!(
            "'{segment}' is not usable as a file path segment"
        )))
    }
}

fn append_csv(path: &Path, header: Vec<String>, row: Vec<String>) -> Result<(), StorageError> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let is_new = file.metadata()?.len() == 0;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if is_new {
        writer.write_record(&header)?;
    }
    writer.write_record(&row)?;
    writer.flush()?;
    Ok(())
}

fn append_line(path: &Path, line: String) -> Result<(), StorageError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[async_trait]
impl OutputSink for FileSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SinkKind {
        SinkKind::File
    }

    // appends run on the blocking pool and finish even if the caller goes away
    fn cancel_safe(&self) -> bool {
        false
    }

    async fn write(
        &self,
        record: &Record,
        route: &SeriesRoute,
        schema: &SchemaModel,
    ) -> Result<(), SinkError> {
        let path = self.path_for(record, route)?;
        let payload = match self.format {
            FileFormat::Csv => {
                let mut header = vec!["series_id".to_string()];
                header.extend(schema.field_names().map(str::to_string));
                let mut row = vec![record.series_id().to_string()];
                row.extend(schema.values(record).iter().map(FieldValue::to_string));
                Payload::Csv { header, row }
            }
            FileFormat::Jsonl => Payload::Line(encode_entry(record, schema)?),
        };

        let target = path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            if let Some(dir) = target.parent() {
                fs::create_dir_all(dir)?;
            }
            match payload {
                Payload::Csv { header, row } => append_csv(&target, header, row),
                Payload::Line(line) => append_line(&target, line),
            }
        })
        .await
        .map_err(|e| SinkError::Permanent(format!("file writer task: {e}")))??;

        debug!("Sink {} appended to {}", self.id, path.display());
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        info!("Sink {} closed ({})", self.id, self.root.display());
        Ok(())
    }
}
