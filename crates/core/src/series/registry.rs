use log::{debug, info};
use serde::Deserialize;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use super::filter::SeriesFilter;
use super::series_model::{ordered_set, ExtractorKind, SeriesDefinition, DEFAULT_ASSET_TYPE};
use crate::errors::ConfigError;
use crate::schema::SchemaCatalog;

/// Columns every registry must carry.
pub const REQUIRED_COLUMNS: [&str; 6] = [
    "series_id",
    "data_source",
    "extractor_type",
    "schema",
    "assets",
    "output_destinations",
];

const LIST_DELIMITERS: [char; 3] = [',', ';', '|'];

#[derive(Debug, Deserialize)]
struct RegistryRow {
    series_id: String,
    data_source: String,
    extractor_type: String,
    schema: String,
    assets: String,
    output_destinations: String,
    #[serde(default)]
    asset_type: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    active: Option<String>,
    #[serde(default)]
    transformer: Option<String>,
    #[serde(default)]
    params: Option<String>,
}

/// The validated, active set of series definitions, in registry order.
#[derive(Debug, Clone, Default)]
pub struct SeriesRegistry {
    series: Vec<SeriesDefinition>,
}

impl SeriesRegistry {
    pub fn from_definitions(series: Vec<SeriesDefinition>) -> Self {
        Self { series }
    }

    /// Loads a registry file from disk. See [`SeriesRegistry::load`].
    pub fn load_path(
        path: impl AsRef<Path>,
        catalog: &dyn SchemaCatalog,
    ) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let registry = Self::load(file, catalog)?;
        info!(
            "Loaded {} series from registry {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    /// Parses and validates a CSV registry.
    ///
    /// Fails on the first bad row; a registry never loads with partial coverage.
    /// Rows with a falsy `active` cell are validated (including series_id
    /// uniqueness) and then left out.
    pub fn load<R: Read>(source: R, catalog: &dyn SchemaCatalog) -> Result<Self, ConfigError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);

        let headers: csv::StringRecord = reader
            .headers()?
            .iter()
            .map(|h| h.to_ascii_lowercase())
            .collect();
        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(ConfigError::MissingColumn(column.to_string()));
            }
        }
        reader.set_headers(headers);

        let mut seen = HashSet::new();
        let mut series = Vec::new();

        for (index, row) in reader.deserialize::<RegistryRow>().enumerate() {
            let row_number = index + 1;
            let row = row?;
            let (definition, active) = parse_row(row_number, row, catalog)?;

            if !seen.insert(definition.series_id.clone()) {
                return Err(ConfigError::DuplicateSeriesId {
                    row: row_number,
                    series_id: definition.series_id,
                });
            }

            if active {
                series.push(definition);
            } else {
                debug!("Skipping inactive series '{}'", definition.series_id);
            }
        }

        Ok(Self { series })
    }

    pub fn series(&self) -> &[SeriesDefinition] {
        &self.series
    }

    pub fn get(&self, series_id: &str) -> Option<&SeriesDefinition> {
        self.series.iter().find(|s| s.series_id == series_id)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Returns the definitions matching `filter`, in registry order.
    pub fn select(&self, filter: &SeriesFilter) -> Vec<SeriesDefinition> {
        self.series
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect()
    }

    pub fn realtime(&self) -> Vec<SeriesDefinition> {
        self.select(&SeriesFilter::new().kind(ExtractorKind::Realtime))
    }

    pub fn historical(&self) -> Vec<SeriesDefinition> {
        self.select(&SeriesFilter::new().kind(ExtractorKind::Historical))
    }

    pub fn by_data_source(&self, data_source: &str) -> Vec<SeriesDefinition> {
        self.select(&SeriesFilter::new().data_source(data_source))
    }

    pub fn by_asset_type(&self, asset_type: &str) -> Vec<SeriesDefinition> {
        self.select(&SeriesFilter::new().asset_type(asset_type))
    }

    pub fn by_schema(&self, schema: &str) -> Vec<SeriesDefinition> {
        self.select(&SeriesFilter::new().schema(schema))
    }

    /// Narrows the registry in place, e.g. to the subset one worker runs.
    pub fn retain(self, filter: &SeriesFilter) -> Self {
        Self {
            series: self.series.into_iter().filter(|s| filter.matches(s)).collect(),
        }
    }

    pub fn into_definitions(self) -> Vec<SeriesDefinition> {
        self.series
    }
}

fn parse_row(
    row: usize,
    raw: RegistryRow,
    catalog: &dyn SchemaCatalog,
) -> Result<(SeriesDefinition, bool), ConfigError> {
    let series_id = raw.series_id.trim().to_string();
    if series_id.is_empty() {
        return Err(invalid(row, "series_id is empty"));
    }
    let data_source = raw.data_source.trim().to_string();
    if data_source.is_empty() {
        return Err(invalid(row, "data_source is empty"));
    }

    let extractor_kind = raw
        .extractor_type
        .parse::<ExtractorKind>()
        .map_err(|value| ConfigError::UnknownExtractorKind { row, value })?;

    let schema_name = raw.schema.trim().to_string();
    if !catalog.contains(&schema_name) {
        return Err(ConfigError::UnknownSchema {
            row,
            schema: schema_name,
        });
    }

    let assets = split_list(&raw.assets);
    if assets.is_empty() {
        return Err(ConfigError::EmptyAssets { row, series_id });
    }
    let destinations = split_list(&raw.output_destinations);
    if destinations.is_empty() {
        return Err(ConfigError::EmptyDestinations { row, series_id });
    }

    let active = match non_empty(raw.active) {
        None => true,
        Some(value) => parse_flag(&value)
            .ok_or_else(|| invalid(row, &format!("active must be a boolean, got '{value}'")))?,
    };

    let params = match non_empty(raw.params) {
        None => serde_json::Value::Object(Default::default()),
        Some(text) => {
            let value: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| invalid(row, &format!("params is not valid JSON: {e}")))?;
            if !value.is_object() {
                return Err(invalid(row, "params must be a JSON object"));
            }
            value
        }
    };

    let definition = SeriesDefinition {
        series_id,
        data_source,
        extractor_kind,
        schema_name,
        assets,
        destinations,
        asset_type: non_empty(raw.asset_type)
            .map(|t| t.to_ascii_lowercase())
            .unwrap_or_else(|| DEFAULT_ASSET_TYPE.to_string()),
        description: non_empty(raw.description),
        transformer: non_empty(raw.transformer),
        params,
    };

    Ok((definition, active))
}

fn split_list(cell: &str) -> Vec<String> {
    ordered_set(cell.split(&LIST_DELIMITERS[..]).map(str::to_string))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(row: usize, message: &str) -> ConfigError {
    ConfigError::InvalidRow {
        row,
        message: message.to_string(),
    }
}
