use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Asset type used when a registry row leaves `asset_type` blank.
pub const DEFAULT_ASSET_TYPE: &str = "unknown";

/// Whether an extractor streams continuously or pulls a bounded range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    Realtime,
    Historical,
}

impl ExtractorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractorKind::Realtime => "realtime",
            ExtractorKind::Historical => "historical",
        }
    }
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "realtime" => Ok(ExtractorKind::Realtime),
            "historical" => Ok(ExtractorKind::Historical),
            other => Err(other.to_string()),
        }
    }
}

/// One named, schema-typed stream of observations for a set of assets.
///
/// Created once when the registry is loaded and never mutated afterwards;
/// every downstream lookup goes through `series_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesDefinition {
    pub series_id: String,
    pub data_source: String,
    pub extractor_kind: ExtractorKind,
    pub schema_name: String,
    /// Ordered, duplicate-free.
    pub assets: Vec<String>,
    /// Ordered, duplicate-free destination ids.
    pub destinations: Vec<String>,
    pub asset_type: String,
    pub description: Option<String>,
    /// Transformer this series is declared to feed.
    pub transformer: Option<String>,
    /// Extractor-specific parameters, always a JSON object.
    pub params: serde_json::Value,
}

impl SeriesDefinition {
    pub fn new(
        series_id: impl Into<String>,
        data_source: impl Into<String>,
        extractor_kind: ExtractorKind,
        schema_name: impl Into<String>,
        assets: impl IntoIterator<Item = impl Into<String>>,
        destinations: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            series_id: series_id.into(),
            data_source: data_source.into(),
            extractor_kind,
            schema_name: schema_name.into(),
            assets: ordered_set(assets.into_iter().map(Into::into)),
            destinations: ordered_set(destinations.into_iter().map(Into::into)),
            asset_type: DEFAULT_ASSET_TYPE.to_string(),
            description: None,
            transformer: None,
            params: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_asset_type(mut self, asset_type: impl Into<String>) -> Self {
        self.asset_type = asset_type.into();
        self
    }

    pub fn with_transformer(mut self, transformer: impl Into<String>) -> Self {
        self.transformer = Some(transformer.into());
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn has_asset(&self, symbol: &str) -> bool {
        self.assets.iter().any(|a| a == symbol)
    }
}

/// Keeps the first occurrence of each non-empty item.
pub(crate) fn ordered_set(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
