use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

use crate::errors::ConfigError;
use crate::sinks::SeriesRoute;

const DERIVED_DATA_SOURCE: &str = "derived";

/// How a multi-input transformer decides that its inputs are ready.
///
/// There is no default: every declaration must choose one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Fire once every input has produced, then on every update of any input,
    /// pairing the update with the latest value of the others.
    Latest,
    /// Fire only when every input has a record within `tolerance_ms` of the
    /// triggering record's timestamp. Matched records are consumed.
    Aligned {
        #[serde(default)]
        tolerance_ms: u64,
    },
}

/// The derived series a transformer emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputDeclaration {
    pub series_id: String,
    pub schema: String,
    #[serde(default = "default_data_source")]
    pub data_source: String,
    #[serde(default = "default_data_source")]
    pub asset_type: String,
    /// Symbol stamped on derived records; the series id when absent.
    #[serde(default)]
    pub symbol: Option<String>,
    pub destinations: Vec<String>,
}

fn default_data_source() -> String {
    DERIVED_DATA_SOURCE.to_string()
}

impl OutputDeclaration {
    pub fn symbol(&self) -> &str {
        self.symbol.as_deref().unwrap_or(&self.series_id)
    }

    pub fn route(&self) -> SeriesRoute {
        SeriesRoute {
            series_id: self.series_id.clone(),
            data_source: self.data_source.clone(),
            asset_type: self.asset_type.clone(),
            schema_name: self.schema.clone(),
            destinations: self.destinations.clone(),
        }
    }
}

/// One transformer declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransformerDefinition {
    pub id: String,
    /// Implementation name registered with the factory, e.g. `spread`.
    pub kind: String,
    /// Consumed series ids, in the order the transformer receives them.
    pub inputs: Vec<String>,
    pub join: JoinPolicy,
    pub output: OutputDeclaration,
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
}

fn empty_params() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

impl TransformerDefinition {
    /// Parses a JSON array of declarations.
    pub fn load<R: Read>(source: R) -> Result<Vec<Self>, ConfigError> {
        serde_json::from_reader(source).map_err(|e| ConfigError::InvalidTransformer {
            transformer: "<declarations>".into(),
            message: e.to_string(),
        })
    }

    pub fn load_path(path: impl AsRef<Path>) -> Result<Vec<Self>, ConfigError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::load(file)
    }
}
