use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

use super::schema_model::FieldType;
use crate::errors::ConfigError;

/// Unvalidated catalog entry, as declared in code or in a JSON catalog file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSpec {
    pub name: String,
    pub fields: Vec<FieldSpec>,
    pub timestamp_field: String,
    pub key_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable,
        }
    }
}

/// Source of named field lists.
pub trait SchemaCatalog: Send + Sync {
    fn lookup(&self, name: &str) -> Option<SchemaSpec>;

    fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    fn names(&self) -> Vec<String>;
}

/// Built-in market data schemas, optionally overlaid with entries from a JSON file.
#[derive(Debug, Clone)]
pub struct BuiltinSchemaCatalog {
    specs: IndexMap<String, SchemaSpec>,
}

impl Default for BuiltinSchemaCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinSchemaCatalog {
    pub fn new() -> Self {
        use FieldType::*;

        let ohlcv = |name: &str| SchemaSpec {
            name: name.to_string(),
            timestamp_field: "ts_event".into(),
            key_fields: vec!["ts_event".into()],
            fields: vec![
                FieldSpec::new("ts_event", Timestamp, false),
                FieldSpec::new("open", Float, false),
                FieldSpec::new("high", Float, false),
                FieldSpec::new("low", Float, false),
                FieldSpec::new("close", Float, false),
                FieldSpec::new("volume", Float, false),
            ],
        };

        let specs = [
            SchemaSpec {
                name: "trades".into(),
                timestamp_field: "ts_event".into(),
                key_fields: vec!["ts_event".into()],
                fields: vec![
                    FieldSpec::new("ts_event", Timestamp, false),
                    FieldSpec::new("price", Float, false),
                    FieldSpec::new("size", Float, false),
                    FieldSpec::new("side", Text, true),
                    FieldSpec::new("trade_id", Text, true),
                ],
            },
            SchemaSpec {
                name: "mbp-1".into(),
                timestamp_field: "ts_event".into(),
                key_fields: vec!["ts_event".into()],
                fields: vec![
                    FieldSpec::new("ts_event", Timestamp, false),
                    FieldSpec::new("bid_px", Float, true),
                    FieldSpec::new("ask_px", Float, true),
                    FieldSpec::new("bid_sz", Float, true),
                    FieldSpec::new("ask_sz", Float, true),
                    FieldSpec::new("sequence", Int, true),
                ],
            },
            ohlcv("ohlcv-1d"),
            ohlcv("ohlcv-1m"),
            SchemaSpec {
                name: "spread".into(),
                timestamp_field: "ts_event".into(),
                key_fields: vec!["ts_event".into()],
                fields: vec![
                    FieldSpec::new("ts_event", Timestamp, false),
                    FieldSpec::new("value", Float, false),
                ],
            },
        ];

        Self {
            specs: specs.into_iter().map(|s| (s.name.clone(), s)).collect(),
        }
    }

    /// Adds or replaces schemas from a JSON array of [`SchemaSpec`].
    pub fn with_overlay<R: Read>(mut self, source: R) -> Result<Self, ConfigError> {
        let specs: Vec<SchemaSpec> =
            serde_json::from_reader(source).map_err(|e| ConfigError::InvalidValue {
                key: "schema catalog".into(),
                message: e.to_string(),
            })?;
        for spec in specs {
            self.specs.insert(spec.name.clone(), spec);
        }
        Ok(self)
    }

    pub fn with_overlay_path(self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.with_overlay(file)
    }
}

impl SchemaCatalog for BuiltinSchemaCatalog {
    fn lookup(&self, name: &str) -> Option<SchemaSpec> {
        self.specs.get(name).cloned()
    }

    fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    fn names(&self) -> Vec<String> {
        self.specs.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        let catalog = BuiltinSchemaCatalog::new();
        assert_eq!(
            catalog.names(),
            vec!["trades", "mbp-1", "ohlcv-1d", "ohlcv-1m", "spread"]
        );
        assert!(!catalog.contains("ticks"));
    }

    #[test]
    fn test_overlay_adds_and_replaces() {
        let json = r#"[
            {"name": "ticks", "timestamp_field": "ts", "key_fields": ["ts"],
             "fields": [{"name": "ts", "type": "timestamp"}, {"name": "px", "type": "float"}]},
            {"name": "spread", "timestamp_field": "ts_event", "key_fields": ["ts_event"],
             "fields": [{"name": "ts_event", "type": "timestamp"},
                        {"name": "value", "type": "float"},
                        {"name": "legs", "type": "int", "nullable": true}]}
        ]"#;
        let catalog = BuiltinSchemaCatalog::new()
            .with_overlay(json.as_bytes())
            .unwrap();
        assert!(catalog.contains("ticks"));
        assert_eq!(catalog.lookup("spread").unwrap().fields.len(), 3);
        assert!(!catalog.lookup("ticks").unwrap().fields[1].nullable);
    }

    #[test]
    fn test_overlay_rejects_bad_json() {
        let err = BuiltinSchemaCatalog::new()
            .with_overlay("{".as_bytes())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
