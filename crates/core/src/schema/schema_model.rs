use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::catalog::SchemaSpec;
use crate::errors::SchemaError;
use crate::records::{FieldValue, Record};

/// Storage-neutral field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int,
    Float,
    Text,
    Bool,
    Timestamp,
}

impl FieldType {
    /// Whether `value` can be stored in a field of this type.
    ///
    /// Null is handled by the caller; ints widen into floats.
    pub fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (FieldType::Int, FieldValue::Int(_))
                | (FieldType::Float, FieldValue::Float(_))
                | (FieldType::Float, FieldValue::Int(_))
                | (FieldType::Text, FieldValue::Text(_))
                | (FieldType::Bool, FieldValue::Bool(_))
                | (FieldType::Timestamp, FieldValue::Timestamp(_))
        )
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Int => "int",
            FieldType::Float => "float",
            FieldType::Text => "text",
            FieldType::Bool => "bool",
            FieldType::Timestamp => "timestamp",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
}

/// Validated, immutable schema.
///
/// Guarantees stable field order, exactly one timestamp field and a
/// non-empty key field set, none of them nullable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaModel {
    name: String,
    fields: Vec<FieldDef>,
    timestamp_index: usize,
    key_fields: Vec<String>,
}

impl SchemaModel {
    pub fn from_spec(spec: SchemaSpec) -> Result<Self, SchemaError> {
        let invalid = |message: String| SchemaError::Invalid {
            schema: spec.name.clone(),
            message,
        };

        if spec.fields.is_empty() {
            return Err(invalid("schema has no fields".into()));
        }

        let mut names = HashSet::new();
        for field in &spec.fields {
            if !is_identifier(&field.name) {
                return Err(invalid(format!(
                    "field name '{}' must match [a-z_][a-z0-9_]*",
                    field.name
                )));
            }
            if !names.insert(field.name.as_str()) {
                return Err(invalid(format!("duplicate field '{}'", field.name)));
            }
        }

        let timestamp_index = spec
            .fields
            .iter()
            .position(|f| f.name == spec.timestamp_field)
            .ok_or_else(|| {
                invalid(format!(
                    "timestamp field '{}' is not declared",
                    spec.timestamp_field
                ))
            })?;
        let ts = &spec.fields[timestamp_index];
        if ts.field_type != FieldType::Timestamp || ts.nullable {
            return Err(invalid(format!(
                "timestamp field '{}' must be a non-nullable timestamp",
                ts.name
            )));
        }
        let extra_timestamps = spec
            .fields
            .iter()
            .filter(|f| f.field_type == FieldType::Timestamp)
            .count();
        if extra_timestamps != 1 {
            return Err(invalid("exactly one timestamp field is allowed".into()));
        }

        if spec.key_fields.is_empty() {
            return Err(invalid("at least one key field is required".into()));
        }
        for key in &spec.key_fields {
            match spec.fields.iter().find(|f| &f.name == key) {
                None => return Err(invalid(format!("key field '{key}' is not declared"))),
                Some(f) if f.nullable => {
                    return Err(invalid(format!("key field '{key}' cannot be nullable")))
                }
                Some(_) => {}
            }
        }

        Ok(Self {
            name: spec.name,
            fields: spec
                .fields
                .into_iter()
                .map(|f| FieldDef {
                    name: f.name,
                    field_type: f.field_type,
                    nullable: f.nullable,
                })
                .collect(),
            timestamp_index,
            key_fields: spec.key_fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn timestamp_field(&self) -> &FieldDef {
        &self.fields[self.timestamp_index]
    }

    pub fn key_fields(&self) -> &[String] {
        &self.key_fields
    }

    pub fn is_key(&self, name: &str) -> bool {
        self.key_fields.iter().any(|k| k == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Checks a record against this schema: no unknown fields, required
    /// fields present, compatible value types.
    pub fn validate(&self, record: &Record) -> Result<(), String> {
        if record.schema_name() != self.name {
            return Err(format!(
                "record schema '{}' does not match '{}'",
                record.schema_name(),
                self.name
            ));
        }

        let ts_name = &self.timestamp_field().name;
        for (name, value) in record.fields() {
            if name == ts_name {
                return Err(format!(
                    "'{name}' is the timestamp field and is carried by the record timestamp"
                ));
            }
            let Some(def) = self.field(name) else {
                return Err(format!("unknown field '{name}'"));
            };
            if value.is_null() {
                if !def.nullable {
                    return Err(format!("field '{name}' is not nullable"));
                }
            } else if !def.field_type.accepts(value) {
                return Err(format!(
                    "field '{name}' expects {}, got {}",
                    def.field_type,
                    value.type_name()
                ));
            }
        }

        for def in &self.fields {
            if &def.name == ts_name || def.nullable {
                continue;
            }
            match record.get(&def.name) {
                Some(v) if !v.is_null() => {}
                _ => return Err(format!("required field '{}' is missing", def.name)),
            }
        }

        Ok(())
    }

    /// Positional values in field order, the timestamp field taken from the
    /// record timestamp and absent nullable fields as `Null`.
    pub fn values(&self, record: &Record) -> Vec<FieldValue> {
        self.fields
            .iter()
            .enumerate()
            .map(|(i, def)| {
                if i == self.timestamp_index {
                    return FieldValue::Timestamp(record.timestamp());
                }
                match (def.field_type, record.get(&def.name)) {
                    (FieldType::Float, Some(FieldValue::Int(v))) => FieldValue::Float(*v as f64),
                    (_, Some(v)) => v.clone(),
                    (_, None) => FieldValue::Null,
                }
            })
            .collect()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BuiltinSchemaCatalog, FieldSpec, SchemaCatalog};
    use chrono::{TimeZone, Utc};

    fn trades() -> SchemaModel {
        let spec = BuiltinSchemaCatalog::new().lookup("trades").unwrap();
        SchemaModel::from_spec(spec).unwrap()
    }

    fn trade(price: FieldValue) -> Record {
        Record::new("AAPL_TRADES", "AAPL", "trades", Utc.timestamp_opt(1_700_000_000, 0).unwrap())
            .with_field("price", price)
            .with_field("size", 100.0)
    }

    #[test]
    fn test_validate_accepts_well_formed_record() {
        assert_eq!(trades().validate(&trade(FieldValue::Float(189.5))), Ok(()));
        assert_eq!(trades().validate(&trade(FieldValue::Int(189))), Ok(()));
    }

    #[test]
    fn test_validate_rejects_type_mismatch_and_missing_fields() {
        let schema = trades();
        assert!(schema.validate(&trade(FieldValue::Text("x".into()))).is_err());
        assert!(schema.validate(&trade(FieldValue::Null)).is_err());

        let missing = Record::new("S", "AAPL", "trades", Utc::now()).with_field("price", 1.0);
        assert!(schema
            .validate(&missing)
            .unwrap_err()
            .contains("required field 'size'"));

        let unknown = trade(FieldValue::Float(1.0)).with_field("venue", "XNAS");
        assert!(schema.validate(&unknown).unwrap_err().contains("unknown field"));
    }

    #[test]
    fn test_values_are_positional() {
        let schema = trades();
        let record = trade(FieldValue::Int(10));
        let values = schema.values(&record);
        let names: Vec<_> = schema.field_names().collect();
        assert_eq!(names[0], "ts_event");
        assert_eq!(values[0], FieldValue::Timestamp(record.timestamp()));
        assert_eq!(values[1], FieldValue::Float(10.0));
        assert_eq!(values.len(), names.len());
        assert!(values[3].is_null());
    }

    #[test]
    fn test_from_spec_rejects_nullable_key() {
        let spec = SchemaSpec {
            name: "bad".into(),
            timestamp_field: "ts".into(),
            key_fields: vec!["id".into()],
            fields: vec![
                FieldSpec::new("ts", FieldType::Timestamp, false),
                FieldSpec::new("id", FieldType::Text, true),
            ],
        };
        assert!(matches!(
            SchemaModel::from_spec(spec),
            Err(SchemaError::Invalid { .. })
        ));
    }

    #[test]
    fn test_from_spec_rejects_second_timestamp() {
        let spec = SchemaSpec {
            name: "bad".into(),
            timestamp_field: "ts".into(),
            key_fields: vec!["ts".into()],
            fields: vec![
                FieldSpec::new("ts", FieldType::Timestamp, false),
                FieldSpec::new("ts_recv", FieldType::Timestamp, true),
            ],
        };
        assert!(SchemaModel::from_spec(spec).is_err());
    }

    #[test]
    fn test_from_spec_rejects_bad_identifiers() {
        let spec = SchemaSpec {
            name: "bad".into(),
            timestamp_field: "ts".into(),
            key_fields: vec!["ts".into()],
            fields: vec![
                FieldSpec::new("ts", FieldType::Timestamp, false),
                FieldSpec::new("Bid Px", FieldType::Float, true),
            ],
        };
        assert!(SchemaModel::from_spec(spec).is_err());
    }
}
