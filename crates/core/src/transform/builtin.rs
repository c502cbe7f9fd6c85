//! Built-in transformers.

use std::sync::Arc;

use super::definition::{JoinPolicy, TransformerDefinition};
use super::traits::{TransformContext, Transformer};
use crate::errors::{ConfigError, TransformationError};
use crate::records::Record;

fn numeric(record: &Record, field: &str) -> Result<f64, TransformationError> {
    let value = record
        .f64_field(field)
        .ok_or_else(|| TransformationError::MissingField {
            series_id: record.series_id().to_string(),
            field: field.to_string(),
        })?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(TransformationError::InvalidValue {
            field: field.to_string(),
            message: format!("{value} is not finite"),
        })
    }
}

fn latest_timestamp(
    inputs: &[Arc<Record>],
) -> Result<chrono::DateTime<chrono::Utc>, TransformationError> {
    inputs
        .iter()
        .map(|r| r.timestamp())
        .max()
        .ok_or_else(|| TransformationError::Failed("no inputs".into()))
}

fn expect_inputs(def: &TransformerDefinition, n: usize) -> Result<(), ConfigError> {
    if def.inputs.len() == n {
        Ok(())
    } else {
        Err(ConfigError::InvalidTransformer {
            transformer: def.id.clone(),
            message: format!("kind '{}' takes {} inputs, got {}", def.kind, n, def.inputs.len()),
        })
    }
}

/// `value = first.field - second.field`, stamped with the newer input timestamp.
///
/// Params: `{"field": "price"}` (default `price`).
pub struct SpreadTransformer {
    inputs: Vec<String>,
    join: JoinPolicy,
    field: String,
}

impl SpreadTransformer {
    pub fn from_definition(def: &TransformerDefinition) -> Result<Self, ConfigError> {
        expect_inputs(def, 2)?;
        let field = match def.params.get("field") {
            None => "price".to_string(),
            Some(serde_json::Value::String(f)) => f.clone(),
            Some(other) => {
                return Err(ConfigError::InvalidTransformer {
                    transformer: def.id.clone(),
                    message: format!("params.field must be a string, got {other}"),
                })
            }
        };
        Ok(Self {
            inputs: def.inputs.clone(),
            join: def.join,
            field,
        })
    }
}

impl Transformer for SpreadTransformer {
    fn required_inputs(&self) -> &[String] {
        &self.inputs
    }

    fn join_policy(&self) -> JoinPolicy {
        self.join
    }

    fn transform(
        &self,
        ctx: &TransformContext<'_>,
        inputs: &[Arc<Record>],
    ) -> Result<Vec<Record>, TransformationError> {
        let [a, b] = inputs else {
            return Err(TransformationError::Failed(format!(
                "expected 2 inputs, got {}",
                inputs.len()
            )));
        };
        let value = numeric(a, &self.field)? - numeric(b, &self.field)?;
        let ts = latest_timestamp(inputs)?;
        Ok(vec![ctx.output_record(ts).with_field("value", value)])
    }
}

/// Mid price of a level-1 book: `(bid_px + ask_px) / 2`.
pub struct MidTransformer {
    inputs: Vec<String>,
    join: JoinPolicy,
}

impl MidTransformer {
    pub fn from_definition(def: &TransformerDefinition) -> Result<Self, ConfigError> {
        expect_inputs(def, 1)?;
        Ok(Self {
            inputs: def.inputs.clone(),
            join: def.join,
        })
    }
}

impl Transformer for MidTransformer {
    fn required_inputs(&self) -> &[String] {
        &self.inputs
    }

    fn join_policy(&self) -> JoinPolicy {
        self.join
    }

    fn transform(
        &self,
        ctx: &TransformContext<'_>,
        inputs: &[Arc<Record>],
    ) -> Result<Vec<Record>, TransformationError> {
        let book = inputs
            .first()
            .ok_or_else(|| TransformationError::MissingInput(self.inputs[0].clone()))?;
        let mid = (numeric(book, "bid_px")? + numeric(book, "ask_px")?) / 2.0;
        Ok(vec![ctx
            .output_record(book.timestamp())
            .with_field("value", mid)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::OutputDeclaration;
    use chrono::{TimeZone, Utc};

    fn definition(kind: &str, inputs: &[&str], params: serde_json::Value) -> TransformerDefinition {
        TransformerDefinition {
            id: format!("{kind}_test"),
            kind: kind.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            join: JoinPolicy::Latest,
            output: OutputDeclaration {
                series_id: "OUT".into(),
                schema: "spread".into(),
                data_source: "derived".into(),
                asset_type: "spread".into(),
                symbol: None,
                destinations: vec!["cache".into()],
            },
            params,
        }
    }

    fn trade(series: &str, secs: i64, price: f64) -> Arc<Record> {
        Arc::new(
            Record::new(series, "S", "trades", Utc.timestamp_opt(secs, 0).unwrap())
                .with_field("price", price)
                .with_field("size", 1.0),
        )
    }

    #[test]
    fn test_spread() {
        let def = definition("spread", &["A", "B"], serde_json::json!({}));
        let t = SpreadTransformer::from_definition(&def).unwrap();
        let ctx = TransformContext {
            transformer_id: &def.id,
            output: &def.output,
        };
        let out = t
            .transform(&ctx, &[trade("A", 5, 190.5), trade("B", 7, 410.0)])
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].series_id(), "OUT");
        assert_eq!(out[0].symbol(), "OUT");
        assert_eq!(out[0].timestamp().timestamp(), 7);
        assert_eq!(out[0].f64_field("value"), Some(-219.5));
    }

    #[test]
    fn test_spread_missing_field() {
        let def = definition("spread", &["A", "B"], serde_json::json!({"field": "close"}));
        let t = SpreadTransformer::from_definition(&def).unwrap();
        let ctx = TransformContext {
            transformer_id: &def.id,
            output: &def.output,
        };
        let err = t
            .transform(&ctx, &[trade("A", 1, 1.0), trade("B", 1, 2.0)])
            .unwrap_err();
        assert_eq!(
            err,
            TransformationError::MissingField {
                series_id: "A".into(),
                field: "close".into()
            }
        );
    }

    #[test]
    fn test_arity_is_checked_at_build() {
        let def = definition("spread", &["A"], serde_json::json!({}));
        assert!(SpreadTransformer::from_definition(&def).is_err());
        let def = definition("mid", &["A", "B"], serde_json::json!({}));
        assert!(MidTransformer::from_definition(&def).is_err());
    }

    #[test]
    fn test_mid() {
        let def = definition("mid", &["BOOK"], serde_json::json!({}));
        let t = MidTransformer::from_definition(&def).unwrap();
        let ctx = TransformContext {
            transformer_id: &def.id,
            output: &def.output,
        };
        let book = Arc::new(
            Record::new("BOOK", "ESH5", "mbp-1", Utc::now())
                .with_field("bid_px", 100.0)
                .with_field("ask_px", 100.5),
        );
        let out = t.transform(&ctx, &[book]).unwrap();
        assert_eq!(out[0].f64_field("value"), Some(100.25));
    }
}
