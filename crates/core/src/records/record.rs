use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;

use super::field_value::{format_timestamp, FieldValue};

/// A single timestamped observation of one series for one asset.
///
/// Records are built once by an extractor or a transformer and then only
/// read; transformers emit new records instead of editing their inputs.
/// The schema's timestamp field is carried by `timestamp`, not by `fields`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    series_id: String,
    symbol: String,
    schema_name: String,
    #[serde(serialize_with = "serialize_ts")]
    timestamp: DateTime<Utc>,
    fields: IndexMap<String, FieldValue>,
}

fn serialize_ts<S: serde::Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_timestamp(ts))
}

impl Record {
    pub fn new(
        series_id: impl Into<String>,
        symbol: impl Into<String>,
        schema_name: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            series_id: series_id.into(),
            symbol: symbol.into(),
            schema_name: schema_name.into(),
            timestamp,
            fields: IndexMap::new(),
        }
    }

    /// Appends (or replaces) a field while the record is being built.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_fields<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
    {
        for (name, value) in fields {
            self.fields.insert(name.into(), value.into());
        }
        self
    }

    pub fn series_id(&self) -> &str {
        &self.series_id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Fields in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn f64_field(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_f64)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fields_keep_insertion_order() {
        let record = Record::new("S", "AAPL", "trades", Utc::now())
            .with_field("size", 5.0)
            .with_field("price", 1.0)
            .with_field("side", "B");
        let names: Vec<_> = record.fields().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["size", "price", "side"]);
        assert_eq!(record.f64_field("price"), Some(1.0));
        assert_eq!(record.f64_field("side"), None);
    }

    #[test]
    fn test_serializes_as_flat_payload() {
        let ts = Utc.timestamp_opt(60, 0).unwrap();
        let record = Record::new("S", "AAPL", "trades", ts).with_field("price", 2.5);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["series_id"], "S");
        assert_eq!(json["timestamp"], "1970-01-01T00:01:00.000000000Z");
        assert_eq!(json["fields"]["price"], 2.5);
    }
}
