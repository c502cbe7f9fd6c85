use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use std::collections::HashMap;

use crate::records::{FieldValue, Record};
use crate::series::SeriesDefinition;

/// Maps a vendor `(symbol, schema)` pair to the series assigned to an extractor.
///
/// One vendor message may feed several series (same asset and schema, different
/// destinations), so lookups return every match in registry order.
#[derive(Debug, Clone, Default)]
pub struct SeriesIndex {
    routes: HashMap<(String, String), Vec<String>>,
    symbols: Vec<String>,
}

impl SeriesIndex {
    pub fn new(series: &[SeriesDefinition]) -> Self {
        let mut routes: HashMap<(String, String), Vec<String>> = HashMap::new();
        let mut symbols: Vec<String> = Vec::new();
        for s in series {
            for asset in &s.assets {
                routes
                    .entry((asset.clone(), s.schema_name.clone()))
                    .or_default()
                    .push(s.series_id.clone());
                if !symbols.contains(asset) {
                    symbols.push(asset.clone());
                }
            }
        }
        Self { routes, symbols }
    }

    /// Series ids subscribed to `symbol` in `schema`.
    pub fn lookup(&self, symbol: &str, schema: &str) -> &[String] {
        self.routes
            .get(&(symbol.to_string(), schema.to_string()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every distinct symbol, for vendor subscriptions.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// One record per matching series. Empty when nothing subscribed.
    pub fn records_for(
        &self,
        symbol: &str,
        schema: &str,
        timestamp: DateTime<Utc>,
        fields: &IndexMap<String, FieldValue>,
    ) -> Vec<Record> {
        self.lookup(symbol, schema)
            .iter()
            .map(|series_id| {
                Record::new(series_id.as_str(), symbol, schema, timestamp)
                    .with_fields(fields.iter().map(|(k, v)| (k.clone(), v.clone())))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::ExtractorKind;

    fn def(id: &str, schema: &str, assets: &[&str]) -> SeriesDefinition {
        SeriesDefinition::new(
            id,
            "VENDOR_X",
            ExtractorKind::Realtime,
            schema,
            assets.iter().copied(),
            ["cache"],
        )
    }

    #[test]
    fn test_lookup_by_symbol_and_schema() {
        let index = SeriesIndex::new(&[
            def("AAPL_TRADES", "trades", &["AAPL"]),
            def("TECH_TRADES", "trades", &["AAPL", "MSFT"]),
            def("AAPL_BOOK", "mbp-1", &["AAPL"]),
        ]);

        assert_eq!(index.lookup("AAPL", "trades"), ["AAPL_TRADES", "TECH_TRADES"]);
        assert_eq!(index.lookup("MSFT", "trades"), ["TECH_TRADES"]);
        assert_eq!(index.lookup("AAPL", "mbp-1"), ["AAPL_BOOK"]);
        assert!(index.lookup("GOOG", "trades").is_empty());
        assert_eq!(index.symbols(), ["AAPL", "MSFT"]);
    }

    #[test]
    fn test_records_for_fans_out_per_series() {
        let index = SeriesIndex::new(&[
            def("AAPL_TRADES", "trades", &["AAPL"]),
            def("TECH_TRADES", "trades", &["AAPL", "MSFT"]),
        ]);
        let mut fields = IndexMap::new();
        fields.insert("price".to_string(), FieldValue::Float(190.0));
        let records = index.records_for("AAPL", "trades", Utc::now(), &fields);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].series_id(), "TECH_TRADES");
        assert_eq!(records[1].f64_field("price"), Some(190.0));
    }
}
