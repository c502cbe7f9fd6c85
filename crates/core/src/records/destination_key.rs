//! Destination key convention for the cache and file sink families.
//!
//! Format: `dataSource:assetType:symbol:schemaName`. Downstream consumers
//! read this key directly; changing the format is a breaking change.

use std::fmt;

/// Derives the key for one observation. Pure: no state, no normalization.
pub fn destination_key(
    data_source: &str,
    asset_type: &str,
    symbol: &str,
    schema_name: &str,
) -> String {
    format!("{data_source}:{asset_type}:{symbol}:{schema_name}")
}

/// Structured form of a destination key, for sinks that lay keys out as paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationKey {
    pub data_source: String,
    pub asset_type: String,
    pub symbol: String,
    pub schema_name: String,
}

impl DestinationKey {
    pub fn new(data_source: &str, asset_type: &str, symbol: &str, schema_name: &str) -> Self {
        Self {
            data_source: data_source.to_string(),
            asset_type: asset_type.to_string(),
            symbol: symbol.to_string(),
            schema_name: schema_name.to_string(),
        }
    }

    /// Segments in key order.
    pub fn segments(&self) -> [&str; 4] {
        [
            &self.data_source,
            &self.asset_type,
            &self.symbol,
            &self.schema_name,
        ]
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&destination_key(
            &self.data_source,
            &self.asset_type,
            &self.symbol,
            &self.schema_name,
        ))
    }
}
