use crate::records::{destination_key, DestinationKey, Record};
use crate::series::SeriesDefinition;

/// What the allocator needs to know about a series to deliver its records.
///
/// Built from registry definitions and from transformer output declarations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRoute {
    pub series_id: String,
    pub data_source: String,
    pub asset_type: String,
    pub schema_name: String,
    pub destinations: Vec<String>,
}

impl SeriesRoute {
    pub fn from_definition(series: &SeriesDefinition) -> Self {
        Self {
            series_id: series.series_id.clone(),
            data_source: series.data_source.clone(),
            asset_type: series.asset_type.clone(),
            schema_name: series.schema_name.clone(),
            destinations: series.destinations.clone(),
        }
    }

    /// `dataSource:assetType:symbol:schemaName` for `record`.
    pub fn destination_key(&self, record: &Record) -> String {
        destination_key(
            &self.data_source,
            &self.asset_type,
            record.symbol(),
            &self.schema_name,
        )
    }

    pub fn key_parts(&self, record: &Record) -> DestinationKey {
        DestinationKey::new(
            &self.data_source,
            &self.asset_type,
            record.symbol(),
            &self.schema_name,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::ExtractorKind;
    use chrono::Utc;

    #[test]
    fn test_key_uses_route_and_record_symbol() {
        let def = SeriesDefinition::new(
            "AAPL_TRADES",
            "VENDOR_X",
            ExtractorKind::Realtime,
            "trades",
            ["AAPL"],
            ["cache"],
        )
        .with_asset_type("equity");
        let route = SeriesRoute::from_definition(&def);
        let record = Record::new("AAPL_TRADES", "AAPL", "trades", Utc::now());
        assert_eq!(route.destination_key(&record), "VENDOR_X:equity:AAPL:trades");
        assert_eq!(route.key_parts(&record).to_string(), route.destination_key(&record));
    }
}
