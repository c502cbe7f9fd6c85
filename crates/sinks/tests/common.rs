#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

use seriesflow_core::records::Record;
use seriesflow_core::schema::{BuiltinSchemaCatalog, SchemaModel, SchemaResolver};
use seriesflow_core::series::{ExtractorKind, SeriesDefinition};
use seriesflow_core::sinks::SeriesRoute;

pub fn trades_schema() -> Arc<SchemaModel> {
    SchemaResolver::new(Arc::new(BuiltinSchemaCatalog::new()))
        .resolve("trades")
        .unwrap()
}

pub fn route(series_id: &str, symbol: &str, destinations: &[&str]) -> SeriesRoute {
    SeriesRoute::from_definition(
        &SeriesDefinition::new(
            series_id,
            "VENDOR_X",
            ExtractorKind::Realtime,
            "trades",
            [symbol],
            destinations.iter().copied(),
        )
        .with_asset_type("equity"),
    )
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_709_287_200 + secs, 0).unwrap()
}

pub fn trade(series_id: &str, symbol: &str, secs: i64, price: f64) -> Record {
    Record::new(series_id, symbol, "trades", at(secs))
        .with_field("price", price)
        .with_field("size", 10.0)
}
