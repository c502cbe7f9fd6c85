mod common;

use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use common::{route, trade, trades_schema};
use seriesflow_core::errors::SinkError;
use seriesflow_core::sinks::{OutputSink, SinkKind};
use seriesflow_sinks::{
    build_sinks, CacheSink, FileFormat, FileSink, InMemoryStore, KeyValueStore, SinkSettings,
};

#[tokio::test]
async fn csv_file_gets_one_header_and_positional_rows() {
    let dir = TempDir::new().unwrap();
    let sink = FileSink::new("file", dir.path(), FileFormat::Csv);
    let schema = trades_schema();
    let aapl = route("AAPL_TRADES", "AAPL", &["file"]);

    sink.write(&trade("AAPL_TRADES", "AAPL", 0, 190.0), &aapl, &schema)
        .await
        .unwrap();
    sink.write(
        &trade("AAPL_TRADES", "AAPL", 1, 190.5).with_field("side", "B"),
        &aapl,
        &schema,
    )
    .await
    .unwrap();

    let path = dir.path().join("VENDOR_X/equity/AAPL/trades.csv");
    let content = fs::read_to_string(path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "series_id,ts_event,price,size,side,trade_id");
    assert_eq!(lines[1], "AAPL_TRADES,2024-03-01T10:00:00.000000000Z,190,10,,");
    assert!(lines[2].ends_with(",190.5,10,B,"));
}

#[tokio::test]
async fn jsonl_file_writes_one_object_per_line() {
    let dir = TempDir::new().unwrap();
    let sink = FileSink::new("file_archive", dir.path(), FileFormat::Jsonl);
    let schema = trades_schema();

    sink.write(
        &trade("MSFT_TRADES", "MSFT", 0, 410.0),
        &route("MSFT_TRADES", "MSFT", &["file_archive"]),
        &schema,
    )
    .await
    .unwrap();

    let content =
        fs::read_to_string(dir.path().join("VENDOR_X/equity/MSFT/trades.jsonl")).unwrap();
    let entry: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
    assert_eq!(entry["series_id"], "MSFT_TRADES");
    assert_eq!(entry["price"], 410.0);
    assert!(entry["side"].is_null());
}

#[tokio::test]
async fn symbols_cannot_escape_the_file_root() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("out");
    let sink = FileSink::new("file", root.clone(), FileFormat::Csv);
    let schema = trades_schema();
    assert!(!sink.cancel_safe());

    for symbol in ["../../x", "a/b", "..", "a\\b"] {
        let record = trade("EVIL_TRADES", symbol, 0, 1.0);
        let err = sink
            .write(&record, &route("EVIL_TRADES", symbol, &["file"]), &schema)
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::InvalidRecord(_)), "{symbol}: {err:?}");
        assert!(!err.is_retryable());
    }

    let escaped: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .filter(|name| name != "out")
        .collect();
    assert!(escaped.is_empty(), "{escaped:?}");
}

#[tokio::test]
async fn cache_keeps_latest_and_caps_stream() {
    let store = Arc::new(InMemoryStore::new());
    let sink = CacheSink::new("cache", store.clone()).with_max_len(3);
    let schema = trades_schema();
    let aapl = route("AAPL_TRADES", "AAPL", &["cache"]);

    for i in 0..5 {
        let record = trade("AAPL_TRADES", "AAPL", i, 190.0 + i as f64);
        sink.write(&record, &aapl, &schema).await.unwrap();
    }

    let key = "VENDOR_X:equity:AAPL:trades";
    assert_eq!(store.keys().await.unwrap(), vec![key.to_string()]);
    let stream = store.range(key).await.unwrap();
    assert_eq!(stream.len(), 3);

    let latest: serde_json::Value =
        serde_json::from_str(&store.latest(key).await.unwrap().unwrap()).unwrap();
    assert_eq!(latest["price"], 194.0);
    assert!(sink.retry_policy().max_retries > 0);
}

#[tokio::test]
async fn build_sinks_infers_kinds_and_skips_duplicates() {
    let dir = TempDir::new().unwrap();
    let settings = SinkSettings::new(dir.path());

    let sinks = build_sinks(["cache", "file", "db_main", "cache"], &settings).unwrap();
    let kinds: Vec<(String, SinkKind)> = sinks
        .iter()
        .map(|s| (s.id().to_string(), s.kind()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("cache".to_string(), SinkKind::Cache),
            ("file".to_string(), SinkKind::File),
            ("db_main".to_string(), SinkKind::Database),
        ]
    );

    assert!(build_sinks(["kafka"], &settings).is_err());
}
