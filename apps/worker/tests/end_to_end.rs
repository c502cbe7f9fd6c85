use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use seriesflow_core::events::MockPipelineEventSink;
use seriesflow_core::orchestrator::{ExtractorState, Health};
use seriesflow_core::series::ExtractorKind;
use seriesflow_extractors::VendorTick;
use seriesflow_sinks::KeyValueStore;
use seriesflow_worker::config::Config;
use seriesflow_worker::{build_pipeline, count_keys, describe_plan};

fn config(vars: &[(&str, String)]) -> Config {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

fn path(p: &Path) -> String {
    p.display().to_string()
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn realtime_feed_routes_aapl_to_cache_and_file_and_msft_to_cache() {
    let dir = TempDir::new().unwrap();
    let registry = dir.path().join("series.csv");
    fs::write(
        &registry,
        "series_id,data_source,extractor_type,schema,assets,output_destinations,asset_type\n\
         AAPL_TRADES,VENDOR_X,realtime,trades,AAPL,cache|file,equity\n\
         MSFT_TRADES,VENDOR_X,realtime,trades,MSFT,cache,equity\n",
    )
    .unwrap();
    let data_dir = dir.path().join("data");
    let config = config(&[
        ("SF_REGISTRY_PATH", path(&registry)),
        ("SF_DATA_DIR", path(&data_dir)),
        ("SF_FEED_SOURCES", "VENDOR_X".into()),
        ("SF_DRAIN_TIMEOUT_MS", "5000".into()),
    ]);

    let events = MockPipelineEventSink::new();
    let pipeline = build_pipeline(&config, Arc::new(events.clone())).await.unwrap();
    assert_eq!(pipeline.orchestrator.plan().len(), 1);
    assert_eq!(count_keys(&pipeline.orchestrator, ExtractorKind::Realtime), 1);
    assert_eq!(
        describe_plan(&pipeline.orchestrator),
        "realtime:VENDOR_X -> AAPL_TRADES, MSFT_TRADES\n"
    );

    let hub = Arc::clone(&pipeline.feeds["VENDOR_X"]);
    let cache = Arc::clone(&pipeline.cache_store);
    let handle = pipeline.orchestrator.start();
    eventually("feed session", || {
        handle.state("realtime:VENDOR_X") == Some(ExtractorState::Running)
    })
    .await;

    let ts = Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap();
    for (symbol, price) in [("AAPL", 190.25), ("MSFT", 410.5)] {
        hub.publish(
            VendorTick::new(symbol, "trades", ts)
                .with_field("price", price)
                .with_field("size", 100.0),
        );
    }
    eventually("three deliveries", || handle.stats().delivered == 3).await;

    let report = handle.shutdown().await;
    assert!(!report.forced);
    assert_eq!(report.health, Health::Healthy);
    assert_eq!(report.states["realtime:VENDOR_X"], ExtractorState::Stopped);
    assert_eq!(report.stats.failed, 0);

    assert_eq!(
        cache.keys().await.unwrap(),
        vec![
            "VENDOR_X:equity:AAPL:trades".to_string(),
            "VENDOR_X:equity:MSFT:trades".to_string(),
        ]
    );
    let aapl_file = data_dir.join("file/VENDOR_X/equity/AAPL/trades.csv");
    let content = fs::read_to_string(aapl_file).unwrap();
    assert_eq!(content.lines().count(), 2);
    assert!(!data_dir.join("file/VENDOR_X/equity/MSFT").exists());
}

#[tokio::test]
async fn historical_replay_runs_to_completion_with_derived_spread() {
    let dir = TempDir::new().unwrap();
    let registry = dir.path().join("series.csv");
    fs::write(
        &registry,
        "series_id,data_source,extractor_type,schema,assets,output_destinations\n\
         AAPL_BARS,REPLAY,historical,ohlcv-1d,AAPL,db_main\n\
         MSFT_BARS,REPLAY,historical,ohlcv-1d,MSFT,db_main\n",
    )
    .unwrap();
    let transformers = dir.path().join("transformers.json");
    fs::write(
        &transformers,
        r#"[{
            "id": "aapl_msft_spread",
            "kind": "spread",
            "inputs": ["AAPL_BARS", "MSFT_BARS"],
            "join": {"policy": "aligned", "tolerance_ms": 0},
            "output": {
                "series_id": "AAPL_MSFT_SPREAD",
                "schema": "spread",
                "asset_type": "spread",
                "symbol": "AAPL-MSFT",
                "destinations": ["cache"]
            },
            "params": {"field": "close"}
        }]"#,
    )
    .unwrap();
    let replay = dir.path().join("replay");
    fs::create_dir_all(replay.join("REPLAY")).unwrap();
    fs::write(
        replay.join("REPLAY/ohlcv-1d.csv"),
        "symbol,ts_event,open,high,low,close,volume\n\
         AAPL,2024-03-01,180,182,179,181,1000\n\
         MSFT,2024-03-01,400,405,399,404,900\n\
         AAPL,2024-03-04,181,186,180,185,1200\n\
         MSFT,2024-03-04,404,410,403,409,950\n\
         MSFT,2024-03-05,409,411,402,403,700\n",
    )
    .unwrap();

    let config = config(&[
        ("SF_REGISTRY_PATH", path(&registry)),
        ("SF_TRANSFORMERS_PATH", path(&transformers)),
        ("SF_DATA_DIR", path(&dir.path().join("data"))),
        ("SF_REPLAY_DIR", path(&replay)),
        ("SF_HISTORICAL_END", "2024-03-05".into()),
    ]);
    let pipeline = build_pipeline(&config, Arc::new(MockPipelineEventSink::new()))
        .await
        .unwrap();
    let cache = Arc::clone(&pipeline.cache_store);

    let report = pipeline.orchestrator.run(std::future::pending()).await;
    assert_eq!(report.states["historical:REPLAY"], ExtractorState::Stopped);
    assert_eq!(report.stats.received, 4);
    assert_eq!(report.stats.derived, 2);
    assert_eq!(report.stats.failed, 0);

    let spreads: Vec<f64> = cache
        .range("derived:spread:AAPL-MSFT:spread")
        .await
        .unwrap()
        .iter()
        .map(|entry| {
            let value: serde_json::Value = serde_json::from_str(entry).unwrap();
            value["value"].as_f64().unwrap()
        })
        .collect();
    assert_eq!(spreads, vec![-223.0, -224.0]);
}

#[tokio::test]
async fn realtime_series_without_feed_is_a_startup_error() {
    let dir = TempDir::new().unwrap();
    let registry = dir.path().join("series.csv");
    fs::write(
        &registry,
        "series_id,data_source,extractor_type,schema,assets,output_destinations\n\
         AAPL_TRADES,VENDOR_Y,realtime,trades,AAPL,cache\n",
    )
    .unwrap();
    let config = config(&[
        ("SF_REGISTRY_PATH", path(&registry)),
        ("SF_DATA_DIR", path(&dir.path().join("data"))),
    ]);

    let err = build_pipeline(&config, Arc::new(MockPipelineEventSink::new()))
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("VENDOR_Y"), "{err}");
}
