//! Integration tests for the orchestrator run loop: draining, restarts,
//! backpressure and derived series.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use seriesflow_core::errors::{ConfigError, ConnectionError, Error};
use seriesflow_core::events::{MockPipelineEventSink, PipelineEvent};
use seriesflow_core::extractors::{
    ExtractorFactory, ExtractorHandle, ExtractorSession, HistoricalExtractor, HistoricalRange,
    RealtimeExtractor, RecordStream,
};
use seriesflow_core::orchestrator::{ExtractorState, Health, Orchestrator, OrchestratorConfig};
use seriesflow_core::records::Record;
use seriesflow_core::retry::RetryPolicy;
use seriesflow_core::schema::{BuiltinSchemaCatalog, SchemaResolver};
use seriesflow_core::series::{ExtractorKind, SeriesDefinition, SeriesRegistry};
use seriesflow_core::sinks::{MockOutputSink, OutputSink};
use seriesflow_core::transform::{
    JoinPolicy, OutputDeclaration, TransformerDefinition, TransformerFactory,
};

// =============================================================================
// Scripted extractor
// =============================================================================

enum After {
    Hang,
    End,
}

/// Each `start` consumes the next script; with none left, `start` fails.
struct ScriptedExtractor {
    data_source: String,
    scripts: Mutex<VecDeque<(Vec<Record>, After)>>,
    starts: AtomicUsize,
    stops: Arc<AtomicUsize>,
}

impl ScriptedExtractor {
    fn new(data_source: &str) -> Arc<Self> {
        Arc::new(Self {
            data_source: data_source.into(),
            scripts: Mutex::new(VecDeque::new()),
            starts: AtomicUsize::new(0),
            stops: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn script(self: &Arc<Self>, records: Vec<Record>, after: After) -> Arc<Self> {
        self.scripts.lock().unwrap().push_back((records, after));
        Arc::clone(self)
    }

    fn open(&self) -> Result<Box<dyn ExtractorSession>, ConnectionError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let Some((records, after)) = self.scripts.lock().unwrap().pop_front() else {
            return Err(ConnectionError::new(&self.data_source, "vendor unreachable"));
        };
        let head = stream::iter(records.into_iter().map(Ok));
        let stream = match after {
            After::Hang => head.chain(stream::pending()).boxed(),
            After::End => head.boxed(),
        };
        Ok(Box::new(ScriptedSession {
            stream: Some(stream),
            stops: Arc::clone(&self.stops),
        }))
    }
}

struct ScriptedSession {
    stream: Option<BoxStream<'static, Result<Record, ConnectionError>>>,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl ExtractorSession for ScriptedSession {
    fn records(&mut self) -> RecordStream<'_> {
        self.stream.take().unwrap_or_else(|| stream::empty().boxed())
    }

    async fn stop(self: Box<Self>) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RealtimeExtractor for ScriptedExtractor {
    fn data_source(&self) -> &str {
        &self.data_source
    }

    async fn start(
        &self,
        _series: &[SeriesDefinition],
    ) -> Result<Box<dyn ExtractorSession>, ConnectionError> {
        self.open()
    }
}

#[async_trait]
impl HistoricalExtractor for ScriptedExtractor {
    fn data_source(&self) -> &str {
        &self.data_source
    }

    async fn start(
        &self,
        _series: &[SeriesDefinition],
        _range: &HistoricalRange,
    ) -> Result<Box<dyn ExtractorSession>, ConnectionError> {
        self.open()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn resolver() -> Arc<SchemaResolver> {
    Arc::new(SchemaResolver::new(Arc::new(BuiltinSchemaCatalog::new())))
}

fn register(factory: &mut ExtractorFactory, kind: ExtractorKind, ext: &Arc<ScriptedExtractor>) {
    let ext = Arc::clone(ext);
    let data_source = ext.data_source.clone();
    factory.register(kind, data_source, move |_ctx| {
        Ok(match kind {
            ExtractorKind::Realtime => {
                ExtractorHandle::Realtime(Arc::clone(&ext) as Arc<dyn RealtimeExtractor>)
            }
            ExtractorKind::Historical => {
                ExtractorHandle::Historical(Arc::clone(&ext) as Arc<dyn HistoricalExtractor>)
            }
        })
    });
}

fn series(id: &str, source: &str, kind: ExtractorKind, symbol: &str) -> SeriesDefinition {
    SeriesDefinition::new(id, source, kind, "trades", [symbol], ["cache"]).with_asset_type("equity")
}

fn trade(series_id: &str, symbol: &str, secs: i64, price: f64) -> Record {
    Record::new(series_id, symbol, "trades", Utc.timestamp_opt(secs, 0).unwrap())
        .with_field("price", price)
        .with_field("size", 100.0)
}

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        connect_timeout: Duration::from_secs(2),
        drain_timeout: Duration::from_secs(5),
        restart: RetryPolicy::fixed(Duration::from_millis(10), 2),
        ..OrchestratorConfig::default()
    }
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn state_changes(events: &MockPipelineEventSink, key: &str) -> Vec<ExtractorState> {
    events
        .events()
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::ExtractorStateChanged { key: k, to, .. } if k == key => Some(to),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_shutdown_delivers_queued_records_before_stopping() {
    let vendor = ScriptedExtractor::new("VENDOR_X")
        .script((1..=5).map(|i| trade("AAPL_TRADES", "AAPL", i, i as f64)).collect(), After::Hang);
    let mut factory = ExtractorFactory::new(resolver());
    register(&mut factory, ExtractorKind::Realtime, &vendor);

    let sink = MockOutputSink::new("cache").gated();
    let events = MockPipelineEventSink::new();
    let registry = SeriesRegistry::from_definitions(vec![series(
        "AAPL_TRADES",
        "VENDOR_X",
        ExtractorKind::Realtime,
        "AAPL",
    )]);

    let orchestrator = Orchestrator::builder(registry, resolver())
        .extractors(factory)
        .sink(Arc::new(sink.clone()))
        .events(Arc::new(events.clone()))
        .config(test_config())
        .build()
        .await
        .unwrap();
    let handle = orchestrator.start();

    eventually("5 enqueued records", || handle.stats().enqueued == 5).await;
    let shutdown = tokio::spawn(handle.shutdown());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.write_count(), 0);
    assert_eq!(
        state_changes(&events, "realtime:VENDOR_X").last(),
        Some(&ExtractorState::Draining)
    );

    sink.open_gate();
    let report = shutdown.await.unwrap();

    assert!(!report.forced);
    assert_eq!(report.stats.delivered, 5);
    assert_eq!(sink.write_count(), 5);
    assert!(sink.is_closed());
    assert_eq!(report.states["realtime:VENDOR_X"], ExtractorState::Stopped);
    assert_eq!(report.health, Health::Healthy);
    assert_eq!(vendor.stops.load(Ordering::SeqCst), 1);
    assert_eq!(
        state_changes(&events, "realtime:VENDOR_X"),
        vec![
            ExtractorState::Starting,
            ExtractorState::Running,
            ExtractorState::Draining,
            ExtractorState::Stopped,
        ]
    );
}

#[tokio::test]
async fn test_drain_deadline_closes_stuck_sinks() {
    let vendor = ScriptedExtractor::new("VENDOR_X")
        .script((1..=3).map(|i| trade("AAPL_TRADES", "AAPL", i, i as f64)).collect(), After::Hang);
    let mut factory = ExtractorFactory::new(resolver());
    register(&mut factory, ExtractorKind::Realtime, &vendor);

    let sink = MockOutputSink::new("cache").gated();
    let events = MockPipelineEventSink::new();
    let registry = SeriesRegistry::from_definitions(vec![series(
        "AAPL_TRADES",
        "VENDOR_X",
        ExtractorKind::Realtime,
        "AAPL",
    )]);

    let handle = Orchestrator::builder(registry, resolver())
        .extractors(factory)
        .sink(Arc::new(sink.clone()))
        .events(Arc::new(events.clone()))
        .config(OrchestratorConfig {
            drain_timeout: Duration::from_millis(200),
            ..test_config()
        })
        .build()
        .await
        .unwrap()
        .start();

    eventually("3 enqueued records", || handle.stats().enqueued == 3).await;
    let started = Instant::now();
    let report = handle.shutdown().await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(report.forced);
    assert_eq!(report.released_sinks, vec!["cache".to_string()]);
    assert!(sink.is_closed());
    assert_eq!(sink.write_count(), 0);
    assert_eq!(report.states["realtime:VENDOR_X"], ExtractorState::Failed);
    assert_eq!(report.health, Health::Failed);
    assert_eq!(vendor.stops.load(Ordering::SeqCst), 1);
    assert!(events.events().iter().any(|e| matches!(
        e,
        PipelineEvent::DrainDeadlineExceeded { released_sinks, .. }
            if released_sinks == &vec!["cache".to_string()]
    )));
}

#[tokio::test]
async fn test_restart_exhaustion_fails_only_that_key() {
    let flaky = ScriptedExtractor::new("FLAKY");
    let healthy = ScriptedExtractor::new("VENDOR_X")
        .script(vec![trade("AAPL_TRADES", "AAPL", 1, 190.0)], After::Hang);
    let mut factory = ExtractorFactory::new(resolver());
    register(&mut factory, ExtractorKind::Realtime, &flaky);
    register(&mut factory, ExtractorKind::Realtime, &healthy);

    let sink = MockOutputSink::new("cache");
    let events = MockPipelineEventSink::new();
    let registry = SeriesRegistry::from_definitions(vec![
        series("FLAKY_TRADES", "FLAKY", ExtractorKind::Realtime, "ZZZ"),
        series("AAPL_TRADES", "VENDOR_X", ExtractorKind::Realtime, "AAPL"),
    ]);

    let handle = Orchestrator::builder(registry, resolver())
        .extractors(factory)
        .sink(Arc::new(sink.clone()))
        .events(Arc::new(events.clone()))
        .config(test_config())
        .build()
        .await
        .unwrap()
        .start();

    eventually("flaky key to fail", || {
        handle.state("realtime:FLAKY") == Some(ExtractorState::Failed)
    })
    .await;
    eventually("healthy record delivered", || handle.stats().delivered == 1).await;

    assert_eq!(handle.state("realtime:VENDOR_X"), Some(ExtractorState::Running));
    assert_eq!(handle.health(), Health::Degraded);
    // first attempt plus two restarts
    assert_eq!(flaky.starts.load(Ordering::SeqCst), 3);
    let restarts = state_changes(&events, "realtime:FLAKY")
        .into_iter()
        .filter(|s| *s == ExtractorState::Restarting)
        .count();
    assert_eq!(restarts, 2);

    let report = handle.shutdown().await;
    assert_eq!(report.states["realtime:FLAKY"], ExtractorState::Failed);
    assert_eq!(report.states["realtime:VENDOR_X"], ExtractorState::Stopped);
    assert_eq!(report.health, Health::Degraded);
}

#[tokio::test]
async fn test_backpressure_drops_are_not_sink_failures() {
    let vendor = ScriptedExtractor::new("VENDOR_X").script(
        (1..=20).map(|i| trade("AAPL_TRADES", "AAPL", i, i as f64)).collect(),
        After::Hang,
    );
    let mut factory = ExtractorFactory::new(resolver());
    register(&mut factory, ExtractorKind::Realtime, &vendor);

    let sink = MockOutputSink::new("cache").gated();
    let events = MockPipelineEventSink::new();
    let registry = SeriesRegistry::from_definitions(vec![series(
        "AAPL_TRADES",
        "VENDOR_X",
        ExtractorKind::Realtime,
        "AAPL",
    )]);

    let handle = Orchestrator::builder(registry, resolver())
        .extractors(factory)
        .sink(Arc::new(sink.clone()))
        .events(Arc::new(events.clone()))
        .config(OrchestratorConfig {
            queue_capacity: 1,
            sink_queue_capacity: 1,
            sink_enqueue_timeout: Duration::from_secs(30),
            enqueue_timeout: Duration::from_millis(20),
            ..test_config()
        })
        .build()
        .await
        .unwrap()
        .start();

    eventually("all records received", || handle.stats().received == 20).await;
    sink.open_gate();
    let report = handle.shutdown().await;

    let drops = events
        .events()
        .iter()
        .filter(|e| matches!(e, PipelineEvent::BackpressureDrop { .. }))
        .count() as u64;
    assert!(report.stats.dropped > 0);
    assert_eq!(drops, report.stats.dropped);
    assert_eq!(report.stats.enqueued + report.stats.dropped, 20);
    assert_eq!(report.stats.failed, 0);
    assert_eq!(report.stats.delivered, report.stats.enqueued);
    assert!(!events
        .events()
        .iter()
        .any(|e| matches!(e, PipelineEvent::DispatchFailed { .. })));
}

#[tokio::test]
async fn test_historical_run_completes_with_derived_series() {
    let replay = ScriptedExtractor::new("REPLAY").script(
        vec![
            trade("AAPL_TRADES", "AAPL", 1, 10.0),
            trade("MSFT_TRADES", "MSFT", 2, 4.0),
            trade("AAPL_TRADES", "AAPL", 3, 12.0),
        ],
        After::End,
    );
    let mut factory = ExtractorFactory::new(resolver());
    register(&mut factory, ExtractorKind::Historical, &replay);

    let registry = SeriesRegistry::from_definitions(vec![
        series("AAPL_TRADES", "REPLAY", ExtractorKind::Historical, "AAPL")
            .with_transformer("aapl_msft"),
        series("MSFT_TRADES", "REPLAY", ExtractorKind::Historical, "MSFT"),
    ]);
    let spread = TransformerDefinition {
        id: "aapl_msft".into(),
        kind: "spread".into(),
        inputs: vec!["AAPL_TRADES".into(), "MSFT_TRADES".into()],
        join: JoinPolicy::Latest,
        output: OutputDeclaration {
            series_id: "AAPL_MSFT_SPREAD".into(),
            schema: "spread".into(),
            data_source: "derived".into(),
            asset_type: "spread".into(),
            symbol: Some("AAPL-MSFT".into()),
            destinations: vec!["cache".into()],
        },
        params: serde_json::json!({}),
    };

    let sink = MockOutputSink::new("cache");
    let orchestrator = Orchestrator::builder(registry, resolver())
        .extractors(factory)
        .transformers(vec![spread], TransformerFactory::with_builtins())
        .sink(Arc::new(sink.clone()))
        .config(test_config())
        .build()
        .await
        .unwrap();

    let report = orchestrator.run(std::future::pending()).await;

    assert!(!report.forced);
    assert_eq!(report.states["historical:REPLAY"], ExtractorState::Stopped);
    assert_eq!(report.stats.received, 3);
    assert_eq!(report.stats.derived, 2);
    assert_eq!(report.stats.delivered, 5);

    let spreads: Vec<f64> = sink
        .writes()
        .iter()
        .filter(|r| r.series_id() == "AAPL_MSFT_SPREAD")
        .filter_map(|r| r.f64_field("value"))
        .collect();
    assert_eq!(spreads, vec![6.0, 8.0]);
    assert!(sink
        .keys()
        .contains(&"derived:spread:AAPL-MSFT:spread".to_string()));
    assert_eq!(sink.ensured_schemas().len(), 2);
}

#[tokio::test]
async fn test_build_rejects_bad_wiring() {
    let registry = || {
        SeriesRegistry::from_definitions(vec![series(
            "AAPL_TRADES",
            "VENDOR_X",
            ExtractorKind::Realtime,
            "AAPL",
        )])
    };
    let cache = || Arc::new(MockOutputSink::new("cache")) as Arc<dyn OutputSink>;

    // nothing registered for the key
    let err = Orchestrator::builder(registry(), resolver())
        .extractors(ExtractorFactory::new(resolver()))
        .sink(cache())
        .build()
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::ExtractorUnavailable { .. }));
    assert!(err.is_fatal());

    // route names a sink that does not exist
    let vendor = ScriptedExtractor::new("VENDOR_X");
    let mut factory = ExtractorFactory::new(resolver());
    register(&mut factory, ExtractorKind::Realtime, &vendor);
    let err = Orchestrator::builder(registry(), resolver())
        .extractors(factory)
        .build()
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::Config(ConfigError::UnknownDestination { .. })
    ));

    // transformer column must name a declared transformer
    let registry = SeriesRegistry::from_definitions(vec![series(
        "AAPL_TRADES",
        "VENDOR_X",
        ExtractorKind::Realtime,
        "AAPL",
    )
    .with_transformer("missing")]);
    let mut factory = ExtractorFactory::new(resolver());
    register(&mut factory, ExtractorKind::Realtime, &vendor);
    let err = Orchestrator::builder(registry, resolver())
        .extractors(factory)
        .sink(cache())
        .build()
        .await
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::Config(ConfigError::InvalidTransformer { .. })
    ));
    assert_eq!(vendor.starts.load(Ordering::SeqCst), 0);
}
