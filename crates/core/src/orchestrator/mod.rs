//! Orchestrator.
//!
//! Wires the registry, schemas, extractors, transformers and sinks together at
//! startup, then runs one task per extractor key feeding a single router:
//!
//! ```text
//!  ExtractorTask(realtime:VENDOR_X) ─┐
//!  ExtractorTask(historical:REPLAY) ─┼─► [ingest queue] ─► router ─► OutputAllocator ─► sinks
//!                     ...            ─┘   send_timeout      │    ▲
//!                                       (drop + event)      ▼    │ derived
//!                                                     TransformerPipeline
//!                                   router ─► [tickets] ─► reporter (stats)
//! ```
//!
//! Shutdown is signalled through a `watch` channel and bounded by the drain
//! timeout; see [`OrchestratorHandle::shutdown`].

mod config;
mod state;
mod stats;
mod tasks;

use indexmap::IndexMap;
use log::{error, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};

use crate::allocator::{OutputAllocator, SinkRelease};
use crate::errors::{ConfigError, Error, Result};
use crate::events::{NoOpPipelineEventSink, PipelineEvent, PipelineEventSink};
use crate::extractors::{group, ExtractorFactory, ExtractorHandle, ExtractorKey};
use crate::schema::SchemaResolver;
use crate::series::{SeriesDefinition, SeriesRegistry};
use crate::sinks::{OutputSink, SeriesRoute};
use crate::transform::{TransformerDefinition, TransformerFactory, TransformerPipeline};

pub use config::OrchestratorConfig;
pub use state::{ExtractorState, Health, StateBoard};
pub use stats::{PipelineStats, StatsSnapshot};
use tasks::{report_dispatches, route_records, ExtractorTask};

/// Final outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub states: IndexMap<String, ExtractorState>,
    pub health: Health,
    pub stats: StatsSnapshot,
    /// The drain deadline elapsed and remaining work was aborted.
    pub forced: bool,
    /// Sinks closed by a forced stop while their queues still held work.
    pub released_sinks: Vec<String>,
}

/// One planned extractor instance and the series it serves.
#[derive(Debug, Clone)]
pub struct ExtractorPlan {
    pub key: ExtractorKey,
    pub handle: ExtractorHandle,
    pub series: Vec<SeriesDefinition>,
}

pub struct OrchestratorBuilder {
    registry: SeriesRegistry,
    schemas: Arc<SchemaResolver>,
    extractors: Option<ExtractorFactory>,
    transformers: Vec<TransformerDefinition>,
    transformer_factory: TransformerFactory,
    sinks: Vec<Arc<dyn OutputSink>>,
    events: Arc<dyn PipelineEventSink>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    pub fn new(registry: SeriesRegistry, schemas: Arc<SchemaResolver>) -> Self {
        Self {
            registry,
            schemas,
            extractors: None,
            transformers: Vec::new(),
            transformer_factory: TransformerFactory::with_builtins(),
            sinks: Vec::new(),
            events: Arc::new(NoOpPipelineEventSink),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn extractors(mut self, factory: ExtractorFactory) -> Self {
        self.extractors = Some(factory);
        self
    }

    pub fn transformers(
        mut self,
        definitions: Vec<TransformerDefinition>,
        factory: TransformerFactory,
    ) -> Self {
        self.transformers = definitions;
        self.transformer_factory = factory;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sinks(mut self, sinks: impl IntoIterator<Item = Arc<dyn OutputSink>>) -> Self {
        self.sinks.extend(sinks);
        self
    }

    pub fn events(mut self, events: Arc<dyn PipelineEventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates and wires everything. Every error here is a startup error.
    pub async fn build(self) -> Result<Orchestrator> {
        let OrchestratorBuilder {
            registry,
            schemas,
            mut extractors,
            transformers,
            transformer_factory,
            sinks,
            events,
            config,
        } = self;

        if registry.is_empty() {
            warn!("Series registry is empty; nothing will be extracted");
        }

        for series in registry.series() {
            schemas.resolve(&series.schema_name)?;
        }
        for def in &transformers {
            schemas.resolve(&def.output.schema)?;
        }

        check_transformer_references(registry.series(), &transformers)?;
        let source_ids: HashSet<String> =
            registry.series().iter().map(|s| s.series_id.clone()).collect();
        let pipeline = TransformerPipeline::build(
            &transformers,
            &transformer_factory,
            &source_ids,
            config.join_buffer_depth,
        )?;

        let mut routes: Vec<SeriesRoute> = registry
            .series()
            .iter()
            .map(SeriesRoute::from_definition)
            .collect();
        routes.extend(pipeline.output_routes());

        if let Some(factory) = extractors.as_mut() {
            factory.set_events(Arc::clone(&events));
        }
        let groups = group(registry.series());
        let mut plan = Vec::with_capacity(groups.len());
        for (key, series) in groups {
            let handle = match &extractors {
                Some(factory) => factory.instantiate(&key, &series)?,
                None => {
                    return Err(Error::ExtractorUnavailable {
                        kind: key.kind,
                        data_source: key.data_source.clone(),
                    })
                }
            };
            plan.push(ExtractorPlan {
                key,
                handle,
                series,
            });
        }

        let allocator = OutputAllocator::new(
            sinks,
            routes,
            Arc::clone(&schemas),
            Arc::clone(&events),
            config.allocator_options(),
        )?;
        if let Err(e) = allocator.prepare().await {
            allocator.close().await;
            return Err(e);
        }

        let board = Arc::new(StateBoard::new(Arc::clone(&events)));
        for entry in &plan {
            board.register(entry.key.to_string());
        }

        info!(
            "Orchestrator built: {} series, {} extractors, {} transformers",
            registry.len(),
            plan.len(),
            pipeline.len()
        );
        Ok(Orchestrator {
            config,
            plan,
            pipeline,
            allocator,
            board,
            events,
            stats: Arc::new(PipelineStats::default()),
        })
    }
}

/// A registry series naming a transformer must be one of its inputs.
fn check_transformer_references(
    series: &[SeriesDefinition],
    transformers: &[TransformerDefinition],
) -> std::result::Result<(), ConfigError> {
    for s in series {
        let Some(name) = &s.transformer else {
            continue;
        };
        match transformers.iter().find(|t| &t.id == name) {
            Some(t) if t.inputs.contains(&s.series_id) => {}
            Some(_) => {
                return Err(ConfigError::InvalidTransformer {
                    transformer: name.clone(),
                    message: format!(
                        "series '{}' references it but is not one of its inputs",
                        s.series_id
                    ),
                })
            }
            None => {
                return Err(ConfigError::InvalidTransformer {
                    transformer: name.clone(),
                    message: format!(
                        "referenced by series '{}' but never declared",
                        s.series_id
                    ),
                })
            }
        }
    }
    Ok(())
}

/// A fully wired, not yet running pipeline.
pub struct Orchestrator {
    config: OrchestratorConfig,
    plan: Vec<ExtractorPlan>,
    pipeline: TransformerPipeline,
    allocator: OutputAllocator,
    board: Arc<StateBoard>,
    events: Arc<dyn PipelineEventSink>,
    stats: Arc<PipelineStats>,
}

impl Orchestrator {
    pub fn builder(registry: SeriesRegistry, schemas: Arc<SchemaResolver>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(registry, schemas)
    }

    pub fn plan(&self) -> &[ExtractorPlan] {
        &self.plan
    }

    pub fn allocator(&self) -> &OutputAllocator {
        &self.allocator
    }

    pub fn pipeline(&self) -> &TransformerPipeline {
        &self.pipeline
    }

    /// Releases the sinks without running anything.
    pub async fn close(self) {
        self.allocator.close().await;
    }

    /// Spawns the extractor, router and reporter tasks.
    pub fn start(self) -> OrchestratorHandle {
        let Orchestrator {
            config,
            plan,
            pipeline,
            allocator,
            board,
            events,
            stats,
        } = self;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (ingest_tx, ingest_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (ticket_tx, ticket_rx) = mpsc::channel(config.queue_capacity.max(1));

        let extractor_tasks = plan
            .into_iter()
            .map(|entry| {
                let key = entry.key.to_string();
                let task = ExtractorTask {
                    key: entry.key,
                    handle: entry.handle,
                    series: entry.series,
                    range: config.historical_range,
                    connect_timeout: config.connect_timeout,
                    enqueue_timeout: config.enqueue_timeout,
                    restart: config.restart,
                    ingest: ingest_tx.clone(),
                    board: Arc::clone(&board),
                    stats: Arc::clone(&stats),
                    events: Arc::clone(&events),
                };
                (key, tokio::spawn(task.run(shutdown_rx.clone())))
            })
            .collect::<Vec<_>>();
        // the router ends once the last extractor task drops its sender
        drop(ingest_tx);

        let release = allocator.release_handle();
        let router = tokio::spawn(route_records(
            ingest_rx,
            allocator,
            pipeline,
            ticket_tx,
            Arc::clone(&stats),
            Arc::clone(&events),
        ));
        let reporter = tokio::spawn(report_dispatches(ticket_rx, Arc::clone(&stats)));

        info!("Orchestrator started {} extractor tasks", extractor_tasks.len());
        OrchestratorHandle {
            config,
            shutdown: shutdown_tx,
            extractor_tasks,
            router,
            reporter,
            release,
            board,
            events,
            stats,
        }
    }

    /// Runs until `shutdown` resolves or every key reaches a terminal state,
    /// then drains.
    pub async fn run<F>(self, shutdown: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        let handle = self.start();
        tokio::select! {
            _ = shutdown => info!("Shutdown requested"),
            _ = handle.board.wait_all_terminal() => info!("All extractors finished"),
        }
        handle.shutdown().await
    }
}

/// A running orchestrator.
pub struct OrchestratorHandle {
    config: OrchestratorConfig,
    shutdown: watch::Sender<bool>,
    extractor_tasks: Vec<(String, JoinHandle<()>)>,
    router: JoinHandle<OutputAllocator>,
    reporter: JoinHandle<()>,
    release: SinkRelease,
    board: Arc<StateBoard>,
    events: Arc<dyn PipelineEventSink>,
    stats: Arc<PipelineStats>,
}

impl OrchestratorHandle {
    pub fn state(&self, key: &str) -> Option<ExtractorState> {
        self.board.get(key)
    }

    pub fn states(&self) -> IndexMap<String, ExtractorState> {
        self.board.snapshot()
    }

    pub fn health(&self) -> Health {
        self.board.health()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn wait_all_terminal(&self) {
        self.board.wait_all_terminal().await
    }

    /// Signals every task, drains in-flight records to the sinks and closes
    /// them, all within the drain timeout. On expiry the remaining tasks are
    /// aborted, sinks with pending work are closed without draining and the
    /// keys still draining end up `Failed`.
    pub async fn shutdown(self) -> RunReport {
        let OrchestratorHandle {
            config,
            shutdown,
            extractor_tasks,
            router,
            reporter,
            release,
            board,
            events,
            stats,
        } = self;

        let _ = shutdown.send(true);

        let mut aborts: Vec<AbortHandle> = extractor_tasks
            .iter()
            .map(|(_, task)| task.abort_handle())
            .collect();
        aborts.push(router.abort_handle());
        aborts.push(reporter.abort_handle());

        let drain = {
            let board = Arc::clone(&board);
            async move {
                for (key, task) in extractor_tasks {
                    if let Err(e) = task.await {
                        error!("Extractor task {} ended abnormally: {}", key, e);
                        board.transition(&key, ExtractorState::Failed, Some(e.to_string()));
                    }
                }
                let allocator = match router.await {
                    Ok(allocator) => Some(allocator),
                    Err(e) => {
                        error!("Router task ended abnormally: {}", e);
                        None
                    }
                };
                if let Err(e) = reporter.await {
                    error!("Dispatch reporter ended abnormally: {}", e);
                }
                if let Some(allocator) = allocator {
                    allocator.close().await;
                }
            }
        };

        let forced = tokio::time::timeout(config.drain_timeout, drain).await.is_err();
        let mut released_sinks = Vec::new();
        if forced {
            for abort in &aborts {
                abort.abort();
            }
            released_sinks = release.force().await;
            let pending_keys = board.live_keys();
            error!(
                "Drain did not finish within {:?}; forcing stop",
                config.drain_timeout
            );
            events.emit(PipelineEvent::DrainDeadlineExceeded {
                pending_keys,
                released_sinks: released_sinks.clone(),
            });
        }
        board.settle(forced);

        let report = RunReport {
            states: board.snapshot(),
            health: board.health(),
            stats: stats.snapshot(),
            forced,
            released_sinks,
        };
        info!(
            "Orchestrator stopped ({:?}): {} received, {} delivered, {} failed, {} dropped",
            report.health,
            report.stats.received,
            report.stats.delivered,
            report.stats.failed,
            report.stats.dropped
        );
        report
    }
}
