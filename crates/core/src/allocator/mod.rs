//! Output allocator.
//!
//! Fans records out to the sinks named by their route. Each sink is driven by
//! one worker task behind a bounded FIFO queue:
//!
//! ```text
//!                      ┌─► [queue] ─► worker(db)    ─► SqliteSink
//! submit(record) ──────┼─► [queue] ─► worker(cache) ─► CacheSink   (retry w/ backoff)
//!   validate, fan out  └─► [queue] ─► worker(file)  ─► FileSink
//!          │
//!          └─► DispatchTicket ── wait() ─► DispatchResult { delivered, failed }
//! ```
//!
//! A sink failure never affects the other destinations of the same record.
//! Fan-out never waits on one queue before filling the others: a record is
//! offered to every free queue first, and only the full ones get a bounded
//! wait, after which that destination alone fails with `QueueFull`.

mod dispatch;
mod worker;

use futures::future::join_all;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};

use crate::errors::{ConfigError, Error, Result, SinkError};
use crate::events::PipelineEventSink;
use crate::records::Record;
use crate::schema::{SchemaModel, SchemaResolver};
use crate::sinks::{OutputSink, SeriesRoute, SinkKind};

pub use dispatch::{DispatchResult, DispatchTicket};
use worker::{spawn_sink_worker, SinkJob};

/// Tuning for the per-sink workers.
#[derive(Debug, Clone, Copy)]
pub struct AllocatorOptions {
    /// Upper bound for one `ensure_schema` or `write` call.
    pub sink_timeout: Duration,
    /// Capacity of each sink's queue.
    pub sink_queue_capacity: usize,
    /// How long a record waits for room in one full sink queue before that
    /// destination is failed.
    pub sink_enqueue_timeout: Duration,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self {
            sink_timeout: Duration::from_secs(10),
            sink_queue_capacity: 1024,
            sink_enqueue_timeout: Duration::from_millis(100),
        }
    }
}

struct SinkWorker {
    kind: SinkKind,
    sink: Arc<dyn OutputSink>,
    tx: mpsc::Sender<SinkJob>,
    task: JoinHandle<()>,
}

pub struct OutputAllocator {
    workers: BTreeMap<String, SinkWorker>,
    routes: HashMap<String, Arc<SeriesRoute>>,
    schemas: Arc<SchemaResolver>,
    events: Arc<dyn PipelineEventSink>,
    options: AllocatorOptions,
}

/// Stops sink workers and closes their sinks without waiting for the queues.
///
/// Outlives the allocator, so a forced shutdown can still release every sink
/// after the task owning the allocator was aborted.
#[derive(Clone)]
pub struct SinkRelease {
    sinks: Vec<(Arc<dyn OutputSink>, AbortHandle)>,
    close_timeout: Duration,
}

impl SinkRelease {
    /// Aborts every worker still running and closes its sink. Returns the ids
    /// of the sinks released this way.
    pub async fn force(&self) -> Vec<String> {
        let mut released = Vec::new();
        for (sink, worker) in &self.sinks {
            if worker.is_finished() {
                continue;
            }
            worker.abort();
            match tokio::time::timeout(self.close_timeout, sink.close()).await {
                Ok(Ok(())) => debug!("Sink '{}' closed after forced stop", sink.id()),
                Ok(Err(e)) => warn!(
                    "Sink '{}' failed to close after forced stop: {}",
                    sink.id(),
                    e
                ),
                Err(_) => warn!(
                    "Sink '{}' did not close within {:?}",
                    sink.id(),
                    self.close_timeout
                ),
            }
            released.push(sink.id().to_string());
        }
        released
    }
}

impl OutputAllocator {
    /// Spawns one worker per sink. Every destination named by `routes` must be
    /// one of the sinks.
    pub fn new(
        sinks: Vec<Arc<dyn OutputSink>>,
        routes: Vec<SeriesRoute>,
        schemas: Arc<SchemaResolver>,
        events: Arc<dyn PipelineEventSink>,
        options: AllocatorOptions,
    ) -> std::result::Result<Self, ConfigError> {
        let mut by_id: BTreeMap<String, Arc<dyn OutputSink>> = BTreeMap::new();
        for sink in sinks {
            let id = sink.id().to_string();
            if by_id.insert(id.clone(), sink).is_some() {
                return Err(ConfigError::InvalidValue {
                    key: "destinations".into(),
                    message: format!("sink '{id}' is registered twice"),
                });
            }
        }

        let mut route_table = HashMap::with_capacity(routes.len());
        for route in routes {
            if let Some(missing) = route.destinations.iter().find(|d| !by_id.contains_key(*d)) {
                return Err(ConfigError::UnknownDestination {
                    series_id: route.series_id.clone(),
                    destination: missing.clone(),
                });
            }
            route_table.insert(route.series_id.clone(), Arc::new(route));
        }

        let workers = by_id
            .into_iter()
            .map(|(id, sink)| {
                let kind = sink.kind();
                let (tx, task) = spawn_sink_worker(
                    Arc::clone(&sink),
                    options.sink_queue_capacity,
                    options.sink_timeout,
                );
                (
                    id,
                    SinkWorker {
                        kind,
                        sink,
                        tx,
                        task,
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        info!(
            "Output allocator ready: {} sinks, {} routes",
            workers.len(),
            route_table.len()
        );
        Ok(Self {
            workers,
            routes: route_table,
            schemas,
            events,
            options,
        })
    }

    pub fn route(&self, series_id: &str) -> Option<&SeriesRoute> {
        self.routes.get(series_id).map(Arc::as_ref)
    }

    pub fn sink_ids(&self) -> Vec<&str> {
        self.workers.keys().map(String::as_str).collect()
    }

    pub fn sink_kind(&self, destination: &str) -> Option<SinkKind> {
        self.workers.get(destination).map(|w| w.kind)
    }

    pub fn release_handle(&self) -> SinkRelease {
        SinkRelease {
            sinks: self
                .workers
                .values()
                .map(|w| (Arc::clone(&w.sink), w.task.abort_handle()))
                .collect(),
            close_timeout: self.options.sink_timeout,
        }
    }

    /// Ensures every routed schema on every sink that receives it.
    ///
    /// Any failure is returned; the caller is expected to abort startup.
    pub async fn prepare(&self) -> Result<()> {
        let mut pending = Vec::new();
        for (id, worker) in &self.workers {
            let mut names: Vec<&str> = self
                .routes
                .values()
                .filter(|r| r.destinations.iter().any(|d| d == id))
                .map(|r| r.schema_name.as_str())
                .collect();
            names.sort_unstable();
            names.dedup();

            for name in names {
                let schema = self.schemas.resolve(name)?;
                let (reply, ack) = oneshot::channel();
                worker
                    .tx
                    .send(SinkJob::Prepare { schema, reply })
                    .await
                    .map_err(|_| Error::Sink(SinkError::Closed))?;
                pending.push((id.as_str(), name, ack));
            }
        }

        for (id, schema, ack) in pending {
            let result = ack.await.unwrap_or(Err(SinkError::Closed));
            if let Err(e) = result {
                error!("Sink '{}' could not prepare schema '{}': {}", id, schema, e);
                return Err(Error::Sink(e));
            }
        }
        debug!("All sink schemas prepared");
        Ok(())
    }

    /// Dispatches a record to every destination of its series' route.
    pub async fn submit_routed(&self, record: Arc<Record>) -> DispatchTicket {
        let destinations = self
            .routes
            .get(record.series_id())
            .map(|r| r.destinations.clone())
            .unwrap_or_default();
        self.submit(record, &destinations).await
    }

    /// Validates `record`, then enqueues it on each destination's worker.
    ///
    /// Free queues take the record at once. Full ones are waited on together,
    /// each for at most `sink_enqueue_timeout`. Never waits for the writes.
    pub async fn submit(&self, record: Arc<Record>, destinations: &[String]) -> DispatchTicket {
        let mut ticket = DispatchTicket::new(record.series_id(), Arc::clone(&self.events));

        let prepared = match self.lookup(&record) {
            Ok(found) => found,
            Err(reason) => {
                for dest in destinations {
                    ticket.reject(dest.clone(), SinkError::InvalidRecord(reason.clone()));
                }
                return ticket;
            }
        };
        let (route, schema) = prepared;

        let mut backlogged = Vec::new();
        for dest in destinations {
            let Some(worker) = self.workers.get(dest) else {
                ticket.reject(dest.clone(), SinkError::UnknownDestination(dest.clone()));
                continue;
            };
            let (reply, ack) = oneshot::channel();
            let job = SinkJob::Write {
                record: Arc::clone(&record),
                route: Arc::clone(&route),
                schema: Arc::clone(&schema),
                reply,
            };
            match worker.tx.try_send(job) {
                Ok(()) => ticket.push(dest.clone(), ack),
                Err(TrySendError::Full(job)) => backlogged.push((dest, &worker.tx, job, ack)),
                Err(TrySendError::Closed(_)) => ticket.reject(dest.clone(), SinkError::Closed),
            }
        }
        if backlogged.is_empty() {
            return ticket;
        }

        let wait = self.options.sink_enqueue_timeout;
        let outcomes = join_all(backlogged.into_iter().map(|(dest, tx, job, ack)| async move {
            (dest, ack, tx.send_timeout(job, wait).await)
        }))
        .await;
        for (dest, ack, outcome) in outcomes {
            match outcome {
                Ok(()) => ticket.push(dest.clone(), ack),
                Err(SendTimeoutError::Timeout(_)) => {
                    debug!("Sink '{}' queue full, rejecting {}", dest, record.series_id());
                    ticket.reject(dest.clone(), SinkError::QueueFull(wait));
                }
                Err(SendTimeoutError::Closed(_)) => ticket.reject(dest.clone(), SinkError::Closed),
            }
        }
        ticket
    }

    pub async fn dispatch(&self, record: Arc<Record>, destinations: &[String]) -> DispatchResult {
        self.submit(record, destinations).await.wait().await
    }

    /// Lets every queue drain, closes the sinks and joins the workers.
    pub async fn close(self) {
        let OutputAllocator { workers, .. } = self;
        let mut tasks = Vec::with_capacity(workers.len());
        for (id, worker) in workers {
            drop(worker.tx);
            tasks.push((id, worker.task));
        }
        for (id, task) in tasks {
            if let Err(e) = task.await {
                error!("Sink worker '{}' ended abnormally: {}", id, e);
            }
        }
        info!("Output allocator closed");
    }

    fn lookup(
        &self,
        record: &Record,
    ) -> std::result::Result<(Arc<SeriesRoute>, Arc<SchemaModel>), String> {
        let route = self
            .routes
            .get(record.series_id())
            .ok_or_else(|| format!("no route for series '{}'", record.series_id()))?;
        if route.schema_name != record.schema_name() {
            return Err(format!(
                "series '{}' is routed with schema '{}', record carries '{}'",
                record.series_id(),
                route.schema_name,
                record.schema_name()
            ));
        }
        let schema = self
            .schemas
            .resolve(record.schema_name())
            .map_err(|e| e.to_string())?;
        schema.validate(record)?;
        Ok((Arc::clone(route), schema))
    }
}
