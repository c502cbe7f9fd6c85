use futures::StreamExt;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};

use super::state::{ExtractorState, StateBoard};
use super::stats::PipelineStats;
use crate::allocator::{DispatchTicket, OutputAllocator};
use crate::errors::ConnectionError;
use crate::events::{PipelineEvent, PipelineEventSink};
use crate::extractors::{ExtractorHandle, ExtractorKey, ExtractorSession, HistoricalRange};
use crate::records::Record;
use crate::retry::RetryPolicy;
use crate::series::{ExtractorKind, SeriesDefinition};
use crate::transform::TransformerPipeline;

/// Resolves when shutdown has been requested or the signal was dropped.
async fn shutdown_requested(signal: &mut watch::Receiver<bool>) {
    let _ = signal.wait_for(|stop| *stop).await;
}

enum SessionEnd {
    Shutdown,
    Completed,
    Lost(ConnectionError),
}

/// Owns one extractor key for the lifetime of the run.
pub(crate) struct ExtractorTask {
    pub key: ExtractorKey,
    pub handle: ExtractorHandle,
    pub series: Vec<SeriesDefinition>,
    pub range: HistoricalRange,
    pub connect_timeout: Duration,
    pub enqueue_timeout: Duration,
    pub restart: RetryPolicy,
    pub ingest: mpsc::Sender<Record>,
    pub board: Arc<StateBoard>,
    pub stats: Arc<PipelineStats>,
    pub events: Arc<dyn PipelineEventSink>,
}

impl ExtractorTask {
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let key = self.key.to_string();
        let mut attempt = 0u32;

        loop {
            if *shutdown.borrow() {
                self.board
                    .transition(&key, ExtractorState::Draining, Some("shutdown".into()));
                return;
            }
            self.board.transition(&key, ExtractorState::Starting, None);

            let opened = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => None,
                opened = tokio::time::timeout(
                    self.connect_timeout,
                    self.handle.start(&self.series, &self.range),
                ) => Some(opened),
            };

            let failure = match opened {
                None => {
                    self.board
                        .transition(&key, ExtractorState::Draining, Some("shutdown".into()));
                    return;
                }
                Some(Ok(Ok(mut session))) => {
                    self.board.transition(&key, ExtractorState::Running, None);
                    info!("Extractor {} running {} series", key, self.series.len());

                    let (end, produced) = self.pump(&mut session, &mut shutdown).await;
                    match end {
                        SessionEnd::Shutdown => {
                            self.board.transition(
                                &key,
                                ExtractorState::Draining,
                                Some("shutdown".into()),
                            );
                            session.stop().await;
                            return;
                        }
                        SessionEnd::Completed => {
                            self.board.transition(
                                &key,
                                ExtractorState::Draining,
                                Some("source exhausted".into()),
                            );
                            session.stop().await;
                            self.board.transition(&key, ExtractorState::Stopped, None);
                            return;
                        }
                        SessionEnd::Lost(e) => {
                            session.stop().await;
                            if produced {
                                attempt = 0;
                            }
                            e
                        }
                    }
                }
                Some(Ok(Err(e))) => e,
                Some(Err(_)) => ConnectionError::new(
                    self.handle.data_source(),
                    format!("session did not open within {:?}", self.connect_timeout),
                ),
            };

            if !failure.is_retryable() {
                self.board
                    .transition(&key, ExtractorState::Failed, Some(failure.to_string()));
                return;
            }
            let Some(delay) = self.restart.next_delay(attempt) else {
                self.board.transition(
                    &key,
                    ExtractorState::Failed,
                    Some(format!("retries exhausted after {attempt} restarts: {failure}")),
                );
                return;
            };
            attempt += 1;
            self.board.transition(
                &key,
                ExtractorState::Restarting,
                Some(format!("{failure}; retry {attempt} in {delay:?}")),
            );

            tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => {
                    self.board
                        .transition(&key, ExtractorState::Draining, Some("shutdown".into()));
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Forwards records until the session ends or shutdown is requested.
    /// Also reports whether at least one record arrived.
    async fn pump(
        &self,
        session: &mut Box<dyn ExtractorSession>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> (SessionEnd, bool) {
        let mut produced = false;
        let mut records = session.records();
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => return (SessionEnd::Shutdown, produced),
                next = records.next() => next,
            };
            match next {
                Some(Ok(record)) => {
                    produced = true;
                    if !self.forward(record).await {
                        // router is gone
                        return (SessionEnd::Shutdown, produced);
                    }
                }
                Some(Err(e)) => return (SessionEnd::Lost(e), produced),
                None if self.handle.kind() == ExtractorKind::Historical => {
                    return (SessionEnd::Completed, produced)
                }
                None => {
                    return (
                        SessionEnd::Lost(ConnectionError::new(
                            self.handle.data_source(),
                            "feed ended",
                        )),
                        produced,
                    )
                }
            }
        }
    }

    /// Enqueues one record, dropping it if the queue stays full past the
    /// enqueue timeout. Returns false once the queue is closed.
    async fn forward(&self, record: Record) -> bool {
        self.stats.record_received();
        match self.ingest.send_timeout(record, self.enqueue_timeout).await {
            Ok(()) => {
                self.stats.record_enqueued();
                true
            }
            Err(SendTimeoutError::Timeout(record)) => {
                self.stats.record_dropped();
                self.events.emit(PipelineEvent::BackpressureDrop {
                    key: self.key.to_string(),
                    series_id: record.series_id().to_string(),
                    timestamp: record.timestamp(),
                });
                true
            }
            Err(SendTimeoutError::Closed(_)) => false,
        }
    }
}

/// Single consumer of the ingest queue: dispatches raw records, feeds the
/// pipeline and dispatches what it derives. Hands the allocator back once
/// every producer is gone.
pub(crate) async fn route_records(
    mut ingest: mpsc::Receiver<Record>,
    allocator: OutputAllocator,
    mut pipeline: TransformerPipeline,
    tickets: mpsc::Sender<DispatchTicket>,
    stats: Arc<PipelineStats>,
    events: Arc<dyn PipelineEventSink>,
) -> OutputAllocator {
    while let Some(record) = ingest.recv().await {
        if allocator.route(record.series_id()).is_none() {
            warn!(
                "Extractor produced a record for unrouted series '{}', discarding",
                record.series_id()
            );
            continue;
        }
        let record = Arc::new(record);
        let ticket = allocator.submit_routed(Arc::clone(&record)).await;
        if tickets.send(ticket).await.is_err() {
            warn!("Dispatch reporter stopped early");
        }

        if !pipeline.consumes(record.series_id()) {
            continue;
        }
        let output = pipeline.process(&record);
        for (transformer, error) in output.errors {
            stats.record_transform_error();
            events.emit(PipelineEvent::transform_failed(transformer, error));
        }
        for derived in output.derived {
            stats.record_derived();
            let ticket = allocator.submit_routed(derived).await;
            if tickets.send(ticket).await.is_err() {
                warn!("Dispatch reporter stopped early");
            }
        }
    }
    debug!("Ingest queue closed, router done");
    allocator
}

/// Awaits dispatch tickets in submission order and tallies the outcomes.
pub(crate) async fn report_dispatches(
    mut tickets: mpsc::Receiver<DispatchTicket>,
    stats: Arc<PipelineStats>,
) {
    while let Some(ticket) = tickets.recv().await {
        let result = ticket.wait().await;
        stats.record_dispatch(result.delivered.len(), result.failed.len());
    }
}
