use log::{debug, warn};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::errors::SinkError;
use crate::records::Record;
use crate::schema::SchemaModel;
use crate::sinks::{OutputSink, SeriesRoute};

pub(crate) type Reply = oneshot::Sender<Result<(), SinkError>>;

/// Work item for one sink worker.
pub(crate) enum SinkJob {
    Prepare {
        schema: Arc<SchemaModel>,
        reply: Reply,
    },
    Write {
        record: Arc<Record>,
        route: Arc<SeriesRoute>,
        schema: Arc<SchemaModel>,
        reply: Reply,
    },
}

/// Spawns the single task that drives `sink`.
///
/// Jobs run strictly one after another in arrival order. When every sender is
/// dropped the worker drains what is queued, closes the sink and exits.
pub(crate) fn spawn_sink_worker(
    sink: Arc<dyn OutputSink>,
    capacity: usize,
    timeout: Duration,
) -> (mpsc::Sender<SinkJob>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<SinkJob>(capacity.max(1));

    let task = tokio::spawn(async move {
        let mut prepared: HashSet<String> = HashSet::new();

        while let Some(job) = rx.recv().await {
            match job {
                SinkJob::Prepare { schema, reply } => {
                    let result = ensure_schema(&*sink, &schema, timeout, &mut prepared).await;
                    // receiver may have given up waiting
                    let _ = reply.send(result);
                }
                SinkJob::Write {
                    record,
                    route,
                    schema,
                    reply,
                } => {
                    let result = match ensure_schema(&*sink, &schema, timeout, &mut prepared).await
                    {
                        Ok(()) => write_with_retry(&*sink, &record, &route, &schema, timeout).await,
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(result);
                }
            }
        }

        if let Err(e) = sink.close().await {
            warn!("Sink '{}' failed to close cleanly: {}", sink.id(), e);
        } else {
            debug!("Sink '{}' closed", sink.id());
        }
    });

    (tx, task)
}

async fn ensure_schema(
    sink: &dyn OutputSink,
    schema: &SchemaModel,
    timeout: Duration,
    prepared: &mut HashSet<String>,
) -> Result<(), SinkError> {
    if prepared.contains(schema.name()) {
        return Ok(());
    }
    bounded(sink, "ensure_schema", timeout, sink.ensure_schema(schema)).await?;
    debug!("Sink '{}' prepared schema '{}'", sink.id(), schema.name());
    prepared.insert(schema.name().to_string());
    Ok(())
}

async fn write_with_retry(
    sink: &dyn OutputSink,
    record: &Record,
    route: &SeriesRoute,
    schema: &SchemaModel,
    timeout: Duration,
) -> Result<(), SinkError> {
    let policy = sink.retry_policy();
    let mut attempt = 0;
    loop {
        let result = bounded(sink, "write", timeout, sink.write(record, route, schema)).await;
        match result {
            Err(e) if e.is_retryable() => match policy.next_delay(attempt) {
                Some(delay) => {
                    debug!(
                        "Sink '{}' write of {} failed ({}), retry {} in {:?}",
                        sink.id(),
                        record.series_id(),
                        e,
                        attempt + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
            other => return other,
        }
    }
}

/// Runs one sink call under `timeout`.
///
/// A call is only abandoned when the sink is cancel safe. Otherwise it is
/// awaited to the end and its real outcome is returned, which also keeps the
/// next job from overtaking it.
async fn bounded<F>(
    sink: &dyn OutputSink,
    call_name: &str,
    timeout: Duration,
    call: F,
) -> Result<(), SinkError>
where
    F: Future<Output = Result<(), SinkError>>,
{
    tokio::pin!(call);
    match tokio::time::timeout(timeout, &mut call).await {
        Ok(result) => result,
        Err(_) if sink.cancel_safe() => Err(SinkError::Timeout(timeout)),
        Err(_) => {
            warn!(
                "Sink '{}' {} exceeded {:?}, waiting for it to finish",
                sink.id(),
                call_name,
                timeout
            );
            call.await
        }
    }
}
