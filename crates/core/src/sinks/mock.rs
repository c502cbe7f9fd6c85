use async_trait::async_trait;
use log::warn;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;

use super::route::SeriesRoute;
use super::traits::{OutputSink, SinkKind};
use crate::errors::SinkError;
use crate::records::Record;
use crate::retry::RetryPolicy;
use crate::schema::SchemaModel;

#[derive(Default)]
struct MockSinkState {
    writes: Vec<Record>,
    keys: Vec<String>,
    ensured: Vec<String>,
    scripted_failures: VecDeque<SinkError>,
    fail_always: Option<SinkError>,
    attempts: usize,
    closed: bool,
}

/// In-memory sink that records every accepted write.
///
/// Failures can be scripted (`fail_next`) or permanent (`failing`), and a
/// closed gate holds writes until [`MockOutputSink::open_gate`] is called.
/// Clones share state.
#[derive(Clone)]
pub struct MockOutputSink {
    id: String,
    kind: SinkKind,
    retry: RetryPolicy,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
    cancel_safe: bool,
    state: Arc<Mutex<MockSinkState>>,
}

impl MockOutputSink {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            kind: SinkKind::infer(&id).unwrap_or(SinkKind::Cache),
            id,
            retry: RetryPolicy::none(),
            delay: None,
            gate: None,
            cancel_safe: true,
            state: Arc::new(Mutex::new(MockSinkState::default())),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Every write sleeps for `delay` before completing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reports itself as not cancel safe, like a sink that hands writes to a
    /// blocking thread.
    pub fn detached(mut self) -> Self {
        self.cancel_safe = false;
        self
    }

    /// Writes block until [`Self::open_gate`].
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Every write fails with `error`.
    pub fn failing(self, error: SinkError) -> Self {
        self.lock().fail_always = Some(error);
        self
    }

    /// The next write attempt fails with `error`. Calls queue up.
    pub fn fail_next(&self, error: SinkError) {
        self.lock().scripted_failures.push_back(error);
    }

    pub fn writes(&self) -> Vec<Record> {
        self.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    /// Write attempts, including failed ones.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Destination keys of accepted writes, in order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys.clone()
    }

    /// Schema names passed to `ensure_schema`, in call order.
    pub fn ensured_schemas(&self) -> Vec<String> {
        self.lock().ensured.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, MockSinkState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Mock sink state was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[async_trait]
impl OutputSink for MockOutputSink {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SinkKind {
        self.kind
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn cancel_safe(&self) -> bool {
        self.cancel_safe
    }

    async fn ensure_schema(&self, schema: &SchemaModel) -> Result<(), SinkError> {
        self.lock().ensured.push(schema.name().to_string());
        Ok(())
    }

    async fn write(
        &self,
        record: &Record,
        route: &SeriesRoute,
        _schema: &SchemaModel,
    ) -> Result<(), SinkError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.map_err(|_| SinkError::Closed)?;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if state.closed {
            return Err(SinkError::Closed);
        }
        state.attempts += 1;
        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = &state.fail_always {
            return Err(error.clone());
        }
        state.keys.push(route.destination_key(record));
        state.writes.push(record.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.lock().closed = true;
        Ok(())
    }
}
