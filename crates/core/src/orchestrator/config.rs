use std::time::Duration;

use crate::allocator::AllocatorOptions;
use crate::extractors::HistoricalRange;
use crate::retry::RetryPolicy;

/// Immutable runtime settings for one orchestrator run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Capacity of the shared extractor -> router queue.
    pub queue_capacity: usize,
    /// How long an extractor waits for queue space before dropping a record.
    pub enqueue_timeout: Duration,
    /// Upper bound for opening one extractor session.
    pub connect_timeout: Duration,
    pub sink_timeout: Duration,
    pub sink_queue_capacity: usize,
    /// How long the router waits for room in one full sink queue before
    /// failing that destination for the record.
    pub sink_enqueue_timeout: Duration,
    /// Budget for the whole shutdown sequence.
    pub drain_timeout: Duration,
    /// Restart policy for failed extractor sessions.
    pub restart: RetryPolicy,
    /// Rolling buffer depth per input for aligned joins.
    pub join_buffer_depth: usize,
    pub historical_range: HistoricalRange,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            enqueue_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(30),
            sink_timeout: Duration::from_secs(10),
            sink_queue_capacity: 1024,
            sink_enqueue_timeout: Duration::from_millis(100),
            drain_timeout: Duration::from_secs(30),
            restart: RetryPolicy::fixed(Duration::from_millis(5000), 3),
            join_buffer_depth: 64,
            historical_range: HistoricalRange::default(),
        }
    }
}

impl OrchestratorConfig {
    pub(crate) fn allocator_options(&self) -> AllocatorOptions {
        AllocatorOptions {
            sink_timeout: self.sink_timeout,
            sink_queue_capacity: self.sink_queue_capacity,
            sink_enqueue_timeout: self.sink_enqueue_timeout,
        }
    }
}
