use std::collections::VecDeque;
use std::sync::Arc;

use super::definition::JoinPolicy;
use crate::records::Record;

/// Rolling join state for one stage.
pub(crate) struct JoinBuffer {
    inputs: Vec<String>,
    policy: JoinPolicy,
    depth: usize,
    latest: Vec<Option<Arc<Record>>>,
    pending: Vec<VecDeque<Arc<Record>>>,
}

impl JoinBuffer {
    pub(crate) fn new(inputs: Vec<String>, policy: JoinPolicy, depth: usize) -> Self {
        let n = inputs.len();
        Self {
            inputs,
            policy,
            depth: depth.max(1),
            latest: vec![None; n],
            pending: vec![VecDeque::new(); n],
        }
    }

    /// Buffers `record` and returns a complete input set when the policy fires.
    pub(crate) fn offer(&mut self, record: &Arc<Record>) -> Option<Vec<Arc<Record>>> {
        let slot = self.inputs.iter().position(|i| i == record.series_id())?;
        match self.policy {
            JoinPolicy::Latest => {
                self.latest[slot] = Some(Arc::clone(record));
                self.latest.iter().cloned().collect()
            }
            JoinPolicy::Aligned { tolerance_ms } => self.offer_aligned(slot, record, tolerance_ms),
        }
    }

    fn offer_aligned(
        &mut self,
        slot: usize,
        record: &Arc<Record>,
        tolerance_ms: u64,
    ) -> Option<Vec<Arc<Record>>> {
        {
            let queue = &mut self.pending[slot];
            queue.push_back(Arc::clone(record));
            while queue.len() > self.depth {
                queue.pop_front();
            }
        }

        let tolerance_ns = tolerance_ms.saturating_mul(1_000_000);
        let target = record.timestamp();
        let distance = |r: &Arc<Record>| {
            (r.timestamp() - target)
                .num_nanoseconds()
                .map_or(u64::MAX, i64::unsigned_abs)
        };

        let mut picks = Vec::with_capacity(self.inputs.len());
        for (i, queue) in self.pending.iter().enumerate() {
            if i == slot {
                picks.push(Arc::clone(record));
                continue;
            }
            let best = queue
                .iter()
                .filter(|r| distance(r) <= tolerance_ns)
                .min_by_key(|r| distance(r))?;
            picks.push(Arc::clone(best));
        }

        for (queue, pick) in self.pending.iter_mut().zip(&picks) {
            let cutoff = pick.timestamp();
            queue.retain(|r| r.timestamp() > cutoff);
        }
        Some(picks)
    }
}
