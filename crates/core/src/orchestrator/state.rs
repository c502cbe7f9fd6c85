use indexmap::IndexMap;
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::events::{PipelineEvent, PipelineEventSink};

/// Lifecycle of one extractor key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorState {
    Idle,
    Starting,
    Running,
    Restarting,
    Draining,
    Stopped,
    Failed,
}

impl ExtractorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExtractorState::Stopped | ExtractorState::Failed)
    }

    /// Whether moving from `self` to `to` is a legal step.
    pub fn can_transition_to(self, to: ExtractorState) -> bool {
        use ExtractorState::*;
        matches!(
            (self, to),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting | Running, Restarting)
                | (Restarting, Starting)
                | (Starting | Running | Restarting, Failed)
                | (Idle | Starting | Running | Restarting, Draining)
                | (Draining, Stopped | Failed)
        )
    }
}

/// Aggregate view over every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Failed,
}

impl Health {
    pub fn from_states<'a>(states: impl IntoIterator<Item = &'a ExtractorState>) -> Self {
        let (mut total, mut failed) = (0usize, 0usize);
        for state in states {
            total += 1;
            if *state == ExtractorState::Failed {
                failed += 1;
            }
        }
        match failed {
            0 => Health::Healthy,
            f if f == total => Health::Failed,
            _ => Health::Degraded,
        }
    }
}

/// Shared, validated state table for all extractor keys.
///
/// Every accepted transition is published as an `ExtractorStateChanged`
/// event; illegal ones are logged and ignored.
pub struct StateBoard {
    states: Mutex<IndexMap<String, ExtractorState>>,
    events: Arc<dyn PipelineEventSink>,
    version: watch::Sender<u64>,
}

impl StateBoard {
    pub fn new(events: Arc<dyn PipelineEventSink>) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            states: Mutex::new(IndexMap::new()),
            events,
            version,
        }
    }

    /// Adds a key in `Idle`. Re-registering is a no-op.
    pub fn register(&self, key: impl Into<String>) {
        self.lock().entry(key.into()).or_insert(ExtractorState::Idle);
    }

    pub fn get(&self, key: &str) -> Option<ExtractorState> {
        self.lock().get(key).copied()
    }

    pub fn snapshot(&self) -> IndexMap<String, ExtractorState> {
        self.lock().clone()
    }

    pub fn health(&self) -> Health {
        Health::from_states(self.lock().values())
    }

    pub fn all_terminal(&self) -> bool {
        self.lock().values().all(|s| s.is_terminal())
    }

    /// Keys not yet in a terminal state.
    pub fn live_keys(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|(_, s)| !s.is_terminal())
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Applies `key -> to`. Returns false when the key is unknown or the step
    /// is illegal.
    pub fn transition(&self, key: &str, to: ExtractorState, reason: Option<String>) -> bool {
        let from = {
            let mut states = self.lock();
            let Some(current) = states.get_mut(key) else {
                warn!("State change for unknown extractor {} ignored", key);
                return false;
            };
            let from = *current;
            if !from.can_transition_to(to) {
                warn!(
                    "Illegal state change for extractor {}: {:?} -> {:?}",
                    key, from, to
                );
                return false;
            }
            *current = to;
            from
        };

        self.events
            .emit(PipelineEvent::state_changed(key, from, to, reason));
        self.version.send_modify(|v| *v += 1);
        true
    }

    /// Resolves every live key once draining is over: `Stopped` on a clean
    /// drain, `Failed` when the drain was forced.
    pub fn settle(&self, forced: bool) {
        for key in self.live_keys() {
            if self.get(&key) != Some(ExtractorState::Draining) {
                self.transition(&key, ExtractorState::Draining, Some("shutdown".into()));
            }
            if forced {
                self.transition(
                    &key,
                    ExtractorState::Failed,
                    Some("drain deadline exceeded".into()),
                );
            } else {
                self.transition(&key, ExtractorState::Stopped, None);
            }
        }
    }

    /// Resolves once every key is terminal.
    pub async fn wait_all_terminal(&self) {
        let mut changes = self.version.subscribe();
        loop {
            if self.all_terminal() {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<String, ExtractorState>> {
        self.states.lock().unwrap_or_else(|poisoned| {
            warn!("Extractor state table was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
