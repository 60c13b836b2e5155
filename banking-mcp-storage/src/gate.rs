//! Durable store availability gate
//!
//! The gate is a two-state machine, `Available <-> Degraded`. Any store
//! failure degrades it; while degraded, store calls are skipped except for a
//! single half-open probe every `retry_after`. Any successful store call makes
//! it available again. Callers go through [`GatedStore`], which never returns
//! a storage error: failures show up only as degraded behaviour and log lines.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::repositories::{Record, Store};
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Available,
    Degraded { since: Instant, last_probe: Instant },
}

/// Externally visible gate status
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Available,
    Degraded,
}

/// Shared availability flag for one durable store backend
#[derive(Debug)]
pub struct StoreGate {
    state: Mutex<GateState>,
    retry_after: Duration,
}

impl StoreGate {
    pub fn new(retry_after: Duration) -> Self {
        Self {
            state: Mutex::new(GateState::Available),
            retry_after,
        }
    }

    /// A gate that starts degraded, for a backend unreachable at startup
    pub fn degraded(retry_after: Duration) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(GateState::Degraded {
                since: now,
                last_probe: now,
            }),
            retry_after,
        }
    }

    pub fn status(&self) -> GateStatus {
        match *self.state.lock() {
            GateState::Available => GateStatus::Available,
            GateState::Degraded { .. } => GateStatus::Degraded,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status() == GateStatus::Available
    }

    /// Whether the next store call should be attempted.
    ///
    /// While degraded, this grants one probe per `retry_after` window.
    pub fn permits(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            GateState::Available => true,
            GateState::Degraded { since, last_probe } => {
                if last_probe.elapsed() >= self.retry_after {
                    *state = GateState::Degraded {
                        since,
                        last_probe: Instant::now(),
                    };
                    debug!("Probing degraded store");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn succeeded(&self, operation: &str) {
        let mut state = self.state.lock();
        if let GateState::Degraded { since, .. } = *state {
            *state = GateState::Available;
            info!(
                operation,
                degraded_for_ms = since.elapsed().as_millis() as u64,
                "Durable store recovered"
            );
        }
    }

    pub fn failed(&self, operation: &str, error: &Error) {
        let mut state = self.state.lock();
        match *state {
            GateState::Available => {
                let now = Instant::now();
                *state = GateState::Degraded {
                    since: now,
                    last_probe: now,
                };
                warn!(
                    operation,
                    error = %error,
                    category = error.category(),
                    "Durable store unavailable, continuing in memory-only mode"
                );
            }
            GateState::Degraded { .. } => {
                debug!(operation, error = %error, "Durable store still unavailable");
            }
        }
    }
}

/// A store guarded by a shared [`StoreGate`]
pub struct GatedStore<T: Record> {
    store: Arc<dyn Store<T>>,
    gate: Arc<StoreGate>,
}

impl<T: Record> Clone for GatedStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            gate: self.gate.clone(),
        }
    }
}

impl<T: Record> GatedStore<T> {
    pub fn new(store: Arc<dyn Store<T>>, gate: Arc<StoreGate>) -> Self {
        Self { store, gate }
    }

    pub fn gate(&self) -> &Arc<StoreGate> {
        &self.gate
    }

    fn observe<R>(&self, operation: &str, outcome: crate::Result<R>) -> Option<R> {
        match outcome {
            Ok(value) => {
                self.gate.succeeded(operation);
                Some(value)
            }
            Err(err) => {
                self.gate.failed(operation, &err);
                None
            }
        }
    }

    /// Persist `record`; returns whether it reached the store
    pub async fn save(&self, record: &T) -> bool {
        if !self.gate.permits() {
            debug!(table = T::TABLE, id = record.record_id(), "Store degraded, kept in memory only");
            return false;
        }
        let outcome = self.store.save(record).await;
        self.observe("save", outcome).is_some()
    }

    /// Look up `id`; a skipped or failed lookup reads as absent
    pub async fn find(&self, id: &str) -> Option<T> {
        if !self.gate.permits() {
            return None;
        }
        let outcome = self.store.find(id).await;
        self.observe("find", outcome).flatten()
    }

    pub async fn ids(&self) -> Option<Vec<String>> {
        if !self.gate.permits() {
            return None;
        }
        let outcome = self.store.ids().await;
        self.observe("ids", outcome)
    }
}
