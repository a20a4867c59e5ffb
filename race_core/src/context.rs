//! Per-worker context plumbed into the resolver, adapter, and connection
//! layers (spec.md Design Note §9: "thread through an explicit context
//! value instead of hidden globals").

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::barrier::Latch;
use crate::resolver::{ConnectMode, NameResolver};

/// The extension map exposed to callbacks and template functions, shared
/// across every worker (spec §3, `WorkerState.shared`).
pub type SharedMap = Arc<Mutex<HashMap<String, serde_json::Value>>>;

/// Everything a [`crate::connection::Connection`] or
/// [`crate::adapter::Adapter`] needs to participate in one worker's barrier
/// protocol, without reaching for process-wide globals.
#[derive(Clone)]
pub struct WorkerContext {
    /// This worker's position among its cohort; feeds `connect_mode`
    /// reshaping and `self.worker_index` template substitutions.
    pub worker_index: usize,
    /// Extension map shared by every worker in the cohort.
    pub shared: SharedMap,
    /// Raised by this worker at each of the two barrier points, lowered by
    /// the Driver after observing it.
    pub sync_signal: Arc<Latch>,
    /// Raised by the Driver to release every connection's final write.
    pub send_gate: Arc<Latch>,
    /// Raised by the Driver to release every connection's response read.
    pub read_gate: Arc<Latch>,
    /// How the resolver should reorder addresses for this worker.
    pub connect_mode: ConnectMode,
    /// Name resolver shared by the whole cohort (process-wide cache).
    pub resolver: Arc<dyn NameResolver>,
}

impl WorkerContext {
    /// Builds a fresh context for worker `worker_index`, sharing the given
    /// cohort-wide primitives but owning its own sync signal.
    pub fn new(
        worker_index: usize,
        shared: SharedMap,
        send_gate: Arc<Latch>,
        read_gate: Arc<Latch>,
        connect_mode: ConnectMode,
        resolver: Arc<dyn NameResolver>,
    ) -> Self {
        Self {
            worker_index,
            shared,
            sync_signal: Arc::new(Latch::new()),
            send_gate,
            read_gate,
            connect_mode,
            resolver,
        }
    }
}
