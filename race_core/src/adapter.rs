//! Per-worker connection pool, keyed by scheme+host+port (spec §2
//! "Session/Adapter glue").
//!
//! `pyrace.adapter.HTTPAdapter`/`connectionpool.py` keep HTTP and HTTPS as
//! distinct `urllib3` pool classes sharing one `BaseConnection`; this port
//! collapses that into a single [`Adapter`] whose [`crate::connection::
//! Connection`] is parameterized over the scheme string instead (spec_full
//! §10's noted simplification — Rust generics/enums make the class split
//! unnecessary).

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::connection::Connection;
use crate::context::WorkerContext;
use crate::error::RaceError;

type PoolKey = (String, String, u16);

/// Reuses one [`Connection`] per (scheme, host, port) for as long as it
/// keeps working, matching keep-alive connection-pool behavior.
pub struct Adapter {
    ctx: WorkerContext,
    pool: HashMap<PoolKey, Connection>,
}

impl Adapter {
    /// Creates an empty pool bound to one worker's context.
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            ctx,
            pool: HashMap::new(),
        }
    }

    /// Returns the pooled connection for `scheme://host:port`, opening a
    /// fresh one if none exists yet.
    pub fn connection_for(
        &mut self,
        scheme: &str,
        host: &str,
        port: u16,
    ) -> Result<&mut Connection, RaceError> {
        let key: PoolKey = (scheme.to_ascii_lowercase(), host.to_string(), port);
        match self.pool.entry(key) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let conn = Connection::open(scheme, host, port, &self.ctx)?;
                Ok(entry.insert(conn))
            }
        }
    }

    /// Evicts the pooled connection for `scheme://host:port`, forcing the
    /// next `connection_for` call to open a fresh one. Called after a
    /// transport error, since the underlying socket may be unusable.
    pub fn evict(&mut self, scheme: &str, host: &str, port: u16) {
        let key: PoolKey = (scheme.to_ascii_lowercase(), host.to_string(), port);
        self.pool.remove(&key);
    }
}
