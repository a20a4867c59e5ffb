//! Race — an HTTP[S] race-condition auditing engine.
//!
//! This is the crate users should depend on. It re-exports `race_core`'s
//! public surface and wraps `Driver::process` behind a small `Race` facade
//! so a caller can reach for a bare worker count instead of building a
//! full [`ProcessOptions`] by hand.
//!
//! # Quick start
//!
//! ```ignore
//! use race::{Race, RequestSpec, WorkItem};
//!
//! let queue = vec![WorkItem::Request(RequestSpec::get("https://example.test/now"))];
//! let workers = Race::new().process(queue, 3);
//!
//! for worker in &workers {
//!     if let Some(response) = worker.response() {
//!         if let Ok(response) = response.as_ref() {
//!             println!("{}", response.status_code);
//!         }
//!     }
//! }
//! ```

pub use race_core::{
    Body, Callback, ConnectMode, NameResolver, OrderedMultimap, PreparedRequest, ProcessOptions,
    RaceError, RequestSpec, Response, SendOptions, SharedMap, SystemResolver, TargetFields,
    TemplateFn, TemplateOptions, WorkItem, WorkerContext, WorkerHandle, WorkerOptions, WorkerState,
};

use race_core::Driver as CoreDriver;

/// Thin wrapper over [`race_core::Driver`]: spawns and drives a cohort of
/// workers over a shared work queue, accepting anything that converts into
/// a [`ProcessOptions`] (a bare worker count, or a fully built options
/// struct).
#[derive(Default)]
pub struct Race {
    driver: CoreDriver,
}

impl Race {
    /// Creates a new, stateless race driver.
    pub fn new() -> Self {
        Self {
            driver: CoreDriver::new(),
        }
    }

    /// Spawns `options.worker_count` workers, each racing its own copy of
    /// `work_queue`, and drives them through the synchronized barrier
    /// until every worker's queue is drained or dead.
    pub fn process(
        &self,
        work_queue: Vec<WorkItem>,
        options: impl Into<ProcessOptions>,
    ) -> Vec<WorkerHandle> {
        self.driver.process(work_queue, options.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_worker_count_converts_into_process_options() {
        let options: ProcessOptions = 5.into();
        assert_eq!(options.worker_count, 5);
    }
}
