//! Shared synchronization primitives (spec §3 "Barrier primitives", §5).
//!
//! A [`Latch`] is a one-shot `Mutex<bool>` + `Condvar` pair. The same type
//! backs both roles spec §3 describes:
//! - a per-worker *sync signal*, raised by the worker, lowered by the Driver
//!   after observing it;
//! - a process-wide *send gate* / *read gate*, raised and lowered only by
//!   the Driver.
//!
//! This is the condvar-latch pattern the teacher crate uses for
//! `FlushSignal` (`hawk_core::transport::worker::FlushSignal`), generalized
//! from a single flush-completion signal to a reusable raise/lower latch.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// A one-shot boolean latch with blocking and timed waits.
pub struct Latch {
    raised: Mutex<bool>,
    condvar: Condvar,
}

impl Latch {
    /// Creates a new, lowered latch.
    pub fn new() -> Self {
        Self {
            raised: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Raises the latch and wakes every waiter.
    pub fn raise(&self) {
        let mut raised = self.raised.lock().unwrap();
        *raised = true;
        self.condvar.notify_all();
    }

    /// Lowers the latch. Does not wake anyone — lowering is only ever done
    /// by whichever side is responsible for starting the next round.
    pub fn lower(&self) {
        let mut raised = self.raised.lock().unwrap();
        *raised = false;
    }

    /// True if the latch is currently raised.
    pub fn is_raised(&self) -> bool {
        *self.raised.lock().unwrap()
    }

    /// Blocks until the latch is raised, with no timeout.
    pub fn wait(&self) {
        let guard = self.raised.lock().unwrap();
        let _unused = self
            .condvar
            .wait_while(guard, |raised| !*raised)
            .unwrap();
    }

    /// Blocks until the latch is raised or `timeout` elapses.
    ///
    /// Returns `true` if the latch was observed raised before the timeout,
    /// `false` otherwise. A `None` timeout waits indefinitely (spec §4.5's
    /// "non-positive or null timeout disables timing out entirely").
    pub fn wait_timeout(&self, timeout: Option<Duration>) -> bool {
        let Some(timeout) = timeout else {
            self.wait();
            return true;
        };

        let guard = self.raised.lock().unwrap();
        let deadline = Instant::now() + timeout;
        let mut guard = guard;
        loop {
            if *guard {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (next_guard, result) = self
                .condvar
                .wait_timeout(guard, deadline - now)
                .unwrap();
            guard = next_guard;
            if *guard {
                return true;
            }
            if result.timed_out() {
                return false;
            }
        }
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}
