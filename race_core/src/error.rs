//! Error kinds for the race engine, per spec §7 ("Error Handling Design").

use std::io;

/// Errors that a [`crate::worker::Worker`] or [`crate::driver::Driver`] can
/// surface while carrying out a race.
#[derive(Debug, thiserror::Error)]
pub enum RaceError {
    /// A work queue contained an element that was neither a `Request` nor a
    /// `Callback`. Raised eagerly at `Driver::process` entry and again after
    /// any callback mutates the queue; fatal to the worker that hit it.
    #[error("invalid work item at index {index}: {reason}")]
    InvalidWorkItem {
        /// Position within the work queue.
        index: usize,
        /// Human-readable description of why the item was rejected.
        reason: String,
    },

    /// Every resolved address for a host failed to connect.
    #[error("failed to connect to {host}:{port}: {source}")]
    ConnectFailure {
        /// The hostname that was being connected to.
        host: String,
        /// The port that was being connected to.
        port: u16,
        /// The last I/O error encountered while trying the resolved addresses.
        #[source]
        source: io::Error,
    },

    /// An error during request serialization, transmission, or response
    /// parsing. Stored as the worker's `response` entry and re-raised.
    #[error("transport error: {0}")]
    Transport(String),

    /// The Driver's wait for a worker's sync signal elapsed. Non-fatal at
    /// the Driver: the tardy worker is dropped from future waves.
    #[error("barrier wait timed out for {pending} pending worker(s)")]
    BarrierTimeout {
        /// How many workers had not yet signaled when the wait elapsed.
        pending: usize,
    },

    /// An expression inside a `<<< EXPR >>>` template marker failed to
    /// evaluate. Recorded in history and terminates the worker, same as a
    /// transport error.
    #[error("template evaluation failed for `{expr}`: {reason}")]
    TemplateEvaluation {
        /// The raw expression text that failed.
        expr: String,
        /// Why evaluation failed.
        reason: String,
    },
}

impl From<io::Error> for RaceError {
    fn from(err: io::Error) -> Self {
        RaceError::Transport(err.to_string())
    }
}
