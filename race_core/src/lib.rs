//! Synchronized last-byte barrier engine for HTTP[S] race-condition
//! auditing: withholds the final bytes of a batch of requests until every
//! worker has reached the same point, then releases them together so a
//! server sees the requests' last bytes arrive (as close as userspace can
//! make them) simultaneously.
//!
//! The crate is organized bottom-up:
//! - [`barrier`]: the raise/lower [`barrier::Latch`] primitive used for
//!   both per-worker sync signals and the cohort-wide send/read gates.
//! - [`error`]: [`error::RaceError`], the one error type used throughout.
//! - [`multimap`]: [`multimap::OrderedMultimap`], an insertion-ordered,
//!   duplicate-key-tolerant map for headers/query/cookies.
//! - [`work`]: the request/response data model and work queue items.
//! - [`cookie`]: per-worker cookie jar.
//! - [`resolver`]: cached, connect-mode-aware name resolution.
//! - [`template`]: `<<< EXPR >>>` marker substitution.
//! - [`http`]: HTTP/1.1 request serialization and response parsing.
//! - [`socket`]: TCP/TLS connection setup and write-readiness polling.
//! - [`context`]: [`context::WorkerContext`], threaded through the lower
//!   layers instead of process-wide globals.
//! - [`connection`]: the barrier-aware [`connection::Connection`].
//! - [`adapter`]: per-worker connection pooling.
//! - [`session`]: per-worker cookie/header/body preparation.
//! - [`worker`]: one worker's run loop and its [`worker::WorkerHandle`].
//! - [`driver`]: [`driver::Driver`], the wave-driving barrier loop.

pub mod adapter;
pub mod barrier;
pub mod connection;
pub mod context;
pub mod cookie;
pub mod driver;
pub mod error;
pub mod http;
pub mod multimap;
pub mod resolver;
pub mod session;
pub mod socket;
pub mod template;
pub mod work;
pub mod worker;

pub use context::{SharedMap, WorkerContext};
pub use driver::{Driver, ProcessOptions, SendOptions};
pub use error::RaceError;
pub use multimap::OrderedMultimap;
pub use resolver::{ConnectMode, NameResolver, SystemResolver};
pub use template::{TargetFields, TemplateFn, TemplateOptions};
pub use work::{Body, Callback, PreparedRequest, RequestSpec, Response, WorkItem, WorkerState};
pub use worker::{WorkerHandle, WorkerOptions};
