//! Work queue items and the request/response data model (spec §3).

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::RaceError;
use crate::multimap::OrderedMultimap;

/// A request body, materialized just before serialization.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Raw bytes, sent as-is with whatever `Content-Type` the caller set.
    Bytes(Vec<u8>),
    /// `application/x-www-form-urlencoded`-encoded at prepare time.
    Form(OrderedMultimap<String, String>),
    /// `application/json`-encoded at prepare time.
    Json(serde_json::Value),
}

/// One HTTP request as specified by the caller, before template evaluation,
/// cookie extraction, or session merging.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    /// HTTP method, e.g. `"GET"`.
    pub method: String,
    /// Absolute URL (scheme, host, port, path all present).
    pub url: String,
    /// Headers to send in addition to session defaults. Duplicate keys
    /// (repeated headers) are preserved.
    pub headers: OrderedMultimap<String, String>,
    /// Query parameters appended to the URL at prepare time.
    pub query: OrderedMultimap<String, String>,
    /// Cookies sent for this request only, merged with/overridden by a
    /// `Cookie:` header per spec §4.4.
    pub cookies: OrderedMultimap<String, String>,
    /// Optional request body.
    pub body: Option<Body>,
}

impl RequestSpec {
    /// A bare `GET` request to `url` with no headers, query, cookies, or
    /// body.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: OrderedMultimap::new(),
            query: OrderedMultimap::new(),
            cookies: OrderedMultimap::new(),
            body: None,
        }
    }
}

/// A fully-materialized request, ready for wire serialization
/// (`crate::http::serialize_request`). Produced by
/// `crate::session::Session::prepare`.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Path plus query string, e.g. `/a/b?x=1`.
    pub target: String,
    pub headers: OrderedMultimap<String, String>,
    pub body: Vec<u8>,
}

/// One completed HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status_code: u16,
    pub reason: String,
    pub headers: OrderedMultimap<String, String>,
    pub body: Vec<u8>,
    /// The prepared form of the request that produced this response:
    /// session defaults merged, jar-rendered `Cookie` header, body
    /// materialized. Populated the same way for fake-sent and real-sent
    /// requests alike.
    pub request: PreparedRequest,
}

impl Response {
    /// Parses the body as JSON, for use by `json.get(...)` template calls
    /// and caller convenience.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// A mutating callback given direct access to a worker's queue and history.
/// Runs synchronously within one worker, strictly between requests, and
/// never participates in the barrier protocol (spec §3, §4.4).
///
/// Shared behind `Arc<Mutex<_>>` rather than owned outright: `Driver::
/// process` deep-copies the work queue once per worker (spec §3), and a
/// boxed `FnMut` cannot itself be cloned. `copy.deepcopy` on the Python
/// original doesn't actually copy a function object either — deepcopy
/// treats callables as atomic and every thread's queue ends up holding the
/// *same* underlying callable. `Arc<Mutex<_>>` is the direct Rust analogue:
/// cloning a `WorkItem::Callback` clones the handle, not the closure, so
/// every worker that reaches it runs the same shared closure instance.
pub type Callback = Arc<Mutex<dyn FnMut(&mut WorkerState) + Send>>;

/// One element of a worker's work queue: a request to race, or a callback
/// to run locally.
#[derive(Clone)]
pub enum WorkItem {
    /// Send this request through the barrier protocol.
    Request(RequestSpec),
    /// Run this closure against the worker's own state; no network I/O.
    Callback(Callback),
}

impl WorkItem {
    /// Wraps a closure as a callback work item.
    pub fn callback(f: impl FnMut(&mut WorkerState) + Send + 'static) -> Self {
        WorkItem::Callback(Arc::new(Mutex::new(f)))
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::Request(spec) => f.debug_tuple("Request").field(spec).finish(),
            WorkItem::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// The state owned exclusively by one running worker: its pending queue,
/// completed response history, worker index, and the cohort-wide shared
/// extension map (spec §3 `WorkerState`).
pub struct WorkerState {
    pub worker_index: usize,
    pub queue: VecDeque<WorkItem>,
    /// Wrapped in `Arc` (rather than requiring `Response`/`RaceError` to be
    /// `Clone`) so `WorkerHandle` accessors can hand callers a cheap copy
    /// without cloning an `io::Error`-carrying variant.
    pub all_responses: Vec<Arc<Result<Response, RaceError>>>,
    pub shared: crate::context::SharedMap,
}

impl WorkerState {
    /// Creates a fresh state with an empty response history.
    pub fn new(
        worker_index: usize,
        queue: VecDeque<WorkItem>,
        shared: crate::context::SharedMap,
    ) -> Self {
        Self {
            worker_index,
            queue,
            all_responses: Vec::new(),
            shared,
        }
    }

    /// The most recently completed response or error, if any.
    pub fn response(&self) -> Option<&Arc<Result<Response, RaceError>>> {
        self.all_responses.last()
    }

    /// Appends a completed outcome to the history.
    pub fn push_response(&mut self, outcome: Result<Response, RaceError>) {
        self.all_responses.push(Arc::new(outcome));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_formats_callback_without_panicking() {
        let item = WorkItem::callback(|_state: &mut WorkerState| {});
        assert_eq!(format!("{item:?}"), "Callback(..)");
    }

    #[test]
    fn worker_state_response_is_the_last_history_entry() {
        let shared = Arc::new(Mutex::new(std::collections::HashMap::new()));
        let mut state = WorkerState::new(0, VecDeque::new(), shared);
        assert!(state.response().is_none());

        state.push_response(Err(RaceError::Transport("boom".into())));
        assert!(state.response().unwrap().is_err());
    }

    #[test]
    fn cloning_a_callback_item_shares_the_same_closure() {
        let item = WorkItem::callback(|_: &mut WorkerState| {});
        let cloned = item.clone();
        let (WorkItem::Callback(a), WorkItem::Callback(b)) = (item, cloned) else {
            panic!("expected callback items");
        };
        assert!(Arc::ptr_eq(&a, &b));
    }
}
