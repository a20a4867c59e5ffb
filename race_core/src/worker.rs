//! One worker: owns a session, a connection pool, and a private work
//! queue; runs items to completion (spec §3 `WorkerState`, §4.4 "Worker").
//!
//! Grounded on `pyrace.thread.Thread.run`
//! (`examples/original_source/pyrace/thread.py`): per item, evaluate
//! templates if enabled, extract sent cookies (`Cookie:` header wins over
//! a cookie map), prepare against the session, send (or fake-send), append
//! the outcome to history, and stop cleanly on queue-empty or a transport
//! error.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use url::Url;

use crate::adapter::Adapter;
use crate::context::{SharedMap, WorkerContext};
use crate::error::RaceError;
use crate::session::Session;
use crate::template::{self, TemplateOptions};
use crate::work::{Response, WorkItem, WorkerState};

/// Per-worker behavior flags, derived from a [`crate::driver::
/// ProcessOptions`] (spec §6).
#[derive(Clone)]
pub struct WorkerOptions {
    /// Evaluate `<<< EXPR >>>` markers before preparing each request.
    pub do_eval: bool,
    /// Prepare but never transmit requests; append a response shell
    /// instead.
    pub fake_send: bool,
    /// Extract cookies sent on each request into the session's jar.
    pub save_sent_cookies: bool,
    /// Template evaluator configuration, used only when `do_eval` is set.
    pub template_options: TemplateOptions,
    /// How long to wait for the socket to become writable before the
    /// pre-send barrier point.
    pub writable_timeout: Option<Duration>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            do_eval: false,
            fake_send: false,
            save_sent_cookies: true,
            template_options: TemplateOptions::default(),
            writable_timeout: Some(Duration::from_secs(10)),
        }
    }
}

/// A handle the Driver and caller use to observe and join a running worker.
/// The worker thread itself owns the session/adapter exclusively; this
/// handle only ever touches the [`Mutex<WorkerState>`] shared with it.
pub struct WorkerHandle {
    pub worker_index: usize,
    state: Arc<Mutex<WorkerState>>,
    sync_signal: Arc<crate::barrier::Latch>,
    join_handle: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawns a worker thread over `queue`, returning immediately.
    pub fn spawn(
        worker_index: usize,
        queue: VecDeque<WorkItem>,
        shared: SharedMap,
        ctx: WorkerContext,
        options: WorkerOptions,
    ) -> Self {
        let state = Arc::new(Mutex::new(WorkerState::new(worker_index, queue, shared)));
        let sync_signal = ctx.sync_signal.clone();

        let thread_state = state.clone();
        let join_handle = thread::Builder::new()
            .name(format!("race-worker-{worker_index}"))
            .spawn(move || run(thread_state, ctx, options))
            .expect("failed to spawn worker thread");

        Self {
            worker_index,
            state,
            sync_signal,
            join_handle: Some(join_handle),
        }
    }

    /// True once this worker's sync signal has been raised for the current
    /// barrier point.
    pub fn is_synced(&self) -> bool {
        self.sync_signal.is_raised()
    }

    /// Blocks until this worker's sync signal is raised or `timeout`
    /// elapses; `None` waits indefinitely. Returns whether it was raised.
    pub fn wait_sync(&self, timeout: Option<Duration>) -> bool {
        self.sync_signal.wait_timeout(timeout)
    }

    /// Lowers this worker's sync signal, called by the Driver after every
    /// worker in a wave has been observed.
    pub fn lower_sync(&self) {
        self.sync_signal.lower();
    }

    /// True once the worker's thread has exited.
    pub fn is_finished(&self) -> bool {
        self.join_handle
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
    }

    /// Blocks until the worker thread exits.
    pub fn join(&mut self) {
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.join();
        }
    }

    /// The most recently completed response or error.
    pub fn response(&self) -> Option<Arc<Result<Response, RaceError>>> {
        self.state.lock().unwrap().response().cloned()
    }

    /// Every response or error produced so far, in order.
    pub fn all_responses(&self) -> Vec<Arc<Result<Response, RaceError>>> {
        self.state.lock().unwrap().all_responses.clone()
    }

    /// The number of items still pending in this worker's queue.
    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }
}

fn run(state: Arc<Mutex<WorkerState>>, ctx: WorkerContext, options: WorkerOptions) {
    let mut session = Session::new();
    let mut adapter = Adapter::new(ctx.clone());

    loop {
        let item = {
            let mut guard = state.lock().unwrap();
            guard.queue.pop_front()
        };

        let Some(item) = item else {
            log::debug!("worker {} queue drained", ctx.worker_index);
            break;
        };

        match item {
            WorkItem::Callback(callback) => {
                let mut state_guard = state.lock().unwrap();
                let mut callback_guard = callback.lock().unwrap();
                (callback_guard)(&mut state_guard);
            }
            WorkItem::Request(spec) => {
                let spec = if options.do_eval {
                    match template::evaluate(&spec, &options.template_options, &ctx) {
                        Ok(evaluated) => evaluated,
                        Err(error) => {
                            log::warn!("worker {} template evaluation failed: {error}", ctx.worker_index);
                            state.lock().unwrap().push_response(Err(error));
                            break;
                        }
                    }
                } else {
                    spec
                };

                let host = Url::parse(&spec.url)
                    .ok()
                    .and_then(|u| u.host_str().map(str::to_string))
                    .unwrap_or_default();

                if options.save_sent_cookies {
                    session.jar.extract_sent(&host, &spec.headers, &spec.cookies);
                }

                if options.fake_send {
                    let outcome = session.prepare(&spec).map(|prepared| Response {
                        status_code: 0,
                        reason: String::new(),
                        headers: crate::multimap::OrderedMultimap::new(),
                        body: Vec::new(),
                        request: prepared,
                    });
                    match outcome {
                        Ok(response) => state.lock().unwrap().push_response(Ok(response)),
                        Err(error) => {
                            log::warn!("worker {} failed to prepare fake-sent request: {error}", ctx.worker_index);
                            state.lock().unwrap().push_response(Err(error));
                            break;
                        }
                    }
                    continue;
                }

                let outcome = send_one(&mut session, &mut adapter, &spec, &options);
                match outcome {
                    Ok(response) => {
                        if let Ok(json) = response.json() {
                            ctx.shared
                                .lock()
                                .unwrap()
                                .insert("__last_response_json".to_string(), json);
                        }
                        state.lock().unwrap().push_response(Ok(response));
                    }
                    Err(error) => {
                        log::warn!("worker {} request failed: {error}", ctx.worker_index);
                        state.lock().unwrap().push_response(Err(error));
                        break;
                    }
                }
            }
        }
    }
}

fn send_one(
    session: &mut Session,
    adapter: &mut Adapter,
    spec: &crate::work::RequestSpec,
    options: &WorkerOptions,
) -> Result<Response, RaceError> {
    let prepared = session.prepare(spec)?;

    let conn = adapter.connection_for(&prepared.scheme, &prepared.host, prepared.port)?;
    let result = conn.exchange(&prepared, options.writable_timeout);

    let response = match result {
        Ok(response) => response,
        Err(error) => {
            adapter.evict(&prepared.scheme, &prepared.host, prepared.port);
            return Err(error);
        }
    };

    session.jar.absorb_set_cookie_headers(&prepared.host, &response.headers);

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::Latch;
    use crate::resolver::{ConnectMode, SystemResolver};
    use crate::work::RequestSpec;
    use std::collections::HashMap;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Mutex as StdMutex;

    fn echo_server() -> (u16, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let body = b"ok";
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
                let _ = stream.write_all(body);
            }
        });
        (port, handle)
    }

    fn test_ctx() -> WorkerContext {
        WorkerContext::new(
            0,
            Arc::new(StdMutex::new(HashMap::new())),
            Arc::new(Latch::new()),
            Arc::new(Latch::new()),
            ConnectMode::Same,
            Arc::new(SystemResolver::new()),
        )
    }

    #[test]
    fn worker_runs_one_request_through_the_full_barrier() {
        let (port, server) = echo_server();
        let ctx = test_ctx();

        let mut queue = VecDeque::new();
        queue.push_back(WorkItem::Request(RequestSpec::get(format!(
            "http://127.0.0.1:{port}/"
        ))));

        let shared = ctx.shared.clone();
        let sync_signal = ctx.sync_signal.clone();
        let send_gate = ctx.send_gate.clone();
        let read_gate = ctx.read_gate.clone();

        let mut handle = WorkerHandle::spawn(0, queue, shared, ctx, WorkerOptions::default());

        assert!(sync_signal.wait_timeout(Some(Duration::from_secs(2))));
        sync_signal.lower();
        send_gate.raise();

        assert!(sync_signal.wait_timeout(Some(Duration::from_secs(2))));
        sync_signal.lower();
        read_gate.raise();

        handle.join();
        server.join().unwrap();

        let response = handle.response().expect("one response recorded");
        let response = response.as_ref().expect("request succeeded");
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, b"ok");
    }

    #[test]
    fn fake_send_never_touches_the_sync_signal() {
        let ctx = test_ctx();
        let mut queue = VecDeque::new();
        queue.push_back(WorkItem::Request(RequestSpec::get(
            "http://127.0.0.1:9/".to_string(),
        )));

        let shared = ctx.shared.clone();
        let sync_signal = ctx.sync_signal.clone();
        let mut options = WorkerOptions::default();
        options.fake_send = true;

        let mut handle = WorkerHandle::spawn(0, queue, shared, ctx, options);
        handle.join();

        assert!(!sync_signal.is_raised());
        let response = handle.response().expect("one response recorded");
        let response = response.as_ref().expect("fake-send always succeeds");
        assert_eq!(response.status_code, 0);
    }
}
