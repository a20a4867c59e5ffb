//! The wave-driving barrier loop (spec §3 `Driver`, §4.5), grounded on
//! `pyrace.driver.Driver` (`examples/original_source/pyrace/driver.py`).
//!
//! `drive_threads` there runs one wave per request round: clear both gates,
//! wait for every worker to reach pre-send, open the send gate, wait for
//! every worker to reach post-send, open the read gate, wait for every
//! worker to reach post-read, then carry the survivors into the next wave.
//! Three `_wait_for_sync` calls per wave, not two — the middle one observes
//! workers between flushing their withheld bytes and blocking on the read
//! gate. This port keeps that exact three-wait shape and the dynamic
//! per-iteration timeout split (`remaining / pending_count`), correcting
//! only the original's `pending_count / remaining_time` expression, which
//! divides the wrong way round and produces a rate, not a duration, for
//! what it uses as a `Condvar` wait time.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::barrier::Latch;
use crate::context::WorkerContext;
use crate::resolver::{ConnectMode, NameResolver, SystemResolver};
use crate::template::TemplateOptions;
use crate::work::WorkItem;
use crate::worker::{WorkerHandle, WorkerOptions};

/// Extension point mirroring the `**kwargs` that `pyrace.driver.Driver.
/// process` forwards to each connection's `send`. Nothing in this port
/// reads these yet; they exist so a caller's options survive a future
/// extension (allow_redirects, per-send timeouts, and the like) without
/// another signature change.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub extra: HashMap<String, serde_json::Value>,
}

/// Everything [`Driver::process`] needs beyond the work queue itself
/// (spec §4.5 / §6).
#[derive(Clone)]
pub struct ProcessOptions {
    /// Number of workers to race the queue across.
    pub worker_count: usize,
    /// Per-wave barrier wait budget. `None` (or a zero duration) waits
    /// indefinitely for every worker to reach the next barrier point.
    pub timeout: Option<Duration>,
    /// How long to pause between the pre-send and post-send barrier
    /// points, giving every worker's withheld bytes a chance to actually
    /// sit on the wire before the send gate opens.
    pub send_delay: Duration,
    /// How long a connection's socket may take to become writable before
    /// the pre-send barrier point.
    pub connect_timeout: Option<Duration>,
    /// How addresses are reshaped per worker for each connection.
    pub connect_mode: ConnectMode,
    /// Evaluate `<<< EXPR >>>` markers before sending each request.
    pub do_eval: bool,
    /// Prepare requests but never transmit them.
    pub fake_send: bool,
    /// Record cookies sent on each request into the session's jar.
    pub save_sent_cookies: bool,
    /// Template evaluator configuration, used only when `do_eval` is set.
    pub template_options: TemplateOptions,
    /// Extra per-send options, forwarded but currently unused.
    pub send_options: SendOptions,
    /// Resolver to use instead of the process-wide [`SystemResolver`],
    /// for tests that want to inject a fake and count lookups.
    pub resolver_override: Option<Arc<dyn NameResolver>>,
}

/// Lets callers write `driver.process(queue, 4)` for "just run with 4
/// workers and every other default", the same ergonomic the teacher
/// facade's `impl From<&str> for Options` gives `hawk::init`.
impl From<usize> for ProcessOptions {
    fn from(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Default::default()
        }
    }
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            worker_count: 2,
            timeout: Some(Duration::from_secs(10)),
            send_delay: Duration::from_millis(100),
            connect_timeout: Some(Duration::from_secs(10)),
            connect_mode: ConnectMode::Same,
            do_eval: false,
            fake_send: false,
            save_sent_cookies: true,
            template_options: TemplateOptions::default(),
            send_options: SendOptions::default(),
            resolver_override: None,
        }
    }
}

/// Spawns and drives a cohort of workers through the synchronized barrier
/// protocol over a shared work queue.
pub struct Driver;

impl Driver {
    /// Creates a driver. Stateless: all per-run state lives in
    /// [`Driver::process`]'s return value.
    pub fn new() -> Self {
        Self
    }

    /// Spawns `options.worker_count` workers, each given its own clone of
    /// `work_queue` (the direct analogue of `copy.deepcopy(work_queue)` per
    /// thread in the original — cheap here since [`WorkItem`] clones an
    /// owned request or an `Arc` handle, never deep-copying a callback),
    /// drives them wave by wave until every worker's queue is drained or
    /// dead, joins every worker thread, and returns the handles so callers
    /// can inspect response history.
    pub fn process(&self, work_queue: Vec<WorkItem>, options: impl Into<ProcessOptions>) -> Vec<WorkerHandle> {
        let options = options.into();
        let worker_count = options.worker_count.max(1);
        let shared = Arc::new(Mutex::new(HashMap::new()));
        let resolver = options
            .resolver_override
            .clone()
            .unwrap_or_else(|| SystemResolver::shared() as Arc<dyn NameResolver>);
        let send_gate = Arc::new(Latch::new());
        let read_gate = Arc::new(Latch::new());

        let mut handles = Vec::with_capacity(worker_count);
        for worker_index in 0..worker_count {
            let ctx = WorkerContext::new(
                worker_index,
                shared.clone(),
                send_gate.clone(),
                read_gate.clone(),
                options.connect_mode,
                resolver.clone(),
            );
            let queue: VecDeque<WorkItem> = work_queue.clone().into_iter().collect();
            let worker_options = WorkerOptions {
                do_eval: options.do_eval,
                fake_send: options.fake_send,
                save_sent_cookies: options.save_sent_cookies,
                template_options: options.template_options.clone(),
                writable_timeout: options.connect_timeout,
            };
            handles.push(WorkerHandle::spawn(
                worker_index,
                queue,
                shared.clone(),
                ctx,
                worker_options,
            ));
        }

        drive(&handles, &send_gate, &read_gate, options.timeout, options.send_delay);

        for handle in handles.iter_mut() {
            handle.join();
        }

        handles
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives every worker through wave after wave of the three-point barrier
/// until none are left active (spec §4.5 `drive_threads`).
fn drive(
    handles: &[WorkerHandle],
    send_gate: &Latch,
    read_gate: &Latch,
    timeout: Option<Duration>,
    send_delay: Duration,
) {
    let mut active: Vec<usize> = (0..handles.len()).collect();
    let mut wave = 0u64;

    while !active.is_empty() {
        wave += 1;
        log::debug!("wave {wave}: {} active worker(s)", active.len());

        send_gate.lower();
        read_gate.lower();

        // Pre-send: wait for every active worker to finish buffering its
        // request (withholding the last two bytes) and report readiness.
        let (ready, pending, _dead) = wait_for_sync(handles, &active, timeout);
        for &idx in &ready {
            handles[idx].lower_sync();
        }
        if !send_delay.is_zero() {
            thread::sleep(send_delay);
        }

        read_gate.lower();
        send_gate.raise();

        // Post-send / pre-read: wait for every worker that was ready or
        // still pending to flush its withheld bytes.
        let round2: Vec<usize> = ready.into_iter().chain(pending).collect();
        let (ready2, pending2, _dead2) = wait_for_sync(handles, &round2, timeout);
        for &idx in &ready2 {
            handles[idx].lower_sync();
        }

        send_gate.lower();
        read_gate.raise();

        // Post-read: wait for every worker to finish reading its response.
        // Not cleared afterward — a worker whose sync signal is still
        // raised here has already reached its *next* request's pre-send
        // point, and that observation is reused as this wave's outcome
        // instead of re-waited-for at the top of the next wave.
        let round3: Vec<usize> = ready2.into_iter().chain(pending2).collect();
        let (ready3, pending3, _dead3) = wait_for_sync(handles, &round3, timeout);

        active = ready3.into_iter().chain(pending3).collect();
    }

    send_gate.lower();
    read_gate.lower();
}

/// Classifies every worker in `indices` as ready (sync signal observed),
/// still pending (neither synced nor finished before the wait elapsed), or
/// dead (thread already exited). Mirrors `pyrace.driver.Driver.
/// _wait_for_sync`'s loop: each iteration re-checks liveness, computes a
/// fresh per-iteration wait time by splitting whatever time remains evenly
/// across the workers still pending, and shrinks the pending set as
/// workers report in.
fn wait_for_sync(
    handles: &[WorkerHandle],
    indices: &[usize],
    timeout: Option<Duration>,
) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    let start = Instant::now();
    let mut ready = Vec::new();
    let mut dead = Vec::new();
    let mut pending: Vec<usize> = indices.to_vec();

    loop {
        if pending.is_empty() {
            break;
        }

        if let Some(timeout) = timeout {
            if !timeout.is_zero() && start.elapsed() >= timeout {
                log::warn!("barrier wait timed out for {} pending worker(s)", pending.len());
                break;
            }
        }

        let wait_time = match timeout {
            Some(timeout) if !timeout.is_zero() => {
                let remaining = timeout.saturating_sub(start.elapsed());
                Some(remaining / pending.len() as u32)
            }
            _ => None,
        };

        let mut next_pending = Vec::with_capacity(pending.len());
        for &idx in &pending {
            let handle = &handles[idx];
            if handle.is_finished() {
                dead.push(idx);
            } else if handle.wait_sync(wait_time) {
                ready.push(idx);
            } else {
                next_pending.push(idx);
            }
        }
        pending = next_pending;
    }

    (ready, pending, dead)
}
