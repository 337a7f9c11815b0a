//! The reactor: one OS thread, one current-thread tokio runtime, one
//! `LocalSet`. Owns a disjoint slice of connections; nothing here is
//! touched by any other worker.

use crate::budget::RunBudget;
use crate::engine::connection::{run_connection, ConnContext, ConnShared, DrainState};
use crate::limits::EngineLimits;
use crate::session::SessionPool;
use crossbeam::utils::CachePadded;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-worker counters, touched only from this worker's own thread.
/// `CachePadded` keeps each on its own cache line — not strictly required
/// for correctness on a single thread, but it keeps these blocks from
/// false-sharing with the global [`RunBudget`] counter when the two end up
/// adjacent in memory.
pub(crate) struct WorkerCounters {
    num_success: CachePadded<AtomicU64>,
    num_fail: CachePadded<AtomicU64>,
    num_bytes_received: CachePadded<AtomicU64>,
    num_overhead_received: CachePadded<AtomicU64>,
    num_connect: CachePadded<AtomicU64>,
}

impl WorkerCounters {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            num_success: CachePadded::new(AtomicU64::new(0)),
            num_fail: CachePadded::new(AtomicU64::new(0)),
            num_bytes_received: CachePadded::new(AtomicU64::new(0)),
            num_overhead_received: CachePadded::new(AtomicU64::new(0)),
            num_connect: CachePadded::new(AtomicU64::new(0)),
        })
    }

    pub(crate) fn inc_success(&self, bytes: u64, overhead: u64) {
        self.num_success.fetch_add(1, Ordering::Relaxed);
        self.num_bytes_received.fetch_add(bytes, Ordering::Relaxed);
        self.num_overhead_received.fetch_add(overhead, Ordering::Relaxed);
    }

    pub(crate) fn inc_fail(&self) {
        self.num_fail.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_connect(&self) {
        self.num_connect.fetch_add(1, Ordering::Relaxed);
    }

    /// `(success, fail, bytes_received, connects)` — used by
    /// [`crate::engine::connection`]'s loopback tests, which drive
    /// [`run_connection`](super::connection::run_connection) directly
    /// instead of going through a whole [`run_worker`].
    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.num_success.load(Ordering::Relaxed),
            self.num_fail.load(Ordering::Relaxed),
            self.num_bytes_received.load(Ordering::Relaxed),
            self.num_connect.load(Ordering::Relaxed),
        )
    }
}

/// Snapshot handed back to the orchestrator once a worker's thread joins.
#[derive(Debug, Clone, Default)]
pub(crate) struct WorkerReport {
    pub(crate) num_success: u64,
    pub(crate) num_fail: u64,
    pub(crate) num_bytes_received: u64,
    pub(crate) num_overhead_received: u64,
    pub(crate) num_connect: u64,
    /// Final per-connection success counts, for `real_concurrency`.
    pub(crate) per_connection_success: Vec<u64>,
}

pub(crate) struct WorkerSpawnArgs {
    pub(crate) worker_id: usize,
    pub(crate) num_connections: usize,
    pub(crate) connection_index_offset: usize,
    pub(crate) session: Arc<SessionPool>,
    pub(crate) budget: Arc<RunBudget>,
    pub(crate) limits: EngineLimits,
    pub(crate) keep_alive: bool,
    #[cfg(feature = "tls")]
    pub(crate) tls_connector: Option<tokio_rustls::TlsConnector>,
}

/// Runs the reactor for one worker to completion. Intended to be the body
/// of a dedicated `std::thread::spawn` closure — see [`crate`]'s
/// orchestrator in `main.rs`.
pub(crate) fn run_worker(args: WorkerSpawnArgs) -> WorkerReport {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build worker runtime");

    let local = tokio::task::LocalSet::new();
    let counters = WorkerCounters::new();
    let drain = DrainState::new();
    let active_count = Rc::new(Cell::new(args.num_connections));
    let rng = Rc::new(RefCell::new(StdRng::from_entropy()));
    let shared_handles: Rc<RefCell<Vec<Rc<ConnShared>>>> = Rc::new(RefCell::new(Vec::new()));

    for i in 0..args.num_connections {
        let connection_index = args.connection_index_offset + i;
        let session_id = args.session.session_for(connection_index);
        let shared = ConnShared::new();
        shared_handles.borrow_mut().push(shared.clone());

        let ctx = ConnContext {
            worker_id: args.worker_id,
            addr: args.session.addr(session_id),
            session: args.session.clone(),
            session_id,
            budget: args.budget.clone(),
            counters: counters.clone(),
            rng: rng.clone(),
            buffer_size: args.limits.buffer_size,
            keep_alive: args.keep_alive,
            shared,
            drain: drain.clone(),
            active_count: active_count.clone(),
            #[cfg(feature = "tls")]
            tls_connector: args.tls_connector.clone(),
        };
        local.spawn_local(run_connection(ctx));
    }

    // Once the budget trips, every connection still in flight finds out the
    // next time it calls `more_requests_to_run` (no more work to start) or
    // hits an `io_with_drain` await (raced against its own kill deadline).
    // The heartbeat's only job is to flip that switch once and compute the
    // deadline all connections race against — actually killing a stuck
    // connection from here too would race with the connection's own
    // `io_with_drain` timeout and double-decrement `active_count`.
    let worker_start = Instant::now();
    let heartbeat_counters = counters.clone();
    let heartbeat_drain = drain.clone();
    let heartbeat_active = active_count.clone();
    let heartbeat_interval = args.limits.heartbeat_interval;
    let drain_multiplier = args.limits.drain_multiplier;
    let avg_req_time_fallback = args.limits.avg_req_time_fallback;
    let avg_req_time_max = args.limits.avg_req_time_max;
    let num_connections = args.num_connections as f64;
    let budget_for_heartbeat = args.budget.clone();

    local.spawn_local(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);

        loop {
            ticker.tick().await;
            if heartbeat_active.get() == 0 {
                break;
            }
            if heartbeat_drain.shutting_down.get() {
                continue;
            }
            if !budget_exhausted(&budget_for_heartbeat) {
                continue;
            }

            let num_success = heartbeat_counters.num_success.load(Ordering::Relaxed) as f64;
            let avg_req_time = if num_success > 0.0 {
                let elapsed = worker_start.elapsed().as_secs_f64() * num_connections / num_success;
                Duration::from_secs_f64(elapsed.min(avg_req_time_max.as_secs_f64()))
            } else {
                avg_req_time_fallback
            };
            heartbeat_drain.kill_after.set(avg_req_time.mul_f64(drain_multiplier));
            heartbeat_drain.shutting_down.set(true);
        }
    });

    runtime.block_on(local.run_until(async {
        while active_count.get() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }));

    let per_connection_success = shared_handles
        .borrow()
        .iter()
        .map(|s| s.success_count.get())
        .collect();

    WorkerReport {
        num_success: counters.num_success.load(Ordering::Relaxed),
        num_fail: counters.num_fail.load(Ordering::Relaxed),
        num_bytes_received: counters.num_bytes_received.load(Ordering::Relaxed),
        num_overhead_received: counters.num_overhead_received.load(Ordering::Relaxed),
        num_connect: counters.num_connect.load(Ordering::Relaxed),
        per_connection_success,
    }
}

fn budget_exhausted(budget: &RunBudget) -> bool {
    budget.is_past_deadline()
}
