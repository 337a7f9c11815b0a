//! `reqstorm`: a high-throughput HTTP/1.1 load generator. One OS thread per
//! worker, each running its own single-threaded tokio reactor over a
//! disjoint slice of connections — see [`engine::worker`] for the per-worker
//! loop and [`budget`] for the one piece of state every worker shares.

mod aggregator;
mod budget;
mod cli;
mod cpu;
mod engine {
    pub(crate) mod connection;
    pub(crate) mod transport;
    pub(crate) mod worker;
}
mod errors;
mod http {
    pub(crate) mod chunked;
    pub(crate) mod response;
    pub(crate) mod types;
}
mod limits;
mod report;
mod session;
mod signals;

use budget::RunBudget;
use clap::Parser;
use engine::worker::{run_worker, WorkerReport, WorkerSpawnArgs};
use limits::EngineLimits;
use session::SessionPool;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

fn resolve_host(host_and_port: &str, secure: bool) -> std::io::Result<SocketAddr> {
    let target = if host_and_port.rsplit_once(':').is_some_and(|(_, p)| p.parse::<u16>().is_ok()) {
        host_and_port.to_string()
    } else {
        let default_port = if secure { 443 } else { 80 };
        format!("{host_and_port}:{default_port}")
    };
    target
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("no address for {host_and_port}")))
}

fn build_session_pool(cfg: &cli::ValidatedConfig) -> Result<(Arc<SessionPool>, bool), String> {
    match &cfg.target {
        cli::Target::Url(url) => {
            let secure = url.starts_with("https://");
            let (host, path) = session::parse_target_url(url).map_err(|e| e.to_string())?;
            let addr = resolve_host(&host, secure).map_err(|e| format!("can't resolve host {host}: {e}"))?;
            tracing::info!(%host, "resolved target");
            Ok((Arc::new(SessionPool::single(addr, &host, &path, cfg.keep_alive)), secure))
        }
        cli::Target::SessionFile(path) => {
            let contents = std::fs::read_to_string(path).map_err(|e| format!("session file: {e}"))?;
            let pool = SessionPool::from_session_file(&contents, cfg.keep_alive, |host| resolve_host(host, false))
                .map_err(|e| e.to_string())?;
            Ok((Arc::new(pool), false))
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = cli::Cli::parse();
    let cfg = match cli::validate(cli) {
        Ok(cfg) => cfg,
        Err(msg) => {
            eprintln!("{msg}\n");
            std::process::exit(1);
        }
    };

    let (session_pool, secure) = match build_session_pool(&cfg) {
        Ok(result) => result,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(1);
        }
    };

    #[cfg(feature = "tls")]
    let tls_connector = if secure {
        let client_config = engine::transport::Transport::build_connector(cfg.cipher_priority.as_deref());
        Some(tokio_rustls::TlsConnector::from(client_config))
    } else {
        None
    };
    #[cfg(not(feature = "tls"))]
    if secure {
        eprintln!("built without the `tls` feature: can't request an https:// target");
        std::process::exit(1);
    }

    if let Err(e) = signals::block_all() {
        eprintln!("can't set signal mask: {e}");
        std::process::exit(1);
    }

    let budget = Arc::new(RunBudget::new(cfg.mode, cfg.quiet));
    let limits = EngineLimits::default();
    let stop_cpu = Arc::new(AtomicBool::new(false));

    let cpu_stop_for_thread = stop_cpu.clone();
    let cpu_handle = std::thread::spawn(move || cpu::run(cpu_stop_for_thread));

    let mut worker_handles = Vec::with_capacity(cfg.num_threads as usize);
    let mut connections_allocated = 0u64;
    for worker_id in 0..cfg.num_threads {
        let remaining_threads = cfg.num_threads - worker_id;
        let num_connections = (cfg.num_connections - connections_allocated) / remaining_threads;
        let connection_index_offset = connections_allocated;
        connections_allocated += num_connections;

        let args = WorkerSpawnArgs {
            worker_id: worker_id as usize,
            num_connections: num_connections as usize,
            connection_index_offset: connection_index_offset as usize,
            session: session_pool.clone(),
            budget: budget.clone(),
            limits: limits.clone(),
            keep_alive: cfg.keep_alive,
            #[cfg(feature = "tls")]
            tls_connector: tls_connector.clone(),
        };
        worker_handles.push(std::thread::spawn(move || run_worker(args)));
    }

    if let Err(e) = signals::unblock_except_sigpipe() {
        eprintln!("can't unset signal mask: {e}");
        std::process::exit(1);
    }

    let start = budget.start();
    let mut reports: Vec<WorkerReport> = Vec::with_capacity(worker_handles.len());
    for handle in worker_handles {
        match handle.join() {
            Ok(report) => reports.push(report),
            Err(_) => tracing::error!("a worker thread panicked"),
        }
    }
    let elapsed = Instant::now().saturating_duration_since(start);

    stop_cpu.store(true, Ordering::Relaxed);
    let cpu_stats = cpu_handle.join().unwrap_or_default();

    let num_requests_for_threshold = match cfg.mode {
        limits::Mode::Count { num_requests } => num_requests,
        _ => budget.observed_count(),
    };
    let totals = aggregator::aggregate(&reports, num_requests_for_threshold, cfg.num_connections);
    let rates = aggregator::rates(&totals, elapsed, cfg.num_connections);
    report::print(&totals, &rates, &cpu_stats, elapsed, cfg.keep_alive);
}
