//! Command-line surface: flag parsing plus the cross-field validation the
//! original tool did by hand after `getopt` returned.

use crate::limits::Mode;
use clap::Parser;
use std::time::Duration;

/// High-throughput HTTP/1.1 load generator.
#[derive(Debug, Parser)]
#[command(name = "reqstorm", version = env!("CARGO_PKG_VERSION"), about)]
pub(crate) struct Cli {
    /// Target URL (mutually exclusive with `-f`).
    pub(crate) url: Option<String>,

    /// Number of connections to keep open.
    #[arg(short = 'c', long = "connections", default_value_t = 1)]
    pub(crate) num_connections: u64,

    /// Number of requests to run (ignored with `-i`/`-r`).
    #[arg(short = 'n', long = "requests", default_value_t = 1)]
    pub(crate) num_requests: u64,

    /// Number of worker threads.
    #[arg(short = 't', long = "threads", default_value_t = 1)]
    pub(crate) num_threads: u64,

    /// Use persistent (keep-alive) connections.
    #[arg(short = 'k', long = "keep-alive")]
    pub(crate) keep_alive: bool,

    /// Suppress progress output.
    #[arg(short = 'q', long = "quiet")]
    pub(crate) quiet: bool,

    /// Run until interrupted instead of stopping at `-n` requests.
    #[arg(short = 'i', long = "infinite", conflicts_with = "run_time")]
    pub(crate) infinite: bool,

    /// Run for this many seconds instead of stopping at `-n` requests.
    #[arg(short = 'r', long = "run-time")]
    pub(crate) run_time: Option<u64>,

    /// Read a session file (grammar: `!start_req_sequence` / `host:` / URL
    /// lines) instead of hitting a single target URL.
    #[arg(short = 'f', long = "session-file")]
    pub(crate) session_file: Option<String>,

    /// TLS cipher-suite priority string. Accepted for CLI parity with the
    /// original tool; rustls manages its own suite order and this value is
    /// only logged, never applied.
    #[cfg(feature = "tls")]
    #[arg(short = 'z', long = "cipher-priority")]
    pub(crate) cipher_priority: Option<String>,
}

#[derive(Debug)]
pub(crate) struct ValidatedConfig {
    pub(crate) num_connections: u64,
    pub(crate) num_threads: u64,
    pub(crate) mode: Mode,
    pub(crate) keep_alive: bool,
    pub(crate) quiet: bool,
    pub(crate) target: Target,
    #[cfg(feature = "tls")]
    pub(crate) cipher_priority: Option<String>,
}

#[derive(Debug)]
pub(crate) enum Target {
    Url(String),
    SessionFile(String),
}

/// Applies the same bounds the original tool enforced after `getopt`
/// returned, translated to a `Result` instead of `nxweb_die`/`exit`.
pub(crate) fn validate(cli: Cli) -> Result<ValidatedConfig, String> {
    let mode = if cli.infinite {
        Mode::Infinite
    } else if let Some(secs) = cli.run_time {
        if !(1..=3600).contains(&secs) {
            return Err("run time should be between 1 and 3600 seconds".into());
        }
        Mode::Time { run_time: Duration::from_secs(secs) }
    } else {
        if !(1..=1_000_000_000).contains(&cli.num_requests) {
            return Err("wrong number of requests".into());
        }
        Mode::Count { num_requests: cli.num_requests }
    };

    if !(1..=1_000_000).contains(&cli.num_connections) {
        return Err("wrong number of connections".into());
    }
    if matches!(mode, Mode::Count { num_requests } if cli.num_connections > num_requests) {
        return Err("number of connections exceeds number of requests".into());
    }
    if !(1..=100_000).contains(&cli.num_threads) {
        return Err("wrong number of threads".into());
    }
    if cli.num_threads > cli.num_connections {
        return Err("number of threads exceeds number of connections".into());
    }

    let target = match (&cli.url, &cli.session_file) {
        (None, None) => return Err("missing url argument".into()),
        (Some(_), Some(_)) => return Err("pass either a url or -f, not both".into()),
        (Some(url), None) => Target::Url(url.clone()),
        (None, Some(path)) => Target::SessionFile(path.clone()),
    };

    Ok(ValidatedConfig {
        num_connections: cli.num_connections,
        num_threads: cli.num_threads,
        mode,
        keep_alive: cli.keep_alive,
        quiet: cli.quiet,
        target,
        #[cfg(feature = "tls")]
        cipher_priority: cli.cipher_priority,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            url: Some("example.com".into()),
            num_connections: 1,
            num_requests: 1,
            num_threads: 1,
            keep_alive: false,
            quiet: false,
            infinite: false,
            run_time: None,
            session_file: None,
            #[cfg(feature = "tls")]
            cipher_priority: None,
        }
    }

    #[test]
    fn rejects_missing_target() {
        let mut cli = base_cli();
        cli.url = None;
        assert!(validate(cli).is_err());
    }

    #[test]
    fn rejects_more_connections_than_requests() {
        let mut cli = base_cli();
        cli.num_connections = 10;
        cli.num_requests = 5;
        assert!(validate(cli).is_err());
    }

    #[test]
    fn rejects_more_threads_than_connections() {
        let mut cli = base_cli();
        cli.num_connections = 2;
        cli.num_threads = 3;
        cli.num_requests = 100;
        assert!(validate(cli).is_err());
    }

    #[test]
    fn infinite_mode_ignores_request_count_bounds() {
        let mut cli = base_cli();
        cli.infinite = true;
        cli.num_requests = 0;
        let cfg = validate(cli).unwrap();
        assert!(matches!(cfg.mode, Mode::Infinite));
    }

    #[test]
    fn accepts_well_formed_time_mode() {
        let mut cli = base_cli();
        cli.run_time = Some(30);
        let cfg = validate(cli).unwrap();
        assert!(matches!(cfg.mode, Mode::Time { .. }));
    }
}
