//! Session/URL pool: maps a connection to the request templates and
//! destination address it draws from. Built once at startup from either a
//! single target URL or a session-file (grammar in spec §6), then shared
//! read-only by every worker for the life of the run.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

const MAX_SESSIONS: usize = 128;
const MAX_URLS: usize = 1024;

#[derive(Debug)]
pub(crate) enum SessionError {
    TooManySessions,
    TooManyUrls,
    HostBeforeSession { line: usize },
    UrlBeforeHost { line: usize },
    BadUrl(String),
    Resolve { host: String, source: std::io::Error },
    Io(std::io::Error),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::TooManySessions => write!(f, "too many sessions (max {MAX_SESSIONS})"),
            SessionError::TooManyUrls => write!(f, "too many urls (max {MAX_URLS})"),
            SessionError::HostBeforeSession { line } => {
                write!(f, "host on line {line} but no session started")
            }
            SessionError::UrlBeforeHost { line } => {
                write!(f, "url on line {line} but session has no host")
            }
            SessionError::BadUrl(url) => write!(f, "can't parse url: {url}"),
            SessionError::Resolve { host, source } => {
                write!(f, "can't resolve host {host}: {source}")
            }
            SessionError::Io(e) => write!(f, "session file: {e}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Flat, immutable pool of precomputed request bytes plus the per-session
/// boundaries and addresses it is split across.
///
/// `requests[bounds[id-1]..bounds[id]]` (or `requests[..bounds[0]]` for
/// `id == 0`) is the URL range belonging to session `id` — the corrected
/// form of the off-by-one in the original source (see spec design notes).
pub(crate) struct SessionPool {
    requests: Vec<Arc<[u8]>>,
    bounds: Vec<usize>,
    addrs: Vec<SocketAddr>,
    hosts: Vec<String>,
}

impl SessionPool {
    /// Single-URL mode: one implicit session covering the whole pool.
    pub(crate) fn single(addr: SocketAddr, host: &str, path: &str, keep_alive: bool) -> Self {
        let request = build_request(path, host, keep_alive);
        Self {
            requests: vec![request.into()],
            bounds: vec![1],
            addrs: vec![addr],
            hosts: vec![host.to_string()],
        }
    }

    /// Parses the session-file grammar (spec §6), resolving each session's
    /// host with `resolve`.
    pub(crate) fn from_session_file(
        contents: &str,
        keep_alive: bool,
        resolve: impl Fn(&str) -> std::io::Result<SocketAddr>,
    ) -> Result<Self, SessionError> {
        let mut requests = Vec::new();
        let mut bounds = Vec::new();
        let mut addrs = Vec::new();
        let mut hosts = Vec::new();

        let mut session_id: Option<usize> = None;
        let mut current_host: Option<String> = None;

        for (lineno, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            if line.contains("!start_req_sequence") {
                if let Some(id) = session_id {
                    bounds.push(requests.len());
                    let _ = id;
                }
                let next_id = session_id.map_or(0, |id| id + 1);
                if next_id >= MAX_SESSIONS {
                    return Err(SessionError::TooManySessions);
                }
                session_id = Some(next_id);
                current_host = None;
                continue;
            }

            if let Some(rest) = line.strip_prefix("host:") {
                let Some(_id) = session_id else {
                    return Err(SessionError::HostBeforeSession { line: lineno + 1 });
                };
                let host_spec = rest.trim();
                let addr = resolve(host_spec).map_err(|source| SessionError::Resolve {
                    host: host_spec.to_string(),
                    source,
                })?;
                current_host = Some(host_spec.to_string());
                addrs.push(addr);
                hosts.push(host_spec.to_string());
                continue;
            }

            // Plain URL path line.
            let Some(host) = current_host.as_deref() else {
                return Err(SessionError::UrlBeforeHost { line: lineno + 1 });
            };
            requests.push(build_request(line, host, keep_alive).into());
            if requests.len() > MAX_URLS {
                return Err(SessionError::TooManyUrls);
            }
        }

        if session_id.is_some() {
            bounds.push(requests.len());
        }

        Ok(Self { requests, bounds, addrs, hosts })
    }

    pub(crate) fn num_sessions(&self) -> usize {
        self.bounds.len()
    }

    pub(crate) fn session_for(&self, connection_index: usize) -> usize {
        connection_index % self.num_sessions()
    }

    pub(crate) fn addr(&self, session_id: usize) -> SocketAddr {
        self.addrs[session_id]
    }

    /// Hostname (for TLS SNI / future diagnostics) bound to this session.
    pub(crate) fn host(&self, session_id: usize) -> &str {
        &self.hosts[session_id]
    }

    /// Corrected `first_url`/range computation: session 0 starts at index
    /// 0, every later session starts where the previous one ended.
    pub(crate) fn requests(&self, session_id: usize) -> &[Arc<[u8]>] {
        let first_url = if session_id == 0 { 0 } else { self.bounds[session_id - 1] };
        &self.requests[first_url..self.bounds[session_id]]
    }
}

fn build_request(path: &str, host: &str, keep_alive: bool) -> Vec<u8> {
    let connection = if keep_alive { "keep-alive" } else { "close" };
    format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: {connection}\r\n\r\n").into_bytes()
}

/// Splits a target URL into `(host[:port], path)`, matching `parse_uri`'s
/// contract in the original implementation. Accepts an optional
/// `http://`/`https://` scheme; defaults `path` to `/`.
pub(crate) fn parse_target_url(url: &str) -> Result<(String, String), SessionError> {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    if without_scheme.is_empty() {
        return Err(SessionError::BadUrl(url.to_string()));
    }
    match without_scheme.find('/') {
        Some(idx) => Ok((
            without_scheme[..idx].to_string(),
            without_scheme[idx..].to_string(),
        )),
        None => Ok((without_scheme.to_string(), "/".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn addr() -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 8080))
    }

    #[test]
    fn parses_url_with_scheme_and_path() {
        let (host, path) = parse_target_url("http://example.com:8080/foo/bar").unwrap();
        assert_eq!(host, "example.com:8080");
        assert_eq!(path, "/foo/bar");
    }

    #[test]
    fn parses_bare_host_defaults_to_root_path() {
        let (host, path) = parse_target_url("example.com").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(path, "/");
    }

    #[test]
    fn single_session_covers_whole_pool() {
        let pool = SessionPool::single(addr(), "example.com", "/", true);
        assert_eq!(pool.num_sessions(), 1);
        assert_eq!(pool.requests(0).len(), 1);
        assert!(std::str::from_utf8(&pool.requests(0)[0])
            .unwrap()
            .contains("Connection: keep-alive"));
    }

    #[test]
    fn two_sessions_partition_urls_with_corrected_first_url() {
        let file = "\
!start_req_sequence
host: a.example.com
/one
/two
!start_req_sequence
host: b.example.com
/three
";
        let pool =
            SessionPool::from_session_file(file, false, |_| Ok(addr())).expect("parses");
        assert_eq!(pool.num_sessions(), 2);
        assert_eq!(pool.requests(0).len(), 2);
        assert_eq!(pool.requests(1).len(), 1);
        assert!(std::str::from_utf8(&pool.requests(0)[0]).unwrap().contains("/one"));
        assert!(std::str::from_utf8(&pool.requests(1)[0]).unwrap().contains("/three"));
    }

    #[test]
    fn connections_partition_round_robin_by_session_count() {
        let file = "\
!start_req_sequence
host: a.example.com
/one
!start_req_sequence
host: b.example.com
/two
";
        let pool = SessionPool::from_session_file(file, false, |_| Ok(addr())).unwrap();
        assert_eq!(pool.session_for(0), 0);
        assert_eq!(pool.session_for(1), 1);
        assert_eq!(pool.session_for(2), 0);
        assert_eq!(pool.session_for(3), 1);
    }

    #[test]
    fn url_before_any_host_is_rejected() {
        let file = "!start_req_sequence\n/no-host\n";
        let err = SessionPool::from_session_file(file, false, |_| Ok(addr())).unwrap_err();
        assert!(matches!(err, SessionError::UrlBeforeHost { .. }));
    }

    #[test]
    fn host_before_any_session_is_rejected() {
        let file = "host: a.example.com\n";
        let err = SessionPool::from_session_file(file, false, |_| Ok(addr())).unwrap_err();
        assert!(matches!(err, SessionError::HostBeforeSession { .. }));
    }
}
