//! Per-connection driver: connect, [handshake], write, read headers, read
//! body, rearm — repeated for the life of the run. One instance of
//! [`run_connection`] is spawned as one `spawn_local` task per connection
//! (see [`crate::engine::worker`]).

use crate::budget::RunBudget;
use crate::engine::transport::{self, Transport};
use crate::engine::worker::WorkerCounters;
use crate::errors::{ErrorKind, Phase};
use crate::http::chunked::{ChunkedDecoder, Outcome};
use crate::http::response;
use crate::session::SessionPool;
use rand::rngs::StdRng;
use rand::Rng;
use std::cell::{Cell, RefCell};
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Phase a connection is currently in. Kept for drain bookkeeping and
/// tests; the control flow in [`run_connection`] already encodes these
/// transitions directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnState {
    Connecting,
    #[cfg_attr(not(feature = "tls"), allow(dead_code))]
    Handshaking,
    Writing,
    ReadingHeaders,
    ReadingBody,
}

/// State visible to the worker's heartbeat/drain loop. `Cell`-based: every
/// connection task and the heartbeat task that reads it run on the same
/// thread, cooperatively, so nothing here needs to be `Sync`.
pub(crate) struct ConnShared {
    pub(crate) last_activity: Cell<Instant>,
    pub(crate) done: Cell<bool>,
    pub(crate) success_count: Cell<u64>,
    pub(crate) state: Cell<ConnState>,
}

impl ConnShared {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            last_activity: Cell::new(Instant::now()),
            done: Cell::new(false),
            success_count: Cell::new(0),
            state: Cell::new(ConnState::Connecting),
        })
    }
}

/// Shutdown/drain coordination shared by every connection on a worker.
/// Set once by the heartbeat when the global stop condition trips.
pub(crate) struct DrainState {
    pub(crate) shutting_down: Cell<bool>,
    pub(crate) kill_after: Cell<Duration>,
}

impl DrainState {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            shutting_down: Cell::new(false),
            kill_after: Cell::new(Duration::from_secs(1)),
        })
    }
}

pub(crate) struct ConnContext {
    pub(crate) worker_id: usize,
    pub(crate) addr: SocketAddr,
    pub(crate) session: Arc<SessionPool>,
    pub(crate) session_id: usize,
    pub(crate) budget: Arc<RunBudget>,
    pub(crate) counters: Rc<WorkerCounters>,
    pub(crate) rng: Rc<RefCell<StdRng>>,
    pub(crate) buffer_size: usize,
    pub(crate) keep_alive: bool,
    pub(crate) shared: Rc<ConnShared>,
    pub(crate) drain: Rc<DrainState>,
    pub(crate) active_count: Rc<Cell<usize>>,
    /// `TlsConnector` is a thin handle around an `Arc<ClientConfig>`, so it
    /// is shared across every connection on every worker without an extra
    /// layer of reference counting.
    #[cfg(feature = "tls")]
    pub(crate) tls_connector: Option<tokio_rustls::TlsConnector>,
}

impl ConnContext {
    fn pick_request(&self) -> Arc<[u8]> {
        let requests = self.session.requests(self.session_id);
        if requests.len() == 1 {
            requests[0].clone()
        } else {
            let idx = self.rng.borrow_mut().gen_range(0..requests.len());
            requests[idx].clone()
        }
    }

    fn touch(&self) {
        self.shared.last_activity.set(Instant::now());
    }

    fn set_state(&self, state: ConnState) {
        self.shared.state.set(state);
    }
}

/// Races `fut` against the connection's drain deadline once shutdown is in
/// progress. Before shutdown begins this is a plain `await` — tokio's
/// reactor already keeps the task registered for the next readiness event,
/// so there is nothing extra to "re-post".
async fn io_with_drain<T>(
    ctx: &ConnContext,
    phase: Phase,
    fut: impl std::future::Future<Output = io::Result<T>>,
) -> Result<T, ErrorKind> {
    if ctx.drain.shutting_down.get() {
        let deadline = ctx.shared.last_activity.get() + ctx.drain.kill_after.get();
        tokio::select! {
            res = fut => res.map_err(|source| ErrorKind::ReadError { phase, source }),
            _ = tokio::time::sleep_until(deadline.into()) => Err(ErrorKind::DrainKill),
        }
    } else {
        fut.await.map_err(|source| ErrorKind::ReadError { phase, source })
    }
}

async fn dial(ctx: &ConnContext) -> Result<Transport, ErrorKind> {
    let socket = transport::dial(ctx.addr).map_err(ErrorKind::DialFailure)?;
    let std_stream: std::net::TcpStream = socket.into();
    let stream = TcpStream::from_std(std_stream).map_err(ErrorKind::DialFailure)?;
    io_with_drain(ctx, Phase::Headers, stream.writable()).await?;

    #[cfg(feature = "tls")]
    if let Some(connector) = &ctx.tls_connector {
        ctx.set_state(ConnState::Handshaking);
        let host = ctx.session.host(ctx.session_id);
        let server_name = rustls_pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| ErrorKind::HandshakeFailure(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let tls_stream = Transport::handshake(connector, server_name, stream)
            .await
            .map_err(ErrorKind::HandshakeFailure)?;
        return Ok(tls_stream);
    }

    Ok(Transport::Plain(stream))
}

/// Hard-closes `transport`, matching `SO_LINGER{on,0}` on every recycle
/// path that isn't a clean rearm.
fn hard_close(transport: Transport) {
    match &transport {
        Transport::Plain(stream) => {
            let sock = socket2::SockRef::from(stream);
            let _ = sock.set_linger(Some(Duration::ZERO));
        }
        #[cfg(feature = "tls")]
        Transport::Secure(stream) => {
            let sock = socket2::SockRef::from(stream.get_ref().0);
            let _ = sock.set_linger(Some(Duration::ZERO));
        }
    }
    drop(transport);
}

pub(crate) async fn run_connection(ctx: ConnContext) {
    let mut buffer = vec![0u8; ctx.buffer_size];

    'connection: loop {
        let decision = ctx.budget.more_requests_to_run();
        if let Some(line) = &decision.progress_line {
            tracing::info!(worker = ctx.worker_id, "{line}");
        }
        if !decision.proceed {
            ctx.shared.done.set(true);
            break 'connection;
        }

        ctx.set_state(ConnState::Connecting);
        ctx.touch();
        let mut transport = match dial(&ctx).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(worker = ctx.worker_id, "{e}");
                ctx.counters.inc_fail();
                continue 'connection;
            }
        };
        ctx.counters.inc_connect();
        ctx.touch();
        let mut alive_count: u64 = 0;

        'keepalive: loop {
            ctx.set_state(ConnState::Writing);
            let request = ctx.pick_request();
            let mut write_pos = 0usize;
            let write_result: Result<(), ErrorKind> = loop {
                if write_pos >= request.len() {
                    break Ok(());
                }
                match io_with_drain(&ctx, Phase::Headers, transport.write(&request[write_pos..])).await {
                    Ok(0) => {
                        break Err(ErrorKind::ReadError {
                            phase: Phase::Headers,
                            source: io::Error::new(io::ErrorKind::WriteZero, "connection closed"),
                        })
                    }
                    Ok(n) => {
                        write_pos += n;
                        ctx.touch();
                    }
                    Err(e) => break Err(e),
                }
            };
            if let Err(e) = write_result {
                tracing::warn!(worker = ctx.worker_id, alive_count, "{e}");
                ctx.counters.inc_fail();
                hard_close(transport);
                continue 'connection;
            }

            ctx.set_state(ConnState::ReadingHeaders);
            let mut read_pos = 0usize;
            let framing = loop {
                if read_pos >= buffer.len() - 1 {
                    tracing::warn!(worker = ctx.worker_id, "response headers too long");
                    ctx.counters.inc_fail();
                    hard_close(transport);
                    continue 'connection;
                }
                let n = match io_with_drain(&ctx, Phase::Headers, transport.read(&mut buffer[read_pos..])).await {
                    Ok(0) => {
                        tracing::warn!(worker = ctx.worker_id, alive_count, "headers read: connection closed");
                        ctx.counters.inc_fail();
                        hard_close(transport);
                        continue 'connection;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(worker = ctx.worker_id, alive_count, "{e}");
                        ctx.counters.inc_fail();
                        hard_close(transport);
                        continue 'connection;
                    }
                };
                read_pos += n;
                ctx.touch();

                if let Some(body_start) = response::find_headers_end(&buffer[..read_pos]) {
                    match response::parse_headers(&buffer[..read_pos], body_start) {
                        Ok(framing) => break framing,
                        Err(_) => {
                            tracing::warn!(worker = ctx.worker_id, "response framing malformed");
                            ctx.counters.inc_fail();
                            hard_close(transport);
                            continue 'connection;
                        }
                    }
                }
            };

            ctx.set_state(ConnState::ReadingBody);
            let overhead = framing.body_start as u64;
            let body_result = read_body(&ctx, &mut transport, &mut buffer, read_pos, &framing).await;
            let bytes_received = match body_result {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(worker = ctx.worker_id, alive_count, "{e}");
                    ctx.counters.inc_fail();
                    hard_close(transport);
                    continue 'connection;
                }
            };

            ctx.counters.inc_success(bytes_received, overhead);
            let new_success_count = ctx.shared.success_count.get() + 1;
            ctx.shared.success_count.set(new_success_count);

            if !ctx.keep_alive || !framing.keep_alive {
                drop(transport);
                continue 'connection;
            }

            let decision = ctx.budget.more_requests_to_run();
            if let Some(line) = &decision.progress_line {
                tracing::info!(worker = ctx.worker_id, "{line}");
            }
            if !decision.proceed {
                drop(transport);
                ctx.shared.done.set(true);
                break 'connection;
            }
            alive_count += 1;
            continue 'keepalive;
        }
    }

    ctx.active_count.set(ctx.active_count.get() - 1);
}

async fn read_body(
    ctx: &ConnContext,
    transport: &mut Transport,
    buffer: &mut [u8],
    read_pos: usize,
    framing: &response::Framing,
) -> Result<u64, ErrorKind> {
    if framing.chunked {
        let mut decoder = ChunkedDecoder::new(false);
        let body_start = framing.body_start;
        let mut cur_len = read_pos - body_start;
        buffer.copy_within(body_start..read_pos, 0);
        let mut received: u64 = 0;

        loop {
            let (outcome, decoded_len) = decoder.decode(&mut buffer[..cur_len]);
            received += decoded_len as u64;
            match outcome {
                Outcome::Done => return Ok(received),
                Outcome::Malformed => {
                    return Err(ErrorKind::FramingError("malformed chunked encoding"))
                }
                Outcome::NeedMore => {
                    let n = io_with_drain(ctx, Phase::Body, transport.read(buffer)).await?;
                    if n == 0 {
                        return Err(ErrorKind::ReadError {
                            phase: Phase::Body,
                            source: io::Error::new(io::ErrorKind::UnexpectedEof, "closed mid-body"),
                        });
                    }
                    ctx.touch();
                    cur_len = n;
                }
            }
        }
    } else {
        let declared = framing.content_length.unwrap_or(0);
        let mut received = (read_pos - framing.body_start) as u64;
        if received >= declared {
            return Ok(declared.min(received));
        }
        loop {
            let n = io_with_drain(ctx, Phase::Body, transport.read(buffer)).await?;
            if n == 0 {
                return Err(ErrorKind::ReadError {
                    phase: Phase::Body,
                    source: io::Error::new(io::ErrorKind::UnexpectedEof, "closed mid-body"),
                });
            }
            ctx.touch();
            received += n as u64;
            if received >= declared {
                return Ok(received);
            }
        }
    }
}

/// End-to-end tests against a real loopback TCP listener, covering
/// scenarios 1, 2, 4 and 6 from the testable-properties list: plain
/// non-keep-alive requests, keep-alive with chunked bodies, a malformed
/// response with no framing, and per-session URL partitioning.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::Mode;
    use rand::SeedableRng;
    use tokio::net::TcpListener;

    fn test_ctx(addr: SocketAddr, session: Arc<SessionPool>, session_id: usize, num_requests: u64, keep_alive: bool) -> ConnContext {
        ConnContext {
            worker_id: 0,
            addr,
            session,
            session_id,
            budget: Arc::new(RunBudget::new(Mode::Count { num_requests }, true)),
            counters: WorkerCounters::new(),
            rng: Rc::new(RefCell::new(StdRng::from_entropy())),
            buffer_size: 8192,
            keep_alive,
            shared: ConnShared::new(),
            drain: DrainState::new(),
            active_count: Rc::new(Cell::new(1)),
            #[cfg(feature = "tls")]
            tls_connector: None,
        }
    }

    /// Reads one request off `stream` up to its header terminator and
    /// discards it; tests only care about what the server sends back.
    async fn drain_one_request(stream: &mut tokio::net::TcpStream) {
        let mut buf = vec![0u8; 4096];
        let mut pos = 0usize;
        loop {
            let n = stream.read(&mut buf[pos..]).await.unwrap();
            assert!(n > 0, "client closed before sending a full request");
            pos += n;
            if response::find_headers_end(&buf[..pos]).is_some() {
                return;
            }
        }
    }

    #[tokio::test]
    async fn scenario_1_count_mode_no_keep_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for _ in 0..3 {
                let (mut stream, _) = listener.accept().await.unwrap();
                drain_one_request(&mut stream).await;
                stream.write_all(b"HTTP/1.0 200 OK\r\nContent-Length: 3\r\n\r\nfoo").await.unwrap();
                stream.shutdown().await.ok();
            }
        });

        let session = Arc::new(SessionPool::single(addr, "localhost", "/", false));
        let ctx = test_ctx(addr, session, 0, 3, false);
        let counters = ctx.counters.clone();
        run_connection(ctx).await;

        let (success, fail, bytes_received, connects) = counters.snapshot();
        assert_eq!(success, 3);
        assert_eq!(fail, 0);
        assert_eq!(connects, 3);
        assert_eq!(bytes_received, 9);
    }

    #[tokio::test]
    async fn scenario_2_keep_alive_chunked() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            for _ in 0..3 {
                drain_one_request(&mut stream).await;
                stream
                    .write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n")
                    .await
                    .unwrap();
            }
        });

        let session = Arc::new(SessionPool::single(addr, "localhost", "/", true));
        let ctx = test_ctx(addr, session, 0, 3, true);
        let counters = ctx.counters.clone();
        run_connection(ctx).await;

        let (success, fail, bytes_received, connects) = counters.snapshot();
        assert_eq!(success, 3);
        assert_eq!(fail, 0);
        assert_eq!(connects, 1);
        assert_eq!(bytes_received, 15);
    }

    #[tokio::test]
    async fn scenario_4_malformed_response_counts_as_fail_and_redials() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().await.unwrap();
                drain_one_request(&mut stream).await;
                stream.write_all(b"HTTP/1.1 200 OK\r\n\r\nbody").await.unwrap();
                stream.shutdown().await.ok();
            }
        });

        let session = Arc::new(SessionPool::single(addr, "localhost", "/", false));
        let ctx = test_ctx(addr, session, 0, 2, false);
        let counters = ctx.counters.clone();
        run_connection(ctx).await;

        let (success, fail, _bytes_received, connects) = counters.snapshot();
        assert_eq!(fail, 2);
        assert_eq!(success, 0);
        assert_eq!(connects, 2);
    }

    #[tokio::test]
    async fn scenario_6_connections_only_draw_from_their_own_session() {
        let listener_a = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_a = listener_a.local_addr().unwrap();
        let listener_b = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr_b = listener_b.local_addr().unwrap();

        async fn respond_and_capture_path(listener: TcpListener) -> String {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut pos = 0usize;
            let body_start = loop {
                let n = stream.read(&mut buf[pos..]).await.unwrap();
                pos += n;
                if let Some(end) = response::find_headers_end(&buf[..pos]) {
                    break end;
                }
            };
            let request_line = String::from_utf8_lossy(&buf[..body_start]).to_string();
            stream.write_all(b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n").await.unwrap();
            stream.shutdown().await.ok();
            request_line
        }

        let session_file = format!(
            "!start_req_sequence\nhost: {addr_a}\n/session-a-path\n!start_req_sequence\nhost: {addr_b}\n/session-b-path\n"
        );
        let session = Arc::new(
            SessionPool::from_session_file(&session_file, false, |host| {
                host.parse().map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bad addr"))
            })
            .unwrap(),
        );
        assert_eq!(session.session_for(0), 0);
        assert_eq!(session.session_for(1), 1);

        let server_a = tokio::spawn(respond_and_capture_path(listener_a));
        let server_b = tokio::spawn(respond_and_capture_path(listener_b));

        let ctx_a = test_ctx(addr_a, session.clone(), 0, 1, false);
        let ctx_b = test_ctx(addr_b, session, 1, 1, false);
        run_connection(ctx_a).await;
        run_connection(ctx_b).await;

        assert!(server_a.await.unwrap().contains("/session-a-path"));
        assert!(server_b.await.unwrap().contains("/session-b-path"));
    }
}
