//! Pluggable transport: plain TCP, or (behind the `tls` feature) TLS over
//! TCP. Both report readiness the same way tokio's own `AsyncRead`/
//! `AsyncWrite` do, so the connection state machine never branches on which
//! one it holds outside of [`Transport::connect`]/[`Transport::handshake`].

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use tokio::net::TcpStream;

#[cfg(feature = "tls")]
use std::sync::Arc;
#[cfg(feature = "tls")]
use tokio_rustls::{client::TlsStream, TlsConnector};

/// Opens a nonblocking TCP socket against `addr` with `TCP_NODELAY` set,
/// matching the connect-time setup `httpress.c`'s `open_socket` performs.
pub(crate) fn dial(addr: SocketAddr) -> io::Result<Socket> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_nonblocking(true)?;
    socket.set_nodelay(true)?;
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(e),
    }
    Ok(socket)
}

pub(crate) enum Transport {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Secure(TlsStream<TcpStream>),
}

impl Transport {
    #[cfg(feature = "tls")]
    pub(crate) async fn handshake(
        connector: &TlsConnector,
        server_name: rustls_pki_types::ServerName<'static>,
        stream: TcpStream,
    ) -> io::Result<Self> {
        connector.connect(server_name, stream).await.map(Transport::Secure)
    }

    #[cfg(feature = "tls")]
    pub(crate) fn build_connector(
        cipher_priority: Option<&str>,
    ) -> Arc<tokio_rustls::rustls::ClientConfig> {
        // cipher_priority is accepted for CLI-surface parity (`-z`); rustls
        // selects its own suite ordering and does not expose the OpenSSL
        // priority-string mini-language, so the value is logged, not applied.
        if let Some(z) = cipher_priority {
            tracing::debug!(cipher_priority = z, "ignoring -z: rustls manages suite order");
        }
        let mut roots = tokio_rustls::rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Arc::new(
            tokio_rustls::rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    }
}

impl tokio::io::AsyncRead for Transport {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        use std::pin::Pin;
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            Transport::Secure(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for Transport {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        use std::pin::Pin;
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            Transport::Secure(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        use std::pin::Pin;
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            Transport::Secure(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        use std::pin::Pin;
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            Transport::Secure(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
