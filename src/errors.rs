use std::{error, fmt, io};

/// Connection-scope errors.
///
/// None of these are fatal to the process: every variant here is handled by
/// recycling the connection (close + redial) and incrementing the owning
/// worker's failure counter. Process-fatal misconfiguration lives in
/// [`crate::cli`] and uses plain [`std::process::exit`], not this type.
#[derive(Debug)]
pub(crate) enum ErrorKind {
    /// Socket create or connect failed with an errno other than
    /// `EINPROGRESS`/`EALREADY`/`EISCONN`.
    DialFailure(io::Error),
    /// A non-resumable TLS handshake error.
    #[cfg(feature = "tls")]
    HandshakeFailure(io::Error),
    /// Read failed, or the remote closed mid-response. Carries the phase
    /// (headers or body) for the log line.
    ReadError { phase: Phase, source: io::Error },
    /// Unknown body length, malformed chunked framing, or headers that
    /// exceeded the fixed-size buffer without a terminator.
    FramingError(&'static str),
    /// Connection was stuck past `4 × avg_req_time` during drain.
    DrainKill,
}

/// Which half of the response the error happened in. Purely for log
/// attribution; does not change recycling behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Headers,
    Body,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Headers => f.write_str("headers"),
            Phase::Body => f.write_str("body"),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::DialFailure(e) => write!(f, "dial failure: {e}"),
            #[cfg(feature = "tls")]
            ErrorKind::HandshakeFailure(e) => write!(f, "handshake failure: {e}"),
            ErrorKind::ReadError { phase, source } => write!(f, "{phase} read error: {source}"),
            ErrorKind::FramingError(reason) => write!(f, "framing error: {reason}"),
            ErrorKind::DrainKill => f.write_str("killed during drain"),
        }
    }
}

impl error::Error for ErrorKind {}
