//! Response framing: locates the end of the header block and extracts
//! `Content-Length` / `Transfer-Encoding` / `Connection` / version, the
//! minimum needed to decide how to read the body and whether the
//! connection may be reused.

use super::types::{eq_ignore_case_prefix, parse_decimal, trim_leading_ws, Version};
use memchr::{memchr, memmem};

#[derive(Debug, Clone, Copy)]
pub(crate) struct Framing {
    /// Offset of the first body byte within the buffer that was parsed.
    pub(crate) body_start: usize,
    /// `None` means "chunked" (or, if `chunked` is also false, malformed —
    /// but [`parse_headers`] never returns that combination successfully).
    pub(crate) content_length: Option<u64>,
    pub(crate) chunked: bool,
    pub(crate) keep_alive: bool,
    pub(crate) version: Version,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParseError {
    /// Neither `Content-Length` nor chunked transfer-encoding was present.
    NoFraming,
    BadStatusLine,
}

/// Scans `buf` (bytes received so far for one response) for the
/// end-of-headers delimiter, allowing either `\r\n\r\n` or a bare `\n\n`
/// (servers vary). Returns the offset of the first body byte.
pub(crate) fn find_headers_end(buf: &[u8]) -> Option<usize> {
    let crlf = memmem::find(buf, b"\r\n\r\n").map(|i| i + 4);
    let lf = memmem::find(buf, b"\n\n").map(|i| i + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Parses the status line and headers in `buf[..body_start]`.
/// `body_start` must come from [`find_headers_end`] on the same buffer.
pub(crate) fn parse_headers(buf: &[u8], body_start: usize) -> Result<Framing, ParseError> {
    let head = &buf[..body_start];

    let status_line_end = memchr(b'\n', head).ok_or(ParseError::BadStatusLine)?;
    let version = parse_version(strip_cr(&head[..status_line_end]))?;

    let mut content_length = None;
    let mut chunked = false;
    let mut keep_alive = None;

    let mut pos = status_line_end + 1;
    while pos < head.len() {
        let line_end = memchr(b'\n', &head[pos..])
            .map(|i| pos + i)
            .unwrap_or(head.len());
        let line = strip_cr(&head[pos..line_end]);

        if eq_ignore_case_prefix(line, b"content-length:") {
            let value = trim_leading_ws(&line[b"content-length:".len()..]);
            content_length = parse_decimal(value);
        } else if eq_ignore_case_prefix(line, b"transfer-encoding:") {
            let value = trim_leading_ws(&line[b"transfer-encoding:".len()..]);
            chunked = eq_ignore_case_prefix(value, b"chunked");
        } else if eq_ignore_case_prefix(line, b"connection:") {
            let value = trim_leading_ws(&line[b"connection:".len()..]);
            keep_alive = Some(eq_ignore_case_prefix(value, b"keep-alive"));
        }

        pos = line_end + 1;
    }

    if chunked {
        content_length = None;
    } else if content_length.is_none() {
        return Err(ParseError::NoFraming);
    }

    Ok(Framing {
        body_start,
        content_length,
        chunked,
        keep_alive: keep_alive.unwrap_or_else(|| version.default_keep_alive()),
        version,
    })
}

#[inline(always)]
fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

fn parse_version(status_line: &[u8]) -> Result<Version, ParseError> {
    if status_line.len() < 8 {
        return Err(ParseError::BadStatusLine);
    }
    match &status_line[..8] {
        b"HTTP/1.1" => Ok(Version::Http11),
        b"HTTP/1.0" => Ok(Version::Http10),
        _ => Ok(Version::Other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_crlf_delimiter() {
        let buf = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\nfoo";
        let end = find_headers_end(buf).unwrap();
        assert_eq!(&buf[end..], b"foo");
    }

    #[test]
    fn finds_bare_lf_shortcut() {
        let buf = b"HTTP/1.1 200 OK\nContent-Length: 3\n\nfoo";
        let end = find_headers_end(buf).unwrap();
        assert_eq!(&buf[end..], b"foo");
    }

    #[test]
    fn content_length_framing() {
        let buf = b"HTTP/1.0 200 OK\r\nContent-Length: 3\r\n\r\nfoo";
        let end = find_headers_end(buf).unwrap();
        let framing = parse_headers(buf, end).unwrap();
        assert_eq!(framing.content_length, Some(3));
        assert!(!framing.chunked);
        assert!(!framing.keep_alive); // HTTP/1.0, no Connection header
    }

    #[test]
    fn keep_alive_header_overrides_version_default() {
        let buf = b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\nConnection: keep-alive\r\n\r\n";
        let end = find_headers_end(buf).unwrap();
        let framing = parse_headers(buf, end).unwrap();
        assert!(framing.keep_alive);
    }

    #[test]
    fn http11_defaults_to_keep_alive() {
        let buf = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
        let end = find_headers_end(buf).unwrap();
        let framing = parse_headers(buf, end).unwrap();
        assert!(framing.keep_alive);
    }

    #[test]
    fn chunked_framing_ignores_content_length() {
        let buf = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        let end = find_headers_end(buf).unwrap();
        let framing = parse_headers(buf, end).unwrap();
        assert!(framing.chunked);
        assert_eq!(framing.content_length, None);
    }

    #[test]
    fn missing_framing_is_an_error() {
        let buf = b"HTTP/1.1 200 OK\r\n\r\nbody";
        let end = find_headers_end(buf).unwrap();
        assert_eq!(parse_headers(buf, end), Err(ParseError::NoFraming));
    }

    #[test]
    fn header_name_matching_is_case_insensitive() {
        let buf = b"HTTP/1.1 200 OK\r\nCONTENT-LENGTH: 5\r\n\r\nhello";
        let end = find_headers_end(buf).unwrap();
        let framing = parse_headers(buf, end).unwrap();
        assert_eq!(framing.content_length, Some(5));
    }
}
