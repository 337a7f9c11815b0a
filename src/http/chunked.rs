//! Resumable `Transfer-Encoding: chunked` decoder.
//!
//! The decoder is fed one buffer at a time and must tolerate the chunk
//! framing (hex size line, CRLF pairs, terminator) landing anywhere across
//! buffer boundaries — a single `decode` call never assumes it sees a whole
//! chunk. See [`ChunkedDecoder::decode`] for the contract.

/// Decoder state. Named after the phase of chunk framing currently being
/// scanned, not after anything in a particular reference implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expecting the `\r` that follows a data chunk's payload.
    Cr1,
    /// Expecting the `\n` that follows that `\r`.
    Lf1,
    /// Reading hex digits of the next chunk's size.
    Size,
    /// Expecting the `\n` that follows the size line's `\r`.
    Lf2,
    /// Copying/skipping payload bytes of the current chunk.
    Data,
}

/// Outcome of a single [`ChunkedDecoder::decode`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    /// All input bytes were consumed without completing the body; feed more.
    NeedMore,
    /// The terminating `0\r\n\r\n` chunk was observed; the body is complete.
    Done,
    /// The chunk framing was invalid (bad size digit, or CR/LF mismatch).
    Malformed,
}

/// A resumable chunked-transfer decoder.
///
/// In non-monitor mode, `decode` compacts the decoded payload bytes to the
/// front of the buffer in place, overwriting the chunk-size/CRLF framing,
/// and truncates the slice's logical length to match (see
/// [`ChunkedDecoder::decode`]'s return value). In monitor-only mode the
/// buffer is left untouched — used while the first chunk header still sits
/// in the same buffer as the response headers, which the caller does not
/// want relocated.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkedDecoder {
    state: State,
    final_chunk: bool,
    monitor_only: bool,
    chunk_bytes_left: i64,
}

impl ChunkedDecoder {
    pub(crate) fn new(monitor_only: bool) -> Self {
        Self {
            state: State::Size,
            final_chunk: false,
            monitor_only,
            chunk_bytes_left: 0,
        }
    }

    /// Consumes `buf` in place and returns the outcome plus the number of
    /// decoded (payload) bytes now occupying the front of `buf` when not in
    /// monitor-only mode. In monitor-only mode the returned length is the
    /// number of input bytes consumed (the buffer itself is untouched).
    ///
    /// Invariant maintained throughout: whenever control reaches [`State::Data`],
    /// `read == write` — chunk framing bytes (size line, CRLF pairs) are the
    /// only thing ever removed from the stream, and they are removed in one
    /// shot when the trailing `\n` of a chunk header is seen (the
    /// [`State::Lf2`] arm); payload bytes themselves never need to move,
    /// because nothing is ever deleted out from under them.
    pub(crate) fn decode(&mut self, buf: &mut [u8]) -> (Outcome, usize) {
        let mut read = 0usize;
        let mut write = 0usize;
        let mut end = buf.len();

        while read < end {
            match self.state {
                State::Data => {
                    let remaining = (end - read) as i64;
                    if remaining >= self.chunk_bytes_left {
                        read += self.chunk_bytes_left as usize;
                        write = read;
                        self.chunk_bytes_left = 0;
                        self.state = State::Cr1;
                    } else {
                        self.chunk_bytes_left -= remaining;
                        return (Outcome::NeedMore, end);
                    }
                }
                State::Cr1 => {
                    if buf[read] != b'\r' {
                        return (Outcome::Malformed, write);
                    }
                    read += 1;
                    self.state = State::Lf1;
                }
                State::Lf1 => {
                    if buf[read] != b'\n' {
                        return (Outcome::Malformed, write);
                    }
                    if self.final_chunk {
                        return (Outcome::Done, if self.monitor_only { read + 1 } else { write });
                    }
                    read += 1;
                    self.state = State::Size;
                }
                State::Size => {
                    let c = buf[read];
                    if c == b'\r' {
                        if self.chunk_bytes_left == 0 {
                            self.final_chunk = true;
                        }
                        read += 1;
                        self.state = State::Lf2;
                    } else {
                        let digit = match c {
                            b'0'..=b'9' => c - b'0',
                            b'A'..=b'F' => c - b'A' + 10,
                            b'a'..=b'f' => c - b'a' + 10,
                            _ => return (Outcome::Malformed, write),
                        };
                        self.chunk_bytes_left = (self.chunk_bytes_left << 4) + digit as i64;
                        read += 1;
                    }
                }
                State::Lf2 => {
                    if buf[read] != b'\n' {
                        return (Outcome::Malformed, write);
                    }
                    read += 1;
                    if !self.monitor_only {
                        buf.copy_within(read..end, write);
                        end -= read - write;
                        read = write;
                    }
                    self.state = State::Data;
                }
            }
        }

        (Outcome::NeedMore, if self.monitor_only { read } else { write })
    }
}
