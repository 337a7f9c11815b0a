//! Engine tuning knobs: buffer sizing, heartbeat cadence, and the
//! drain-deadline multiplier.
//!
//! # Memory Consumption
//!
//! Each connection owns one fixed-size receive buffer
//! ([`EngineLimits::buffer_size`]); nothing else scales per-connection.
//! Total engine memory is therefore `num_connections * buffer_size` plus a
//! small, constant per-worker counter block.
//!
//! # Examples
//!
//! ```ignore
//! use crate::limits::EngineLimits;
//! use std::time::Duration;
//!
//! let limits = EngineLimits {
//!     heartbeat_interval: Duration::from_millis(50),
//!     ..EngineLimits::default()
//! };
//! ```

use std::time::Duration;

/// Tuning for the per-worker reactor: buffer size, heartbeat cadence, and
/// the drain deadline multiplier.
#[derive(Debug, Clone)]
pub(crate) struct EngineLimits {
    /// Size in bytes of each connection's receive buffer (default: `32 KiB`).
    ///
    /// Must be large enough to hold the full response header block; headers
    /// that don't terminate within this many bytes are treated as a framing
    /// error (see [`crate::engine`] state machine docs).
    pub buffer_size: usize,

    /// How often the worker's heartbeat checks the global stop condition
    /// (default: `100ms`).
    pub heartbeat_interval: Duration,

    /// Multiplier applied to `avg_req_time` to compute the per-connection
    /// drain deadline once shutdown begins (default: `4.0`).
    pub drain_multiplier: f64,

    /// Fallback `avg_req_time` used when a worker has not yet completed a
    /// single request at shutdown time (default: `100ms`).
    pub avg_req_time_fallback: Duration,

    /// Upper bound clamp applied to the computed `avg_req_time` (default:
    /// `1s`).
    pub avg_req_time_max: Duration,

    #[doc(hidden)]
    pub _priv: (),
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            buffer_size: 32 * 1024,
            heartbeat_interval: Duration::from_millis(100),
            drain_multiplier: 4.0,
            avg_req_time_fallback: Duration::from_millis(100),
            avg_req_time_max: Duration::from_secs(1),
            _priv: (),
        }
    }
}

/// The global termination criterion for a run.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Mode {
    /// Run until `num_requests` initiations have been handed out.
    Count { num_requests: u64 },
    /// Run until `run_time` has elapsed since start.
    Time { run_time: Duration },
    /// Run forever; `more_requests_to_run` always returns `true`.
    Infinite,
}
