//! Error taxonomy for the bridge core.
//!
//! Mirrors the four error kinds the bridge loop distinguishes: a transport
//! fault, a PTY fault, a watchdog that ran out its one graceful recovery,
//! and a clean remote close. Protocol mismatches (an unexpected response
//! tag) are deliberately *not* an error variant here — per the wire
//! contract they degrade to an empty result instead of failing.

use std::io;

/// Errors that can terminate the bridge loop.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A transport-level I/O error (socket or serial line).
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// The remote closed the connection (zero-length receive).
    #[error("remote closed the connection")]
    Eof,

    /// No bytes arrived from the remote within the watchdog window.
    ///
    /// Not inherently fatal: the bridge loop gets one graceful recovery
    /// attempt (a `GET_CAPS` probe) before escalating this to
    /// [`BridgeError::WatchdogExhausted`].
    #[error("transport timed out waiting for the remote")]
    Timeout,

    /// A watchdog timeout occurred with no graceful recovery remaining.
    #[error("watchdog expired with no recovery window left")]
    WatchdogExhausted,

    /// An I/O error on the PTY master (including a short write that could
    /// not be completed after retrying from the unwritten offset).
    #[error("pty I/O error: {0}")]
    Pty(io::Error),
}

impl From<nix::Error> for BridgeError {
    fn from(e: nix::Error) -> Self {
        BridgeError::Io(io::Error::from(e))
    }
}

impl BridgeError {
    /// Process exit code this error should surface as, per the CLI contract:
    /// 0 only on a clean graceful shutdown, nonzero otherwise.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeError::Io(_) | BridgeError::Eof => 1,
            BridgeError::Timeout => 1,
            BridgeError::WatchdogExhausted => 2,
            BridgeError::Pty(_) => 3,
        }
    }
}
