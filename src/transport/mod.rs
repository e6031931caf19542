//! Polymorphic transport: a UNIX domain socket or a half-duplex serial line,
//! behind one small trait.
//!
//! Modeled as a capability with three operations (`send`, `recv`,
//! `on_direction_change`) rather than a class hierarchy. The socket
//! implementation leaves `on_direction_change` inert; the serial
//! implementation uses it to enforce the transceiver turnaround delay.

mod serial;
mod unix;

pub use serial::SerialTransport;
pub use unix::UnixSocketTransport;

use crate::error::BridgeError;
use std::path::Path;
use std::time::Duration;

/// How long a transport will wait for a direction change on the remote
/// serial line before moving bytes, and how long a `recv` call will wait
/// for at least one byte before surfacing [`BridgeError::Timeout`].
pub const SWAP_DELAY: Duration = Duration::from_millis(100);

/// Direction of the last byte transferred on a half-duplex line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// No direction established yet.
    Undecided,
    /// Last transfer was a receive.
    In,
    /// Last transfer was a send.
    Out,
}

/// A bidirectional byte channel to the remote terminal.
///
/// `recv` blocks until at least one byte is available, the peer closes
/// (returned as `Ok(vec![])`), or `timeout` elapses with nothing to read
/// (returned as `Err(BridgeError::Timeout)`).
pub trait Transport {
    /// Send `data` verbatim to the remote.
    fn send(&mut self, data: &[u8]) -> Result<(), BridgeError>;

    /// Receive up to `max` bytes. Returns fewer than `max` if that's all
    /// that's currently available; never blocks past the transport's
    /// configured watchdog timeout.
    fn recv(&mut self, max: usize) -> Result<Vec<u8>, BridgeError>;

    /// Called once before each logical send or receive so a half-duplex
    /// transport can pay its turnaround penalty on a direction change.
    /// Inert for transports without a direction concept.
    fn on_direction_change(&mut self, direction: Direction);
}

/// Either transport variant, behind one type so the bridge loop doesn't
/// need to be generic or reach for a trait object. Avoids a class
/// hierarchy: this is the "tagged enum" the transport is modeled as.
pub enum AnyTransport {
    Unix(UnixSocketTransport),
    Serial(SerialTransport),
}

impl Transport for AnyTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        match self {
            AnyTransport::Unix(t) => t.send(data),
            AnyTransport::Serial(t) => t.send(data),
        }
    }

    fn recv(&mut self, max: usize) -> Result<Vec<u8>, BridgeError> {
        match self {
            AnyTransport::Unix(t) => t.recv(max),
            AnyTransport::Serial(t) => t.recv(max),
        }
    }

    fn on_direction_change(&mut self, direction: Direction) {
        match self {
            AnyTransport::Unix(t) => t.on_direction_change(direction),
            AnyTransport::Serial(t) => t.on_direction_change(direction),
        }
    }
}

/// Pick a transport for `path` the way §6 describes: an existing character
/// device opens as serial, an existing socket inode is removed and
/// relistened, and a nonexistent path is created and listened on as a
/// fresh socket.
pub fn open(path: &Path, io_timeout: Duration) -> Result<AnyTransport, BridgeError> {
    use std::os::unix::fs::FileTypeExt;

    let is_char_device = std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_char_device())
        .unwrap_or(false);

    if is_char_device {
        log::info!("opening {} as a serial line", path.display());
        Ok(AnyTransport::Serial(SerialTransport::open(path, io_timeout)?))
    } else {
        log::info!("listening on {} as a UNIX domain socket", path.display());
        Ok(AnyTransport::Unix(UnixSocketTransport::bind_and_accept(path, io_timeout)?))
    }
}
