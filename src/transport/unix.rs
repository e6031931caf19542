//! UNIX domain socket transport.
//!
//! For a path `P`: if `P` already exists and names a socket, it is removed;
//! a stream-oriented local socket is bound, listened on with a backlog of
//! one, and the first connection accepted becomes the transport. No
//! direction bookkeeping is needed — a connected stream socket is already
//! full duplex, so `on_direction_change` is a no-op.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::time::Duration;

use crate::error::BridgeError;
use crate::transport::{Direction, Transport};

/// An accepted UNIX domain socket connection, used as the bridge transport.
pub struct UnixSocketTransport {
    stream: UnixStream,
}

impl UnixSocketTransport {
    /// Remove a stale socket inode at `path` if present, bind, listen with
    /// backlog 1, and block until one peer connects.
    pub fn bind_and_accept(path: &Path, io_timeout: Duration) -> Result<Self, BridgeError> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        let (stream, _addr) = listener.accept()?;

        stream.set_read_timeout(Some(io_timeout))?;
        stream.set_write_timeout(Some(io_timeout))?;

        Ok(Self { stream })
    }
}

impl Transport for UnixSocketTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        self.stream.write_all(data)?;
        Ok(())
    }

    fn recv(&mut self, max: usize) -> Result<Vec<u8>, BridgeError> {
        let mut buf = vec![0u8; max];
        match self.stream.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if is_timeout(&e) => Err(BridgeError::Timeout),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }

    fn on_direction_change(&mut self, _direction: Direction) {
        // A connected stream socket carries both directions simultaneously;
        // there is no turnaround penalty to pay.
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
}
