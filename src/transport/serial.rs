//! Serial line transport: an RS-232 connection with hardware (RTS/CTS) flow
//! control, modeling a physical transceiver that must electrically turn
//! around between directions.
//!
//! Baud rate is set out-of-band (by whatever configured the line before
//! handing us the path); we only put the line into raw mode and enable
//! `CRTSCTS`.

use std::os::unix::io::RawFd;
use std::path::Path;
use std::thread;
use std::time::Duration;

use nix::fcntl::{open, OFlag};
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, SetArg};
use nix::unistd::{close, read, write};

use crate::error::BridgeError;
use crate::transport::{Direction, SWAP_DELAY, Transport};

/// An opened serial character device, used as the bridge transport.
pub struct SerialTransport {
    fd: RawFd,
    last_direction: Direction,
    io_timeout: Duration,
}

impl SerialTransport {
    /// Open `path` with RTS/CTS hardware flow control enabled at the
    /// platform-default raw line settings.
    pub fn open(path: &Path, io_timeout: Duration) -> Result<Self, BridgeError> {
        let fd = open(path, OFlag::O_RDWR | OFlag::O_NOCTTY, Mode::empty())?;

        let mut attrs = termios::tcgetattr(fd)?;
        termios::cfmakeraw(&mut attrs);
        attrs.control_flags.insert(termios::ControlFlags::CRTSCTS);
        termios::tcsetattr(fd, SetArg::TCSANOW, &attrs)?;

        Ok(Self {
            fd,
            last_direction: Direction::Undecided,
            io_timeout,
        })
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, data: &[u8]) -> Result<(), BridgeError> {
        let mut written = 0;
        while written < data.len() {
            written += write(self.fd, &data[written..])?;
        }
        Ok(())
    }

    fn recv(&mut self, max: usize) -> Result<Vec<u8>, BridgeError> {
        let mut pollfds = [PollFd::new(self.fd, PollFlags::POLLIN)];
        let ready = poll(&mut pollfds, self.io_timeout.as_millis() as i32)?;
        if ready == 0 {
            return Err(BridgeError::Timeout);
        }

        let mut buf = vec![0u8; max];
        let n = read(self.fd, &mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    fn on_direction_change(&mut self, direction: Direction) {
        if self.last_direction != direction {
            thread::sleep(SWAP_DELAY);
            self.last_direction = direction;
        }
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        let _ = close(self.fd);
    }
}
