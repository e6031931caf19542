//! Nonblocking I/O against an already-forked PTY master file descriptor.
//!
//! The core never forks the child shell itself (that's external glue); it
//! only takes ownership of the master fd, puts it in nonblocking mode,
//! sets a fixed window size, and shuttles bytes between it and the two
//! bridge queues.

use std::collections::VecDeque;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::unistd::{read, write};

use crate::error::BridgeError;

/// Bytes read from the PTY in one readable-event dispatch.
const READ_CHUNK: usize = 2048;

#[repr(C)]
struct Winsize {
    ws_row: libc::c_ushort,
    ws_col: libc::c_ushort,
    ws_xpixel: libc::c_ushort,
    ws_ypixel: libc::c_ushort,
}

/// Owns the PTY master fd and the two byte queues that connect it to the
/// wire protocol.
pub struct PtyIo {
    fd: RawFd,
    /// Shell output awaiting transmission via `SEND_PTY`.
    pub outbound: VecDeque<u8>,
    /// Keystrokes received via `GET_KEYS`, awaiting injection into the shell.
    pub inbound: VecDeque<u8>,
}

impl PtyIo {
    /// Attach to an already-forked PTY master: set the window size, switch
    /// to nonblocking mode, and start with empty queues. Geometry comes
    /// from the caller's [`crate::config::BridgeConfig`].
    pub fn attach_with_size(fd: RawFd, rows: u16, cols: u16) -> Result<Self, BridgeError> {
        set_window_size(fd, rows, cols).map_err(BridgeError::Pty)?;
        set_nonblocking(fd)?;
        Ok(Self { fd, outbound: VecDeque::new(), inbound: VecDeque::new() })
    }

    /// The fd to register with the readiness poller.
    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Handle a readable event: read up to `READ_CHUNK` bytes and append
    /// whatever came back to the outbound queue. A would-block result
    /// (we raced the poll) is not an error; any other OS error is fatal.
    pub fn handle_readable(&mut self) -> Result<(), BridgeError> {
        let mut buf = [0u8; READ_CHUNK];
        let borrowed = unsafe { BorrowedFd::borrow_raw(self.fd) };
        match read(borrowed.as_raw_fd(), &mut buf) {
            Ok(n) => {
                self.outbound.extend(&buf[..n]);
                Ok(())
            }
            Err(nix::Error::EAGAIN) => Ok(()),
            Err(e) => Err(BridgeError::Pty(std::io::Error::from(e))),
        }
    }

    /// Handle a writable event: attempt to write the entire inbound queue
    /// in one gather. A short write retries from the unwritten offset on
    /// the next writable event rather than being treated as fatal.
    pub fn handle_writable(&mut self) -> Result<(), BridgeError> {
        if self.inbound.is_empty() {
            return Ok(());
        }

        let (front, back) = self.inbound.as_slices();
        let contiguous: Vec<u8> = if back.is_empty() {
            front.to_vec()
        } else {
            let mut v = Vec::with_capacity(front.len() + back.len());
            v.extend_from_slice(front);
            v.extend_from_slice(back);
            v
        };

        let borrowed = unsafe { BorrowedFd::borrow_raw(self.fd) };
        match write(borrowed.as_raw_fd(), &contiguous) {
            Ok(n) => {
                self.inbound.drain(..n);
                Ok(())
            }
            Err(nix::Error::EAGAIN) => Ok(()),
            Err(e) => Err(BridgeError::Pty(std::io::Error::from(e))),
        }
    }

    /// Copy at most `max` bytes from the head of the outbound queue without
    /// removing them. The caller drains the matching prefix with
    /// [`PtyIo::discard_outbound_prefix`] only once the chunk has actually
    /// been acked, so a timed-out send leaves the bytes queued for retry.
    #[must_use]
    pub fn peek_outbound_chunk(&self, max: usize) -> Vec<u8> {
        let n = self.outbound.len().min(max);
        self.outbound.iter().take(n).copied().collect()
    }

    /// Remove the first `n` bytes of the outbound queue (without a
    /// full-buffer copy-and-re-extend round trip) once they've been acked.
    pub fn discard_outbound_prefix(&mut self, n: usize) {
        self.outbound.drain(..n);
    }

    /// Wraps an already-nonblocking fd without the window-size ioctl,
    /// which only a real tty master accepts. Lets bridge-loop tests drive
    /// readiness against a plain socketpair standing in for the PTY.
    #[cfg(test)]
    pub(crate) fn for_test(fd: RawFd) -> Self {
        let _ = set_nonblocking(fd);
        Self { fd, outbound: VecDeque::new(), inbound: VecDeque::new() }
    }
}

fn set_nonblocking(fd: RawFd) -> Result<(), BridgeError> {
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let flags = OFlag::from_bits_truncate(fcntl(borrowed.as_raw_fd(), FcntlArg::F_GETFL)?);
    fcntl(borrowed.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;
    Ok(())
}

/// Sets the PTY window size via `TIOCSWINSZ`. No safe wrapper exists in
/// `nix` for an arbitrary window-size struct on all targets, so this one
/// ioctl call is unsafe: `fd` must be a valid, open PTY master descriptor
/// for the duration of the call, which `attach` guarantees.
fn set_window_size(fd: RawFd, rows: u16, cols: u16) -> Result<(), std::io::Error> {
    let size = Winsize { ws_row: rows, ws_col: cols, ws_xpixel: 0, ws_ypixel: 0 };
    let ret = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, std::ptr::addr_of!(size)) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
