//! Forks a shell onto a fresh PTY slave.
//!
//! This is the external collaborator the spec names but doesn't cover:
//! the core only ever consumes an already-forked PTY master fd. Kept as
//! its own module so `main` stays a thin assembly of glue plus the core.

use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::libc::{STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::pty::{openpty, OpenptyResult};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::{dup2, execvp, fork, setsid, ForkResult, Pid};

use crate::error::BridgeError;

/// A forked shell attached to a PTY master the core bridge can drive.
pub struct ShellProcess {
    pub master: OwnedFd,
    pub child: Pid,
}

impl ShellProcess {
    /// Fork `shell` onto a new PTY pair with `TERM=term_name` set in the
    /// child's environment, and become its session leader with the slave
    /// as controlling terminal.
    pub fn spawn(shell: &str, term_name: &str) -> Result<Self, BridgeError> {
        let OpenptyResult { master, slave } = openpty(None, None).map_err(std::io::Error::from)?;

        match unsafe { fork() }.map_err(std::io::Error::from)? {
            ForkResult::Child => {
                drop(master);
                exec_child(slave.as_raw_fd(), shell, term_name)
            }
            ForkResult::Parent { child } => {
                drop(slave);
                Ok(Self { master, child })
            }
        }
    }

    #[must_use]
    pub fn master_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }

    /// Reap the child if it has already exited, without blocking. Called
    /// on shutdown; the PTY master closing also causes the shell to exit,
    /// so this is a courtesy rather than a requirement for correctness.
    pub fn reap_nonblocking(&self) {
        let _ = waitpid(self.child, Some(WaitPidFlag::WNOHANG));
    }
}

/// Runs in the forked child: detach from the parent's session, make the
/// PTY slave the controlling terminal, wire it to stdio, and exec the
/// shell. Never returns — either `execvp` replaces the process image, or
/// this exits the child with a nonzero status.
fn exec_child(slave_fd: RawFd, shell: &str, term_name: &str) -> ! {
    let _ = setsid();
    unsafe {
        nix::libc::ioctl(slave_fd, nix::libc::TIOCSCTTY as _, 0);
    }

    for target in [STDIN_FILENO, STDOUT_FILENO, STDERR_FILENO] {
        if dup2(slave_fd, target).is_err() {
            std::process::exit(1);
        }
    }
    if slave_fd > STDERR_FILENO {
        drop(unsafe { OwnedFd::from_raw_fd(slave_fd) });
    }

    std::env::set_var("TERM", term_name);

    let shell_cstr = match CString::new(shell) {
        Ok(c) => c,
        Err(_) => std::process::exit(1),
    };
    let args = [shell_cstr.clone()];
    let _ = execvp(&shell_cstr, &args);
    std::process::exit(1)
}
