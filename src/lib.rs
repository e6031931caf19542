//! Host-side terminal bridge core.
//!
//! Drives a local PTY running a shell and multiplexes it over a
//! half-duplex, SLIP-framed channel to a remote terminal that polls the
//! host for screen updates and delivers keystrokes. See each module for
//! its slice of the wire protocol / event loop; `main` wires them
//! together with the CLI surface, spawning, and logging.

pub mod bridge;
pub mod config;
pub mod error;
pub mod framer;
pub mod protocol;
pub mod pty;
pub mod spawn;
pub mod transport;
