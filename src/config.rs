//! Resolved constants the bridge runs with.
//!
//! The wire/timing constants (`BUFSIZE`, `IO_TIMEOUT`, `SWAP_DELAY`, PTY
//! geometry) live in one place so tests can override them without
//! touching the bridge state machine itself.

use std::time::Duration;

/// Maximum payload bytes per `SEND_PTY` frame.
pub const BUFSIZE: usize = 92;

/// Watchdog deadline armed around every request/response round-trip.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Window size set on the PTY master: a deliberate small geometry chosen
/// to match the remote renderer.
pub const WINDOW_ROWS: u16 = 24;
pub const WINDOW_COLS: u16 = 51;

/// Default `TERM` advertised to the forked shell when `--terminal` is
/// omitted.
pub const DEFAULT_TERMINAL: &str = "vt52";

/// Constants the bridge loop and PTY attach consult, gathered in one place
/// so a test can shrink `io_timeout` or `swap_delay` without threading an
/// override through every call site.
#[derive(Debug, Clone, Copy)]
pub struct BridgeConfig {
    pub bufsize: usize,
    pub io_timeout: Duration,
    pub swap_delay: Duration,
    pub window_rows: u16,
    pub window_cols: u16,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bufsize: BUFSIZE,
            io_timeout: IO_TIMEOUT,
            swap_delay: crate::transport::SWAP_DELAY,
            window_rows: WINDOW_ROWS,
            window_cols: WINDOW_COLS,
        }
    }
}
