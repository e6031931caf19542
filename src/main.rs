//! `uterm-bridge` binary entry point: CLI parsing, logging setup, and
//! assembling the core bridge from a chosen transport and a forked shell.
//!
//! The core (transport, framer, protocol, PTY I/O, bridge loop) lives in
//! the library crate; this binary is thin glue around it, per the spec's
//! own scoping (argument parsing, logging setup, spawning the shell, and
//! transport autodetection are named as external collaborators, not core
//! behavior).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use uterm_bridge::bridge::{self, Bridge};
use uterm_bridge::config::{BridgeConfig, DEFAULT_TERMINAL};
use uterm_bridge::protocol::Protocol;
use uterm_bridge::pty::PtyIo;
use uterm_bridge::spawn::ShellProcess;
use uterm_bridge::transport;

#[derive(Parser)]
#[command(name = "uterm-bridge")]
#[command(version)]
#[command(about = "Host-side terminal bridge: PTY <-> half-duplex SLIP channel to a remote terminal")]
struct Cli {
    /// Socket path or serial device to bridge over.
    #[arg(long = "device", short = 'D')]
    device: PathBuf,

    /// TERM advertised to the forked shell.
    #[arg(long = "terminal", default_value_t = DEFAULT_TERMINAL.to_string())]
    terminal: String,

    /// Send SIG_INT to the remote and exit, without forking a shell.
    #[arg(long = "reset", short = 'R')]
    reset: bool,

    /// Verbose (debug-level) logging.
    #[arg(long)]
    debug: bool,
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = BridgeConfig::default();

    if cli.reset {
        return run_reset(&cli.device, &config);
    }

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let exit_code = run_bridge(&cli.device, &cli.terminal, &shell, &config)?;
    std::process::exit(exit_code);
}

/// `--reset`: connect, deliver `SIG_INT`, exit. No shell is forked.
fn run_reset(device: &std::path::Path, config: &BridgeConfig) -> Result<()> {
    let conn = transport::open(device, config.io_timeout)
        .with_context(|| format!("opening {}", device.display()))?;
    let mut protocol = Protocol::new(conn);
    protocol.sig_int().context("sending SIG_INT")?;
    log::info!("sent SIG_INT to remote; exiting without forking a shell");
    Ok(())
}

/// Forks the shell, attaches the PTY, opens the transport, and runs the
/// bridge loop to completion. Returns the process exit code per §6.
fn run_bridge(
    device: &std::path::Path,
    terminal: &str,
    shell: &str,
    config: &BridgeConfig,
) -> Result<i32> {
    let (shutdown_requested, teardown_started) =
        bridge::install_signal_handlers().context("installing signal handlers")?;

    let shell_process = ShellProcess::spawn(shell, terminal).context("forking shell onto PTY")?;
    let pty = PtyIo::attach_with_size(shell_process.master_fd(), config.window_rows, config.window_cols)
        .context("attaching to PTY master")?;

    let conn = transport::open(device, config.io_timeout)
        .with_context(|| format!("opening {}", device.display()))?;

    let mut bridge = Bridge::new(conn, pty, *config, shutdown_requested, teardown_started);

    let result = bridge.run();
    shell_process.reap_nonblocking();

    match result {
        Ok(()) => {
            log::info!("bridge shut down gracefully");
            Ok(0)
        }
        Err(e) => {
            log::error!("bridge terminated: {e}");
            Ok(e.exit_code())
        }
    }
}
