//! seriald - TCP to serial bridge daemon
//!
//! Accepts one TCP client at a time and relays its requests to a serial
//! device, returning the device's replies.
//!
//! # Usage
//!
//! ```bash
//! # Start in the background
//! seriald start --serial-port /dev/ttyUSB0
//!
//! # Start in the foreground on a custom port
//! seriald start -f --serial-port /dev/ttyUSB0 --port 6000
//!
//! # Re-read the configuration file
//! seriald reload
//!
//! # Stop the daemon
//! seriald stop
//!
//! # Check daemon status
//! seriald status
//! ```

use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;

use seriald_core::{ConfigStore, DaemonConfig, DataEncoding, DetachSettings, SerialSettings};
use seriald_daemon::pidfile::{self, PidfileLock};
use seriald_daemon::{LifecycleManager, SerialPortChannel, StartOutcome};

/// How long `stop` waits for the daemon to exit
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between liveness checks while stopping
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// seriald - bridge a TCP socket to a serial device
#[derive(Parser, Debug)]
#[command(name = "seriald", version, about)]
struct Cli {
    /// Daemon name; default file locations derive from it
    #[arg(short, long, global = true, default_value = "seriald")]
    name: String,

    /// Configuration file [default: /etc/<name>.conf]
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Pidfile path [default: /var/run/<name>.pid]
    #[arg(long, global = true)]
    pidfile: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start(StartArgs),
    /// Stop the running daemon
    Stop,
    /// Stop the running daemon, then start a new one
    Restart(StartArgs),
    /// Ask the running daemon to re-read its configuration file
    Reload,
    /// Show daemon status
    Status,
}

#[derive(Args, Debug)]
struct StartArgs {
    /// Stay attached to the terminal
    #[arg(short, long)]
    foreground: bool,

    /// Serial device, e.g. /dev/ttyUSB0
    #[arg(short, long)]
    serial_port: Option<String>,

    /// Serial baud rate
    #[arg(short, long, default_value_t = seriald_core::DEFAULT_BAUD_RATE)]
    baud_rate: u32,

    /// Serial read timeout in milliseconds; unset blocks until the reply arrives
    #[arg(long)]
    read_timeout: Option<u64>,

    /// Address to listen on [default: all interfaces]
    #[arg(long)]
    host: Option<String>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum bytes read from the socket per request
    #[arg(long)]
    data_length: Option<usize>,

    /// Text encoding of socket and serial data (utf-8, ascii, latin-1)
    #[arg(long)]
    encoding: Option<DataEncoding>,

    /// Drop replies shorter than the requested length
    #[arg(long)]
    reply_length_strict: bool,

    /// Log file [default: <tmpdir>/<name>.log]
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Configuration shared by every subcommand.
fn base_config(cli: &Cli) -> DaemonConfig {
    let mut config = DaemonConfig::new(cli.name.as_str());
    if let Some(path) = &cli.config {
        config = config.with_config_file(Some(path.clone()));
    }
    if let Some(path) = &cli.pidfile {
        config = config.with_pidfile_path(path);
    }
    config
}

/// Configuration for commands that talk to a running daemon.
///
/// The file may move the pidfile, so it is read first; `--pidfile` wins.
fn control_config(cli: &Cli) -> Result<DaemonConfig> {
    let mut config = base_config(cli);
    let store = ConfigStore::new().context("Failed to build configuration parser")?;
    if let Err(e) = store.load(&mut config) {
        debug!(error = %e, "Configuration file not loaded");
    }
    if let Some(path) = &cli.pidfile {
        config = config.with_pidfile_path(path);
    }
    Ok(config)
}

fn start_config(cli: &Cli, args: &StartArgs) -> DaemonConfig {
    let mut serial = match &args.serial_port {
        Some(device) => SerialSettings::new(device.as_str()),
        None => SerialSettings::default(),
    };
    serial = serial
        .with_baud_rate(args.baud_rate)
        .with_timeout(args.read_timeout.map(Duration::from_millis));

    let mut config = base_config(cli)
        .with_serial(serial)
        .with_reply_length_strict(args.reply_length_strict);

    if args.foreground {
        config = config.with_detach(DetachSettings::foreground());
    }
    if let Some(host) = &args.host {
        config = config.with_socket_host(host.as_str());
    }
    if let Some(port) = args.port {
        config = config.with_socket_port(port);
    }
    if let Some(length) = args.data_length {
        config = config.with_data_length(length);
    }
    if let Some(encoding) = args.encoding {
        config = config.with_data_encoding(encoding);
    }
    if let Some(path) = &args.log_file {
        config = config.with_log_file(path);
    }
    config
}

fn start(cli: &Cli, args: &StartArgs) -> Result<()> {
    let config = start_config(cli, args);
    let name = config.name.clone();

    let serial = SerialPortChannel::new(config.serial.clone()).context("Invalid serial settings")?;
    let mut manager = LifecycleManager::new(config, serial).context("Invalid configuration")?;

    match manager.start() {
        Ok(StartOutcome::AlreadyRunning { pid }) => {
            eprintln!("{name} is already running (PID {pid})");
            eprintln!("Use 'seriald stop' to stop it first.");
            Ok(())
        }
        Ok(StartOutcome::Stopped(cause)) => {
            debug!(cause = %cause, "Daemon stopped");
            Ok(())
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(e.exit_code());
        }
    }
}

/// Sends SIGTERM and waits for the process to go away.
fn stop(config: &DaemonConfig) -> Result<bool> {
    let lock = PidfileLock::new(&config.pidfile_path);
    let Some(pid) = lock.live_owner() else {
        return Ok(false);
    };

    pidfile::send_signal(pid, libc::SIGTERM)
        .with_context(|| format!("Failed to send SIGTERM to process {pid}"))?;

    let start = Instant::now();
    while pidfile::is_process_alive(pid) {
        if start.elapsed() >= STOP_TIMEOUT {
            bail!("Process {pid} did not exit within {STOP_TIMEOUT:?}");
        }
        thread::sleep(STOP_POLL_INTERVAL);
    }
    Ok(true)
}

fn reload(config: &DaemonConfig) -> Result<bool> {
    let lock = PidfileLock::new(&config.pidfile_path);
    let Some(pid) = lock.live_owner() else {
        return Ok(false);
    };
    pidfile::send_signal(pid, libc::SIGHUP)
        .with_context(|| format!("Failed to send SIGHUP to process {pid}"))?;
    Ok(true)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Command::Start(args) => start(&cli, args),
        Command::Stop => {
            let config = control_config(&cli)?;
            if stop(&config)? {
                println!("{} stopped", config.name);
                Ok(())
            } else {
                eprintln!("{} is not running", config.name);
                process::exit(1);
            }
        }
        Command::Restart(args) => {
            let config = control_config(&cli)?;
            if stop(&config)? {
                println!("{} stopped", config.name);
            }
            start(&cli, args)
        }
        Command::Reload => {
            let config = control_config(&cli)?;
            if reload(&config)? {
                println!("Reload requested");
                Ok(())
            } else {
                eprintln!("{} is not running", config.name);
                process::exit(1);
            }
        }
        Command::Status => {
            let config = control_config(&cli)?;
            let lock = PidfileLock::new(&config.pidfile_path);
            match lock.live_owner() {
                Some(pid) => {
                    println!("{} is running (PID {pid})", config.name);
                    println!("Pidfile: {}", lock.path().display());
                    Ok(())
                }
                None => {
                    println!("{} is not running", config.name);
                    process::exit(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_args_override_defaults() {
        let cli = Cli::parse_from([
            "seriald",
            "--name",
            "bridge",
            "start",
            "-f",
            "--serial-port",
            "/dev/ttyUSB0",
            "--port",
            "6000",
            "--encoding",
            "latin-1",
        ]);
        let Command::Start(args) = &cli.command else {
            panic!("expected start");
        };

        let config = start_config(&cli, args);
        assert_eq!(config.name, "bridge");
        assert_eq!(config.socket_port, 6000);
        assert_eq!(config.data_encoding, DataEncoding::Latin1);
        assert_eq!(config.serial.device.as_deref(), Some("/dev/ttyUSB0"));
        assert!(!config.detach.detach);
        assert_eq!(config.pidfile_path, PathBuf::from("/var/run/bridge.pid"));
    }

    #[test]
    fn test_global_pidfile_after_subcommand() {
        let cli = Cli::parse_from(["seriald", "status", "--pidfile", "/tmp/x.pid"]);
        assert_eq!(base_config(&cli).pidfile_path, PathBuf::from("/tmp/x.pid"));
    }
}
