//! Daemon configuration model.
//!
//! A [`DaemonConfig`] is created with defaults derived from the daemon
//! name, overridden through the `with_*` builder methods, and finally
//! updated in place by [`crate::ConfigStore`] on every (re)load.
//!
//! Reload only changes stored values. The listening address
//! (`socket_host`, `socket_port`) and `pidfile_path` are consumed once at
//! startup, so a reloaded value for them is visible here but has no effect
//! until the daemon is restarted.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::encoding::DataEncoding;

/// Default TCP port the daemon listens on.
pub const DEFAULT_SOCKET_PORT: u16 = 57001;

/// Default number of bytes read from the socket per request.
pub const DEFAULT_DATA_LENGTH: usize = 1024;

/// Default serial baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Complete, typed configuration of one daemon instance.
#[derive(Debug, Clone, PartialEq)]
pub struct DaemonConfig {
    /// Ident used for logging and for the default file names
    pub name: String,

    /// Configuration file; `None` disables loading entirely
    pub config_file: Option<PathBuf>,

    /// Log file receiving daemon logs and fatal diagnostics
    pub log_file: PathBuf,

    /// Pidfile used for the single-instance check
    pub pidfile_path: PathBuf,

    /// Interface to listen on; empty means all interfaces
    pub socket_host: String,

    pub socket_port: u16,

    /// Maximum number of bytes read from the socket per request
    pub data_length: usize,

    pub data_encoding: DataEncoding,

    /// Only forward replies whose decoded length matches the request
    pub reply_length_strict: bool,

    pub serial: SerialSettings,

    pub detach: DetachSettings,
}

impl DaemonConfig {
    /// Creates a configuration with every default derived from `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            config_file: Some(PathBuf::from(format!("/etc/{name}.conf"))),
            log_file: env::temp_dir().join(format!("{name}.log")),
            pidfile_path: PathBuf::from(format!("/var/run/{name}.pid")),
            socket_host: String::new(),
            socket_port: DEFAULT_SOCKET_PORT,
            data_length: DEFAULT_DATA_LENGTH,
            data_encoding: DataEncoding::default(),
            reply_length_strict: false,
            serial: SerialSettings::default(),
            detach: DetachSettings::default(),
            name,
        }
    }

    pub fn with_config_file(mut self, path: Option<PathBuf>) -> Self {
        self.config_file = path;
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = path.into();
        self
    }

    pub fn with_pidfile_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pidfile_path = path.into();
        self
    }

    pub fn with_socket_host(mut self, host: impl Into<String>) -> Self {
        self.socket_host = host.into();
        self
    }

    pub fn with_socket_port(mut self, port: u16) -> Self {
        self.socket_port = port;
        self
    }

    pub fn with_data_length(mut self, length: usize) -> Self {
        self.data_length = length;
        self
    }

    pub fn with_data_encoding(mut self, encoding: DataEncoding) -> Self {
        self.data_encoding = encoding;
        self
    }

    pub fn with_reply_length_strict(mut self, strict: bool) -> Self {
        self.reply_length_strict = strict;
        self
    }

    pub fn with_serial(mut self, serial: SerialSettings) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_detach(mut self, detach: DetachSettings) -> Self {
        self.detach = detach;
        self
    }

    /// Host part of the listening address, with "" mapped to all interfaces.
    pub fn bind_host(&self) -> &str {
        if self.socket_host.is_empty() {
            "0.0.0.0"
        } else {
            &self.socket_host
        }
    }

    /// Checks the values that cannot be expressed by the field types alone.
    ///
    /// Serial settings are validated separately by the channel that uses
    /// them.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.data_length == 0 {
            return Err(SettingsError::NonPositive { field: "data_length" });
        }
        Ok(())
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self::new("seriald")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    #[default]
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    #[default]
    None,
    Software,
    Hardware,
}

/// Settings handed to the serial driver when the channel is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialSettings {
    /// Device path, e.g. `/dev/ttyUSB0`
    pub device: Option<String>,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Read timeout; `None` blocks until the requested bytes arrive
    pub timeout: Option<Duration>,
}

impl SerialSettings {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: Some(device.into()),
            ..Self::default()
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        match self.device.as_deref() {
            None | Some("") => return Err(SettingsError::MissingSerialDevice),
            Some(_) => {}
        }
        if self.baud_rate == 0 {
            return Err(SettingsError::NonPositive { field: "baud_rate" });
        }
        Ok(())
    }
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            device: None,
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            flow_control: FlowControl::default(),
            timeout: None,
        }
    }
}

/// How the process detaches from its controlling terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachSettings {
    /// Fork into the background; `false` keeps the daemon in the foreground
    pub detach: bool,
    pub working_directory: PathBuf,
    pub umask: u32,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl DetachSettings {
    /// Settings for running attached to the current terminal.
    pub fn foreground() -> Self {
        Self {
            detach: false,
            ..Self::default()
        }
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }
}

impl Default for DetachSettings {
    fn default() -> Self {
        Self {
            detach: true,
            working_directory: PathBuf::from("/"),
            umask: 0o022,
            user: None,
            group: None,
        }
    }
}

/// Invalid combinations of configuration values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{field} must be a positive number")]
    NonPositive { field: &'static str },

    #[error("No serial device configured")]
    MissingSerialDevice,
}
