//! Reloadable key/value configuration file.
//!
//! The file is line oriented:
//!
//! ```text
//! # comment
//! socket-port = 57001
//! Socket_Host   "127.0.0.1"
//! data-length = '2048'   # trailing comments are ignored
//! ```
//!
//! Option names are case-insensitive and `-`/`_` are interchangeable. The
//! `=` is optional and values may be wrapped in single or double quotes.
//! Parsing is best effort: a bad line is reported and skipped, and a bad
//! value leaves the previous setting untouched.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tracing::{error, info};

use crate::config::DaemonConfig;
use crate::encoding::DataEncoding;
use crate::error::{FileAccessError, FileAction};

const LINE_PATTERN: &str = concat!(
    r#"(?i)^\s*(?P<option>data[-_]length|data[-_]encoding|socket[-_]port|socket[-_]host|pidfile[-_]path)"#,
    r#"\s*(?:=\s*)?"#,
    r#"(?:"(?P<dq>[^"]+)"|'(?P<sq>[^']+)'|(?P<bare>[^#\r\n]+))"#,
);

/// A setting that may appear in the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    SocketPort,
    SocketHost,
    DataLength,
    DataEncoding,
    PidfilePath,
}

impl ConfigKey {
    /// Resolves an option name as written in the file.
    pub fn from_option(option: &str) -> Option<Self> {
        match option.to_ascii_lowercase().replace('_', "-").as_str() {
            "socket-port" => Some(ConfigKey::SocketPort),
            "socket-host" => Some(ConfigKey::SocketHost),
            "data-length" => Some(ConfigKey::DataLength),
            "data-encoding" => Some(ConfigKey::DataEncoding),
            "pidfile-path" => Some(ConfigKey::PidfilePath),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKey::SocketPort => "socket-port",
            ConfigKey::SocketHost => "socket-host",
            ConfigKey::DataLength => "data-length",
            ConfigKey::DataEncoding => "data-encoding",
            ConfigKey::PidfilePath => "pidfile-path",
        }
    }

    /// Whether a reloaded value only takes effect after a restart.
    pub fn requires_restart(&self) -> bool {
        matches!(
            self,
            ConfigKey::SocketPort | ConfigKey::SocketHost | ConfigKey::PidfilePath
        )
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A problem found on one line of the configuration file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigIssue {
    #[error("{}: Invalid syntax at line {line}", .path.display())]
    InvalidSyntax { path: PathBuf, line: usize },

    #[error("{}: Invalid value for {key} at line {line}: {value:?}", .path.display())]
    InvalidValue {
        path: PathBuf,
        line: usize,
        key: ConfigKey,
        value: String,
    },
}

impl ConfigIssue {
    pub fn line(&self) -> usize {
        match self {
            ConfigIssue::InvalidSyntax { line, .. } | ConfigIssue::InvalidValue { line, .. } => {
                *line
            }
        }
    }
}

/// Outcome of one configuration load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub path: PathBuf,
    /// Keys whose value was applied, in file order
    pub applied: Vec<ConfigKey>,
    pub issues: Vec<ConfigIssue>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Parser for the daemon configuration file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    pattern: Regex,
}

impl ConfigStore {
    pub fn new() -> Result<Self, StoreError> {
        Ok(Self {
            pattern: Regex::new(LINE_PATTERN)?,
        })
    }

    /// Loads `config.config_file` into `config`.
    ///
    /// Returns `Ok(None)` when no configuration file is set. A file that
    /// cannot be read is returned as a classified error and leaves `config`
    /// unchanged; callers log it and carry on with the current values.
    pub fn load(&self, config: &mut DaemonConfig) -> Result<Option<LoadReport>, FileAccessError> {
        let Some(path) = config.config_file.clone() else {
            return Ok(None);
        };

        let contents = fs::read_to_string(&path)
            .map_err(|e| FileAccessError::classify(&path, FileAction::Read, e))?;

        let report = self.apply(config, &contents, &path);
        info!(config = %path.display(), applied = report.applied.len(), "Configuration loaded");
        Ok(Some(report))
    }

    /// Applies configuration text to `config`, logging every issue.
    pub fn apply(&self, config: &mut DaemonConfig, contents: &str, path: &Path) -> LoadReport {
        let mut report = LoadReport {
            path: path.to_path_buf(),
            applied: Vec::new(),
            issues: Vec::new(),
        };

        for (index, raw_line) in contents.lines().enumerate() {
            let line_number = index + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = self.match_line(line) else {
                let issue = ConfigIssue::InvalidSyntax {
                    path: path.to_path_buf(),
                    line: line_number,
                };
                error!("{issue}");
                report.issues.push(issue);
                continue;
            };

            if apply_value(config, key, value) {
                report.applied.push(key);
            } else {
                let issue = ConfigIssue::InvalidValue {
                    path: path.to_path_buf(),
                    line: line_number,
                    key,
                    value: value.to_string(),
                };
                error!("{issue}");
                report.issues.push(issue);
            }
        }

        report
    }

    fn match_line<'l>(&self, line: &'l str) -> Option<(ConfigKey, &'l str)> {
        let captures = self.pattern.captures(line)?;
        let key = ConfigKey::from_option(captures.name("option")?.as_str())?;

        let value = captures
            .name("dq")
            .or_else(|| captures.name("sq"))
            .map(|m| m.as_str())
            .or_else(|| captures.name("bare").map(|m| m.as_str().trim()))?;

        Some((key, value))
    }
}

/// Errors constructing a [`ConfigStore`].
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid configuration line pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Stores `value` under `key`; returns false when the value is rejected.
fn apply_value(config: &mut DaemonConfig, key: ConfigKey, value: &str) -> bool {
    match key {
        ConfigKey::SocketHost => {
            config.socket_host = value.to_string();
            true
        }
        ConfigKey::PidfilePath => {
            config.pidfile_path = PathBuf::from(value);
            true
        }
        ConfigKey::DataEncoding => match value.parse::<DataEncoding>() {
            Ok(encoding) => {
                config.data_encoding = encoding;
                true
            }
            Err(_) => false,
        },
        ConfigKey::SocketPort => match positive(value).and_then(|n| u16::try_from(n).ok()) {
            Some(port) => {
                config.socket_port = port;
                true
            }
            None => false,
        },
        ConfigKey::DataLength => match positive(value).and_then(|n| usize::try_from(n).ok()) {
            Some(length) => {
                config.data_length = length;
                true
            }
            None => false,
        },
    }
}

fn positive(value: &str) -> Option<u64> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|n| *n > 0)
        .and_then(|n| u64::try_from(n).ok())
}
