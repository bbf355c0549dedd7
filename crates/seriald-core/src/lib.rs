//! seriald Core - Configuration model shared by the daemon and its CLI
//!
//! This crate provides:
//! - `config` - the typed `DaemonConfig` with name-derived defaults
//! - `store` - the reloadable key/value configuration file parser
//! - `encoding` - text encodings used on the socket and serial sides
//! - `error` - file-access and configuration error types
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod encoding;
pub mod error;
pub mod store;

// Re-exports for convenience
pub use config::{
    DaemonConfig, DataBits, DetachSettings, FlowControl, Parity, SerialSettings, SettingsError,
    StopBits, DEFAULT_BAUD_RATE, DEFAULT_DATA_LENGTH, DEFAULT_SOCKET_PORT,
};
pub use encoding::{DataEncoding, EncodingError};
pub use error::{FileAccessError, FileAccessKind, FileAction, EXIT_FILE_ACCESS};
pub use store::{ConfigIssue, ConfigKey, ConfigStore, LoadReport, StoreError};
