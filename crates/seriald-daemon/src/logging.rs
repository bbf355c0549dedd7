//! Log file setup.
//!
//! Logs go through one global `tracing` subscriber whose writer points at
//! the currently open log file. Closing the log detaches the file; events
//! logged afterwards go to stderr. `RUST_LOG` overrides the default
//! filter, e.g. `RUST_LOG=seriald_daemon=debug`.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use seriald_core::{FileAccessError, FileAction};
use tracing::{debug, info};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "seriald_daemon=info,seriald_core=info,seriald_protocol=info";

static TARGET: OnceLock<LogTarget> = OnceLock::new();

/// Where the global subscriber writes: the attached file, else stderr.
#[derive(Debug, Clone, Default)]
struct LogTarget {
    file: Arc<RwLock<Option<Arc<File>>>>,
}

impl LogTarget {
    fn global() -> &'static LogTarget {
        TARGET.get_or_init(LogTarget::default)
    }

    fn attach(&self, file: Arc<File>) {
        if let Ok(mut slot) = self.file.write() {
            *slot = Some(file);
        }
    }

    /// Detaches `file` unless another log has been opened since.
    fn detach(&self, file: &Arc<File>) {
        if let Ok(mut slot) = self.file.write() {
            if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, file)) {
                *slot = None;
            }
        }
    }

    fn current(&self) -> Option<Arc<File>> {
        self.file.read().ok().and_then(|slot| slot.clone())
    }
}

/// Writer handed out per event.
pub struct LogWriter {
    file: Option<Arc<File>>,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.file {
            Some(file) => {
                let mut file: &File = file;
                file.write(buf)
            }
            None => io::stderr().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &self.file {
            Some(file) => {
                let mut file: &File = file;
                file.flush()
            }
            None => io::stderr().flush(),
        }
    }
}

impl<'a> MakeWriter<'a> for LogTarget {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            file: self.current(),
        }
    }
}

/// An open log file.
#[derive(Debug)]
pub struct LogHandle {
    ident: String,
    path: PathBuf,
    file: Arc<File>,
}

impl LogHandle {
    pub fn ident(&self) -> &str {
        &self.ident
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes the file to disk and detaches it from the subscriber. The
    /// file is closed once the last in-flight event releases it.
    pub fn close(self) {
        info!(ident = %self.ident, "Closing log");
        if let Err(e) = self.file.sync_all() {
            debug!(error = %e, "Failed to sync log file");
        }
        LogTarget::global().detach(&self.file);
    }
}

/// Opens `path` for appending and routes logs to it.
///
/// The global subscriber is installed on first use; later calls retarget
/// it to the new file.
pub fn open(ident: &str, path: &Path) -> Result<LogHandle, FileAccessError> {
    let file = Arc::new(open_append(path)?);

    let target = LogTarget::global();
    target.attach(Arc::clone(&file));
    install(target);
    info!(ident, log_file = %path.display(), "Log opened");

    Ok(LogHandle {
        ident: ident.to_string(),
        path: path.to_path_buf(),
        file,
    })
}

/// Routes logs to stderr; used when the log file itself cannot be opened.
pub fn open_stderr() {
    install(LogTarget::global());
}

/// Opens `path` for appending, creating it if needed.
pub fn open_append(path: &Path) -> Result<File, FileAccessError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| FileAccessError::classify(path, FileAction::Write, e))
}

fn install(target: &LogTarget) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_ansi(false)
        .with_writer(target.clone())
        .try_init()
        .is_ok();

    if installed {
        debug!("Global subscriber installed");
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
