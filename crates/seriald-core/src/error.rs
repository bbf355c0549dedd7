//! File-access error classification following panic-free policy.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Process exit status reserved for fatal file-access failures at startup.
pub const EXIT_FILE_ACCESS: i32 = 255;

/// What the daemon was trying to do with a file when access failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Read,
    Write,
}

impl FileAction {
    fn verb(self) -> &'static str {
        match self {
            FileAction::Read => "read",
            FileAction::Write => "write to",
        }
    }
}

/// Coarse classification of an I/O failure, used for log messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAccessKind {
    PermissionDenied,
    NotFound,
    Unknown,
}

impl From<io::ErrorKind> for FileAccessKind {
    fn from(kind: io::ErrorKind) -> Self {
        match kind {
            io::ErrorKind::PermissionDenied => FileAccessKind::PermissionDenied,
            io::ErrorKind::NotFound => FileAccessKind::NotFound,
            _ => FileAccessKind::Unknown,
        }
    }
}

/// A classified failure to open a file the daemon depends on.
#[derive(Error, Debug)]
pub enum FileAccessError {
    #[error("Cannot {} {}. Permission denied.", .action.verb(), .path.display())]
    PermissionDenied {
        path: PathBuf,
        action: FileAction,
        source: io::Error,
    },

    #[error("No such file or directory: {}", .path.display())]
    NotFound {
        path: PathBuf,
        action: FileAction,
        source: io::Error,
    },

    #[error("Cannot {} {}. Unknown error.", .action.verb(), .path.display())]
    Unknown {
        path: PathBuf,
        action: FileAction,
        source: io::Error,
    },
}

impl FileAccessError {
    /// Classifies an I/O error raised while accessing `path`.
    pub fn classify(path: impl AsRef<Path>, action: FileAction, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        match FileAccessKind::from(source.kind()) {
            FileAccessKind::PermissionDenied => Self::PermissionDenied {
                path,
                action,
                source,
            },
            FileAccessKind::NotFound => Self::NotFound {
                path,
                action,
                source,
            },
            FileAccessKind::Unknown => Self::Unknown {
                path,
                action,
                source,
            },
        }
    }

    pub fn kind(&self) -> FileAccessKind {
        match self {
            Self::PermissionDenied { .. } => FileAccessKind::PermissionDenied,
            Self::NotFound { .. } => FileAccessKind::NotFound,
            Self::Unknown { .. } => FileAccessKind::Unknown,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::PermissionDenied { path, .. }
            | Self::NotFound { path, .. }
            | Self::Unknown { path, .. } => path,
        }
    }
}
