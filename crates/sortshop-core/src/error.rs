use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad caller input, rejected before any I/O
    #[error("invalid input: {0}")]
    Validation(String),

    /// File vanished since it was enumerated, or a requested entry is gone
    #[error("not found anymore: {}", .0.display())]
    NotFound(PathBuf),

    /// Destination already occupied
    #[error("already exists: {}", .0.display())]
    Exists(PathBuf),

    #[error("insufficient permissions: {}", .0.display())]
    Permission(PathBuf),

    /// Required configuration key missing
    #[error("missing configuration value: {0}")]
    Config(&'static str),

    /// The metadata tool did not confirm the change
    #[error("change not saved: {0}")]
    Write(String),

    /// No usable creation date after loading metadata
    #[error("no usable date in metadata of {}", .0.display())]
    Load(PathBuf),

    /// Nothing at the requested position
    #[error("nothing to show: {0}")]
    Index(String),

    #[error("counter of width {width} exhausted for \"{stem}\"")]
    CounterOverflow { stem: String, width: usize },

    /// The metadata tool process failed or answered garbage
    #[error("metadata tool failure: {0}")]
    Tool(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Translate a filesystem error on `path` into the matching kind.
    pub fn from_io(err: io::Error, path: &Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.to_path_buf()),
            io::ErrorKind::AlreadyExists => Error::Exists(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Error::Permission(path.to_path_buf()),
            _ => Error::Io(err),
        }
    }

    /// Whether a cursor operation may be retried with the same position.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
