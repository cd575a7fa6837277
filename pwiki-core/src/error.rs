//! Error types for pwiki store operations

use std::io;
use std::path::{Path, PathBuf};

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while reading, writing or mirroring a store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Page absent from the store being queried
    #[error("Page not found: {0}")]
    NotFound(String),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An expected store root does not exist
    #[error("Directory unavailable: {0:?}")]
    DirectoryUnavailable(PathBuf),

    #[error("Invalid page title: {0:?}")]
    InvalidTitle(String),

    #[error("Invalid attachment filename: {0:?}")]
    InvalidFilename(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Backup worker stopped")]
    BackupWorkerStopped,
}

impl StoreError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Whether this error means "the thing is not there"
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound(_) => true,
            StoreError::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Extension for attaching a path to `std::io::Result`
pub(crate) trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| StoreError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(StoreError::NotFound("alpha".into()).is_not_found());

        let missing = StoreError::io("x.txt", io::Error::from(io::ErrorKind::NotFound));
        assert!(missing.is_not_found());

        let denied = StoreError::io("x.txt", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!denied.is_not_found());
        assert!(!StoreError::InvalidTitle("a/b".into()).is_not_found());
    }

    #[test]
    fn test_io_error_message_names_path() {
        let err = StoreError::io("/srv/wiki/alpha.txt", io::Error::other("disk full"));
        let msg = err.to_string();
        assert!(msg.contains("alpha.txt"));
        assert!(msg.contains("disk full"));
    }
}
