//! Unified error types for the remote-sync core crate.
//!
//! Configuration failures and filesystem failures are kept apart so callers
//! can branch on the kind of failure instead of matching message text.
//! Consumers (the CLI, an editor host) turn these into user-visible
//! notifications; the core never presents them itself.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type encompassing all core error categories.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A configuration loading or lookup error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A filesystem backend error.
    #[error("File error: {0}")]
    File(#[from] FileError),
}

/// Errors raised while loading, validating or looking up configurations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A record violates the configuration schema. The whole load fails.
    #[error("config validation fail: \"{field}\" {reason}")]
    Validation { field: String, reason: String },

    /// No configuration governs the queried path or logical name.
    #[error("({query}) config file not found")]
    NotFound { query: String },

    /// The config file is not valid JSON.
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    /// The config file could not be read or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors related to filesystem operations.
///
/// Every backend maps its native failures onto these kinds, so sync logic
/// written against [`FileSystem`](crate::files::FileSystem) never needs to
/// know which backend produced an error.
#[derive(Error, Debug)]
pub enum FileError {
    /// The requested file or directory was not found.
    #[error("File not found: {0}")]
    NotFound(String),

    /// Permission was denied for the requested operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The target of a create operation already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// A non-recursive directory removal hit a non-empty directory.
    #[error("Directory not empty: {0}")]
    NotEmpty(String),

    /// The source of a streaming transfer failed after the transfer began.
    #[error("Stream failed while writing {path}: {message}")]
    Stream { path: String, message: String },

    /// The operation was cancelled through its cancellation token.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The backend does not support this protocol or operation.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// The connection to the remote host failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A file operation failed for another reason.
    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

impl FileError {
    /// Map a `std::io::Error` onto the shared kinds, keeping the path.
    pub fn from_io(e: std::io::Error, path: &str) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => FileError::NotFound(path.to_string()),
            ErrorKind::PermissionDenied => FileError::PermissionDenied(path.to_string()),
            ErrorKind::AlreadyExists => FileError::AlreadyExists(path.to_string()),
            ErrorKind::DirectoryNotEmpty => FileError::NotEmpty(path.to_string()),
            _ => FileError::OperationFailed(format!("{path}: {e}")),
        }
    }

    /// Whether this error means the path does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, FileError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::validation("host", "is required");
        assert_eq!(err.to_string(), "config validation fail: \"host\" is required");

        let err = ConfigError::NotFound {
            query: "/ws/a.txt".into(),
        };
        assert_eq!(err.to_string(), "(/ws/a.txt) config file not found");
    }

    #[test]
    fn file_error_display() {
        let err = FileError::NotFound("/tmp/missing".into());
        assert_eq!(err.to_string(), "File not found: /tmp/missing");

        let err = FileError::PermissionDenied("/root".into());
        assert_eq!(err.to_string(), "Permission denied: /root");

        let err = FileError::Stream {
            path: "/r/a".into(),
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "Stream failed while writing /r/a: boom");
    }

    #[test]
    fn file_error_from_io_maps_kinds() {
        use std::io::{Error, ErrorKind};

        let e = FileError::from_io(Error::new(ErrorKind::NotFound, "gone"), "/a");
        assert!(matches!(e, FileError::NotFound(p) if p == "/a"));

        let e = FileError::from_io(Error::new(ErrorKind::PermissionDenied, "no"), "/b");
        assert!(matches!(e, FileError::PermissionDenied(_)));

        let e = FileError::from_io(Error::new(ErrorKind::AlreadyExists, "dup"), "/c");
        assert!(matches!(e, FileError::AlreadyExists(_)));

        let e = FileError::from_io(Error::new(ErrorKind::BrokenPipe, "pipe"), "/d");
        assert_eq!(e.to_string(), "Operation failed: /d: pipe");
    }

    #[test]
    fn core_error_from_config_error() {
        let core_err: CoreError = ConfigError::NotFound { query: "x".into() }.into();
        assert_eq!(core_err.to_string(), "Config error: (x) config file not found");
    }

    #[test]
    fn core_error_from_file_error() {
        let core_err: CoreError = FileError::NotFound("/missing".into()).into();
        assert_eq!(core_err.to_string(), "File error: File not found: /missing");
    }
}
