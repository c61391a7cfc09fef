use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single upstream resource fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{path}: timed out after {}ms", .after.as_millis())]
    Timeout { path: String, after: Duration },

    #[error("{path}: status {status}")]
    Http { path: String, status: u16 },

    #[error("{path}: {cause}")]
    Transport { path: String, cause: String },

    #[error("{path}: invalid body: {cause}")]
    Decode { path: String, cause: String },
}

impl FetchError {
    pub fn path(&self) -> &str {
        match self {
            FetchError::Timeout { path, .. }
            | FetchError::Http { path, .. }
            | FetchError::Transport { path, .. }
            | FetchError::Decode { path, .. } => path,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt snapshot {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write snapshot {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: expected a number of milliseconds, got {value:?}")]
    InvalidDuration { key: &'static str, value: String },

    #[error("{key}: expected a port number, got {value:?}")]
    InvalidPort { key: &'static str, value: String },

    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },

    #[error("device address must not be empty")]
    EmptyDevice,
}
