//! Error types for castlefinder.
//!
//! Library crates use [`CastleFinderError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all castlefinder operations.
#[derive(Debug, thiserror::Error)]
pub enum CastleFinderError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A page could not be retrieved.
    #[error("failed to fetch [{url}]: {message}")]
    Fetch { url: String, message: String },

    /// A fetched page did not have the expected structure.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Two castles were asked to reconcile but do not describe the same place.
    #[error("castles [{primary}] and [{secondary}] should probably be the same to reconcile")]
    NotReconcilable { primary: String, secondary: String },

    /// A candidate carried a source tag no registered adapter owns.
    #[error("no adapter registered for source [{0}]")]
    UnknownSource(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The operation was abandoned because the pipeline was cancelled.
    #[error("operation cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CastleFinderError>;

impl CastleFinderError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a fetch error for `url`.
    pub fn fetch(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error only reports that the pipeline was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
