//! Unified error type for the controller crate.
//!
//! A single `Error` enum that every fallible boundary converts into:
//! configuration loading, session log files, the learned estimator and the
//! observability server.  The numeric pipeline itself (estimator, safety,
//! controller) is total and never returns an error.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is invalid or could not be parsed.
    #[error("config: {0}")]
    Config(String),

    /// A file could not be opened, read or written.
    #[error("io: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("csv: {0}")]
    Csv(#[from] csv::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Learned estimator weights were missing or malformed.
    #[error("model: {0}")]
    Model(String),

    /// Observability server failed to bind or run.
    #[error("server: {0}")]
    Server(String),

    /// A worker thread could not be spawned or panicked.
    #[error("thread: {0}")]
    Thread(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_names_path() {
        let e = Error::io("/tmp/x.csv", io::Error::new(io::ErrorKind::NotFound, "gone"));
        let msg = e.to_string();
        assert!(msg.contains("/tmp/x.csv"));
        assert!(msg.contains("gone"));
    }

    #[test]
    fn json_errors_convert() {
        let err: Error = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, Error::Json(_)));
    }
}
