use std::path::PathBuf;

use thiserror::Error;

use cziti_core::EngineStatus;

/// Error surface for the loop bridge, configuration and log management.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The event loop has exited; nothing can be scheduled onto it anymore.
    #[error("event loop is not running")]
    LoopClosed,

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("cannot determine a log directory; set log_dir explicitly")]
    LogDirNotFound,
}

/// Why an identity failed to initialize. Carried on the identity context,
/// never returned as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InitError {
    /// The engine rejected the identity, either synchronously on submission
    /// or later from its init callback.
    #[error("identity init failed ({code}): {message}")]
    Rejected { code: EngineStatus, message: String },

    #[error("identity init abandoned: event loop is not running")]
    LoopUnavailable,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SessionError {
    SessionError::Io {
        path: path.into(),
        source,
    }
}
