//! Error types for checkpoint persistence.

use std::io;
use std::path::PathBuf;

use crate::schema::ConfigError;

/// Errors raised while registering fields or saving/loading frames.
///
/// Every variant aborts the operation in progress. The instance that raised
/// it stays closable: `close()` and `close_session()` are always safe to call
/// afterwards.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Bad category index or non-positive particle count.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// A path that cannot be reduced to a checkpoint base name.
    #[error("Invalid file name: {0:?}")]
    InvalidName(String),
    /// A container or mirror file could not be created, opened or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The file on disk does not agree with the registry layout.
    #[error("Inconsistent checkpoint: {0}")]
    InconsistentCheckpoint(String),
    /// Invalid checkpoint configuration.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl CheckpointError {
    /// Attach a path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used across the crate.
pub type Result<T, E = CheckpointError> = std::result::Result<T, E>;
