//! Error types shared by the core pipeline and delivery stages.

use std::path::PathBuf;
use std::time::Duration;

/// Whole-archive failures. Per-file failures never surface here; they are logged and skipped.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to create archive {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to finalize archive {path}: {source}")]
    Finish {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("source directory {0} does not exist or is not a directory")]
    MissingSource(PathBuf),
}

/// Errors raised while preparing or archiving one input folder.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("input path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("archive worker panicked or was cancelled: {0}")]
    Worker(String),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors reported by a [`crate::contract::ChatClient`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The platform asked us to back off for the given duration.
    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("chat not found: {0}")]
    ChatNotFound(String),

    #[error("API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(String),
}

impl ClientError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ClientError::RateLimited { .. })
    }
}

/// Errors from the delivery loop.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("upload of {path} failed: {source}")]
    Upload {
        path: PathBuf,
        #[source]
        source: ClientError,
    },

    #[error("gave up on {path} after {waits} rate-limit waits")]
    RateLimitExhausted { path: PathBuf, waits: u32 },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
