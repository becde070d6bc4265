use thiserror::Error;

/// Error taxonomy for the long-term memory subsystem.
///
/// Variants map to the input-validation / not-found / transient-external /
/// corruption buckets a caller needs to branch on; corruption is handled
/// internally (the store starts empty) and never surfaces as this error.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("unsafe path {path:?}: {reason}")]
    UnsafePath { path: String, reason: String },

    #[error("memory root does not exist: {0}")]
    RootMissing(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("embedder call failed: {0}")]
    Embedder(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
