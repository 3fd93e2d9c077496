use std::path::PathBuf;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced while embedding a task.
#[derive(Debug, Error)]
pub enum Error {
    /// A model directory or object could not be classified as a usable
    /// backend variant. Raised before any inference runs.
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    /// An audio file could not be opened or decoded.
    #[error("failed to decode {path}: {reason}")]
    Decode { path: PathBuf, reason: String },

    /// A decoded file's sample rate does not match the backend's rate.
    /// Resampling belongs to the preprocessing pipeline, not this crate.
    #[error("{path}: sample rate {actual} Hz, backend requires {expected} Hz")]
    SampleRate {
        path: PathBuf,
        expected: u32,
        actual: u32,
    },

    /// An unknown label alignment policy name.
    #[error("unsupported label policy: {0:?}")]
    UnsupportedPolicy(String),

    /// Embedding rows, labels and timestamps disagree in count.
    #[error("alignment mismatch: {0}")]
    Alignment(String),

    /// Rank, dtype or width inconsistency across a split's embeddings.
    #[error("dimension mismatch: {0}")]
    Dimension(String),

    /// A per-file artifact is missing or malformed.
    #[error("artifact {path}: {message}")]
    Artifact { path: PathBuf, message: String },

    /// Task metadata, vocabulary or label JSON has an unexpected shape.
    #[error("metadata: {0}")]
    Metadata(String),

    /// Backend inference failed.
    #[error("model: {0}")]
    Model(String),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Decode {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn artifact(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Artifact {
            path: path.into(),
            message: message.into(),
        }
    }
}

#[cfg(feature = "onnx")]
impl From<ort::Error> for Error {
    fn from(e: ort::Error) -> Self {
        Error::Model(e.to_string())
    }
}

#[cfg(feature = "candle")]
impl From<candle_core::Error> for Error {
    fn from(e: candle_core::Error) -> Self {
        Error::Model(e.to_string())
    }
}
