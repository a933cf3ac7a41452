//! Engine-level errors

use partwise_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] fjall::Error),

    #[error("Corrupt record under key {key}: {source}")]
    Corrupt {
        key: String,
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown multipart upload: {0}")]
    UnknownUpload(String),

    #[error("Invalid part list: {0}")]
    InvalidPartList(String),

    #[error("Part {0} was never uploaded")]
    MissingPart(u32),

    #[error("Etag mismatch for part {part_number}")]
    EtagMismatch { part_number: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<EngineError> for CoreError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Serialization(e) => CoreError::Serialization(e),
            EngineError::Io(e) => CoreError::Io(e),
            other => CoreError::Storage(other.to_string()),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
