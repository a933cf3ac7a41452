//! Client error types

use std::time::Duration;

use partwise_core::{CoreError, SessionId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to initiate upload: {0}")]
    Initiation(String),

    #[error("Part {part_number} failed after {attempts} attempt(s): {reason}")]
    PartUpload {
        part_number: u32,
        attempts: u32,
        reason: String,
    },

    #[error("Storage backend returned no etag for part {0}")]
    MissingEtag(u32),

    #[error("No upload authorization returned for part {0}")]
    AuthorizationMissing(u32),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Part transfer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Session {0} is already being uploaded")]
    AlreadyRunning(SessionId),

    #[error("Session {0} has no backend upload")]
    NoBackendSession(SessionId),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Whether this is the cancellation signal rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }
}
