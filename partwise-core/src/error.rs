//! Error types for partwise

use thiserror::Error;

use crate::session::SessionStatus;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid file: {0}")]
    InvalidFile(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(String),

    #[error("Invalid storage key: {0}")]
    InvalidStorageKey(String),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("Unknown session status: {0}")]
    InvalidStatus(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Unknown part {part_number} (session has {total_parts} parts)")]
    UnknownPart { part_number: u32, total_parts: u32 },

    #[error("Not all parts have been uploaded: {missing} of {total} parts have no confirmed etag")]
    PartsIncomplete { missing: u32, total: u32 },

    #[error("Upload session not found: {0}")]
    SessionNotFound(String),

    #[error("Upload session already exists: {0}")]
    SessionExists(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
