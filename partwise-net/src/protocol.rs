//! Request and response bodies of the control API

use chrono::{DateTime, Utc};
use partwise_core::{CompletedPart, StorageKey};
use serde::{Deserialize, Serialize};

/// Protocol version, reflected in the `/v1` route prefix
pub const PROTOCOL_VERSION: u8 = 1;

/// Largest JSON body the control API accepts
pub const MAX_CONTROL_BODY_SIZE: usize = 1024 * 1024;

/// Largest single part body
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Most part numbers one authorize call may request
pub const MAX_AUTHORIZE_BATCH: usize = 1000;

/// Longest lifetime a presigned part or download URL may be issued for
pub const MAX_URL_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Header carrying the part etag on a successful part PUT
pub const ETAG_HEADER: &str = "etag";

/// Protocol error types
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Body too large: {0} bytes (max: {1})")]
    BodyTooLarge(u64, u64),

    #[error("Malformed body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("URL expired at {0}")]
    Expired(i64),

    #[error("Signature does not match")]
    BadSignature,
}

/// Validate a control body length before decoding it
pub fn validate_control_body(len: usize) -> Result<(), ProtocolError> {
    if len > MAX_CONTROL_BODY_SIZE {
        return Err(ProtocolError::BodyTooLarge(
            len as u64,
            MAX_CONTROL_BODY_SIZE as u64,
        ));
    }
    Ok(())
}

/// Validate a part body length before staging it
pub fn validate_part_body(len: u64) -> Result<(), ProtocolError> {
    if len > MAX_PART_SIZE {
        return Err(ProtocolError::BodyTooLarge(len, MAX_PART_SIZE));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMultipartRequest {
    pub key: StorageKey,
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMultipartResponse {
    pub upload_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizePartsRequest {
    pub part_numbers: Vec<u32>,
    pub expires_in_secs: u64,
}

impl AuthorizePartsRequest {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.part_numbers.is_empty() {
            return Err(ProtocolError::MissingField("partNumbers".to_string()));
        }
        if self.part_numbers.len() > MAX_AUTHORIZE_BATCH {
            return Err(ProtocolError::InvalidRequest(format!(
                "{} part numbers requested (max: {})",
                self.part_numbers.len(),
                MAX_AUTHORIZE_BATCH
            )));
        }
        if self.part_numbers.contains(&0) {
            return Err(ProtocolError::InvalidRequest(
                "part numbers start at 1".to_string(),
            ));
        }
        validate_ttl(self.expires_in_secs)
    }
}

/// Reject URL lifetimes of zero or beyond [`MAX_URL_TTL_SECS`]
pub fn validate_ttl(secs: u64) -> Result<(), ProtocolError> {
    if secs == 0 {
        return Err(ProtocolError::InvalidRequest(
            "expiresInSecs must be positive".to_string(),
        ));
    }
    if secs > MAX_URL_TTL_SECS {
        return Err(ProtocolError::InvalidRequest(format!(
            "expiresInSecs {} exceeds {}",
            secs, MAX_URL_TTL_SECS
        )));
    }
    Ok(())
}

/// Expiry instant `secs` seconds after `now`
pub fn expiry_after(now: DateTime<Utc>, secs: u64) -> Result<DateTime<Utc>, ProtocolError> {
    validate_ttl(secs)?;
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| ProtocolError::InvalidRequest("expiresInSecs out of range".to_string()))
}

/// Time-limited permission to PUT one part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartAuthorization {
    pub part_number: u32,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl PartAuthorization {
    /// Whether the authorization is past its expiry at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizePartsResponse {
    pub authorizations: Vec<PartAuthorization>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteMultipartRequest {
    pub parts: Vec<CompletedPart>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteMultipartResponse {
    pub key: StorageKey,
    pub size: u64,
    pub etag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUrlRequest {
    pub key: StorageKey,
    pub expires_in_secs: u64,
}

impl DownloadUrlRequest {
    pub fn validate(&self) -> Result<(), ProtocolError> {
        validate_ttl(self.expires_in_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUrlResponse {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Body of every non-2xx control response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        ErrorBody {
            error: message.into(),
        }
    }
}
