//! Persisted upload session record and its state machine
//!
//! ```text
//! initiating ──► in_progress ──► completing ──► completed
//!     │              │               │
//!     │              │               ▼
//!     │              └──────────► failed ──► completing (retry)
//!     ▼                              │
//!  aborted ◄─────────────────────────┘  (also from initiating / in_progress)
//! ```
//!
//! `uploaded_parts` and `bytes_uploaded` are recomputed from the full part
//! list after every part mutation, so confirmations may land in any order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunker::{part_count, part_size, MAX_PARTS};
use crate::{CoreError, Etag, Result, SessionId, StorageKey};

/// Lifecycle state of an upload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initiating,
    InProgress,
    Completing,
    Completed,
    Failed,
    Aborted,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 6] = [
        SessionStatus::Initiating,
        SessionStatus::InProgress,
        SessionStatus::Completing,
        SessionStatus::Completed,
        SessionStatus::Failed,
        SessionStatus::Aborted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initiating => "initiating",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completing => "completing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Aborted => "aborted",
        }
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;

        matches!(
            (self, next),
            (Initiating, InProgress)
                | (Initiating, Failed)
                | (Initiating, Aborted)
                | (InProgress, Completing)
                | (InProgress, Failed)
                | (InProgress, Aborted)
                | (Completing, Completed)
                | (Completing, Failed)
                | (Failed, Completing)
                | (Failed, Aborted)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Aborted)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        SessionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::InvalidStatus(s.to_string()))
    }
}

/// Per-part upload state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartRecord {
    pub part_number: u32,
    pub size: u64,
    pub status: PartStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<Etag>,
}

impl PartRecord {
    /// Completed with a usable integrity token
    pub fn is_confirmed(&self) -> bool {
        self.status == PartStatus::Completed
            && self.etag.as_ref().is_some_and(|etag| !etag.as_str().is_empty())
    }
}

/// `(part_number, etag)` pair submitted when finalizing a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: Etag,
}

/// One logical large-file upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub id: SessionId,
    /// Backend multipart upload id; empty when the backend never issued one
    pub upload_id: String,
    pub storage_key: StorageKey,
    pub filename: String,
    pub mime_type: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub status: SessionStatus,
    pub parts: Vec<PartRecord>,
    pub uploaded_parts: u32,
    pub bytes_uploaded: u64,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl UploadSession {
    /// Create a session in `initiating` with every part pending
    pub fn new(
        id: SessionId,
        upload_id: String,
        storage_key: StorageKey,
        filename: String,
        mime_type: String,
        total_size: u64,
        chunk_size: u64,
    ) -> Result<Self> {
        if total_size == 0 {
            return Err(CoreError::InvalidFile("File is empty.".to_string()));
        }
        if chunk_size == 0 {
            return Err(CoreError::InvalidChunkSize("chunk size must be non-zero".to_string()));
        }

        let total_parts = part_count(total_size, chunk_size);
        if total_parts > MAX_PARTS {
            return Err(CoreError::InvalidChunkSize(format!(
                "{} parts exceed the limit of {}",
                total_parts, MAX_PARTS
            )));
        }

        let parts = (1..=total_parts as u32)
            .map(|part_number| PartRecord {
                part_number,
                size: part_size(total_size, chunk_size, part_number),
                status: PartStatus::Pending,
                etag: None,
            })
            .collect();

        let now = Utc::now();
        Ok(UploadSession {
            id,
            upload_id,
            storage_key,
            filename,
            mime_type,
            total_size,
            chunk_size,
            status: SessionStatus::Initiating,
            parts,
            uploaded_parts: 0,
            bytes_uploaded: 0,
            started_at: now,
            last_activity_at: now,
            completed_at: None,
            error_message: None,
        })
    }

    pub fn total_parts(&self) -> u32 {
        self.parts.len() as u32
    }

    /// `100 * uploaded_parts / total_parts`
    pub fn percentage(&self) -> f64 {
        if self.parts.is_empty() {
            return 0.0;
        }
        100.0 * self.uploaded_parts as f64 / self.total_parts() as f64
    }

    pub fn has_backend_session(&self) -> bool {
        !self.upload_id.is_empty()
    }

    /// Move to `next`, stamping activity (and completion) times
    pub fn transition(&mut self, next: SessionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        self.status = next;
        self.last_activity_at = now;

        match next {
            SessionStatus::Completed => {
                self.completed_at = Some(now);
                self.error_message = None;
            }
            SessionStatus::Completing => self.error_message = None,
            _ => {}
        }

        Ok(())
    }

    /// Transition to `failed` recording a human-readable reason
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(SessionStatus::Failed)?;
        self.error_message = Some(message.into());
        Ok(())
    }

    pub fn part(&self, part_number: u32) -> Result<&PartRecord> {
        let total_parts = self.total_parts();
        part_number
            .checked_sub(1)
            .and_then(|index| self.parts.get(index as usize))
            .ok_or(CoreError::UnknownPart {
                part_number,
                total_parts,
            })
    }

    fn part_mut(&mut self, part_number: u32) -> Result<&mut PartRecord> {
        let total_parts = self.total_parts();
        part_number
            .checked_sub(1)
            .and_then(|index| self.parts.get_mut(index as usize))
            .ok_or(CoreError::UnknownPart {
                part_number,
                total_parts,
            })
    }

    pub fn mark_part_uploading(&mut self, part_number: u32) -> Result<()> {
        let part = self.part_mut(part_number)?;
        if part.status != PartStatus::Completed {
            part.status = PartStatus::Uploading;
        }
        self.touch();
        Ok(())
    }

    pub fn mark_part_failed(&mut self, part_number: u32) -> Result<()> {
        let part = self.part_mut(part_number)?;
        if part.status != PartStatus::Completed {
            part.status = PartStatus::Failed;
        }
        self.recompute_counters();
        self.touch();
        Ok(())
    }

    /// Record that the backend accepted `part_number` with `etag`
    pub fn confirm_part(&mut self, part_number: u32, etag: Etag) -> Result<()> {
        let part = self.part_mut(part_number)?;
        part.status = PartStatus::Completed;
        part.etag = Some(etag);
        self.recompute_counters();
        self.touch();
        Ok(())
    }

    /// Derive the counters from the part list
    pub fn recompute_counters(&mut self) {
        let (count, bytes) = self
            .parts
            .iter()
            .filter(|part| part.status == PartStatus::Completed)
            .fold((0u32, 0u64), |(count, bytes), part| (count + 1, bytes + part.size));

        self.uploaded_parts = count;
        self.bytes_uploaded = bytes;
    }

    /// Whether the stored counters match the part list
    pub fn counters_consistent(&self) -> bool {
        let mut derived = self.clone();
        derived.recompute_counters();
        derived.uploaded_parts == self.uploaded_parts && derived.bytes_uploaded == self.bytes_uploaded
    }

    /// Part numbers that still need an upload, ascending
    pub fn outstanding_parts(&self) -> Vec<u32> {
        self.parts
            .iter()
            .filter(|part| !part.is_confirmed())
            .map(|part| part.part_number)
            .collect()
    }

    /// Parts to submit for finalization, sorted by part number.
    ///
    /// Fails unless every part is completed and carries an etag.
    pub fn completed_parts(&self) -> Result<Vec<CompletedPart>> {
        let missing = self.parts.iter().filter(|part| !part.is_confirmed()).count() as u32;
        if missing > 0 || self.parts.is_empty() {
            return Err(CoreError::PartsIncomplete {
                missing,
                total: self.total_parts(),
            });
        }

        let mut parts: Vec<CompletedPart> = self
            .parts
            .iter()
            .filter_map(|part| {
                part.etag.clone().map(|etag| CompletedPart {
                    part_number: part.part_number,
                    etag,
                })
            })
            .collect();
        parts.sort_by_key(|part| part.part_number);

        Ok(parts)
    }

    fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}
