//! Upload session records persisted in fjall
//!
//! Records live in the `sessions` partition keyed by the 16-byte session id
//! (ULIDs sort by creation time, so a reverse scan is newest first). A second
//! partition, `sessions_by_status`, holds `{status}:{id}` entries so listing by
//! status does not decode every record. Record and index entry are written in
//! one fjall batch.

use fjall::PartitionHandle;
use partwise_core::{CoreError, SessionId, SessionStatus, SessionStore, UploadSession};
use tracing::debug;

use crate::{EngineError, EngineResult, StorageEngine};

const SESSIONS_PARTITION: &str = "sessions";
const STATUS_INDEX_PARTITION: &str = "sessions_by_status";

/// `SessionStore` implementation backed by a fjall keyspace
#[derive(Clone)]
pub struct FjallSessionStore {
    engine: StorageEngine,
    records: PartitionHandle,
    by_status: PartitionHandle,
}

impl FjallSessionStore {
    pub fn new(engine: StorageEngine) -> EngineResult<Self> {
        let records = engine.partition(SESSIONS_PARTITION)?;
        let by_status = engine.partition(STATUS_INDEX_PARTITION)?;
        Ok(Self {
            engine,
            records,
            by_status,
        })
    }

    fn load(&self, id: &SessionId) -> EngineResult<Option<UploadSession>> {
        match self.records.get(id.to_bytes())? {
            Some(bytes) => {
                let session =
                    serde_json::from_slice(&bytes).map_err(|source| EngineError::Corrupt {
                        key: id.to_string(),
                        source,
                    })?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Write `session`, moving its index entry away from `previous` if the
    /// status changed.
    fn write(&self, session: &UploadSession, previous: Option<SessionStatus>) -> EngineResult<()> {
        let body = serde_json::to_vec(session)?;
        let mut batch = self.engine.keyspace().batch();

        if let Some(previous) = previous {
            if previous != session.status {
                batch.remove(&self.by_status, status_key(previous, &session.id));
            }
        }
        batch.insert(&self.by_status, status_key(session.status, &session.id), Vec::new());
        batch.insert(&self.records, session.id.to_bytes().to_vec(), body);
        batch.commit()?;

        self.engine.persist()?;
        debug!(session_id = %session.id, status = %session.status, "session record written");
        Ok(())
    }

    fn list_all(&self) -> EngineResult<Vec<UploadSession>> {
        let mut sessions = Vec::new();
        for item in self.records.iter().rev() {
            let (key, value) = item?;
            let session = serde_json::from_slice(&value).map_err(|source| EngineError::Corrupt {
                key: String::from_utf8_lossy(&key).into_owned(),
                source,
            })?;
            sessions.push(session);
        }
        Ok(sessions)
    }

    fn list_by_status(&self, status: SessionStatus) -> EngineResult<Vec<UploadSession>> {
        let prefix = status_prefix(status);
        let mut sessions = Vec::new();

        for item in self.by_status.prefix(&prefix).rev() {
            let (key, _) = item?;
            let Some(id) = id_from_status_key(&key, prefix.len()) else {
                continue;
            };
            // Stale entries (record gone or in another status) are skipped
            if let Some(session) = self.load(&id)? {
                if session.status == status {
                    sessions.push(session);
                }
            }
        }
        Ok(sessions)
    }
}

fn status_prefix(status: SessionStatus) -> Vec<u8> {
    format!("{}:", status.as_str()).into_bytes()
}

fn status_key(status: SessionStatus, id: &SessionId) -> Vec<u8> {
    let mut key = status_prefix(status);
    key.extend_from_slice(&id.to_bytes());
    key
}

fn id_from_status_key(key: &[u8], prefix_len: usize) -> Option<SessionId> {
    let raw: [u8; 16] = key.get(prefix_len..)?.try_into().ok()?;
    Some(SessionId::from_bytes(raw))
}

impl SessionStore for FjallSessionStore {
    fn insert(&self, session: &UploadSession) -> partwise_core::Result<()> {
        if self.load(&session.id)?.is_some() {
            return Err(CoreError::SessionExists(session.id.to_string()));
        }
        Ok(self.write(session, None)?)
    }

    fn get(&self, id: &SessionId) -> partwise_core::Result<Option<UploadSession>> {
        Ok(self.load(id)?)
    }

    fn put(&self, session: &UploadSession) -> partwise_core::Result<()> {
        let existing = self
            .load(&session.id)?
            .ok_or_else(|| CoreError::SessionNotFound(session.id.to_string()))?;
        Ok(self.write(session, Some(existing.status))?)
    }

    fn list(&self, status: Option<SessionStatus>) -> partwise_core::Result<Vec<UploadSession>> {
        let sessions = match status {
            Some(status) => self.list_by_status(status)?,
            None => self.list_all()?,
        };
        Ok(sessions)
    }

    fn delete(&self, id: &SessionId) -> partwise_core::Result<bool> {
        let Some(existing) = self.load(id)? else {
            return Ok(false);
        };

        let mut batch = self.engine.keyspace().batch();
        batch.remove(&self.by_status, status_key(existing.status, id));
        batch.remove(&self.records, id.to_bytes().to_vec());
        batch.commit().map_err(EngineError::from)?;
        self.engine.persist()?;

        debug!(session_id = %id, "session record deleted");
        Ok(true)
    }
}
