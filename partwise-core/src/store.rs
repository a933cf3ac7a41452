//! Persistence contract for upload session records

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::session::{SessionStatus, UploadSession};
use crate::{CoreError, Result, SessionId};

/// Record store keyed by session id.
///
/// Every write replaces the whole document. Operations are atomic per
/// record; nothing coordinates two writers of the same id, so callers must
/// keep a single driver per session.
pub trait SessionStore: Send + Sync {
    /// Persist a new record; fails if the id already exists
    fn insert(&self, session: &UploadSession) -> Result<()>;

    fn get(&self, id: &SessionId) -> Result<Option<UploadSession>>;

    /// Replace an existing record; fails if the id is unknown
    fn put(&self, session: &UploadSession) -> Result<()>;

    /// Records newest first, optionally restricted to one status
    fn list(&self, status: Option<SessionStatus>) -> Result<Vec<UploadSession>>;

    /// Returns whether a record was removed
    fn delete(&self, id: &SessionId) -> Result<bool>;

    /// `get` that treats a missing record as an error
    fn require(&self, id: &SessionId) -> Result<UploadSession> {
        self.get(id)?
            .ok_or_else(|| CoreError::SessionNotFound(id.to_string()))
    }
}

/// Process-local store, handy for tests and one-shot CLI runs
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<BTreeMap<SessionId, UploadSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned() -> CoreError {
        CoreError::Storage("session map lock poisoned".to_string())
    }
}

impl SessionStore for MemorySessionStore {
    fn insert(&self, session: &UploadSession) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| Self::poisoned())?;
        if sessions.contains_key(&session.id) {
            return Err(CoreError::SessionExists(session.id.to_string()));
        }
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    fn get(&self, id: &SessionId) -> Result<Option<UploadSession>> {
        let sessions = self.sessions.read().map_err(|_| Self::poisoned())?;
        Ok(sessions.get(id).cloned())
    }

    fn put(&self, session: &UploadSession) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(|_| Self::poisoned())?;
        match sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(CoreError::SessionNotFound(session.id.to_string())),
        }
    }

    fn list(&self, status: Option<SessionStatus>) -> Result<Vec<UploadSession>> {
        let sessions = self.sessions.read().map_err(|_| Self::poisoned())?;
        Ok(sessions
            .values()
            .rev()
            .filter(|session| status.map_or(true, |wanted| session.status == wanted))
            .cloned()
            .collect())
    }

    fn delete(&self, id: &SessionId) -> Result<bool> {
        let mut sessions = self.sessions.write().map_err(|_| Self::poisoned())?;
        Ok(sessions.remove(id).is_some())
    }
}
