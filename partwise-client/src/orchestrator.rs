//! Session lifecycle: initiation, part upload, completion, abort, and the
//! housekeeping queries around stored sessions.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use partwise_core::{
    chunk_size_for, plan_chunks, validate_file_size, CoreError, SessionId, SessionStatus,
    SessionStore, StorageKey, UploadConfig, UploadSession,
};
use tracing::{debug, error, info, warn};

use crate::driver::{LiveSession, PartDriver};
use crate::{
    CancelFlag, ClientError, NoopObserver, ObjectStorage, PartSource, PartTransport, Result,
    RetryPolicy, UploadFile, UploadObserver,
};

/// Coordinates upload sessions between the session store, the storage
/// backend and the part transport.
///
/// At most one driver may work on a session at a time; within a process
/// this is enforced and a second driver gets [`ClientError::AlreadyRunning`].
pub struct Orchestrator {
    store: Arc<dyn SessionStore>,
    storage: Arc<dyn ObjectStorage>,
    transport: Arc<dyn PartTransport>,
    config: UploadConfig,
    active: Arc<Mutex<HashSet<SessionId>>>,
}

/// Claim on a session id, released on drop
struct ActiveGuard {
    id: SessionId,
    active: Arc<Mutex<HashSet<SessionId>>>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        active.remove(&self.id);
    }
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn SessionStore>,
        storage: Arc<dyn ObjectStorage>,
        transport: Arc<dyn PartTransport>,
        config: UploadConfig,
    ) -> Self {
        Orchestrator {
            store,
            storage,
            transport,
            config,
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    fn claim(&self, id: SessionId) -> Result<ActiveGuard> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if !active.insert(id) {
            return Err(ClientError::AlreadyRunning(id));
        }
        Ok(ActiveGuard {
            id,
            active: self.active.clone(),
        })
    }

    /// Open a backend multipart session and persist its record.
    ///
    /// The record is created only after the backend accepted the session.
    /// It is written as `initiating` and immediately moved to `in_progress`.
    pub async fn initiate(
        &self,
        filename: &str,
        mime_type: &str,
        total_size: u64,
        chunk_size: u64,
    ) -> Result<UploadSession> {
        plan_chunks(total_size, chunk_size)?;

        let key = StorageKey::generate(filename);
        let upload_id = self
            .storage
            .create_multipart(&key, mime_type)
            .await
            .map_err(|e| ClientError::Initiation(e.to_string()))?;

        match self.record_new_session(&upload_id, &key, filename, mime_type, total_size, chunk_size) {
            Ok(session) => {
                info!(
                    session_id = %session.id,
                    upload_id = %upload_id,
                    key = %key,
                    total_size,
                    total_parts = session.total_parts(),
                    "upload session initiated"
                );
                Ok(session)
            }
            Err(e) => {
                error!(upload_id = %upload_id, "failed to record new session: {}", e);
                if let Err(abort_err) = self.storage.abort_multipart(&upload_id, &key).await {
                    warn!(upload_id = %upload_id, "failed to abort orphaned backend upload: {}", abort_err);
                }
                Err(e)
            }
        }
    }

    fn record_new_session(
        &self,
        upload_id: &str,
        key: &StorageKey,
        filename: &str,
        mime_type: &str,
        total_size: u64,
        chunk_size: u64,
    ) -> Result<UploadSession> {
        let mut session = UploadSession::new(
            SessionId::new(),
            upload_id.to_string(),
            key.clone(),
            filename.to_string(),
            mime_type.to_string(),
            total_size,
            chunk_size,
        )?;
        self.store.insert(&session)?;
        session.transition(SessionStatus::InProgress)?;
        self.store.put(&session)?;
        Ok(session)
    }

    /// Upload every part of `session_id` that is not yet confirmed
    pub async fn upload_parts(
        &self,
        session_id: SessionId,
        source: &dyn PartSource,
        cancel: &CancelFlag,
        observer: &dyn UploadObserver,
    ) -> Result<UploadSession> {
        let _guard = self.claim(session_id)?;
        self.drive_parts(session_id, source, cancel, observer).await
    }

    async fn drive_parts(
        &self,
        session_id: SessionId,
        source: &dyn PartSource,
        cancel: &CancelFlag,
        observer: &dyn UploadObserver,
    ) -> Result<UploadSession> {
        let session = self.store.require(&session_id)?;
        if session.status != SessionStatus::InProgress {
            return Err(ClientError::InvalidState(format!(
                "session {} is {}, parts can only be uploaded while in_progress",
                session_id, session.status
            )));
        }
        if source.len() != session.total_size {
            return Err(ClientError::InvalidState(format!(
                "file is {} bytes but session {} expects {}",
                source.len(),
                session_id,
                session.total_size
            )));
        }

        let live = LiveSession::new(session, self.store.as_ref(), observer);
        let driver = PartDriver {
            live: &live,
            storage: self.storage.as_ref(),
            transport: self.transport.as_ref(),
            source,
            cancel,
            policy: RetryPolicy::from_config(&self.config),
            concurrency: self.config.concurrency,
            transfer_timeout: self.config.transfer_timeout(),
            authorization_ttl: self.config.authorization_ttl(),
        };

        driver.run().await?;
        Ok(live.snapshot())
    }

    /// Finalize a session whose parts are all confirmed.
    ///
    /// Fails with [`CoreError::PartsIncomplete`] without touching the
    /// session or calling the backend if any part lacks an etag. A backend
    /// failure leaves the session `failed`; calling this again retries.
    pub async fn complete(&self, session_id: SessionId) -> Result<UploadSession> {
        let _guard = self.claim(session_id)?;
        self.finish(session_id).await
    }

    async fn finish(&self, session_id: SessionId) -> Result<UploadSession> {
        let mut session = self.store.require(&session_id)?;
        if !session.status.can_transition_to(SessionStatus::Completing) {
            return Err(CoreError::InvalidTransition {
                from: session.status,
                to: SessionStatus::Completing,
            }
            .into());
        }
        let parts = session.completed_parts()?;

        session.transition(SessionStatus::Completing)?;
        self.store.put(&session)?;

        match self
            .storage
            .complete_multipart(&session.upload_id, &session.storage_key, &parts)
            .await
        {
            Ok(()) => {
                session.transition(SessionStatus::Completed)?;
                self.store.put(&session)?;
                info!(session_id = %session.id, key = %session.storage_key, size = session.total_size, "upload completed");
                Ok(session)
            }
            Err(e) => {
                error!(session_id = %session.id, "completion failed: {}", e);
                session.fail(e.to_string())?;
                self.store.put(&session)?;
                Err(e)
            }
        }
    }

    /// Abort the backend upload and mark the session `aborted`.
    ///
    /// Aborting an aborted session does nothing. A backend failure is logged
    /// and the session is still marked aborted.
    pub async fn abort(&self, session_id: SessionId) -> Result<UploadSession> {
        let mut session = self.store.require(&session_id)?;
        if session.status == SessionStatus::Aborted {
            return Ok(session);
        }
        if !session.status.can_transition_to(SessionStatus::Aborted) {
            return Err(CoreError::InvalidTransition {
                from: session.status,
                to: SessionStatus::Aborted,
            }
            .into());
        }
        if !session.has_backend_session() {
            return Err(ClientError::NoBackendSession(session_id));
        }

        if let Err(e) = self
            .storage
            .abort_multipart(&session.upload_id, &session.storage_key)
            .await
        {
            warn!(session_id = %session.id, upload_id = %session.upload_id, "backend abort failed: {}", e);
        }

        session.transition(SessionStatus::Aborted)?;
        self.store.put(&session)?;
        info!(session_id = %session.id, "upload aborted");
        Ok(session)
    }

    /// Validate, initiate, upload and complete `file` in one go.
    ///
    /// Cancellation aborts the session and returns [`ClientError::Cancelled`].
    /// A failed part leaves the session `in_progress` for [`Self::resume`].
    pub async fn upload(
        &self,
        file: &UploadFile,
        cancel: &CancelFlag,
        observer: &dyn UploadObserver,
    ) -> Result<UploadSession> {
        observer.on_planning();
        let total_size = file.len();
        validate_file_size(total_size, &self.config)?;
        let chunk_size = chunk_size_for(total_size, &self.config);

        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let session = self
            .initiate(&file.filename, &file.mime_type, total_size, chunk_size)
            .await?;
        let _guard = self.claim(session.id)?;
        observer.on_started(&session);

        self.drive(session.id, file.source.as_ref(), cancel, observer)
            .await
    }

    /// Continue an `in_progress` session (or retry finalizing a `failed`
    /// one) using `file`, which must have the recorded size.
    pub async fn resume(
        &self,
        session_id: SessionId,
        file: &UploadFile,
        cancel: &CancelFlag,
        observer: &dyn UploadObserver,
    ) -> Result<UploadSession> {
        let _guard = self.claim(session_id)?;
        let session = self.store.require(&session_id)?;

        match session.status {
            SessionStatus::InProgress => {}
            SessionStatus::Failed if session.outstanding_parts().is_empty() => {}
            status => {
                return Err(ClientError::InvalidState(format!(
                    "session {} is {} and cannot be resumed",
                    session_id, status
                )))
            }
        }
        if file.len() != session.total_size {
            return Err(ClientError::InvalidState(format!(
                "file is {} bytes but session {} expects {}",
                file.len(),
                session_id,
                session.total_size
            )));
        }

        info!(
            session_id = %session_id,
            remaining = session.outstanding_parts().len(),
            "resuming upload"
        );
        observer.on_started(&session);

        if session.status == SessionStatus::Failed {
            observer.on_completing();
            return self.finish(session_id).await;
        }
        self.drive(session_id, file.source.as_ref(), cancel, observer)
            .await
    }

    /// Parts then completion, with cancellation turned into an abort.
    /// Callers hold the session claim.
    async fn drive(
        &self,
        session_id: SessionId,
        source: &dyn PartSource,
        cancel: &CancelFlag,
        observer: &dyn UploadObserver,
    ) -> Result<UploadSession> {
        let result = match self.drive_parts(session_id, source, cancel, observer).await {
            Ok(_) if cancel.is_cancelled() => Err(ClientError::Cancelled),
            Ok(_) => {
                observer.on_completing();
                self.finish(session_id).await
            }
            // A cancel raised while the last attempt was failing still wins
            Err(e) if cancel.is_cancelled() => {
                debug!(session_id = %session_id, "failure after cancel: {}", e);
                Err(ClientError::Cancelled)
            }
            Err(e) => Err(e),
        };

        match result {
            Err(ClientError::Cancelled) => {
                info!(session_id = %session_id, "upload cancelled, aborting session");
                match self.abort(session_id).await {
                    Ok(_) | Err(ClientError::NoBackendSession(_)) => {}
                    Err(e) => warn!(session_id = %session_id, "abort after cancel failed: {}", e),
                }
                Err(ClientError::Cancelled)
            }
            Err(e) => {
                error!(session_id = %session_id, "upload failed: {}", e);
                Err(e)
            }
            Ok(session) => Ok(session),
        }
    }

    pub fn get_session(&self, session_id: SessionId) -> Result<UploadSession> {
        Ok(self.store.require(&session_id)?)
    }

    /// Sessions newest first, optionally only those in `status`
    pub fn list_sessions(&self, status: Option<SessionStatus>) -> Result<Vec<UploadSession>> {
        Ok(self.store.list(status)?)
    }

    /// Time-limited download URL for a completed session's object
    pub async fn completed_download_url(&self, session_id: SessionId) -> Result<String> {
        let session = self.store.require(&session_id)?;
        if session.status != SessionStatus::Completed {
            return Err(ClientError::InvalidState(format!(
                "session {} is {}, not completed",
                session_id, session.status
            )));
        }
        self.storage
            .download_url(&session.storage_key, self.config.download_url_ttl())
            .await
    }

    /// Remove a session record, deleting the stored object first if the
    /// session completed. Returns whether a record existed.
    pub async fn delete_session(&self, session_id: SessionId) -> Result<bool> {
        let _guard = self.claim(session_id)?;
        let Some(session) = self.store.get(&session_id)? else {
            return Ok(false);
        };

        if session.status == SessionStatus::Completed {
            self.storage.delete_object(&session.storage_key).await?;
            info!(session_id = %session_id, key = %session.storage_key, "stored object deleted");
        }

        let removed = self.store.delete(&session_id)?;
        info!(session_id = %session_id, "session record deleted");
        Ok(removed)
    }

    /// [`Self::upload`] without an observer
    pub async fn upload_file(&self, file: &UploadFile, cancel: &CancelFlag) -> Result<UploadSession> {
        self.upload(file, cancel, &NoopObserver).await
    }
}
