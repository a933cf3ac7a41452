//! Drives the outstanding parts of one session to the storage backend
//!
//! Parts go out in batches of `concurrency`, ascending by part number. Each
//! batch costs one `authorize_parts` call; the batch's transfers then run as
//! interleaved futures on the calling task. The next batch is not authorized
//! until every transfer of the current one has settled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use partwise_core::{project_progress, Etag, SessionStore, UploadProgress, UploadSession};
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::{ClientError, ObjectStorage, PartAuthorization, PartSource, PartTransport, Result, RetryPolicy};

/// Cooperative cancellation signal shared between a driver and its owner
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<CancelState>);

#[derive(Debug, Default)]
struct CancelState {
    raised: AtomicBool,
    wake: Notify,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.raised.store(true, Ordering::SeqCst);
        self.0.wake.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.raised.load(Ordering::SeqCst)
    }

    /// Resolves once the flag is raised
    pub async fn cancelled(&self) {
        loop {
            // Registered before the check so a concurrent cancel is not missed
            let notified = self.0.wake.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn reset(&self) {
        self.0.raised.store(false, Ordering::SeqCst);
    }
}

/// Receives lifecycle and progress notifications while an upload runs.
/// Every method defaults to doing nothing.
pub trait UploadObserver: Send + Sync {
    /// Chunk planning and file checks are running
    fn on_planning(&self) {}

    /// The backend session exists and part transfers are about to start
    fn on_started(&self, _session: &UploadSession) {}

    fn on_progress(&self, _progress: &UploadProgress) {}

    /// All parts are in; finalization has been requested
    fn on_completing(&self) {}
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl UploadObserver for NoopObserver {}

/// In-memory copy of a session whose every mutation is written through to
/// the store. The lock is never held across an await.
pub(crate) struct LiveSession<'a> {
    session: Mutex<UploadSession>,
    store: &'a dyn SessionStore,
    observer: &'a dyn UploadObserver,
    started: Instant,
}

impl<'a> LiveSession<'a> {
    pub(crate) fn new(
        session: UploadSession,
        store: &'a dyn SessionStore,
        observer: &'a dyn UploadObserver,
    ) -> Self {
        LiveSession {
            session: Mutex::new(session),
            store,
            observer,
            started: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, UploadSession> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn snapshot(&self) -> UploadSession {
        self.lock().clone()
    }

    /// Apply `change`, persist the whole record, then notify the observer
    /// with `current_part` set.
    fn update<R>(
        &self,
        current_part: Option<u32>,
        change: impl FnOnce(&mut UploadSession) -> partwise_core::Result<R>,
    ) -> Result<R> {
        let mut session = self.lock();
        let result = change(&mut session)?;
        self.store.put(&session)?;

        let mut progress = project_progress(&session, self.started.elapsed());
        progress.current_part = current_part;
        drop(session);

        self.observer.on_progress(&progress);
        Ok(result)
    }
}

pub(crate) struct PartDriver<'a> {
    pub live: &'a LiveSession<'a>,
    pub storage: &'a dyn ObjectStorage,
    pub transport: &'a dyn PartTransport,
    pub source: &'a dyn PartSource,
    pub cancel: &'a CancelFlag,
    pub policy: RetryPolicy,
    pub concurrency: usize,
    pub transfer_timeout: Duration,
    pub authorization_ttl: Duration,
}

impl PartDriver<'_> {
    /// Upload every part that has no confirmed etag yet
    pub async fn run(&self) -> Result<()> {
        let session = self.live.snapshot();
        let outstanding = session.outstanding_parts();
        debug!(
            session_id = %session.id,
            outstanding = outstanding.len(),
            total = session.total_parts(),
            "uploading parts"
        );

        for batch in outstanding.chunks(self.concurrency.max(1)) {
            if self.cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            let mut authorizations: HashMap<u32, PartAuthorization> = self
                .storage
                .authorize_parts(
                    &session.upload_id,
                    &session.storage_key,
                    batch,
                    self.authorization_ttl,
                )
                .await?
                .into_iter()
                .map(|auth| (auth.part_number, auth))
                .collect();

            let transfers = batch
                .iter()
                .map(|&part_number| self.upload_part(&session, part_number, authorizations.remove(&part_number)));
            let results = join_all(transfers).await;

            settle_batch(results)?;
        }

        Ok(())
    }

    async fn upload_part(
        &self,
        session: &UploadSession,
        part_number: u32,
        authorization: Option<PartAuthorization>,
    ) -> Result<()> {
        let Some(mut authorization) = authorization else {
            error!(session_id = %session.id, part_number, "no authorization returned for part");
            self.live
                .update(Some(part_number), |s| s.mark_part_failed(part_number))?;
            return Err(ClientError::AuthorizationMissing(part_number));
        };

        let part = session.part(part_number)?;
        let start = (part_number as u64 - 1) * session.chunk_size;
        let end = start + part.size;

        let mut attempt = 1;
        loop {
            if self.cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            self.live
                .update(Some(part_number), |s| s.mark_part_uploading(part_number))?;

            match self.attempt(session, part_number, &mut authorization, start, end).await {
                Ok(etag) => {
                    // Results that land after cancellation are discarded
                    if self.cancel.is_cancelled() {
                        return Err(ClientError::Cancelled);
                    }
                    self.live
                        .update(Some(part_number), |s| s.confirm_part(part_number, etag))?;
                    debug!(session_id = %session.id, part_number, attempt, "part confirmed");
                    return Ok(());
                }
                Err(e) if self.policy.allows_retry_after(attempt) => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        session_id = %session.id,
                        part_number,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "part attempt failed, retrying: {}",
                        e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return Err(ClientError::Cancelled),
                    }
                    attempt += 1;
                }
                Err(e) => {
                    error!(session_id = %session.id, part_number, attempt, "part failed: {}", e);
                    self.live
                        .update(Some(part_number), |s| s.mark_part_failed(part_number))?;
                    return Err(ClientError::PartUpload {
                        part_number,
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    /// One transfer of one part
    async fn attempt(
        &self,
        session: &UploadSession,
        part_number: u32,
        authorization: &mut PartAuthorization,
        start: u64,
        end: u64,
    ) -> Result<Etag> {
        if authorization.is_expired(Utc::now()) {
            *authorization = self.refresh(session, part_number).await?;
        }

        let body = self.source.read_range(start, end).await?;
        let outcome = tokio::time::timeout(
            self.transfer_timeout,
            self.transport.put_part(&authorization.url, body),
        )
        .await
        .map_err(|_| ClientError::Timeout(self.transfer_timeout))??;

        if !outcome.is_success() {
            return Err(ClientError::Transport(format!(
                "part {} rejected with HTTP {}",
                part_number, outcome.status
            )));
        }

        outcome.etag().ok_or(ClientError::MissingEtag(part_number))
    }

    async fn refresh(&self, session: &UploadSession, part_number: u32) -> Result<PartAuthorization> {
        debug!(session_id = %session.id, part_number, "refreshing expired authorization");
        self.storage
            .authorize_parts(
                &session.upload_id,
                &session.storage_key,
                &[part_number],
                self.authorization_ttl,
            )
            .await?
            .into_iter()
            .find(|auth| auth.part_number == part_number)
            .ok_or(ClientError::AuthorizationMissing(part_number))
    }
}

/// Reduce a batch's results to its outcome. A real failure outranks
/// cancellation so the caller sees why the batch broke.
fn settle_batch(results: Vec<Result<()>>) -> Result<()> {
    let mut cancelled = false;
    for result in results {
        match result {
            Ok(()) => {}
            Err(ClientError::Cancelled) => cancelled = true,
            Err(e) => return Err(e),
        }
    }
    if cancelled {
        Err(ClientError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
        clone.reset();
        assert!(!flag.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let flag = CancelFlag::new();
        let waiter = {
            let flag = flag.clone();
            tokio::spawn(async move { flag.cancelled().await })
        };
        tokio::task::yield_now().await;
        flag.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();

        // Already raised: returns immediately
        tokio::time::timeout(Duration::from_millis(10), flag.cancelled())
            .await
            .unwrap();
    }

    #[test]
    fn test_settle_batch_prefers_failures() {
        assert!(settle_batch(vec![Ok(()), Ok(())]).is_ok());
        assert!(matches!(
            settle_batch(vec![Ok(()), Err(ClientError::Cancelled)]),
            Err(ClientError::Cancelled)
        ));
        assert!(matches!(
            settle_batch(vec![
                Err(ClientError::Cancelled),
                Err(ClientError::MissingEtag(2)),
            ]),
            Err(ClientError::MissingEtag(2))
        ));
    }
}
