//! Observable handle over one upload operation

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use partwise_core::{SessionId, UploadProgress, UploadSession};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::{CancelFlag, ClientError, Orchestrator, Result, UploadFile, UploadObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPhase {
    Idle,
    Chunking,
    Uploading,
    Completing,
    Completed,
    Error,
    Cancelled,
}

impl UploadPhase {
    /// Whether the operation has finished, one way or another
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            UploadPhase::Completed | UploadPhase::Error | UploadPhase::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSnapshot {
    pub phase: UploadPhase,
    pub progress: UploadProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

impl Default for UploadSnapshot {
    fn default() -> Self {
        UploadSnapshot {
            phase: UploadPhase::Idle,
            progress: UploadProgress::default(),
            error: None,
            session_id: None,
        }
    }
}

/// One upload at a time, with its state published through a watch channel.
///
/// ```no_run
/// # async fn run(orchestrator: std::sync::Arc<partwise_client::Orchestrator>) -> partwise_client::Result<()> {
/// use partwise_client::{Upload, UploadFile};
///
/// let upload = Upload::new(orchestrator);
/// let mut updates = upload.subscribe();
/// tokio::spawn(async move {
///     while updates.changed().await.is_ok() {
///         println!("{:.1}%", updates.borrow().progress.percentage);
///     }
/// });
///
/// let file = UploadFile::open("backup.tar").await?;
/// let outcome = upload.start(file).await?;
/// println!("finished as {:?}", outcome.phase);
/// # Ok(())
/// # }
/// ```
pub struct Upload {
    orchestrator: Arc<Orchestrator>,
    cancel: CancelFlag,
    state: watch::Sender<UploadSnapshot>,
    running: AtomicBool,
}

impl Upload {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let (state, _) = watch::channel(UploadSnapshot::default());
        Upload {
            orchestrator,
            cancel: CancelFlag::new(),
            state,
            running: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> UploadSnapshot {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UploadSnapshot> {
        self.state.subscribe()
    }

    /// Ask a running upload to stop; it aborts its session and ends in
    /// [`UploadPhase::Cancelled`]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Upload `file` and return the final snapshot.
    ///
    /// Failures and cancellation are reported through the snapshot's phase.
    /// The only error is starting while another `start` is still running.
    pub async fn start(&self, file: UploadFile) -> Result<UploadSnapshot> {
        let _running = self.enter()?;

        self.cancel.reset();
        self.state.send_replace(UploadSnapshot::default());

        let observer = SnapshotPublisher { state: &self.state };
        let result = self
            .orchestrator
            .upload(&file, &self.cancel, &observer)
            .await;
        self.publish_outcome(result);

        Ok(self.snapshot())
    }

    /// Continue a stored session with the same file
    pub async fn resume(&self, session_id: SessionId, file: UploadFile) -> Result<UploadSnapshot> {
        let _running = self.enter()?;

        self.cancel.reset();
        self.state.send_replace(UploadSnapshot {
            session_id: Some(session_id),
            ..UploadSnapshot::default()
        });

        let observer = SnapshotPublisher { state: &self.state };
        let result = self
            .orchestrator
            .resume(session_id, &file, &self.cancel, &observer)
            .await;
        self.publish_outcome(result);

        Ok(self.snapshot())
    }

    fn enter(&self) -> Result<RunningGuard<'_>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ClientError::InvalidState(
                "an upload is already running on this handle".to_string(),
            ));
        }
        Ok(RunningGuard(&self.running))
    }

    fn publish_outcome(&self, result: Result<UploadSession>) {
        self.state.send_modify(|snapshot| match result {
            Ok(session) => {
                snapshot.phase = UploadPhase::Completed;
                snapshot.session_id = Some(session.id);
                snapshot.progress.percentage = session.percentage();
                snapshot.progress.uploaded_parts = session.uploaded_parts;
                snapshot.progress.total_parts = session.total_parts();
                snapshot.progress.uploaded_bytes = session.bytes_uploaded;
                snapshot.progress.total_bytes = session.total_size;
                snapshot.progress.current_part = None;
                snapshot.progress.estimated_time_remaining = 0.0;
                snapshot.error = None;
            }
            Err(ClientError::Cancelled) => {
                snapshot.phase = UploadPhase::Cancelled;
                snapshot.error = None;
            }
            Err(e) => {
                snapshot.phase = UploadPhase::Error;
                snapshot.error = Some(e.to_string());
            }
        });
    }
}

/// Clears the running flag even if the `start` future is dropped
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct SnapshotPublisher<'a> {
    state: &'a watch::Sender<UploadSnapshot>,
}

impl UploadObserver for SnapshotPublisher<'_> {
    fn on_planning(&self) {
        self.state.send_modify(|s| s.phase = UploadPhase::Chunking);
    }

    fn on_started(&self, session: &UploadSession) {
        self.state.send_modify(|s| {
            s.phase = UploadPhase::Uploading;
            s.session_id = Some(session.id);
            s.progress.total_parts = session.total_parts();
            s.progress.total_bytes = session.total_size;
            s.progress.uploaded_parts = session.uploaded_parts;
            s.progress.uploaded_bytes = session.bytes_uploaded;
            s.progress.percentage = session.percentage();
        });
    }

    fn on_progress(&self, progress: &UploadProgress) {
        self.state.send_modify(|s| s.progress = progress.clone());
    }

    fn on_completing(&self) {
        self.state.send_modify(|s| {
            s.phase = UploadPhase::Completing;
            s.progress.current_part = None;
        });
    }
}
