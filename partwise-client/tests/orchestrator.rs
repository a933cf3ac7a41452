//! Orchestrator behaviour against a scripted backend

mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use common::*;
use partwise_client::*;
use partwise_core::{CoreError, Etag, PartStatus, SessionStatus, UploadConfig, UploadProgress};

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
    progress: Mutex<Vec<UploadProgress>>,
}

impl UploadObserver for RecordingObserver {
    fn on_planning(&self) {
        self.events.lock().unwrap().push("planning".to_string());
    }

    fn on_started(&self, session: &partwise_core::UploadSession) {
        self.events
            .lock()
            .unwrap()
            .push(format!("started:{}", session.total_parts()));
    }

    fn on_progress(&self, progress: &UploadProgress) {
        self.progress.lock().unwrap().push(progress.clone());
    }

    fn on_completing(&self) {
        self.events.lock().unwrap().push("completing".to_string());
    }
}

#[tokio::test]
async fn upload_completes_with_sorted_parts() {
    let h = Harness::new();
    let observer = RecordingObserver::default();

    let session = h
        .orchestrator
        .upload(&sample_file(), &CancelFlag::new(), &observer)
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.uploaded_parts, 4);
    assert_eq!(session.bytes_uploaded, 14);
    assert!(session.completed_at.is_some());
    assert_eq!(h.session(session.id).status, SessionStatus::Completed);

    assert_eq!(h.storage.authorize_calls(), vec![vec![1, 2, 3], vec![4]]);
    let completed = h.storage.completed();
    assert_eq!(completed.len(), 1);
    let submitted: Vec<(u32, String)> = completed[0]
        .1
        .iter()
        .map(|p| (p.part_number, p.etag.as_str().to_string()))
        .collect();
    assert_eq!(
        submitted,
        (1..=4).map(|n| (n, format!("etag-{}", n))).collect::<Vec<_>>()
    );

    let sizes: Vec<usize> = {
        let mut puts = h.transport.puts.lock().unwrap().clone();
        puts.sort();
        puts.into_iter().map(|(_, len)| len).collect()
    };
    assert_eq!(sizes, vec![4, 4, 4, 2]);

    let events = observer.events.lock().unwrap().clone();
    assert_eq!(events, vec!["planning", "started:4", "completing"]);
    let last = observer.progress.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last.uploaded_parts, 4);
    assert_eq!(last.percentage, 100.0);
}

#[tokio::test]
async fn part_is_retried_until_it_succeeds() {
    let h = Harness::new();
    h.transport.script(2, [Reply::Status(500), Reply::Error]);

    let session = h
        .orchestrator
        .upload_file(&sample_file(), &CancelFlag::new())
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(h.transport.puts_for(2), 3);
    assert_eq!(h.transport.puts_for(1), 1);
}

#[tokio::test]
async fn exhausted_part_keeps_siblings_and_session_resumes() {
    let h = Harness::new();
    h.transport.always(2, Reply::Status(503));

    let err = h
        .orchestrator
        .upload_file(&sample_file(), &CancelFlag::new())
        .await
        .unwrap_err();
    match err {
        ClientError::PartUpload {
            part_number,
            attempts,
            ..
        } => {
            assert_eq!(part_number, 2);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {}", other),
    }

    let id = h.orchestrator.list_sessions(None).unwrap()[0].id;
    let session = h.session(id);
    assert_eq!(session.status, SessionStatus::InProgress);
    assert_eq!(session.part(1).unwrap().status, PartStatus::Completed);
    assert_eq!(session.part(2).unwrap().status, PartStatus::Failed);
    assert_eq!(session.part(3).unwrap().status, PartStatus::Completed);
    assert_eq!(session.part(4).unwrap().status, PartStatus::Pending);
    assert_eq!(session.uploaded_parts, 2);
    assert_eq!(session.bytes_uploaded, 8);
    assert_eq!(h.storage.authorize_calls(), vec![vec![1, 2, 3]]);
    assert!(h.storage.completed().is_empty());
    assert!(h.storage.aborted().is_empty());

    h.transport.heal();
    let resumed = h
        .orchestrator
        .resume(id, &sample_file(), &CancelFlag::new(), &NoopObserver)
        .await
        .unwrap();

    assert_eq!(resumed.status, SessionStatus::Completed);
    assert_eq!(h.storage.authorize_calls()[1], vec![2, 4]);
    assert_eq!(h.transport.puts_for(1), 1);
    assert_eq!(h.transport.puts_for(2), 4);
    assert_eq!(h.transport.puts_for(3), 1);
    assert_eq!(h.transport.puts_for(4), 1);
}

#[tokio::test]
async fn missing_etag_counts_as_failed_attempt() {
    let h = Harness::new();
    h.transport.always(1, Reply::NoEtag);

    let err = h
        .orchestrator
        .upload_file(&sample_file(), &CancelFlag::new())
        .await
        .unwrap_err();
    match err {
        ClientError::PartUpload {
            part_number,
            reason,
            ..
        } => {
            assert_eq!(part_number, 1);
            assert!(reason.contains("no etag"), "{}", reason);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(h.transport.puts_for(1), 3);
}

#[tokio::test]
async fn withheld_authorization_fails_the_part() {
    let h = Harness::new();
    h.storage.withhold.lock().unwrap().insert(2);

    let err = h
        .orchestrator
        .upload_file(&sample_file(), &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::AuthorizationMissing(2)));

    let session = &h.orchestrator.list_sessions(None).unwrap()[0];
    assert_eq!(session.part(2).unwrap().status, PartStatus::Failed);
    assert_eq!(h.transport.puts_for(2), 0);
}

#[tokio::test]
async fn expired_authorizations_are_refreshed() {
    let h = Harness::new();
    h.storage.expire_first_batch.store(true, Ordering::SeqCst);

    let session = h
        .orchestrator
        .upload_file(&sample_file(), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    let calls = h.storage.authorize_calls();
    assert_eq!(calls.len(), 5);
    assert_eq!(calls[0], vec![1, 2, 3]);
    let mut refreshes = calls[1..4].to_vec();
    refreshes.sort();
    assert_eq!(refreshes, vec![vec![1], vec![2], vec![3]]);
    assert_eq!(calls[4], vec![4]);
}

#[tokio::test]
async fn cancel_mid_upload_aborts_session() {
    let h = Harness::with_config(UploadConfig {
        concurrency: 1,
        ..test_config()
    });
    let cancel = CancelFlag::new();
    h.transport.cancel_on(1, cancel.clone());

    let err = h
        .orchestrator
        .upload_file(&sample_file(), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    // Nothing is authorized once the flag is up
    assert_eq!(h.storage.authorize_calls(), vec![vec![1]]);

    let session = &h.orchestrator.list_sessions(None).unwrap()[0];
    assert_eq!(session.status, SessionStatus::Aborted);
    assert_eq!(h.storage.aborted(), vec![session.upload_id.clone()]);
    // The late success of part 1 was discarded
    assert_eq!(session.uploaded_parts, 0);
    assert!(session.part(1).unwrap().etag.is_none());
    assert!(h.storage.completed().is_empty());
}

#[tokio::test]
async fn cancel_during_final_failed_attempt_still_aborts() {
    let h = Harness::with_config(UploadConfig {
        max_attempts: 1,
        ..test_config()
    });
    let cancel = CancelFlag::new();
    h.transport.always(1, Reply::Error);
    h.transport.cancel_on(1, cancel.clone());

    let err = h
        .orchestrator
        .upload_file(&sample_file(), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());

    let session = &h.orchestrator.list_sessions(None).unwrap()[0];
    assert_eq!(session.status, SessionStatus::Aborted);
    assert_eq!(h.storage.aborted(), vec![session.upload_id.clone()]);
    assert!(h.storage.completed().is_empty());
}

#[tokio::test]
async fn cancel_interrupts_retry_backoff() {
    let h = Harness::with_config(UploadConfig {
        concurrency: 1,
        base_retry_delay_ms: 60_000,
        ..test_config()
    });
    let cancel = CancelFlag::new();
    h.transport.always(1, Reply::Error);

    let run = async {
        let file = sample_file();
        let (result, _) = tokio::join!(h.orchestrator.upload_file(&file, &cancel), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        result
    };
    let err = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("backoff should end on cancel")
        .unwrap_err();
    assert!(err.is_cancelled());

    // Only the first attempt went out
    assert_eq!(h.transport.puts_for(1), 1);
    let session = &h.orchestrator.list_sessions(None).unwrap()[0];
    assert_eq!(session.status, SessionStatus::Aborted);
    assert_eq!(h.storage.aborted().len(), 1);
}

#[tokio::test]
async fn cancel_before_initiation_creates_nothing() {
    let h = Harness::new();
    let cancel = CancelFlag::new();
    cancel.cancel();

    let err = h
        .orchestrator
        .upload_file(&sample_file(), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(h.storage.created_count(), 0);
    assert!(h.orchestrator.list_sessions(None).unwrap().is_empty());
}

#[tokio::test]
async fn out_of_order_confirmations_keep_counters_consistent() {
    let h = Harness::new();
    h.transport.script(1, [Reply::Slow(Duration::from_millis(50))]);
    let observer = RecordingObserver::default();

    let session = h
        .orchestrator
        .upload(&sample_file(), &CancelFlag::new(), &observer)
        .await
        .unwrap();
    assert!(session.counters_consistent());

    let progress = observer.progress.lock().unwrap().clone();
    let first_confirmation = progress.iter().find(|p| p.uploaded_parts == 1).unwrap();
    assert_ne!(first_confirmation.current_part, Some(1));

    let counts: Vec<u32> = progress.iter().map(|p| p.uploaded_parts).collect();
    assert!(counts.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(counts.last(), Some(&4));
}

#[tokio::test]
async fn complete_requires_every_part() {
    let h = Harness::new();
    let session = h
        .orchestrator
        .initiate("a.bin", "application/octet-stream", 14, 4)
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::InProgress);

    let err = h.orchestrator.complete(session.id).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Core(CoreError::PartsIncomplete { missing: 4, total: 4 })
    ));
    assert!(h.storage.completed().is_empty());
    assert_eq!(h.session(session.id).status, SessionStatus::InProgress);
}

#[tokio::test]
async fn failed_completion_can_be_retried() {
    let h = Harness::new();
    h.storage.fail_complete.store(true, Ordering::SeqCst);

    let err = h
        .orchestrator
        .upload_file(&sample_file(), &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Backend(_)));

    let id = h.orchestrator.list_sessions(None).unwrap()[0].id;
    let failed = h.session(id);
    assert_eq!(failed.status, SessionStatus::Failed);
    assert!(failed.error_message.as_deref().unwrap().contains("complete unavailable"));
    assert_eq!(failed.uploaded_parts, 4);

    h.storage.fail_complete.store(false, Ordering::SeqCst);
    let done = h.orchestrator.complete(id).await.unwrap();
    assert_eq!(done.status, SessionStatus::Completed);
    assert!(done.error_message.is_none());
}

#[tokio::test]
async fn resume_of_failed_completion_uploads_nothing() {
    let h = Harness::new();
    h.storage.fail_complete.store(true, Ordering::SeqCst);
    let _ = h
        .orchestrator
        .upload_file(&sample_file(), &CancelFlag::new())
        .await;
    let id = h.orchestrator.list_sessions(None).unwrap()[0].id;
    let puts_before = h.transport.puts.lock().unwrap().len();

    h.storage.fail_complete.store(false, Ordering::SeqCst);
    let done = h
        .orchestrator
        .resume(id, &sample_file(), &CancelFlag::new(), &NoopObserver)
        .await
        .unwrap();

    assert_eq!(done.status, SessionStatus::Completed);
    assert_eq!(h.transport.puts.lock().unwrap().len(), puts_before);
    assert_eq!(h.storage.authorize_calls().len(), 2);
}

#[tokio::test]
async fn second_driver_is_rejected() {
    let h = Harness::new();
    h.transport.set_delay(Duration::from_millis(20));
    let session = h
        .orchestrator
        .initiate("a.bin", "application/octet-stream", 14, 4)
        .await
        .unwrap();
    let file = sample_file();
    let cancel = CancelFlag::new();

    let (first, second) = tokio::join!(
        h.orchestrator
            .upload_parts(session.id, file.source.as_ref(), &cancel, &NoopObserver),
        h.orchestrator
            .upload_parts(session.id, file.source.as_ref(), &cancel, &NoopObserver),
    );

    assert_eq!(first.unwrap().uploaded_parts, 4);
    assert!(matches!(second, Err(ClientError::AlreadyRunning(id)) if id == session.id));

    // The claim is released afterwards
    assert_eq!(
        h.orchestrator.complete(session.id).await.unwrap().status,
        SessionStatus::Completed
    );
}

#[tokio::test]
async fn failed_initiation_leaves_no_record() {
    let h = Harness::new();
    h.storage.fail_create.store(true, Ordering::SeqCst);

    let err = h
        .orchestrator
        .upload_file(&sample_file(), &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Initiation(_)));
    assert!(h.orchestrator.list_sessions(None).unwrap().is_empty());
    assert!(h.storage.authorize_calls().is_empty());
}

#[tokio::test]
async fn unrecordable_session_is_aborted_on_backend() {
    let store = Arc::new(FlakyStore::default());
    store.fail_inserts.store(true, Ordering::SeqCst);
    let h = Harness::with_store(store.clone(), test_config());

    let err = h
        .orchestrator
        .initiate("a.bin", "application/octet-stream", 14, 4)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Core(CoreError::Storage(_))));
    assert_eq!(h.storage.aborted(), vec!["upload-1".to_string()]);
    assert!(h.orchestrator.list_sessions(None).unwrap().is_empty());
}

#[tokio::test]
async fn abort_is_idempotent_and_tolerates_backend_failure() {
    let h = Harness::new();
    let session = h
        .orchestrator
        .initiate("a.bin", "application/octet-stream", 14, 4)
        .await
        .unwrap();

    h.storage.fail_abort.store(true, Ordering::SeqCst);
    let aborted = h.orchestrator.abort(session.id).await.unwrap();
    assert_eq!(aborted.status, SessionStatus::Aborted);
    assert_eq!(h.session(session.id).status, SessionStatus::Aborted);

    let again = h.orchestrator.abort(session.id).await.unwrap();
    assert_eq!(again.status, SessionStatus::Aborted);
    assert_eq!(h.storage.aborted().len(), 1);

    // Aborted sessions take no more parts
    let file = sample_file();
    let err = h
        .orchestrator
        .upload_parts(session.id, file.source.as_ref(), &CancelFlag::new(), &NoopObserver)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidState(_)));
}

#[tokio::test]
async fn completed_session_cannot_be_aborted() {
    let h = Harness::new();
    let session = h
        .orchestrator
        .upload_file(&sample_file(), &CancelFlag::new())
        .await
        .unwrap();

    let err = h.orchestrator.abort(session.id).await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Core(CoreError::InvalidTransition {
            from: SessionStatus::Completed,
            to: SessionStatus::Aborted,
        })
    ));
    assert!(h.storage.aborted().is_empty());
}

#[tokio::test]
async fn file_size_bounds_are_checked_before_initiation() {
    let h = Harness::with_config(UploadConfig {
        min_file_size: 100,
        ..test_config()
    });

    let err = h
        .orchestrator
        .upload_file(&sample_file(), &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Core(CoreError::InvalidFile(_))));

    let empty = UploadFile::from_bytes("empty.txt", "text/plain", Bytes::new());
    let err = h
        .orchestrator
        .upload_file(&empty, &CancelFlag::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("File is empty"));
    assert_eq!(h.storage.created_count(), 0);
}

#[tokio::test]
async fn resume_checks_state_and_size() {
    let h = Harness::new();
    let session = h
        .orchestrator
        .initiate("a.bin", "application/octet-stream", 14, 4)
        .await
        .unwrap();

    let wrong_size = UploadFile::from_bytes("a.bin", "application/octet-stream", Bytes::from_static(b"short"));
    let err = h
        .orchestrator
        .resume(session.id, &wrong_size, &CancelFlag::new(), &NoopObserver)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::InvalidState(_)));
    assert!(h.transport.puts.lock().unwrap().is_empty());

    h.orchestrator.abort(session.id).await.unwrap();
    let err = h
        .orchestrator
        .resume(session.id, &sample_file(), &CancelFlag::new(), &NoopObserver)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("cannot be resumed"));
}

#[tokio::test]
async fn download_url_and_delete() {
    let h = Harness::new();
    let pending = h
        .orchestrator
        .initiate("a.bin", "application/octet-stream", 14, 4)
        .await
        .unwrap();
    assert!(matches!(
        h.orchestrator.completed_download_url(pending.id).await,
        Err(ClientError::InvalidState(_))
    ));

    let done = h
        .orchestrator
        .upload_file(&sample_file(), &CancelFlag::new())
        .await
        .unwrap();
    let url = h.orchestrator.completed_download_url(done.id).await.unwrap();
    assert!(url.contains(done.storage_key.as_str()));
    assert!(url.ends_with("ttl=60"));

    let completed = h
        .orchestrator
        .list_sessions(Some(SessionStatus::Completed))
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].id, done.id);

    assert!(h.orchestrator.delete_session(done.id).await.unwrap());
    assert_eq!(
        h.storage.log.lock().unwrap().deleted,
        vec![done.storage_key.clone()]
    );
    assert!(!h.orchestrator.delete_session(done.id).await.unwrap());

    // Unfinished sessions only lose their record
    assert!(h.orchestrator.delete_session(pending.id).await.unwrap());
    assert_eq!(h.storage.log.lock().unwrap().deleted.len(), 1);
    assert!(matches!(
        h.orchestrator.get_session(pending.id),
        Err(ClientError::Core(CoreError::SessionNotFound(_)))
    ));
}

#[test]
fn etags_from_transport_are_unquoted() {
    let outcome = PutOutcome {
        status: 200,
        etag: Some("\"abc\"".to_string()),
    };
    assert_eq!(outcome.etag(), Some(Etag::new("abc")));
}
