//! Scriptable storage backend, transport and session store for driving the
//! orchestrator without a network

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use partwise_client::*;
use partwise_core::{
    CompletedPart, CoreError, MemorySessionStore, SessionId, SessionStatus, SessionStore,
    StorageKey, UploadConfig, UploadSession,
};

/// Config with tiny chunks and near-instant retries: 4-byte parts, three
/// parts per batch, three attempts per part
pub fn test_config() -> UploadConfig {
    UploadConfig {
        small_chunk_size: 4,
        large_chunk_size: 8,
        large_file_threshold: 1024 * 1024,
        min_file_size: 0,
        max_file_size: 1024 * 1024,
        concurrency: 3,
        max_attempts: 3,
        base_retry_delay_ms: 1,
        transfer_timeout_secs: 5,
        authorization_ttl_secs: 60,
        download_url_ttl_secs: 60,
    }
}

/// 14 bytes: parts of 4, 4, 4 and 2 under [`test_config`]
pub fn sample_file() -> UploadFile {
    UploadFile::from_bytes(
        "report.pdf",
        "application/pdf",
        Bytes::from_static(b"abcdefghijklmn"),
    )
}

#[derive(Debug, Default)]
pub struct StorageLog {
    pub created: Vec<(String, StorageKey, String)>,
    pub authorize_calls: Vec<Vec<u32>>,
    pub completed: Vec<(String, Vec<CompletedPart>)>,
    pub aborted: Vec<String>,
    pub deleted: Vec<StorageKey>,
    pub download_urls: Vec<StorageKey>,
}

#[derive(Default)]
pub struct MockStorage {
    pub log: Mutex<StorageLog>,
    next_id: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_complete: AtomicBool,
    pub fail_abort: AtomicBool,
    /// The first authorize call hands out already-expired URLs
    pub expire_first_batch: AtomicBool,
    /// Part numbers the backend silently leaves out of authorize responses
    pub withhold: Mutex<HashSet<u32>>,
}

impl MockStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn authorize_calls(&self) -> Vec<Vec<u32>> {
        self.log.lock().unwrap().authorize_calls.clone()
    }

    pub fn completed(&self) -> Vec<(String, Vec<CompletedPart>)> {
        self.log.lock().unwrap().completed.clone()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.log.lock().unwrap().aborted.clone()
    }

    pub fn created_count(&self) -> usize {
        self.log.lock().unwrap().created.len()
    }
}

fn backend_down(op: &str) -> ClientError {
    ClientError::Backend(format!("{} unavailable", op))
}

#[async_trait]
impl ObjectStorage for MockStorage {
    async fn create_multipart(&self, key: &StorageKey, content_type: &str) -> Result<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(backend_down("create"));
        }
        let upload_id = format!("upload-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.log.lock().unwrap().created.push((
            upload_id.clone(),
            key.clone(),
            content_type.to_string(),
        ));
        Ok(upload_id)
    }

    async fn authorize_parts(
        &self,
        upload_id: &str,
        _key: &StorageKey,
        part_numbers: &[u32],
        ttl: Duration,
    ) -> Result<Vec<PartAuthorization>> {
        let first = {
            let mut log = self.log.lock().unwrap();
            log.authorize_calls.push(part_numbers.to_vec());
            log.authorize_calls.len() == 1
        };
        let expires_at = if first && self.expire_first_batch.load(Ordering::SeqCst) {
            Utc::now() - chrono::Duration::seconds(1)
        } else {
            Utc::now() + chrono::Duration::from_std(ttl).unwrap()
        };

        let withhold = self.withhold.lock().unwrap().clone();
        Ok(part_numbers
            .iter()
            .filter(|n| !withhold.contains(n))
            .map(|&part_number| PartAuthorization {
                part_number,
                url: format!("mock://{}/{}", upload_id, part_number),
                expires_at,
            })
            .collect())
    }

    async fn complete_multipart(
        &self,
        upload_id: &str,
        _key: &StorageKey,
        parts: &[CompletedPart],
    ) -> Result<()> {
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(backend_down("complete"));
        }
        self.log
            .lock()
            .unwrap()
            .completed
            .push((upload_id.to_string(), parts.to_vec()));
        Ok(())
    }

    async fn abort_multipart(&self, upload_id: &str, _key: &StorageKey) -> Result<()> {
        self.log.lock().unwrap().aborted.push(upload_id.to_string());
        if self.fail_abort.load(Ordering::SeqCst) {
            return Err(backend_down("abort"));
        }
        Ok(())
    }

    async fn delete_object(&self, key: &StorageKey) -> Result<()> {
        self.log.lock().unwrap().deleted.push(key.clone());
        Ok(())
    }

    async fn download_url(&self, key: &StorageKey, ttl: Duration) -> Result<String> {
        self.log.lock().unwrap().download_urls.push(key.clone());
        Ok(format!("mock://objects/{}?ttl={}", key, ttl.as_secs()))
    }
}

/// How the transport answers one PUT
#[derive(Debug, Clone)]
pub enum Reply {
    Ok,
    Status(u16),
    NoEtag,
    Error,
    /// Sleep, then answer `Ok`
    Slow(Duration),
}

#[derive(Default)]
pub struct MockTransport {
    /// Scripted replies per part, consumed front to back; `Ok` once empty
    script: Mutex<HashMap<u32, VecDeque<Reply>>>,
    /// Parts whose every attempt gets this reply
    always: Mutex<HashMap<u32, Reply>>,
    /// (part number, body length) per PUT, in arrival order
    pub puts: Mutex<Vec<(u32, usize)>>,
    /// Applied before every reply
    pub delay: Mutex<Duration>,
    /// Raised when the PUT for this part arrives
    cancel_on: Mutex<Option<(u32, CancelFlag)>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, part_number: u32, replies: impl IntoIterator<Item = Reply>) {
        self.script
            .lock()
            .unwrap()
            .insert(part_number, replies.into_iter().collect());
    }

    pub fn always(&self, part_number: u32, reply: Reply) {
        self.always.lock().unwrap().insert(part_number, reply);
    }

    pub fn heal(&self) {
        self.always.lock().unwrap().clear();
        self.script.lock().unwrap().clear();
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn cancel_on(&self, part_number: u32, flag: CancelFlag) {
        *self.cancel_on.lock().unwrap() = Some((part_number, flag));
    }

    pub fn puts_for(&self, part_number: u32) -> usize {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| *n == part_number)
            .count()
    }

    fn next_reply(&self, part_number: u32) -> Reply {
        if let Some(reply) = self.always.lock().unwrap().get(&part_number) {
            return reply.clone();
        }
        self.script
            .lock()
            .unwrap()
            .get_mut(&part_number)
            .and_then(|replies| replies.pop_front())
            .unwrap_or(Reply::Ok)
    }
}

#[async_trait]
impl PartTransport for MockTransport {
    async fn put_part(&self, url: &str, body: Bytes) -> Result<PutOutcome> {
        let part_number: u32 = url.rsplit('/').next().unwrap().parse().unwrap();
        self.puts.lock().unwrap().push((part_number, body.len()));

        if let Some((target, flag)) = self.cancel_on.lock().unwrap().as_ref() {
            if *target == part_number {
                flag.cancel();
            }
        }

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let ok = PutOutcome {
            status: 200,
            etag: Some(format!("\"etag-{}\"", part_number)),
        };
        match self.next_reply(part_number) {
            Reply::Ok => Ok(ok),
            Reply::Slow(pause) => {
                tokio::time::sleep(pause).await;
                Ok(ok)
            }
            Reply::Status(status) => Ok(PutOutcome { status, etag: None }),
            Reply::NoEtag => Ok(PutOutcome {
                status: 200,
                etag: None,
            }),
            Reply::Error => Err(ClientError::Transport("connection reset".to_string())),
        }
    }
}

/// Memory store whose writes can be switched off
#[derive(Default)]
pub struct FlakyStore {
    inner: MemorySessionStore,
    pub fail_inserts: AtomicBool,
    pub fail_puts: AtomicBool,
}

impl FlakyStore {
    fn refuse() -> CoreError {
        CoreError::Storage("disk full".to_string())
    }
}

impl SessionStore for FlakyStore {
    fn insert(&self, session: &UploadSession) -> partwise_core::Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(Self::refuse());
        }
        self.inner.insert(session)
    }

    fn get(&self, id: &SessionId) -> partwise_core::Result<Option<UploadSession>> {
        self.inner.get(id)
    }

    fn put(&self, session: &UploadSession) -> partwise_core::Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(Self::refuse());
        }
        self.inner.put(session)
    }

    fn list(&self, status: Option<SessionStatus>) -> partwise_core::Result<Vec<UploadSession>> {
        self.inner.list(status)
    }

    fn delete(&self, id: &SessionId) -> partwise_core::Result<bool> {
        self.inner.delete(id)
    }
}

pub struct Harness {
    pub store: Arc<dyn SessionStore>,
    pub storage: Arc<MockStorage>,
    pub transport: Arc<MockTransport>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemorySessionStore::new()), test_config())
    }

    pub fn with_config(config: UploadConfig) -> Self {
        Self::with_store(Arc::new(MemorySessionStore::new()), config)
    }

    pub fn with_store(store: Arc<dyn SessionStore>, config: UploadConfig) -> Self {
        let storage = MockStorage::new();
        let transport = MockTransport::new();
        let orchestrator = Arc::new(Orchestrator::new(
            store.clone(),
            storage.clone(),
            transport.clone(),
            config,
        ));
        Harness {
            store,
            storage,
            transport,
            orchestrator,
        }
    }

    pub fn session(&self, id: SessionId) -> UploadSession {
        self.store.require(&id).unwrap()
    }
}
