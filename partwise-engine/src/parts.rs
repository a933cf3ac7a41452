//! Staging area for multipart uploads and the objects they assemble into
//!
//! Layout:
//! - `multipart`: upload id → [`StagedUpload`] JSON
//! - `staged_parts`: `{upload_id}/{part_number:be32}` → part bytes
//! - `objects`: storage key → [`StoredObject`] JSON (manifest)
//! - `object_parts`: `{storage_key}\0{index:be32}` → bytes
//!
//! Completing an upload moves each staged part under the object key in one
//! batch, so an object is either fully present or absent.

use chrono::{DateTime, Utc};
use fjall::PartitionHandle;
use partwise_core::{CompletedPart, Etag, StorageKey};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{EngineError, EngineResult, StorageEngine};

/// An open multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagedUpload {
    pub upload_id: String,
    pub key: StorageKey,
    pub content_type: String,
    pub created_at: DateTime<Utc>,
}

/// Manifest of an assembled object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub key: StorageKey,
    pub content_type: String,
    pub size: u64,
    /// blake3 over the part etags, suffixed with the part count
    pub etag: String,
    pub part_sizes: Vec<u64>,
    pub created_at: DateTime<Utc>,
}

impl StoredObject {
    pub fn part_count(&self) -> u32 {
        self.part_sizes.len() as u32
    }
}

/// Etag of a single part: hex blake3 of its bytes
pub fn part_etag(data: &[u8]) -> Etag {
    Etag::new(blake3::hash(data).to_hex().to_string())
}

#[derive(Clone)]
pub struct PartArea {
    engine: StorageEngine,
    uploads: PartitionHandle,
    staged: PartitionHandle,
    objects: PartitionHandle,
    object_parts: PartitionHandle,
}

impl PartArea {
    pub fn new(engine: StorageEngine) -> EngineResult<Self> {
        Ok(Self {
            uploads: engine.partition("multipart")?,
            staged: engine.partition("staged_parts")?,
            objects: engine.partition("objects")?,
            object_parts: engine.partition("object_parts")?,
            engine,
        })
    }

    /// Open a multipart upload for `key` and return its id
    pub fn create_upload(&self, key: &StorageKey, content_type: &str) -> EngineResult<StagedUpload> {
        let upload = StagedUpload {
            upload_id: ulid::Ulid::new().to_string(),
            key: key.clone(),
            content_type: content_type.to_string(),
            created_at: Utc::now(),
        };

        self.uploads
            .insert(upload.upload_id.as_bytes().to_vec(), serde_json::to_vec(&upload)?)?;
        self.engine.persist()?;

        info!(upload_id = %upload.upload_id, key = %upload.key, "multipart upload created");
        Ok(upload)
    }

    pub fn upload(&self, upload_id: &str) -> EngineResult<Option<StagedUpload>> {
        match self.uploads.get(upload_id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|source| {
                EngineError::Corrupt {
                    key: upload_id.to_string(),
                    source,
                }
            })?)),
            None => Ok(None),
        }
    }

    fn require_upload(&self, upload_id: &str) -> EngineResult<StagedUpload> {
        self.upload(upload_id)?
            .ok_or_else(|| EngineError::UnknownUpload(upload_id.to_string()))
    }

    /// Stage one part. Re-sending a part number replaces the earlier bytes.
    pub fn put_part(&self, upload_id: &str, part_number: u32, data: &[u8]) -> EngineResult<Etag> {
        self.require_upload(upload_id)?;
        if part_number == 0 {
            return Err(EngineError::InvalidPartList(
                "part numbers start at 1".to_string(),
            ));
        }

        self.staged
            .insert(staged_key(upload_id, part_number), data.to_vec())?;
        self.engine.persist()?;

        let etag = part_etag(data);
        debug!(upload_id, part_number, size = data.len(), "part staged");
        Ok(etag)
    }

    /// Part numbers staged so far, ascending
    pub fn staged_parts(&self, upload_id: &str) -> EngineResult<Vec<u32>> {
        let prefix = staged_prefix(upload_id);
        let mut parts = Vec::new();
        for item in self.staged.prefix(&prefix) {
            let (key, _) = item?;
            if let Some(raw) = key.get(prefix.len()..).and_then(|b| <[u8; 4]>::try_from(b).ok()) {
                parts.push(u32::from_be_bytes(raw));
            }
        }
        Ok(parts)
    }

    /// Assemble the listed parts into the upload's object.
    ///
    /// `parts` must be non-empty and strictly ascending, and each etag must
    /// match the bytes staged for that part. Staged parts not listed are
    /// discarded.
    pub fn complete(&self, upload_id: &str, parts: &[CompletedPart]) -> EngineResult<StoredObject> {
        let upload = self.require_upload(upload_id)?;

        if parts.is_empty() {
            return Err(EngineError::InvalidPartList("no parts listed".to_string()));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(EngineError::InvalidPartList(
                "part numbers must be strictly ascending".to_string(),
            ));
        }

        let mut batch = self.engine.keyspace().batch();
        let mut part_sizes = Vec::with_capacity(parts.len());
        let mut etag_hasher = blake3::Hasher::new();

        for (index, part) in parts.iter().enumerate() {
            let data = self
                .staged
                .get(staged_key(upload_id, part.part_number))?
                .ok_or(EngineError::MissingPart(part.part_number))?;

            if part_etag(&data) != part.etag {
                return Err(EngineError::EtagMismatch {
                    part_number: part.part_number,
                });
            }

            etag_hasher.update(part.etag.as_str().as_bytes());
            part_sizes.push(data.len() as u64);
            batch.insert(
                &self.object_parts,
                object_part_key(&upload.key, index as u32),
                data.to_vec(),
            );
        }

        let object = StoredObject {
            key: upload.key.clone(),
            content_type: upload.content_type.clone(),
            size: part_sizes.iter().sum(),
            etag: format!("{}-{}", etag_hasher.finalize().to_hex(), parts.len()),
            part_sizes,
            created_at: Utc::now(),
        };

        // Replacing an object with fewer parts must not leave stale tails
        if let Some(previous) = self.object(&upload.key)? {
            for index in object.part_count()..previous.part_count() {
                batch.remove(&self.object_parts, object_part_key(&upload.key, index));
            }
        }

        batch.insert(
            &self.objects,
            upload.key.as_str().as_bytes().to_vec(),
            serde_json::to_vec(&object)?,
        );
        for part_number in self.staged_parts(upload_id)? {
            batch.remove(&self.staged, staged_key(upload_id, part_number));
        }
        batch.remove(&self.uploads, upload_id.as_bytes().to_vec());
        batch.commit()?;
        self.engine.persist()?;

        info!(upload_id, key = %object.key, size = object.size, parts = parts.len(), "multipart upload completed");
        Ok(object)
    }

    /// Drop an open upload and its staged parts. Returns whether it existed.
    pub fn abort(&self, upload_id: &str) -> EngineResult<bool> {
        if self.upload(upload_id)?.is_none() {
            return Ok(false);
        }

        let mut batch = self.engine.keyspace().batch();
        for part_number in self.staged_parts(upload_id)? {
            batch.remove(&self.staged, staged_key(upload_id, part_number));
        }
        batch.remove(&self.uploads, upload_id.as_bytes().to_vec());
        batch.commit()?;
        self.engine.persist()?;

        info!(upload_id, "multipart upload aborted");
        Ok(true)
    }

    /// Object manifest, if the key holds an assembled object
    pub fn object(&self, key: &StorageKey) -> EngineResult<Option<StoredObject>> {
        match self.objects.get(key.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).map_err(|source| {
                EngineError::Corrupt {
                    key: key.to_string(),
                    source,
                }
            })?)),
            None => Ok(None),
        }
    }

    /// Object bytes in part order
    pub fn read_object(&self, key: &StorageKey) -> EngineResult<Option<(StoredObject, Vec<u8>)>> {
        let Some(object) = self.object(key)? else {
            return Ok(None);
        };

        let mut data = Vec::with_capacity(object.size as usize);
        for index in 0..object.part_count() {
            let part = self
                .object_parts
                .get(object_part_key(key, index))?
                .ok_or_else(|| EngineError::MissingPart(index + 1))?;
            data.extend_from_slice(&part);
        }
        Ok(Some((object, data)))
    }

    /// Returns whether an object was removed
    pub fn delete_object(&self, key: &StorageKey) -> EngineResult<bool> {
        let Some(object) = self.object(key)? else {
            return Ok(false);
        };

        let mut batch = self.engine.keyspace().batch();
        for index in 0..object.part_count() {
            batch.remove(&self.object_parts, object_part_key(key, index));
        }
        batch.remove(&self.objects, key.as_str().as_bytes().to_vec());
        batch.commit()?;
        self.engine.persist()?;

        info!(key = %key, "object deleted");
        Ok(true)
    }
}

fn staged_prefix(upload_id: &str) -> Vec<u8> {
    format!("{}/", upload_id).into_bytes()
}

fn staged_key(upload_id: &str, part_number: u32) -> Vec<u8> {
    let mut key = staged_prefix(upload_id);
    key.extend_from_slice(&part_number.to_be_bytes());
    key
}

fn object_part_key(key: &StorageKey, index: u32) -> Vec<u8> {
    let mut raw = key.as_str().as_bytes().to_vec();
    raw.push(0);
    raw.extend_from_slice(&index.to_be_bytes());
    raw
}
