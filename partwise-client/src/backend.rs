//! Storage backend contract for multipart sessions

use std::time::Duration;

use async_trait::async_trait;
use partwise_core::{CompletedPart, StorageKey};

pub use partwise_net::PartAuthorization;

use crate::Result;

/// Control operations a multipart-capable object store offers.
///
/// Part bytes never pass through this trait; they go straight to the
/// presigned URLs returned by [`ObjectStorage::authorize_parts`] via a
/// [`crate::PartTransport`].
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Open a multipart upload and return the backend's upload id
    async fn create_multipart(&self, key: &StorageKey, content_type: &str) -> Result<String>;

    /// Presigned PUT URLs for `part_numbers`, valid for `ttl`
    async fn authorize_parts(
        &self,
        upload_id: &str,
        key: &StorageKey,
        part_numbers: &[u32],
        ttl: Duration,
    ) -> Result<Vec<PartAuthorization>>;

    /// Assemble the object; `parts` are sorted by part number
    async fn complete_multipart(
        &self,
        upload_id: &str,
        key: &StorageKey,
        parts: &[CompletedPart],
    ) -> Result<()>;

    async fn abort_multipart(&self, upload_id: &str, key: &StorageKey) -> Result<()>;

    async fn delete_object(&self, key: &StorageKey) -> Result<()>;

    /// Time-limited GET URL for a stored object
    async fn download_url(&self, key: &StorageKey, ttl: Duration) -> Result<String>;
}
