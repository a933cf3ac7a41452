//! Durable storage for partwise built on fjall: upload session records and
//! the part staging area used by the development backend.

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::Path;
use std::sync::Arc;

pub mod error;
pub mod parts;
pub mod sessions;

pub use error::*;
pub use parts::*;
pub use sessions::*;

/// Storage engine wrapping a fjall keyspace
#[derive(Clone)]
pub struct StorageEngine {
    keyspace: Arc<Keyspace>,
}

impl StorageEngine {
    /// Open (or create) the keyspace at `path`
    pub fn new(path: impl AsRef<Path>) -> EngineResult<Self> {
        let keyspace = Config::new(path).open()?;
        Ok(StorageEngine {
            keyspace: Arc::new(keyspace),
        })
    }

    /// Create a temporary storage engine for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> EngineResult<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir()?;
        let engine = Self::new(temp_dir.path())?;
        Ok((engine, temp_dir))
    }

    /// Session record store backed by this keyspace
    pub fn session_store(&self) -> EngineResult<FjallSessionStore> {
        FjallSessionStore::new(self.clone())
    }

    /// Part staging area backed by this keyspace
    pub fn part_area(&self) -> EngineResult<PartArea> {
        PartArea::new(self.clone())
    }

    pub(crate) fn partition(&self, name: &str) -> EngineResult<PartitionHandle> {
        Ok(self
            .keyspace
            .open_partition(name, PartitionCreateOptions::default())?)
    }

    pub(crate) fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Persist all changes to disk
    pub fn persist(&self) -> EngineResult<()> {
        Ok(self.keyspace.persist(PersistMode::SyncAll)?)
    }
}
