//! Upload tuning knobs
//!
//! Every field has a default, so a JSON file only needs the values it
//! overrides:
//!
//! ```json
//! { "concurrency": 4, "max_attempts": 5 }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const MIB: u64 = 1024 * 1024;

/// Default chunk size for files up to the large-file threshold (5 MiB)
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * MIB;

/// Chunk size for files above the threshold (10 MiB)
pub const LARGE_FILE_CHUNK_SIZE: u64 = 10 * MIB;

/// Files strictly larger than this use the large chunk size (500 MiB)
pub const LARGE_FILE_THRESHOLD: u64 = 500 * MIB;

/// Default upper bound on accepted files (5 GiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * MIB;

/// Simultaneous part uploads per batch
pub const DEFAULT_CONCURRENCY: usize = 3;

/// Total attempts per part, first try included
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub small_chunk_size: u64,
    pub large_chunk_size: u64,
    pub large_file_threshold: u64,
    /// Zero disables the lower bound
    pub min_file_size: u64,
    pub max_file_size: u64,
    pub concurrency: usize,
    pub max_attempts: u32,
    pub base_retry_delay_ms: u64,
    pub transfer_timeout_secs: u64,
    pub authorization_ttl_secs: u64,
    pub download_url_ttl_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            small_chunk_size: DEFAULT_CHUNK_SIZE,
            large_chunk_size: LARGE_FILE_CHUNK_SIZE,
            large_file_threshold: LARGE_FILE_THRESHOLD,
            min_file_size: 0,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_retry_delay_ms: 1000,
            transfer_timeout_secs: 300,
            authorization_ttl_secs: 3600,
            download_url_ttl_secs: 3600,
        }
    }
}

impl UploadConfig {
    /// Load overrides from a JSON file and validate the result
    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let raw = std::fs::read(path.as_ref())?;
        let config: UploadConfig = serde_json::from_slice(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: &str| Err(crate::CoreError::InvalidConfig(msg.to_string()));

        if self.small_chunk_size == 0 || self.large_chunk_size == 0 {
            return invalid("chunk sizes must be non-zero");
        }
        if self.small_chunk_size > self.large_chunk_size {
            return invalid("small_chunk_size must not exceed large_chunk_size");
        }
        if self.concurrency == 0 {
            return invalid("concurrency must be at least 1");
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts must be at least 1");
        }
        if self.max_file_size == 0 || self.min_file_size > self.max_file_size {
            return invalid("file size bounds are inconsistent");
        }
        if self.authorization_ttl_secs == 0 || self.transfer_timeout_secs == 0 {
            return invalid("timeouts must be non-zero");
        }
        Ok(())
    }

    pub fn base_retry_delay(&self) -> Duration {
        Duration::from_millis(self.base_retry_delay_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn authorization_ttl(&self) -> Duration {
        Duration::from_secs(self.authorization_ttl_secs)
    }

    pub fn download_url_ttl(&self) -> Duration {
        Duration::from_secs(self.download_url_ttl_secs)
    }
}
