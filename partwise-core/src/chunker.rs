//! Splitting a file into multipart upload parts

use serde::{Deserialize, Serialize};

use crate::config::UploadConfig;
use crate::progress::format_file_size;
use crate::{CoreError, Result};

/// Most parts a single multipart session may have
pub const MAX_PARTS: u64 = 10_000;

/// One contiguous byte range of the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkSpec {
    /// 1-indexed
    pub part_number: u32,
    /// Inclusive start offset
    pub start: u64,
    /// Exclusive end offset
    pub end: u64,
    pub size: u64,
}

/// Number of parts `total_size` splits into
pub fn part_count(total_size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    total_size.div_ceil(chunk_size)
}

/// Size of part `part_number` (1-indexed) in a file split by `chunk_size`.
/// Part 0 and parts past the end of the file are empty.
pub fn part_size(total_size: u64, chunk_size: u64, part_number: u32) -> u64 {
    let start = (part_number as u64)
        .checked_sub(1)
        .and_then(|index| index.checked_mul(chunk_size));
    match start {
        Some(start) => total_size.saturating_sub(start).min(chunk_size),
        None => 0,
    }
}

/// Plan the chunks covering `[0, total_size)`.
///
/// An empty file yields an empty plan; callers reject empty files before
/// getting here.
pub fn plan_chunks(total_size: u64, chunk_size: u64) -> Result<Vec<ChunkSpec>> {
    if chunk_size == 0 {
        return Err(CoreError::InvalidChunkSize("chunk size must be non-zero".to_string()));
    }

    let count = part_count(total_size, chunk_size);
    if count > MAX_PARTS {
        return Err(CoreError::InvalidChunkSize(format!(
            "{} parts of {} exceed the limit of {} parts",
            count,
            format_file_size(chunk_size),
            MAX_PARTS
        )));
    }

    let mut chunks = Vec::with_capacity(count as usize);
    let mut start = 0;
    let mut part_number = 1;

    while start < total_size {
        let end = start.saturating_add(chunk_size).min(total_size);
        chunks.push(ChunkSpec {
            part_number,
            start,
            end,
            size: end - start,
        });
        start = end;
        part_number += 1;
    }

    Ok(chunks)
}

/// Chunk size to use for a file of `total_size` bytes
pub fn chunk_size_for(total_size: u64, config: &UploadConfig) -> u64 {
    if total_size > config.large_file_threshold {
        config.large_chunk_size
    } else {
        config.small_chunk_size
    }
}

/// Reject files the upload flow will not accept
pub fn validate_file_size(size: u64, config: &UploadConfig) -> Result<()> {
    if size == 0 {
        return Err(CoreError::InvalidFile("File is empty.".to_string()));
    }

    if config.min_file_size > 0 && size < config.min_file_size {
        return Err(CoreError::InvalidFile(format!(
            "File is too small. Minimum size is {}. Selected file is {}.",
            format_file_size(config.min_file_size),
            format_file_size(size)
        )));
    }

    if size > config.max_file_size {
        return Err(CoreError::InvalidFile(format!(
            "File is too large. Maximum size is {}. Selected file is {}.",
            format_file_size(config.max_file_size),
            format_file_size(size)
        )));
    }

    let parts = part_count(size, chunk_size_for(size, config));
    if parts > MAX_PARTS {
        return Err(CoreError::InvalidFile(format!(
            "File would need {} parts (max: {})",
            parts, MAX_PARTS
        )));
    }

    Ok(())
}
