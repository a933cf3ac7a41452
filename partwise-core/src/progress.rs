//! Read-only progress view derived from an upload session

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::session::UploadSession;

/// Progress snapshot shown to callers while an upload runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProgress {
    pub percentage: f64,
    pub uploaded_parts: u32,
    pub total_parts: u32,
    pub uploaded_bytes: u64,
    pub total_bytes: u64,
    /// Bytes per second since the operation started
    pub speed: f64,
    /// Seconds; zero while the speed is unknown
    pub estimated_time_remaining: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_part: Option<u32>,
}

/// Project `session` into a progress view, `elapsed` being the wall-clock
/// time since the upload operation started.
pub fn project_progress(session: &UploadSession, elapsed: Duration) -> UploadProgress {
    let total_parts = session.total_parts();
    let uploaded_bytes = session.bytes_uploaded;
    let elapsed_secs = elapsed.as_secs_f64();

    let speed = if elapsed_secs > 0.0 {
        uploaded_bytes as f64 / elapsed_secs
    } else {
        0.0
    };

    let remaining = session.total_size.saturating_sub(uploaded_bytes);
    let estimated_time_remaining = if speed > 0.0 {
        remaining as f64 / speed
    } else {
        0.0
    };

    UploadProgress {
        percentage: session.percentage(),
        uploaded_parts: session.uploaded_parts,
        total_parts,
        uploaded_bytes,
        total_bytes: session.total_size,
        speed,
        estimated_time_remaining,
        current_part: None,
    }
}

/// Human-readable size using binary units, e.g. `1.5 KB` or `10 MB`
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

/// Human-readable duration, e.g. `42s` or `3m 5s`
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        return format!("{}s", seconds.round() as u64);
    }

    let minutes = (seconds / 60.0).floor() as u64;
    let remaining = (seconds % 60.0).round() as u64;
    format!("{}m {}s", minutes, remaining)
}
