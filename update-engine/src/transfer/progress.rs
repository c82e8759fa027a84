//! Byte-level progress tracking for update downloads.
//!
//! A download session covers every file in the download set. Progress is
//! reported both for the whole session and for the item currently in flight.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Coarse phase of an update session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferPhase {
    /// Verifying local files, cleaning staging, connecting
    Preparing,
    /// Moving bytes
    Downloading,
}

/// Progress information emitted by a transfer worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub phase: TransferPhase,

    /// Percentage of the whole session (0-100)
    pub session_percent: f64,

    /// Percentage of the current item (0-100)
    pub item_percent: f64,

    /// Relative path of the current item
    pub current_item: String,

    /// Bytes transferred in the whole session
    pub transferred_bytes: u64,

    /// Download-weight of the whole session
    pub total_bytes: u64,

    /// Average speed since the session started
    pub bytes_per_second: u64,
}

/// Tracks completed bytes across the items of one session
#[derive(Debug, Clone)]
pub struct SessionProgress {
    start_time: Instant,
    total_bytes: u64,
    completed_bytes: u64,
    files_processed: usize,
}

impl SessionProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            start_time: Instant::now(),
            total_bytes,
            completed_bytes: 0,
            files_processed: 0,
        }
    }

    /// Snapshot while `item` has `item_bytes` of `item_weight` done
    pub fn snapshot(&self, item: &str, item_bytes: u64, item_weight: u64) -> TransferProgress {
        let transferred = self.completed_bytes + item_bytes.min(item_weight);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let bytes_per_second = if elapsed > 0.0 {
            (transferred as f64 / elapsed) as u64
        } else {
            0
        };

        TransferProgress {
            phase: TransferPhase::Downloading,
            session_percent: percent(transferred, self.total_bytes),
            item_percent: percent(item_bytes, item_weight),
            current_item: item.to_string(),
            transferred_bytes: transferred,
            total_bytes: self.total_bytes,
            bytes_per_second,
        }
    }

    /// Mark an item finished
    pub fn complete_item(&mut self, item_weight: u64) {
        self.completed_bytes += item_weight;
        self.files_processed += 1;
    }

    pub fn completed_bytes(&self) -> u64 {
        self.completed_bytes
    }

    pub fn files_processed(&self) -> usize {
        self.files_processed
    }
}

/// Percentage of `done` over `total`, clamped to 0-100. An empty total counts as done.
pub fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    ((done as f64 / total as f64) * 100.0).min(100.0)
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}
