//! Notifications delivered to the host.
//!
//! Events arrive on one channel in the order they were produced. Each check
//! ends with exactly one of `CheckFailed`, `UpToDate` or `Outdated`; each
//! accepted update ends with exactly one of `Cancelled`, `Failed` or
//! `DownloadCompleted`.

use crate::transfer::progress::{TransferPhase, TransferProgress};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum UpdateEvent {
    /// No mirror produced a usable manifest, or the local build is unreadable
    #[serde(rename = "check:failed")]
    CheckFailed { reason: String },

    #[serde(rename = "check:up_to_date")]
    UpToDate,

    #[serde(rename = "check:outdated")]
    Outdated {
        /// Display string of the available build
        version: String,
        /// Estimate from recorded local hashes
        estimated_bytes: u64,
    },

    #[serde(rename = "update:progress")]
    Progress(UpdateProgress),

    #[serde(rename = "update:cancelled")]
    Cancelled,

    #[serde(rename = "update:failed")]
    Failed { reason: String },

    /// Files are staged and the applier is running. The host must exit now.
    #[serde(rename = "update:download_completed")]
    DownloadCompleted,
}

impl UpdateEvent {
    /// Whether this event ends a check or an update
    pub fn is_terminal(&self) -> bool {
        !matches!(self, UpdateEvent::Progress(_))
    }
}

/// Progress of a running update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateProgress {
    pub phase: TransferPhase,
    pub session_percent: f64,
    pub item_percent: f64,
    pub current_item: String,
    /// Average download rate so far
    pub bytes_per_second: u64,
}

impl UpdateProgress {
    pub fn preparing(step: impl Into<String>) -> Self {
        Self {
            phase: TransferPhase::Preparing,
            session_percent: 0.0,
            item_percent: 0.0,
            current_item: step.into(),
            bytes_per_second: 0,
        }
    }
}

impl From<TransferProgress> for UpdateProgress {
    fn from(progress: TransferProgress) -> Self {
        Self {
            phase: progress.phase,
            session_percent: progress.session_percent,
            item_percent: progress.item_percent,
            current_item: progress.current_item,
            bytes_per_second: progress.bytes_per_second,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_format() {
        let event = UpdateEvent::Outdated {
            version: "2.0".to_string(),
            estimated_bytes: 42,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "check:outdated");
        assert_eq!(json["payload"]["estimated_bytes"], 42);

        let unit = serde_json::to_value(&UpdateEvent::UpToDate).unwrap();
        assert_eq!(unit["type"], "check:up_to_date");
    }

    #[test]
    fn test_progress_is_not_terminal() {
        assert!(!UpdateEvent::Progress(UpdateProgress::preparing("x")).is_terminal());
        assert!(UpdateEvent::DownloadCompleted.is_terminal());
        assert!(UpdateEvent::CheckFailed { reason: String::new() }.is_terminal());
    }

    #[test]
    fn test_transfer_progress_keeps_its_rate() {
        let transfer = TransferProgress {
            phase: TransferPhase::Downloading,
            session_percent: 50.0,
            item_percent: 25.0,
            current_item: "lib/core.so".to_string(),
            transferred_bytes: 4096,
            total_bytes: 8192,
            bytes_per_second: 2048,
        };
        let progress = UpdateProgress::from(transfer);
        assert_eq!(progress.bytes_per_second, 2048);
        assert_eq!(progress.current_item, "lib/core.so");

        let json = serde_json::to_value(UpdateEvent::Progress(progress)).unwrap();
        assert_eq!(json["payload"]["bytes_per_second"], 2048);
    }
}
