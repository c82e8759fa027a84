//! Update Engine Library
//!
//! Mirror-aware self-update engine: checks mirrors for a newer build, stages
//! only the files that differ, and hands off to a second-stage applier.

pub mod config;
pub mod manifest;
pub mod mirror;
pub mod orchestrator;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use manifest::{BuildManifest, FileRecord, LocalManifest, ProductVersion, RemoteFileRecord, RemoteManifest};
pub use mirror::{Mirror, MirrorRegistry};
pub use orchestrator::{Activity, UpdateEvent, UpdateOrchestrator, UpdateProgress, UpdateState};
pub use transfer::{HttpTransferWorker, TransferOutcome, TransferWorker};
pub use utils::errors::UpdateError;
pub type Result<T> = std::result::Result<T, UpdateError>;
