//! Transfer workers: fetching manifests and files from a mirror.
//!
//! The orchestrator only speaks to the [`TransferWorker`] trait. The HTTP
//! implementation lives in [`http`]; tests substitute their own.

pub mod http;
pub mod progress;
pub mod progress_stream;

use crate::manifest::{RemoteFileRecord, RemoteManifest};
use crate::mirror::Mirror;
use crate::utils::errors::Result;
use progress::TransferProgress;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use http::HttpTransferWorker;

/// Receives progress from a running download. Called on the worker's task.
pub type ProgressSink = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// One bulk download request
#[derive(Debug, Clone)]
pub struct TransferJob {
    /// Mirror remembered from the successful check
    pub mirror: Mirror,

    /// Live installation tree
    pub install_dir: PathBuf,

    /// Files are written here, at their relative paths
    pub staging_dir: PathBuf,

    /// The download set
    pub files: Vec<RemoteFileRecord>,

    /// Cancelling this token ends the job with [`TransferOutcome::Cancelled`]
    pub cancel: CancellationToken,
}

impl TransferJob {
    /// Sum of download-weights
    pub fn total_weight(&self) -> u64 {
        self.files.iter().map(|f| f.download_weight()).sum()
    }
}

/// Terminal result of one download. Exactly one per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

/// Fetches manifests and files from mirrors.
pub trait TransferWorker: Send + Sync + 'static {
    /// Fetch and parse the remote manifest published by `mirror`, keeping a
    /// copy in `staging_dir`. Transport and parse failures are both errors.
    fn fetch_manifest(
        &self,
        mirror: &Mirror,
        staging_dir: &Path,
    ) -> impl Future<Output = Result<RemoteManifest>> + Send;

    /// Download and decompress every file of `job` into its staging dir.
    fn download(
        &self,
        job: TransferJob,
        progress: ProgressSink,
    ) -> impl Future<Output = TransferOutcome> + Send;
}
