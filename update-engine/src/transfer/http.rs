//! HTTP transfer worker.
//!
//! Mirrors are plain static file trees: `{base}/{remote manifest}` plus one
//! artifact per file, zstd-compressed artifacts carrying a `.zst` suffix.

use super::progress::{format_bytes, SessionProgress};
use super::progress_stream::{ByteCountCallback, ProgressStream};
use super::{ProgressSink, TransferJob, TransferOutcome, TransferWorker};
use crate::config::TransferConfig;
use crate::manifest::hash::{self, hashes_match};
use crate::manifest::{RemoteFileRecord, RemoteManifest};
use crate::mirror::Mirror;
use crate::utils::errors::{Result, UpdateError};
use async_compression::tokio::bufread::ZstdDecoder;
use futures_util::StreamExt;
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tracing::{debug, error, info};

/// Downloads from mirrors over HTTP(S)
pub struct HttpTransferWorker {
    client: reqwest::Client,
    remote_manifest: String,
    manifest_timeout: Duration,
}

impl HttpTransferWorker {
    pub fn new(config: &TransferConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(30)))
            // Limits idle time between reads, not the whole body
            .read_timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            remote_manifest: config.remote_manifest.clone(),
            manifest_timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    async fn get(&self, url: Url, timeout: Option<Duration>) -> Result<reqwest::Response> {
        let mut request = self.client.get(url.clone());
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(UpdateError::Network(format!(
                "HTTP {}: {}",
                response.status(),
                url
            )));
        }
        Ok(response)
    }

    async fn download_file(
        &self,
        mirror: &Mirror,
        staging_dir: &Path,
        record: &RemoteFileRecord,
        session: &SessionProgress,
        progress: &ProgressSink,
    ) -> Result<()> {
        let url = mirror.file_url(&record.artifact_name())?;
        let dest = staging_dir.join(&record.path);
        let part = part_path(&dest);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!("Fetching {} -> {}", url, dest.display());
        let response = self.get(url, None).await?;

        let weight = record.download_weight();
        progress(session.snapshot(&record.path, 0, weight));

        let on_bytes: ByteCountCallback = {
            let sink = Arc::clone(progress);
            let view = session.clone();
            let item = record.path.clone();
            Arc::new(move |n| sink(view.snapshot(&item, n, weight)))
        };

        let mut wire_hasher = Sha256::new();
        {
            let hasher = &mut wire_hasher;
            let wire = Box::pin(response.bytes_stream())
                .map(|chunk| chunk.map_err(std::io::Error::other))
                .inspect(move |chunk| {
                    if let Ok(bytes) = chunk {
                        hasher.update(bytes);
                    }
                });
            let mut reader = StreamReader::new(ProgressStream::new(wire, on_bytes));
            let mut file = tokio::fs::File::create(&part).await?;

            if record.is_compressed() {
                let mut decoder = ZstdDecoder::new(reader);
                tokio::io::copy(&mut decoder, &mut file).await?;
            } else {
                tokio::io::copy(&mut reader, &mut file).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
        }

        if let Some(artifact) = &record.compressed {
            let actual = hash::finish(wire_hasher);
            if !hashes_match(&actual, &artifact.hash) {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(UpdateError::HashMismatch {
                    path: record.artifact_name(),
                    expected: artifact.hash.clone(),
                    actual,
                });
            }
        }

        let hashed_path = part.clone();
        let actual = tokio::task::spawn_blocking(move || hash::hash_file(&hashed_path))
            .await
            .map_err(std::io::Error::other)??;
        if !hashes_match(&actual, &record.hash) {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(UpdateError::HashMismatch {
                path: record.path.clone(),
                expected: record.hash.clone(),
                actual,
            });
        }

        tokio::fs::rename(&part, &dest).await?;
        Ok(())
    }
}

impl TransferWorker for HttpTransferWorker {
    async fn fetch_manifest(&self, mirror: &Mirror, staging_dir: &Path) -> Result<RemoteManifest> {
        let url = mirror.file_url(&self.remote_manifest)?;
        debug!("Fetching remote manifest from {}", url);

        let response = self.get(url, Some(self.manifest_timeout)).await?;
        let body = response.bytes().await?;

        tokio::fs::create_dir_all(staging_dir).await?;
        tokio::fs::write(staging_dir.join(&self.remote_manifest), &body).await?;

        RemoteManifest::parse(&body)
    }

    async fn download(&self, job: TransferJob, progress: ProgressSink) -> TransferOutcome {
        let total = job.total_weight();
        info!(
            "Downloading {} files ({}) from mirror {} into {} (live tree: {})",
            job.files.len(),
            format_bytes(total),
            job.mirror.name,
            job.staging_dir.display(),
            job.install_dir.display()
        );

        let mut session = SessionProgress::new(total);

        for record in &job.files {
            if job.cancel.is_cancelled() {
                info!("Download cancelled before {}", record.path);
                return TransferOutcome::Cancelled;
            }

            let result = tokio::select! {
                result = self.download_file(&job.mirror, &job.staging_dir, record, &session, &progress) => result,
                _ = job.cancel.cancelled() => {
                    info!("Download cancelled during {}", record.path);
                    return TransferOutcome::Cancelled;
                }
            };

            if let Err(e) = result {
                error!("Failed to download {}: {}", record.path, e);
                return TransferOutcome::Failed(format!("{}: {}", record.path, e));
            }

            session.complete_item(record.download_weight());
        }

        progress(session.snapshot("", 0, 0));
        info!(
            "Downloaded {} files ({})",
            session.files_processed(),
            format_bytes(session.completed_bytes())
        );
        TransferOutcome::Completed
    }
}

/// `<dest>.part`, the in-flight name of a staged file
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}
