//! Update orchestrator - checks mirrors for a newer build and stages it.
//!
//! Two workflows run on background tasks, never both at once:
//! - check: probe mirrors in rating order, compare build numbers, estimate size
//! - update: verify real hashes, clean staging, download, hand off to the applier
//!
//! Results arrive as [`UpdateEvent`]s on the channel returned by
//! [`UpdateOrchestrator::new`]. Events are sent from the background task; a
//! host that updates shared state from them does its own hand-off.

pub mod activity;
pub mod diff;
pub mod events;
pub mod handoff;

use crate::config::InstallConfig;
use crate::manifest::{LocalManifest, ProductVersion, RemoteManifest};
use crate::mirror::{Mirror, MirrorRegistry};
use crate::transfer::progress::format_bytes;
use crate::transfer::{ProgressSink, TransferJob, TransferOutcome, TransferWorker};
use crate::utils::errors::{Result, UpdateError};
use activity::{ActivityGuard, ActivityToken};
use handoff::{DetachedLauncher, Launcher};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use activity::Activity;
pub use events::{UpdateEvent, UpdateProgress};

/// Result of the last completed check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    /// No check has succeeded yet
    Unknown,
    UpToDate,
    Outdated,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateState::Unknown => "unknown",
            UpdateState::UpToDate => "up to date",
            UpdateState::Outdated => "outdated",
        };
        f.write_str(name)
    }
}

/// Remote build found by the last successful check, and where it came from
#[derive(Debug, Clone)]
struct CheckedBuild {
    mirror: Mirror,
    manifest: Arc<RemoteManifest>,
}

struct Shared<W> {
    install: InstallConfig,
    mirrors: MirrorRegistry,
    worker: W,
    launcher: Arc<dyn Launcher>,
    activity: ActivityToken,
    state: watch::Sender<UpdateState>,
    local: Mutex<Option<Arc<LocalManifest>>>,
    checked: Mutex<Option<CheckedBuild>>,
    cancel: Mutex<CancellationToken>,
    events: mpsc::UnboundedSender<UpdateEvent>,
}

/// Handle to the update engine. Cheap to clone; clones share state.
pub struct UpdateOrchestrator<W> {
    shared: Arc<Shared<W>>,
}

impl<W> Clone for UpdateOrchestrator<W> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<W: TransferWorker> UpdateOrchestrator<W> {
    /// Create an orchestrator that launches the applier as a detached process
    pub fn new(
        install: InstallConfig,
        mirrors: MirrorRegistry,
        worker: W,
    ) -> (Self, mpsc::UnboundedReceiver<UpdateEvent>) {
        Self::with_launcher(install, mirrors, worker, Arc::new(DetachedLauncher))
    }

    pub fn with_launcher(
        install: InstallConfig,
        mirrors: MirrorRegistry,
        worker: W,
        launcher: Arc<dyn Launcher>,
    ) -> (Self, mpsc::UnboundedReceiver<UpdateEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(UpdateState::Unknown);

        let shared = Shared {
            install,
            mirrors,
            worker,
            launcher,
            activity: ActivityToken::default(),
            state,
            local: Mutex::new(None),
            checked: Mutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
            events,
        };

        (
            Self {
                shared: Arc::new(shared),
            },
            receiver,
        )
    }

    /// Load the local manifest from the install tree, replacing any loaded copy
    pub fn read_local_build_info(&self) -> Result<Arc<LocalManifest>> {
        self.shared.load_local()
    }

    /// Start a background check. `None` if a check or update is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn check_for_updates(&self) -> Option<JoinHandle<()>> {
        let guard = match self.shared.activity.try_begin(Activity::Checking) {
            Some(guard) => guard,
            None => {
                info!(
                    "Update check ignored, {} already in progress",
                    self.shared.activity.current()
                );
                return None;
            }
        };

        let shared = Arc::clone(&self.shared);
        Some(tokio::spawn(async move { shared.run_check(guard).await }))
    }

    /// Start a background update of the build found by the last check.
    ///
    /// Fails without starting anything when a check or update is running,
    /// when no check has succeeded, or when the last check found no newer build.
    pub fn perform_update(&self) -> Result<JoinHandle<()>> {
        let guard = self
            .shared
            .activity
            .try_begin(Activity::Updating)
            .ok_or_else(|| {
                UpdateError::InvalidOperation(format!(
                    "cannot update while a {} is in progress",
                    self.shared.activity.current()
                ))
            })?;

        let checked = lock(&self.shared.checked).clone().ok_or_else(|| {
            UpdateError::InvalidOperation("no update check has completed".to_string())
        })?;

        let state = self.state();
        if state != UpdateState::Outdated {
            return Err(UpdateError::InvalidOperation(format!(
                "installation is {}, nothing to update",
                state
            )));
        }

        let cancel = CancellationToken::new();
        *lock(&self.shared.cancel) = cancel.clone();

        let shared = Arc::clone(&self.shared);
        Ok(tokio::spawn(async move {
            shared.run_update(guard, checked, cancel).await
        }))
    }

    /// Ask the running download to stop. It ends with `UpdateEvent::Cancelled`.
    pub fn cancel_update(&self) -> bool {
        if self.shared.activity.current() != Activity::Updating {
            return false;
        }
        lock(&self.shared.cancel).cancel();
        true
    }
}

impl<W> UpdateOrchestrator<W> {
    pub fn state(&self) -> UpdateState {
        *self.shared.state.borrow()
    }

    /// Receiver that sees every state change
    pub fn watch_state(&self) -> watch::Receiver<UpdateState> {
        self.shared.state.subscribe()
    }

    pub fn activity(&self) -> Activity {
        self.shared.activity.current()
    }

    pub fn is_checking(&self) -> bool {
        self.activity() == Activity::Checking
    }

    pub fn is_updating(&self) -> bool {
        self.activity() == Activity::Updating
    }

    /// Version of the loaded local manifest
    pub fn local_build(&self) -> Option<ProductVersion> {
        lock(&self.shared.local)
            .as_ref()
            .map(|m| m.version().clone())
    }

    /// Version found by the last successful check
    pub fn available_build(&self) -> Option<ProductVersion> {
        lock(&self.shared.checked)
            .as_ref()
            .map(|c| c.manifest.version().clone())
    }

    /// Mirror that served the last successful check
    pub fn selected_mirror(&self) -> Option<Mirror> {
        lock(&self.shared.checked).as_ref().map(|c| c.mirror.clone())
    }
}

impl<W> Shared<W> {
    fn emit(&self, event: UpdateEvent) {
        if self.events.send(event).is_err() {
            warn!("Update event dropped, receiver is gone");
        }
    }

    fn load_local(&self) -> Result<Arc<LocalManifest>> {
        let path = self.install.local_manifest_path();
        let manifest = Arc::new(LocalManifest::load(&path)?);
        info!(
            "Local build {} with {} files ({})",
            manifest.version(),
            manifest.len(),
            path.display()
        );
        *lock(&self.local) = Some(Arc::clone(&manifest));
        Ok(manifest)
    }

    fn local_manifest(&self) -> Result<Arc<LocalManifest>> {
        let loaded = lock(&self.local).clone();
        match loaded {
            Some(manifest) => Ok(manifest),
            None => self.load_local(),
        }
    }
}

impl<W: TransferWorker> Shared<W> {
    async fn run_check(&self, guard: ActivityGuard) {
        let local = match self.local_manifest() {
            Ok(local) => local,
            Err(e) => {
                error!("Cannot read local build info: {}", e);
                drop(guard);
                self.emit(UpdateEvent::CheckFailed {
                    reason: format!("local build info unreadable: {}", e),
                });
                return;
            }
        };

        let staging = self.install.staging_dir();
        if let Err(e) = tokio::fs::create_dir_all(&staging).await {
            error!("Cannot create staging dir {}: {}", staging.display(), e);
            drop(guard);
            self.emit(UpdateEvent::CheckFailed {
                reason: format!("staging dir unavailable: {}", e),
            });
            return;
        }

        let candidates = self.mirrors.probe_order();
        let mut found = None;
        for mirror in &candidates {
            info!("Checking mirror {} ({}, rating {})", mirror.name, mirror.url, mirror.rating);
            match self.worker.fetch_manifest(mirror, &staging).await {
                Ok(manifest) => {
                    found = Some((mirror.clone(), manifest));
                    break;
                }
                Err(e) => warn!("Mirror {} unavailable: {}", mirror.name, e),
            }
        }

        let Some((mirror, remote)) = found else {
            warn!("Update check failed, no usable mirror among {}", candidates.len());
            drop(guard);
            self.emit(UpdateEvent::CheckFailed {
                reason: format!("no usable mirror ({} tried)", candidates.len()),
            });
            return;
        };

        let event = if remote.version().number == local.version().number {
            info!("Build {} is up to date (mirror {})", local.version(), mirror.name);
            UpdateEvent::UpToDate
        } else {
            let estimated_bytes = diff::estimate_update_size(&local, &remote);
            info!(
                "Build {} available on {} (installed {}), about {} to download",
                remote.version(),
                mirror.name,
                local.version(),
                format_bytes(estimated_bytes)
            );
            UpdateEvent::Outdated {
                version: remote.version().display.clone(),
                estimated_bytes,
            }
        };

        let state = match event {
            UpdateEvent::UpToDate => UpdateState::UpToDate,
            _ => UpdateState::Outdated,
        };
        *lock(&self.checked) = Some(CheckedBuild {
            mirror,
            manifest: Arc::new(remote),
        });
        self.state.send_replace(state);

        drop(guard);
        self.emit(event);
    }

    async fn run_update(&self, guard: ActivityGuard, checked: CheckedBuild, cancel: CancellationToken) {
        let outcome = match self.stage_and_transfer(&checked, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => TransferOutcome::Failed(e.to_string()),
        };

        drop(guard);

        match outcome {
            TransferOutcome::Cancelled => {
                info!("Update cancelled");
                self.emit(UpdateEvent::Cancelled);
            }
            TransferOutcome::Failed(reason) => {
                error!("Update failed: {}", reason);
                self.emit(UpdateEvent::Failed { reason });
            }
            TransferOutcome::Completed => match self.hand_off().await {
                Ok(report) => {
                    info!(
                        "Update staged, applier {} started{}",
                        report.applier.display(),
                        if report.replaced_applier { " (updated)" } else { "" }
                    );
                    self.emit(UpdateEvent::DownloadCompleted);
                }
                Err(e) => {
                    error!("Handoff failed: {}", e);
                    self.emit(UpdateEvent::Failed {
                        reason: e.to_string(),
                    });
                }
            },
        }
    }

    async fn stage_and_transfer(
        &self,
        checked: &CheckedBuild,
        cancel: CancellationToken,
    ) -> Result<TransferOutcome> {
        let install_dir = self.install.dir.clone();
        let staging_dir = self.install.staging_dir();
        tokio::fs::create_dir_all(&staging_dir).await?;

        self.emit(UpdateEvent::Progress(UpdateProgress::preparing(
            "Verifying installed files",
        )));
        let plan = {
            let manifest = Arc::clone(&checked.manifest);
            let install_dir = install_dir.clone();
            let staging_dir = staging_dir.clone();
            tokio::task::spawn_blocking(move || {
                diff::compute_download_plan(&manifest, &install_dir, &staging_dir)
            })
            .await
            .map_err(std::io::Error::other)??
        };
        info!(
            "{} files to download ({}), {} already staged, {} current",
            plan.downloads.len(),
            format_bytes(plan.download_weight()),
            plan.staged.len(),
            plan.current.len()
        );

        self.emit(UpdateEvent::Progress(UpdateProgress::preparing(
            "Cleaning staging directory",
        )));
        {
            let keep = plan.retained_paths();
            let staging_dir = staging_dir.clone();
            tokio::task::spawn_blocking(move || diff::clean_up_download_directory(&staging_dir, &keep))
                .await
                .map_err(std::io::Error::other)??;
        }

        let job = TransferJob {
            mirror: checked.mirror.clone(),
            install_dir,
            staging_dir,
            files: plan.downloads,
            cancel,
        };

        let events = self.events.clone();
        let progress: ProgressSink = Arc::new(move |p| {
            let _ = events.send(UpdateEvent::Progress(p.into()));
        });

        Ok(self.worker.download(job, progress).await)
    }

    async fn hand_off(&self) -> Result<handoff::HandoffReport> {
        let launcher = Arc::clone(&self.launcher);
        let install_dir = self.install.dir.clone();
        let staging_dir = self.install.staging_dir();
        let applier = self.install.applier.clone();

        tokio::task::spawn_blocking(move || {
            handoff::hand_off(launcher.as_ref(), &install_dir, &staging_dir, &applier)
        })
        .await
        .map_err(std::io::Error::other)?
    }
}
