//! Staged-apply handoff to the second-stage applier.
//!
//! The running process cannot overwrite its own binaries. It promotes a
//! freshly staged applier if there is one, starts the applier detached and
//! leaves the rest of the staged tree for it to move once we exit.

use crate::utils::errors::{Result, UpdateError};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{info, warn};

/// Starts a program without tracking it
pub trait Launcher: Send + Sync + 'static {
    fn launch(&self, program: &Path, args: &[OsString]) -> io::Result<()>;
}

/// Spawns the applier in its own process group with null stdio
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLauncher;

impl Launcher for DetachedLauncher {
    fn launch(&self, program: &Path, args: &[OsString]) -> io::Result<()> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(dir) = program.parent() {
            command.current_dir(dir);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn()?;
        info!("Started {} (pid {})", program.display(), child.id());
        Ok(())
    }
}

/// What the handoff did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffReport {
    /// The applier that was launched
    pub applier: PathBuf,

    /// Whether a staged applier replaced the live one first
    pub replaced_applier: bool,
}

/// Promote a staged applier, then launch the live one.
pub fn hand_off(
    launcher: &dyn Launcher,
    install_dir: &Path,
    staging_dir: &Path,
    applier: &str,
) -> Result<HandoffReport> {
    let live = install_dir.join(applier);
    let staged = staging_dir.join(applier);

    let replaced_applier = staged.is_file();
    if replaced_applier {
        info!("Promoting staged applier {}", staged.display());
        replace_file(&staged, &live)
            .map_err(|e| UpdateError::Handoff(format!("failed to replace {}: {}", live.display(), e)))?;
    }

    if !live.is_file() {
        return Err(UpdateError::Handoff(format!(
            "applier not found at {}",
            live.display()
        )));
    }

    let args = applier_args(install_dir, staging_dir);
    launcher
        .launch(&live, &args)
        .map_err(|e| UpdateError::Handoff(format!("failed to launch {}: {}", live.display(), e)))?;

    Ok(HandoffReport {
        applier: live,
        replaced_applier,
    })
}

/// Arguments the applier receives
pub fn applier_args(install_dir: &Path, staging_dir: &Path) -> Vec<OsString> {
    vec![
        "--install-dir".into(),
        install_dir.as_os_str().to_os_string(),
        "--staging-dir".into(),
        staging_dir.as_os_str().to_os_string(),
        "--parent-pid".into(),
        std::process::id().to_string().into(),
    ]
}

/// Delete `dest`, then move `src` onto it
fn replace_file(src: &Path, dest: &Path) -> io::Result<()> {
    match std::fs::remove_file(dest) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if let Err(e) = std::fs::rename(src, dest) {
        // rename may fail across filesystems, try copy+remove
        warn!("rename {} failed ({}), copying instead", src.display(), e);
        std::fs::copy(src, dest)?;
        std::fs::remove_file(src)?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(dest)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(dest, perms)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingLauncher {
        launches: Mutex<Vec<(PathBuf, Vec<u8>)>>,
    }

    impl Launcher for RecordingLauncher {
        fn launch(&self, program: &Path, _args: &[OsString]) -> io::Result<()> {
            let content = fs::read(program)?;
            self.launches
                .lock()
                .unwrap()
                .push((program.to_path_buf(), content));
            Ok(())
        }
    }

    #[test]
    fn test_staged_applier_replaces_live_before_launch() {
        let live = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        fs::write(live.path().join("apply"), b"old applier").unwrap();
        fs::write(staging.path().join("apply"), b"new applier").unwrap();

        let launcher = RecordingLauncher::default();
        let report = hand_off(&launcher, live.path(), staging.path(), "apply").unwrap();

        assert!(report.replaced_applier);
        assert!(!staging.path().join("apply").exists());
        let launches = launcher.launches.lock().unwrap();
        assert_eq!(launches.len(), 1);
        assert_eq!(launches[0].0, live.path().join("apply"));
        assert_eq!(launches[0].1, b"new applier");
    }

    #[test]
    fn test_live_applier_launched_unchanged_without_staged_copy() {
        let live = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        fs::write(live.path().join("apply"), b"current applier").unwrap();

        let launcher = RecordingLauncher::default();
        let report = hand_off(&launcher, live.path(), staging.path(), "apply").unwrap();

        assert!(!report.replaced_applier);
        assert_eq!(launcher.launches.lock().unwrap()[0].1, b"current applier");
        assert_eq!(fs::read(live.path().join("apply")).unwrap(), b"current applier");
    }

    #[test]
    fn test_missing_applier_is_an_error() {
        let live = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();

        let launcher = RecordingLauncher::default();
        let result = hand_off(&launcher, live.path(), staging.path(), "apply");

        assert!(matches!(result, Err(UpdateError::Handoff(_))));
        assert!(launcher.launches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_applier_args_name_both_trees() {
        let args = applier_args(Path::new("/opt/app"), Path::new("/opt/app.update"));
        assert_eq!(args[0], "--install-dir");
        assert_eq!(args[1], "/opt/app");
        assert_eq!(args[3], "/opt/app.update");
        assert_eq!(args[5], std::process::id().to_string().as_str());
    }
}
