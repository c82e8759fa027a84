//! File-set reconciliation between a remote build and the local disk.
//!
//! Two levels of trust: the check-time estimate believes the hashes recorded
//! in the local manifest, while the download plan hashes real files.

use crate::manifest::hash::{hash_file, hashes_match};
use crate::manifest::{LocalManifest, ManifestRecord, RemoteFileRecord, RemoteManifest};
use std::collections::HashSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Bytes a check expects the update to download.
///
/// A remote file counts when the local manifest lacks its path or records a
/// different hash. Nothing on disk is read.
pub fn estimate_update_size(local: &LocalManifest, remote: &RemoteManifest) -> u64 {
    remote
        .files()
        .filter(|remote_file| match local.get(remote_file.path()) {
            Some(local_file) => !hashes_match(local_file.hash(), remote_file.hash()),
            None => true,
        })
        .map(|remote_file| remote_file.download_weight())
        .sum()
}

/// What an update must fetch, and what it may keep
#[derive(Debug, Clone, Default)]
pub struct DownloadPlan {
    /// Files to fetch from the mirror
    pub downloads: Vec<RemoteFileRecord>,

    /// Paths absent from the live tree whose staged copy already verifies
    pub staged: Vec<String>,

    /// Paths whose live copy already matches
    pub current: Vec<String>,
}

impl DownloadPlan {
    /// Sum of download-weights of `downloads`
    pub fn download_weight(&self) -> u64 {
        self.downloads.iter().map(|f| f.download_weight()).sum()
    }

    /// Staged paths that belong to the pending update
    pub fn retained_paths(&self) -> HashSet<String> {
        self.downloads
            .iter()
            .map(|f| f.path.clone())
            .chain(self.staged.iter().cloned())
            .collect()
    }
}

/// Classify every remote file against the live tree and the staging dir.
///
/// - missing live, missing staged: download
/// - missing live, staged copy with the wrong hash: download again
/// - live copy with the wrong hash: download
/// - anything else is already in place
pub fn compute_download_plan(
    remote: &RemoteManifest,
    install_dir: &Path,
    staging_dir: &Path,
) -> io::Result<DownloadPlan> {
    let mut plan = DownloadPlan::default();

    for record in remote.files() {
        let live = install_dir.join(&record.path);
        let staged = staging_dir.join(&record.path);

        if !live.is_file() {
            if !staged.is_file() {
                debug!("{}: not installed, not staged", record.path);
                plan.downloads.push(record.clone());
            } else if !hashes_match(&hash_file(&staged)?, &record.hash) {
                debug!("{}: staged copy is stale", record.path);
                plan.downloads.push(record.clone());
            } else {
                plan.staged.push(record.path.clone());
            }
        } else if !hashes_match(&hash_file(&live)?, &record.hash) {
            debug!("{}: installed copy differs", record.path);
            plan.downloads.push(record.clone());
        } else {
            plan.current.push(record.path.clone());
        }
    }

    Ok(plan)
}

/// Delete every staged file whose relative path is not in `keep`.
///
/// Directories are left alone. Returns the removed paths.
pub fn clean_up_download_directory(
    staging_dir: &Path,
    keep: &HashSet<String>,
) -> io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !staging_dir.is_dir() {
        return Ok(removed);
    }

    for entry in WalkDir::new(staging_dir).follow_links(false) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }

        let relative = match entry.path().strip_prefix(staging_dir) {
            Ok(relative) => relative,
            Err(_) => continue,
        };

        if !keep.contains(&manifest_path(relative)) {
            std::fs::remove_file(entry.path())?;
            removed.push(entry.path().to_path_buf());
        }
    }

    if !removed.is_empty() {
        info!(
            "Removed {} stale files from {}",
            removed.len(),
            staging_dir.display()
        );
    }
    Ok(removed)
}

/// Relative filesystem path as a `/`-separated manifest path
fn manifest_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::hash::hash_bytes;
    use crate::manifest::{CompressedArtifact, FileRecord, ProductVersion};
    use std::fs;
    use tempfile::TempDir;

    fn remote_file(path: &str, content: &[u8], packed_size: Option<u64>) -> RemoteFileRecord {
        RemoteFileRecord {
            path: path.to_string(),
            hash: hash_bytes(content),
            size: content.len() as u64,
            compressed: packed_size.map(|size| CompressedArtifact {
                hash: "00".to_string(),
                size,
            }),
        }
    }

    fn local_file(path: &str, content: &[u8]) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            hash: hash_bytes(content),
            size: content.len() as u64,
        }
    }

    fn write(root: &Path, relative: &str, content: &[u8]) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_estimate_counts_changed_and_missing_only() {
        let local = LocalManifest::new(
            ProductVersion::new(1, "1.0"),
            vec![local_file("same.txt", b"same"), local_file("changed.txt", b"old")],
        )
        .unwrap();
        let remote = RemoteManifest::new(
            ProductVersion::new(2, "2.0"),
            vec![
                remote_file("same.txt", b"same", Some(1)),
                remote_file("changed.txt", b"new content", Some(7)),
                remote_file("added.bin", b"0123456789", None),
            ],
        )
        .unwrap();

        assert_eq!(estimate_update_size(&local, &remote), 7 + 10);
    }

    #[test]
    fn test_estimate_zero_when_all_hashes_match() {
        let local = LocalManifest::new(
            ProductVersion::new(1, "1.0"),
            vec![local_file("a", b"a"), local_file("b", b"b")],
        )
        .unwrap();
        let remote = RemoteManifest::new(
            ProductVersion::new(2, "2.0"),
            vec![remote_file("a", b"a", Some(1)), remote_file("b", b"b", None)],
        )
        .unwrap();

        assert_eq!(estimate_update_size(&local, &remote), 0);
    }

    #[test]
    fn test_plan_three_way_classification() {
        let live = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();

        write(live.path(), "current.txt", b"current");
        write(live.path(), "outdated.txt", b"old");
        write(staging.path(), "staged-ok.txt", b"staged");
        write(staging.path(), "staged-bad.txt", b"corrupt");

        let remote = RemoteManifest::new(
            ProductVersion::new(2, "2.0"),
            vec![
                remote_file("current.txt", b"current", None),
                remote_file("outdated.txt", b"new", None),
                remote_file("missing.txt", b"missing", None),
                remote_file("staged-ok.txt", b"staged", None),
                remote_file("staged-bad.txt", b"fixed", None),
            ],
        )
        .unwrap();

        let plan = compute_download_plan(&remote, live.path(), staging.path()).unwrap();
        let mut downloads: Vec<&str> = plan.downloads.iter().map(|f| f.path.as_str()).collect();
        downloads.sort();

        assert_eq!(downloads, vec!["missing.txt", "outdated.txt", "staged-bad.txt"]);
        assert_eq!(plan.staged, vec!["staged-ok.txt".to_string()]);
        assert_eq!(plan.current, vec!["current.txt".to_string()]);
    }

    #[test]
    fn test_one_byte_change_reenters_download_set() {
        let live = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        write(live.path(), "lib/core.so", b"library-bytes");

        let remote = RemoteManifest::new(
            ProductVersion::new(2, "2.0"),
            vec![remote_file("lib/core.so", b"library-bytes", Some(5))],
        )
        .unwrap();

        let plan = compute_download_plan(&remote, live.path(), staging.path()).unwrap();
        assert!(plan.downloads.is_empty());

        write(live.path(), "lib/core.so", b"library-bytez");
        let plan = compute_download_plan(&remote, live.path(), staging.path()).unwrap();
        assert_eq!(plan.downloads[0].path, "lib/core.so");
        assert_eq!(plan.download_weight(), 5);
    }

    #[test]
    fn test_clean_up_removes_exactly_the_stale_file() {
        let staging = TempDir::new().unwrap();
        write(staging.path(), "keep/needed.bin", b"partial");
        write(staging.path(), "verified.txt", b"ok");
        write(staging.path(), "stale/leftover.dll", b"old");

        let keep: HashSet<String> = ["keep/needed.bin", "verified.txt"]
            .into_iter()
            .map(String::from)
            .collect();

        let removed = clean_up_download_directory(staging.path(), &keep).unwrap();

        assert_eq!(removed, vec![staging.path().join("stale/leftover.dll")]);
        assert!(staging.path().join("keep/needed.bin").exists());
        assert!(staging.path().join("verified.txt").exists());
        assert!(staging.path().join("stale").is_dir());
    }

    #[test]
    fn test_clean_up_missing_staging_dir_is_noop() {
        let root = TempDir::new().unwrap();
        let removed =
            clean_up_download_directory(&root.path().join("absent"), &HashSet::new()).unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn test_retained_paths_cover_downloads_and_staged() {
        let plan = DownloadPlan {
            downloads: vec![remote_file("a", b"a", None)],
            staged: vec!["b".to_string()],
            current: vec!["c".to_string()],
        };
        let keep = plan.retained_paths();
        assert!(keep.contains("a"));
        assert!(keep.contains("b"));
        assert!(!keep.contains("c"));
    }
}
