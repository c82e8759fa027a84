//! Turn a build directory into a mirror tree.
//!
//! Every file is hashed and, when zstd shrinks it, published as `<path>.zst`.
//! The local manifest is written into the build root and is itself published,
//! so an update also refreshes the installed manifest.

use crate::config::PublisherConfig;
use crate::error::{PublishError, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use update_engine::manifest::hash::hash_bytes;
use update_engine::manifest::{CompressedArtifact, COMPRESSED_SUFFIX};
use update_engine::{FileRecord, LocalManifest, ProductVersion, RemoteFileRecord, RemoteManifest};
use walkdir::WalkDir;

/// Summary of one publish run
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub version: ProductVersion,
    pub files: usize,
    pub compressed_files: usize,

    /// Uncompressed bytes in the build
    pub build_bytes: u64,

    /// Bytes written into the mirror tree, manifest excluded
    pub published_bytes: u64,

    pub remote_manifest: PathBuf,
}

/// Publish `build_dir` into `out_dir`.
///
/// `out_dir` must be empty or absent unless `clean` is set, in which case it
/// is removed first.
pub fn publish(
    config: &PublisherConfig,
    build_dir: &Path,
    out_dir: &Path,
    clean: bool,
) -> Result<PublishReport> {
    if !build_dir.is_dir() {
        return Err(PublishError::NotFound(format!(
            "build directory {} not found",
            build_dir.display()
        )));
    }
    prepare_out_dir(build_dir, out_dir, clean)?;

    let version = config.product_version();
    let local_name = config.manifest.local.as_str();
    info!(
        "Publishing {} build {} from {}",
        config.product.name,
        version,
        build_dir.display()
    );

    let mut locals = Vec::new();
    let mut remotes = Vec::new();
    let mut published_bytes = 0;

    let paths = build_files(build_dir, local_name)?;
    let taken: HashSet<&str> = paths
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(local_name))
        .collect();

    for path in &paths {
        let content = std::fs::read(build_dir.join(path))?;
        let (record, written) = publish_file(config, out_dir, path, &content, &taken)?;
        locals.push(FileRecord {
            path: record.path.clone(),
            hash: record.hash.clone(),
            size: record.size,
        });
        remotes.push(record);
        published_bytes += written;
    }

    let published_at = Utc::now();
    let local = LocalManifest::new(version.clone(), locals)?.with_published_at(published_at);
    let build_bytes = local.total_size();
    local.save(&build_dir.join(local_name))?;

    // The installed manifest travels with the update
    let content = std::fs::read(build_dir.join(local_name))?;
    let (record, written) = publish_file(config, out_dir, local_name, &content, &taken)?;
    remotes.push(record);
    published_bytes += written;

    let compressed_files = remotes.iter().filter(|r| r.is_compressed()).count();
    let files = remotes.len();
    let remote = RemoteManifest::new(version.clone(), remotes)?.with_published_at(published_at);
    let remote_manifest = out_dir.join(&config.manifest.remote);
    remote.save(&remote_manifest)?;

    info!(
        "Published {} files ({} compressed), {} -> {} bytes, manifest {}",
        files,
        compressed_files,
        build_bytes,
        published_bytes,
        remote_manifest.display()
    );

    Ok(PublishReport {
        version,
        files,
        compressed_files,
        build_bytes,
        published_bytes,
        remote_manifest,
    })
}

fn prepare_out_dir(build_dir: &Path, out_dir: &Path, clean: bool) -> Result<()> {
    let build = build_dir.canonicalize()?;
    if let Ok(out) = out_dir.canonicalize() {
        if out.starts_with(&build) || build.starts_with(&out) {
            return Err(PublishError::InvalidBuild(format!(
                "output {} overlaps the build directory",
                out_dir.display()
            )));
        }
    }

    if out_dir.exists() {
        let occupied = std::fs::read_dir(out_dir)?.next().is_some();
        if occupied && !clean {
            return Err(PublishError::Conflict(format!(
                "{} is not empty (use --clean to replace it)",
                out_dir.display()
            )));
        }
        if occupied {
            info!("Removing previous mirror tree {}", out_dir.display());
            std::fs::remove_dir_all(out_dir)?;
        }
    }

    std::fs::create_dir_all(out_dir)?;
    Ok(())
}

/// Relative `/`-separated paths of every file in the build, sorted, without
/// the local manifest.
fn build_files(build_dir: &Path, local_manifest: &str) -> Result<Vec<String>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(build_dir).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(build_dir)
            .map_err(|e| PublishError::InvalidBuild(e.to_string()))?;
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if path == local_manifest {
            continue;
        }
        files.push(path);
    }

    if files.is_empty() {
        return Err(PublishError::InvalidBuild(format!(
            "{} contains no files",
            build_dir.display()
        )));
    }
    Ok(files)
}

/// Write one artifact and return its record plus the bytes written.
///
/// A file is published plain when the build also ships a file named like its
/// compressed artifact.
fn publish_file(
    config: &PublisherConfig,
    out_dir: &Path,
    path: &str,
    content: &[u8],
    taken: &HashSet<&str>,
) -> Result<(RemoteFileRecord, u64)> {
    let mut record = RemoteFileRecord {
        path: path.to_string(),
        hash: hash_bytes(content),
        size: content.len() as u64,
        compressed: None,
    };

    let artifact = format!("{}{}", path, COMPRESSED_SUFFIX);
    let clashes = taken.contains(artifact.as_str());
    if clashes {
        warn!("{} is part of the build, publishing {} uncompressed", artifact, path);
    }

    let packed = if config.compression.enabled && !clashes {
        Some(zstd::encode_all(content, config.compression.level)?)
    } else {
        None
    };

    let (dest, data) = match packed {
        Some(packed) if packed.len() < content.len() => {
            record.compressed = Some(CompressedArtifact {
                hash: hash_bytes(&packed),
                size: packed.len() as u64,
            });
            (out_dir.join(&artifact), packed)
        }
        _ => (out_dir.join(path), content.to_vec()),
    };

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&dest, &data)?;
    debug!("{} -> {} ({} bytes)", path, dest.display(), data.len());

    Ok((record, data.len() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use update_engine::manifest::hash::hash_file;

    fn sample_build(root: &Path) {
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::create_dir_all(root.join("data/maps")).unwrap();
        fs::write(root.join("bin/app"), "binary section ".repeat(2000)).unwrap();
        fs::write(root.join("data/maps/tiny.txt"), b"x").unwrap();
    }

    #[test]
    fn test_publish_writes_artifacts_and_manifests() {
        let build = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        sample_build(build.path());
        let config = PublisherConfig::new("demo", 12, "3.1");

        let report = publish(&config, build.path(), out.path(), false).unwrap();

        assert_eq!(report.files, 3);
        assert_eq!(report.version.number, 12);

        let remote = RemoteManifest::load(&report.remote_manifest).unwrap();
        let app = remote.get("bin/app").unwrap();
        assert!(app.is_compressed());
        assert!(out.path().join("bin/app.zst").is_file());
        assert!(!out.path().join("bin/app").exists());
        assert_eq!(
            hash_file(&out.path().join("bin/app.zst")).unwrap(),
            app.compressed.as_ref().unwrap().hash
        );

        let tiny = remote.get("data/maps/tiny.txt").unwrap();
        assert!(!tiny.is_compressed());
        assert_eq!(fs::read(out.path().join("data/maps/tiny.txt")).unwrap(), b"x");

        let local = LocalManifest::load(&build.path().join("build-manifest.json")).unwrap();
        assert_eq!(local.len(), 2);
        assert!(!local.contains("build-manifest.json"));
        assert_eq!(local.get("bin/app").unwrap().hash, app.hash);
        assert!(local.published_at().is_some());

        let carried = remote.get("build-manifest.json").unwrap();
        assert_eq!(
            carried.hash,
            hash_file(&build.path().join("build-manifest.json")).unwrap()
        );
    }

    #[test]
    fn test_artifact_name_clash_publishes_plain() {
        let build = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let compressible = "repeated block ".repeat(2000);
        fs::write(build.path().join("data.bin"), &compressible).unwrap();
        fs::write(build.path().join("data.bin.zst"), "also repeated ".repeat(2000)).unwrap();
        let config = PublisherConfig::new("demo", 1, "1.0");

        let report = publish(&config, build.path(), out.path(), false).unwrap();
        let remote = RemoteManifest::load(&report.remote_manifest).unwrap();

        let data = remote.get("data.bin").unwrap();
        assert!(!data.is_compressed());
        assert_eq!(fs::read(out.path().join("data.bin")).unwrap(), compressible.as_bytes());

        // Every record must describe exactly what the mirror serves
        for record in remote.files() {
            let served = out.path().join(record.artifact_name());
            let expected = match &record.compressed {
                Some(artifact) => &artifact.hash,
                None => &record.hash,
            };
            assert_eq!(&hash_file(&served).unwrap(), expected, "{}", record.path);
        }
    }

    #[test]
    fn test_republish_ignores_previous_local_manifest() {
        let build = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        sample_build(build.path());
        let mut config = PublisherConfig::new("demo", 1, "1.0");

        publish(&config, build.path(), out.path(), false).unwrap();
        config.set_version(2, None);
        let report = publish(&config, build.path(), out.path(), true).unwrap();

        assert_eq!(report.files, 3);
        let local = LocalManifest::load(&build.path().join("build-manifest.json")).unwrap();
        assert_eq!(local.version().number, 2);
    }

    #[test]
    fn test_publish_without_compression() {
        let build = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        sample_build(build.path());
        let mut config = PublisherConfig::new("demo", 1, "1.0");
        config.compression.enabled = false;

        let report = publish(&config, build.path(), out.path(), false).unwrap();

        assert_eq!(report.compressed_files, 0);
        assert!(out.path().join("bin/app").is_file());
        let manifest_len = fs::metadata(build.path().join("build-manifest.json"))
            .unwrap()
            .len();
        assert_eq!(report.published_bytes, report.build_bytes + manifest_len);
    }

    #[test]
    fn test_publish_refuses_occupied_out_dir() {
        let build = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        sample_build(build.path());
        fs::write(out.path().join("old.txt"), b"old").unwrap();
        let config = PublisherConfig::new("demo", 1, "1.0");

        let result = publish(&config, build.path(), out.path(), false);
        assert!(matches!(result, Err(PublishError::Conflict(_))));

        publish(&config, build.path(), out.path(), true).unwrap();
        assert!(!out.path().join("old.txt").exists());
    }

    #[test]
    fn test_publish_rejects_out_dir_inside_build() {
        let build = TempDir::new().unwrap();
        sample_build(build.path());
        let config = PublisherConfig::new("demo", 1, "1.0");

        let result = publish(&config, build.path(), &build.path().join("data"), true);
        assert!(matches!(result, Err(PublishError::InvalidBuild(_))));
    }

    #[test]
    fn test_publish_empty_build() {
        let build = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let config = PublisherConfig::new("demo", 1, "1.0");

        let result = publish(&config, build.path(), out.path(), false);
        assert!(matches!(result, Err(PublishError::InvalidBuild(_))));
    }
}
