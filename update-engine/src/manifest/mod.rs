//! Build manifests: the versioned file sets of an installed or published build.
//!
//! A *local* manifest lists files as they sit in the install tree. A *remote*
//! manifest lists files as a mirror publishes them, optionally zstd-compressed.
//! Both are loaded whole and never patched in place.

pub mod hash;

use crate::utils::errors::{Result, UpdateError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Suffix a mirror appends to the artifact name of a compressed file.
pub const COMPRESSED_SUFFIX: &str = ".zst";

/// Product version. Only `number` takes part in comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVersion {
    /// Internal, monotonically assigned build number
    pub number: u64,

    /// Human-readable version, e.g. "2.4.1 (beta)"
    pub display: String,
}

impl ProductVersion {
    pub fn new(number: u64, display: impl Into<String>) -> Self {
        Self {
            number,
            display: display.into(),
        }
    }
}

impl PartialEq for ProductVersion {
    fn eq(&self, other: &Self) -> bool {
        self.number == other.number
    }
}

impl Eq for ProductVersion {}

impl PartialOrd for ProductVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ProductVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number.cmp(&other.number)
    }
}

impl fmt::Display for ProductVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (build {})", self.display, self.number)
    }
}

/// Common view over local and remote file records.
pub trait ManifestRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Relative path inside the install tree, `/`-separated
    fn path(&self) -> &str;

    /// Hash of the uncompressed content
    fn hash(&self) -> &str;

    /// Uncompressed size in bytes
    fn size(&self) -> u64;
}

/// A file as it exists (or should exist) in the install tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub hash: String,
    pub size: u64,
}

impl ManifestRecord for FileRecord {
    fn path(&self) -> &str {
        &self.path
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Hash and size of the compressed artifact a mirror serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressedArtifact {
    pub hash: String,
    pub size: u64,
}

/// A file as published on a mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFileRecord {
    pub path: String,

    /// Hash of the uncompressed content
    pub hash: String,

    /// Uncompressed size in bytes
    pub size: u64,

    /// Present iff the mirror serves this file compressed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed: Option<CompressedArtifact>,
}

impl RemoteFileRecord {
    pub fn is_compressed(&self) -> bool {
        self.compressed.is_some()
    }

    /// Bytes charged against this file when estimating or tracking a download.
    pub fn download_weight(&self) -> u64 {
        match &self.compressed {
            Some(artifact) => artifact.size,
            None => self.size,
        }
    }

    /// Name of the file on the mirror, relative to its base URL.
    pub fn artifact_name(&self) -> String {
        if self.is_compressed() {
            format!("{}{}", self.path, COMPRESSED_SUFFIX)
        } else {
            self.path.clone()
        }
    }
}

impl ManifestRecord for RemoteFileRecord {
    fn path(&self) -> &str {
        &self.path
    }

    fn hash(&self) -> &str {
        &self.hash
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// On-disk shape of a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestDocument<F> {
    version: ProductVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    published_at: Option<DateTime<Utc>>,
    files: Vec<F>,
}

/// A versioned set of file records keyed uniquely by relative path.
#[derive(Debug, Clone)]
pub struct BuildManifest<F> {
    version: ProductVersion,
    published_at: Option<DateTime<Utc>>,
    files: BTreeMap<String, F>,
}

pub type LocalManifest = BuildManifest<FileRecord>;
pub type RemoteManifest = BuildManifest<RemoteFileRecord>;

impl<F: ManifestRecord> BuildManifest<F> {
    /// Build a manifest, rejecting unsafe or duplicate paths.
    pub fn new(version: ProductVersion, records: impl IntoIterator<Item = F>) -> Result<Self> {
        let mut files = BTreeMap::new();
        for record in records {
            validate_relative_path(record.path())?;
            let path = record.path().to_string();
            if files.insert(path.clone(), record).is_some() {
                return Err(UpdateError::Manifest(format!("duplicate path: {}", path)));
            }
        }

        Ok(Self {
            version,
            published_at: None,
            files,
        })
    }

    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = Some(published_at);
        self
    }

    pub fn version(&self) -> &ProductVersion {
        &self.version
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    /// Records in path order.
    pub fn files(&self) -> impl Iterator<Item = &F> {
        self.files.values()
    }

    pub fn get(&self, path: &str) -> Option<&F> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Sum of uncompressed sizes.
    pub fn total_size(&self) -> u64 {
        self.files.values().map(|f| f.size()).sum()
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let document: ManifestDocument<F> = serde_json::from_slice(bytes)?;
        let manifest = Self::new(document.version, document.files)?;
        Ok(Self {
            published_at: document.published_at,
            ..manifest
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read(path)?;
        Self::parse(&content)
            .map_err(|e| UpdateError::Manifest(format!("{}: {}", path.display(), e)))
    }

    pub fn to_json(&self) -> Result<String> {
        let document = ManifestDocument {
            version: self.version.clone(),
            published_at: self.published_at,
            files: self.files.values().cloned().collect(),
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Write the manifest as a unit: temp file, then rename over the target.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_json()?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}

/// Reject paths that could escape the install or staging tree.
pub fn validate_relative_path(path: &str) -> Result<()> {
    let unsafe_path = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path
            .split('/')
            .any(|c| c.is_empty() || c == "." || c == ".." || c.contains(':'));

    if unsafe_path {
        return Err(UpdateError::Manifest(format!("unsafe file path: {:?}", path)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn local(path: &str, hash: &str, size: u64) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            hash: hash.to_string(),
            size,
        }
    }

    #[test]
    fn test_version_equality_ignores_display() {
        assert_eq!(ProductVersion::new(7, "1.0"), ProductVersion::new(7, "1.0-renamed"));
        assert_ne!(ProductVersion::new(7, "1.0"), ProductVersion::new(8, "1.0"));
        assert!(ProductVersion::new(7, "z") < ProductVersion::new(8, "a"));
    }

    #[test]
    fn test_download_weight_and_artifact_name() {
        let plain = RemoteFileRecord {
            path: "bin/app".to_string(),
            hash: "aa".to_string(),
            size: 100,
            compressed: None,
        };
        assert_eq!(plain.download_weight(), 100);
        assert_eq!(plain.artifact_name(), "bin/app");

        let packed = RemoteFileRecord {
            compressed: Some(CompressedArtifact {
                hash: "bb".to_string(),
                size: 40,
            }),
            ..plain
        };
        assert!(packed.is_compressed());
        assert_eq!(packed.download_weight(), 40);
        assert_eq!(packed.artifact_name(), "bin/app.zst");
    }

    #[test]
    fn test_duplicate_paths_rejected() {
        let result = LocalManifest::new(
            ProductVersion::new(1, "1"),
            vec![local("a.txt", "01", 1), local("a.txt", "02", 2)],
        );
        assert!(matches!(result, Err(UpdateError::Manifest(_))));
    }

    #[test]
    fn test_unsafe_paths_rejected() {
        for path in ["", "/etc/passwd", "../up", "a/../../b", "a//b", "C:/x", "a\\b", "./a"] {
            assert!(validate_relative_path(path).is_err(), "accepted {:?}", path);
        }
        assert!(validate_relative_path("lib/plugins/x.so").is_ok());
    }

    #[test]
    fn test_compressed_fields_absent_when_uncompressed() {
        let manifest = RemoteManifest::new(
            ProductVersion::new(3, "3.0"),
            vec![RemoteFileRecord {
                path: "readme.txt".to_string(),
                hash: "cc".to_string(),
                size: 5,
                compressed: None,
            }],
        )
        .unwrap();

        let json = manifest.to_json().unwrap();
        assert!(!json.contains("compressed"));
        assert!(!json.contains("published_at"));
    }

    #[test]
    fn test_parse_remote_document() {
        let json = r#"{
            "version": { "number": 12, "display": "1.2" },
            "files": [
                { "path": "b.dat", "hash": "02", "size": 20,
                  "compressed": { "hash": "f2", "size": 8 } },
                { "path": "a.dat", "hash": "01", "size": 10 }
            ]
        }"#;

        let manifest = RemoteManifest::parse(json.as_bytes()).unwrap();
        assert_eq!(manifest.version().number, 12);
        assert_eq!(manifest.len(), 2);
        let paths: Vec<&str> = manifest.files().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.dat", "b.dat"]);
        assert_eq!(manifest.get("b.dat").unwrap().download_weight(), 8);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(RemoteManifest::parse(b"<html>not found</html>").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("build-manifest.json");

        let manifest = LocalManifest::new(
            ProductVersion::new(4, "0.4"),
            vec![local("x/y.bin", "ab", 3)],
        )
        .unwrap()
        .with_published_at(Utc::now());
        manifest.save(&path).unwrap();

        assert!(!path.with_extension("tmp").exists());
        let loaded = LocalManifest::load(&path).unwrap();
        assert_eq!(loaded.version(), manifest.version());
        assert_eq!(loaded.get("x/y.bin"), manifest.get("x/y.bin"));
        assert!(loaded.published_at().is_some());
    }
}
