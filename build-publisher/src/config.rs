//! `publisher.toml`: the product, its current build number and its mirrors.

use crate::error::{PublishError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use update_engine::config::MirrorConfig;
use update_engine::{Mirror, ProductVersion};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    pub product: ProductConfig,

    #[serde(default)]
    pub manifest: ManifestNames,

    #[serde(default)]
    pub compression: CompressionConfig,

    #[serde(default)]
    pub mirrors: Vec<MirrorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductConfig {
    pub name: String,

    /// Build number, the only thing the updater compares
    pub build: u64,

    /// Human-readable version shown next to the build number
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestNames {
    /// Written into the build root
    #[serde(default = "default_local_manifest")]
    pub local: String,

    /// Written into the mirror root
    #[serde(default = "default_remote_manifest")]
    pub remote: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// zstd level
    #[serde(default = "default_level")]
    pub level: i32,
}

fn default_local_manifest() -> String {
    "build-manifest.json".to_string()
}

fn default_remote_manifest() -> String {
    "build-manifest.remote.json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_level() -> i32 {
    19
}

impl Default for ManifestNames {
    fn default() -> Self {
        Self {
            local: default_local_manifest(),
            remote: default_remote_manifest(),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            level: default_level(),
        }
    }
}

impl PublisherConfig {
    pub fn new(name: impl Into<String>, build: u64, version: impl Into<String>) -> Self {
        Self {
            product: ProductConfig {
                name: name.into(),
                build,
                version: version.into(),
            },
            manifest: ManifestNames::default(),
            compression: CompressionConfig::default(),
            mirrors: Vec::new(),
        }
    }

    /// Write a fresh config. An existing file is only replaced with `force`.
    pub fn init(path: &Path, config: &Self, force: bool) -> Result<()> {
        if path.exists() && !force {
            return Err(PublishError::Conflict(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        config.save(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PublishError::NotFound(format!(
                "{} not found (run `init` first)",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn product_version(&self) -> ProductVersion {
        ProductVersion::new(self.product.build, self.product.version.clone())
    }

    pub fn set_version(&mut self, build: u64, version: Option<String>) {
        self.product.build = build;
        if let Some(version) = version {
            self.product.version = version;
        }
    }

    pub fn add_mirror(&mut self, name: &str, url: &str, rating: u32) -> Result<()> {
        if name.trim().is_empty() || url.trim().is_empty() {
            return Err(PublishError::InvalidBuild(
                "mirror name and url are required".to_string(),
            ));
        }
        Mirror::new(name, url, rating).base_url()?;
        if self.mirrors.iter().any(|m| m.name == name) {
            return Err(PublishError::Conflict(format!(
                "mirror {} is already registered",
                name
            )));
        }
        self.mirrors.push(MirrorConfig {
            name: name.to_string(),
            url: url.to_string(),
            rating,
        });
        Ok(())
    }

    pub fn remove_mirror(&mut self, name: &str) -> Result<MirrorConfig> {
        let idx = self
            .mirrors
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| PublishError::NotFound(format!("mirror {} not found", name)))?;
        Ok(self.mirrors.remove(idx))
    }
}
