//! Configuration management for the updater.
//!
//! Loads configuration from TOML file with environment variable overrides.

use crate::manifest::validate_relative_path;
use crate::mirror::Mirror;
use crate::utils::errors::{Result, UpdateError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub install: InstallConfig,

    #[serde(default)]
    pub transfer: TransferConfig,

    #[serde(default)]
    pub mirrors: Vec<MirrorConfig>,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Root of the live installation
    pub dir: PathBuf,

    /// Where downloads are staged (default: sibling `<dir>.update`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,

    /// Local manifest file name, relative to `dir`
    #[serde(default = "default_local_manifest")]
    pub local_manifest: String,

    /// Second-stage applier, relative to `dir`
    #[serde(default = "default_applier")]
    pub applier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Remote manifest file name on every mirror
    #[serde(default = "default_remote_manifest")]
    pub remote_manifest: String,

    /// Manifest request timeout, and the longest a download may sit idle, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    pub name: String,
    pub url: String,

    /// Probe priority, lower first
    #[serde(default)]
    pub rating: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_local_manifest() -> String {
    "build-manifest.json".to_string()
}

fn default_applier() -> String {
    format!("updater-apply{}", std::env::consts::EXE_SUFFIX)
}

fn default_remote_manifest() -> String {
    "build-manifest.remote.json".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_user_agent() -> String {
    format!("updater/{}", env!("CARGO_PKG_VERSION"))
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            remote_manifest: default_remote_manifest(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl From<&MirrorConfig> for Mirror {
    fn from(config: &MirrorConfig) -> Self {
        Mirror::new(config.name.clone(), config.url.clone(), config.rating)
    }
}

impl InstallConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            staging_dir: None,
            local_manifest: default_local_manifest(),
            applier: default_applier(),
        }
    }

    pub fn staging_dir(&self) -> PathBuf {
        match &self.staging_dir {
            Some(dir) => dir.clone(),
            None => {
                let mut name = self
                    .dir
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_else(|| "install".into());
                name.push(".update");
                self.dir.with_file_name(name)
            }
        }
    }

    pub fn local_manifest_path(&self) -> PathBuf {
        self.dir.join(&self.local_manifest)
    }
}

impl Config {
    /// Load configuration from a TOML file and apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| UpdateError::Config(e.to_string()))
    }

    /// `UPDATER_INSTALL_DIR` and `UPDATER_LOG_LEVEL` override the file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("UPDATER_INSTALL_DIR") {
            if !dir.is_empty() {
                self.install.dir = PathBuf::from(dir);
            }
        }
        if let Ok(level) = std::env::var("UPDATER_LOG_LEVEL") {
            if !level.is_empty() {
                self.log.level = level;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.install.dir.as_os_str().is_empty() {
            return Err(UpdateError::Config("install.dir must be set".to_string()));
        }
        if self.mirrors.is_empty() {
            return Err(UpdateError::Config("at least one [[mirrors]] entry is required".to_string()));
        }
        for mirror in self.mirrors() {
            mirror.base_url()?;
        }
        if self.transfer.timeout_secs == 0 {
            return Err(UpdateError::Config("transfer.timeout_secs must be positive".to_string()));
        }
        for (key, value) in [
            ("install.local_manifest", &self.install.local_manifest),
            ("install.applier", &self.install.applier),
            ("transfer.remote_manifest", &self.transfer.remote_manifest),
        ] {
            validate_relative_path(value)
                .map_err(|e| UpdateError::Config(format!("{}: {}", key, e)))?;
        }
        if self.install.staging_dir() == self.install.dir {
            return Err(UpdateError::Config(
                "install.staging_dir must differ from install.dir".to_string(),
            ));
        }
        Ok(())
    }

    pub fn mirrors(&self) -> Vec<Mirror> {
        self.mirrors.iter().map(Mirror::from).collect()
    }
}
