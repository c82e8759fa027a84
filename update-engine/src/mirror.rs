//! Mirror registry: candidate download sources and their probe order.

use crate::utils::errors::{Result, UpdateError};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// A download source. Lower `rating` is preferred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    pub name: String,
    pub url: String,
    pub rating: u32,
}

impl Mirror {
    pub fn new(name: impl Into<String>, url: impl Into<String>, rating: u32) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            rating,
        }
    }

    /// URL of a file published by this mirror.
    ///
    /// Each `/`-separated segment of `relative` is percent-encoded, so `#`,
    /// `?` and `%` stay part of the file name.
    pub fn file_url(&self, relative: &str) -> Result<Url> {
        let mut url = self.base_url()?;
        url.path_segments_mut()
            .map_err(|_| UpdateError::Config(format!("mirror {} url cannot hold a path", self.name)))?
            .pop_if_empty()
            .extend(relative.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    /// Parsed base URL
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.url)
            .map_err(|e| UpdateError::Config(format!("mirror {} has an invalid url: {}", self.name, e)))
    }
}

/// Mirrors registered for the lifetime of one orchestrator.
#[derive(Debug, Clone, Default)]
pub struct MirrorRegistry {
    mirrors: Vec<Mirror>,
}

impl MirrorRegistry {
    pub fn new(mirrors: Vec<Mirror>) -> Self {
        Self { mirrors }
    }

    /// Mirrors in ascending rating order. Ties keep registration order.
    pub fn probe_order(&self) -> Vec<Mirror> {
        let mut ordered = self.mirrors.clone();
        ordered.sort_by_key(|m| m.rating);
        ordered
    }
}
