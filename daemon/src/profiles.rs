//! Named per-screen content assignments stored in profiles.toml
//!
//! ```toml
//! [[lobby]]
//! screen = "screen-1"
//! content = { type = "video", value = "~/signage/welcome.mp4" }
//!
//! [[lobby]]
//! screen = "screen-2"
//! content = { type = "text", value = "Doors open at 9" }
//! scale = "Fit"
//! ```
//!
//! `type` is one of `text`, `image`, `video` or `web`.

use anyhow::{Context, Result};
use common::{Content, ScaleMode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Content for one screen within a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub screen: String,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleMode>,
}

pub struct ProfileStore {
    path: PathBuf,
    profiles: BTreeMap<String, Vec<Assignment>>,
}

impl ProfileStore {
    pub fn default_path() -> Result<PathBuf> {
        Ok(Config::config_dir()?.join("profiles.toml"))
    }

    /// Read the store at `path`; a missing file is an empty store
    pub fn open(path: &Path) -> Result<Self> {
        let profiles = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read profiles: {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse profiles: {}", path.display()))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            profiles,
        })
    }

    /// A store with no profiles that will write to `path`
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            profiles: BTreeMap::new(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<&[Assignment]> {
        self.profiles.get(name).map(Vec::as_slice)
    }

    /// Store `assignments` under `name`, replacing any previous profile
    pub fn save(&mut self, name: &str, assignments: Vec<Assignment>) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            anyhow::bail!("Profile name cannot be empty");
        }

        self.profiles.insert(name.to_string(), assignments);
        self.write()?;
        log::info!("Saved profile '{}' to {}", name, self.path.display());
        Ok(())
    }

    /// Returns whether the profile existed
    pub fn delete(&mut self, name: &str) -> Result<bool> {
        if self.profiles.remove(name).is_none() {
            return Ok(false);
        }
        self.write()?;
        log::info!("Deleted profile '{}'", name);
        Ok(true)
    }

    fn write(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let contents = toml::to_string_pretty(&self.profiles).context("Failed to serialize profiles")?;
        fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write profiles: {}", self.path.display()))
    }
}
