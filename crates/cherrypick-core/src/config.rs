//! Configuration for cherrypick.
//!
//! Values are resolved in layers: built-in defaults, then `cherrypick.toml`,
//! then environment overrides, then whatever the frontend sets explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{FetchError, Result};

pub const CONFIG_FILE_NAME: &str = "cherrypick.toml";
pub const DOWNLOAD_DIR_VAR: &str = "CHERRYPICK_DOWNLOAD_DIR";
pub const CONCURRENCY_VAR: &str = "CHERRYPICK_CONCURRENCY";
pub const BACKEND_VAR: &str = "CHERRYPICK_BACKEND";

pub const DEFAULT_CONCURRENCY: usize = 50;
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_DOWNLOAD_DIR: &str = "cherrypicked";

/// Which backend lists trees and serves file content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// REST contents API plus the raw-content host.
    #[default]
    Api,
    /// Bare clone into the state directory, read through git2.
    Clone,
}

impl std::str::FromStr for BackendKind {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "api" => Ok(Self::Api),
            "clone" => Ok(Self::Clone),
            other => Err(FetchError::Config(format!(
                "unknown backend '{}', expected 'api' or 'clone'",
                other
            ))),
        }
    }
}

/// Resolved fetch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub download_dir: PathBuf,
    pub concurrency: usize,
    pub default_branch: String,
    pub backend: BackendKind,
    pub api_base: String,
    pub raw_base: String,
    pub clone_base: String,
    pub timeout_secs: Option<u64>,
    pub state_dir: Option<PathBuf>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from(DEFAULT_DOWNLOAD_DIR),
            concurrency: DEFAULT_CONCURRENCY,
            default_branch: DEFAULT_BRANCH.to_string(),
            backend: BackendKind::Api,
            api_base: "https://api.github.com".to_string(),
            raw_base: "https://raw.githubusercontent.com".to_string(),
            clone_base: "https://github.com".to_string(),
            timeout_secs: None,
            state_dir: None,
        }
    }
}

impl FetchConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| FetchError::Config(format!("invalid TOML: {}", e)))
    }

    /// Apply `CHERRYPICK_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(DOWNLOAD_DIR_VAR).filter(|d| !d.is_empty()) {
            self.download_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(CONCURRENCY_VAR).filter(|c| !c.is_empty()) {
            self.concurrency = raw.parse().map_err(|_| {
                FetchError::Config(format!("{} must be a positive integer, got '{}'", CONCURRENCY_VAR, raw))
            })?;
        }
        if let Some(raw) = lookup(BACKEND_VAR).filter(|b| !b.is_empty()) {
            self.backend = raw.parse()?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(FetchError::Config("concurrency must be at least 1".to_string()));
        }
        if self.default_branch.trim().is_empty() {
            return Err(FetchError::Config("default_branch must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Directory holding bare clones for the clone backend.
    pub fn resolved_state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|p| p.join("cherrypick"))
                .unwrap_or_else(|| std::env::temp_dir().join("cherrypick"))
        })
    }
}

/// Locates and loads `cherrypick.toml`.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Resolve the config path: explicit path, then `./cherrypick.toml`,
    /// then the user config directory.
    pub fn discover(explicit: Option<&Path>, project_root: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Ok(Self::from_path(path));
        }
        let local = project_root.join(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(Self::from_path(local));
        }
        let global_dir = dirs::config_dir()
            .ok_or_else(|| FetchError::Config("could not determine config directory".to_string()))?
            .join("cherrypick");
        Ok(Self::from_path(global_dir.join(CONFIG_FILE_NAME)))
    }

    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config, falling back to defaults when the file is absent.
    pub fn load(&self) -> Result<FetchConfig> {
        if !self.config_path.exists() {
            return Ok(FetchConfig::default());
        }
        let content = std::fs::read_to_string(&self.config_path).map_err(|e| {
            FetchError::Config(format!(
                "failed to read {}: {}",
                self.config_path.display(),
                e
            ))
        })?;
        let config = FetchConfig::from_toml_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}
