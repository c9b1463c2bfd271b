//! Builder Configuration
//!
//! Directory layout, admission limits and timeouts. Every field has a
//! default so an empty JSON object is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::postprocess::PostProcessStep;

pub const DEPS_CACHE_DIR_NAME: &str = "_deps_cache";
pub const STUB_BUILDS_ENV: &str = "PLAYFORGE_STUB_BUILDS";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderConfig {
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    #[serde(default = "default_library_dir")]
    pub library_dir: PathBuf,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,
    #[serde(default = "default_max_concurrent_builds")]
    pub max_concurrent_builds: usize,
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_build_timeout_secs")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_install_timeout_secs")]
    pub install_timeout_secs: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    #[serde(default = "default_preview_max_interactions")]
    pub preview_max_interactions: u32,
    #[serde(default = "default_install_command")]
    pub install_command: String,
    #[serde(default)]
    pub stub_builds: bool,
    #[serde(default)]
    pub inline_final_assets: bool,
    #[serde(default)]
    pub post_processing: Vec<PostProcessStep>,
    #[serde(default = "default_post_process_timeout_secs")]
    pub post_process_timeout_secs: u64,
}

fn default_templates_dir() -> PathBuf { PathBuf::from("templates") }
fn default_library_dir() -> PathBuf { PathBuf::from("library") }
fn default_output_dir() -> PathBuf { PathBuf::from("previews") }
fn default_temp_dir() -> PathBuf { PathBuf::from("temp") }
fn default_max_concurrent_builds() -> usize { 2 }
fn default_max_queue_size() -> usize { 20 }
fn default_build_timeout_secs() -> u64 { 120 }
fn default_install_timeout_secs() -> u64 { 300 }
fn default_max_output_bytes() -> usize { 20 * 1024 * 1024 }
fn default_preview_max_interactions() -> u32 { 4 }
fn default_post_process_timeout_secs() -> u64 { 300 }

fn default_install_command() -> String {
    "npm install --no-audit --no-fund --include=dev".to_string()
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            templates_dir: default_templates_dir(),
            library_dir: default_library_dir(),
            output_dir: default_output_dir(),
            temp_dir: default_temp_dir(),
            max_concurrent_builds: default_max_concurrent_builds(),
            max_queue_size: default_max_queue_size(),
            build_timeout_secs: default_build_timeout_secs(),
            install_timeout_secs: default_install_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            preview_max_interactions: default_preview_max_interactions(),
            install_command: default_install_command(),
            stub_builds: false,
            inline_final_assets: false,
            post_processing: vec![],
            post_process_timeout_secs: default_post_process_timeout_secs(),
        }
    }
}

impl BuilderConfig {
    /// Default configuration with every directory placed under `root`.
    pub fn rooted(root: &Path) -> Self {
        Self::default().rebased(root)
    }

    /// Load from a JSON file. Relative directories resolve against `root`.
    pub fn load(path: &Path, root: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        let config = config.rebased(root);
        config.check()?;
        Ok(config)
    }

    /// Apply environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if std::env::var(STUB_BUILDS_ENV).map_or(false, |v| v.trim() == "1") {
            self.stub_builds = true;
        }
        self
    }

    pub fn check(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_builds == 0 {
            return Err(ConfigError::Invalid("maxConcurrentBuilds must be at least 1".into()));
        }
        if self.build_timeout_secs == 0 || self.install_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        Ok(())
    }

    fn rebased(mut self, root: &Path) -> Self {
        for dir in [
            &mut self.templates_dir,
            &mut self.library_dir,
            &mut self.output_dir,
            &mut self.temp_dir,
        ] {
            if dir.is_relative() {
                *dir = root.join(&*dir);
            }
        }
        self
    }

    pub fn deps_cache_dir(&self) -> PathBuf {
        self.temp_dir.join(DEPS_CACHE_DIR_NAME)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn post_process_timeout(&self) -> Duration {
        Duration::from_secs(self.post_process_timeout_secs)
    }
}
