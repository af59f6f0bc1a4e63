use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_LOCAL_PROFILE_DIR: &str = "/tmp/python_stats";
pub const DEFAULT_WORKER_NAME: &str = "worker_0";
pub const DEFAULT_COLLECTIONS_FILE_NAME: &str = "worker_0_collections.json";

pub const PROFILE_DIR_ENV: &str = "TRAINPROF_PROFILE_DIR";
pub const S3_PATH_ENV: &str = "TRAINPROF_S3_PATH";
pub const WORKER_NAME_ENV: &str = "TRAINPROF_WORKER_NAME";

/// Options for locating profiling artifacts and naming per-worker outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Directory holding the stats, or the staging directory when `s3_path` is set
    pub local_profile_dir: PathBuf,
    /// Remote prefix (`s3://bucket/prefix`) to mirror stats from
    pub s3_path: Option<String>,
    /// Worker identity used when an artifact carries no node directory
    pub default_worker_name: String,
    /// File name used when persisting the collection registry
    pub collections_file_name: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            local_profile_dir: PathBuf::from(DEFAULT_LOCAL_PROFILE_DIR),
            s3_path: None,
            default_worker_name: DEFAULT_WORKER_NAME.to_string(),
            collections_file_name: DEFAULT_COLLECTIONS_FILE_NAME.to_string(),
        }
    }
}

impl AnalysisConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the local profile directory
    pub fn set_local_profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_profile_dir = dir.into();
        self
    }

    /// Set the remote prefix to mirror from
    pub fn set_s3_path(mut self, s3_path: impl Into<String>) -> Self {
        self.s3_path = Some(s3_path.into());
        self
    }

    /// Set the default worker name
    pub fn set_default_worker_name(mut self, name: impl Into<String>) -> Self {
        self.default_worker_name = name.into();
        self
    }

    /// Set the collections file name
    pub fn set_collections_file_name(mut self, name: impl Into<String>) -> Self {
        self.collections_file_name = name.into();
        self
    }

    /// Build a config from the defaults overridden by `TRAINPROF_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = env::var(PROFILE_DIR_ENV) {
            config.local_profile_dir = PathBuf::from(dir);
        }
        if let Ok(s3_path) = env::var(S3_PATH_ENV) {
            if !s3_path.is_empty() {
                config.s3_path = Some(s3_path);
            }
        }
        if let Ok(worker) = env::var(WORKER_NAME_ENV) {
            config.default_worker_name = worker;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON document; missing keys keep their defaults
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the collections file inside the local profile directory
    pub fn collections_path(&self) -> PathBuf {
        self.local_profile_dir.join(&self.collections_file_name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_profile_dir.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("local_profile_dir must not be empty".to_string()));
        }
        if self.default_worker_name.is_empty() {
            return Err(Error::InvalidConfig("default_worker_name must not be empty".to_string()));
        }
        if self.default_worker_name.contains('/') || self.default_worker_name.contains('\\') {
            return Err(Error::InvalidConfig(format!(
                "default_worker_name must not contain path separators: {}",
                self.default_worker_name
            )));
        }
        if self.collections_file_name.is_empty() {
            return Err(Error::InvalidConfig("collections_file_name must not be empty".to_string()));
        }
        Ok(())
    }
}
