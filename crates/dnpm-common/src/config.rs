//! Configuration model for dnpm.
//!
//! [`DnpmConfig`] is the static, file-loadable part. [`ConfigStore`] wraps
//! it together with the values that may be tuned while the process runs
//! (currently the content-store fetch timeout).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{DnpmError, Result};
use crate::types::PackageId;

/// Root configuration for dnpm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnpmConfig {
    /// Base directory for dnpm state and data.
    pub data_dir: PathBuf,
    /// Directory holding one sub-directory per installed package.
    pub repo_dir: PathBuf,
    /// Path to the JSON key-value db.
    pub db_path: PathBuf,
    /// Path to the global environment file.
    pub global_env_file: PathBuf,
    /// Content-store gateway used to build avatar URLs.
    pub gateway_url: String,
    /// Content-store HTTP API used to fetch releases.
    pub store_api_url: String,
    /// Registry index resolving package names to versions.
    pub registry_url: String,
    /// Version of the host core, checked against package requirements.
    pub core_version: semver::Version,
    /// Free disk space that must remain after pulling an image.
    pub min_free_disk_bytes: u64,
    /// Initial content-store fetch timeout in milliseconds.
    pub fetch_timeout_ms: u64,
}

impl Default for DnpmConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from(constants::DEFAULT_DATA_DIR);
        let repo_dir = PathBuf::from(constants::DEFAULT_REPO_DIR);
        Self {
            db_path: data_dir.join(constants::DB_FILE_NAME),
            global_env_file: repo_dir.join(constants::GLOBAL_ENV_FILE_NAME),
            data_dir,
            repo_dir,
            gateway_url: constants::DEFAULT_GATEWAY_URL.into(),
            store_api_url: constants::DEFAULT_STORE_API_URL.into(),
            registry_url: constants::DEFAULT_REGISTRY_URL.into(),
            core_version: semver::Version::new(0, 2, 0),
            min_free_disk_bytes: 5 * 1024 * 1024 * 1024,
            fetch_timeout_ms: u64::try_from(constants::DEFAULT_FETCH_TIMEOUT.as_millis())
                .unwrap_or(u64::MAX),
        }
    }
}

impl DnpmConfig {
    /// Builds a configuration rooted at `data_dir`, with every path
    /// derived from it.
    #[must_use]
    pub fn rooted_at(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let repo_dir = data_dir.join("dnp_repo");
        Self {
            db_path: data_dir.join(constants::DB_FILE_NAME),
            global_env_file: repo_dir.join(constants::GLOBAL_ENV_FILE_NAME),
            data_dir,
            repo_dir,
            ..Self::default()
        }
    }

    /// Loads a configuration file, falling back to defaults when the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| DnpmError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        tracing::info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Directory holding the given package's files.
    #[must_use]
    pub fn package_dir(&self, id: &PackageId) -> PathBuf {
        self.repo_dir.join(id.as_str())
    }

    /// Path of the given package's compose specification.
    #[must_use]
    pub fn compose_path(&self, id: &PackageId) -> PathBuf {
        self.package_dir(id).join(constants::COMPOSE_FILE_NAME)
    }
}

/// Configuration shared by every component, with a single mutation entry
/// point for the live-tunable values.
#[derive(Debug)]
pub struct ConfigStore {
    config: DnpmConfig,
    fetch_timeout_ms: AtomicU64,
}

impl ConfigStore {
    /// Wraps a static configuration.
    #[must_use]
    pub fn new(config: DnpmConfig) -> Self {
        let fetch_timeout_ms = AtomicU64::new(config.fetch_timeout_ms.max(1));
        Self {
            config,
            fetch_timeout_ms,
        }
    }

    /// Returns the static configuration.
    #[must_use]
    pub const fn config(&self) -> &DnpmConfig {
        &self.config
    }

    /// Bound currently applied to content-store calls.
    #[must_use]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms.load(Ordering::Relaxed))
    }

    /// Changes the content-store timeout for all subsequent calls.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::InvalidRequest` if no timeout or a zero timeout
    /// is given.
    pub fn set_fetch_timeout(&self, timeout_ms: Option<u64>) -> Result<()> {
        let Some(ms) = timeout_ms.filter(|ms| *ms > 0) else {
            return Err(DnpmError::InvalidRequest {
                message: "timeout must be defined".into(),
            });
        };
        let previous = self.fetch_timeout_ms.swap(ms, Ordering::Relaxed);
        tracing::info!(previous_ms = previous, timeout_ms = ms, "content store timeout changed");
        Ok(())
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(DnpmConfig::default())
    }
}
