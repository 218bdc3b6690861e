//! Auto-update toggles persisted in the JSON db.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dnpm_common::db::JsonDb;
use dnpm_common::error::{DnpmError, Result};
use dnpm_common::types::PackageId;
use serde::{Deserialize, Serialize};

/// Toggle id covering every user-installed package.
pub const MY_PACKAGES: &str = "my-packages";
/// Toggle id covering core system packages.
pub const SYSTEM_PACKAGES: &str = "system-packages";

const DB_KEY: &str = "auto-update-settings";

/// What an auto-update toggle applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoUpdateTarget {
    /// All user-installed packages.
    MyPackages,
    /// Core system packages.
    SystemPackages,
    /// One package.
    Package(PackageId),
}

impl AutoUpdateTarget {
    /// Parses `my-packages`, `system-packages` or a package id.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::InvalidRequest` for an empty id.
    pub fn parse(id: &str) -> Result<Self> {
        match id.trim() {
            "" => Err(DnpmError::InvalidRequest {
                message: "argument id is required".into(),
            }),
            MY_PACKAGES => Ok(Self::MyPackages),
            SYSTEM_PACKAGES => Ok(Self::SystemPackages),
            other => PackageId::new(other).map(Self::Package),
        }
    }

    fn key(&self) -> &str {
        match self {
            Self::MyPackages => MY_PACKAGES,
            Self::SystemPackages => SYSTEM_PACKAGES,
            Self::Package(id) => id.as_str(),
        }
    }
}

impl fmt::Display for AutoUpdateTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One stored toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoUpdateSetting {
    /// Whether auto-update is on.
    pub enabled: bool,
    /// When the toggle was last changed.
    pub updated_at: DateTime<Utc>,
}

/// Auto-update toggles.
#[derive(Debug, Clone)]
pub struct AutoUpdateSettings {
    db: Arc<JsonDb>,
}

impl AutoUpdateSettings {
    /// Creates the settings view over `db`.
    #[must_use]
    pub const fn new(db: Arc<JsonDb>) -> Self {
        Self { db }
    }

    /// Every stored toggle keyed by target id.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored settings have an unexpected shape.
    pub fn all(&self) -> Result<BTreeMap<String, AutoUpdateSetting>> {
        Ok(self.db.get(DB_KEY)?.unwrap_or_default())
    }

    /// Turns auto-update on or off for `id` (`my-packages`,
    /// `system-packages` or a package id).
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::InvalidRequest` for an empty or malformed id, or
    /// an error if the db write fails.
    pub fn edit(&self, id: &str, enabled: bool) -> Result<AutoUpdateTarget> {
        let target = AutoUpdateTarget::parse(id)?;
        let mut settings = self.all()?;
        let _ = settings.insert(
            target.key().to_string(),
            AutoUpdateSetting {
                enabled,
                updated_at: Utc::now(),
            },
        );
        self.db.set(DB_KEY, &settings)?;
        tracing::info!(target = %target, enabled, "auto-update setting changed");
        Ok(target)
    }

    /// Whether auto-update applies to `target`. A package follows
    /// `my-packages` unless it has its own toggle switched off.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored settings have an unexpected shape.
    pub fn is_enabled(&self, target: &AutoUpdateTarget) -> Result<bool> {
        let settings = self.all()?;
        let enabled = |key: &str| settings.get(key).is_some_and(|s| s.enabled);
        Ok(match target {
            AutoUpdateTarget::Package(id) => {
                enabled(MY_PACKAGES) && settings.get(id.as_str()).is_none_or(|s| s.enabled)
            }
            other => enabled(other.key()),
        })
    }
}
