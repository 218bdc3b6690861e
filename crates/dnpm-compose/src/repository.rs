//! Installed packages on disk.
//!
//! Each installed package owns `<repo_dir>/<id>/docker-compose.yml`. The
//! repository discovers installed packages from those files and is the
//! single writer of them: every write goes through a per-package lock, so
//! an install flow and an env propagation flow cannot interleave their
//! read-modify-write cycles on the same file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use dnpm_common::constants::COMPOSE_FILE_NAME;
use dnpm_common::error::{DnpmError, Result};
use dnpm_common::types::{ContentHash, PackageId, VersionSelector};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::editor::ComposeEditor;
use crate::settings::UserSettings;
use crate::spec::ContainerGroupSpec;

/// A currently installed package.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledPackage {
    /// Package id.
    pub id: PackageId,
    /// Installed version.
    pub version: String,
    /// Release hash the package was installed from, if known.
    pub origin: Option<ContentHash>,
    /// Dependencies declared by the installed release.
    pub dependencies: BTreeMap<PackageId, VersionSelector>,
    /// On-disk specification.
    pub spec: ContainerGroupSpec,
    /// Settings snapshot derived from the on-disk specification.
    pub settings: UserSettings,
    /// Location of the on-disk specification.
    pub compose_path: PathBuf,
}

impl InstalledPackage {
    /// Builds the installed view of a compose file belonging to `id`.
    #[must_use]
    pub fn from_editor(id: PackageId, editor: &ComposeEditor, compose_path: PathBuf) -> Self {
        let labels = editor.release_labels(id.as_str());
        let version = labels
            .as_ref()
            .map(|l| l.version.clone())
            .or_else(|| version_from_image(editor.spec(), &id))
            .unwrap_or_default();
        let (origin, dependencies) = labels
            .map(|l| (l.origin, l.dependencies))
            .unwrap_or_default();
        Self {
            settings: editor.settings(id.as_str()),
            id,
            version,
            origin,
            dependencies,
            spec: editor.spec().clone(),
            compose_path,
        }
    }

    /// Installed version as semver, if it is one.
    #[must_use]
    pub fn semver(&self) -> Option<semver::Version> {
        semver::Version::parse(&self.version).ok()
    }
}

/// Falls back to the `<id>:<version>` image tag for specs without labels.
fn version_from_image(spec: &ContainerGroupSpec, id: &PackageId) -> Option<String> {
    let (_, service) = spec.primary_service(id.as_str())?;
    let (name, tag) = service.image.rsplit_once(':')?;
    (name == id.as_str() && !tag.is_empty()).then(|| tag.to_string())
}

/// Directory of installed packages with per-package write serialization.
#[derive(Debug)]
pub struct PackageRepository {
    root: PathBuf,
    locks: DashMap<PackageId, Arc<Mutex<()>>>,
}

impl PackageRepository {
    /// Opens the repository rooted at `root`. The directory is created on
    /// first write, not here.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compose file path of a package.
    #[must_use]
    pub fn compose_path(&self, id: &PackageId) -> PathBuf {
        self.root.join(id.as_str()).join(COMPOSE_FILE_NAME)
    }

    /// Lists every installed package. Unreadable compose files are logged
    /// and skipped so one broken package cannot hide the others.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository directory exists but cannot be
    /// listed.
    pub fn list_installed(&self) -> Result<Vec<InstalledPackage>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.root).map_err(|e| DnpmError::io(&self.root, e))?;
        let mut installed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DnpmError::io(&self.root, e))?;
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| PackageId::new(name).ok())
            else {
                continue;
            };
            let path = self.compose_path(&id);
            if !path.is_file() {
                continue;
            }
            match ComposeEditor::read(&path) {
                Ok(editor) => installed.push(InstalledPackage::from_editor(id, &editor, path)),
                Err(e) => tracing::warn!(package = %id, error = %e, "skipping unreadable compose file"),
            }
        }
        installed.sort_by(|a, b| a.id.cmp(&b.id));
        tracing::debug!(count = installed.len(), "listed installed packages");
        Ok(installed)
    }

    /// Looks up one installed package.
    ///
    /// # Errors
    ///
    /// Returns an error if the compose file exists but cannot be read or
    /// parsed.
    pub fn get_by_id(&self, id: &PackageId) -> Result<Option<InstalledPackage>> {
        let path = self.compose_path(id);
        if !path.is_file() {
            return Ok(None);
        }
        let editor = ComposeEditor::read(&path)?;
        Ok(Some(InstalledPackage::from_editor(id.clone(), &editor, path)))
    }

    /// Acquires the exclusive write lock of a package.
    pub async fn lock(&self, id: &PackageId) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(id.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Writes a package's spec under its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the atomic write fails.
    pub async fn write_spec(&self, id: &PackageId, editor: &ComposeEditor) -> Result<()> {
        let _guard = self.lock(id).await;
        editor.write(&self.compose_path(id))
    }

    /// Reads, edits and writes back a package's spec as one locked step.
    /// The file is only written when `edit` reports a change.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec cannot be read, parsed or written.
    pub async fn update_spec<F>(&self, id: &PackageId, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut ComposeEditor) -> bool + Send,
    {
        let _guard = self.lock(id).await;
        let path = self.compose_path(id);
        let mut editor = ComposeEditor::read(&path)?;
        if !edit(&mut editor) {
            return Ok(false);
        }
        editor.write(&path)?;
        tracing::debug!(package = %id, "spec updated");
        Ok(true)
    }
}
