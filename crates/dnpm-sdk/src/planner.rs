//! Install planning: fetch, check, and preview a request.
//!
//! `plan` never writes. It merges every involved release against the
//! installed spec in memory only, so the settings it reports are the ones
//! an install would produce.

use std::collections::BTreeMap;
use std::sync::Arc;

use dnpm_common::config::ConfigStore;
use dnpm_common::error::{DnpmError, Result};
use dnpm_common::types::{PackageId, PackageRequest};
use dnpm_compose::{InstalledPackage, PackageRepository};
use dnpm_release::{DependencyResolver, ReleaseFetcher, ReleaseSet};

use crate::availability::{ResourceProbe, check_availability};
use crate::permissions::special_permissions;
use crate::plan::{RequestStatus, RequestedDnp};

/// Builds install plans.
#[derive(Clone)]
pub struct InstallPlanner {
    fetcher: ReleaseFetcher,
    resolver: DependencyResolver,
    repo: Arc<PackageRepository>,
    probe: Arc<dyn ResourceProbe>,
    config: Arc<ConfigStore>,
}

impl std::fmt::Debug for InstallPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallPlanner")
            .field("fetcher", &self.fetcher)
            .field("resolver", &self.resolver)
            .field("repo", &self.repo.root())
            .finish_non_exhaustive()
    }
}

impl InstallPlanner {
    /// Creates a planner checking against the configured core version.
    #[must_use]
    pub fn new(
        fetcher: ReleaseFetcher,
        repo: Arc<PackageRepository>,
        probe: Arc<dyn ResourceProbe>,
        config: Arc<ConfigStore>,
    ) -> Self {
        Self {
            resolver: DependencyResolver::new(config.config().core_version.clone()),
            fetcher,
            repo,
            probe,
            config,
        }
    }

    /// Plans the install of `request` (a package id, `id@range`, or a
    /// release hash).
    ///
    /// Incompatibility is not an error: the returned plan says why in
    /// `request.compatible`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` for a malformed request, `NotFound` or
    /// `FetchTimeout` if a release cannot be fetched, `CyclicDependency`
    /// for a dependency cycle, and an error if installed packages cannot
    /// be listed.
    pub async fn plan(&self, request: &str) -> Result<RequestedDnp> {
        let request = PackageRequest::parse(request)?;
        tracing::info!(request = %request, "planning install");

        let set = self.fetcher.resolve_all(&request).await?;
        let installed = self.repo.list_installed()?;
        let compatible = self.resolver.resolve(&set, &installed)?;
        self.assemble(&set, &installed, RequestStatus {
            available: self.availability(&set),
            compatible,
        })
    }

    fn assemble(
        &self,
        set: &ReleaseSet,
        installed: &[InstalledPackage],
        request: RequestStatus,
    ) -> Result<RequestedDnp> {
        let root = set.root_release().ok_or_else(|| DnpmError::NotFound {
            kind: "release",
            id: set.root.to_string(),
        })?;
        let installed_root = installed.iter().find(|p| p.id == root.id);
        let known: Vec<&PackageId> = set
            .releases
            .keys()
            .chain(installed.iter().map(|p| &p.id))
            .collect();

        let mut special = BTreeMap::new();
        let mut setup_wizard = BTreeMap::new();
        let mut settings = BTreeMap::new();
        for (id, release) in &set.releases {
            let previous = installed.iter().find(|p| &p.id == id).map(|p| &p.spec);
            let editor = release.compose_for_install(previous);
            let _ = settings.insert(id.clone(), editor.settings(id.as_str()));
            let _ = special.insert(
                id.clone(),
                special_permissions(editor.spec(), known.iter().copied()),
            );
            if let Some(wizard) = &release.setup_wizard {
                let _ = setup_wizard.insert(id.clone(), wizard.clone());
            }
        }

        let req_version = set.request.requested_version();
        let gateway = self.config.config().gateway_url.trim_end_matches('/');
        Ok(RequestedDnp {
            name: root.id.clone(),
            sem_version: root.version().clone(),
            origin: root.origin.clone(),
            avatar_url: root.avatar.as_ref().map(|hash| format!("{gateway}{hash}")),
            metadata: root.manifest.metadata(),
            special_permissions: special,
            setup_wizard,
            image_size: root.image.size,
            is_updated: installed_root.is_some_and(|p| p.version == req_version),
            is_installed: installed_root.is_some(),
            settings,
            req_version,
            request,
        })
    }

    fn availability(&self, set: &ReleaseSet) -> crate::availability::AvailabilityReport {
        let config = self.config.config();
        let image_size = set.releases.values().map(|r| r.image.size).sum();
        check_availability(
            self.probe.as_ref(),
            &config.data_dir,
            image_size,
            config.min_free_disk_bytes,
        )
    }
}
