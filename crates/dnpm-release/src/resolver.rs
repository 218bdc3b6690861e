//! Compatibility of a release set with the host and installed packages.
//!
//! Conflicts are data: the report carries `isCompatible = false` and a
//! human-readable `error`. Only a dependency cycle is an error.

use std::collections::BTreeMap;

use dnpm_common::error::Result;
use dnpm_common::types::PackageId;
use dnpm_compose::InstalledPackage;
use serde::{Deserialize, Serialize};

use crate::fetcher::ReleaseSet;

/// Version movement of one package of the set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnpChange {
    /// Installed version; absent when the package is not installed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    /// Selector the package was requested with.
    pub to: String,
}

/// Outcome of resolving a release set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompatibilityReport {
    /// A release needs a newer host core.
    pub requires_core_update: bool,
    /// Traversal in progress; false on every returned report.
    pub resolving: bool,
    /// No conflict was found.
    pub is_compatible: bool,
    /// First conflict found, empty when compatible.
    pub error: String,
    /// Per-package version movement.
    pub dnps: BTreeMap<PackageId, DnpChange>,
}

/// Checks release sets against the host core version and installed state.
#[derive(Debug, Clone)]
pub struct DependencyResolver {
    core_version: semver::Version,
}

impl DependencyResolver {
    /// Creates a resolver for a host running `core_version`.
    #[must_use]
    pub const fn new(core_version: semver::Version) -> Self {
        Self { core_version }
    }

    /// Builds the compatibility report of `set`.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::CyclicDependency` if the set's edges form a cycle.
    pub fn resolve(&self, set: &ReleaseSet, installed: &[InstalledPackage]) -> Result<CompatibilityReport> {
        let mut report = CompatibilityReport {
            resolving: true,
            ..CompatibilityReport::default()
        };
        let order = set.install_order()?;

        for id in &order {
            let from = installed
                .iter()
                .find(|p| &p.id == id)
                .map(|p| p.version.clone())
                .filter(|v| !v.is_empty());
            let to = if id == &set.root {
                set.request.requested_version()
            } else {
                set.requested_as
                    .get(id)
                    .map(ToString::to_string)
                    .unwrap_or_default()
            };
            let _ = report.dnps.insert(id.clone(), DnpChange { from, to });
        }

        if let Some(conflict) = self.first_conflict(set, installed, &order, &mut report) {
            tracing::info!(request = %set.request, conflict = %conflict, "release set is incompatible");
            report.error = conflict;
        }

        report.resolving = false;
        report.is_compatible = report.error.is_empty();
        Ok(report)
    }

    fn first_conflict(
        &self,
        set: &ReleaseSet,
        installed: &[InstalledPackage],
        order: &[PackageId],
        report: &mut CompatibilityReport,
    ) -> Option<String> {
        for id in order {
            let Some(release) = set.releases.get(id) else {
                continue;
            };
            if let Some(requirements) = &release.manifest.requirements {
                if requirements.minimum_core_version > self.core_version {
                    report.requires_core_update = true;
                    return Some(format!(
                        "{id} requires core version {} or newer, host runs {}",
                        requirements.minimum_core_version, self.core_version
                    ));
                }
            }
        }

        for edge in &set.edges {
            let Some(release) = set.releases.get(&edge.dependency) else {
                return Some(format!(
                    "{} requires {}, which was not resolved",
                    edge.dependent, edge.dependency
                ));
            };
            if !edge.selector.matches(release.version(), release.origin.as_ref()) {
                return Some(format!(
                    "{} requires {}@{}, but version {} was resolved",
                    edge.dependent,
                    edge.dependency,
                    edge.selector,
                    release.version()
                ));
            }
        }

        for package in installed.iter().filter(|p| !set.releases.contains_key(&p.id)) {
            for (dependency, selector) in &package.dependencies {
                let Some(release) = set.releases.get(dependency) else {
                    continue;
                };
                if !selector.matches(release.version(), release.origin.as_ref()) {
                    return Some(format!(
                        "installed package {} requires {dependency}@{selector}, incompatible with version {}",
                        package.id,
                        release.version()
                    ));
                }
            }
        }

        None
    }
}
