//! The install plan returned to callers.

use std::collections::BTreeMap;

use dnpm_common::types::{ContentHash, PackageId};
use dnpm_compose::UserSettings;
use dnpm_release::resolver::CompatibilityReport;
use dnpm_release::{ReleaseMetadata, SetupWizard};
use serde::{Deserialize, Serialize};

use crate::availability::AvailabilityReport;
use crate::permissions::SpecialPermission;

/// Advisory plan for installing one request and its dependencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestedDnp {
    /// Package id of the requested release.
    pub name: PackageId,
    /// Version selector or hash the request was made with.
    pub req_version: String,
    /// Semantic version of the resolved release.
    pub sem_version: semver::Version,
    /// Release hash, when resolved from the content store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<ContentHash>,
    /// Gateway URL of the avatar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Manifest metadata of the requested release.
    pub metadata: ReleaseMetadata,
    /// Permissions each involved package would be granted.
    pub special_permissions: BTreeMap<PackageId, Vec<SpecialPermission>>,
    /// Setup wizards of involved packages that declare one.
    pub setup_wizard: BTreeMap<PackageId, SetupWizard>,
    /// Size of the requested release's image.
    pub image_size: u64,
    /// Whether the requested version is the one already installed.
    pub is_updated: bool,
    /// Whether the package is installed at any version.
    pub is_installed: bool,
    /// Settings each involved package would have after install.
    pub settings: BTreeMap<PackageId, UserSettings>,
    /// Compatibility and availability of the request.
    pub request: RequestStatus,
}

/// Whether the request can go ahead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStatus {
    /// Dependency and core version compatibility.
    pub compatible: CompatibilityReport,
    /// Host resource headroom.
    pub available: AvailabilityReport,
}
