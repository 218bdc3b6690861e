//! Release manifest and the metadata derived from it.

use std::collections::BTreeMap;

use dnpm_common::types::{PackageId, VersionSelector};
use serde::{Deserialize, Serialize};

fn default_kind() -> String {
    "service".to_string()
}

/// Immutable descriptor of one release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Package id.
    pub name: PackageId,
    /// Semantic version of this release.
    pub version: semver::Version,
    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Package type (`service`, `dncore`, `library`).
    #[serde(default = "default_kind", rename = "type")]
    pub kind: String,
    /// Avatar content hash (`/ipfs/<cid>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Declared dependencies.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<PackageId, VersionSelector>,
    /// Host requirements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Requirements>,
    /// Image descriptor; present on manifest releases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageDescriptor>,
    /// Setup wizard embedded in the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_wizard: Option<SetupWizard>,
    /// Disclaimer embedded in the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disclaimer: Option<Disclaimer>,
}

/// Host requirements of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requirements {
    /// Minimum host core version.
    #[serde(alias = "minimumDappnodeVersion")]
    pub minimum_core_version: semver::Version,
}

/// Image and container defaults of a manifest release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageDescriptor {
    /// Content hash of the image archive.
    pub hash: String,
    /// Image archive size in bytes.
    pub size: u64,
    /// Archive path inside the release.
    pub path: String,
    /// Default environment, `KEY=VALUE`.
    pub environment: Vec<String>,
    /// Default volumes owned by the package.
    pub volumes: Vec<String>,
    /// Volumes owned by other packages.
    pub external_vol: Vec<String>,
    /// Default port publications.
    pub ports: Vec<String>,
    /// Restart policy.
    pub restart: Option<String>,
    /// Whether the container runs privileged.
    pub privileged: Option<bool>,
    /// Network mode.
    pub network_mode: Option<String>,
    /// Added Linux capabilities.
    pub cap_add: Vec<String>,
}

/// Ordered list of fields the user is asked to fill before installing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupWizard {
    /// Wizard format version.
    pub version: String,
    /// Fields in display order.
    pub fields: Vec<SetupWizardField>,
}

/// One setup wizard field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupWizardField {
    /// Field id.
    pub id: String,
    /// What the field writes to.
    pub target: SetupTarget,
    /// Display title.
    pub title: String,
    /// Display description.
    pub description: String,
}

/// Destination of a setup wizard field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupTarget {
    /// `environment` or another target kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Variable or target name.
    pub name: String,
}

/// Text the user must accept before installing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disclaimer {
    /// Disclaimer body.
    pub message: String,
}

/// The part of a manifest shown to the user as package metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseMetadata {
    /// Package id.
    pub name: PackageId,
    /// Semantic version.
    pub version: semver::Version,
    /// Short description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Package type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Declared dependencies.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<PackageId, VersionSelector>,
    /// Host requirements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements: Option<Requirements>,
    /// Disclaimer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disclaimer: Option<Disclaimer>,
}

impl Manifest {
    /// Metadata view; the image, avatar and setup wizard are excluded.
    #[must_use]
    pub fn metadata(&self) -> ReleaseMetadata {
        ReleaseMetadata {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            kind: self.kind.clone(),
            dependencies: self.dependencies.clone(),
            requirements: self.requirements.clone(),
            disclaimer: self.disclaimer.clone(),
        }
    }
}
