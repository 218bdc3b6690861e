//! A fetched release: manifest plus the compose template derived from it.
//!
//! Releases come in two shapes. A **manifest release** is a single JSON
//! document whose image descriptor is turned into a one-service template.
//! A **directory release** ships its own compose document next to the
//! manifest, with optional wizard, disclaimer, avatar and image archive.

use std::collections::BTreeMap;
use std::path::Path;

use dnpm_common::constants::CONTAINER_NAME_PREFIX;
use dnpm_common::error::{DnpmError, Result};
use dnpm_common::types::{ContentHash, PackageId};
use dnpm_compose::labels::ReleaseLabels;
use dnpm_compose::spec::VolumeMount;
use dnpm_compose::{ComposeEditor, ContainerGroupSpec, ServiceSpec, VolumeDefinition};

use crate::manifest::{Disclaimer, Manifest, SetupWizard};
use crate::store::DirEntry;

/// How a release was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseShape {
    /// Single manifest document with an embedded image descriptor.
    Manifest,
    /// Content-addressed directory.
    Directory,
}

/// Image archive of a release.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    /// Content hash of the archive, when known.
    pub hash: Option<ContentHash>,
    /// Archive size in bytes.
    pub size: u64,
}

/// A fully fetched release.
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    /// Package id, as declared by the manifest.
    pub id: PackageId,
    /// Hash the release was fetched from.
    pub origin: Option<ContentHash>,
    /// Release manifest.
    pub manifest: Manifest,
    /// Default container-group specification.
    pub template: ContainerGroupSpec,
    /// Setup wizard, if any.
    pub setup_wizard: Option<SetupWizard>,
    /// Disclaimer, if any.
    pub disclaimer: Option<Disclaimer>,
    /// Image archive metadata.
    pub image: ImageMetadata,
    /// Avatar hash, if any.
    pub avatar: Option<ContentHash>,
    /// Publication shape.
    pub shape: ReleaseShape,
}

impl Release {
    /// Assembles a manifest release.
    #[must_use]
    pub fn from_manifest(manifest: Manifest, origin: Option<ContentHash>) -> Self {
        let template = template_from_manifest(&manifest);
        let image = manifest
            .image
            .as_ref()
            .map(|image| ImageMetadata {
                hash: ContentHash::parse(&image.hash).ok(),
                size: image.size,
            })
            .unwrap_or_default();
        Self {
            id: manifest.name.clone(),
            origin,
            avatar: manifest
                .avatar
                .as_deref()
                .and_then(|a| ContentHash::parse(a).ok()),
            setup_wizard: manifest.setup_wizard.clone(),
            disclaimer: manifest.disclaimer.clone(),
            template,
            image,
            manifest,
            shape: ReleaseShape::Manifest,
        }
    }

    /// Assembles a directory release from its fetched documents. Files in
    /// the directory take precedence over the same data embedded in the
    /// manifest.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::ComposeParse` if the compose document is malformed.
    pub fn from_directory(
        manifest: Manifest,
        origin: ContentHash,
        files: &ReleaseFiles,
        documents: DirectoryDocuments,
    ) -> Result<Self> {
        let template = match documents.compose {
            Some(text) => {
                let name = files
                    .compose
                    .as_ref()
                    .map_or("docker-compose.yml", |e| e.name.as_str());
                ComposeEditor::parse(&text, Path::new(name))?.into_spec()
            }
            None => template_from_manifest(&manifest),
        };
        let image = files.image.as_ref().map_or_else(
            || ImageMetadata {
                hash: None,
                size: manifest.image.as_ref().map_or(0, |i| i.size),
            },
            |entry| ImageMetadata {
                hash: Some(entry.hash.clone()),
                size: entry.size,
            },
        );
        Ok(Self {
            id: manifest.name.clone(),
            origin: Some(origin),
            avatar: files.avatar.as_ref().map(|e| e.hash.clone()).or_else(|| {
                manifest
                    .avatar
                    .as_deref()
                    .and_then(|a| ContentHash::parse(a).ok())
            }),
            setup_wizard: documents.setup_wizard.or_else(|| manifest.setup_wizard.clone()),
            disclaimer: documents
                .disclaimer
                .map(|message| Disclaimer { message })
                .or_else(|| manifest.disclaimer.clone()),
            template,
            image,
            manifest,
            shape: ReleaseShape::Directory,
        })
    }

    /// Semantic version of the release.
    #[must_use]
    pub const fn version(&self) -> &semver::Version {
        &self.manifest.version
    }

    /// Labels an install of this release writes onto its services.
    #[must_use]
    pub fn release_labels(&self) -> ReleaseLabels {
        ReleaseLabels {
            name: self.id.clone(),
            version: self.manifest.version.to_string(),
            origin: self.origin.clone(),
            dependencies: self.manifest.dependencies.clone(),
        }
    }

    /// The compose document an install of this release would write, merged
    /// against the previously installed spec.
    #[must_use]
    pub fn compose_for_install(&self, previous: Option<&ContainerGroupSpec>) -> ComposeEditor {
        let mut editor = ComposeEditor::new(ComposeEditor::merge(&self.template, previous));
        editor.set_release_labels(&self.release_labels());
        editor
    }
}

/// Text documents fetched from a directory release.
#[derive(Debug, Clone, Default)]
pub struct DirectoryDocuments {
    /// Compose document.
    pub compose: Option<String>,
    /// Parsed setup wizard.
    pub setup_wizard: Option<SetupWizard>,
    /// Disclaimer text.
    pub disclaimer: Option<String>,
}

/// The recognised entries of a release directory.
#[derive(Debug, Clone)]
pub struct ReleaseFiles {
    /// Manifest document.
    pub manifest: DirEntry,
    /// Compose document.
    pub compose: Option<DirEntry>,
    /// `setup-wizard.json`.
    pub setup_wizard: Option<DirEntry>,
    /// `disclaimer.md`.
    pub disclaimer: Option<DirEntry>,
    /// `avatar.png`.
    pub avatar: Option<DirEntry>,
    /// Image archive.
    pub image: Option<DirEntry>,
}

impl ReleaseFiles {
    /// Sorts directory entries into release files; unknown entries are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::NotFound` if the directory holds no manifest.
    pub fn classify(dir: &ContentHash, entries: &[DirEntry]) -> Result<Self> {
        let find = |pred: &dyn Fn(&str) -> bool| entries.iter().find(|e| pred(&e.name)).cloned();
        let manifest = find(&|n| n == "dappnode_package.json")
            .or_else(|| find(&|n| n.ends_with("_package.json")))
            .or_else(|| find(&|n| n == "manifest.json"))
            .ok_or_else(|| DnpmError::NotFound {
                kind: "manifest",
                id: dir.to_string(),
            })?;
        Ok(Self {
            manifest,
            compose: find(&|n| {
                matches!(n, "docker-compose.yml" | "docker-compose.yaml" | "compose.yml" | "compose.yaml")
            }),
            setup_wizard: find(&|n| n == "setup-wizard.json"),
            disclaimer: find(&|n| n == "disclaimer.md"),
            avatar: find(&|n| n == "avatar.png"),
            image: find(&|n| {
                Path::new(n)
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("tar") || ext.eq_ignore_ascii_case("xz"))
            }),
        })
    }
}

/// Builds the one-service template of a manifest release.
fn template_from_manifest(manifest: &Manifest) -> ContainerGroupSpec {
    let id = manifest.name.as_str();
    let image = manifest.image.clone().unwrap_or_default();

    let environment: BTreeMap<String, String> = image
        .environment
        .iter()
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .split_once('=')
                .map_or_else(|| (entry.clone(), String::new()), |(k, v)| (k.to_string(), v.to_string()))
        })
        .collect();

    let mut volumes = BTreeMap::new();
    for entry in &image.volumes {
        if let Some(name) = VolumeMount::parse(entry).volume_name() {
            let _ = volumes.insert(name.to_string(), VolumeDefinition::default());
        }
    }
    for entry in &image.external_vol {
        if let Some(name) = VolumeMount::parse(entry).volume_name() {
            let _ = volumes.insert(name.to_string(), VolumeDefinition::external());
        }
    }

    let service = ServiceSpec {
        container_name: Some(format!("{CONTAINER_NAME_PREFIX}{id}")),
        image: format!("{id}:{}", manifest.version),
        environment,
        volumes: image
            .volumes
            .iter()
            .chain(&image.external_vol)
            .cloned()
            .collect(),
        ports: image.ports.clone(),
        restart: image.restart.clone().or_else(|| Some("always".to_string())),
        privileged: image.privileged,
        network_mode: image.network_mode.clone(),
        cap_add: image.cap_add.clone(),
        ..ServiceSpec::default()
    };

    ContainerGroupSpec {
        services: BTreeMap::from([(id.to_string(), service)]),
        volumes,
        ..ContainerGroupSpec::default()
    }
}
