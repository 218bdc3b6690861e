//! Compose editor: parse, merge, edit and persist a container-group spec.
//!
//! The merge is what protects user customizations across updates. It
//! starts from the release template and, for every service the previous
//! on-disk spec also had, re-applies each environment variable, volume and
//! port whose current value is not recorded in the previous spec's
//! default-tracking marker.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dnpm_common::db::write_atomic;
use dnpm_common::error::{DnpmError, Result};

use crate::labels::{self, ReleaseLabels, ServiceDefaults};
use crate::settings::UserSettings;
use crate::spec::{ContainerGroupSpec, PortMapping, VolumeMount};

/// Editor over one container-group spec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposeEditor {
    spec: ContainerGroupSpec,
}

impl ComposeEditor {
    /// Wraps an existing spec.
    #[must_use]
    pub const fn new(spec: ContainerGroupSpec) -> Self {
        Self { spec }
    }

    /// Parses a compose document. `origin` only labels parse errors.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::ComposeParse` on malformed YAML or a document
    /// that does not match the compose schema.
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let spec = serde_yaml::from_str(text).map_err(|e| DnpmError::ComposeParse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self { spec })
    }

    /// Reads and parses a compose file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read and
    /// `DnpmError::ComposeParse` if it is malformed.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| DnpmError::io(path, e))?;
        Self::parse(&text, path)
    }

    /// Serializes the spec to YAML.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::ComposeParse` if the spec cannot be represented.
    pub fn output(&self) -> Result<String> {
        serde_yaml::to_string(&self.spec).map_err(|e| DnpmError::ComposeParse {
            path: PathBuf::new(),
            message: e.to_string(),
        })
    }

    /// Atomically writes the spec to `path`; on failure the previous file
    /// is untouched and no partial file is visible.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write(&self, path: &Path) -> Result<()> {
        let yaml = self.output()?;
        write_atomic(path, yaml.as_bytes())?;
        tracing::debug!(path = %path.display(), "compose file written");
        Ok(())
    }

    /// The wrapped spec.
    #[must_use]
    pub const fn spec(&self) -> &ContainerGroupSpec {
        &self.spec
    }

    /// Consumes the editor, returning the spec.
    #[must_use]
    pub fn into_spec(self) -> ContainerGroupSpec {
        self.spec
    }

    /// Merges a release template with the previously installed spec.
    ///
    /// Every service of the result carries a fresh default-tracking marker
    /// describing the template's values. A previous spec without a marker
    /// is treated as fully user-customized.
    #[must_use]
    pub fn merge(
        template: &ContainerGroupSpec,
        previous: Option<&ContainerGroupSpec>,
    ) -> ContainerGroupSpec {
        let mut merged = template.clone();

        for (name, service) in &mut merged.services {
            let template_defaults = ServiceDefaults {
                environment: service.environment.clone(),
                ports: service.ports.clone(),
                volumes: service.volumes.clone(),
            };

            if let Some(prev) = previous.and_then(|p| p.services.get(name)) {
                let prev_defaults = ServiceDefaults::read(&prev.labels);

                for (key, value) in &prev.environment {
                    let is_default = prev_defaults
                        .as_ref()
                        .is_some_and(|d| d.environment.get(key) == Some(value));
                    if !is_default {
                        let _ = service.environment.insert(key.clone(), value.clone());
                    }
                }

                // a mount the template stopped declaring may still hold data
                service.volumes = merge_keyed(
                    &service.volumes,
                    &prev.volumes,
                    prev_defaults.as_ref().map(|d| d.volumes.as_slice()),
                    true,
                    |v| VolumeMount::parse(v).target,
                );
                service.ports = merge_keyed(
                    &service.ports,
                    &prev.ports,
                    prev_defaults.as_ref().map(|d| d.ports.as_slice()),
                    false,
                    |p| PortMapping::parse(p).key(),
                );

                for (key, value) in &prev.labels {
                    if !labels::is_reserved(key) {
                        let _ = service
                            .labels
                            .entry(key.clone())
                            .or_insert_with(|| value.clone());
                    }
                }
            }

            template_defaults.write(&mut service.labels);
        }

        if let Some(prev) = previous {
            let referenced: Vec<String> = merged
                .services
                .values()
                .flat_map(|s| s.volumes.iter())
                .filter_map(|v| VolumeMount::parse(v).volume_name().map(ToString::to_string))
                .collect();
            for (name, def) in &prev.volumes {
                let keep_previous = match merged.volumes.get(name) {
                    Some(_) => def.bind_device().is_some(),
                    None => referenced.contains(name),
                };
                if keep_previous {
                    let _ = merged.volumes.insert(name.clone(), def.clone());
                }
            }
        }

        merged
    }

    /// Whether any service sets the environment variable `key`.
    #[must_use]
    pub fn references_env(&self, key: &str) -> bool {
        self.spec
            .services
            .values()
            .any(|s| s.environment.contains_key(key))
    }

    /// Substitutes `value` for every occurrence of the environment variable
    /// `key`. Where the old value was a template default, the marker is
    /// updated too so the variable stays system-owned. Returns whether any
    /// service changed.
    pub fn apply_global_env(&mut self, key: &str, value: &str) -> bool {
        let mut changed = false;
        for service in self.spec.services.values_mut() {
            let Some(current) = service.environment.get(key).cloned() else {
                continue;
            };
            if let Some(mut defaults) = ServiceDefaults::read(&service.labels) {
                if defaults.environment.get(key) == Some(&current) {
                    let _ = defaults.environment.insert(key.to_string(), value.to_string());
                    defaults.write(&mut service.labels);
                }
            }
            if current != value {
                let _ = service.environment.insert(key.to_string(), value.to_string());
                changed = true;
            }
        }
        changed
    }

    /// Settings of `package` as presented to the user.
    #[must_use]
    pub fn settings(&self, package: &str) -> UserSettings {
        UserSettings::from_spec(&self.spec, package)
    }

    /// Release labels of the primary service, if present.
    #[must_use]
    pub fn release_labels(&self, package: &str) -> Option<ReleaseLabels> {
        self.spec
            .primary_service(package)
            .and_then(|(_, s)| ReleaseLabels::read(&s.labels))
    }

    /// Stamps release labels on every service.
    pub fn set_release_labels(&mut self, release: &ReleaseLabels) {
        for service in self.spec.services.values_mut() {
            release.write(&mut service.labels);
        }
    }

    /// Environment of every service, keyed by service name.
    #[must_use]
    pub fn environments(&self) -> BTreeMap<&str, &BTreeMap<String, String>> {
        self.spec
            .services
            .iter()
            .map(|(name, s)| (name.as_str(), &s.environment))
            .collect()
    }
}

/// Ordered merge of template entries with previous user entries sharing
/// the same identity (container path, container port).
///
/// A previous default the template no longer declares is dropped unless
/// `keep_dropped_defaults` is set.
fn merge_keyed(
    template: &[String],
    previous: &[String],
    previous_defaults: Option<&[String]>,
    keep_dropped_defaults: bool,
    key: impl Fn(&str) -> String,
) -> Vec<String> {
    let mut result = template.to_vec();
    for entry in previous {
        let is_default = previous_defaults.is_some_and(|d| d.contains(entry));
        let entry_key = key(entry);
        match result.iter_mut().find(|t| key(t) == entry_key) {
            Some(_) if is_default => {}
            Some(slot) => slot.clone_from(entry),
            None if is_default && !keep_dropped_defaults => {}
            None => result.push(entry.clone()),
        }
    }
    result
}
