//! User-facing view of a package's current settings.

use std::collections::BTreeMap;

use dnpm_common::constants::VOLUMES_DIR_SEGMENT;
use serde::{Deserialize, Serialize};

use crate::labels::ServiceDefaults;
use crate::spec::{ContainerGroupSpec, PortMapping, VolumeMount};

/// Settings of one package as shown to the user before an install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    /// Environment of the primary service.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    /// `<containerPort>/<PROTOCOL>` to published host port (`""` if none).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_mappings: BTreeMap<String, String>,
    /// Template named volume to host mountpoint (`""` for internal storage).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub named_volume_mountpoints: BTreeMap<String, String>,
    /// Mounts outside the template defaults, keyed by the template volume
    /// name at the same container path, else by their own volume name or
    /// container path. Values are host paths for binds, and the bind device
    /// or volume name for named volumes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub legacy_bind_volumes: BTreeMap<String, String>,
}

impl UserSettings {
    /// Computes the settings of `package` from a merged spec.
    #[must_use]
    pub fn from_spec(spec: &ContainerGroupSpec, package: &str) -> Self {
        let Some((_, service)) = spec.primary_service(package) else {
            return Self::default();
        };

        let port_mappings = service
            .ports
            .iter()
            .map(|entry| {
                let port = PortMapping::parse(entry);
                (port.key(), port.host.unwrap_or_default())
            })
            .collect();

        let defaults = ServiceDefaults::read(&service.labels);
        let default_volumes: Vec<VolumeMount> = defaults
            .as_ref()
            .map_or(&service.volumes, |d| &d.volumes)
            .iter()
            .map(|v| VolumeMount::parse(v))
            .collect();

        let mut named_volume_mountpoints = BTreeMap::new();
        for mount in &default_volumes {
            let Some(name) = mount.volume_name() else {
                continue;
            };
            let definition = spec.volumes.get(name);
            if definition.is_some_and(crate::spec::VolumeDefinition::is_external) {
                continue;
            }
            let mountpoint = definition
                .and_then(|d| d.bind_device())
                .map(mountpoint_of_device)
                .unwrap_or_default();
            let _ = named_volume_mountpoints.insert(name.to_string(), mountpoint);
        }

        let mut legacy_bind_volumes = BTreeMap::new();
        if let Some(defaults) = &defaults {
            for entry in &service.volumes {
                if defaults.volumes.contains(entry) {
                    continue;
                }
                let mount = VolumeMount::parse(entry);
                let key = default_volumes
                    .iter()
                    .find(|d| d.target == mount.target)
                    .and_then(VolumeMount::volume_name)
                    .or_else(|| mount.volume_name())
                    .map_or_else(|| mount.target.clone(), ToString::to_string);
                let source = match mount.volume_name() {
                    Some(name) => spec
                        .volumes
                        .get(name)
                        .and_then(|d| d.bind_device())
                        .unwrap_or(name)
                        .to_string(),
                    None => mount.source.clone().unwrap_or_default(),
                };
                let _ = legacy_bind_volumes.insert(key, source);
            }
        }

        Self {
            environment: service.environment.clone(),
            port_mappings,
            named_volume_mountpoints,
            legacy_bind_volumes,
        }
    }
}

/// Strips the `dappnode-volumes/<package>/<volume>` tail off a bind device
/// to recover the mountpoint the user picked.
#[must_use]
pub fn mountpoint_of_device(device: &str) -> String {
    let marker = format!("/{VOLUMES_DIR_SEGMENT}/");
    device
        .find(&marker)
        .map_or(device, |idx| &device[..idx])
        .to_string()
}
