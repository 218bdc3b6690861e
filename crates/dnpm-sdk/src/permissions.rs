//! Special permissions a release would be granted on install.

use dnpm_common::types::PackageId;
use dnpm_compose::ContainerGroupSpec;
use dnpm_compose::spec::VolumeMount;
use serde::{Deserialize, Serialize};

/// One elevated capability requested by a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecialPermission {
    /// Short title.
    pub name: String,
    /// What the permission allows.
    pub details: String,
    /// Service requesting it.
    pub service_name: String,
}

/// Lists the special permissions requested by `spec`.
///
/// `packages` are the ids known to the caller (the release set and the
/// installed packages) and are used to name the owner of external volumes.
#[must_use]
pub fn special_permissions<'a>(
    spec: &ContainerGroupSpec,
    packages: impl IntoIterator<Item = &'a PackageId> + Clone,
) -> Vec<SpecialPermission> {
    let mut permissions = Vec::new();
    for (service_name, service) in &spec.services {
        let grant = |name: &str, details: String| SpecialPermission {
            name: name.to_string(),
            details,
            service_name: service_name.clone(),
        };

        for entry in &service.volumes {
            let mount = VolumeMount::parse(entry);
            let Some(volume) = mount.volume_name() else {
                continue;
            };
            if !spec.volumes.get(volume).is_some_and(|v| v.is_external()) {
                continue;
            }
            let details = match volume_owner(volume, packages.clone()) {
                Some(owner) => format!("Allows to read and write to the volume {volume} of {owner}"),
                None => format!("Allows to read and write to the volume {volume}"),
            };
            permissions.push(grant("Access to package volume", details));
        }

        if service.privileged == Some(true) {
            permissions.push(grant(
                "Privileged access to the system host",
                "Allows to administrate the host machine, including its devices and kernel settings".into(),
            ));
        }
        if service.network_mode.as_deref() == Some("host") {
            permissions.push(grant(
                "Access to the host network",
                "Allows to use the host network stack and reach every host interface".into(),
            ));
        }
        for capability in &service.cap_add {
            permissions.push(grant(
                &format!("Privileged system capability {capability}"),
                format!("Grants the Linux capability {capability} to the container"),
            ));
        }
    }
    permissions
}

/// Owner of an external volume, matched by its `<volume prefix>_` naming.
fn volume_owner<'a>(volume: &str, packages: impl IntoIterator<Item = &'a PackageId>) -> Option<&'a PackageId> {
    packages.into_iter().find(|id| {
        volume
            .strip_prefix(&id.volume_prefix())
            .is_some_and(|rest| rest.starts_with('_'))
    })
}
