//! Reserved label namespace.
//!
//! Two groups of labels live under `dappnode.dnp.`:
//! - the **default-tracking marker**: for each service, the environment,
//!   ports and volumes that were assigned by the release template. Any
//!   current value not found here was set by the user.
//! - the **release labels**: identity of the installed release (name,
//!   version, origin hash, declared dependencies).

use std::collections::BTreeMap;

use dnpm_common::types::{ContentHash, PackageId, VersionSelector};

/// Prefix of every label dnpm owns.
pub const LABEL_NAMESPACE: &str = "dappnode.dnp.";
/// Template default environment, JSON array of `KEY=VALUE`.
pub const DEFAULT_ENVIRONMENT: &str = "dappnode.dnp.default.environment";
/// Template default ports, JSON array.
pub const DEFAULT_PORTS: &str = "dappnode.dnp.default.ports";
/// Template default volumes, JSON array.
pub const DEFAULT_VOLUMES: &str = "dappnode.dnp.default.volumes";
/// Installed package name.
pub const DNP_NAME: &str = "dappnode.dnp.dnpName";
/// Installed semantic version.
pub const VERSION: &str = "dappnode.dnp.version";
/// Content hash the installed release was fetched from.
pub const ORIGIN: &str = "dappnode.dnp.origin";
/// Declared dependencies, JSON object of id to selector.
pub const DEPENDENCIES: &str = "dappnode.dnp.dependencies";

/// Whether a label key belongs to the reserved namespace.
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    key.starts_with(LABEL_NAMESPACE)
}

/// Values a release template assigned to one service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDefaults {
    /// Default environment.
    pub environment: BTreeMap<String, String>,
    /// Default port entries, verbatim.
    pub ports: Vec<String>,
    /// Default volume entries, verbatim.
    pub volumes: Vec<String>,
}

impl ServiceDefaults {
    /// Reads the marker from a service's labels. Returns `None` when the
    /// service carries no marker at all.
    #[must_use]
    pub fn read(labels: &BTreeMap<String, String>) -> Option<Self> {
        let env = labels.get(DEFAULT_ENVIRONMENT);
        let ports = labels.get(DEFAULT_PORTS);
        let volumes = labels.get(DEFAULT_VOLUMES);
        if env.is_none() && ports.is_none() && volumes.is_none() {
            return None;
        }
        let environment = parse_list(env)
            .into_iter()
            .map(|entry| {
                let (k, v) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
                (k.to_string(), v.to_string())
            })
            .collect();
        Some(Self {
            environment,
            ports: parse_list(ports),
            volumes: parse_list(volumes),
        })
    }

    /// Writes the marker into a service's labels, replacing any previous one.
    pub fn write(&self, labels: &mut BTreeMap<String, String>) {
        let env: Vec<String> = self
            .environment
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let _ = labels.insert(DEFAULT_ENVIRONMENT.into(), to_json(&env));
        let _ = labels.insert(DEFAULT_PORTS.into(), to_json(&self.ports));
        let _ = labels.insert(DEFAULT_VOLUMES.into(), to_json(&self.volumes));
    }
}

fn parse_list(raw: Option<&String>) -> Vec<String> {
    raw.and_then(|s| match serde_json::from_str::<Vec<String>>(s) {
        Ok(list) => Some(list),
        Err(e) => {
            tracing::warn!(label = %s, error = %e, "ignoring malformed default label");
            None
        }
    })
    .unwrap_or_default()
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".into())
}

/// Identity of an installed release, stored on its services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseLabels {
    /// Package id.
    pub name: PackageId,
    /// Installed version.
    pub version: String,
    /// Release hash, when installed from one.
    pub origin: Option<ContentHash>,
    /// Declared dependencies.
    pub dependencies: BTreeMap<PackageId, VersionSelector>,
}

impl ReleaseLabels {
    /// Reads release labels; `None` if the name or version label is missing.
    #[must_use]
    pub fn read(labels: &BTreeMap<String, String>) -> Option<Self> {
        let name = PackageId::new(labels.get(DNP_NAME)?.as_str()).ok()?;
        let version = labels.get(VERSION)?.clone();
        let origin = labels
            .get(ORIGIN)
            .filter(|o| !o.is_empty())
            .and_then(|o| ContentHash::parse(o).ok());
        let dependencies = labels
            .get(DEPENDENCIES)
            .and_then(|raw| serde_json::from_str::<BTreeMap<String, String>>(raw).ok())
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(id, sel)| match (PackageId::new(id.as_str()), VersionSelector::parse(&sel)) {
                (Ok(id), Ok(sel)) => Some((id, sel)),
                _ => {
                    tracing::warn!(dependency = %id, selector = %sel, "ignoring malformed dependency label");
                    None
                }
            })
            .collect();
        Some(Self {
            name,
            version,
            origin,
            dependencies,
        })
    }

    /// Writes release labels.
    pub fn write(&self, labels: &mut BTreeMap<String, String>) {
        let deps: BTreeMap<String, String> = self
            .dependencies
            .iter()
            .map(|(id, sel)| (id.to_string(), sel.to_string()))
            .collect();
        let _ = labels.insert(DNP_NAME.into(), self.name.to_string());
        let _ = labels.insert(VERSION.into(), self.version.clone());
        let _ = labels.insert(
            ORIGIN.into(),
            self.origin.as_ref().map(ToString::to_string).unwrap_or_default(),
        );
        let _ = labels.insert(DEPENDENCIES.into(), to_json(&deps));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_roundtrip_through_labels() {
        let defaults = ServiceDefaults {
            environment: BTreeMap::from([("A".to_string(), "1".to_string())]),
            ports: vec!["1111:1111".into()],
            volumes: vec!["data0:/usr0".into(), "data1:/usr1".into()],
        };
        let mut labels = BTreeMap::new();
        defaults.write(&mut labels);
        assert_eq!(labels[DEFAULT_ENVIRONMENT], r#"["A=1"]"#);
        assert_eq!(ServiceDefaults::read(&labels), Some(defaults));
    }

    #[test]
    fn missing_marker_reads_as_none() {
        let labels = BTreeMap::from([("user.label".to_string(), "x".to_string())]);
        assert_eq!(ServiceDefaults::read(&labels), None);
    }

    #[test]
    fn release_labels_roundtrip() {
        let release = ReleaseLabels {
            name: PackageId::new("main.dnp.dappnode.eth").unwrap(),
            version: "0.1.0".into(),
            origin: None,
            dependencies: BTreeMap::from([(
                PackageId::new("dependency.dnp.dappnode.eth").unwrap(),
                VersionSelector::parse("^0.1.0").unwrap(),
            )]),
        };
        let mut labels = BTreeMap::new();
        release.write(&mut labels);
        assert_eq!(ReleaseLabels::read(&labels), Some(release));
    }

    #[test]
    fn reserved_namespace() {
        assert!(is_reserved(VERSION));
        assert!(!is_reserved("traefik.enable"));
    }
}
