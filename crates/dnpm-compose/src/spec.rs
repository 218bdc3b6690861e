//! Serde model of a compose document.
//!
//! Only the fields dnpm reasons about are typed; everything else is kept
//! in `extra` maps so a read/write cycle never loses user configuration.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Compose file format version written for generated specs.
pub const DEFAULT_COMPOSE_VERSION: &str = "3.5";

fn default_version() -> String {
    DEFAULT_COMPOSE_VERSION.to_string()
}

/// A package's container-group specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerGroupSpec {
    /// Compose file format version.
    #[serde(default = "default_version", deserialize_with = "scalar_string")]
    pub version: String,
    /// Services keyed by service name.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
    /// Top-level named volume definitions.
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "volume_definitions"
    )]
    pub volumes: BTreeMap<String, VolumeDefinition>,
    /// Keys not modelled above (networks, secrets, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Default for ContainerGroupSpec {
    fn default() -> Self {
        Self {
            version: default_version(),
            services: BTreeMap::new(),
            volumes: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl ContainerGroupSpec {
    /// Returns the service named after the package, or the first service.
    #[must_use]
    pub fn primary_service(&self, package: &str) -> Option<(&String, &ServiceSpec)> {
        self.services
            .get_key_value(package)
            .or_else(|| self.services.iter().next())
    }
}

/// One service of a compose document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Explicit container name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Image reference.
    #[serde(default)]
    pub image: String,
    /// Environment variables.
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "string_map"
    )]
    pub environment: BTreeMap<String, String>,
    /// Volume mounts, `source:target[:mode]` or `target`.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "string_list"
    )]
    pub volumes: Vec<String>,
    /// Port publications, `[ip:][host:]container[/protocol]`.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "string_list"
    )]
    pub ports: Vec<String>,
    /// Container labels.
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "string_map"
    )]
    pub labels: BTreeMap<String, String>,
    /// Whether the container runs privileged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privileged: Option<bool>,
    /// Network mode (`host`, `bridge`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    /// Added Linux capabilities.
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "string_list"
    )]
    pub cap_add: Vec<String>,
    /// Restart policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

/// A top-level named volume definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeDefinition {
    /// Volume driver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Driver options; a bind-backed volume carries `o: bind` and `device`.
    #[serde(
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "string_map"
    )]
    pub driver_opts: BTreeMap<String, String>,
    /// `true` or `{name: ...}` when the volume is owned elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<serde_yaml::Value>,
    /// Explicit volume name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Keys not modelled above.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl VolumeDefinition {
    /// Definition of a volume created and owned by another package.
    #[must_use]
    pub fn external() -> Self {
        Self {
            external: Some(serde_yaml::Value::Bool(true)),
            ..Self::default()
        }
    }

    /// Returns the host device when the volume is bind-backed.
    #[must_use]
    pub fn bind_device(&self) -> Option<&str> {
        let is_bind = self
            .driver_opts
            .get("o")
            .is_some_and(|o| o.split(',').any(|opt| opt.trim() == "bind"));
        if is_bind {
            self.driver_opts.get("device").map(String::as_str)
        } else {
            None
        }
    }

    /// Whether the volume is declared external.
    #[must_use]
    pub fn is_external(&self) -> bool {
        match &self.external {
            None | Some(serde_yaml::Value::Bool(false) | serde_yaml::Value::Null) => false,
            Some(_) => true,
        }
    }
}

/// A parsed service volume entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Named volume or host path; `None` for anonymous volumes.
    pub source: Option<String>,
    /// Path inside the container.
    pub target: String,
    /// Mount mode (`ro`, `rw`, ...).
    pub mode: Option<String>,
}

impl VolumeMount {
    /// Parses `source:target[:mode]` or a bare `target`.
    #[must_use]
    pub fn parse(entry: &str) -> Self {
        let mut parts = entry.splitn(3, ':');
        let first = parts.next().unwrap_or_default().to_string();
        match (parts.next(), parts.next()) {
            (Some(target), mode) => Self {
                source: Some(first),
                target: target.to_string(),
                mode: mode.map(ToString::to_string),
            },
            (None, _) => Self {
                source: None,
                target: first,
                mode: None,
            },
        }
    }

    /// Whether the source is a host path rather than a named volume.
    #[must_use]
    pub fn is_bind(&self) -> bool {
        self.source
            .as_deref()
            .is_some_and(|s| s.starts_with('/') || s.starts_with('.') || s.starts_with('~'))
    }

    /// Name of the named volume, if the source is one.
    #[must_use]
    pub fn volume_name(&self) -> Option<&str> {
        if self.is_bind() {
            None
        } else {
            self.source.as_deref()
        }
    }
}

impl fmt::Display for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "{source}:")?;
        }
        f.write_str(&self.target)?;
        if let Some(mode) = &self.mode {
            write!(f, ":{mode}")?;
        }
        Ok(())
    }
}

/// A parsed service port entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    /// Published host port; `None` when the port is not published.
    pub host: Option<String>,
    /// Container port.
    pub container: String,
    /// Upper-cased protocol, `TCP` unless stated.
    pub protocol: String,
}

impl PortMapping {
    /// Parses `[ip:][host:]container[/protocol]`.
    #[must_use]
    pub fn parse(entry: &str) -> Self {
        let (ports, protocol) = entry
            .split_once('/')
            .map_or((entry, "tcp"), |(p, proto)| (p, proto));
        let parts: Vec<&str> = ports.split(':').collect();
        let (host, container) = match parts.as_slice() {
            [container] => (None, (*container).to_string()),
            [host, container] => (Some((*host).to_string()), (*container).to_string()),
            [.., host, container] => (Some((*host).to_string()), (*container).to_string()),
            [] => (None, String::new()),
        };
        Self {
            host: host.filter(|h| !h.is_empty()),
            container,
            protocol: protocol.to_uppercase(),
        }
    }

    /// `<containerPort>/<PROTOCOL>`, the identity of a port entry.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.container, self.protocol)
    }
}

fn scalar_to_string(value: serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => Some(String::new()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s),
        _ => None,
    }
}

fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_yaml::Value::deserialize(deserializer)?;
    scalar_to_string(value).ok_or_else(|| serde::de::Error::custom("expected a scalar"))
}

/// Accepts both the mapping form and the `KEY=VALUE` list form.
fn string_map<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error> {
    let value = serde_yaml::Value::deserialize(deserializer)?;
    let mut out = BTreeMap::new();
    match value {
        serde_yaml::Value::Null => {}
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                let key = scalar_to_string(k)
                    .ok_or_else(|| serde::de::Error::custom("mapping keys must be scalars"))?;
                let value = scalar_to_string(v)
                    .ok_or_else(|| serde::de::Error::custom(format!("value of {key} must be a scalar")))?;
                let _ = out.insert(key, value);
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                let item = scalar_to_string(item)
                    .ok_or_else(|| serde::de::Error::custom("list entries must be scalars"))?;
                let (k, v) = item.split_once('=').unwrap_or((item.as_str(), ""));
                let _ = out.insert(k.to_string(), v.to_string());
            }
        }
        _ => return Err(serde::de::Error::custom("expected a mapping or a list")),
    }
    Ok(out)
}

fn string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let value = serde_yaml::Value::deserialize(deserializer)?;
    match value {
        serde_yaml::Value::Null => Ok(Vec::new()),
        serde_yaml::Value::Sequence(seq) => seq
            .into_iter()
            .map(|item| {
                scalar_to_string(item)
                    .ok_or_else(|| serde::de::Error::custom("list entries must be scalars"))
            })
            .collect(),
        _ => Err(serde::de::Error::custom("expected a list")),
    }
}

/// Accepts `name:` (null) as an empty definition.
fn volume_definitions<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<BTreeMap<String, VolumeDefinition>, D::Error> {
    let raw: Option<BTreeMap<String, Option<VolumeDefinition>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(name, def)| (name, def.unwrap_or_default()))
        .collect())
}
