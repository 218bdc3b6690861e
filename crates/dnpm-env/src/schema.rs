//! Recognised global environment keys and their value types.

use std::fmt;

use dnpm_common::constants::GLOBAL_ENVS_PREFIX;
use dnpm_common::error::{DnpmError, Result};
use serde::{Deserialize, Serialize};

/// Type of a recognised key's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Free text.
    Text,
    /// `true` / `false`.
    Flag,
}

/// Recognised keys, without prefix.
pub const KNOWN_KEYS: &[(&str, ValueKind)] = &[
    ("ACTIVE", ValueKind::Text),
    ("INTERNAL_IP", ValueKind::Text),
    ("STATIC_IP", ValueKind::Text),
    ("HOSTNAME", ValueKind::Text),
    ("DOMAIN", ValueKind::Text),
    ("PUBKEY", ValueKind::Text),
    ("ADDRESS", ValueKind::Text),
    ("PUBLIC_IP", ValueKind::Text),
    ("SERVER_NAME", ValueKind::Text),
    ("UPNP_AVAILABLE", ValueKind::Flag),
    ("NO_NAT_LOOPBACK", ValueKind::Flag),
];

/// A global environment value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GlobalEnvValue {
    /// Boolean value.
    Flag(bool),
    /// Text value.
    Text(String),
}

impl GlobalEnvValue {
    /// Parses command-line text for `key`: recognised boolean keys accept
    /// `true`/`false`, everything else is kept as text.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::InvalidRequest` if a boolean key gets anything
    /// but `true` or `false`.
    pub fn parse_for(key: &str, raw: &str) -> Result<Self> {
        match kind_of(key) {
            Some(ValueKind::Flag) => raw
                .parse::<bool>()
                .map(Self::Flag)
                .map_err(|_| DnpmError::InvalidRequest {
                    message: format!("{} expects true or false, got \"{raw}\"", prefixed(key)),
                }),
            _ => Ok(Self::Text(raw.to_string())),
        }
    }

    const fn kind(&self) -> ValueKind {
        match self {
            Self::Flag(_) => ValueKind::Flag,
            Self::Text(_) => ValueKind::Text,
        }
    }
}

impl fmt::Display for GlobalEnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag(b) => write!(f, "{b}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Prepends the mandatory prefix unless already present.
#[must_use]
pub fn prefixed(key: &str) -> String {
    if key.starts_with(GLOBAL_ENVS_PREFIX) {
        key.to_string()
    } else {
        format!("{GLOBAL_ENVS_PREFIX}{key}")
    }
}

/// Key without the prefix.
#[must_use]
pub fn unprefixed(key: &str) -> &str {
    key.strip_prefix(GLOBAL_ENVS_PREFIX).unwrap_or(key)
}

/// Declared type of a key, `None` for unrecognised keys.
#[must_use]
pub fn kind_of(key: &str) -> Option<ValueKind> {
    let bare = unprefixed(key);
    KNOWN_KEYS
        .iter()
        .find(|(known, _)| *known == bare)
        .map(|(_, kind)| *kind)
}

/// Normalizes and checks a key/value pair. Unrecognised keys pass with any
/// value type.
///
/// # Errors
///
/// Returns `DnpmError::InvalidRequest` for an empty key or a value whose
/// type does not match a recognised key.
pub fn validate(key: &str, value: &GlobalEnvValue) -> Result<String> {
    let key = key.trim();
    if unprefixed(key).is_empty() {
        return Err(DnpmError::InvalidRequest {
            message: "global env key must not be empty".into(),
        });
    }
    if key.contains(['=', '\n']) {
        return Err(DnpmError::InvalidRequest {
            message: format!("invalid global env key \"{key}\""),
        });
    }
    if let Some(expected) = kind_of(key) {
        if expected != value.kind() {
            return Err(DnpmError::InvalidRequest {
                message: format!("{} expects a {expected:?} value, got \"{value}\"", prefixed(key)),
            });
        }
    }
    Ok(prefixed(key))
}
