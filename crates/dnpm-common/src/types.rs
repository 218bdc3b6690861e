//! Domain primitive types used across the dnpm workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DnpmError, Result};

/// Unique, version-independent identifier of a node package
/// (e.g. `bitcoin.dnp.dappnode.eth`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageId(String);

impl PackageId {
    /// Creates a package id, rejecting empty or malformed values.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::InvalidRequest` if the id is empty or contains
    /// whitespace, `@` or `/`.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() || id.chars().any(|c| c.is_whitespace() || c == '@' || c == '/') {
            return Err(DnpmError::InvalidRequest {
                message: format!("invalid package id: \"{id}\""),
            });
        }
        Ok(Self(id))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the id with every non-alphanumeric character removed.
    ///
    /// This is the prefix compose uses for the named volumes a package
    /// owns (`dependencydnpdappnodeeth_data`).
    #[must_use]
    pub fn volume_prefix(&self) -> String {
        self.0.chars().filter(char::is_ascii_alphanumeric).collect()
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PackageId {
    type Error = DnpmError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<PackageId> for String {
    fn from(id: PackageId) -> Self {
        id.0
    }
}

impl FromStr for PackageId {
    type Err = DnpmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Content identifier of a document or directory in the content store.
///
/// Stored without the `/ipfs/` prefix; displayed with it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Parses `/ipfs/<cid>`, `ipfs/<cid>` or a bare `<cid>`.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::InvalidRequest` if the identifier is empty or
    /// contains characters other than ASCII alphanumerics.
    pub fn parse(value: &str) -> Result<Self> {
        let cid = value
            .trim()
            .trim_start_matches('/')
            .trim_start_matches("ipfs/")
            .trim_end_matches('/');
        if cid.is_empty() || !cid.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DnpmError::InvalidRequest {
                message: format!("invalid content hash: \"{value}\""),
            });
        }
        Ok(Self(cid.to_string()))
    }

    /// Returns true if `value` looks like a content hash rather than a name
    /// or version range.
    #[must_use]
    pub fn looks_like_hash(value: &str) -> bool {
        let value = value.trim();
        if value.starts_with("/ipfs/") || value.starts_with("ipfs/") {
            return true;
        }
        let alnum = !value.is_empty() && value.chars().all(|c| c.is_ascii_alphanumeric());
        alnum && ((value.starts_with("Qm") && value.len() == 46) || (value.starts_with("baf") && value.len() >= 50))
    }

    /// Returns the bare content identifier.
    #[must_use]
    pub fn cid(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/ipfs/{}", self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DnpmError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_string()
    }
}

/// How a dependency or request pins the version it wants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VersionSelector {
    /// An exact release, addressed by content hash.
    Hash(ContentHash),
    /// A semantic-version range. A bare version (`0.1.0`) means exactly
    /// that version.
    Range {
        /// The text as written by the package author.
        raw: String,
        /// The parsed requirement.
        req: semver::VersionReq,
    },
    /// The newest published version.
    Latest,
}

impl VersionSelector {
    /// Parses a selector: `latest` (or empty), a content hash, or a range.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::InvalidRequest` if the text is neither a hash nor
    /// a valid semver range.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }
        if ContentHash::looks_like_hash(value) {
            return ContentHash::parse(value).map(Self::Hash);
        }
        let req = if let Ok(exact) = semver::Version::parse(value) {
            semver::VersionReq::parse(&format!("={exact}"))
        } else {
            semver::VersionReq::parse(value)
        }
        .map_err(|e| DnpmError::InvalidRequest {
            message: format!("invalid version selector \"{value}\": {e}"),
        })?;
        Ok(Self::Range {
            raw: value.to_string(),
            req,
        })
    }

    /// Returns true if a release with this version and origin satisfies the
    /// selector.
    #[must_use]
    pub fn matches(&self, version: &semver::Version, origin: Option<&ContentHash>) -> bool {
        match self {
            Self::Hash(hash) => origin == Some(hash),
            Self::Range { req, .. } => req.matches(version),
            Self::Latest => true,
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash(hash) => write!(f, "{hash}"),
            Self::Range { raw, .. } => f.write_str(raw),
            Self::Latest => f.write_str("latest"),
        }
    }
}

impl TryFrom<String> for VersionSelector {
    type Error = DnpmError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<VersionSelector> for String {
    fn from(selector: VersionSelector) -> Self {
        selector.to_string()
    }
}

/// A request for one package at some selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRequest {
    /// Requested package.
    pub id: PackageId,
    /// Requested version.
    pub selector: VersionSelector,
}

impl fmt::Display for VersionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.selector)
    }
}

/// A top-level install/inspect request as typed by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageRequest {
    /// A release addressed directly by content hash; the package id is
    /// only known once its manifest is fetched.
    ByHash(ContentHash),
    /// A package name with a selector (`name`, `name@^1.2.0`, `name@/ipfs/..`).
    ByName(VersionRequest),
}

impl PackageRequest {
    /// Parses a caller-supplied request string.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::InvalidRequest` for an empty request, a malformed
    /// id, or an unparseable selector.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(DnpmError::InvalidRequest {
                message: "a package id or release hash is required".into(),
            });
        }
        if ContentHash::looks_like_hash(value) {
            return ContentHash::parse(value).map(Self::ByHash);
        }
        let (name, selector) = value.split_once('@').unwrap_or((value, "latest"));
        Ok(Self::ByName(VersionRequest {
            id: PackageId::new(name)?,
            selector: VersionSelector::parse(selector)?,
        }))
    }

    /// The selector string this request was made with.
    #[must_use]
    pub fn requested_version(&self) -> String {
        match self {
            Self::ByHash(hash) => hash.to_string(),
            Self::ByName(req) => req.selector.to_string(),
        }
    }
}

impl fmt::Display for PackageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByHash(hash) => write!(f, "{hash}"),
            Self::ByName(req) => write!(f, "{req}"),
        }
    }
}
