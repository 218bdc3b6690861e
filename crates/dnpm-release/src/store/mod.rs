//! Content store and registry seams.
//!
//! The content store resolves a hash to a document or a directory listing.
//! The registry maps a package name to its published versions. Both are
//! external collaborators; the fetcher bounds every call with the live
//! timeout, so implementations do not need their own.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use dnpm_common::error::Result;
use dnpm_common::types::{ContentHash, PackageId};
use serde::{Deserialize, Serialize};

/// What a content hash resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentNode {
    /// A single document.
    File(Vec<u8>),
    /// A directory of named entries.
    Directory(Vec<DirEntry>),
}

/// One entry of a content-store directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// File name inside the directory.
    pub name: String,
    /// Content hash of the entry.
    pub hash: ContentHash,
    /// Size in bytes.
    pub size: u64,
}

/// A version of a package as published in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedVersion {
    /// Semantic version.
    pub version: semver::Version,
    /// Release hash.
    pub hash: ContentHash,
}

/// Content-addressed storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Resolves a hash.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::NotFound` if the hash is unknown and
    /// `DnpmError::Store` for any other failure.
    async fn get(&self, hash: &ContentHash) -> Result<ContentNode>;
}

/// Name to version index.
#[async_trait]
pub trait ReleaseRegistry: Send + Sync {
    /// Lists the published versions of a package.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::NotFound` if the package is unknown.
    async fn versions(&self, id: &PackageId) -> Result<Vec<PublishedVersion>>;
}
