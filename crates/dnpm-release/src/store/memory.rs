//! In-process content store and registry.
//!
//! Hashes are derived from content with SHA-256, so identical documents
//! share a hash exactly like in a real content-addressed store. Used for
//! offline operation and as the store behind the test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use dnpm_common::error::{DnpmError, Result};
use dnpm_common::types::{ContentHash, PackageId};
use sha2::{Digest, Sha256};

use super::{ContentNode, ContentStore, DirEntry, PublishedVersion, ReleaseRegistry};

/// Content store and registry held in memory.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    nodes: RwLock<HashMap<ContentHash, ContentNode>>,
    published: RwLock<HashMap<PackageId, Vec<PublishedVersion>>>,
    latency: RwLock<Option<Duration>>,
    gets: AtomicUsize,
}

impl MemoryContentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every `get` by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    /// Number of `get` calls served so far.
    #[must_use]
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::Relaxed)
    }

    /// Stores a document and returns its hash.
    pub fn add_file(&self, contents: impl Into<Vec<u8>>) -> ContentHash {
        let contents = contents.into();
        let hash = hash_of(&contents);
        let _ = self
            .nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hash.clone(), ContentNode::File(contents));
        hash
    }

    /// Stores every file and a directory listing them; returns the
    /// directory hash.
    pub fn add_directory<N, C>(&self, files: impl IntoIterator<Item = (N, C)>) -> ContentHash
    where
        N: Into<String>,
        C: Into<Vec<u8>>,
    {
        let mut entries = Vec::new();
        let mut digest_input = Vec::new();
        for (name, contents) in files {
            let name = name.into();
            let contents = contents.into();
            let size = contents.len() as u64;
            let hash = self.add_file(contents);
            digest_input.extend_from_slice(name.as_bytes());
            digest_input.extend_from_slice(hash.cid().as_bytes());
            entries.push(DirEntry { name, hash, size });
        }
        let hash = hash_of(&digest_input);
        let _ = self
            .nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hash.clone(), ContentNode::Directory(entries));
        hash
    }

    /// Registers `hash` as `version` of package `id`.
    pub fn publish(&self, id: &PackageId, version: semver::Version, hash: ContentHash) {
        self.published
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default()
            .push(PublishedVersion { version, hash });
    }
}

fn hash_of(contents: &[u8]) -> ContentHash {
    let digest = Sha256::digest(contents);
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    ContentHash::parse(&format!("bafk{hex}")).unwrap_or_else(|_| unreachable!("hex digest is alphanumeric"))
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn get(&self, hash: &ContentHash) -> Result<ContentNode> {
        let _ = self.gets.fetch_add(1, Ordering::Relaxed);
        let latency = *self.latency.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hash)
            .cloned()
            .ok_or_else(|| DnpmError::NotFound {
                kind: "content",
                id: hash.to_string(),
            })
    }
}

#[async_trait]
impl ReleaseRegistry for MemoryContentStore {
    async fn versions(&self, id: &PackageId) -> Result<Vec<PublishedVersion>> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| DnpmError::NotFound {
                kind: "package",
                id: id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_content_shares_hash() {
        let store = MemoryContentStore::new();
        let a = store.add_file("hello");
        let b = store.add_file("hello");
        assert_eq!(a, b);
        assert!(ContentHash::looks_like_hash(&a.to_string()));
        assert_eq!(store.get(&a).await.unwrap(), ContentNode::File(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn directory_lists_entries_with_sizes() {
        let store = MemoryContentStore::new();
        let dir = store.add_directory([("a.txt", "abc"), ("b.txt", "de")]);
        let ContentNode::Directory(entries) = store.get(&dir).await.unwrap() else {
            panic!("expected a directory");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].size, 3);
    }

    #[tokio::test]
    async fn unknown_hash_and_package_are_not_found() {
        let store = MemoryContentStore::new();
        let missing = ContentHash::parse("bafkmissing").unwrap();
        assert!(matches!(
            store.get(&missing).await,
            Err(DnpmError::NotFound { .. })
        ));
        let id = PackageId::new("x.dnp.dappnode.eth").unwrap();
        assert!(matches!(
            store.versions(&id).await,
            Err(DnpmError::NotFound { .. })
        ));
    }
}
