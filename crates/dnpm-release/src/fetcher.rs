//! Release fetching and recursive dependency resolution.
//!
//! `resolve_all` walks the dependency tree frontier by frontier. Every
//! pending item carries the chain of packages that led to it, so a cycle
//! is caught on the path (before any call for the offending edge) while a
//! diamond is not. A package id is fetched once; further selectors for it
//! only become constraint edges, checked later by the resolver.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use dnpm_common::config::ConfigStore;
use dnpm_common::error::{DnpmError, Result};
use dnpm_common::types::{ContentHash, PackageId, PackageRequest, VersionRequest, VersionSelector};
use futures_util::future::try_join_all;

use crate::graph::DependencyGraph;
use crate::manifest::{Manifest, SetupWizard};
use crate::release::{DirectoryDocuments, Release, ReleaseFiles};
use crate::store::{ContentNode, ContentStore, DirEntry, ReleaseRegistry};

/// One "requires" relation found while fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    /// Package declaring the dependency.
    pub dependent: PackageId,
    /// Package depended on.
    pub dependency: PackageId,
    /// Selector the dependent declared.
    pub selector: VersionSelector,
}

/// Every release involved in a request, one per package id.
#[derive(Debug, Clone)]
pub struct ReleaseSet {
    /// Id of the requested package.
    pub root: PackageId,
    /// The request as made by the caller.
    pub request: PackageRequest,
    /// Fetched releases.
    pub releases: BTreeMap<PackageId, Release>,
    /// Selector each package was first requested with.
    pub requested_as: BTreeMap<PackageId, VersionSelector>,
    /// All dependency edges, including constraint-only ones.
    pub edges: Vec<DependencyEdge>,
}

impl ReleaseSet {
    /// Release of the requested package.
    #[must_use]
    pub fn root_release(&self) -> Option<&Release> {
        self.releases.get(&self.root)
    }

    /// Dependency graph over the set.
    #[must_use]
    pub fn graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for id in self.releases.keys() {
            let _ = graph.add_package(id);
        }
        for edge in &self.edges {
            graph.add_dependency(&edge.dependent, &edge.dependency, edge.selector.clone());
        }
        graph
    }

    /// Install order, dependencies first.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::CyclicDependency` if the edges form a cycle.
    pub fn install_order(&self) -> Result<Vec<PackageId>> {
        self.graph().resolve_order()
    }
}

/// A dependency waiting to be fetched, with the chain that reached it.
#[derive(Debug)]
struct Pending {
    dependent: PackageId,
    request: VersionRequest,
    path: Vec<PackageId>,
}

impl Pending {
    fn children(release: &Release, path: &[PackageId]) -> Vec<Self> {
        let mut path = path.to_vec();
        path.push(release.id.clone());
        release
            .manifest
            .dependencies
            .iter()
            .map(|(id, selector)| Self {
                dependent: release.id.clone(),
                request: VersionRequest {
                    id: id.clone(),
                    selector: selector.clone(),
                },
                path: path.clone(),
            })
            .collect()
    }
}

/// Fetches releases from a content store, resolving names through a
/// registry. Every external call is bounded by the live fetch timeout.
#[derive(Clone)]
pub struct ReleaseFetcher {
    store: Arc<dyn ContentStore>,
    registry: Arc<dyn ReleaseRegistry>,
    config: Arc<ConfigStore>,
}

impl std::fmt::Debug for ReleaseFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseFetcher")
            .field("fetch_timeout", &self.config.fetch_timeout())
            .finish_non_exhaustive()
    }
}

impl ReleaseFetcher {
    /// Creates a fetcher.
    #[must_use]
    pub fn new(
        store: Arc<dyn ContentStore>,
        registry: Arc<dyn ReleaseRegistry>,
        config: Arc<ConfigStore>,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    /// Resolves a single request, without its dependencies.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown name, version or hash,
    /// `FetchTimeout` if a call exceeds the timeout, and `Store` for an
    /// unusable release.
    pub async fn resolve(&self, request: &PackageRequest) -> Result<Release> {
        match request {
            PackageRequest::ByHash(hash) => self.fetch_release(hash).await,
            PackageRequest::ByName(request) => self.resolve_version(request).await,
        }
    }

    /// Resolves a request and, recursively, every declared dependency.
    ///
    /// # Errors
    ///
    /// Fails fast on the first fetch error, and with `CyclicDependency`
    /// if a package transitively depends on itself.
    pub async fn resolve_all(&self, request: &PackageRequest) -> Result<ReleaseSet> {
        let root = self.resolve(request).await?;
        let root_id = root.id.clone();
        let root_selector = match request {
            PackageRequest::ByHash(hash) => VersionSelector::Hash(hash.clone()),
            PackageRequest::ByName(request) => request.selector.clone(),
        };

        let mut visited = HashSet::from([(root_id.clone(), root_selector.clone())]);
        let mut requested_as = BTreeMap::from([(root_id.clone(), root_selector)]);
        let mut edges = Vec::new();
        let mut frontier = Pending::children(&root, &[]);
        let mut releases = BTreeMap::from([(root_id.clone(), root)]);

        while !frontier.is_empty() {
            let mut to_fetch = Vec::new();
            let mut scheduled = HashSet::new();
            for item in frontier {
                let id = &item.request.id;
                if let Some(pos) = item.path.iter().position(|p| p == id) {
                    let mut chain: Vec<String> = item.path[pos..].iter().map(ToString::to_string).collect();
                    chain.push(id.to_string());
                    return Err(DnpmError::CyclicDependency { chain });
                }
                edges.push(DependencyEdge {
                    dependent: item.dependent.clone(),
                    dependency: id.clone(),
                    selector: item.request.selector.clone(),
                });
                if !visited.insert((id.clone(), item.request.selector.clone())) {
                    continue;
                }
                if releases.contains_key(id) || scheduled.contains(id) {
                    tracing::debug!(package = %id, selector = %item.request.selector, "already resolved, recording constraint");
                    continue;
                }
                let _ = scheduled.insert(id.clone());
                let _ = requested_as.insert(id.clone(), item.request.selector.clone());
                to_fetch.push(item);
            }

            let fetched = try_join_all(to_fetch.iter().map(|item| self.resolve_version(&item.request))).await?;

            frontier = Vec::new();
            for (item, release) in to_fetch.iter().zip(fetched) {
                frontier.extend(Pending::children(&release, &item.path));
                let _ = releases.insert(release.id.clone(), release);
            }
        }

        let set = ReleaseSet {
            root: root_id,
            request: request.clone(),
            releases,
            requested_as,
            edges,
        };
        let order = set.install_order()?;
        tracing::info!(
            request = %request,
            packages = set.releases.len(),
            order = ?order.iter().map(PackageId::as_str).collect::<Vec<_>>(),
            "resolved release set"
        );
        Ok(set)
    }

    async fn resolve_version(&self, request: &VersionRequest) -> Result<Release> {
        let hash = match &request.selector {
            VersionSelector::Hash(hash) => hash.clone(),
            selector => {
                let versions = self
                    .bounded(format!("versions of {}", request.id), self.registry.versions(&request.id))
                    .await?;
                versions
                    .into_iter()
                    .filter(|v| selector.matches(&v.version, Some(&v.hash)))
                    .max_by(|a, b| a.version.cmp(&b.version))
                    .map(|v| v.hash)
                    .ok_or_else(|| DnpmError::NotFound {
                        kind: "version",
                        id: request.to_string(),
                    })?
            }
        };
        let release = self.fetch_release(&hash).await?;
        if release.id != request.id {
            return Err(DnpmError::Store {
                message: format!(
                    "release {hash} is {}, expected {}",
                    release.id, request.id
                ),
            });
        }
        Ok(release)
    }

    async fn fetch_release(&self, hash: &ContentHash) -> Result<Release> {
        tracing::debug!(%hash, "fetching release");
        match self.get(hash).await? {
            ContentNode::File(bytes) => {
                let manifest: Manifest = parse_json(hash, &bytes)?;
                Ok(Release::from_manifest(manifest, Some(hash.clone())))
            }
            ContentNode::Directory(entries) => {
                let files = ReleaseFiles::classify(hash, &entries)?;
                let (manifest, compose, wizard, disclaimer) = tokio::try_join!(
                    self.get_file(&files.manifest),
                    self.get_optional(files.compose.as_ref()),
                    self.get_optional(files.setup_wizard.as_ref()),
                    self.get_optional(files.disclaimer.as_ref()),
                )?;
                let manifest: Manifest = parse_json(&files.manifest.hash, &manifest)?;
                let documents = DirectoryDocuments {
                    compose: compose.map(|b| into_text("compose document", b)).transpose()?,
                    setup_wizard: wizard
                        .map(|b| parse_json::<SetupWizard>(hash, &b))
                        .transpose()?,
                    disclaimer: disclaimer
                        .map(|b| into_text("disclaimer", b))
                        .transpose()?,
                };
                Release::from_directory(manifest, hash.clone(), &files, documents)
            }
        }
    }

    async fn get(&self, hash: &ContentHash) -> Result<ContentNode> {
        self.bounded(hash.to_string(), self.store.get(hash)).await
    }

    async fn get_file(&self, entry: &DirEntry) -> Result<Vec<u8>> {
        match self.get(&entry.hash).await? {
            ContentNode::File(bytes) => Ok(bytes),
            ContentNode::Directory(_) => Err(DnpmError::Store {
                message: format!("{} ({}) is a directory", entry.name, entry.hash),
            }),
        }
    }

    async fn get_optional(&self, entry: Option<&DirEntry>) -> Result<Option<Vec<u8>>> {
        match entry {
            Some(entry) => self.get_file(entry).await.map(Some),
            None => Ok(None),
        }
    }

    /// Runs `call` under the timeout in force right now.
    async fn bounded<T>(&self, resource: String, call: impl Future<Output = Result<T>>) -> Result<T> {
        let timeout = self.config.fetch_timeout();
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| DnpmError::FetchTimeout { resource, timeout })?
    }
}

fn parse_json<T: serde::de::DeserializeOwned>(hash: &ContentHash, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| DnpmError::Store {
        message: format!("invalid document {hash}: {e}"),
    })
}

fn into_text(what: &str, bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes).map_err(|_| DnpmError::Store {
        message: format!("{what} is not valid UTF-8"),
    })
}
