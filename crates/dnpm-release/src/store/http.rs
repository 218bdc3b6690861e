//! Content store and registry reached over HTTP.
//!
//! The store talks to an IPFS-compatible node API: `ls` tells directories
//! from files, `cat` returns file bytes. The registry serves one
//! `versions.json` document per package.

use async_trait::async_trait;
use dnpm_common::error::{DnpmError, Result};
use dnpm_common::types::{ContentHash, PackageId};
use serde::Deserialize;

use super::{ContentNode, ContentStore, DirEntry, PublishedVersion, ReleaseRegistry};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsResponse {
    #[serde(default)]
    objects: Vec<LsObject>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsObject {
    #[serde(default)]
    links: Vec<LsLink>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LsLink {
    name: String,
    hash: String,
    #[serde(default)]
    size: u64,
}

fn store_error(context: &str, e: &reqwest::Error) -> DnpmError {
    DnpmError::Store {
        message: format!("{context}: {e}"),
    }
}

/// Content store backed by an IPFS node API.
#[derive(Debug, Clone)]
pub struct HttpContentStore {
    client: reqwest::Client,
    api_url: String,
}

impl HttpContentStore {
    /// Creates a store that talks to the node API at `api_url`.
    #[must_use]
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn call(&self, command: &str, hash: &ContentHash) -> Result<reqwest::Response> {
        let url = format!("{}/api/v0/{command}?arg={}", self.api_url, hash.cid());
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| store_error(&format!("request to {url} failed"), &e))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DnpmError::NotFound {
                kind: "content",
                id: hash.to_string(),
            });
        }
        if !status.is_success() {
            return Err(DnpmError::Store {
                message: format!("HTTP {status} from {url}"),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ContentStore for HttpContentStore {
    async fn get(&self, hash: &ContentHash) -> Result<ContentNode> {
        let listing: LsResponse = self
            .call("ls", hash)
            .await?
            .json()
            .await
            .map_err(|e| store_error("invalid ls response", &e))?;
        let links: Vec<LsLink> = listing
            .objects
            .into_iter()
            .flat_map(|object| object.links)
            .collect();
        if !links.is_empty() {
            let entries = links
                .into_iter()
                .map(|link| {
                    Ok(DirEntry {
                        name: link.name,
                        hash: ContentHash::parse(&link.hash)?,
                        size: link.size,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            tracing::debug!(%hash, entries = entries.len(), "listed directory");
            return Ok(ContentNode::Directory(entries));
        }
        let bytes = self
            .call("cat", hash)
            .await?
            .bytes()
            .await
            .map_err(|e| store_error("failed to read file body", &e))?;
        tracing::debug!(%hash, bytes = bytes.len(), "fetched file");
        Ok(ContentNode::File(bytes.to_vec()))
    }
}

/// Registry serving `<base>/<id>/versions.json`.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRegistry {
    /// Creates a registry client rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ReleaseRegistry for HttpRegistry {
    async fn versions(&self, id: &PackageId) -> Result<Vec<PublishedVersion>> {
        let url = format!("{}/{id}/versions.json", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| store_error(&format!("request to {url} failed"), &e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DnpmError::NotFound {
                kind: "package",
                id: id.to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(DnpmError::Store {
                message: format!("HTTP {} from {url}", response.status()),
            });
        }
        response
            .json()
            .await
            .map_err(|e| store_error(&format!("invalid versions document for {id}"), &e))
    }
}
