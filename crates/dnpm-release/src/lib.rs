//! # dnpm-release
//!
//! Resolution of package requests against a content-addressed release
//! store, and the compatibility check of the resulting release set.
//!
//! Handles:
//! - **Manifest**: the immutable per-release descriptor and derived metadata.
//! - **Store**: content store and registry seams, with in-memory and HTTP
//!   implementations.
//! - **Release**: assembling manifest and directory releases into a
//!   manifest plus compose template.
//! - **Fetcher**: recursive, deduplicated, cycle-checked dependency fetch.
//! - **Graph**: dependency graph construction and topological resolution.
//! - **Resolver**: compatibility report against installed packages.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod fetcher;
pub mod graph;
pub mod manifest;
pub mod release;
pub mod resolver;
pub mod store;

pub use fetcher::{DependencyEdge, ReleaseFetcher, ReleaseSet};
pub use manifest::{Manifest, ReleaseMetadata, SetupWizard};
pub use release::Release;
pub use resolver::{CompatibilityReport, DependencyResolver};
