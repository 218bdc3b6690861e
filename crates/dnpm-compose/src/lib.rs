//! # dnpm-compose
//!
//! In-memory model of a package's container-group specification and the
//! editor that reconciles a release template against what is on disk.
//!
//! Handles:
//! - **Spec**: serde model of the compose document (services, volumes).
//! - **Labels**: the default-tracking marker and installed-release labels.
//! - **Editor**: merge, global env substitution, atomic read/write.
//! - **Settings**: user-facing view of env, ports and volume mountpoints.
//! - **Repository**: installed packages on disk, with per-package write locks.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod editor;
pub mod labels;
pub mod repository;
pub mod settings;
pub mod spec;

pub use editor::ComposeEditor;
pub use repository::{InstalledPackage, PackageRepository};
pub use settings::UserSettings;
pub use spec::{ContainerGroupSpec, ServiceSpec, VolumeDefinition};
