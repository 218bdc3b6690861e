//! # dnpm-env
//!
//! Host-wide configuration values ("global environment") and their
//! propagation into every installed package that references them.
//!
//! Handles:
//! - **Schema**: the recognised keys, their value types and the mandatory
//!   key prefix.
//! - **Store**: durable get/set over the JSON db with an explicit observer
//!   list.
//! - **Engine**: env file rewrite, per-package spec rewrite and restart,
//!   run in the background with observable events.
//! - **Runtime**: the container runtime seam used for restarts.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod engine;
pub mod runtime;
pub mod schema;
pub mod store;

pub use engine::{EnvPropagationEngine, PropagationEvent, PropagationReport};
pub use runtime::{ContainerRuntime, DockerComposeRuntime};
pub use schema::GlobalEnvValue;
pub use store::{EnvChange, EnvObserver, GlobalEnvStore};
