//! # dnpm-sdk
//!
//! Public SDK for using dnpm as a Rust library.
//!
//! Provides the main entry points:
//! - [`InstallPlanner`](planner::InstallPlanner): resolves a request into
//!   an advisory install plan ([`RequestedDnp`](plan::RequestedDnp)).
//! - [`DnpmNode`](node::DnpmNode): wires configuration, stores, the
//!   planner and global env propagation together for one host.
//! - [`AutoUpdateSettings`](auto_update::AutoUpdateSettings): the
//!   auto-update toggles.
//!
//! # Example
//!
//! ```rust,no_run
//! use dnpm_common::config::DnpmConfig;
//! use dnpm_sdk::node::DnpmNode;
//!
//! # async fn run() -> dnpm_common::error::Result<()> {
//! let node = DnpmNode::open(DnpmConfig::default())?;
//! let plan = node.planner().plan("bitcoin.dnp.dappnode.eth").await?;
//! println!("compatible: {}", plan.request.compatible.is_compatible);
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod auto_update;
pub mod availability;
pub mod node;
pub mod permissions;
pub mod plan;
pub mod planner;
