//! # dnpm-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the entire dnpm workspace.
//!
//! This crate is the leaf of the dependency graph — it depends on no other
//! internal crate and provides the primitives every other crate builds upon:
//! package identifiers, version selectors, the error taxonomy, the runtime
//! configuration store, and a small file-backed JSON key-value db.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod types;
