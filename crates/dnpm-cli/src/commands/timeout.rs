//! `dnpm timeout` — Change the content-store fetch timeout.

use std::path::Path;

use clap::Args;
use dnpm_common::config::DnpmConfig;
use dnpm_common::db::write_atomic;
use dnpm_sdk::node::DnpmNode;

/// Arguments for the `timeout` command.
#[derive(Args, Debug)]
pub struct TimeoutArgs {
    /// New timeout in milliseconds.
    pub timeout_ms: Option<u64>,
}

/// Executes the `timeout` command.
///
/// Applies the timeout to the running node and stores it in the
/// configuration file so later invocations use it too. Command-line
/// overrides are not written back.
///
/// # Errors
///
/// Returns an error if no timeout (or zero) is given, or the
/// configuration file cannot be written.
pub fn execute(node: &DnpmNode, config_path: &Path, args: &TimeoutArgs) -> anyhow::Result<()> {
    node.config().set_fetch_timeout(args.timeout_ms)?;
    let timeout = node.config().fetch_timeout();

    let mut config = DnpmConfig::load(config_path)?;
    config.fetch_timeout_ms = u64::try_from(timeout.as_millis())?;
    write_atomic(config_path, &serde_json::to_vec_pretty(&config)?)?;

    println!("fetch timeout set to {} ms", timeout.as_millis());
    Ok(())
}
