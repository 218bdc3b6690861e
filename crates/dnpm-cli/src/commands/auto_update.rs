//! `dnpm auto-update` — Turn auto-update on or off.

use clap::{Args, ValueEnum};
use dnpm_sdk::node::DnpmNode;

/// Desired toggle state.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Toggle {
    /// Enable auto-update.
    On,
    /// Disable auto-update.
    Off,
}

/// Arguments for the `auto-update` command.
#[derive(Args, Debug)]
pub struct AutoUpdateArgs {
    /// `my-packages`, `system-packages`, or a package id.
    pub id: String,

    /// New state.
    pub state: Toggle,
}

/// Executes the `auto-update` command.
///
/// # Errors
///
/// Returns an error for an empty or malformed id, or if the setting cannot
/// be stored.
pub fn execute(node: &DnpmNode, args: &AutoUpdateArgs) -> anyhow::Result<()> {
    let enabled = args.state == Toggle::On;
    let target = node.auto_update().edit(&args.id, enabled)?;
    println!(
        "auto-update {} for {target}",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}
