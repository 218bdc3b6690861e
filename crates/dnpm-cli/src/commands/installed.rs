//! `dnpm installed` — List installed packages, or show one.

use clap::Args;
use dnpm_common::types::PackageId;
use dnpm_sdk::node::DnpmNode;

use crate::output::print_json;

/// Arguments for the `installed` command.
#[derive(Args, Debug)]
pub struct InstalledArgs {
    /// Show only this package, with its settings.
    pub id: Option<String>,
}

/// Executes the `installed` command.
///
/// # Errors
///
/// Returns an error if the repository cannot be read or the package is
/// not installed.
pub fn execute(node: &DnpmNode, args: &InstalledArgs) -> anyhow::Result<()> {
    let repo = node.repository();
    if let Some(id) = &args.id {
        let id = PackageId::new(id)?;
        let Some(package) = repo.get_by_id(&id)? else {
            anyhow::bail!("{id} is not installed");
        };
        println!("{} {}", package.id, package.version);
        if let Some(origin) = &package.origin {
            println!("origin: {origin}");
        }
        return print_json(&package.settings);
    }

    let packages = repo.list_installed()?;
    if packages.is_empty() {
        println!("No packages installed.");
        return Ok(());
    }
    println!("{:<45} {:<12} {:<10}", "PACKAGE", "VERSION", "SERVICES");
    for package in &packages {
        println!(
            "{:<45} {:<12} {:<10}",
            package.id,
            package.version,
            package.spec.services.len()
        );
    }
    Ok(())
}
