//! `dnpm plan` — Preview installing a package.

use clap::Args;
use dnpm_sdk::node::DnpmNode;
use dnpm_sdk::plan::RequestedDnp;

use crate::output::{format_bytes, print_json, rule};

/// Arguments for the `plan` command.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Package id, `id@range`, or release hash (`/ipfs/<cid>`).
    pub request: String,

    /// Print the full plan as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `plan` command.
///
/// Fetches the release and its dependencies, checks compatibility and
/// prints what an install would do. Nothing is written.
///
/// # Errors
///
/// Returns an error if the request is malformed, a release cannot be
/// fetched, or the dependencies form a cycle.
pub async fn execute(node: &DnpmNode, args: PlanArgs) -> anyhow::Result<()> {
    let plan = node.planner().plan(&args.request).await?;
    if args.json {
        return print_json(&plan);
    }
    print_summary(&plan);
    Ok(())
}

fn print_summary(plan: &RequestedDnp) {
    println!("Install plan for: {} ({})", plan.name, plan.req_version);
    println!("{}", rule(48));
    println!("  version:   {}", plan.sem_version);
    if let Some(origin) = &plan.origin {
        println!("  origin:    {origin}");
    }
    println!("  image:     {}", format_bytes(plan.image_size));
    println!(
        "  installed: {}{}",
        if plan.is_installed { "yes" } else { "no" },
        if plan.is_updated { " (already at this version)" } else { "" }
    );
    println!();

    println!("  Packages:");
    for (id, change) in &plan.request.compatible.dnps {
        let from = change.from.as_deref().unwrap_or("-");
        println!("    {id:<40} {from} -> {}", change.to);
        for permission in plan.special_permissions.get(id).into_iter().flatten() {
            println!("      ! {}: {}", permission.name, permission.details);
        }
    }
    println!();

    let compatible = &plan.request.compatible;
    if compatible.is_compatible {
        println!("  Compatible.");
    } else {
        println!("  Not compatible: {}", compatible.error);
        if compatible.requires_core_update {
            println!("  A core update is required first.");
        }
    }
    let available = &plan.request.available;
    if !available.is_available {
        println!("  Not available: {}", available.message);
    }
}
