//! `dnpm env` — Read or change global environment values.

use std::time::Duration;

use anyhow::Context;
use clap::{Args, Subcommand};
use dnpm_env::schema;
use dnpm_env::{GlobalEnvValue, PropagationEvent, PropagationReport};
use dnpm_sdk::node::DnpmNode;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Arguments for the `env` command.
#[derive(Args, Debug)]
pub struct EnvArgs {
    /// Operation to run.
    #[command(subcommand)]
    pub command: EnvCommand,
}

/// `env` operations.
#[derive(Subcommand, Debug)]
pub enum EnvCommand {
    /// Print one value.
    Get {
        /// Key, with or without the `_DAPPNODE_GLOBAL_` prefix.
        key: String,
    },
    /// Set a value and propagate it to every package using it.
    Set {
        /// Key, with or without the `_DAPPNODE_GLOBAL_` prefix.
        key: String,
        /// New value; `true`/`false` for boolean keys.
        value: String,
        /// Seconds to wait for propagation before giving up.
        #[arg(long, default_value_t = 120)]
        wait_secs: u64,
    },
    /// Print every value.
    List,
}

/// Executes the `env` command.
///
/// `set` returns once the value is stored and propagation finished; the
/// process would otherwise exit before restarts complete.
///
/// # Errors
///
/// Returns an error if the key or value is invalid, the db cannot be
/// written, or propagation does not finish in time.
pub async fn execute(node: &DnpmNode, args: EnvArgs) -> anyhow::Result<()> {
    match args.command {
        EnvCommand::Get { key } => match node.envs().get(&key)? {
            Some(value) => {
                println!("{value}");
                Ok(())
            }
            None => anyhow::bail!("{} is not set", schema::prefixed(key.trim())),
        },
        EnvCommand::List => {
            for (key, value) in node.envs().all() {
                println!("{key}={value}");
            }
            Ok(())
        }
        EnvCommand::Set {
            key,
            value,
            wait_secs,
        } => {
            let value = GlobalEnvValue::parse_for(key.trim(), &value)?;
            let mut events = node.engine().subscribe_events();
            let change = node.envs().set(&key, value)?;
            println!("{}={}", change.key, change.value);

            let report = tokio::time::timeout(
                Duration::from_secs(wait_secs),
                completion_of(&mut events, change.id),
            )
            .await
            .context("global env propagation did not finish in time")??;
            print_report(&report);
            Ok(())
        }
    }
}

/// Waits for the `Completed` event of one change.
async fn completion_of(
    events: &mut broadcast::Receiver<PropagationEvent>,
    change: Uuid,
) -> anyhow::Result<PropagationReport> {
    loop {
        match events.recv().await {
            Ok(PropagationEvent::Completed(report)) if report.change == change => return Ok(report),
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => {
                anyhow::bail!("propagation event channel closed")
            }
        }
    }
}

fn print_report(report: &PropagationReport) {
    if !report.env_file_written {
        println!("  env file: not written");
    }
    for id in &report.updated {
        println!("  updated   {id}");
    }
    for (id, error) in &report.failed {
        println!("  failed    {id}: {error}");
    }
    if report.updated.is_empty() && report.failed.is_empty() {
        println!("  no package needed an update");
    }
}
