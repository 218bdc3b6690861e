//! CLI command definitions and dispatch.

pub mod auto_update;
pub mod env;
pub mod installed;
pub mod plan;
pub mod timeout;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use dnpm_common::config::DnpmConfig;
use dnpm_sdk::node::DnpmNode;

/// dnpm — node package lifecycle manager.
#[derive(Parser, Debug)]
#[command(name = "dnpm", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to the JSON configuration file.
    #[arg(long, global = true, env = "DNPM_CONFIG", default_value = dnpm_common::constants::DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Base data directory; every state path is derived from it.
    #[arg(long, global = true, env = "DNPM_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Content-store gateway used for avatar URLs.
    #[arg(long, global = true, env = "DNPM_GATEWAY_URL")]
    pub gateway_url: Option<String>,

    /// Content-store HTTP API releases are fetched from.
    #[arg(long, global = true, env = "DNPM_STORE_API_URL")]
    pub store_api_url: Option<String>,

    /// Registry index resolving package names to versions.
    #[arg(long, global = true, env = "DNPM_REGISTRY_URL")]
    pub registry_url: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Preview installing a package: dependencies, compatibility, settings.
    Plan(plan::PlanArgs),
    /// Read or change global environment values.
    Env(env::EnvArgs),
    /// Change the content-store fetch timeout.
    Timeout(timeout::TimeoutArgs),
    /// Turn auto-update on or off.
    AutoUpdate(auto_update::AutoUpdateArgs),
    /// List installed packages, or show one.
    Installed(installed::InstalledArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if configuration loading or the command fails.
pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let config_path = cli.config;
    let node = DnpmNode::open(config)?;
    match cli.command {
        Command::Plan(args) => plan::execute(&node, args).await,
        Command::Env(args) => env::execute(&node, args).await,
        Command::Timeout(args) => timeout::execute(&node, &config_path, &args),
        Command::AutoUpdate(args) => auto_update::execute(&node, &args),
        Command::Installed(args) => installed::execute(&node, &args),
    }
}

/// Reads the configuration file, then applies command-line overrides.
fn load_config(cli: &Cli) -> anyhow::Result<DnpmConfig> {
    let mut config = DnpmConfig::load(&cli.config)?;
    if let Some(dir) = &cli.data_dir {
        apply_data_dir(&mut config, dir);
    }
    if let Some(url) = &cli.gateway_url {
        config.gateway_url.clone_from(url);
    }
    if let Some(url) = &cli.store_api_url {
        config.store_api_url.clone_from(url);
    }
    if let Some(url) = &cli.registry_url {
        config.registry_url.clone_from(url);
    }
    tracing::debug!(?config, "effective configuration");
    Ok(config)
}

fn apply_data_dir(config: &mut DnpmConfig, dir: &Path) {
    let rooted = DnpmConfig::rooted_at(dir);
    config.data_dir = rooted.data_dir;
    config.repo_dir = rooted.repo_dir;
    config.db_path = rooted.db_path;
    config.global_env_file = rooted.global_env_file;
}
