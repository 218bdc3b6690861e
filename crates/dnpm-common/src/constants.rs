//! System-wide constants and default paths.

use std::time::Duration;

/// Default base directory for dnpm data.
pub const DEFAULT_DATA_DIR: &str = "/usr/src/dappnode";

/// Default directory holding one sub-directory per installed package.
pub const DEFAULT_REPO_DIR: &str = "/usr/src/dappnode/dnp_repo";

/// File name of a package's compose specification inside its repo dir.
pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";

/// File name of the global environment file inside the repo dir.
pub const GLOBAL_ENV_FILE_NAME: &str = "dnp.dappnode.global.env";

/// Default configuration file read by the CLI.
pub const DEFAULT_CONFIG_FILE: &str = "/usr/src/dappnode/dnpm.json";

/// File name of the JSON key-value db inside the data dir.
pub const DB_FILE_NAME: &str = "maindb.json";

/// Mandatory prefix of every persisted global environment key.
pub const GLOBAL_ENVS_PREFIX: &str = "_DAPPNODE_GLOBAL_";

/// Default content-store gateway used to build avatar URLs.
pub const DEFAULT_GATEWAY_URL: &str = "http://ipfs.dappnode:8080";

/// Default content-store HTTP API.
pub const DEFAULT_STORE_API_URL: &str = "http://ipfs.dappnode:5001";

/// Default registry index resolving package names to published versions.
pub const DEFAULT_REGISTRY_URL: &str = "http://registry.dappnode:8080";

/// Default bound on every content-store and registry call.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Prefix of generated container names.
pub const CONTAINER_NAME_PREFIX: &str = "DAppNodePackage-";

/// Directory segment under a bind mountpoint holding package volumes.
pub const VOLUMES_DIR_SEGMENT: &str = "dappnode-volumes";
