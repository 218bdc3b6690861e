//! Container runtime abstraction used to restart packages.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dnpm_common::error::{DnpmError, Result};
use dnpm_common::types::PackageId;

/// Applies a package's on-disk compose file to its running containers.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Recreates the package's containers from `compose_path`.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::Runtime` if the runtime rejects the restart.
    async fn restart(&self, package: &PackageId, compose_path: &Path) -> Result<()>;

    /// Returns whether this runtime can act on the current host.
    fn is_available(&self) -> bool;
}

/// Runtime driving the `docker compose` CLI.
#[derive(Debug, Clone)]
pub struct DockerComposeRuntime {
    docker: Option<PathBuf>,
}

impl DockerComposeRuntime {
    /// Locates the `docker` binary on `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            docker: which::which("docker").ok(),
        }
    }
}

impl Default for DockerComposeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerComposeRuntime {
    async fn restart(&self, package: &PackageId, compose_path: &Path) -> Result<()> {
        let docker = self.docker.as_ref().ok_or_else(|| DnpmError::NotFound {
            kind: "docker binary",
            id: "docker (install Docker to restart packages)".into(),
        })?;
        tracing::info!(%package, path = %compose_path.display(), "restarting package");

        let output = tokio::process::Command::new(docker)
            .arg("compose")
            .arg("-f")
            .arg(compose_path)
            .args(["up", "-d"])
            .output()
            .await
            .map_err(|e| DnpmError::io(docker, e))?;

        if !output.status.success() {
            return Err(DnpmError::Runtime {
                package: package.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.docker.is_some()
    }
}
