//! One host's dnpm components, wired together.

use std::sync::Arc;

use dnpm_common::config::{ConfigStore, DnpmConfig};
use dnpm_common::db::JsonDb;
use dnpm_common::error::Result;
use dnpm_compose::PackageRepository;
use dnpm_env::{ContainerRuntime, DockerComposeRuntime, EnvPropagationEngine, GlobalEnvStore};
use dnpm_release::ReleaseFetcher;
use dnpm_release::store::http::{HttpContentStore, HttpRegistry};
use dnpm_release::store::{ContentStore, ReleaseRegistry};

use crate::auto_update::AutoUpdateSettings;
use crate::availability::{ResourceProbe, StatvfsProbe};
use crate::planner::InstallPlanner;

/// External collaborators of a node.
pub struct Backends {
    /// Content store releases are fetched from.
    pub store: Arc<dyn ContentStore>,
    /// Registry resolving names to versions.
    pub registry: Arc<dyn ReleaseRegistry>,
    /// Runtime restarting packages.
    pub runtime: Arc<dyn ContainerRuntime>,
    /// Host resource probe.
    pub probe: Arc<dyn ResourceProbe>,
}

impl Backends {
    /// HTTP content store and registry from `config`, docker compose
    /// runtime and `statvfs` probe.
    #[must_use]
    pub fn from_config(config: &DnpmConfig) -> Self {
        Self {
            store: Arc::new(HttpContentStore::new(config.store_api_url.clone())),
            registry: Arc::new(HttpRegistry::new(config.registry_url.clone())),
            runtime: Arc::new(DockerComposeRuntime::new()),
            probe: Arc::new(StatvfsProbe),
        }
    }
}

/// Every dnpm component of one host.
pub struct DnpmNode {
    config: Arc<ConfigStore>,
    repo: Arc<PackageRepository>,
    planner: InstallPlanner,
    envs: GlobalEnvStore,
    engine: EnvPropagationEngine,
    auto_update: AutoUpdateSettings,
}

impl std::fmt::Debug for DnpmNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnpmNode")
            .field("config", &self.config)
            .field("planner", &self.planner)
            .finish_non_exhaustive()
    }
}

impl DnpmNode {
    /// Opens a node with the production backends.
    ///
    /// # Errors
    ///
    /// Returns an error if the db cannot be opened or no tokio runtime is
    /// running.
    pub fn open(config: DnpmConfig) -> Result<Self> {
        let backends = Backends::from_config(&config);
        Self::with_backends(config, backends)
    }

    /// Opens a node with the given backends. The propagation engine is
    /// subscribed to the global env store.
    ///
    /// # Errors
    ///
    /// Returns an error if the db cannot be opened or no tokio runtime is
    /// running.
    pub fn with_backends(config: DnpmConfig, backends: Backends) -> Result<Self> {
        let db = Arc::new(JsonDb::open(config.db_path.clone())?);
        let repo = Arc::new(PackageRepository::new(config.repo_dir.clone()));
        let env_file = config.global_env_file.clone();
        let config = Arc::new(ConfigStore::new(config));

        let fetcher = ReleaseFetcher::new(backends.store, backends.registry, Arc::clone(&config));
        let planner = InstallPlanner::new(fetcher, Arc::clone(&repo), backends.probe, Arc::clone(&config));
        let engine = EnvPropagationEngine::new(Arc::clone(&repo), backends.runtime, Arc::clone(&db), env_file)?;
        let envs = GlobalEnvStore::new(Arc::clone(&db));
        envs.subscribe(Arc::new(engine.clone()));

        tracing::debug!(repo = %repo.root().display(), db = %db.path().display(), "node opened");
        Ok(Self {
            auto_update: AutoUpdateSettings::new(db),
            config,
            repo,
            planner,
            envs,
            engine,
        })
    }

    /// Shared configuration, including the live fetch timeout.
    #[must_use]
    pub const fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// Installed packages.
    #[must_use]
    pub const fn repository(&self) -> &Arc<PackageRepository> {
        &self.repo
    }

    /// Install planner.
    #[must_use]
    pub const fn planner(&self) -> &InstallPlanner {
        &self.planner
    }

    /// Global environment store.
    #[must_use]
    pub const fn envs(&self) -> &GlobalEnvStore {
        &self.envs
    }

    /// Propagation engine, for its event channel.
    #[must_use]
    pub const fn engine(&self) -> &EnvPropagationEngine {
        &self.engine
    }

    /// Auto-update toggles.
    #[must_use]
    pub const fn auto_update(&self) -> &AutoUpdateSettings {
        &self.auto_update
    }
}
