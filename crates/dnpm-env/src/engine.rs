//! Propagation of a global env change into installed packages.
//!
//! Per change, in a background task:
//! 1. rewrite the env file as a full dump of the current values
//! 2. find installed packages whose environment sets the changed key
//! 3. for each, rewrite its compose file under the package lock, then
//!    restart it from a separate task
//!
//! A package job writes the value stored in the db when it takes the
//! package lock, not the value its change carried, so a stale job can
//! never overwrite a newer one. Restarts of one package are serialized
//! and read the compose file from disk, so the last restart always runs
//! the last written spec.
//!
//! Every step and every package is isolated: failures are logged and
//! published as events, never returned to whoever called `set`. There is
//! no retry.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use dnpm_common::db::{JsonDb, write_atomic};
use dnpm_common::error::{DnpmError, Result};
use dnpm_common::types::PackageId;
use dnpm_compose::{InstalledPackage, PackageRepository};
use futures_util::future::join_all;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::runtime::ContainerRuntime;
use crate::store::{EnvChange, EnvObserver, global_envs};

const EVENT_CAPACITY: usize = 256;

/// Progress of a propagation, published on the engine's channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationEvent {
    /// The env file was rewritten.
    EnvFileWritten {
        /// Change being propagated.
        change: Uuid,
        /// File written.
        path: PathBuf,
    },
    /// The env file could not be rewritten.
    EnvFileFailed {
        /// Change being propagated.
        change: Uuid,
        /// Failure description.
        error: String,
    },
    /// Installed packages could not be listed.
    ScanFailed {
        /// Change being propagated.
        change: Uuid,
        /// Failure description.
        error: String,
    },
    /// A package's spec was rewritten and the package restarted.
    PackageUpdated {
        /// Change being propagated.
        change: Uuid,
        /// Updated package.
        package: PackageId,
    },
    /// A package's rewrite or restart failed.
    PackageFailed {
        /// Change being propagated.
        change: Uuid,
        /// Failed package.
        package: PackageId,
        /// Failure description.
        error: String,
    },
    /// The propagation finished.
    Completed(PropagationReport),
}

/// Summary of one propagation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationReport {
    /// Change that was propagated.
    pub change: Uuid,
    /// Prefixed key.
    pub key: String,
    /// Whether the env file was rewritten.
    pub env_file_written: bool,
    /// Packages rewritten and restarted.
    pub updated: Vec<PackageId>,
    /// Packages referencing the key that already had the value.
    pub unchanged: Vec<PackageId>,
    /// Packages whose rewrite or restart failed.
    pub failed: BTreeMap<PackageId, String>,
}

/// Observer of the global env store that fans each change out to the
/// packages referencing it.
#[derive(Clone)]
pub struct EnvPropagationEngine {
    repo: Arc<PackageRepository>,
    runtime: Arc<dyn ContainerRuntime>,
    db: Arc<JsonDb>,
    env_file: PathBuf,
    env_file_lock: Arc<Mutex<()>>,
    restart_locks: Arc<DashMap<PackageId, Arc<Mutex<()>>>>,
    events: broadcast::Sender<PropagationEvent>,
    handle: Handle,
}

impl std::fmt::Debug for EnvPropagationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvPropagationEngine")
            .field("repo", &self.repo.root())
            .field("env_file", &self.env_file)
            .finish_non_exhaustive()
    }
}

impl EnvPropagationEngine {
    /// Creates an engine bound to the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `DnpmError::Config` when called outside a tokio runtime.
    pub fn new(
        repo: Arc<PackageRepository>,
        runtime: Arc<dyn ContainerRuntime>,
        db: Arc<JsonDb>,
        env_file: impl Into<PathBuf>,
    ) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| DnpmError::Config {
            message: format!("env propagation needs a tokio runtime: {e}"),
        })?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            repo,
            runtime,
            db,
            env_file: env_file.into(),
            env_file_lock: Arc::new(Mutex::new(())),
            restart_locks: Arc::new(DashMap::new()),
            events,
            handle,
        })
    }

    /// Subscribes to propagation events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<PropagationEvent> {
        self.events.subscribe()
    }

    /// Path of the env file.
    #[must_use]
    pub fn env_file(&self) -> &Path {
        &self.env_file
    }

    /// Propagates `change` in a background task.
    pub fn spawn(&self, change: EnvChange) -> JoinHandle<PropagationReport> {
        let engine = self.clone();
        self.handle.spawn(async move { engine.propagate(change).await })
    }

    /// Propagates `change` and waits for every package to finish.
    pub async fn propagate(&self, change: EnvChange) -> PropagationReport {
        let mut report = PropagationReport {
            change: change.id,
            key: change.key.clone(),
            ..PropagationReport::default()
        };

        match self.write_env_file().await {
            Ok(()) => {
                report.env_file_written = true;
                self.emit(PropagationEvent::EnvFileWritten {
                    change: change.id,
                    path: self.env_file.clone(),
                });
            }
            Err(e) => {
                tracing::error!(change = %change.id, error = %e, "failed to rewrite global env file");
                self.emit(PropagationEvent::EnvFileFailed {
                    change: change.id,
                    error: e.to_string(),
                });
            }
        }

        let affected = match self.affected_packages(&change.key) {
            Ok(affected) => affected,
            Err(e) => {
                tracing::error!(change = %change.id, error = %e, "failed to scan installed packages");
                self.emit(PropagationEvent::ScanFailed {
                    change: change.id,
                    error: e.to_string(),
                });
                return self.complete(report);
            }
        };
        tracing::debug!(
            change = %change.id,
            key = %change.key,
            packages = affected.len(),
            "propagating global env"
        );

        let value = change.value.to_string();
        let jobs = affected.into_iter().map(|package| {
            let engine = self.clone();
            let key = change.key.clone();
            let value = value.clone();
            let id = package.id.clone();
            let job = self
                .handle
                .spawn(async move { engine.update_package(package, &key, &value).await });
            async move { (id, job.await) }
        });

        for (package, outcome) in join_all(jobs).await {
            let outcome = outcome.unwrap_or_else(|e| {
                Err(DnpmError::Runtime {
                    package: package.to_string(),
                    message: format!("propagation task failed: {e}"),
                })
            });
            match outcome {
                Ok(true) => {
                    self.emit(PropagationEvent::PackageUpdated {
                        change: change.id,
                        package: package.clone(),
                    });
                    report.updated.push(package);
                }
                Ok(false) => report.unchanged.push(package),
                Err(e) => {
                    tracing::error!(change = %change.id, %package, error = %e, "global env propagation failed");
                    self.emit(PropagationEvent::PackageFailed {
                        change: change.id,
                        package: package.clone(),
                        error: e.to_string(),
                    });
                    let _ = report.failed.insert(package, e.to_string());
                }
            }
        }

        self.complete(report)
    }

    fn complete(&self, report: PropagationReport) -> PropagationReport {
        tracing::info!(
            change = %report.change,
            key = %report.key,
            updated = report.updated.len(),
            failed = report.failed.len(),
            "global env propagation finished"
        );
        self.emit(PropagationEvent::Completed(report.clone()));
        report
    }

    /// Dumps every current value into the env file, replacing it whole.
    async fn write_env_file(&self) -> Result<()> {
        let _guard = self.env_file_lock.lock().await;
        let contents: String = global_envs(&self.db)
            .iter()
            .map(|(key, value)| format!("{key}={value}\n"))
            .collect();
        write_atomic(&self.env_file, contents.as_bytes())
    }

    fn affected_packages(&self, key: &str) -> Result<Vec<InstalledPackage>> {
        Ok(self
            .repo
            .list_installed()?
            .into_iter()
            .filter(|p| p.spec.services.values().any(|s| s.environment.contains_key(key)))
            .collect())
    }

    /// Rewrites one package under its lock, then restarts it outside the
    /// lock. Returns whether the package changed.
    ///
    /// `fallback` is only used if the key vanished from the db.
    async fn update_package(&self, package: InstalledPackage, key: &str, fallback: &str) -> Result<bool> {
        let db = &self.db;
        let changed = self
            .repo
            .update_spec(&package.id, |editor| {
                let value = global_envs(db)
                    .get(key)
                    .map_or_else(|| fallback.to_string(), ToString::to_string);
                editor.apply_global_env(key, &value)
            })
            .await?;
        if !changed {
            return Ok(false);
        }

        let runtime = Arc::clone(&self.runtime);
        let restart_lock = self.restart_locks.entry(package.id.clone()).or_default().clone();
        let id = package.id.clone();
        let path = package.compose_path;
        // update_spec has dropped the package lock by now
        self.handle
            .spawn(async move {
                let _serial = restart_lock.lock().await;
                runtime.restart(&id, &path).await
            })
            .await
            .map_err(|e| DnpmError::Runtime {
                package: package.id.to_string(),
                message: format!("restart task failed: {e}"),
            })??;
        tracing::info!(package = %package.id, key, "package updated with new global env");
        Ok(true)
    }

    fn emit(&self, event: PropagationEvent) {
        let _ = self.events.send(event);
    }
}

impl EnvObserver for EnvPropagationEngine {
    fn on_change(&self, change: &EnvChange) {
        let _ = self.spawn(change.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use dnpm_compose::{ComposeEditor, ContainerGroupSpec, ServiceSpec};

    use super::*;
    use crate::schema::GlobalEnvValue;

    #[derive(Default)]
    struct RecordingRuntime {
        restarted: StdMutex<Vec<PackageId>>,
        failing: BTreeSet<String>,
    }

    #[async_trait]
    impl ContainerRuntime for RecordingRuntime {
        async fn restart(&self, package: &PackageId, _compose_path: &Path) -> Result<()> {
            if self.failing.contains(package.as_str()) {
                return Err(DnpmError::Runtime {
                    package: package.to_string(),
                    message: "container exited".into(),
                });
            }
            self.restarted.lock().unwrap().push(package.clone());
            Ok(())
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        repo: Arc<PackageRepository>,
        db: Arc<JsonDb>,
        env_file: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(PackageRepository::new(dir.path().join("repo")));
        let db = Arc::new(JsonDb::open(dir.path().join("db.json")).unwrap());
        let env_file = dir.path().join("repo").join("dnp.dappnode.global.env");
        Fixture {
            _dir: dir,
            repo,
            db,
            env_file,
        }
    }

    fn install(repo: &PackageRepository, name: &str, env: &[(&str, &str)]) {
        let id = PackageId::new(name).unwrap();
        let service = ServiceSpec {
            image: format!("{name}:1.0.0"),
            environment: env
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            ..ServiceSpec::default()
        };
        let spec = ContainerGroupSpec {
            services: BTreeMap::from([(name.to_string(), service)]),
            ..ContainerGroupSpec::default()
        };
        ComposeEditor::new(ComposeEditor::merge(&spec, None))
            .write(&repo.compose_path(&id))
            .unwrap();
    }

    fn change(db: &JsonDb, key: &str, value: &str) -> EnvChange {
        let value = GlobalEnvValue::Text(value.into());
        db.set(key, &value).unwrap();
        EnvChange {
            id: Uuid::new_v4(),
            key: key.into(),
            value,
        }
    }

    const DOMAIN: &str = "_DAPPNODE_GLOBAL_DOMAIN";

    #[tokio::test]
    async fn rewrites_env_file_and_only_referencing_packages() {
        let f = fixture();
        install(&f.repo, "a.dnp.dappnode.eth", &[(DOMAIN, "old")]);
        install(&f.repo, "b.dnp.dappnode.eth", &[("OTHER", "1")]);
        let untouched = std::fs::read(f.repo.compose_path(&PackageId::new("b.dnp.dappnode.eth").unwrap())).unwrap();
        let runtime = Arc::new(RecordingRuntime::default());
        let engine = EnvPropagationEngine::new(f.repo.clone(), runtime.clone(), f.db.clone(), &f.env_file).unwrap();

        let report = engine.spawn(change(&f.db, DOMAIN, "new.dappnode.io")).await.unwrap();

        assert!(report.env_file_written);
        assert_eq!(report.updated, vec![PackageId::new("a.dnp.dappnode.eth").unwrap()]);
        assert_eq!(
            std::fs::read_to_string(&f.env_file).unwrap(),
            "_DAPPNODE_GLOBAL_DOMAIN=new.dappnode.io\n"
        );
        let a = f.repo.get_by_id(&PackageId::new("a.dnp.dappnode.eth").unwrap()).unwrap().unwrap();
        assert_eq!(a.settings.environment[DOMAIN], "new.dappnode.io");
        let b_after = std::fs::read(f.repo.compose_path(&PackageId::new("b.dnp.dappnode.eth").unwrap())).unwrap();
        assert_eq!(untouched, b_after);
        assert_eq!(runtime.restarted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failing_restart_does_not_stop_other_packages() {
        let f = fixture();
        install(&f.repo, "a.dnp.dappnode.eth", &[(DOMAIN, "old")]);
        install(&f.repo, "b.dnp.dappnode.eth", &[(DOMAIN, "old")]);
        let runtime = Arc::new(RecordingRuntime {
            failing: BTreeSet::from(["a.dnp.dappnode.eth".to_string()]),
            ..RecordingRuntime::default()
        });
        let engine = EnvPropagationEngine::new(f.repo.clone(), runtime.clone(), f.db.clone(), &f.env_file).unwrap();
        let mut events = engine.subscribe_events();

        let report = engine.propagate(change(&f.db, DOMAIN, "x")).await;

        assert_eq!(report.updated, vec![PackageId::new("b.dnp.dappnode.eth").unwrap()]);
        assert!(report.failed.contains_key(&PackageId::new("a.dnp.dappnode.eth").unwrap()));
        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, PropagationEvent::PackageFailed { ref package, .. } if package.as_str() == "a.dnp.dappnode.eth") {
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[tokio::test]
    async fn same_value_is_not_rewritten_or_restarted() {
        let f = fixture();
        install(&f.repo, "a.dnp.dappnode.eth", &[(DOMAIN, "same")]);
        let runtime = Arc::new(RecordingRuntime::default());
        let engine = EnvPropagationEngine::new(f.repo.clone(), runtime.clone(), f.db.clone(), &f.env_file).unwrap();
        let report = engine.propagate(change(&f.db, DOMAIN, "same")).await;
        assert_eq!(report.unchanged.len(), 1);
        assert!(runtime.restarted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn older_change_applied_late_keeps_the_stored_value() {
        let f = fixture();
        install(&f.repo, "a.dnp.dappnode.eth", &[(DOMAIN, "v0")]);
        let runtime = Arc::new(RecordingRuntime::default());
        let engine = EnvPropagationEngine::new(f.repo.clone(), runtime.clone(), f.db.clone(), &f.env_file).unwrap();
        let older = change(&f.db, DOMAIN, "v1");
        let newer = change(&f.db, DOMAIN, "v2");

        let first = engine.propagate(newer).await;
        let late = engine.propagate(older).await;

        assert_eq!(first.updated.len(), 1);
        assert_eq!(late.unchanged.len(), 1);
        let a = f.repo.get_by_id(&PackageId::new("a.dnp.dappnode.eth").unwrap()).unwrap().unwrap();
        assert_eq!(a.settings.environment[DOMAIN], "v2");
        assert_eq!(runtime.restarted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn env_file_is_a_full_sorted_dump() {
        let f = fixture();
        let runtime = Arc::new(RecordingRuntime::default());
        let engine = EnvPropagationEngine::new(f.repo.clone(), runtime, f.db.clone(), &f.env_file).unwrap();
        let _ = change(&f.db, "_DAPPNODE_GLOBAL_HOSTNAME", "node");
        f.db.set("_DAPPNODE_GLOBAL_UPNP_AVAILABLE", &GlobalEnvValue::Flag(false)).unwrap();
        std::fs::create_dir_all(f.env_file.parent().unwrap()).unwrap();
        std::fs::write(&f.env_file, "GARBAGE\n").unwrap();

        let report = engine.propagate(change(&f.db, DOMAIN, "d")).await;
        assert!(report.env_file_written);
        assert_eq!(
            std::fs::read_to_string(&f.env_file).unwrap(),
            "_DAPPNODE_GLOBAL_DOMAIN=d\n_DAPPNODE_GLOBAL_HOSTNAME=node\n_DAPPNODE_GLOBAL_UPNP_AVAILABLE=false\n"
        );
    }

    #[test]
    fn engine_requires_a_runtime() {
        let f = fixture();
        let err = EnvPropagationEngine::new(f.repo, Arc::new(RecordingRuntime::default()), f.db, f.env_file).unwrap_err();
        assert!(matches!(err, DnpmError::Config { .. }));
    }
}
