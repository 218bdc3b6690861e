//! Integration tests for global env propagation.
//!
//! Covered scenarios:
//! - setting DOMAIN rewrites the env file and every referencing package
//! - packages that do not reference the key are left byte-for-byte alone
//! - the env file is rewritten once per set
//! - concurrent sets of different keys on one package lose no update
//! - repeated sets of one key leave the package at the last stored value
//! - a package whose restart fails does not hold back the others

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dnpm_common::db::JsonDb;
use dnpm_common::error::{DnpmError, Result};
use dnpm_common::types::PackageId;
use dnpm_compose::{ComposeEditor, ContainerGroupSpec, PackageRepository, ServiceSpec};
use dnpm_env::{
    ContainerRuntime, EnvPropagationEngine, GlobalEnvStore, GlobalEnvValue, PropagationEvent,
    PropagationReport,
};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Default)]
struct FakeRuntime {
    restarts: Mutex<Vec<PackageId>>,
    broken: BTreeSet<String>,
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn restart(&self, package: &PackageId, _compose_path: &Path) -> Result<()> {
        if self.broken.contains(package.as_str()) {
            return Err(DnpmError::Runtime {
                package: package.to_string(),
                message: "port already allocated".into(),
            });
        }
        self.restarts.lock().unwrap().push(package.clone());
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }
}

struct Node {
    _dir: tempfile::TempDir,
    repo: Arc<PackageRepository>,
    store: GlobalEnvStore,
    engine: EnvPropagationEngine,
    runtime: Arc<FakeRuntime>,
    env_file: PathBuf,
}

fn node(runtime: FakeRuntime) -> Node {
    let dir = tempfile::tempdir().unwrap();
    let repo = Arc::new(PackageRepository::new(dir.path().join("dnp_repo")));
    let db = Arc::new(JsonDb::open(dir.path().join("dnp_repo").join("maindb.json")).unwrap());
    let env_file = dir.path().join("dnp_repo").join("dnp.dappnode.global.env");
    let runtime = Arc::new(runtime);
    let engine = EnvPropagationEngine::new(repo.clone(), runtime.clone(), db.clone(), &env_file).unwrap();
    let store = GlobalEnvStore::new(db);
    store.subscribe(Arc::new(engine.clone()));
    Node {
        _dir: dir,
        repo,
        store,
        engine,
        runtime,
        env_file,
    }
}

fn id(name: &str) -> PackageId {
    PackageId::new(name).unwrap()
}

fn install(repo: &PackageRepository, name: &str, env: &[(&str, &str)]) {
    let service = ServiceSpec {
        container_name: Some(format!("DAppNodePackage-{name}")),
        image: format!("{name}:0.2.0"),
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
        .write(&repo.compose_path(&id(name)))
        .unwrap();
}

fn env_of(repo: &PackageRepository, name: &str) -> BTreeMap<String, String> {
    repo.get_by_id(&id(name)).unwrap().unwrap().settings.environment
}

/// Collects events until every change in `changes` completed.
async fn collect_until_completed(
    events: &mut broadcast::Receiver<PropagationEvent>,
    changes: &[Uuid],
) -> (Vec<PropagationEvent>, Vec<PropagationReport>) {
    let mut pending: HashSet<Uuid> = changes.iter().copied().collect();
    let mut seen = Vec::new();
    let mut reports = Vec::new();
    tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while !pending.is_empty() {
            let event = events.recv().await.unwrap();
            if let PropagationEvent::Completed(report) = &event {
                let _ = pending.remove(&report.change);
                reports.push(report.clone());
            }
            seen.push(event);
        }
    })
    .await
    .expect("propagation did not complete");
    (seen, reports)
}

const DOMAIN: &str = "_DAPPNODE_GLOBAL_DOMAIN";

// ── Single change ────────────────────────────────────────────────────

#[tokio::test]
async fn domain_change_reaches_env_file_and_referencing_packages() {
    let node = node(FakeRuntime::default());
    install(&node.repo, "vpn.dnp.dappnode.eth", &[(DOMAIN, "old.dyndns.dappnode.io")]);
    install(&node.repo, "https.dnp.dappnode.eth", &[(DOMAIN, "old.dyndns.dappnode.io"), ("PORT", "443")]);
    install(&node.repo, "geth.dnp.dappnode.eth", &[("SYNCMODE", "snap")]);
    let untouched = std::fs::read(node.repo.compose_path(&id("geth.dnp.dappnode.eth"))).unwrap();
    let mut events = node.engine.subscribe_events();

    let change = node
        .store
        .set("DOMAIN", GlobalEnvValue::Text("abc.dyndns.dappnode.io".into()))
        .unwrap();
    let (_, reports) = collect_until_completed(&mut events, &[change.id]).await;

    let contents = std::fs::read_to_string(&node.env_file).unwrap();
    assert!(contents.lines().any(|l| l == "_DAPPNODE_GLOBAL_DOMAIN=abc.dyndns.dappnode.io"));
    assert_eq!(env_of(&node.repo, "vpn.dnp.dappnode.eth")[DOMAIN], "abc.dyndns.dappnode.io");
    let https = env_of(&node.repo, "https.dnp.dappnode.eth");
    assert_eq!(https[DOMAIN], "abc.dyndns.dappnode.io");
    assert_eq!(https["PORT"], "443");
    assert_eq!(
        std::fs::read(node.repo.compose_path(&id("geth.dnp.dappnode.eth"))).unwrap(),
        untouched
    );

    let report = &reports[0];
    assert!(report.env_file_written);
    assert_eq!(
        report.updated,
        vec![id("https.dnp.dappnode.eth"), id("vpn.dnp.dappnode.eth")]
    );
    let mut restarted = node.runtime.restarts.lock().unwrap().clone();
    restarted.sort();
    assert_eq!(restarted, report.updated);
}

#[tokio::test]
async fn env_file_is_written_once_per_set() {
    let node = node(FakeRuntime::default());
    install(&node.repo, "vpn.dnp.dappnode.eth", &[(DOMAIN, "a")]);
    let mut events = node.engine.subscribe_events();

    let first = node.store.set("DOMAIN", GlobalEnvValue::Text("b".into())).unwrap();
    let second = node.store.set("PUBLIC_IP", GlobalEnvValue::Text("1.2.3.4".into())).unwrap();
    let (seen, _) = collect_until_completed(&mut events, &[first.id, second.id]).await;

    for change in [first.id, second.id] {
        let writes = seen
            .iter()
            .filter(|e| matches!(e, PropagationEvent::EnvFileWritten { change: c, .. } if *c == change))
            .count();
        assert_eq!(writes, 1);
    }
    let contents = std::fs::read_to_string(&node.env_file).unwrap();
    assert_eq!(
        contents,
        "_DAPPNODE_GLOBAL_DOMAIN=b\n_DAPPNODE_GLOBAL_PUBLIC_IP=1.2.3.4\n"
    );
}

#[tokio::test]
async fn set_returns_before_propagation_and_never_fails_on_it() {
    let node = node(FakeRuntime {
        broken: BTreeSet::from(["vpn.dnp.dappnode.eth".to_string()]),
        ..FakeRuntime::default()
    });
    install(&node.repo, "vpn.dnp.dappnode.eth", &[(DOMAIN, "a")]);
    let mut events = node.engine.subscribe_events();

    let change = node.store.set("DOMAIN", GlobalEnvValue::Text("b".into()));
    assert!(change.is_ok());
    let (_, reports) = collect_until_completed(&mut events, &[change.unwrap().id]).await;
    assert_eq!(reports[0].failed.len(), 1);
    assert_eq!(
        node.store.get("DOMAIN").unwrap(),
        Some(GlobalEnvValue::Text("b".into()))
    );
}

// ── Concurrency ──────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sets_on_one_package_lose_no_update() {
    let node = node(FakeRuntime::default());
    let keys = ["DOMAIN", "PUBLIC_IP", "HOSTNAME", "SERVER_NAME", "PUBKEY", "ADDRESS"];
    let env: Vec<(String, String)> = keys
        .iter()
        .map(|k| (format!("_DAPPNODE_GLOBAL_{k}"), "initial".to_string()))
        .collect();
    let env_refs: Vec<(&str, &str)> = env.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    install(&node.repo, "vpn.dnp.dappnode.eth", &env_refs);
    let mut events = node.engine.subscribe_events();

    let changes: Vec<Uuid> = keys
        .iter()
        .map(|k| {
            node.store
                .set(k, GlobalEnvValue::Text(format!("{}-value", k.to_lowercase())))
                .unwrap()
                .id
        })
        .collect();
    let (_, reports) = collect_until_completed(&mut events, &changes).await;

    assert!(reports.iter().all(|r| r.failed.is_empty()));
    let env = env_of(&node.repo, "vpn.dnp.dappnode.eth");
    for key in keys {
        assert_eq!(
            env[&format!("_DAPPNODE_GLOBAL_{key}")],
            format!("{}-value", key.to_lowercase()),
            "{key}"
        );
    }
    let contents = std::fs::read_to_string(&node.env_file).unwrap();
    assert_eq!(contents.lines().count(), keys.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_sets_of_one_key_end_at_the_last_value() {
    for round in 0..10 {
        let node = node(FakeRuntime::default());
        install(&node.repo, "vpn.dnp.dappnode.eth", &[(DOMAIN, "initial")]);
        install(&node.repo, "https.dnp.dappnode.eth", &[(DOMAIN, "initial")]);
        let mut events = node.engine.subscribe_events();

        let changes: Vec<Uuid> = (0..30)
            .map(|i| {
                node.store
                    .set("DOMAIN", GlobalEnvValue::Text(format!("v{i}")))
                    .unwrap()
                    .id
            })
            .collect();
        let (_, reports) = collect_until_completed(&mut events, &changes).await;

        assert!(reports.iter().all(|r| r.failed.is_empty()), "round {round}");
        assert_eq!(
            node.store.get("DOMAIN").unwrap(),
            Some(GlobalEnvValue::Text("v29".into()))
        );
        assert_eq!(
            std::fs::read_to_string(&node.env_file).unwrap(),
            "_DAPPNODE_GLOBAL_DOMAIN=v29\n",
            "round {round}"
        );
        for name in ["vpn.dnp.dappnode.eth", "https.dnp.dappnode.eth"] {
            assert_eq!(env_of(&node.repo, name)[DOMAIN], "v29", "round {round}: {name}");
        }
    }
}

// ── Failure isolation ────────────────────────────────────────────────

#[tokio::test]
async fn failing_package_does_not_block_the_rest() {
    let node = node(FakeRuntime {
        broken: BTreeSet::from(["https.dnp.dappnode.eth".to_string()]),
        ..FakeRuntime::default()
    });
    install(&node.repo, "https.dnp.dappnode.eth", &[(DOMAIN, "a")]);
    install(&node.repo, "vpn.dnp.dappnode.eth", &[(DOMAIN, "a")]);
    let mut events = node.engine.subscribe_events();

    let change = node.store.set("DOMAIN", GlobalEnvValue::Text("b".into())).unwrap();
    let (seen, reports) = collect_until_completed(&mut events, &[change.id]).await;

    assert_eq!(reports[0].updated, vec![id("vpn.dnp.dappnode.eth")]);
    assert!(seen.iter().any(|e| matches!(
        e,
        PropagationEvent::PackageFailed { package, .. } if package.as_str() == "https.dnp.dappnode.eth"
    )));
    assert_eq!(env_of(&node.repo, "vpn.dnp.dappnode.eth")[DOMAIN], "b");
}
