//! End-to-end tests of install planning on a node.
//!
//! Every test opens a `DnpmNode` over a temporary data directory, with
//! releases published to the in-memory content store:
//! 1. A manifest release with a dependency owning a shared volume
//! 2. A dependency range conflicting with an already resolved release
//! 3. A directory release carrying its own compose, wizard and disclaimer
//! 4. Structural failures (cycles, timeouts) returned as errors
//! 5. A global env change reaching an installed package

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dnpm_common::config::DnpmConfig;
use dnpm_common::error::{DnpmError, Result};
use dnpm_common::types::{ContentHash, PackageId, VersionSelector};
use dnpm_compose::labels::ServiceDefaults;
use dnpm_compose::{ComposeEditor, ContainerGroupSpec, ServiceSpec, UserSettings, VolumeDefinition};
use dnpm_env::{ContainerRuntime, GlobalEnvValue, PropagationEvent};
use dnpm_release::store::memory::MemoryContentStore;
use dnpm_sdk::availability::ResourceProbe;
use dnpm_sdk::node::{Backends, DnpmNode};
use serde_json::json;

const MAIN: &str = "main.dnp.dappnode.eth";
const DEP: &str = "dependency.dnp.dappnode.eth";
const AVATAR: &str = "/ipfs/QmNrfF93ppvjDGeabQH8H8eeCDLci2F8fptkvj94WN78pt";

struct NoopRuntime;

#[async_trait]
impl ContainerRuntime for NoopRuntime {
    async fn restart(&self, _package: &PackageId, _compose_path: &Path) -> Result<()> {
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }
}

struct FreeDisk(u64);

impl ResourceProbe for FreeDisk {
    fn available_bytes(&self, _path: &Path) -> Result<u64> {
        Ok(self.0)
    }
}

struct Host {
    dir: tempfile::TempDir,
    store: Arc<MemoryContentStore>,
    node: DnpmNode,
}

fn host_with_disk(free: u64) -> Host {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryContentStore::new());
    let config = DnpmConfig {
        min_free_disk_bytes: 1024,
        ..DnpmConfig::rooted_at(dir.path())
    };
    let node = DnpmNode::with_backends(
        config,
        Backends {
            store: store.clone(),
            registry: store.clone(),
            runtime: Arc::new(NoopRuntime),
            probe: Arc::new(FreeDisk(free)),
        },
    )
    .unwrap();
    Host { dir, store, node }
}

fn host() -> Host {
    host_with_disk(u64::MAX)
}

fn id(name: &str) -> PackageId {
    PackageId::new(name).unwrap()
}

fn publish(store: &MemoryContentStore, manifest: &serde_json::Value) -> ContentHash {
    let hash = store.add_file(manifest.to_string());
    store.publish(
        &id(manifest["name"].as_str().unwrap()),
        semver::Version::parse(manifest["version"].as_str().unwrap()).unwrap(),
        hash.clone(),
    );
    hash
}

fn wizard(field: &str, env: &str) -> serde_json::Value {
    json!({
        "version": "2",
        "fields": [{
            "id": field,
            "target": {"type": "environment", "name": env},
            "title": field,
            "description": format!("{field} description")
        }]
    })
}

// ── Scenario 1: manifest release with dependencies ───────────────────

#[tokio::test]
async fn manifest_release_with_shared_volume_dependency() {
    let host = host();
    let custom_bind = host.dir.path().join("dev1").display().to_string();
    let mountpoint = host.dir.path().join("dev0").display().to_string();

    let dep_hash = publish(
        &host.store,
        &json!({
            "name": DEP,
            "version": "0.0.1",
            "image": {
                "size": 100,
                "environment": ["DEP_ENV=DEP_ORIGINAL"],
                "volumes": ["data:/usr"],
                "ports": ["2222:2222"]
            },
            "setupWizard": wizard("dependencyVar", "DEP_VAR")
        }),
    );
    let main_hash = publish(
        &host.store,
        &json!({
            "name": MAIN,
            "version": "0.1.0",
            "avatar": AVATAR,
            "dependencies": {DEP: dep_hash.to_string()},
            "image": {
                "size": 2048,
                "environment": ["ENV_DEFAULT=ORIGINAL"],
                "volumes": ["data0:/usr0", "data1:/usr1", "data2:/usr2"],
                "external_vol": ["dependencydnpdappnodeeth_data:/usrdep"],
                "ports": ["1111:1111"]
            },
            "setupWizard": wizard("payoutAddress", "PAYOUT_ADDRESS")
        }),
    );

    // previously installed main: one user env var, one user bind, one
    // named volume moved to another disk
    let mut labels = BTreeMap::new();
    ServiceDefaults {
        environment: BTreeMap::new(),
        ports: Vec::new(),
        volumes: vec!["data0:/usr0".into(), "data1:/usr1".into()],
    }
    .write(&mut labels);
    let previous = ContainerGroupSpec {
        version: "3.4".into(),
        services: BTreeMap::from([(
            MAIN.to_string(),
            ServiceSpec {
                container_name: Some(format!("DAppNodePackage-{MAIN}")),
                image: format!("{MAIN}:0.1.0"),
                environment: BTreeMap::from([("PREVIOUS_SET".into(), "PREV_VAL".into())]),
                volumes: vec!["data0:/usr0".into(), format!("{custom_bind}:/usr1")],
                labels,
                ..ServiceSpec::default()
            },
        )]),
        volumes: BTreeMap::from([
            (
                "data0".to_string(),
                serde_yaml::from_str::<VolumeDefinition>(&format!(
                    "driver_opts:\n  device: {mountpoint}/dappnode-volumes/{MAIN}/data0\n  o: bind\n  type: none\n"
                ))
                .unwrap(),
            ),
            ("data1".to_string(), VolumeDefinition::default()),
        ]),
        ..ContainerGroupSpec::default()
    };
    let compose_path = host.node.repository().compose_path(&id(MAIN));
    ComposeEditor::new(previous).write(&compose_path).unwrap();
    let on_disk = std::fs::read(&compose_path).unwrap();

    let plan = host.node.planner().plan(&main_hash.to_string()).await.unwrap();

    assert_eq!(plan.name, id(MAIN));
    assert_eq!(plan.req_version, main_hash.to_string());
    assert_eq!(plan.sem_version, semver::Version::new(0, 1, 0));
    assert_eq!(plan.origin, Some(main_hash.clone()));
    assert_eq!(
        plan.avatar_url.as_deref(),
        Some(format!("http://ipfs.dappnode:8080{AVATAR}").as_str())
    );
    assert_eq!(plan.metadata.name, id(MAIN));
    assert_eq!(plan.metadata.kind, "service");
    assert_eq!(
        plan.metadata.dependencies[&id(DEP)],
        VersionSelector::Hash(dep_hash.clone())
    );
    assert_eq!(plan.image_size, 2048);
    assert!(plan.is_installed);
    assert!(!plan.is_updated);

    // permissions
    assert!(plan.special_permissions[&id(DEP)].is_empty());
    let main_permissions = &plan.special_permissions[&id(MAIN)];
    assert_eq!(main_permissions.len(), 1);
    assert_eq!(main_permissions[0].name, "Access to package volume");
    assert!(main_permissions[0].details.contains("dependencydnpdappnodeeth_data"));
    assert!(main_permissions[0].details.ends_with(DEP));
    assert_eq!(main_permissions[0].service_name, MAIN);

    // wizards of both packages
    assert_eq!(plan.setup_wizard.len(), 2);
    assert_eq!(plan.setup_wizard[&id(MAIN)].fields[0].target.name, "PAYOUT_ADDRESS");
    assert_eq!(plan.setup_wizard[&id(DEP)].fields[0].target.name, "DEP_VAR");

    // settings merged against the previous install
    let main = &plan.settings[&id(MAIN)];
    assert_eq!(main.environment["ENV_DEFAULT"], "ORIGINAL");
    assert_eq!(main.environment["PREVIOUS_SET"], "PREV_VAL");
    assert_eq!(main.port_mappings["1111/TCP"], "1111");
    assert_eq!(main.named_volume_mountpoints["data0"], mountpoint);
    assert_eq!(main.named_volume_mountpoints["data1"], "");
    assert_eq!(main.named_volume_mountpoints["data2"], "");
    assert!(!main.named_volume_mountpoints.contains_key("dependencydnpdappnodeeth_data"));
    assert_eq!(main.legacy_bind_volumes["data1"], custom_bind);
    let dep = &plan.settings[&id(DEP)];
    assert_eq!(dep.environment["DEP_ENV"], "DEP_ORIGINAL");
    assert_eq!(dep.port_mappings["2222/TCP"], "2222");
    assert_eq!(dep.named_volume_mountpoints["data"], "");
    assert!(dep.legacy_bind_volumes.is_empty());

    // compatibility
    let compatible = &plan.request.compatible;
    assert!(compatible.is_compatible);
    assert!(!compatible.requires_core_update);
    assert!(!compatible.resolving);
    assert_eq!(compatible.error, "");
    assert_eq!(compatible.dnps[&id(MAIN)].from.as_deref(), Some("0.1.0"));
    assert_eq!(compatible.dnps[&id(MAIN)].to, main_hash.to_string());
    assert_eq!(compatible.dnps[&id(DEP)].from, None);
    assert_eq!(compatible.dnps[&id(DEP)].to, dep_hash.to_string());
    assert!(plan.request.available.is_available);
    assert_eq!(plan.request.available.message, "");

    // planning is read-only
    assert_eq!(std::fs::read(&compose_path).unwrap(), on_disk);
    assert!(!host.node.repository().compose_path(&id(DEP)).exists());

    // serialized in the camelCase plan schema
    let value = serde_json::to_value(&plan).unwrap();
    assert_eq!(value["semVersion"], "0.1.0");
    assert_eq!(value["request"]["compatible"]["isCompatible"], true);
    assert_eq!(value["request"]["available"]["isAvailable"], true);
    assert_eq!(value["settings"][MAIN]["portMappings"]["1111/TCP"], "1111");
    assert_eq!(value["specialPermissions"][MAIN][0]["serviceName"], MAIN);
    assert!(value["request"]["compatible"]["dnps"][DEP].get("from").is_none());
}

// ── Scenario 2: conflicting range ────────────────────────────────────

#[tokio::test]
async fn unsatisfied_range_is_reported_in_the_plan() {
    let host = host();
    for version in ["0.0.1", "0.1.0"] {
        let _ = publish(&host.store, &json!({"name": DEP, "version": version, "image": {}}));
    }
    let _ = publish(
        &host.store,
        &json!({
            "name": "helper.dnp.dappnode.eth",
            "version": "1.0.0",
            "dependencies": {DEP: "^0.1.0"},
            "image": {}
        }),
    );
    let _ = publish(
        &host.store,
        &json!({
            "name": MAIN,
            "version": "0.1.0",
            "dependencies": {DEP: "0.0.1", "helper.dnp.dappnode.eth": "latest"},
            "image": {}
        }),
    );

    let plan = host.node.planner().plan(MAIN).await.unwrap();
    let compatible = &plan.request.compatible;
    assert!(!compatible.is_compatible);
    assert!(!compatible.resolving);
    assert!(!compatible.error.is_empty());
    assert!(compatible.error.contains(DEP), "{}", compatible.error);
    assert_eq!(plan.settings.len(), 3);
    assert!(!plan.is_installed);
}

#[tokio::test]
async fn newer_core_requirement_is_flagged() {
    let host = host();
    let _ = publish(
        &host.store,
        &json!({
            "name": MAIN,
            "version": "0.1.0",
            "requirements": {"minimumDappnodeVersion": "9.0.0"},
            "image": {}
        }),
    );
    let plan = host.node.planner().plan(MAIN).await.unwrap();
    assert!(plan.request.compatible.requires_core_update);
    assert!(!plan.request.compatible.is_compatible);
}

#[tokio::test]
async fn low_disk_space_does_not_hide_compatibility() {
    let host = host_with_disk(1000);
    let _ = publish(
        &host.store,
        &json!({"name": MAIN, "version": "0.1.0", "image": {"size": 10}}),
    );
    let plan = host.node.planner().plan(MAIN).await.unwrap();
    assert!(plan.request.compatible.is_compatible);
    assert!(!plan.request.available.is_available);
    assert!(!plan.request.available.message.is_empty());
}

// ── Scenario 3: directory release ────────────────────────────────────

#[tokio::test]
async fn directory_release_files_are_used() {
    let host = host();
    let disclaimer = "Warning!\n\nThis is really dangerous";
    let compose = format!(
        "version: '3.4'\nservices:\n  {MAIN}:\n    container_name: DAppNodePackage-{MAIN}\n    image: {MAIN}:0.1.0\n"
    );
    let manifest = json!({"name": MAIN, "version": "0.1.0", "avatar": AVATAR});
    let hash = host.store.add_directory([
        ("dappnode_package.json", manifest.to_string().into_bytes()),
        ("docker-compose.yml", compose.into_bytes()),
        ("setup-wizard.json", wizard("mockVar", "MOCK_VAR").to_string().into_bytes()),
        ("disclaimer.md", disclaimer.as_bytes().to_vec()),
        ("avatar.png", b"\x89PNG avatar".to_vec()),
        ("main.dnp.dappnode.eth_0.1.0.tar.xz", vec![0_u8; 64]),
    ]);
    let avatar = host.store.add_file(b"\x89PNG avatar".to_vec());

    let plan = host.node.planner().plan(&hash.to_string()).await.unwrap();

    assert_eq!(plan.origin, Some(hash.clone()));
    assert_eq!(
        plan.avatar_url.as_deref(),
        Some(format!("http://ipfs.dappnode:8080{avatar}").as_str())
    );
    assert_eq!(
        plan.metadata.disclaimer.as_ref().map(|d| d.message.as_str()),
        Some(disclaimer)
    );
    assert_eq!(plan.setup_wizard[&id(MAIN)].fields[0].id, "mockVar");
    assert!(plan.special_permissions[&id(MAIN)].is_empty());
    assert_eq!(plan.settings[&id(MAIN)], UserSettings::default());
    assert_eq!(plan.image_size, 64);
    assert!(plan.request.compatible.is_compatible);
    assert_eq!(plan.request.compatible.dnps[&id(MAIN)].to, hash.to_string());
}

// ── Structural failures ──────────────────────────────────────────────

#[tokio::test]
async fn dependency_cycle_fails_the_plan() {
    let host = host();
    let _ = publish(&host.store, &json!({"name": MAIN, "version": "0.1.0", "dependencies": {DEP: "latest"}, "image": {}}));
    let _ = publish(&host.store, &json!({"name": DEP, "version": "0.0.1", "dependencies": {MAIN: "latest"}, "image": {}}));

    let err = host.node.planner().plan(MAIN).await.unwrap_err();
    assert!(matches!(err, DnpmError::CyclicDependency { .. }), "{err}");
}

#[tokio::test]
async fn slow_store_times_out_after_live_change() {
    let host = host();
    let _ = publish(&host.store, &json!({"name": MAIN, "version": "0.1.0", "image": {}}));
    host.store.set_latency(Some(std::time::Duration::from_millis(500)));
    host.node.config().set_fetch_timeout(Some(20)).unwrap();

    let err = host.node.planner().plan(MAIN).await.unwrap_err();
    assert!(matches!(err, DnpmError::FetchTimeout { .. }), "{err}");
}

#[tokio::test]
async fn unknown_package_is_not_found() {
    let host = host();
    let err = host.node.planner().plan("ghost.dnp.dappnode.eth").await.unwrap_err();
    assert!(matches!(err, DnpmError::NotFound { .. }), "{err}");
}

// ── Global env through the node ──────────────────────────────────────

#[tokio::test]
async fn env_set_on_node_reaches_installed_package() {
    let host = host();
    let _ = publish(
        &host.store,
        &json!({
            "name": MAIN,
            "version": "0.1.0",
            "image": {"environment": ["_DAPPNODE_GLOBAL_DOMAIN=old.dyndns.dappnode.io"]}
        }),
    );
    let plan = host.node.planner().plan(MAIN).await.unwrap();
    assert_eq!(plan.settings[&id(MAIN)].environment["_DAPPNODE_GLOBAL_DOMAIN"], "old.dyndns.dappnode.io");
    let release = dnpm_release::ReleaseFetcher::new(
        host.store.clone(),
        host.store.clone(),
        host.node.config().clone(),
    )
    .resolve(&dnpm_common::types::PackageRequest::parse(MAIN).unwrap())
    .await
    .unwrap();
    host.node
        .repository()
        .write_spec(&id(MAIN), &release.compose_for_install(None))
        .await
        .unwrap();

    let mut events = host.node.engine().subscribe_events();
    let change = host
        .node
        .envs()
        .set("DOMAIN", GlobalEnvValue::Text("new.dyndns.dappnode.io".into()))
        .unwrap();
    let report = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        loop {
            if let PropagationEvent::Completed(report) = events.recv().await.unwrap() {
                if report.change == change.id {
                    return report;
                }
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(report.updated, vec![id(MAIN)]);
    let installed = host.node.repository().get_by_id(&id(MAIN)).unwrap().unwrap();
    assert_eq!(installed.settings.environment["_DAPPNODE_GLOBAL_DOMAIN"], "new.dyndns.dappnode.io");
    let env_file = std::fs::read_to_string(host.dir.path().join("dnp_repo").join("dnp.dappnode.global.env")).unwrap();
    assert_eq!(env_file, "_DAPPNODE_GLOBAL_DOMAIN=new.dyndns.dappnode.io\n");
}
