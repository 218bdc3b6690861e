//! End-to-end tests of release fetching and compatibility resolution.
//!
//! Releases are published to the in-memory content store, fetched
//! recursively and checked by the resolver:
//! 1. Acyclic graphs of several shapes resolve and leave `resolving` false
//! 2. Self-referential chains fail with `CyclicDependency`
//! 3. Conflicting ranges between resolved packages are reported as data
//! 4. Fetch failures propagate to the caller

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use dnpm_common::config::{ConfigStore, DnpmConfig};
use dnpm_common::error::DnpmError;
use dnpm_common::types::{PackageId, PackageRequest};
use dnpm_release::store::memory::MemoryContentStore;
use dnpm_release::{DependencyResolver, ReleaseFetcher};
use serde_json::json;

fn publish(store: &MemoryContentStore, name: &str, version: &str, deps: &serde_json::Value) {
    let manifest = json!({
        "name": name,
        "version": version,
        "dependencies": deps,
        "image": {"environment": [], "volumes": [], "ports": []}
    });
    let hash = store.add_file(manifest.to_string());
    store.publish(
        &PackageId::new(name).unwrap(),
        semver::Version::parse(version).unwrap(),
        hash,
    );
}

fn fetcher(store: &Arc<MemoryContentStore>) -> ReleaseFetcher {
    ReleaseFetcher::new(
        store.clone(),
        store.clone(),
        Arc::new(ConfigStore::new(DnpmConfig::default())),
    )
}

fn resolver() -> DependencyResolver {
    DependencyResolver::new(semver::Version::new(0, 2, 0))
}

// ── Acyclic graphs ───────────────────────────────────────────────────

#[tokio::test]
async fn acyclic_graphs_resolve_and_stop_resolving() {
    // chain, wide fan-out, diamond, and a deep diamond
    let shapes: Vec<Vec<(&str, serde_json::Value)>> = vec![
        vec![
            ("p0", json!({"p1": "^1.0.0"})),
            ("p1", json!({"p2": "^1.0.0"})),
            ("p2", json!({"p3": "^1.0.0"})),
            ("p3", json!({})),
        ],
        vec![
            ("p0", json!({"p1": "latest", "p2": "latest", "p3": "latest", "p4": "latest"})),
            ("p1", json!({})),
            ("p2", json!({})),
            ("p3", json!({})),
            ("p4", json!({})),
        ],
        vec![
            ("p0", json!({"p1": "latest", "p2": "latest"})),
            ("p1", json!({"p3": "^1.0.0"})),
            ("p2", json!({"p3": "1.0.0"})),
            ("p3", json!({})),
        ],
        vec![
            ("p0", json!({"p1": "latest", "p2": "latest"})),
            ("p1", json!({"p3": "latest"})),
            ("p2", json!({"p3": "latest", "p4": "latest"})),
            ("p3", json!({"p5": "latest"})),
            ("p4", json!({"p5": "latest"})),
            ("p5", json!({})),
        ],
    ];

    for (index, shape) in shapes.iter().enumerate() {
        let store = Arc::new(MemoryContentStore::new());
        for (name, deps) in shape {
            publish(&store, name, "1.0.0", deps);
        }
        let set = fetcher(&store)
            .resolve_all(&PackageRequest::parse("p0").unwrap())
            .await
            .unwrap_or_else(|e| panic!("shape {index}: {e}"));
        assert_eq!(set.releases.len(), shape.len(), "shape {index}");

        let report = resolver().resolve(&set, &[]).unwrap();
        assert!(!report.resolving, "shape {index}");
        assert!(report.is_compatible, "shape {index}: {}", report.error);
        assert_eq!(report.dnps.len(), shape.len(), "shape {index}");
    }
}

// ── Cycles ───────────────────────────────────────────────────────────

#[tokio::test]
async fn self_referential_chains_fail_with_cycle() {
    let cycles: Vec<Vec<(&str, serde_json::Value)>> = vec![
        vec![("p0", json!({"p0": "latest"}))],
        vec![("p0", json!({"p1": "latest"})), ("p1", json!({"p0": "latest"}))],
        vec![
            ("p0", json!({"p1": "latest"})),
            ("p1", json!({"p2": "latest"})),
            ("p2", json!({"p3": "latest"})),
            ("p3", json!({"p1": "^1.0.0"})),
        ],
    ];

    for (index, shape) in cycles.iter().enumerate() {
        let store = Arc::new(MemoryContentStore::new());
        for (name, deps) in shape {
            publish(&store, name, "1.0.0", deps);
        }
        let err = fetcher(&store)
            .resolve_all(&PackageRequest::parse("p0").unwrap())
            .await
            .expect_err("cycle must fail");
        assert!(
            matches!(err, DnpmError::CyclicDependency { .. }),
            "shape {index}: {err}"
        );
    }
}

// ── Conflicts ────────────────────────────────────────────────────────

#[tokio::test]
async fn unsatisfied_range_inside_plan_is_incompatible() {
    let store = Arc::new(MemoryContentStore::new());
    publish(&store, "dependency.dnp.dappnode.eth", "0.0.1", &json!({}));
    publish(
        &store,
        "helper.dnp.dappnode.eth",
        "1.0.0",
        &json!({"dependency.dnp.dappnode.eth": "^0.1.0"}),
    );
    publish(
        &store,
        "main.dnp.dappnode.eth",
        "0.1.0",
        &json!({
            "dependency.dnp.dappnode.eth": "^0.0.1",
            "helper.dnp.dappnode.eth": "latest"
        }),
    );

    let set = fetcher(&store)
        .resolve_all(&PackageRequest::parse("main.dnp.dappnode.eth@0.1.0").unwrap())
        .await
        .unwrap();
    let report = resolver().resolve(&set, &[]).unwrap();

    assert!(!report.is_compatible);
    assert!(!report.error.is_empty());
    assert!(!report.resolving);
    assert!(report.error.contains("helper.dnp.dappnode.eth"), "{}", report.error);
}

// ── Fetch failures ───────────────────────────────────────────────────

#[tokio::test]
async fn unreachable_store_fails_the_whole_resolution() {
    let store = Arc::new(MemoryContentStore::new());
    publish(&store, "main", "1.0.0", &json!({}));
    store.set_latency(Some(std::time::Duration::from_millis(300)));
    let config = Arc::new(ConfigStore::new(DnpmConfig {
        fetch_timeout_ms: 30,
        ..DnpmConfig::default()
    }));
    let fetcher = ReleaseFetcher::new(store.clone(), store.clone(), config);

    let err = fetcher
        .resolve_all(&PackageRequest::parse("main").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, DnpmError::FetchTimeout { .. }), "{err}");
}
