//! Registry operation tests: entries, revisions, transactions, lifecycle.

mod common;

use bytes::Bytes;
use std::sync::Arc;
use trellis::core::error::RegistryError;
use trellis::registry::txn::{CasOutcome, Compare, CompareResult, Expected, Txn, TxnOp};
use trellis::registry::{CoordinationStore, Registry};
use trellis::Config;

// ============================================================================
// Entry tests
// ============================================================================

#[tokio::test]
async fn put_get_delete() {
    let registry = common::open_registry();

    let rev = registry.put("john-mccarthy", "Artificial Intelligence").unwrap();
    assert_eq!(rev, 1);

    let entry = registry.get("john-mccarthy").unwrap();
    assert_eq!(entry.key, "john-mccarthy");
    assert_eq!(entry.value, Bytes::from_static(b"Artificial Intelligence"));
    assert_eq!(entry.revision, rev);
    assert_eq!(entry.create_revision, rev);
    assert_eq!(entry.version, 1);
    assert_eq!(entry.lease, None);

    assert!(registry.delete("john-mccarthy").unwrap());
    assert!(!registry.delete("john-mccarthy").unwrap());
    assert_eq!(
        registry.get("john-mccarthy").unwrap_err(),
        RegistryError::not_found("john-mccarthy")
    );
    assert_eq!(registry.current_revision(), 2);
}

#[tokio::test]
async fn overwrite_tracks_version_and_create_revision() {
    let registry = common::open_registry();
    let r1 = registry.put("k", "1").unwrap();
    registry.put("other", "x").unwrap();
    let r3 = registry.put("k", "2").unwrap();

    let entry = registry.get("k").unwrap();
    assert_eq!(entry.revision, r3);
    assert_eq!(entry.create_revision, r1);
    assert_eq!(entry.version, 2);
}

#[tokio::test]
async fn empty_key_is_invalid() {
    let registry = common::open_registry();
    let err = registry.put("", "v").unwrap_err();
    assert_eq!(err.code(), "InvalidRequest");
    assert_eq!(registry.current_revision(), 0);
}

#[tokio::test]
async fn get_prefix_is_ordered() {
    let registry = common::open_registry();
    for key in ["b/2", "a/9", "b/1", "c/1", "b/10"] {
        registry.put(key, key).unwrap();
    }

    let keys: Vec<String> = registry
        .get_prefix("b/")
        .unwrap()
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(keys, vec!["b/1", "b/10", "b/2"]);

    assert_eq!(registry.get_prefix("").unwrap().len(), 5);
    assert_eq!(registry.count_prefix("b/").unwrap(), 3);
    assert!(registry.get_prefix("z/").unwrap().is_empty());
}

#[tokio::test]
async fn delete_prefix_assigns_one_revision_per_key() {
    let registry = common::open_registry();
    registry.put("a/1", "x").unwrap();
    registry.put("a/2", "x").unwrap();
    registry.put("b/1", "x").unwrap();
    let before = registry.current_revision();

    assert_eq!(registry.delete_prefix("a/").unwrap(), 2);
    assert_eq!(registry.current_revision(), before + 2);
    assert_eq!(registry.count_prefix("a/").unwrap(), 0);
    assert!(registry.get("b/1").is_ok());

    assert_eq!(registry.delete_prefix("a/").unwrap(), 0);
    assert_eq!(registry.current_revision(), before + 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delete_prefix_is_all_or_nothing_for_readers() {
    const KEYS: usize = 64;
    const READERS: usize = 3;

    let registry = Arc::new(common::open_registry());
    for i in 0..KEYS {
        registry.put(&format!("p/{:03}", i), "x").unwrap();
    }
    registry.put("q/keep", "x").unwrap();

    let barrier = Arc::new(tokio::sync::Barrier::new(READERS + 1));
    let mut readers = Vec::new();
    for _ in 0..READERS {
        let registry = registry.clone();
        let barrier = barrier.clone();
        readers.push(tokio::spawn(async move {
            barrier.wait().await;
            let mut observed = Vec::new();
            loop {
                let entries = registry.get_prefix("p/").unwrap();
                // Every entry in one read comes from the same snapshot.
                let revisions: Vec<u64> = entries.iter().map(|e| e.revision).collect();
                assert!(revisions.windows(2).all(|w| w[0] < w[1]));
                observed.push(entries.len());
                if entries.is_empty() {
                    break observed;
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    barrier.wait().await;
    tokio::task::yield_now().await;
    assert_eq!(registry.delete_prefix("p/").unwrap(), KEYS);

    for reader in readers {
        let observed = reader.await.unwrap();
        assert!(
            observed.iter().all(|&n| n == KEYS || n == 0),
            "partial prefix observed: {:?}",
            observed
        );
        assert_eq!(observed.last().copied(), Some(0));
    }
    assert_eq!(registry.count_prefix("q/").unwrap(), 1);
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let a = Registry::open(Config::builder().namespace("/a/").build().unwrap()).unwrap();
    let b = Registry::open(Config::builder().namespace("/b/").build().unwrap()).unwrap();

    a.put("k", "from-a").unwrap();
    assert!(b.get("k").is_err());
    assert_eq!(a.namespace().prefix(), "/a/");
    assert_eq!(b.current_revision(), 0);
}

// ============================================================================
// Transaction tests
// ============================================================================

#[tokio::test]
async fn cas_scenario() {
    let registry = common::open_registry();

    let r1 = registry.put("a/x", "1").unwrap();
    let r2 = registry.put("a/x", "2").unwrap();
    assert!(r2 > r1);

    let failed = registry.compare_and_swap("a/x", "1", "3").unwrap();
    assert_eq!(
        failed,
        CasOutcome::Failed {
            current: Some(Bytes::from_static(b"2"))
        }
    );
    assert_eq!(registry.current_revision(), r2);

    let succeeded = registry.compare_and_swap("a/x", "2", "3").unwrap();
    assert!(succeeded.succeeded());

    let entry = registry.get("a/x").unwrap();
    assert_eq!(entry.value, Bytes::from_static(b"3"));
    assert!(entry.revision > r2);
}

#[tokio::test]
async fn cas_on_absent_key() {
    let registry = common::open_registry();

    let outcome = registry.compare_and_swap("lock", "anything", "me").unwrap();
    assert_eq!(outcome, CasOutcome::Failed { current: None });

    let outcome = registry.compare_and_swap("lock", Expected::Absent, "me").unwrap();
    let rev = outcome.into_result("lock").unwrap();
    assert_eq!(registry.get("lock").unwrap().revision, rev);

    let err = registry
        .compare_and_swap("lock", Expected::Absent, "you")
        .unwrap()
        .into_result("lock")
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::CasFailed {
            key: "lock".to_string(),
            current: Some(Bytes::from_static(b"me"))
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cas_has_exactly_one_winner() {
    let registry = Arc::new(common::open_registry());
    registry.put("a/x", "1").unwrap();

    let mut handles = Vec::new();
    for i in 0..32 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry
                .compare_and_swap("a/x", "1", format!("writer-{}", i))
                .unwrap()
        }));
    }

    let mut succeeded = 0;
    let mut failed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            CasOutcome::Succeeded { .. } => succeeded += 1,
            CasOutcome::Failed { current } => {
                assert_ne!(current, Some(Bytes::from_static(b"1")));
                failed += 1;
            }
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(failed, 31);
    assert_eq!(registry.get("a/x").unwrap().version, 2);
}

#[tokio::test]
async fn txn_else_branch_and_revision_compares() {
    let registry = common::open_registry();
    let rev = registry.put("cfg", "v1").unwrap();

    let resp = registry
        .commit(
            Txn::on("cfg")
                .when(Compare::mod_revision(CompareResult::Greater, rev))
                .and_then(TxnOp::put("never"))
                .or_else(TxnOp::Delete),
        )
        .unwrap();
    assert!(!resp.succeeded);
    assert_eq!(resp.current, Some(Bytes::from_static(b"v1")));
    assert_eq!(resp.revision, rev + 1);
    assert!(registry.get("cfg").is_err());

    let resp = registry
        .commit(
            Txn::on("cfg")
                .when(Compare::absent())
                .when(Compare::version(CompareResult::Equal, 0))
                .and_then(TxnOp::put("v2")),
        )
        .unwrap();
    assert!(resp.succeeded);
    assert_eq!(resp.current, None);
    assert_eq!(registry.get("cfg").unwrap().version, 1);
}

#[tokio::test]
async fn txn_with_unknown_lease_changes_nothing() {
    let registry = common::open_registry();
    registry.put("k", "v").unwrap();
    let before = registry.current_revision();

    let err = registry
        .commit(
            Txn::on("k")
                .when(Compare::present())
                .and_then(TxnOp::put_with_lease("w", trellis::LeaseId(99))),
        )
        .unwrap_err();
    assert_eq!(
        err,
        RegistryError::LeaseNotFound {
            lease_id: trellis::LeaseId(99)
        }
    );
    assert_eq!(registry.current_revision(), before);
    assert_eq!(registry.get("k").unwrap().value, Bytes::from_static(b"v"));
}

// ============================================================================
// Backend seam tests
// ============================================================================

fn bump<S: CoordinationStore>(store: &S, key: &str) -> u64 {
    let current = store.get(key).map(|e| e.value).ok();
    let next = current
        .as_ref()
        .and_then(|v| std::str::from_utf8(v).ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    let expected = match current {
        Some(v) => Expected::Value(v),
        None => Expected::Absent,
    };
    store
        .compare_and_swap(key, expected, Bytes::from(next.to_string()))
        .unwrap()
        .into_result(key)
        .unwrap();
    next
}

#[tokio::test]
async fn registry_implements_coordination_store() {
    let registry = common::open_registry();
    assert_eq!(registry.namespace_prefix(), common::TEST_NAMESPACE);

    assert_eq!(bump(&registry, "counter"), 1);
    assert_eq!(bump(&registry, "counter"), 2);
    assert_eq!(CoordinationStore::current_revision(&registry).unwrap(), 2);
}

// ============================================================================
// Lifecycle tests
// ============================================================================

#[tokio::test]
async fn operations_fail_after_shutdown() {
    let registry = common::open_registry();
    registry.put("k", "v").unwrap();

    registry.shutdown().await;
    assert!(registry.is_closed());

    assert_eq!(registry.put("k", "w").unwrap_err().code(), "Unavailable");
    assert_eq!(registry.get("k").unwrap_err().code(), "Unavailable");
    assert_eq!(registry.watch("").unwrap_err().code(), "Unavailable");
    assert_eq!(registry.sweep_expired().unwrap_err().code(), "Unavailable");
    assert!(CoordinationStore::current_revision(&registry).is_err());

    // Idempotent.
    registry.shutdown().await;
}

#[test]
fn open_requires_runtime() {
    let err = Registry::open(Config::default()).unwrap_err();
    assert_eq!(err.code(), "Unavailable");
}

#[tokio::test]
async fn open_rejects_invalid_config() {
    let mut config = Config::default();
    config.namespace.prefix = "missing-slash".to_string();
    let err = Registry::open(config).unwrap_err();
    assert_eq!(err.code(), "InvalidRequest");
}

#[tokio::test]
async fn stats_reflect_state() {
    let registry = common::open_registry();
    registry.put("a", "1").unwrap();
    let lease = registry
        .grant_lease(std::time::Duration::from_secs(10))
        .unwrap();
    registry.put_with_lease("b", "2", lease.id).unwrap();
    let _watch = registry.watch("").unwrap();

    let stats = registry.stats();
    assert_eq!(stats.revision, 2);
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.active_leases, 1);
    assert_eq!(stats.bound_keys, 1);
    assert_eq!(stats.watches, 1);
    assert_eq!(stats.watch_overruns, 0);
}
