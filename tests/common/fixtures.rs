//! Record fixtures and helpers.

use crd_replicator::labels::{REPLICATION_DESTINATION, REPLICATION_REQUESTED};
use crd_replicator::record::{Record, Section};
use crd_replicator::registry::RecordType;
use crd_replicator::store::memory::MemoryStore;
use crd_replicator::store::ObjectStore;
use serde_json::{json, Value};
use std::time::Duration;

pub const LOCAL_ID: &str = "cluster-a";
pub const REMOTE_ID: &str = "cluster-b";

/// Local tenant namespace holding records destined for `REMOTE_ID`.
pub const LOCAL_NS: &str = "tenant-b";

/// Namespace in the remote cluster where mirrors land.
pub const REMOTE_NS: &str = "tenant-a";

/// A type whose status is pushed from local to remote.
pub fn tenants() -> RecordType {
    RecordType::new("core.crd-replicator.io", "v1alpha1", "tenants")
}

/// A type whose status is pulled from remote to local.
pub fn slices() -> RecordType {
    RecordType::new("sharing.crd-replicator.io", "v1alpha1", "resourceslices")
}

/// A local record requesting replication to `REMOTE_ID`.
pub fn requested(name: &str) -> Record {
    requested_to(name, REMOTE_ID)
}

pub fn requested_to(name: &str, destination: &str) -> Record {
    Record::new(LOCAL_NS, name)
        .with_label(REPLICATION_REQUESTED, "true")
        .with_label(REPLICATION_DESTINATION, destination)
        .with_spec(json!({"size": 1, "owner": name}))
}

/// Read-modify-write that retries on optimistic-concurrency conflicts.
pub async fn modify(
    store: &MemoryStore,
    resource: &RecordType,
    namespace: &str,
    name: &str,
    mutate: impl Fn(&mut Record),
) -> Record {
    for _ in 0..50 {
        let mut record = store
            .peek(resource, namespace, name)
            .unwrap_or_else(|| panic!("{}/{} does not exist", namespace, name));
        mutate(&mut record);
        match store.update(resource, record).await {
            Ok(updated) => return updated,
            Err(e) if e.is_conflict() => tokio::time::sleep(Duration::from_millis(5)).await,
            Err(e) => panic!("update failed: {}", e),
        }
    }
    panic!("update of {}/{} kept conflicting", namespace, name);
}

/// Status write that retries on optimistic-concurrency conflicts.
pub async fn set_status(
    store: &MemoryStore,
    resource: &RecordType,
    namespace: &str,
    name: &str,
    status: Value,
) -> Record {
    for _ in 0..50 {
        let record = store
            .peek(resource, namespace, name)
            .unwrap_or_else(|| panic!("{}/{} does not exist", namespace, name))
            .with_status(status.clone());
        match store.update_status(resource, record).await {
            Ok(updated) => return updated,
            Err(e) if e.is_conflict() => tokio::time::sleep(Duration::from_millis(5)).await,
            Err(e) => panic!("status update failed: {}", e),
        }
    }
    panic!("status update of {}/{} kept conflicting", namespace, name);
}

/// Remove the status section, retrying on optimistic-concurrency conflicts.
pub async fn clear_status(store: &MemoryStore, resource: &RecordType, namespace: &str, name: &str) -> Record {
    for _ in 0..50 {
        let mut record = store
            .peek(resource, namespace, name)
            .unwrap_or_else(|| panic!("{}/{} does not exist", namespace, name));
        record.set_section(Section::Status, None);
        match store.update_status(resource, record).await {
            Ok(updated) => return updated,
            Err(e) if e.is_conflict() => tokio::time::sleep(Duration::from_millis(5)).await,
            Err(e) => panic!("status update failed: {}", e),
        }
    }
    panic!("status update of {}/{} kept conflicting", namespace, name);
}

/// Route engine logs to the test harness. Filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds, panicking after a few seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", what);
}

/// Give background workers time to act on anything still pending.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}
