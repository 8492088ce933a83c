//! Metrics for observability.
//!
//! Emitted through the `metrics` facade; the embedder installs whatever
//! recorder/exporter it wants. Without one, every call is a no-op.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `crd_replicator_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration)
//!
//! # Usage
//!
//! ```rust,no_run
//! use crd_replicator::metrics;
//! use std::time::Duration;
//!
//! metrics::record_reconcile("cluster-b", "tenants", "success", Duration::from_millis(3));
//! metrics::record_remote_write("cluster-b", "tenants", "create");
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record one handler invocation.
///
/// `outcome` is one of `success`, `conflict`, `error`.
pub fn record_reconcile(cluster_id: &str, resource: &str, outcome: &str, duration: Duration) {
    counter!(
        "crd_replicator_reconciles_total",
        "cluster_id" => cluster_id.to_string(),
        "resource" => resource.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
    histogram!(
        "crd_replicator_reconcile_duration_seconds",
        "cluster_id" => cluster_id.to_string(),
        "resource" => resource.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a write issued against the remote cluster (create, update, update_status, delete).
pub fn record_remote_write(cluster_id: &str, resource: &str, operation: &str) {
    counter!(
        "crd_replicator_remote_writes_total",
        "cluster_id" => cluster_id.to_string(),
        "resource" => resource.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a write issued against the local cluster (finalizer add/remove, status pull).
pub fn record_local_write(cluster_id: &str, resource: &str, operation: &str) {
    counter!(
        "crd_replicator_local_writes_total",
        "cluster_id" => cluster_id.to_string(),
        "resource" => resource.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a work item re-enqueued after a failure.
pub fn record_requeue(cluster_id: &str, resource: &str) {
    counter!(
        "crd_replicator_requeues_total",
        "cluster_id" => cluster_id.to_string(),
        "resource" => resource.to_string()
    )
    .increment(1);
}

/// Record a Forbidden response from the remote cluster.
pub fn record_forbidden(cluster_id: &str, resource: &str, operation: &str) {
    counter!(
        "crd_replicator_forbidden_total",
        "cluster_id" => cluster_id.to_string(),
        "resource" => resource.to_string(),
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a remote record left untouched because it lacks our markers.
pub fn record_foreign_remote(cluster_id: &str, resource: &str) {
    counter!(
        "crd_replicator_foreign_remote_total",
        "cluster_id" => cluster_id.to_string(),
        "resource" => resource.to_string()
    )
    .increment(1);
}

/// Set the number of keys waiting in a reflector's queue.
pub fn set_queue_depth(cluster_id: &str, depth: usize) {
    gauge!("crd_replicator_queue_depth", "cluster_id" => cluster_id.to_string()).set(depth as f64);
}

/// Set the number of record types actively reflected to a remote cluster.
pub fn set_reflected_types(cluster_id: &str, count: usize) {
    gauge!("crd_replicator_reflected_types", "cluster_id" => cluster_id.to_string()).set(count as f64);
}

/// Set the number of attached remote clusters.
pub fn set_attached_remotes(count: usize) {
    gauge!("crd_replicator_attached_remotes").set(count as f64);
}

/// Set engine state (one gauge per state, only the current one is 1).
pub fn set_engine_state(state: &str) {
    for candidate in ["Created", "Running", "ShuttingDown", "Stopped"] {
        let value = if candidate == state { 1.0 } else { 0.0 };
        gauge!("crd_replicator_engine_state", "state" => candidate).set(value);
    }
}
