//! Label, annotation and finalizer vocabulary.
//!
//! Labels are the only trust and anti-loop mechanism between clusters:
//!
//! - A local record opts in with [`REPLICATION_REQUESTED`]` = true` and names
//!   its target with [`REPLICATION_DESTINATION`].
//! - The mirror created remotely drops both of those and is stamped with
//!   [`REPLICATION_ORIGIN`]` = <local cluster>` and [`REPLICATION_STATUS`]` = true`.
//!   Because the requested label is gone, the remote side's own dispatcher
//!   never picks the mirror up again.
//! - The engine only ever mutates remote records carrying its own origin and
//!   status markers.
//!
//! The two public selector builders, [`replication_requested_selector`] and
//! [`replicated_selector`], are consumed by other controllers to tell trusted
//! mirrors apart from locally-originated records.

use crate::record::{ObjectMeta, Record, Section};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Set to `"true"` by a record's owner to request replication.
pub const REPLICATION_REQUESTED: &str = "crd-replicator.io/replication";

/// Identity of the cluster the record should be replicated to.
pub const REPLICATION_DESTINATION: &str = "crd-replicator.io/destination";

/// Identity of the cluster a mirror was replicated from.
pub const REPLICATION_ORIGIN: &str = "crd-replicator.io/origin";

/// Stamped `"true"` on every mirror created by the engine.
pub const REPLICATION_STATUS: &str = "crd-replicator.io/replicated";

/// Local-only ownership hint, never propagated to a mirror.
pub const LOCAL_OWNERSHIP_HINT: &str = "crd-replicator.io/local-resource";

/// Finalizer held on local records while a mirror may exist.
pub const FINALIZER: &str = "crd-replicator.io/finalizer";

const TRUE: &str = "true";

/// A single label requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Requirement {
    /// The label exists with exactly this value.
    Equals(String, String),
    /// The label exists with any value.
    Exists(String),
}

impl Requirement {
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::Exists(key) => labels.contains_key(key),
        }
    }
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Requirement::Equals(k, v) => write!(f, "{}={}", k, v),
            Requirement::Exists(k) => write!(f, "{}", k),
        }
    }
}

/// Conjunction of label requirements. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    pub fn everything() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.push(Requirement::Equals(key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.requirements.push(Requirement::Exists(key.into()));
        self
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    pub fn matches_record(&self, record: &Record) -> bool {
        self.matches(&record.metadata.labels)
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.requirements.iter().map(|r| r.to_string()).collect();
        f.write_str(&parts.join(","))
    }
}

/// Local records awaiting replication to any cluster.
pub fn replication_requested_selector() -> LabelSelector {
    LabelSelector::everything()
        .equals(REPLICATION_REQUESTED, TRUE)
        .exists(REPLICATION_DESTINATION)
}

/// Local records awaiting replication to one specific cluster.
pub fn replication_requested_for(destination: &str) -> LabelSelector {
    LabelSelector::everything()
        .equals(REPLICATION_REQUESTED, TRUE)
        .equals(REPLICATION_DESTINATION, destination)
}

/// Mirrors created by this engine, from any origin.
pub fn replicated_selector() -> LabelSelector {
    LabelSelector::everything()
        .exists(REPLICATION_ORIGIN)
        .equals(REPLICATION_STATUS, TRUE)
}

/// Mirrors created by this engine on behalf of `origin`.
pub fn replicated_from(origin: &str) -> LabelSelector {
    LabelSelector::everything()
        .equals(REPLICATION_ORIGIN, origin)
        .equals(REPLICATION_STATUS, TRUE)
}

/// Whether the record's owner currently requests replication.
pub fn is_replication_requested(record: &Record) -> bool {
    record.labels().get(REPLICATION_REQUESTED).map(String::as_str) == Some(TRUE)
}

/// The destination cluster named by a local record, if any.
pub fn destination(record: &Record) -> Option<&str> {
    record.labels().get(REPLICATION_DESTINATION).map(String::as_str)
}

/// Whether `record` is a mirror created by this engine on behalf of `origin`.
pub fn is_managed_mirror(record: &Record, origin: &str) -> bool {
    replicated_from(origin).matches_record(record)
}

/// Remove the local-only ownership hint from labels and annotations.
///
/// Returns `true` if anything was removed.
pub fn strip_ownership_hint(meta: &mut ObjectMeta) -> bool {
    let from_labels = meta.labels.remove(LOCAL_OWNERSHIP_HINT).is_some();
    let from_annotations = meta.annotations.remove(LOCAL_OWNERSHIP_HINT).is_some();
    from_labels || from_annotations
}

/// Label set for a mirror derived from a local record's labels.
pub fn labels_for_remote_creation(
    local: &BTreeMap<String, String>,
    origin: &str,
) -> BTreeMap<String, String> {
    let mut labels = local.clone();
    labels.remove(REPLICATION_REQUESTED);
    labels.remove(REPLICATION_DESTINATION);
    labels.remove(LOCAL_OWNERSHIP_HINT);
    labels.insert(REPLICATION_ORIGIN.to_string(), origin.to_string());
    labels.insert(REPLICATION_STATUS.to_string(), TRUE.to_string());
    labels
}

/// Derive a fresh mirror for `local`, placed in `remote_namespace`.
///
/// Only the `spec` section is copied. Server-managed metadata (version, uid,
/// finalizers, deletion marker) is left empty.
pub fn remote_copy(local: &Record, origin: &str, remote_namespace: &str) -> Record {
    let mut annotations = local.metadata.annotations.clone();
    annotations.remove(LOCAL_OWNERSHIP_HINT);

    let mut remote = Record {
        metadata: ObjectMeta {
            name: local.metadata.name.clone(),
            namespace: remote_namespace.to_string(),
            labels: labels_for_remote_creation(&local.metadata.labels, origin),
            annotations,
            ..Default::default()
        },
        sections: Default::default(),
    };
    remote.copy_section_from(local, Section::Spec);
    remote
}
