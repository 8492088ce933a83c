//! Reflector bookkeeping types.

use crate::informer::Informer;
use crate::registry::{OwnershipPolicy, RecordType};
use crate::store::ResourceClient;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One reconciliation unit.
///
/// Carries no namespace: a reflector is bound to a single namespace pair for
/// its whole lifetime, so the namespace is implied by the owning reflector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub resource: RecordType,
    pub name: String,
}

impl WorkItem {
    pub fn new(resource: RecordType, name: impl Into<String>) -> Self {
        Self {
            resource,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.resource, self.name)
    }
}

/// Everything the handler needs to reconcile one type, cloned out of the
/// reflector's lock for the duration of a single invocation.
#[derive(Debug, Clone)]
pub struct ReflectionTarget {
    pub resource: RecordType,
    pub ownership: OwnershipPolicy,
    /// Bound to the local tenant namespace.
    pub local: ResourceClient,
    /// Bound to the remote tenant namespace.
    pub remote: ResourceClient,
}

/// State of one record type actively reflected to a remote cluster.
#[derive(Debug)]
pub struct ReflectedType {
    pub target: ReflectionTarget,
    /// Watch over the mirrors this engine created remotely.
    pub remote_informer: Arc<Informer>,
    /// Cancels the remote informer and a pending setup task.
    pub cancel: CancellationToken,
    /// Set once the remote cache has synced and the local handler is registered.
    pub initialized: bool,
}
