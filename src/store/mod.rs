// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Control-plane API abstraction.
//!
//! The engine talks to each cluster through [`ObjectStore`]: generic,
//! schema-agnostic create/read/update/delete, a separate status-only update,
//! label-filtered list, and a watch stream. An embedder provides an
//! implementation for its networked control plane; [`memory::MemoryStore`]
//! is a complete in-process implementation.
//!
//! # Example
//!
//! ```rust,no_run
//! use crd_replicator::store::{ObjectStore, ResourceClient, memory::MemoryStore};
//! use crd_replicator::registry::RecordType;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), crd_replicator::store::StoreError> {
//! let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
//! let tenants = RecordType::new("core.crd-replicator.io", "v1alpha1", "tenants");
//! let client = ResourceClient::new(store, tenants, "tenant-ns");
//! let record = client.get("tenant-1").await?;
//! # Ok(())
//! # }
//! ```

pub mod memory;

use crate::labels::LabelSelector;
use crate::record::Record;
use crate::registry::RecordType;
use futures::stream::BoxStream;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Boxed future returned by [`ObjectStore`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Stream of watch notifications for one record type.
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Errors returned by the control-plane API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The record does not exist.
    #[error("{resource} {namespace}/{name} not found")]
    NotFound {
        resource: String,
        namespace: String,
        name: String,
    },

    /// Create collided with an existing record of the same name.
    #[error("{resource} {namespace}/{name} already exists")]
    AlreadyExists {
        resource: String,
        namespace: String,
        name: String,
    },

    /// The caller lacks permission for this verb.
    #[error("forbidden: cannot {verb} {resource} in namespace {namespace}")]
    Forbidden {
        verb: String,
        resource: String,
        namespace: String,
    },

    /// Optimistic-concurrency collision: the record changed since it was read.
    #[error("conflict on {resource} {namespace}/{name}: {message}")]
    Conflict {
        resource: String,
        namespace: String,
        name: String,
        message: String,
    },

    /// The request was rejected as malformed.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// Transport or server-side failure.
    #[error("api unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, StoreError::Forbidden { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// A watch notification.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Added(Record),
    Modified(Record),
    Deleted(Record),
    /// The stream lost continuity; consumers must relist.
    Restart,
}

/// The control-plane operations the engine depends on.
///
/// This trait is the seam between the replication engine and a concrete API
/// server client, which keeps the engine testable against in-process stores.
pub trait ObjectStore: Send + Sync + 'static {
    /// Fetch one record.
    fn get(&self, resource: &RecordType, namespace: &str, name: &str) -> BoxFuture<'_, Record>;

    /// List records matching `selector`. `None` lists across all namespaces.
    fn list(
        &self,
        resource: &RecordType,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> BoxFuture<'_, Vec<Record>>;

    /// Create a record. The `status` section is ignored.
    fn create(&self, resource: &RecordType, record: Record) -> BoxFuture<'_, Record>;

    /// Update metadata and `spec`. The `status` section is ignored.
    ///
    /// Fails with [`StoreError::Conflict`] if `resource_version` is set and
    /// does not match the stored record.
    fn update(&self, resource: &RecordType, record: Record) -> BoxFuture<'_, Record>;

    /// Update only the `status` section.
    fn update_status(&self, resource: &RecordType, record: Record) -> BoxFuture<'_, Record>;

    /// Request deletion. Records holding finalizers are only marked.
    fn delete(&self, resource: &RecordType, namespace: &str, name: &str) -> BoxFuture<'_, ()>;

    /// Open a watch for one record type. `None` watches all namespaces.
    fn watch(&self, resource: &RecordType, namespace: Option<&str>) -> WatchStream;
}

/// A handle bound to one record type in one namespace.
///
/// Cheap to clone; this is how the reflector holds its local and remote
/// readers and writers for each replicated type.
#[derive(Clone)]
pub struct ResourceClient {
    store: Arc<dyn ObjectStore>,
    resource: RecordType,
    namespace: String,
}

impl ResourceClient {
    pub fn new(store: Arc<dyn ObjectStore>, resource: RecordType, namespace: impl Into<String>) -> Self {
        Self {
            store,
            resource,
            namespace: namespace.into(),
        }
    }

    pub fn resource(&self) -> &RecordType {
        &self.resource
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    pub async fn get(&self, name: &str) -> StoreResult<Record> {
        self.store.get(&self.resource, &self.namespace, name).await
    }

    pub async fn list(&self, selector: &LabelSelector) -> StoreResult<Vec<Record>> {
        self.store
            .list(&self.resource, Some(&self.namespace), selector)
            .await
    }

    pub async fn create(&self, record: Record) -> StoreResult<Record> {
        self.store.create(&self.resource, record).await
    }

    pub async fn update(&self, record: Record) -> StoreResult<Record> {
        self.store.update(&self.resource, record).await
    }

    pub async fn update_status(&self, record: Record) -> StoreResult<Record> {
        self.store.update_status(&self.resource, record).await
    }

    pub async fn delete(&self, name: &str) -> StoreResult<()> {
        self.store.delete(&self.resource, &self.namespace, name).await
    }
}

impl std::fmt::Debug for ResourceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceClient")
            .field("resource", &self.resource)
            .field("namespace", &self.namespace)
            .finish()
    }
}
