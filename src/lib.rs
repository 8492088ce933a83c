//! # CRD Replicator
//!
//! Bidirectional replication of a bounded set of record types between two
//! independently administered cluster control planes.
//!
//! ## Architecture
//!
//! The local cluster owns a record and pushes its `spec` outward; depending on
//! the record type's ownership policy, either side is authoritative for the
//! `status` that flows back:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                              crd-replicator                               │
//! │                                                                           │
//! │  ┌─────────────────┐   enqueue    ┌───────────────────────────────────┐   │
//! │  │ Manager         │─────────────►│ Reflector (one per remote)        │   │
//! │  │ local informers │  (type, ns)  │  WorkQueue ─► workers ─► handler  │   │
//! │  │ requested=true  │              │  remote informer (our mirrors)    │   │
//! │  └─────────────────┘              └───────────────────────────────────┘   │
//! │          ▲                                 │                 │            │
//! │          │ watch                      read/write        read/write        │
//! │          │                                 ▼                 ▼            │
//! │  ┌──────────────────────────┐     ┌──────────────┐   ┌──────────────┐     │
//! │  │ local ObjectStore        │◄────│ local side   │   │ remote side  │     │
//! │  └──────────────────────────┘     └──────────────┘   └──────────────┘     │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Trust Model
//!
//! Labels are the only security and anti-loop mechanism (see [`labels`]).
//! The engine only mutates remote records stamped with its own origin, and a
//! finalizer on every local record guarantees its mirror is removed before the
//! record itself disappears.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use crd_replicator::{ReplicationEngine, ReplicatorConfig, RemoteCluster};
//! use crd_replicator::events::TracingRecorder;
//! use crd_replicator::store::memory::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> crd_replicator::Result<()> {
//!     let config = ReplicatorConfig {
//!         local_cluster_id: "cluster-a".into(),
//!         ..Default::default()
//!     };
//!
//!     let engine = ReplicationEngine::new(config, Arc::new(MemoryStore::new()), Arc::new(TracingRecorder))?;
//!     engine.start().await?;
//!
//!     let remote = RemoteCluster::new("cluster-b", "tenant-b", "tenant-a");
//!     engine.attach_remote(remote, Arc::new(MemoryStore::new()))?;
//!
//!     // Engine runs until shutdown signal
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod informer;
pub mod labels;
pub mod manager;
pub mod metrics;
pub mod queue;
pub mod record;
pub mod reflector;
pub mod registry;
pub mod resilience;
pub mod store;

// Re-exports for convenience
pub use config::{InformerConfig, QueueConfig, RemoteCluster, ReplicatorConfig, ReplicatorSettings};
pub use engine::{EngineState, ReplicationEngine};
pub use error::{ReplicationError, Result, Side};
pub use events::{Event, EventRecorder, EventType, TracingRecorder};
pub use labels::{replicated_selector, replication_requested_selector, LabelSelector};
pub use manager::Manager;
pub use record::{ObjectMeta, Record, Section, SectionError};
pub use reflector::{Reflector, WorkItem};
pub use registry::{OwnershipPolicy, RecordType, RegisteredType, REFLECTED_TYPES};
pub use store::{ObjectStore, ResourceClient, StoreError, WatchEvent};
