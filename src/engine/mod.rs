// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine coordinator.
//!
//! The main orchestrator that ties together:
//! - The local dispatcher via [`crate::manager::Manager`]
//! - One [`crate::reflector::Reflector`] per attached remote cluster
//! - The registry table of replicated record types
//!
//! # Architecture
//!
//! The coordinator manages the full replication lifecycle:
//! 1. Starts one local informer per registered record type
//! 2. Creates a reflector when the bootstrap collaborator attaches a remote
//!    cluster, and starts every registered type on it
//! 3. Detaches remotes gracefully (refusing while records remain) or by force
//! 4. Shuts everything down through a cancellation tree

mod types;

pub use types::EngineState;

use crate::config::{RemoteCluster, ReplicatorConfig};
use crate::error::{ReplicationError, Result};
use crate::events::EventRecorder;
use crate::manager::Manager;
use crate::metrics;
use crate::reflector::Reflector;
use crate::registry::{RegisteredType, REFLECTED_TYPES};
use crate::store::ObjectStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The main replication engine.
///
/// Replicates the registered record types between this cluster and every
/// attached remote cluster.
///
/// # Example
///
/// ```rust,no_run
/// use crd_replicator::{ReplicationEngine, ReplicatorConfig, RemoteCluster};
/// use crd_replicator::events::TracingRecorder;
/// use crd_replicator::store::memory::MemoryStore;
/// use std::sync::Arc;
///
/// # async fn example() -> crd_replicator::Result<()> {
/// let config = ReplicatorConfig {
///     local_cluster_id: "cluster-a".into(),
///     ..Default::default()
/// };
/// let engine = ReplicationEngine::new(config, Arc::new(MemoryStore::new()), Arc::new(TracingRecorder))?;
/// engine.start().await?;
///
/// let remote = RemoteCluster::new("cluster-b", "tenant-b", "tenant-a");
/// engine.attach_remote(remote, Arc::new(MemoryStore::new()))?;
///
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ReplicationEngine {
    config: ReplicatorConfig,

    /// Local control-plane store
    local_store: Arc<dyn ObjectStore>,

    /// Event sink shared by every reflector
    recorder: Arc<dyn EventRecorder>,

    /// Record types replicated by this engine
    registry: &'static [RegisteredType],

    /// Local dispatcher
    manager: Arc<Manager>,

    /// Attached remote clusters, keyed by cluster id
    reflectors: DashMap<String, Arc<Reflector>>,

    /// Engine state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    state_rx: watch::Receiver<EngineState>,

    /// Root of the cancellation tree
    cancel: CancellationToken,
}

impl ReplicationEngine {
    /// Create a new replication engine.
    ///
    /// The engine starts in `Created` state. Call [`start()`](Self::start)
    /// to begin watching local records.
    pub fn new(
        config: ReplicatorConfig,
        local_store: Arc<dyn ObjectStore>,
        recorder: Arc<dyn EventRecorder>,
    ) -> Result<Self> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let cancel = CancellationToken::new();
        let manager = Arc::new(Manager::new(
            Arc::clone(&local_store),
            config.settings.informer.relist_backoff(),
            cancel.child_token(),
        ));

        Ok(Self {
            config,
            local_store,
            recorder,
            registry: REFLECTED_TYPES,
            manager,
            reflectors: DashMap::new(),
            state_tx,
            state_rx,
            cancel,
        })
    }

    /// Replicate a different set of record types.
    #[must_use]
    pub fn with_registry(mut self, registry: &'static [RegisteredType]) -> Self {
        self.registry = registry;
        self
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Check if engine is running.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    pub fn local_cluster_id(&self) -> &str {
        &self.config.local_cluster_id
    }

    /// The local dispatcher.
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// The reflector for an attached remote cluster.
    pub fn reflector(&self, cluster_id: &str) -> Option<Arc<Reflector>> {
        self.reflectors.get(cluster_id).map(|r| Arc::clone(r.value()))
    }

    /// Ids of attached remote clusters, sorted.
    pub fn remote_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.reflectors.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    fn set_state(&self, state: EngineState) {
        let _ = self.state_tx.send(state);
        metrics::set_engine_state(&state.to_string());
    }

    fn require_running(&self) -> Result<()> {
        match self.state() {
            EngineState::Running => Ok(()),
            EngineState::ShuttingDown | EngineState::Stopped => Err(ReplicationError::Shutdown),
            other => Err(ReplicationError::InvalidState {
                expected: "Running".to_string(),
                actual: other.to_string(),
            }),
        }
    }

    /// Start the local dispatcher and wait for its caches to sync.
    pub async fn start(&self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(ReplicationError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        let types: Vec<_> = self.registry.iter().map(RegisteredType::record_type).collect();
        info!(
            cluster_id = %self.config.local_cluster_id,
            types = types.len(),
            "Starting replication engine"
        );

        self.manager.start(&types).await?;

        self.set_state(EngineState::Running);
        info!("Replication engine running");
        Ok(())
    }

    /// Begin replicating every registered type to `remote`.
    ///
    /// Returns the new reflector. Each type becomes initialized asynchronously
    /// once the remote cache has synced.
    pub fn attach_remote(
        &self,
        remote: RemoteCluster,
        remote_store: Arc<dyn ObjectStore>,
    ) -> Result<Arc<Reflector>> {
        self.require_running()?;

        if remote.cluster_id == self.config.local_cluster_id {
            return Err(ReplicationError::Config(format!(
                "remote cluster id {} equals the local cluster id",
                remote.cluster_id
            )));
        }

        let cluster_id = remote.cluster_id.clone();
        let entry = match self.reflectors.entry(cluster_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ReplicationError::Config(format!(
                    "remote cluster {} is already attached",
                    cluster_id
                )));
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => entry,
        };

        let reflector = Arc::new(
            Reflector::new(
                &self.config,
                remote,
                Arc::clone(&self.manager),
                Arc::clone(&self.local_store),
                remote_store,
                Arc::clone(&self.recorder),
                &self.cancel,
            )
            .with_registry(self.registry),
        );
        reflector.start();
        for registered in self.registry {
            reflector.start_for_resource(&registered.record_type());
        }

        entry.insert(Arc::clone(&reflector));
        metrics::set_attached_remotes(self.reflectors.len());
        info!(cluster_id = %cluster_id, "Remote cluster attached");
        Ok(reflector)
    }

    /// Stop replicating to a remote cluster.
    ///
    /// Fails with [`ReplicationError::ResourceNotEmpty`] while local records
    /// still request replication there or mirrors still exist; the remote
    /// stays attached in that case and the caller retries later.
    pub async fn detach_remote(&self, cluster_id: &str) -> Result<()> {
        self.detach(cluster_id, false).await
    }

    /// Stop replicating to a remote cluster regardless of remaining records.
    pub async fn force_detach_remote(&self, cluster_id: &str) -> Result<()> {
        self.detach(cluster_id, true).await
    }

    async fn detach(&self, cluster_id: &str, force: bool) -> Result<()> {
        let reflector = self
            .reflector(cluster_id)
            .ok_or_else(|| ReplicationError::UnknownRemote(cluster_id.to_string()))?;

        if force {
            reflector.stop_force().await?;
        } else {
            reflector.stop().await?;
        }

        self.reflectors.remove(cluster_id);
        metrics::set_attached_remotes(self.reflectors.len());
        if !reflector
            .wait_stopped(self.config.settings.shutdown_timeout_duration())
            .await
        {
            warn!(cluster_id, "Reflector tasks did not exit cleanly");
        }
        info!(cluster_id, force, "Remote cluster detached");
        Ok(())
    }

    /// Shut the engine down.
    ///
    /// Force-stops every reflector, waits for their workers to finish the
    /// item they hold, then stops the dispatcher.
    pub async fn shutdown(&self) {
        if matches!(self.state(), EngineState::ShuttingDown | EngineState::Stopped) {
            debug!("Shutdown already in progress");
            return;
        }

        info!("Shutting down replication engine");
        self.set_state(EngineState::ShuttingDown);

        let reflectors: Vec<Arc<Reflector>> =
            self.reflectors.iter().map(|r| Arc::clone(r.value())).collect();
        self.reflectors.clear();

        let timeout = self.config.settings.shutdown_timeout_duration();
        for reflector in &reflectors {
            if let Err(e) = reflector.stop_force().await {
                warn!(cluster_id = %reflector.remote_cluster_id(), error = %e, "Reflector stop failed");
            }
        }
        for reflector in &reflectors {
            if !reflector.wait_stopped(timeout).await {
                warn!(cluster_id = %reflector.remote_cluster_id(), "Reflector tasks timed out during shutdown");
            }
        }

        self.manager.stop();
        self.cancel.cancel();
        metrics::set_attached_remotes(0);

        self.set_state(EngineState::Stopped);
        info!("Replication engine stopped");
    }
}

impl std::fmt::Debug for ReplicationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationEngine")
            .field("local_cluster_id", &self.config.local_cluster_id)
            .field("state", &self.state())
            .field("remotes", &self.remote_ids())
            .finish()
    }
}
