//! Local/remote cluster harnesses.

use super::fixtures::*;
use crd_replicator::config::{RemoteCluster, ReplicatorConfig};
use crd_replicator::events::CollectingRecorder;
use crd_replicator::manager::Manager;
use crd_replicator::reflector::{Reflector, WorkItem};
use crd_replicator::registry::{record_types, RecordType};
use crd_replicator::store::memory::MemoryStore;
use crd_replicator::{ReplicationEngine, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub fn remote_cluster() -> RemoteCluster {
    RemoteCluster::new(REMOTE_ID, LOCAL_NS, REMOTE_NS)
}

/// Two independent control planes.
pub struct Clusters {
    pub local: Arc<MemoryStore>,
    pub remote: Arc<MemoryStore>,
}

impl Clusters {
    pub fn new() -> Self {
        Self {
            local: Arc::new(MemoryStore::new()),
            remote: Arc::new(MemoryStore::new()),
        }
    }

    pub fn local_record(&self, resource: &RecordType, name: &str) -> Option<crd_replicator::Record> {
        self.local.peek(resource, LOCAL_NS, name)
    }

    pub fn mirror(&self, resource: &RecordType, name: &str) -> Option<crd_replicator::Record> {
        self.remote.peek(resource, REMOTE_NS, name)
    }
}

/// A running engine with `REMOTE_ID` attached and every type initialized.
pub struct EngineHarness {
    pub clusters: Clusters,
    pub engine: ReplicationEngine,
    pub reflector: Arc<Reflector>,
    pub recorder: Arc<CollectingRecorder>,
}

impl EngineHarness {
    pub async fn start() -> Self {
        Self::start_with(Clusters::new()).await
    }

    /// Start against stores that may already hold records.
    pub async fn start_with(clusters: Clusters) -> Self {
        init_tracing();
        let recorder = Arc::new(CollectingRecorder::new());
        let engine = ReplicationEngine::new(
            ReplicatorConfig::for_testing(LOCAL_ID),
            clusters.local.clone(),
            recorder.clone(),
        )
        .expect("valid config");
        engine.start().await.expect("engine start");

        let reflector = engine
            .attach_remote(remote_cluster(), clusters.remote.clone())
            .expect("attach");
        wait_initialized(&reflector).await;

        Self {
            clusters,
            engine,
            reflector,
            recorder,
        }
    }
}

/// A reflector without workers: tests drive the handler directly.
pub struct HandlerHarness {
    pub clusters: Clusters,
    pub manager: Arc<Manager>,
    pub reflector: Arc<Reflector>,
    pub recorder: Arc<CollectingRecorder>,
    pub cancel: CancellationToken,
}

impl HandlerHarness {
    pub async fn start() -> Self {
        init_tracing();
        let clusters = Clusters::new();
        let config = ReplicatorConfig::for_testing(LOCAL_ID);
        let cancel = CancellationToken::new();
        let recorder = Arc::new(CollectingRecorder::new());

        let manager = Arc::new(Manager::new(
            clusters.local.clone(),
            config.settings.informer.relist_backoff(),
            cancel.child_token(),
        ));
        manager.start(&record_types()).await.expect("manager start");

        let reflector = Arc::new(Reflector::new(
            &config,
            remote_cluster(),
            Arc::clone(&manager),
            clusters.local.clone(),
            clusters.remote.clone(),
            recorder.clone(),
            &cancel,
        ));
        for resource in record_types() {
            reflector.start_for_resource(&resource);
        }
        wait_initialized(&reflector).await;

        Self {
            clusters,
            manager,
            reflector,
            recorder,
            cancel,
        }
    }

    pub async fn reconcile(&self, resource: &RecordType, name: &str) -> Result<()> {
        self.reflector
            .reconcile(&WorkItem::new(resource.clone(), name))
            .await
    }

    /// Run the handler until a pass issues no writes on either side.
    pub async fn converge(&self, resource: &RecordType, name: &str) {
        for _ in 0..10 {
            let before = self.clusters.local.write_calls() + self.clusters.remote.write_calls();
            self.reconcile(resource, name).await.expect("reconcile");
            let after = self.clusters.local.write_calls() + self.clusters.remote.write_calls();
            if before == after {
                return;
            }
        }
        panic!("{} did not converge", name);
    }
}

impl Drop for HandlerHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn wait_initialized(reflector: &Reflector) {
    for resource in record_types() {
        eventually("reflected type initialized", || {
            reflector.is_resource_initialized(&resource)
        })
        .await;
    }
}
