// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-remote-cluster reflector.
//!
//! A [`Reflector`] is bound to one remote cluster and one pair of tenant
//! namespaces for its whole lifetime. It owns:
//! - one remote informer per active record type, selecting the mirrors this
//!   engine created (`origin = local cluster`, `replicated = true`)
//! - a single rate-limited, deduplicating [`WorkQueue`] of [`WorkItem`]s
//! - a fixed pool of workers draining that queue through the reconciliation
//!   handler ([`handler`])
//!
//! # Lifecycle
//!
//! ```text
//! start()                      spawn workers
//! start_for_resource(type)     remote informer ─(synced)─► register with Manager ─► initialized
//! stop_for_resource(type)      refuse if records remain ─► unregister ─► cancel informer
//! stop() / stop_force()        stop every type ─► cancel root ─► queue shutdown ─► workers exit
//! ```
//!
//! Cancellation tokens form a tree: engine root → reflector root → one child
//! per record type.

mod handler;
pub mod types;

pub use types::{ReflectedType, ReflectionTarget, WorkItem};

use crate::config::{RemoteCluster, ReplicatorConfig};
use crate::error::{ReplicationError, Result, Side};
use crate::events::{Event, EventRecorder, ObjectRef, REASON_FAILED};
use crate::informer::{Informer, RecordHandler};
use crate::labels::{replicated_from, replication_requested_for};
use crate::manager::{EventHandler, Manager};
use crate::metrics;
use crate::queue::WorkQueue;
use crate::record::Record;
use crate::registry::{self, RecordType, RegisteredType, REFLECTED_TYPES};
use crate::resilience::BackoffConfig;
use crate::store::{ObjectStore, ResourceClient};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Replicates the registered record types to one remote cluster.
pub struct Reflector {
    local_cluster_id: String,
    remote: RemoteCluster,
    manager: Arc<Manager>,
    local_store: Arc<dyn ObjectStore>,
    remote_store: Arc<dyn ObjectStore>,
    registry: &'static [RegisteredType],
    recorder: Arc<dyn EventRecorder>,

    queue: Arc<WorkQueue<WorkItem>>,
    workers: usize,
    relist_backoff: BackoffConfig,

    /// Active record types. Also guards each type's `initialized` flag.
    resources: Mutex<HashMap<RecordType, ReflectedType>>,

    /// Root of this reflector's cancellation tree.
    cancel: CancellationToken,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Reflector {
    /// Create a reflector for `remote`. Nothing runs until [`start`](Self::start).
    ///
    /// `parent` is the engine's cancellation token; cancelling it stops this
    /// reflector too.
    pub fn new(
        config: &ReplicatorConfig,
        remote: RemoteCluster,
        manager: Arc<Manager>,
        local_store: Arc<dyn ObjectStore>,
        remote_store: Arc<dyn ObjectStore>,
        recorder: Arc<dyn EventRecorder>,
        parent: &CancellationToken,
    ) -> Self {
        let settings = &config.settings;
        Self {
            local_cluster_id: config.local_cluster_id.clone(),
            remote,
            manager,
            local_store,
            remote_store,
            registry: REFLECTED_TYPES,
            recorder,
            queue: Arc::new(WorkQueue::new(
                settings.queue.backoff(),
                settings.queue.rate_limit(),
            )),
            workers: settings.workers.max(1),
            relist_backoff: settings.informer.relist_backoff(),
            resources: Mutex::new(HashMap::new()),
            cancel: parent.child_token(),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Use a different registry table.
    #[must_use]
    pub fn with_registry(mut self, registry: &'static [RegisteredType]) -> Self {
        self.registry = registry;
        self
    }

    pub fn remote_cluster_id(&self) -> &str {
        &self.remote.cluster_id
    }

    pub fn remote(&self) -> &RemoteCluster {
        &self.remote
    }

    pub fn local_cluster_id(&self) -> &str {
        &self.local_cluster_id
    }

    /// Keys waiting in the queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Spawn the worker pool. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!(cluster_id = %self.remote.cluster_id, "Reflector already started");
            return;
        }

        let mut tasks = self.tasks.lock();
        for worker_id in 0..self.workers {
            let reflector = Arc::clone(self);
            let span = info_span!(
                "reflector_worker",
                cluster_id = %self.remote.cluster_id,
                worker_id
            );
            tasks.push(tokio::spawn(reflector.run_worker().instrument(span)));
        }

        // Root cancellation shuts the queue down, which lets the workers exit.
        let queue = Arc::clone(&self.queue);
        let cancel = self.cancel.clone();
        tasks.push(tokio::spawn(async move {
            cancel.cancelled().await;
            queue.shut_down();
        }));

        info!(
            cluster_id = %self.remote.cluster_id,
            local_namespace = %self.remote.local_namespace,
            remote_namespace = %self.remote.remote_namespace,
            workers = self.workers,
            "Reflector started"
        );
    }

    /// Start reflecting `resource`.
    ///
    /// Returns once the remote informer is running. Registration with the
    /// dispatcher happens asynchronously after the remote cache syncs; if the
    /// reflector is stopped first the type never becomes initialized.
    ///
    /// # Panics
    ///
    /// If `resource` is not in the registry, or is already active.
    pub fn start_for_resource(self: &Arc<Self>, resource: &RecordType) {
        let Some(registered) = registry::lookup(self.registry, resource) else {
            error!(resource = %resource, "Record type is not registered for reflection");
            panic!("record type {} is not registered for reflection", resource);
        };

        let mut resources = self.resources.lock();
        if resources.contains_key(resource) {
            error!(resource = %resource, cluster_id = %self.remote.cluster_id, "Reflection already started");
            panic!("reflection of {} to {} already started", resource, self.remote.cluster_id);
        }

        let cancel = self.cancel.child_token();
        let target = ReflectionTarget {
            resource: resource.clone(),
            ownership: registered.ownership,
            local: ResourceClient::new(
                Arc::clone(&self.local_store),
                resource.clone(),
                &self.remote.local_namespace,
            ),
            remote: ResourceClient::new(
                Arc::clone(&self.remote_store),
                resource.clone(),
                &self.remote.remote_namespace,
            ),
        };

        let queue = Arc::clone(&self.queue);
        let routed = resource.clone();
        let on_remote_change: RecordHandler =
            Arc::new(move |record: &Record| queue.add(WorkItem::new(routed.clone(), record.name())));

        let remote_informer = Informer::spawn(
            Arc::clone(&self.remote_store),
            resource.clone(),
            Some(self.remote.remote_namespace.clone()),
            replicated_from(&self.local_cluster_id),
            on_remote_change,
            self.relist_backoff.clone(),
            cancel.clone(),
        );

        resources.insert(
            resource.clone(),
            ReflectedType {
                target,
                remote_informer: Arc::clone(&remote_informer),
                cancel: cancel.clone(),
                initialized: false,
            },
        );
        metrics::set_reflected_types(&self.remote.cluster_id, resources.len());
        drop(resources);

        debug!(
            resource = %resource,
            cluster_id = %self.remote.cluster_id,
            ownership = %registered.ownership,
            "Starting reflection"
        );

        let reflector = Arc::clone(self);
        let resource = resource.clone();
        let span = info_span!("reflection_setup", cluster_id = %self.remote.cluster_id, resource = %resource);
        let handle = tokio::spawn(
            async move {
                if !remote_informer.wait_for_sync(&cancel).await {
                    debug!("Cancelled before remote cache synced");
                    return;
                }
                reflector.finish_setup(&resource, &cancel);
            }
            .instrument(span),
        );
        self.tasks.lock().push(handle);
    }

    /// Register with the dispatcher and mark the type initialized, unless the
    /// type was stopped while its remote cache was syncing.
    ///
    /// Registration replays the dispatcher's cache, so it runs without the
    /// `resources` lock held.
    fn finish_setup(&self, resource: &RecordType, cancel: &CancellationToken) {
        {
            let resources = self.resources.lock();
            if cancel.is_cancelled() || !resources.contains_key(resource) {
                return;
            }
        }

        let queue = Arc::clone(&self.queue);
        let routed = resource.clone();
        let on_local_change: EventHandler =
            Arc::new(move |name: &str| queue.add(WorkItem::new(routed.clone(), name)));
        self.manager
            .register_handler(resource, &self.remote.local_namespace, on_local_change);

        let mut resources = self.resources.lock();
        match resources.get_mut(resource) {
            Some(entry) if !cancel.is_cancelled() => {
                entry.initialized = true;
                info!("Reflection initialized");
            }
            _ => {
                // Stopped during registration. A restarted entry registers
                // its own identical handler, so only undo ours if none is live.
                let restarted = resources
                    .get(resource)
                    .is_some_and(|entry| !entry.cancel.is_cancelled());
                drop(resources);
                if !restarted {
                    self.manager
                        .unregister_handler(resource, &self.remote.local_namespace);
                    debug!("Stopped during registration, handler removed");
                }
            }
        }
    }

    /// Stop reflecting `resource`.
    ///
    /// Unless `force`, refuses with [`ReplicationError::ResourceNotEmpty`]
    /// while local records still request replication to this cluster or
    /// mirrors still exist remotely. A remote list rejected as Forbidden
    /// counts as no mirrors. Stopping an inactive type is a no-op.
    pub async fn stop_for_resource(&self, resource: &RecordType, force: bool) -> Result<()> {
        let target = match self.resources.lock().get(resource) {
            Some(entry) => entry.target.clone(),
            None => return Ok(()),
        };

        if !force {
            let local = target
                .local
                .list(&replication_requested_for(&self.remote.cluster_id))
                .await
                .map_err(|e| ReplicationError::store(Side::Local, "list", resource, e))?;
            if !local.is_empty() {
                return Err(ReplicationError::ResourceNotEmpty {
                    resource: resource.to_string(),
                    side: Side::Local,
                    count: local.len(),
                });
            }

            match target.remote.list(&replicated_from(&self.local_cluster_id)).await {
                Ok(remote) if !remote.is_empty() => {
                    return Err(ReplicationError::ResourceNotEmpty {
                        resource: resource.to_string(),
                        side: Side::Remote,
                        count: remote.len(),
                    });
                }
                Ok(_) => {}
                Err(e) if e.is_forbidden() => {
                    info!(resource = %resource, cluster_id = %self.remote.cluster_id, "Remote list forbidden, treating as empty");
                }
                Err(e) => return Err(ReplicationError::store(Side::Remote, "list", resource, e)),
            }
        }

        let removed = {
            let mut resources = self.resources.lock();
            let removed = resources.remove(resource);
            metrics::set_reflected_types(&self.remote.cluster_id, resources.len());
            removed
        };
        if let Some(entry) = removed {
            self.manager
                .unregister_handler(resource, &self.remote.local_namespace);
            entry.cancel.cancel();
            info!(resource = %resource, cluster_id = %self.remote.cluster_id, force, "Reflection stopped");
        }
        Ok(())
    }

    /// Gracefully stop every active type, then the reflector itself.
    ///
    /// Returns the first refusal; the reflector keeps running in that case.
    pub async fn stop(&self) -> Result<()> {
        self.stop_all(false).await
    }

    /// Stop every active type without checking for remaining records.
    pub async fn stop_force(&self) -> Result<()> {
        self.stop_all(true).await
    }

    async fn stop_all(&self, force: bool) -> Result<()> {
        for resource in self.active_resources() {
            self.stop_for_resource(&resource, force).await?;
        }
        self.cancel.cancel();
        info!(cluster_id = %self.remote.cluster_id, "Reflector stopped");
        Ok(())
    }

    /// Wait for worker and setup tasks to exit after a stop, up to `timeout`.
    ///
    /// Returns `false` if some task was still running.
    pub async fn wait_stopped(&self, timeout: Duration) -> bool {
        let handles: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        let mut clean = true;
        for handle in handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(error = %e, "Reflector task panicked");
                    clean = false;
                }
                Err(_) => {
                    warn!(cluster_id = %self.remote.cluster_id, "Reflector task did not stop in time");
                    clean = false;
                }
            }
        }
        clean
    }

    /// Whether `resource` is active (started and not stopped).
    pub fn resource_started(&self, resource: &RecordType) -> bool {
        self.resources.lock().contains_key(resource)
    }

    /// Whether `resource` is active and registered with the dispatcher.
    pub fn is_resource_initialized(&self, resource: &RecordType) -> bool {
        self.resources
            .lock()
            .get(resource)
            .is_some_and(|entry| entry.initialized)
    }

    /// Active record types, sorted.
    pub fn active_resources(&self) -> Vec<RecordType> {
        let mut types: Vec<_> = self.resources.lock().keys().cloned().collect();
        types.sort();
        types
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn target(&self, resource: &RecordType) -> Option<ReflectionTarget> {
        self.resources
            .lock()
            .get(resource)
            .map(|entry| entry.target.clone())
    }

    async fn run_worker(self: Arc<Self>) {
        debug!("Worker started");
        while let Some(item) = self.queue.get().await {
            metrics::set_queue_depth(&self.remote.cluster_id, self.queue.len());
            let span = info_span!("reconcile", resource = %item.resource, name = %item.name);

            match self.reconcile(&item).instrument(span).await {
                Ok(()) => self.queue.forget(&item),
                Err(e) => {
                    let retry = e.is_retryable();
                    warn!(
                        resource = %item.resource,
                        name = %item.name,
                        attempt = self.queue.num_requeues(&item) + 1,
                        retry,
                        error = %e,
                        "Reflection failed"
                    );
                    if !e.is_conflict() {
                        self.record_failure(&item, &e);
                    }
                    if retry {
                        metrics::record_requeue(&self.remote.cluster_id, &item.resource.resource);
                        self.queue.add_rate_limited(item.clone());
                    } else {
                        self.queue.forget(&item);
                    }
                }
            }

            self.queue.done(&item);
        }
        debug!("Worker exiting");
    }

    /// Attach a failure event to the local record, if the dispatcher knows it.
    fn record_failure(&self, item: &WorkItem, err: &ReplicationError) {
        let known = self
            .manager
            .cached(&item.resource, &self.remote.local_namespace, &item.name)
            .is_some();
        if !known {
            return;
        }
        self.recorder.record(Event::warning(
            self.local_ref(&item.resource, &item.name),
            REASON_FAILED,
            format!("reflection failed: {}", err),
        ));
    }

    fn local_ref(&self, resource: &RecordType, name: &str) -> ObjectRef {
        ObjectRef {
            resource: resource.clone(),
            namespace: self.remote.local_namespace.clone(),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Debug for Reflector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reflector")
            .field("local_cluster_id", &self.local_cluster_id)
            .field("remote", &self.remote)
            .field("workers", &self.workers)
            .field("active", &self.resources.lock().len())
            .finish()
    }
}
