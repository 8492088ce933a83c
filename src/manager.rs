//! Local-side dispatcher.
//!
//! The [`Manager`] owns one cluster-wide informer per replicated record type,
//! selecting local records that request replication. Every change is routed
//! to the handler registered for the record's `(type, namespace)`; reflectors
//! register one handler per type for the tenant namespace they are bound to.
//!
//! The manager has no workers of its own. Handlers run inline on the
//! informer's task, so they must only enqueue.

use crate::error::{ReplicationError, Result};
use crate::informer::{Informer, RecordHandler};
use crate::labels::replication_requested_selector;
use crate::record::Record;
use crate::registry::RecordType;
use crate::resilience::BackoffConfig;
use crate::store::ObjectStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

/// Callback invoked with the name of a changed local record.
pub type EventHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// `(record type, namespace)` → handler.
///
/// The lock is held only to look up or replace an entry; handlers are always
/// invoked after it is released.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<(RecordType, String), EventHandler>>,
}

impl HandlerRegistry {
    pub fn get(&self, resource: &RecordType, namespace: &str) -> Option<EventHandler> {
        self.handlers
            .read()
            .get(&(resource.clone(), namespace.to_string()))
            .cloned()
    }

    /// Store `handler`, replacing any previous one. Returns whether one was replaced.
    pub fn insert(&self, resource: &RecordType, namespace: &str, handler: EventHandler) -> bool {
        self.handlers
            .write()
            .insert((resource.clone(), namespace.to_string()), handler)
            .is_some()
    }

    pub fn remove(&self, resource: &RecordType, namespace: &str) -> bool {
        self.handlers
            .write()
            .remove(&(resource.clone(), namespace.to_string()))
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dispatch(&self, resource: &RecordType, record: &Record) {
        match self.get(resource, record.namespace()) {
            Some(handler) => handler(record.name()),
            None => trace!(
                resource = %resource,
                namespace = %record.namespace(),
                name = %record.name(),
                "No handler registered, dropping notification"
            ),
        }
    }
}

/// Routes local change notifications to the owning reflector.
pub struct Manager {
    store: Arc<dyn ObjectStore>,
    informers: RwLock<HashMap<RecordType, Arc<Informer>>>,
    handlers: Arc<HandlerRegistry>,
    relist_backoff: BackoffConfig,
    cancel: CancellationToken,
}

impl Manager {
    /// `cancel` bounds every informer this manager starts.
    pub fn new(store: Arc<dyn ObjectStore>, relist_backoff: BackoffConfig, cancel: CancellationToken) -> Self {
        Self {
            store,
            informers: RwLock::new(HashMap::new()),
            handlers: Arc::new(HandlerRegistry::default()),
            relist_backoff,
            cancel,
        }
    }

    /// Start one filtered informer per type and wait for all of them to sync.
    ///
    /// Types already watched are skipped.
    pub async fn start(&self, types: &[RecordType]) -> Result<()> {
        let mut started = Vec::new();
        {
            let mut informers = self.informers.write();
            for resource in types {
                if informers.contains_key(resource) {
                    continue;
                }
                let registry = Arc::clone(&self.handlers);
                let routed = resource.clone();
                let handler: RecordHandler =
                    Arc::new(move |record: &Record| registry.dispatch(&routed, record));

                let informer = Informer::spawn(
                    Arc::clone(&self.store),
                    resource.clone(),
                    None,
                    replication_requested_selector(),
                    handler,
                    self.relist_backoff.clone(),
                    self.cancel.child_token(),
                );
                informers.insert(resource.clone(), Arc::clone(&informer));
                started.push(informer);
            }
        }

        for informer in &started {
            if !informer.wait_for_sync(&self.cancel).await {
                return Err(ReplicationError::Shutdown);
            }
            debug!(resource = %informer.resource(), cached = informer.len(), "Local informer synced");
        }

        info!(types = started.len(), "Local dispatcher started");
        Ok(())
    }

    /// Whether `resource` has a local informer.
    pub fn is_watching(&self, resource: &RecordType) -> bool {
        self.informers.read().contains_key(resource)
    }

    /// Register `handler` for `(resource, namespace)`, then replay every cached
    /// record of that namespace through it before returning.
    ///
    /// # Panics
    ///
    /// If `resource` is not watched by this manager.
    pub fn register_handler(&self, resource: &RecordType, namespace: &str, handler: EventHandler) {
        let informer = self.informers.read().get(resource).cloned();
        let Some(informer) = informer else {
            error!(resource = %resource, "Handler registered for a record type the dispatcher does not watch");
            panic!("record type {} is not watched by the dispatcher", resource);
        };

        if self.handlers.insert(resource, namespace, Arc::clone(&handler)) {
            debug!(resource = %resource, namespace, "Replaced existing handler");
        }

        let cached = informer.list(Some(namespace));
        debug!(resource = %resource, namespace, replay = cached.len(), "Replaying cached records");
        for record in &cached {
            handler(record.name());
        }
    }

    /// Remove the handler for `(resource, namespace)`.
    ///
    /// Work already enqueued by the handler is not affected.
    pub fn unregister_handler(&self, resource: &RecordType, namespace: &str) {
        if self.handlers.remove(resource, namespace) {
            debug!(resource = %resource, namespace, "Handler unregistered");
        }
    }

    /// Cached copy of a local record that requests replication.
    pub fn cached(&self, resource: &RecordType, namespace: &str, name: &str) -> Option<Record> {
        let informer = self.informers.read().get(resource).cloned()?;
        informer.get(namespace, name)
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Stop every informer.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.informers.write().clear();
        info!("Local dispatcher stopped");
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("watched", &self.informers.read().len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{REPLICATION_DESTINATION, REPLICATION_REQUESTED};
    use crate::store::memory::MemoryStore;
    use parking_lot::Mutex;
    use std::time::Duration;

    fn tenants() -> RecordType {
        RecordType::new("core.crd-replicator.io", "v1alpha1", "tenants")
    }

    fn requested(ns: &str, name: &str) -> Record {
        Record::new(ns, name)
            .with_label(REPLICATION_REQUESTED, "true")
            .with_label(REPLICATION_DESTINATION, "cluster-b")
    }

    fn recording() -> (EventHandler, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: EventHandler = Arc::new(move |name: &str| sink.lock().push(name.to_string()));
        (handler, seen)
    }

    #[tokio::test]
    async fn test_replay_on_register() {
        let store = Arc::new(MemoryStore::new());
        store.create(&tenants(), requested("ns", "a")).await.unwrap();
        store.create(&tenants(), requested("ns", "b")).await.unwrap();
        store.create(&tenants(), requested("other", "c")).await.unwrap();
        store.create(&tenants(), Record::new("ns", "plain")).await.unwrap();

        let manager = Manager::new(store, BackoffConfig::testing(), CancellationToken::new());
        manager.start(&[tenants()]).await.unwrap();

        let (handler, seen) = recording();
        manager.register_handler(&tenants(), "ns", handler);

        let mut names = seen.lock().clone();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
        manager.stop();
    }

    #[tokio::test]
    async fn test_dispatch_by_namespace() {
        let store = Arc::new(MemoryStore::new());
        let manager = Manager::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            BackoffConfig::testing(),
            CancellationToken::new(),
        );
        manager.start(&[tenants()]).await.unwrap();

        let (handler, seen) = recording();
        manager.register_handler(&tenants(), "ns", handler);

        store.create(&tenants(), requested("other", "x")).await.unwrap();
        store.create(&tenants(), requested("ns", "a")).await.unwrap();

        for _ in 0..200 {
            if !seen.lock().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*seen.lock(), vec!["a".to_string()]);
        assert!(manager.cached(&tenants(), "ns", "a").is_some());
        assert!(manager.cached(&tenants(), "ns", "missing").is_none());
        manager.stop();
    }

    #[tokio::test]
    async fn test_unregister_stops_dispatch() {
        let store = Arc::new(MemoryStore::new());
        let manager = Manager::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            BackoffConfig::testing(),
            CancellationToken::new(),
        );
        manager.start(&[tenants()]).await.unwrap();

        let (handler, seen) = recording();
        manager.register_handler(&tenants(), "ns", handler);
        assert_eq!(manager.handler_count(), 1);
        manager.unregister_handler(&tenants(), "ns");
        assert_eq!(manager.handler_count(), 0);

        store.create(&tenants(), requested("ns", "a")).await.unwrap();
        // Wait until the informer has seen the record, then check nothing fired.
        for _ in 0..200 {
            if manager.cached(&tenants(), "ns", "a").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(manager.cached(&tenants(), "ns", "a").is_some());
        assert!(seen.lock().is_empty());
        manager.stop();
    }

    #[tokio::test]
    #[should_panic(expected = "not watched")]
    async fn test_register_unwatched_type_panics() {
        let store = Arc::new(MemoryStore::new());
        let manager = Manager::new(store, BackoffConfig::testing(), CancellationToken::new());
        let (handler, _seen) = recording();
        manager.register_handler(&tenants(), "ns", handler);
    }

    #[tokio::test]
    async fn test_start_cancelled() {
        let store = Arc::new(MemoryStore::new());
        store.forbid(crate::store::memory::Verb::List);
        let cancel = CancellationToken::new();
        let manager = Manager::new(store, BackoffConfig::testing(), cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let result = manager.start(&[tenants()]).await;
        assert!(matches!(result, Err(ReplicationError::Shutdown)));
    }
}
