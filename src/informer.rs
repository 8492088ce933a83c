//! Filtered watch cache.
//!
//! An [`Informer`] keeps an in-memory copy of every record of one type that
//! matches a label selector, and calls a handler for each change. It lists
//! first, then consumes the store's watch stream; when the stream ends or
//! loses continuity it relists and diffs the result against its cache, so
//! handlers still see records that changed or vanished while it was blind.
//!
//! Handlers run inline on the informer's task and must not block.

use crate::labels::LabelSelector;
use crate::record::Record;
use crate::registry::RecordType;
use crate::resilience::BackoffConfig;
use crate::store::{ObjectStore, WatchEvent};
use dashmap::DashMap;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, trace, warn, Instrument};

/// Change callback. Receives the latest known state of the changed record.
pub type RecordHandler = Arc<dyn Fn(&Record) + Send + Sync>;

type CacheKey = (String, String);

fn key_of(record: &Record) -> CacheKey {
    (record.metadata.namespace.clone(), record.metadata.name.clone())
}

/// A list-then-watch cache over one record type.
pub struct Informer {
    store: Arc<dyn ObjectStore>,
    resource: RecordType,
    namespace: Option<String>,
    selector: LabelSelector,
    handler: RecordHandler,
    backoff: BackoffConfig,
    cache: DashMap<CacheKey, Record>,
    synced: watch::Sender<bool>,
}

impl Informer {
    /// Start an informer on a background task that runs until `cancel` fires.
    ///
    /// `namespace = None` watches every namespace.
    pub fn spawn(
        store: Arc<dyn ObjectStore>,
        resource: RecordType,
        namespace: Option<String>,
        selector: LabelSelector,
        handler: RecordHandler,
        backoff: BackoffConfig,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (synced, _) = watch::channel(false);
        let informer = Arc::new(Self {
            store,
            resource,
            namespace,
            selector,
            handler,
            backoff,
            cache: DashMap::new(),
            synced,
        });

        let span = info_span!(
            "informer",
            resource = %informer.resource,
            namespace = informer.namespace.as_deref().unwrap_or("*")
        );
        let runner = Arc::clone(&informer);
        tokio::spawn(runner.run(cancel).instrument(span));
        informer
    }

    pub fn resource(&self) -> &RecordType {
        &self.resource
    }

    /// Whether the initial list has completed.
    pub fn has_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Wait for the initial list. Returns `false` if `cancel` fired first.
    pub async fn wait_for_sync(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.synced.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return true;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                _ = cancel.cancelled() => return false,
            }
        }
    }

    /// Cached records, optionally restricted to one namespace.
    pub fn list(&self, namespace: Option<&str>) -> Vec<Record> {
        self.cache
            .iter()
            .filter(|entry| namespace.map_or(true, |ns| entry.key().0 == ns))
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Record> {
        self.cache
            .get(&(namespace.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut failures: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // Subscribe before listing so nothing between the two is missed.
            let mut stream = self.store.watch(&self.resource, self.namespace.as_deref());

            let listed = self
                .store
                .list(&self.resource, self.namespace.as_deref(), &self.selector)
                .await;
            match listed {
                Ok(records) => {
                    failures = 0;
                    let count = records.len();
                    self.replace(records);
                    self.synced.send_replace(true);
                    debug!(count, "Informer listed");
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.backoff.delay_for_attempt(failures);
                    warn!(
                        error = %e,
                        attempt = failures,
                        delay_ms = delay.as_millis() as u64,
                        "Informer list failed, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            }

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Informer stopping");
                        return;
                    }
                    event = stream.next() => match event {
                        Some(WatchEvent::Added(record)) | Some(WatchEvent::Modified(record)) => {
                            self.apply_upsert(record);
                        }
                        Some(WatchEvent::Deleted(record)) => self.apply_delete(record),
                        Some(WatchEvent::Restart) => {
                            debug!("Watch lost continuity, relisting");
                            break;
                        }
                        None => {
                            debug!("Watch stream ended, relisting");
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                _ = tokio::time::sleep(self.backoff.initial_delay) => {}
                            }
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Replace the cache with a fresh list, notifying for every difference.
    fn replace(&self, records: Vec<Record>) {
        let mut seen = HashSet::with_capacity(records.len());

        for record in records {
            let key = key_of(&record);
            seen.insert(key.clone());
            let changed = self
                .cache
                .get(&key)
                .map_or(true, |cached| *cached.value() != record);
            if changed {
                self.cache.insert(key, record.clone());
                (self.handler)(&record);
            }
        }

        let vanished: Vec<Record> = self
            .cache
            .iter()
            .filter(|entry| !seen.contains(entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        for record in vanished {
            self.cache.remove(&key_of(&record));
            trace!(name = %record.name(), "Record vanished during relist");
            (self.handler)(&record);
        }
    }

    fn apply_upsert(&self, record: Record) {
        let key = key_of(&record);
        if self.selector.matches_record(&record) {
            self.cache.insert(key, record.clone());
            (self.handler)(&record);
        } else if self.cache.remove(&key).is_some() {
            // No longer selected: consumers see it as gone.
            (self.handler)(&record);
        }
    }

    fn apply_delete(&self, record: Record) {
        let removed = self.cache.remove(&key_of(&record)).is_some();
        if removed || self.selector.matches_record(&record) {
            (self.handler)(&record);
        }
    }
}

impl std::fmt::Debug for Informer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Informer")
            .field("resource", &self.resource)
            .field("namespace", &self.namespace)
            .field("selector", &self.selector.to_string())
            .field("cached", &self.cache.len())
            .finish()
    }
}
