//! In-process [`ObjectStore`] implementation.
//!
//! Behaves like a control-plane API server for the operations the engine
//! uses:
//!
//! - Monotonic resource versions and optimistic concurrency on writes
//! - `create`/`update` ignore `status`; `update_status` only touches `status`
//! - Deleting a record that holds finalizers only sets its deletion marker;
//!   removing the last finalizer from such a record removes it
//! - No-op updates do not bump the version or emit watch events
//! - Watch fan-out to any number of subscribers
//!
//! For failure testing it can revoke permissions per verb and inject one-shot
//! errors, and it counts every call by verb.

use super::{BoxFuture, ObjectStore, StoreError, StoreResult, WatchEvent, WatchStream};
use crate::labels::LabelSelector;
use crate::record::{Record, Section};
use crate::registry::RecordType;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Watch channel capacity. Slow subscribers past this see [`WatchEvent::Restart`].
const WATCH_CAPACITY: usize = 1024;

/// API verbs, used for permission rules, fault injection and call counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::UpdateStatus => "update/status",
            Verb::Delete => "delete",
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, Verb::Create | Verb::Update | Verb::UpdateStatus | Verb::Delete)
    }

    const ALL: [Verb; 6] = [
        Verb::Get,
        Verb::List,
        Verb::Create,
        Verb::Update,
        Verb::UpdateStatus,
        Verb::Delete,
    ];
}

type Key = (RecordType, String, String);

#[derive(Clone)]
struct StoredEvent {
    resource: RecordType,
    namespace: String,
    event: WatchEvent,
}

#[derive(Default)]
struct State {
    records: BTreeMap<Key, Record>,
    next_version: u64,
    forbidden: HashSet<Verb>,
    faults: VecDeque<(Verb, StoreError)>,
    calls: HashMap<Verb, usize>,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// An in-memory control-plane store.
pub struct MemoryStore {
    state: Mutex<State>,
    events: broadcast::Sender<StoredEvent>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    /// Revoke permission for `verb` on every record type.
    pub fn forbid(&self, verb: Verb) {
        self.state.lock().forbidden.insert(verb);
    }

    /// Revoke every permission.
    pub fn forbid_all(&self) {
        self.state.lock().forbidden.extend(Verb::ALL);
    }

    /// Restore every permission.
    pub fn allow_all(&self) {
        self.state.lock().forbidden.clear();
    }

    /// Make the next call with `verb` fail with `error`.
    pub fn fail_next(&self, verb: Verb, error: StoreError) {
        self.state.lock().faults.push_back((verb, error));
    }

    /// Number of calls issued with `verb`, including failed ones.
    pub fn calls(&self, verb: Verb) -> usize {
        self.state.lock().calls.get(&verb).copied().unwrap_or(0)
    }

    /// Number of write calls issued, including failed ones.
    pub fn write_calls(&self) -> usize {
        let state = self.state.lock();
        state
            .calls
            .iter()
            .filter(|(verb, _)| verb.is_write())
            .map(|(_, count)| *count)
            .sum()
    }

    /// Number of records currently stored for `resource`.
    pub fn count(&self, resource: &RecordType) -> usize {
        self.state
            .lock()
            .records
            .keys()
            .filter(|(rt, _, _)| rt == resource)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().records.is_empty()
    }

    /// Synchronous point read, bypassing permissions and call counting.
    pub fn peek(&self, resource: &RecordType, namespace: &str, name: &str) -> Option<Record> {
        self.state
            .lock()
            .records
            .get(&(resource.clone(), namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Count the call, then apply permission rules and injected faults.
    fn admit(&self, state: &mut State, verb: Verb, resource: &RecordType, namespace: &str) -> StoreResult<()> {
        *state.calls.entry(verb).or_insert(0) += 1;

        if state.forbidden.contains(&verb) {
            return Err(StoreError::Forbidden {
                verb: verb.as_str().to_string(),
                resource: resource.to_string(),
                namespace: namespace.to_string(),
            });
        }

        if let Some(pos) = state.faults.iter().position(|(v, _)| *v == verb) {
            if let Some((_, err)) = state.faults.remove(pos) {
                return Err(err);
            }
        }
        Ok(())
    }

    fn emit(&self, resource: &RecordType, event: WatchEvent) {
        let namespace = match &event {
            WatchEvent::Added(r) | WatchEvent::Modified(r) | WatchEvent::Deleted(r) => {
                r.metadata.namespace.clone()
            }
            WatchEvent::Restart => String::new(),
        };
        // No subscribers is fine.
        let _ = self.events.send(StoredEvent {
            resource: resource.clone(),
            namespace,
            event,
        });
    }

    fn not_found(resource: &RecordType, namespace: &str, name: &str) -> StoreError {
        StoreError::NotFound {
            resource: resource.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    fn check_version(resource: &RecordType, incoming: &Record, stored: &Record) -> StoreResult<()> {
        match &incoming.metadata.resource_version {
            Some(rv) if Some(rv) != stored.metadata.resource_version.as_ref() => {
                Err(StoreError::Conflict {
                    resource: resource.to_string(),
                    namespace: stored.metadata.namespace.clone(),
                    name: stored.metadata.name.clone(),
                    message: format!(
                        "resource version {} does not match {}",
                        rv,
                        stored.metadata.resource_version.as_deref().unwrap_or("<none>")
                    ),
                })
            }
            _ => Ok(()),
        }
    }

    fn do_get(&self, resource: &RecordType, namespace: &str, name: &str) -> StoreResult<Record> {
        let mut state = self.state.lock();
        self.admit(&mut state, Verb::Get, resource, namespace)?;
        state
            .records
            .get(&(resource.clone(), namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Self::not_found(resource, namespace, name))
    }

    fn do_list(
        &self,
        resource: &RecordType,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<Record>> {
        let mut state = self.state.lock();
        self.admit(&mut state, Verb::List, resource, namespace.unwrap_or(""))?;
        Ok(state
            .records
            .iter()
            .filter(|((rt, ns, _), record)| {
                rt == resource
                    && namespace.map_or(true, |n| n == ns.as_str())
                    && selector.matches_record(record)
            })
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn do_create(&self, resource: &RecordType, record: Record) -> StoreResult<Record> {
        let mut state = self.state.lock();
        let namespace = record.metadata.namespace.clone();
        let name = record.metadata.name.clone();
        self.admit(&mut state, Verb::Create, resource, &namespace)?;

        if name.is_empty() {
            return Err(StoreError::Invalid("record name must not be empty".to_string()));
        }

        let key = (resource.clone(), namespace.clone(), name.clone());
        if state.records.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                resource: resource.to_string(),
                namespace,
                name,
            });
        }

        let mut created = record;
        let version = state.bump();
        created.metadata.uid = Some(format!("uid-{}", version));
        created.metadata.resource_version = Some(version);
        created.metadata.deletion_timestamp = None;
        created.set_section(Section::Status, None);

        state.records.insert(key, created.clone());
        drop(state);

        self.emit(resource, WatchEvent::Added(created.clone()));
        Ok(created)
    }

    fn do_update(&self, resource: &RecordType, record: Record) -> StoreResult<Record> {
        let mut state = self.state.lock();
        let namespace = record.metadata.namespace.clone();
        let name = record.metadata.name.clone();
        self.admit(&mut state, Verb::Update, resource, &namespace)?;

        let key = (resource.clone(), namespace.clone(), name.clone());
        let stored = state
            .records
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(resource, &namespace, &name))?;
        Self::check_version(resource, &record, &stored)?;

        let mut updated = record;
        updated.metadata.uid = stored.metadata.uid.clone();
        updated.metadata.deletion_timestamp = stored.metadata.deletion_timestamp;
        updated.metadata.resource_version = stored.metadata.resource_version.clone();
        updated.copy_section_from(&stored, Section::Status);

        if updated == stored {
            return Ok(stored);
        }

        if updated.is_deleting() && updated.metadata.finalizers.is_empty() {
            state.records.remove(&key);
            drop(state);
            self.emit(resource, WatchEvent::Deleted(updated.clone()));
            return Ok(updated);
        }

        updated.metadata.resource_version = Some(state.bump());
        state.records.insert(key, updated.clone());
        drop(state);

        self.emit(resource, WatchEvent::Modified(updated.clone()));
        Ok(updated)
    }

    fn do_update_status(&self, resource: &RecordType, record: Record) -> StoreResult<Record> {
        let mut state = self.state.lock();
        let namespace = record.metadata.namespace.clone();
        let name = record.metadata.name.clone();
        self.admit(&mut state, Verb::UpdateStatus, resource, &namespace)?;

        let key = (resource.clone(), namespace.clone(), name.clone());
        let stored = state
            .records
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(resource, &namespace, &name))?;
        Self::check_version(resource, &record, &stored)?;

        let mut updated = stored.clone();
        updated.copy_section_from(&record, Section::Status);
        if updated == stored {
            return Ok(stored);
        }

        updated.metadata.resource_version = Some(state.bump());
        state.records.insert(key, updated.clone());
        drop(state);

        self.emit(resource, WatchEvent::Modified(updated.clone()));
        Ok(updated)
    }

    fn do_delete(&self, resource: &RecordType, namespace: &str, name: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        self.admit(&mut state, Verb::Delete, resource, namespace)?;

        let key = (resource.clone(), namespace.to_string(), name.to_string());
        let stored = state
            .records
            .get(&key)
            .cloned()
            .ok_or_else(|| Self::not_found(resource, namespace, name))?;

        if stored.metadata.finalizers.is_empty() {
            state.records.remove(&key);
            drop(state);
            self.emit(resource, WatchEvent::Deleted(stored));
            return Ok(());
        }

        if stored.is_deleting() {
            return Ok(());
        }

        let mut marked = stored;
        marked.metadata.deletion_timestamp = Some(SystemTime::now());
        marked.metadata.resource_version = Some(state.bump());
        state.records.insert(key, marked.clone());
        drop(state);

        self.emit(resource, WatchEvent::Modified(marked));
        Ok(())
    }
}

impl ObjectStore for MemoryStore {
    fn get(&self, resource: &RecordType, namespace: &str, name: &str) -> BoxFuture<'_, Record> {
        let result = self.do_get(resource, namespace, name);
        Box::pin(async move { result })
    }

    fn list(
        &self,
        resource: &RecordType,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> BoxFuture<'_, Vec<Record>> {
        let result = self.do_list(resource, namespace, selector);
        Box::pin(async move { result })
    }

    fn create(&self, resource: &RecordType, record: Record) -> BoxFuture<'_, Record> {
        let result = self.do_create(resource, record);
        Box::pin(async move { result })
    }

    fn update(&self, resource: &RecordType, record: Record) -> BoxFuture<'_, Record> {
        let result = self.do_update(resource, record);
        Box::pin(async move { result })
    }

    fn update_status(&self, resource: &RecordType, record: Record) -> BoxFuture<'_, Record> {
        let result = self.do_update_status(resource, record);
        Box::pin(async move { result })
    }

    fn delete(&self, resource: &RecordType, namespace: &str, name: &str) -> BoxFuture<'_, ()> {
        let result = self.do_delete(resource, namespace, name);
        Box::pin(async move { result })
    }

    fn watch(&self, resource: &RecordType, namespace: Option<&str>) -> WatchStream {
        let rx = self.events.subscribe();
        let resource = resource.clone();
        let namespace = namespace.map(str::to_string);

        futures::stream::unfold(rx, move |mut rx| {
            let resource = resource.clone();
            let namespace = namespace.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(stored) => {
                            let ns_matches = namespace
                                .as_deref()
                                .map_or(true, |ns| stored.namespace == ns);
                            if stored.resource == resource && ns_matches {
                                return Some((stored.event, rx));
                            }
                        }
                        Err(RecvError::Lagged(_)) => return Some((WatchEvent::Restart, rx)),
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tenants() -> RecordType {
        RecordType::new("core.crd-replicator.io", "v1alpha1", "tenants")
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryStore::new();
        let created = store
            .create(
                &tenants(),
                Record::new("ns", "a")
                    .with_spec(json!({"x": 1}))
                    .with_status(json!({"ignored": true})),
            )
            .await
            .unwrap();

        assert!(created.metadata.resource_version.is_some());
        assert!(created.section(Section::Status).is_none());

        let fetched = store.get(&tenants(), "ns", "a").await.unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let store = MemoryStore::new();
        store.create(&tenants(), Record::new("ns", "a")).await.unwrap();
        let err = store.create(&tenants(), Record::new("ns", "a")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new();
        let err = store.get(&tenants(), "ns", "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_conflict() {
        let store = MemoryStore::new();
        let created = store
            .create(&tenants(), Record::new("ns", "a").with_spec(json!({"v": 1})))
            .await
            .unwrap();

        let mut first = created.clone();
        first.set_section(Section::Spec, Some(json!({"v": 2})));
        store.update(&tenants(), first).await.unwrap();

        let mut stale = created;
        stale.set_section(Section::Spec, Some(json!({"v": 3})));
        let err = store.update(&tenants(), stale).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_update_ignores_status() {
        let store = MemoryStore::new();
        let created = store.create(&tenants(), Record::new("ns", "a")).await.unwrap();

        let with_status = created.clone().with_status(json!({"phase": "Ready"}));
        let updated = store.update(&tenants(), with_status.clone()).await.unwrap();
        assert!(updated.section(Section::Status).is_none());
        // Nothing but status changed, so the version did not move.
        assert_eq!(updated.metadata.resource_version, created.metadata.resource_version);

        let updated = store.update_status(&tenants(), with_status).await.unwrap();
        assert_eq!(updated.status().unwrap().get("phase"), Some(&json!("Ready")));
    }

    #[tokio::test]
    async fn test_delete_with_finalizer() {
        let store = MemoryStore::new();
        let mut record = Record::new("ns", "a");
        record.add_finalizer("f");
        store.create(&tenants(), record).await.unwrap();

        store.delete(&tenants(), "ns", "a").await.unwrap();
        let marked = store.get(&tenants(), "ns", "a").await.unwrap();
        assert!(marked.is_deleting());

        let mut released = marked;
        released.remove_finalizer("f");
        store.update(&tenants(), released).await.unwrap();
        assert!(store.get(&tenants(), "ns", "a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_with_selector() {
        let store = MemoryStore::new();
        store
            .create(&tenants(), Record::new("ns", "a").with_label("k", "v"))
            .await
            .unwrap();
        store.create(&tenants(), Record::new("ns", "b")).await.unwrap();
        store
            .create(&tenants(), Record::new("other", "c").with_label("k", "v"))
            .await
            .unwrap();

        let selector = LabelSelector::everything().equals("k", "v");
        assert_eq!(store.list(&tenants(), Some("ns"), &selector).await.unwrap().len(), 1);
        assert_eq!(store.list(&tenants(), None, &selector).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_forbid_and_faults() {
        let store = MemoryStore::new();
        store.forbid(Verb::Get);
        assert!(store.get(&tenants(), "ns", "a").await.unwrap_err().is_forbidden());
        store.allow_all();

        store.fail_next(Verb::Create, StoreError::Unavailable("boom".into()));
        assert!(store.create(&tenants(), Record::new("ns", "a")).await.is_err());
        assert!(store.create(&tenants(), Record::new("ns", "a")).await.is_ok());

        assert_eq!(store.calls(Verb::Create), 2);
        assert_eq!(store.calls(Verb::Get), 1);
        assert_eq!(store.write_calls(), 2);
    }

    #[tokio::test]
    async fn test_watch_filters_by_namespace() {
        let store = MemoryStore::new();
        let mut stream = store.watch(&tenants(), Some("ns"));

        store.create(&tenants(), Record::new("other", "x")).await.unwrap();
        store.create(&tenants(), Record::new("ns", "a")).await.unwrap();
        store.delete(&tenants(), "ns", "a").await.unwrap();

        match stream.next().await {
            Some(WatchEvent::Added(r)) => assert_eq!(r.name(), "a"),
            other => panic!("unexpected event: {:?}", other),
        }
        match stream.next().await {
            Some(WatchEvent::Deleted(r)) => assert_eq!(r.name(), "a"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
