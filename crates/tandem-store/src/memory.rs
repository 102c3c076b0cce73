//! In-process [`RemoteStore`] with push notifications.
//!
//! Documents live in a map guarded by a mutex; every committed write fans a
//! fresh snapshot out to each matching subscription while the lock is held,
//! which keeps per-subscription delivery in write order. An optional
//! [`Database`] makes the documents durable.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use serde_json::Value;
use tandem_shared::DocumentPath;
use tokio::sync::{mpsc, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, trace};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::remote::{
    DocumentSnapshot, Mutation, RemoteStore, Snapshot, Subscription, SubscriptionId, WatchTarget,
};

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    /// Writers take a read permit; [`MemoryStore::hold_writes`] takes the
    /// write side to park them.
    gate: Arc<RwLock<()>>,
    next_subscription: AtomicU64,
}

struct Watcher {
    target: WatchTarget,
    sink: mpsc::UnboundedSender<Snapshot>,
}

#[derive(Default)]
struct State {
    documents: BTreeMap<DocumentPath, Value>,
    watchers: HashMap<SubscriptionId, Watcher>,
    database: Option<Database>,
    failing_writes: usize,
}

/// Parks every write on the store until dropped.
pub struct WriteHold {
    _guard: OwnedRwLockWriteGuard<()>,
}

impl MemoryStore {
    /// A volatile store.
    pub fn new() -> Self {
        Self::from_state(State::default())
    }

    /// A store backed by `database`; existing documents are loaded first.
    pub fn with_database(database: Database) -> Result<Self> {
        let documents: BTreeMap<DocumentPath, Value> =
            database.load_documents()?.into_iter().collect();
        tracing::info!(count = documents.len(), "loaded persisted documents");
        Ok(Self::from_state(State {
            documents,
            database: Some(database),
            ..State::default()
        }))
    }

    fn from_state(state: State) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                gate: Arc::new(RwLock::new(())),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    /// Make the next `n` writes fail with [`StoreError::Unavailable`].
    pub fn fail_next_writes(&self, n: usize) -> Result<()> {
        self.inner.lock()?.failing_writes = n;
        Ok(())
    }

    /// Park all writes until the returned guard is dropped. Writes already
    /// past the gate complete normally.
    pub async fn hold_writes(&self) -> WriteHold {
        WriteHold {
            _guard: self.inner.gate.clone().write_owned().await,
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.inner
            .lock()
            .map(|s| s.watchers.len())
            .unwrap_or_default()
    }

    /// Synchronous read, bypassing the write gate.
    pub fn peek(&self, path: &DocumentPath) -> Option<Value> {
        self.inner
            .lock()
            .ok()
            .and_then(|s| s.documents.get(path).cloned())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl State {
    fn check_injected_failure(&mut self, path: &DocumentPath) -> Result<()> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            debug!(%path, remaining = self.failing_writes, "rejecting write (injected failure)");
            return Err(StoreError::Unavailable(format!("write to {path} rejected")));
        }
        Ok(())
    }

    fn commit(&mut self, path: &DocumentPath, value: Option<Value>) -> Result<()> {
        if let Some(ref db) = self.database {
            match value {
                Some(ref body) => db.put_document(path, body)?,
                None => {
                    db.delete_document(path)?;
                }
            }
        }

        match value {
            Some(body) => {
                self.documents.insert(path.clone(), body);
            }
            None => {
                self.documents.remove(path);
            }
        }

        self.notify(path);
        Ok(())
    }

    fn notify(&mut self, path: &DocumentPath) {
        let mut closed = Vec::new();
        for (id, watcher) in &self.watchers {
            if !watcher.target.matches(path) {
                continue;
            }
            let snapshot = self.snapshot_for(*id, &watcher.target);
            if watcher.sink.send(snapshot).is_err() {
                closed.push(*id);
            }
        }
        for id in closed {
            trace!(subscription = id, "dropping watcher with closed sink");
            self.watchers.remove(&id);
        }
    }

    fn snapshot_for(&self, subscription: SubscriptionId, target: &WatchTarget) -> Snapshot {
        let documents = match target {
            WatchTarget::Document(path) => vec![DocumentSnapshot {
                path: path.clone(),
                data: self.documents.get(path).cloned(),
            }],
            WatchTarget::Collection(collection) => self
                .documents
                .iter()
                .filter(|(p, _)| p.collection == *collection)
                .map(|(p, v)| DocumentSnapshot {
                    path: p.clone(),
                    data: Some(v.clone()),
                })
                .collect(),
            WatchTarget::Keys { collection, keys } => keys
                .iter()
                .map(|key| {
                    let path = DocumentPath {
                        collection: *collection,
                        key: key.clone(),
                    };
                    let data = self.documents.get(&path).cloned();
                    DocumentSnapshot { path, data }
                })
                .collect(),
        };
        Snapshot {
            subscription,
            documents,
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn watch(
        &self,
        target: WatchTarget,
        sink: mpsc::UnboundedSender<Snapshot>,
    ) -> Result<Subscription> {
        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        let mut state = self.inner.lock()?;

        let initial = state.snapshot_for(id, &target);
        // A receiver that is already gone gets no watcher.
        if sink.send(initial).is_ok() {
            debug!(subscription = id, target = ?target, "watch started");
            state.watchers.insert(id, Watcher { target, sink });
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                if let Ok(mut state) = inner.lock() {
                    if state.watchers.remove(&id).is_some() {
                        debug!(subscription = id, "watch cancelled");
                    }
                }
            }
        }))
    }

    async fn get(&self, path: &DocumentPath) -> Result<Option<Value>> {
        Ok(self.inner.lock()?.documents.get(path).cloned())
    }

    async fn set(&self, path: &DocumentPath, value: Value) -> Result<()> {
        let _permit = self.inner.gate.read().await;
        let mut state = self.inner.lock()?;
        state.check_injected_failure(path)?;
        state.commit(path, Some(value))
    }

    async fn delete(&self, path: &DocumentPath) -> Result<()> {
        let _permit = self.inner.gate.read().await;
        let mut state = self.inner.lock()?;
        state.check_injected_failure(path)?;
        state.commit(path, None)
    }

    async fn update(&self, path: &DocumentPath, mutation: Mutation) -> Result<Option<Value>> {
        let _permit = self.inner.gate.read().await;
        let mut state = self.inner.lock()?;
        state.check_injected_failure(path)?;

        let current = state.documents.get(path).cloned();
        match mutation(current.clone())? {
            Some(next) => {
                state.commit(path, Some(next.clone()))?;
                Ok(Some(next))
            }
            None => Ok(current),
        }
    }
}
