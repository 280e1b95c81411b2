//! Typed façade over the shared document store.
//!
//! The store is an external, eventually consistent key/collection service.
//! Components only ever read or fully replace single documents, so the
//! adapter is shared as `Arc<dyn SignalingStore>` without extra locking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use futures::future::{self, BoxFuture, FutureExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;
use vigil_common::{Document, Error, Fields, Result};

/// Cancels a live store subscription exactly once.
pub struct SubscriptionGuard {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionGuard {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// A live stream of snapshots. Each item is the full current state, not a diff.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<Result<T>>,
    guard: SubscriptionGuard,
}

impl<T> Subscription<T> {
    pub fn new(rx: mpsc::UnboundedReceiver<Result<T>>, guard: SubscriptionGuard) -> Self {
        Self { rx, guard }
    }

    /// Next snapshot; `None` once the store stops delivering.
    pub async fn next(&mut self) -> Option<Result<T>> {
        self.rx.recv().await
    }

    pub fn cancel(&mut self) {
        self.guard.cancel();
        self.rx.close();
    }

    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<Result<T>>, SubscriptionGuard) {
        (self.rx, self.guard)
    }
}

pub trait SignalingStore: Send + Sync {
    /// Point read of one document.
    fn get<'a>(&'a self, collection: &'a str, id: &'a str)
        -> BoxFuture<'a, Result<Option<Document>>>;

    /// Create or fully replace a document.
    fn put<'a>(&'a self, collection: &'a str, id: &'a str, fields: Fields)
        -> BoxFuture<'a, Result<()>>;

    /// Create a document under a store-assigned id.
    fn add<'a>(&'a self, collection: &'a str, fields: Fields) -> BoxFuture<'a, Result<String>>;

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Live membership of a collection, starting with the current snapshot.
    fn list(&self, collection: &str) -> Result<Subscription<Vec<Document>>>;

    /// Live view of one document; `None` while it does not exist.
    fn watch(&self, collection: &str, id: &str) -> Result<Subscription<Option<Document>>>;
}

enum Listener {
    Collection {
        collection: String,
        tx: mpsc::UnboundedSender<Result<Vec<Document>>>,
    },
    Document {
        collection: String,
        id: String,
        tx: mpsc::UnboundedSender<Result<Option<Document>>>,
    },
}

impl Listener {
    fn collection(&self) -> &str {
        match self {
            Listener::Collection { collection, .. } | Listener::Document { collection, .. } => {
                collection
            }
        }
    }
}

#[derive(Default)]
struct StoreState {
    collections: HashMap<String, Vec<Document>>,
    listeners: HashMap<u64, Listener>,
    next_listener: u64,
    cancelled: usize,
    unavailable: bool,
}

impl StoreState {
    fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.collections.get(collection).cloned().unwrap_or_default()
    }

    fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| d.id == id))
            .cloned()
    }

    fn register(&mut self, listener: Listener) -> u64 {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.insert(id, listener);
        id
    }

    /// Push the current state to every listener on `collection`, dropping
    /// listeners whose receiving side is gone.
    fn notify(&mut self, collection: &str) {
        let snapshot = self.snapshot(collection);
        let mut closed = Vec::new();
        for (key, listener) in &self.listeners {
            let delivered = match listener {
                Listener::Collection { collection: c, tx } if c == collection => {
                    tx.send(Ok(snapshot.clone())).is_ok()
                }
                Listener::Document {
                    collection: c,
                    id,
                    tx,
                } if c == collection => {
                    let doc = snapshot.iter().find(|d| &d.id == id).cloned();
                    tx.send(Ok(doc)).is_ok()
                }
                _ => true,
            };
            if !delivered {
                closed.push(*key);
            }
        }
        for key in closed {
            self.listeners.remove(&key);
        }
    }
}

/// In-process store with the same observable contract as the hosted one:
/// arrival-ordered collections, full snapshots on every change, initial
/// snapshot on subscribe.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        lock_state(&self.state)
    }

    fn check_available(state: &StoreState) -> Result<()> {
        if state.unavailable {
            Err(Error::store("store unavailable"))
        } else {
            Ok(())
        }
    }

    fn guard_for(&self, key: u64) -> SubscriptionGuard {
        let weak: Weak<Mutex<StoreState>> = Arc::downgrade(&self.state);
        SubscriptionGuard::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = lock_state(&state);
                if state.listeners.remove(&key).is_some() {
                    state.cancelled += 1;
                }
            }
        })
    }

    pub fn put_now(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        if id.is_empty() {
            return Err(Error::invalid_input("document id is empty"));
        }
        let mut state = self.lock();
        Self::check_available(&state)?;
        let docs = state.collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|d| d.id == id) {
            Some(existing) => existing.fields = fields,
            None => docs.push(Document::new(id, fields)),
        }
        state.notify(collection);
        debug!(collection, id, "document written");
        Ok(())
    }

    pub fn delete_now(&self, collection: &str, id: &str) -> Result<()> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        let removed = match state.collections.get_mut(collection) {
            Some(docs) => {
                let before = docs.len();
                docs.retain(|d| d.id != id);
                before != docs.len()
            }
            None => false,
        };
        if removed {
            state.notify(collection);
            debug!(collection, id, "document deleted");
        }
        Ok(())
    }

    /// Current contents of a collection, outside any subscription.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock().snapshot(collection)
    }

    /// Terminate every live subscription on `collection` with an error,
    /// as a dropped backend connection would.
    pub fn fail_subscriptions(&self, collection: &str, reason: &str) {
        let mut state = self.lock();
        let keys: Vec<u64> = state
            .listeners
            .iter()
            .filter(|(_, l)| l.collection() == collection)
            .map(|(k, _)| *k)
            .collect();
        for key in keys {
            if let Some(listener) = state.listeners.remove(&key) {
                let err = Error::subscription(reason);
                match listener {
                    Listener::Collection { tx, .. } => {
                        let _ = tx.send(Err(err));
                    }
                    Listener::Document { tx, .. } => {
                        let _ = tx.send(Err(err));
                    }
                }
            }
        }
        warn!(collection, reason, "subscriptions failed");
    }

    /// Reject all subsequent reads, writes and subscriptions.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    pub fn cancelled_count(&self) -> usize {
        self.lock().cancelled
    }
}

fn lock_state(state: &Mutex<StoreState>) -> MutexGuard<'_, StoreState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SignalingStore for MemoryStore {
    fn get<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Document>>> {
        let state = self.lock();
        let result = Self::check_available(&state).map(|_| state.document(collection, id));
        future::ready(result).boxed()
    }

    fn put<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        fields: Fields,
    ) -> BoxFuture<'a, Result<()>> {
        future::ready(self.put_now(collection, id, fields)).boxed()
    }

    fn add<'a>(&'a self, collection: &'a str, fields: Fields) -> BoxFuture<'a, Result<String>> {
        let id = Uuid::new_v4().simple().to_string();
        let result = self.put_now(collection, &id, fields).map(|_| id);
        future::ready(result).boxed()
    }

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> BoxFuture<'a, Result<()>> {
        future::ready(self.delete_now(collection, id)).boxed()
    }

    fn list(&self, collection: &str) -> Result<Subscription<Vec<Document>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = {
            let mut state = self.lock();
            if state.unavailable {
                return Err(Error::subscription("store unavailable"));
            }
            let _ = tx.send(Ok(state.snapshot(collection)));
            state.register(Listener::Collection {
                collection: collection.to_string(),
                tx,
            })
        };
        Ok(Subscription::new(rx, self.guard_for(key)))
    }

    fn watch(&self, collection: &str, id: &str) -> Result<Subscription<Option<Document>>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = {
            let mut state = self.lock();
            if state.unavailable {
                return Err(Error::subscription("store unavailable"));
            }
            let _ = tx.send(Ok(state.document(collection, id)));
            state.register(Listener::Document {
                collection: collection.to_string(),
                id: id.to_string(),
                tx,
            })
        };
        Ok(Subscription::new(rx, self.guard_for(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::fields;

    #[tokio::test]
    async fn test_put_replaces_in_place() {
        let store = MemoryStore::new();
        store.put("c", "a", fields! { "v" => 1i64 }).await.unwrap();
        store.put("c", "b", fields! { "v" => 2i64 }).await.unwrap();
        store.put("c", "a", fields! { "v" => 3i64 }).await.unwrap();

        let docs = store.documents("c");
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "a");
        assert_eq!(docs[0].get("v"), Some(&vigil_common::Value::Int(3)));
        assert_eq!(docs[1].id, "b");
    }

    #[tokio::test]
    async fn test_list_delivers_initial_and_updates() {
        let store = MemoryStore::new();
        store.put_now("c", "a", Fields::new()).unwrap();

        let mut sub = store.list("c").unwrap();
        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);

        store.delete_now("c", "a").unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_watch_sees_creation_and_deletion() {
        let store = MemoryStore::new();
        let mut sub = store.watch("c", "x").unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap(), None);

        store.put_now("c", "x", fields! { "k" => "v" }).unwrap();
        let doc = sub.next().await.unwrap().unwrap().unwrap();
        assert_eq!(doc.str_field("k"), Some("v"));

        // Sibling writes redeliver the unchanged document
        store.put_now("c", "y", Fields::new()).unwrap();
        let same = sub.next().await.unwrap().unwrap().unwrap();
        assert_eq!(same.id, "x");

        store.delete_now("c", "x").unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap(), None);
    }

    #[test]
    fn test_cancel_is_counted_once() {
        let store = MemoryStore::new();
        let mut sub = store.list("c").unwrap();
        assert_eq!(store.listener_count(), 1);

        sub.cancel();
        sub.cancel();
        drop(sub);
        assert_eq!(store.listener_count(), 0);
        assert_eq!(store.cancelled_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_subscription_is_not_cancelled_again() {
        let store = MemoryStore::new();
        let mut sub = store.list("c").unwrap();
        let _initial = sub.next().await;

        store.fail_subscriptions("c", "backend reset");
        let err = sub.next().await.unwrap().unwrap_err();
        assert!(matches!(err, Error::SubscriptionFailure(_)));
        assert!(sub.next().await.is_none());

        drop(sub);
        assert_eq!(store.cancelled_count(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_rejects_operations() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.put("c", "a", Fields::new()).await.is_err());
        assert!(matches!(store.list("c"), Err(Error::SubscriptionFailure(_))));
        assert!(store.put_now("c", "", Fields::new()).is_err());
    }

    #[tokio::test]
    async fn test_add_assigns_unique_ids() {
        let store = MemoryStore::new();
        let a = store.add("logs", Fields::new()).await.unwrap();
        let b = store.add("logs", Fields::new()).await.unwrap();
        assert_ne!(a, b);
        assert!(store.get("logs", &a).await.unwrap().is_some());
    }
}
