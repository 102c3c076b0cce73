//! The document store contract the sync client is written against.
//!
//! A store pushes a complete [`Snapshot`] of everything a subscription covers,
//! once when the subscription starts and again after every write that touches
//! it. Snapshots for one subscription are delivered in write order.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;
use tandem_shared::{Collection, DocumentPath};
use tokio::sync::mpsc;

use crate::error::Result;

pub type SubscriptionId = u64;

/// Read-modify-write closure applied atomically to one document.
///
/// Receives the current body (`None` if the document does not exist) and
/// returns the new body, or `None` to leave the document untouched.
pub type Mutation = Box<dyn FnOnce(Option<Value>) -> Result<Option<Value>> + Send>;

/// What a subscription observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    /// One document.
    Document(DocumentPath),
    /// Every document of a collection.
    Collection(Collection),
    /// The documents of `collection` whose key is in `keys`.
    Keys {
        collection: Collection,
        keys: BTreeSet<String>,
    },
}

impl WatchTarget {
    pub fn matches(&self, path: &DocumentPath) -> bool {
        match self {
            WatchTarget::Document(p) => p == path,
            WatchTarget::Collection(c) => *c == path.collection,
            WatchTarget::Keys { collection, keys } => {
                *collection == path.collection && keys.contains(&path.key)
            }
        }
    }
}

/// Point-in-time copy of one document. `data` is `None` when the document
/// does not exist (never created, or deleted).
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub path: DocumentPath,
    pub data: Option<Value>,
}

/// Everything a subscription covers, as of one moment.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub subscription: SubscriptionId,
    pub documents: Vec<DocumentSnapshot>,
}

/// Live subscription handle. Dropping it (or calling [`cancel`]) stops
/// delivery; no snapshot is sent for it afterwards.
///
/// [`cancel`]: Subscription::cancel
pub struct Subscription {
    id: SubscriptionId,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Start pushing snapshots of `target` into `sink`. The first snapshot is
    /// sent before this returns.
    fn watch(&self, target: WatchTarget, sink: mpsc::UnboundedSender<Snapshot>)
        -> Result<Subscription>;

    async fn get(&self, path: &DocumentPath) -> Result<Option<Value>>;

    /// Replace the whole document.
    async fn set(&self, path: &DocumentPath, value: Value) -> Result<()>;

    async fn delete(&self, path: &DocumentPath) -> Result<()>;

    /// Atomic read-modify-write. Returns the body after the mutation.
    async fn update(&self, path: &DocumentPath, mutation: Mutation) -> Result<Option<Value>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tandem_shared::{ConversationId, UserId};

    #[test]
    fn keys_target_matches_only_listed_documents() {
        let target = WatchTarget::Keys {
            collection: Collection::Chats,
            keys: ["12".to_string()].into_iter().collect(),
        };
        assert!(target.matches(&DocumentPath::chat(&ConversationId::from("12"))));
        assert!(!target.matches(&DocumentPath::chat(&ConversationId::from("13"))));
        assert!(!target.matches(&DocumentPath::user(&UserId::from("12"))));
    }

    #[test]
    fn subscription_cancels_once_on_drop() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let sub = Subscription::new(7, move || {
            assert!(!flag.swap(true, Ordering::SeqCst));
        });
        assert_eq!(sub.id(), 7);
        sub.cancel();
        assert!(fired.load(Ordering::SeqCst));
    }
}
