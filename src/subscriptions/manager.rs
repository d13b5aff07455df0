//! Subscription manager for broadcasting snapshots.

use crate::types::{Document, DocumentPath, Sequence};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{
    Cancellation, DropReason, StoreEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
    WatchTarget,
};

/// Internal subscription state.
struct Subscription {
    target: WatchTarget,
    /// Has room for `backlog` snapshots plus the final `Dropped` notice.
    sender: Sender<StoreEvent>,
    backlog: usize,
}

impl Subscription {
    /// Try to send a snapshot. On failure, returns why the subscriber must go.
    ///
    /// Sends are serialized by the store's write lock, so the last slot is
    /// always free for the notice that follows an overflow.
    fn try_send(&self, event: StoreEvent) -> Option<DropReason> {
        if self.sender.len() >= self.backlog {
            return Some(DropReason::BufferOverflow);
        }
        match self.sender.try_send(event) {
            Ok(()) => None,
            Err(TrySendError::Full(_)) => Some(DropReason::BufferOverflow),
            Err(TrySendError::Disconnected(_)) => Some(DropReason::Disconnected),
        }
    }
}

/// Manages subscriptions and fans out snapshots.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscription.
    ///
    /// Nothing is delivered yet; the caller sends the initial snapshot with
    /// [`send_to`](Self::send_to).
    pub fn subscribe(
        self: &Arc<Self>,
        target: WatchTarget,
        config: &SubscriptionConfig,
    ) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let backlog = config.buffer_size.max(1);
        let (sender, receiver) = bounded(backlog + 1);

        tracing::debug!(subscription = id.0, ?target, "subscribed");
        self.subscriptions.write().insert(
            id,
            Subscription {
                target,
                sender,
                backlog,
            },
        );

        SubscriptionHandle::new(id, receiver, Cancellation::new(id, Arc::downgrade(self)))
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            tracing::debug!(subscription = id.0, "unsubscribed");
            // Best effort; the receiver may already be gone.
            let _ = sub.sender.try_send(StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Send an event directly to one subscription.
    /// Returns false if the subscription is gone or was dropped.
    pub fn send_to(&self, id: SubscriptionId, event: StoreEvent) -> bool {
        let failure = {
            let subs = self.subscriptions.read();
            match subs.get(&id) {
                Some(sub) => sub.try_send(event),
                None => return false,
            }
        };

        match failure {
            None => true,
            Some(reason) => {
                self.drop_subscriptions(vec![(id, reason)]);
                false
            }
        }
    }

    /// Push fresh snapshots to every subscription affected by a write to `path`.
    ///
    /// `collection_documents` is only called if some subscriber watches the
    /// collection, and at most once.
    pub fn broadcast_change<F>(
        &self,
        path: &DocumentPath,
        sequence: Sequence,
        collection_documents: F,
        document: Option<&Document>,
    ) where
        F: FnOnce() -> Vec<Document>,
    {
        let mut documents_fn = Some(collection_documents);
        let mut collection_event: Option<StoreEvent> = None;
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if !sub.target.is_affected_by(path) {
                    continue;
                }

                let event = match &sub.target {
                    WatchTarget::Collection(collection) => collection_event
                        .get_or_insert_with(|| StoreEvent::CollectionSnapshot {
                            collection: collection.clone(),
                            documents: documents_fn.take().map(|f| f()).unwrap_or_default(),
                            sequence,
                        })
                        .clone(),
                    WatchTarget::Document(doc_path) => StoreEvent::DocumentSnapshot {
                        path: doc_path.clone(),
                        document: document.cloned(),
                        sequence,
                    },
                };

                if let Some(reason) = sub.try_send(event) {
                    to_remove.push((*id, reason));
                }
            }
        }

        if !to_remove.is_empty() {
            self.drop_subscriptions(to_remove);
        }
    }

    fn drop_subscriptions(&self, dropped: Vec<(SubscriptionId, DropReason)>) {
        let mut subs = self.subscriptions.write();
        for (id, reason) in dropped {
            if let Some(sub) = subs.remove(&id) {
                match reason {
                    DropReason::BufferOverflow => {
                        tracing::warn!(subscription = id.0, "dropping slow subscriber")
                    }
                    _ => tracing::debug!(subscription = id.0, ?reason, "dropping subscriber"),
                }
                // Lands in the reserved slot unless the receiver is gone.
                let _ = sub.sender.try_send(StoreEvent::Dropped { reason });
            }
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CollectionPath, DocumentId, Fields};
    use std::time::Duration;

    fn items() -> CollectionPath {
        CollectionPath::new("test", "items").unwrap()
    }

    fn make_doc(id: &str) -> Document {
        Document {
            id: DocumentId::new(id),
            fields: Fields::new(),
        }
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let manager = Arc::new(SubscriptionManager::new());

        let handle = manager.subscribe(
            WatchTarget::Collection(items()),
            &SubscriptionConfig::default(),
        );
        assert_eq!(manager.subscription_count(), 1);

        handle.cancel();
        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_cancellation_after_manager_gone() {
        let manager = Arc::new(SubscriptionManager::new());
        let handle = manager.subscribe(
            WatchTarget::Collection(items()),
            &SubscriptionConfig::default(),
        );
        let token = handle.cancellation();
        drop(manager);

        // No panic, nothing to do.
        token.cancel();
    }

    #[test]
    fn test_broadcast_to_collection_watchers() {
        let manager = Arc::new(SubscriptionManager::new());
        let handle = manager.subscribe(
            WatchTarget::Collection(items()),
            &SubscriptionConfig::default(),
        );

        let path = items().doc("a").unwrap();
        let doc = make_doc("a");
        manager.broadcast_change(&path, Sequence(1), || vec![doc.clone()], Some(&doc));

        let event = handle.recv_timeout(Duration::from_millis(100)).unwrap();
        match event {
            StoreEvent::CollectionSnapshot {
                documents,
                sequence,
                ..
            } => {
                assert_eq!(documents.len(), 1);
                assert_eq!(sequence, Sequence(1));
            }
            _ => panic!("Expected CollectionSnapshot, got {:?}", event),
        }
    }

    #[test]
    fn test_broadcast_filters_other_collections() {
        let manager = Arc::new(SubscriptionManager::new());
        let categories = CollectionPath::new("test", "categories").unwrap();
        let handle = manager.subscribe(
            WatchTarget::Collection(categories),
            &SubscriptionConfig::default(),
        );

        let path = items().doc("a").unwrap();
        manager.broadcast_change(&path, Sequence(1), Vec::new, None);

        let result = handle.recv_timeout(Duration::from_millis(50));
        assert!(result.is_err());
    }

    #[test]
    fn test_snapshot_built_once_for_many_watchers() {
        let manager = Arc::new(SubscriptionManager::new());
        let a = manager.subscribe(
            WatchTarget::Collection(items()),
            &SubscriptionConfig::default(),
        );
        let b = manager.subscribe(
            WatchTarget::Collection(items()),
            &SubscriptionConfig::default(),
        );

        let mut calls = 0;
        let path = items().doc("a").unwrap();
        manager.broadcast_change(
            &path,
            Sequence(1),
            || {
                calls += 1;
                vec![make_doc("a")]
            },
            None,
        );

        assert_eq!(calls, 1);
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn test_document_watcher_sees_deletion() {
        let manager = Arc::new(SubscriptionManager::new());
        let path = items().doc("a").unwrap();
        let handle = manager.subscribe(
            WatchTarget::Document(path.clone()),
            &SubscriptionConfig::default(),
        );

        manager.broadcast_change(&path, Sequence(2), Vec::new, None);

        match handle.try_recv().unwrap() {
            StoreEvent::DocumentSnapshot { document, .. } => assert!(document.is_none()),
            other => panic!("Expected DocumentSnapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let manager = Arc::new(SubscriptionManager::new());
        let config = SubscriptionConfig { buffer_size: 2 };
        let handle = manager.subscribe(WatchTarget::Collection(items()), &config);

        let path = items().doc("a").unwrap();
        for i in 0..10 {
            manager.broadcast_change(&path, Sequence(i), Vec::new, None);
        }

        assert_eq!(manager.subscription_count(), 0);

        let events: Vec<_> = handle.receiver.try_iter().collect();
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events.last(),
            Some(StoreEvent::Dropped {
                reason: DropReason::BufferOverflow
            })
        ));
    }

    #[test]
    fn test_disconnected_receiver_is_reaped() {
        let manager = Arc::new(SubscriptionManager::new());
        let handle = manager.subscribe(
            WatchTarget::Collection(items()),
            &SubscriptionConfig::default(),
        );
        drop(handle);

        let path = items().doc("a").unwrap();
        manager.broadcast_change(&path, Sequence(1), Vec::new, None);

        assert_eq!(manager.subscription_count(), 0);
    }
}
