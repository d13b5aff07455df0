//! Subscription types for live snapshot delivery.

use super::manager::SubscriptionManager;
use crate::types::{CollectionPath, Document, DocumentPath, Sequence};
use serde::{Deserialize, Serialize};
use std::sync::Weak;

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max undelivered snapshots before the subscriber is dropped.
    /// Default: 64
    pub buffer_size: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { buffer_size: 64 }
    }
}

/// What a subscription watches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchTarget {
    /// Every document in a collection.
    Collection(CollectionPath),
    /// One document.
    Document(DocumentPath),
}

impl WatchTarget {
    /// Whether a write to `path` changes what this target sees.
    pub fn is_affected_by(&self, path: &DocumentPath) -> bool {
        match self {
            WatchTarget::Collection(collection) => path.collection() == collection,
            WatchTarget::Document(doc) => doc == path,
        }
    }
}

/// Events emitted by subscriptions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// Full contents of a watched collection, ordered by id.
    CollectionSnapshot {
        collection: CollectionPath,
        documents: Vec<Document>,
        /// Store sequence this snapshot reflects.
        sequence: Sequence,
    },

    /// Current value of a watched document (`None` = does not exist).
    DocumentSnapshot {
        path: DocumentPath,
        document: Option<Document>,
        sequence: Sequence,
    },

    /// Subscription was dropped.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver went away.
    Disconnected,
    /// Explicitly cancelled.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Token that ends a subscription.
///
/// Cloneable and independent of the receiving handle, so teardown code does
/// not need to own the receiver.
#[derive(Clone, Debug)]
pub struct Cancellation {
    id: SubscriptionId,
    manager: Weak<SubscriptionManager>,
}

impl Cancellation {
    pub(crate) fn new(id: SubscriptionId, manager: Weak<SubscriptionManager>) -> Self {
        Self { id, manager }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Stop delivery. Idempotent; a no-op once the store is gone.
    pub fn cancel(&self) {
        if let Some(manager) = self.manager.upgrade() {
            manager.unsubscribe(self.id);
        }
    }
}

/// Handle to a live subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<StoreEvent>,
    cancellation: Cancellation,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: SubscriptionId,
        receiver: crossbeam_channel::Receiver<StoreEvent>,
        cancellation: Cancellation,
    ) -> Self {
        Self {
            id,
            receiver,
            cancellation,
        }
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<StoreEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<StoreEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<StoreEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// A token that can cancel this subscription later.
    pub fn cancellation(&self) -> Cancellation {
        self.cancellation.clone()
    }

    /// Cancel the subscription.
    pub fn cancel(self) {
        self.cancellation.cancel();
    }
}
