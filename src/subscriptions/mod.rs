//! Subscription system for live snapshots.
//!
//! A subscription watches either a whole collection or a single document.
//! It receives the current snapshot as soon as it is registered, and a fresh
//! full snapshot after every write that touches what it watches.
//!
//! Subscriptions support:
//! - Explicit cancellation tokens, independent of the receiver
//! - Bounded buffers with slow-subscriber dropping
//! - Reaping of subscribers whose receiver was dropped
//!
//! # Example
//!
//! ```ignore
//! let handle = store.watch_collection(&items, &SubscriptionConfig::default());
//! let cancel = handle.cancellation();
//!
//! loop {
//!     match handle.recv() {
//!         Ok(StoreEvent::CollectionSnapshot { documents, .. }) => render(&documents),
//!         Ok(StoreEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//!
//! cancel.cancel();
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    Cancellation, DropReason, StoreEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
    WatchTarget,
};
