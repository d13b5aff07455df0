//! # QR Menu
//!
//! Storage and live sync for a digital restaurant menu.
//!
//! ## Core Concepts
//!
//! - **Documents**: JSON field maps under namespaced collection paths
//! - **Mutation log**: Append-only, checksummed, replayed on open
//! - **Subscriptions**: Full snapshots pushed to watchers after every write
//! - **Normalizer**: Uploaded images bounded and inlined as JPEG data URLs
//! - **Sync**: Settings, categories, and items mirrored into a `MenuState`
//!
//! ## Example
//!
//! ```ignore
//! use qr_menu::{DocumentStore, ItemDraft, MenuConfig, MenuSync, Principal, StoreConfig};
//! use std::sync::Arc;
//!
//! let store = Arc::new(DocumentStore::open_or_create(StoreConfig {
//!     path: "./menu-data".into(),
//!     ..Default::default()
//! })?);
//!
//! let sync = MenuSync::new(store, MenuConfig::default())?;
//! let mut live = sync.start(&Principal::Anonymous)?;
//!
//! let mains = sync.add_category("Mains");
//! sync.add_item(&ItemDraft {
//!     name: "Lamb Shank".into(),
//!     price: "120".into(),
//!     ..ItemDraft::new_for(&live.state().categories)
//! });
//!
//! live.pump();
//! ```

pub mod error;
pub mod log;
pub mod normalizer;
pub mod store;
pub mod subscriptions;
pub mod sync;
pub mod types;

// Re-exports
pub use error::{MenuError, Result};
pub use log::{LogEntry, Mutation, MutationLog};
pub use normalizer::{ImageInput, ImageNormalizer, NormalizedImage, NormalizerConfig};
pub use store::{DocumentStore, StoreConfig};
pub use subscriptions::{
    Cancellation, DropReason, StoreEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
    SubscriptionManager, WatchTarget,
};
pub use sync::{
    AdminSession, Category, CategoryFilter, Item, ItemDraft, LiveMenu, MenuConfig, MenuPaths,
    MenuState, MenuSync, Principal, Settings,
};
pub use types::*;
