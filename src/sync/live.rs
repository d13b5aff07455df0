//! Live mirror of the menu collections and the optimistic write path.

use super::admin::Principal;
use super::config::{MenuConfig, MenuPaths};
use super::models::{Category, Item, ItemDraft, MenuState, Settings};
use crate::error::Result;
use crate::store::DocumentStore;
use crate::subscriptions::{
    Cancellation, DropReason, StoreEvent, SubscriptionHandle, WatchTarget,
};
use crate::types::{DocumentId, DocumentPath, Fields, Timestamp};
use crossbeam_channel::{Receiver, Select, TryRecvError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const CREATED_AT: &str = "createdAt";

/// Writes menu data to a store and opens live views of it.
///
/// Writes are fire-and-forget: they return once applied locally and report
/// failures through the log only. Views converge through their
/// subscriptions, never by patching local state.
#[derive(Clone)]
pub struct MenuSync {
    store: Arc<DocumentStore>,
    config: MenuConfig,
    paths: MenuPaths,
}

impl MenuSync {
    pub fn new(store: Arc<DocumentStore>, config: MenuConfig) -> Result<Self> {
        let paths = MenuPaths::new(&config.namespace)?;
        Ok(Self {
            store,
            config,
            paths,
        })
    }

    pub fn config(&self) -> &MenuConfig {
        &self.config
    }

    pub fn paths(&self) -> &MenuPaths {
        &self.paths
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Open the three live subscriptions and deliver their initial snapshots.
    pub fn start(&self, principal: &Principal) -> Result<LiveMenu> {
        if let Err(e) = principal.authenticate() {
            tracing::warn!(error = %e, "menu session refused");
            return Err(e);
        }

        let targets = [
            WatchTarget::Document(self.paths.settings.clone()),
            WatchTarget::Collection(self.paths.categories.clone()),
            WatchTarget::Collection(self.paths.items.clone()),
        ];
        let mut live = LiveMenu {
            sync: self.clone(),
            feeds: targets.map(|target| Feed {
                handle: self.store.watch(&target, &self.config.subscription),
                target,
                cancelled: false,
            }),
            state: MenuState {
                settings: self.config.default_settings.clone(),
                ..Default::default()
            },
            seeded: false,
        };
        live.pump();

        tracing::info!(namespace = %self.config.namespace, "menu session started");
        Ok(live)
    }

    // --- Writes ---

    /// Replace the settings document.
    pub fn save_settings(&self, settings: &Settings) {
        Self::logged(
            "save_settings",
            self.store.set(&self.paths.settings, settings.to_fields()),
        );
    }

    /// Create a category. Blank names are ignored.
    pub fn add_category(&self, name: &str) -> Option<DocumentId> {
        if name.is_empty() {
            return None;
        }

        let mut fields = Fields::new();
        fields.insert("name".into(), Value::from(name));
        fields.insert(CREATED_AT.into(), Value::from(Timestamp::now().0));

        Self::logged("add_category", self.store.add(&self.paths.categories, fields))
            .map(|doc| doc.id)
    }

    /// Delete a category. Items that reference it are left in place.
    pub fn delete_category(&self, id: &DocumentId) {
        Self::logged(
            "delete_category",
            self.paths
                .categories
                .doc(id.clone())
                .and_then(|path| self.store.delete(&path)),
        );
    }

    pub fn add_item(&self, draft: &ItemDraft) -> Option<DocumentId> {
        let mut fields = draft.to_fields();
        fields.insert(CREATED_AT.into(), Value::from(Timestamp::now().0));

        Self::logged("add_item", self.store.add(&self.paths.items, fields)).map(|doc| doc.id)
    }

    /// Overwrite the editable fields of an item; `createdAt` is kept.
    pub fn update_item(&self, id: &DocumentId, draft: &ItemDraft) {
        Self::logged(
            "update_item",
            self.item_path(id)
                .and_then(|path| self.store.update(&path, draft.to_fields())),
        );
    }

    pub fn delete_item(&self, id: &DocumentId) {
        Self::logged(
            "delete_item",
            self.item_path(id).and_then(|path| self.store.delete(&path)),
        );
    }

    fn item_path(&self, id: &DocumentId) -> Result<DocumentPath> {
        self.paths.items.doc(id.clone())
    }

    fn seed_settings(&self) {
        tracing::info!(path = %self.paths.settings, "seeding default settings");
        Self::logged(
            "seed_settings",
            self.store
                .set(&self.paths.settings, self.config.default_settings.to_fields()),
        );
    }

    fn logged<T>(operation: &'static str, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(operation, error = %e, "menu write failed");
                None
            }
        }
    }
}

/// A running view of one namespace's menu.
///
/// Call [`pump`](Self::pump) or [`wait`](Self::wait) to fold delivered
/// snapshots into [`state`](Self::state). Dropping the view without
/// [`close`](Self::close) leaves the subscriptions to be reaped on the
/// next write.
pub struct LiveMenu {
    sync: MenuSync,
    /// Settings, categories, items.
    feeds: [Feed; 3],
    state: MenuState,
    seeded: bool,
}

/// One standing subscription of a view.
struct Feed {
    target: WatchTarget,
    handle: SubscriptionHandle,
    /// Set once the subscription was cancelled on purpose; never reopened.
    cancelled: bool,
}

impl LiveMenu {
    pub fn state(&self) -> &MenuState {
        &self.state
    }

    pub fn sync(&self) -> &MenuSync {
        &self.sync
    }

    /// Apply every snapshot already delivered. Returns how many were applied.
    ///
    /// A feed the store dropped (overflow or disconnect) is reopened; its
    /// fresh initial snapshot replaces whatever was missed.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let mut progressed = false;
            for index in 0..self.feeds.len() {
                loop {
                    match self.feeds[index].handle.try_recv() {
                        Ok(event) => {
                            self.apply(index, event);
                            applied += 1;
                            progressed = true;
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            progressed |= self.resubscribe(index);
                            break;
                        }
                    }
                }
            }
            // Seeding and resubscribing both deliver onto our own channels.
            if !progressed {
                return applied;
            }
        }
    }

    /// Block until at least one snapshot arrives or `timeout` elapses, then
    /// apply everything pending. Returns whether anything was applied.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let received = {
            let open: Vec<(usize, &Receiver<StoreEvent>)> = self
                .feeds
                .iter()
                .enumerate()
                .filter(|(_, feed)| !feed.cancelled)
                .map(|(index, feed)| (index, &feed.handle.receiver))
                .collect();

            let mut select = Select::new();
            for &(_, receiver) in &open {
                select.recv(receiver);
            }
            match select.select_timeout(timeout) {
                Ok(operation) => {
                    let (index, receiver) = open[operation.index()];
                    Some((index, operation.recv(receiver).ok()))
                }
                Err(_) => None,
            }
        };

        match received {
            Some((index, Some(event))) => {
                self.apply(index, event);
                self.pump();
                true
            }
            // Disconnected; pump reopens the feed.
            Some((_, None)) => self.pump() > 0,
            None => false,
        }
    }

    /// Tokens for ending this view's subscriptions from elsewhere.
    pub fn cancellations(&self) -> [Cancellation; 3] {
        std::array::from_fn(|index| self.feeds[index].handle.cancellation())
    }

    /// End all three subscriptions.
    pub fn close(self) {
        tracing::debug!(namespace = %self.sync.config.namespace, "menu session closed");
        for feed in self.feeds {
            feed.handle.cancel();
        }
    }

    /// Reopen a dropped feed. Returns false for feeds cancelled on purpose.
    fn resubscribe(&mut self, index: usize) -> bool {
        let feed = &mut self.feeds[index];
        if feed.cancelled {
            return false;
        }
        tracing::info!(watch = ?feed.target, "reopening menu feed");
        feed.handle = self
            .sync
            .store
            .watch(&feed.target, &self.sync.config.subscription);
        true
    }

    fn apply(&mut self, index: usize, event: StoreEvent) {
        let paths = &self.sync.paths;
        match event {
            StoreEvent::DocumentSnapshot {
                document: Some(doc),
                ..
            } => {
                self.state.settings =
                    Settings::from_document(&doc, &self.sync.config.default_settings);
            }
            StoreEvent::DocumentSnapshot { document: None, .. } => {
                // Only the first session to notice seeds; later deletions are
                // shown as defaults until someone saves.
                self.state.settings = self.sync.config.default_settings.clone();
                if !self.seeded {
                    self.seeded = true;
                    self.sync.seed_settings();
                }
            }
            StoreEvent::CollectionSnapshot {
                collection,
                documents,
                ..
            } => {
                if collection == paths.categories {
                    self.state.categories = documents.iter().map(Category::from_document).collect();
                } else if collection == paths.items {
                    self.state.items = documents.iter().map(Item::from_document).collect();
                    self.state.items_loaded = true;
                }
            }
            StoreEvent::Dropped {
                reason: DropReason::Unsubscribed,
            } => {
                self.feeds[index].cancelled = true;
            }
            StoreEvent::Dropped { reason } => {
                tracing::warn!(?reason, "menu feed dropped by store");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync() -> MenuSync {
        MenuSync::new(Arc::new(DocumentStore::in_memory()), MenuConfig::default()).unwrap()
    }

    #[test]
    fn test_start_seeds_settings() {
        let sync = sync();
        let live = sync.start(&Principal::Anonymous).unwrap();

        assert_eq!(live.state().settings, Settings::default());
        assert!(sync.store().get(&sync.paths().settings).is_some());
        assert!(live.state().is_loaded());
    }

    #[test]
    fn test_existing_settings_are_not_overwritten() {
        let sync = sync();
        let custom = Settings {
            shop_name: "Kebab House".into(),
            ..Default::default()
        };
        sync.save_settings(&custom);

        let live = sync.start(&Principal::Anonymous).unwrap();
        assert_eq!(live.state().settings.shop_name, "Kebab House");
    }

    #[test]
    fn test_blank_category_is_ignored() {
        let sync = sync();
        assert!(sync.add_category("").is_none());
        assert!(sync.store().list(&sync.paths().categories).is_empty());
    }

    #[test]
    fn test_update_keeps_created_at() {
        let sync = sync();
        let id = sync
            .add_item(&ItemDraft {
                name: "Soup".into(),
                ..Default::default()
            })
            .unwrap();
        let path = sync.paths().items.doc(id.clone()).unwrap();
        let created = sync.store().get(&path).unwrap().fields[CREATED_AT].clone();

        sync.update_item(
            &id,
            &ItemDraft {
                name: "Lentil Soup".into(),
                ..Default::default()
            },
        );

        let doc = sync.store().get(&path).unwrap();
        assert_eq!(doc.fields[CREATED_AT], created);
        assert_eq!(doc.get_str("name"), Some("Lentil Soup"));
    }

    #[test]
    fn test_update_of_missing_item_is_swallowed() {
        let sync = sync();
        sync.update_item(&DocumentId::new("ghost"), &ItemDraft::default());
        assert!(sync.store().list(&sync.paths().items).is_empty());
    }

    #[test]
    fn test_refused_principal() {
        let sync = sync();
        assert!(sync.start(&Principal::Token(" ".into())).is_err());
        assert_eq!(sync.store().subscription_count(), 0);
    }

    #[test]
    fn test_wait_times_out_when_idle() {
        let sync = sync();
        let mut live = sync.start(&Principal::Anonymous).unwrap();
        assert!(!live.wait(Duration::from_millis(20)));
    }
}
