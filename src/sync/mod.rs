//! Live menu sync.
//!
//! Binds the document store to the three menu collections of one
//! namespace: a singleton settings document, categories, and items.
//! [`MenuSync`] writes; [`LiveMenu`] mirrors snapshots into a
//! [`MenuState`] that views filter and render.

mod admin;
mod config;
mod live;
mod models;

pub use admin::{AdminSession, Principal};
pub use config::{
    MenuConfig, MenuPaths, CATEGORIES_COLLECTION, DEFAULT_NAMESPACE, ITEMS_COLLECTION,
    SETTINGS_COLLECTION, SETTINGS_DOCUMENT,
};
pub use live::{LiveMenu, MenuSync};
pub use models::{Category, CategoryFilter, Item, ItemDraft, MenuState, Settings};
