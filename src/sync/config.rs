//! Sync layer configuration and collection paths.

use super::models::Settings;
use crate::error::Result;
use crate::subscriptions::SubscriptionConfig;
use crate::types::{CollectionPath, DocumentPath};

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "qr-menu-production";

pub const SETTINGS_COLLECTION: &str = "settings";
pub const SETTINGS_DOCUMENT: &str = "config";
pub const CATEGORIES_COLLECTION: &str = "categories";
pub const ITEMS_COLLECTION: &str = "items";

/// Configuration injected into [`MenuSync`](super::MenuSync).
#[derive(Clone, Debug)]
pub struct MenuConfig {
    /// Scopes every collection path. Changing it switches to a different dataset.
    pub namespace: String,

    /// Written to the settings document when it does not exist yet.
    pub default_settings: Settings,

    /// Buffering for the three live subscriptions.
    pub subscription: SubscriptionConfig,
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            default_settings: Settings::default(),
            subscription: SubscriptionConfig::default(),
        }
    }
}

impl MenuConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_default_settings(mut self, settings: Settings) -> Self {
        self.default_settings = settings;
        self
    }
}

/// Resolved locations of the menu data under one namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuPaths {
    pub settings: DocumentPath,
    pub categories: CollectionPath,
    pub items: CollectionPath,
}

impl MenuPaths {
    pub fn new(namespace: &str) -> Result<Self> {
        Ok(Self {
            settings: CollectionPath::new(namespace, SETTINGS_COLLECTION)?
                .doc(SETTINGS_DOCUMENT)?,
            categories: CollectionPath::new(namespace, CATEGORIES_COLLECTION)?,
            items: CollectionPath::new(namespace, ITEMS_COLLECTION)?,
        })
    }
}
