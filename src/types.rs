//! Core types for the document store.

use crate::error::{MenuError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Flat field map of a document.
pub type Fields = serde_json::Map<String, serde_json::Value>;

/// Root segment every collection path hangs off.
const PATH_ROOT: &str = "artifacts";

/// Store-assigned document identifier.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        DocumentId(s)
    }
}

/// Store-wide mutation counter. Every write bumps it by one.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_millis() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

fn check_segment(kind: &str, segment: &str) -> Result<()> {
    if segment.is_empty() || segment.contains('/') {
        return Err(MenuError::InvalidPath(format!(
            "{} segment {:?} must be non-empty and contain no '/'",
            kind, segment
        )));
    }
    Ok(())
}

/// A collection scoped under a namespace:
/// `artifacts/{namespace}/public/data/{collection}`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionPath {
    namespace: String,
    collection: String,
}

impl CollectionPath {
    pub fn new(namespace: impl Into<String>, collection: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let collection = collection.into();
        check_segment("namespace", &namespace)?;
        check_segment("collection", &collection)?;
        Ok(Self {
            namespace,
            collection,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Path of a document inside this collection.
    pub fn doc(&self, id: impl Into<DocumentId>) -> Result<DocumentPath> {
        let id = id.into();
        check_segment("document id", id.as_str())?;
        Ok(DocumentPath {
            collection: self.clone(),
            id,
        })
    }
}

impl fmt::Debug for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionPath({})", self)
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/public/data/{}",
            PATH_ROOT, self.namespace, self.collection
        )
    }
}

/// A single document path.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentPath {
    collection: CollectionPath,
    id: DocumentId,
}

impl DocumentPath {
    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }
}

impl fmt::Debug for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentPath({})", self)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A stored document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Identifier (assigned by store on `add`).
    pub id: DocumentId,

    /// Field values.
    pub fields: Fields,
}

impl Document {
    /// Get a string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default)]
pub struct StoreStats {
    pub document_count: u64,
    pub collection_count: u64,
    pub subscription_count: u64,
    pub log_size_bytes: u64,
    pub sequence: Sequence,
}
