//! Document store tying the mutation log, collections, and subscriptions together.

use crate::error::{MenuError, Result};
use crate::log::{LogEntry, Mutation, MutationLog};
use crate::subscriptions::{
    StoreEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionManager, WatchTarget,
};
use crate::types::{
    CollectionPath, Document, DocumentId, DocumentPath, Fields, Sequence, StoreStats, Timestamp,
};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Base path for the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync the log after this many writes (1 = every write).
    pub sync_every: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./menu-store"),
            create_if_missing: true,
            sync_every: 1,
        }
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"QRM\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

const LOG_FILE: &str = "mutations.log";

/// Length of generated document ids.
const ID_LEN: usize = 20;

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

type Collections = HashMap<CollectionPath, BTreeMap<DocumentId, Document>>;

/// On-disk half of a durable store.
struct Persistence {
    path: PathBuf,
    /// Lock file for exclusive access.
    _lock_file: File,
    log: MutationLog,
}

/// A live document store.
///
/// Provides a unified interface for:
/// - Creating, replacing, merging and deleting documents
/// - Reading single documents and whole collections
/// - Watching collections or documents for full-snapshot updates
///
/// Every write is last-write-wins. There are no versions or preconditions.
pub struct DocumentStore {
    /// `None` for in-memory stores.
    persistence: Option<Persistence>,

    /// Current documents, ordered by id within each collection.
    collections: RwLock<Collections>,

    subscriptions: Arc<SubscriptionManager>,

    /// Serializes writes. Holds the sequence of the last applied write.
    write_lock: Mutex<Sequence>,

    id_counter: AtomicU64,
    id_salt: u64,
}

impl DocumentStore {
    /// Create a store that lives only in memory.
    pub fn in_memory() -> Self {
        Self::from_parts(None, Collections::new(), Sequence(0))
    }

    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(MenuError::NotInitialized)
        }
    }

    /// Create a new store. Fails if `config.path` already holds one.
    pub fn create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            return Err(MenuError::AlreadyInitialized(
                config.path.display().to_string(),
            ));
        }
        fs::create_dir_all(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;
        // Leftovers from a store whose manifest was lost are not replayed.
        let log = MutationLog::create(config.path.join(LOG_FILE), config.sync_every)?;
        Self::write_manifest(&config.path)?;

        tracing::info!(path = %config.path.display(), "created document store");

        let persistence = Persistence {
            path: config.path,
            _lock_file: lock_file,
            log,
        };
        Ok(Self::from_parts(
            Some(persistence),
            Collections::new(),
            Sequence(0),
        ))
    }

    /// Open an existing store, replaying its log.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;

        let lock_file = Self::acquire_lock(&config.path)?;
        let (log, entries) = MutationLog::open(config.path.join(LOG_FILE), config.sync_every)?;

        let mut collections = Collections::new();
        let mut sequence = Sequence(0);
        for entry in entries {
            let fields = match &entry.mutation {
                Mutation::Set { fields, .. } => Some(Mutation::decode_fields(fields)?),
                Mutation::Delete { .. } => None,
            };
            Self::apply(&mut collections, entry.mutation.path(), fields);
            sequence = sequence.max(entry.sequence);
        }

        tracing::info!(
            path = %config.path.display(),
            collections = collections.len(),
            ?sequence,
            "opened document store"
        );

        let persistence = Persistence {
            path: config.path,
            _lock_file: lock_file,
            log,
        };
        Ok(Self::from_parts(Some(persistence), collections, sequence))
    }

    fn from_parts(
        persistence: Option<Persistence>,
        collections: Collections,
        sequence: Sequence,
    ) -> Self {
        Self {
            persistence,
            collections: RwLock::new(collections),
            subscriptions: Arc::new(SubscriptionManager::new()),
            write_lock: Mutex::new(sequence),
            id_counter: AtomicU64::new(0),
            id_salt: process_salt(),
        }
    }

    // --- Writes ---

    /// Create a document with a store-assigned id.
    pub fn add(&self, collection: &CollectionPath, fields: Fields) -> Result<Document> {
        let mut sequence = self.write_lock.lock();

        let path = loop {
            let path = collection.doc(self.generate_id(collection))?;
            if self.get(&path).is_none() {
                break path;
            }
        };

        let document = Document {
            id: path.id().clone(),
            fields,
        };
        self.commit(&mut sequence, &path, Some(&document))?;
        Ok(document)
    }

    /// Create or wholly replace a document.
    pub fn set(&self, path: &DocumentPath, fields: Fields) -> Result<Document> {
        let mut sequence = self.write_lock.lock();

        let document = Document {
            id: path.id().clone(),
            fields,
        };
        self.commit(&mut sequence, path, Some(&document))?;
        Ok(document)
    }

    /// Overwrite the given fields of an existing document, keeping the rest.
    pub fn update(&self, path: &DocumentPath, fields: Fields) -> Result<Document> {
        let mut sequence = self.write_lock.lock();

        let mut document = self
            .get(path)
            .ok_or_else(|| MenuError::DocumentNotFound(path.to_string()))?;
        document.fields.extend(fields);

        self.commit(&mut sequence, path, Some(&document))?;
        Ok(document)
    }

    /// Delete a document. Returns whether anything was removed.
    pub fn delete(&self, path: &DocumentPath) -> Result<bool> {
        let mut sequence = self.write_lock.lock();

        if self.get(path).is_none() {
            return Ok(false);
        }

        self.commit(&mut sequence, path, None)?;
        Ok(true)
    }

    /// Log, apply, and broadcast one write (`None` deletes).
    /// Caller holds the write lock.
    fn commit(
        &self,
        sequence: &mut Sequence,
        path: &DocumentPath,
        document: Option<&Document>,
    ) -> Result<()> {
        let next = sequence.next();

        if let Some(persistence) = &self.persistence {
            let mutation = match document {
                Some(doc) => Mutation::set(path, &doc.fields)?,
                None => Mutation::delete(path),
            };
            persistence.log.append(&LogEntry {
                sequence: next,
                timestamp: Timestamp::now(),
                mutation,
            })?;
        }

        Self::apply(
            &mut self.collections.write(),
            path,
            document.map(|doc| doc.fields.clone()),
        );
        *sequence = next;

        tracing::debug!(%path, ?next, deleted = document.is_none(), "committed write");

        self.subscriptions.broadcast_change(
            path,
            next,
            || self.list(path.collection()),
            document,
        );

        Ok(())
    }

    fn apply(collections: &mut Collections, path: &DocumentPath, fields: Option<Fields>) {
        match fields {
            Some(fields) => {
                collections
                    .entry(path.collection().clone())
                    .or_default()
                    .insert(
                        path.id().clone(),
                        Document {
                            id: path.id().clone(),
                            fields,
                        },
                    );
            }
            None => {
                if let Some(docs) = collections.get_mut(path.collection()) {
                    docs.remove(path.id());
                    if docs.is_empty() {
                        collections.remove(path.collection());
                    }
                }
            }
        }
    }

    // --- Reads ---

    /// Get a document.
    pub fn get(&self, path: &DocumentPath) -> Option<Document> {
        self.collections
            .read()
            .get(path.collection())
            .and_then(|docs| docs.get(path.id()))
            .cloned()
    }

    /// All documents of a collection, ordered by id.
    pub fn list(&self, collection: &CollectionPath) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    // --- Subscriptions ---

    /// Watch a collection. The current snapshot is delivered immediately.
    pub fn watch_collection(
        &self,
        collection: &CollectionPath,
        config: &SubscriptionConfig,
    ) -> SubscriptionHandle {
        // Holding the write lock keeps the initial snapshot ordered before
        // any broadcast for a later write.
        let sequence = self.write_lock.lock();

        let handle = self
            .subscriptions
            .subscribe(WatchTarget::Collection(collection.clone()), config);
        self.subscriptions.send_to(
            handle.id,
            StoreEvent::CollectionSnapshot {
                collection: collection.clone(),
                documents: self.list(collection),
                sequence: *sequence,
            },
        );

        handle
    }

    /// Watch a single document. The current value (or `None`) is delivered immediately.
    pub fn watch_document(
        &self,
        path: &DocumentPath,
        config: &SubscriptionConfig,
    ) -> SubscriptionHandle {
        let sequence = self.write_lock.lock();

        let handle = self
            .subscriptions
            .subscribe(WatchTarget::Document(path.clone()), config);
        self.subscriptions.send_to(
            handle.id,
            StoreEvent::DocumentSnapshot {
                path: path.clone(),
                document: self.get(path),
                sequence: *sequence,
            },
        );

        handle
    }

    /// Watch either kind of target.
    pub fn watch(&self, target: &WatchTarget, config: &SubscriptionConfig) -> SubscriptionHandle {
        match target {
            WatchTarget::Collection(collection) => self.watch_collection(collection, config),
            WatchTarget::Document(path) => self.watch_document(path, config),
        }
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }

    // --- Store Operations ---

    /// Rewrite the log so it holds exactly one entry per live document.
    ///
    /// Returns the number of documents written. In-memory stores return 0.
    pub fn compact(&self) -> Result<usize> {
        let sequence = self.write_lock.lock();

        let persistence = match &self.persistence {
            Some(p) => p,
            None => return Ok(0),
        };

        let before = persistence.log.size();
        let mut entries = Vec::new();
        {
            let collections = self.collections.read();
            for (collection, docs) in collections.iter() {
                for doc in docs.values() {
                    entries.push(LogEntry {
                        sequence: *sequence,
                        timestamp: Timestamp::now(),
                        mutation: Mutation::set(&collection.doc(doc.id.clone())?, &doc.fields)?,
                    });
                }
            }
        }

        persistence.log.rewrite(&entries)?;

        tracing::info!(
            documents = entries.len(),
            before_bytes = before,
            after_bytes = persistence.log.size(),
            "compacted mutation log"
        );

        Ok(entries.len())
    }

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        let sequence = *self.write_lock.lock();
        let collections = self.collections.read();
        StoreStats {
            document_count: collections.values().map(|docs| docs.len() as u64).sum(),
            collection_count: collections.len() as u64,
            subscription_count: self.subscriptions.subscription_count() as u64,
            log_size_bytes: self
                .persistence
                .as_ref()
                .map(|p| p.log.size())
                .unwrap_or(0),
            sequence,
        }
    }

    /// Sync all data to disk.
    pub fn sync(&self) -> Result<()> {
        if let Some(persistence) = &self.persistence {
            persistence.log.sync()?;
        }
        Ok(())
    }

    /// Get the store path (`None` for in-memory stores).
    pub fn path(&self) -> Option<&Path> {
        self.persistence.as_ref().map(|p| p.path.as_path())
    }

    // --- Private Helpers ---

    fn generate_id(&self, collection: &CollectionPath) -> DocumentId {
        let counter = self.id_counter.fetch_add(1, Ordering::Relaxed);

        let mut hasher = Sha256::new();
        hasher.update(collection.to_string().as_bytes());
        hasher.update(counter.to_le_bytes());
        hasher.update(Timestamp::now().0.to_le_bytes());
        hasher.update(self.id_salt.to_le_bytes());
        let digest = hasher.finalize();

        let id: String = digest
            .iter()
            .take(ID_LEN)
            .map(|b| ID_ALPHABET[*b as usize % ID_ALPHABET.len()] as char)
            .collect();
        DocumentId(id)
    }

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        if !manifest_path.exists() {
            return Err(MenuError::NotInitialized);
        }
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(MenuError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(MenuError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| MenuError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for DocumentStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.sync();
    }
}

/// Per-process salt so ids from two stores opened at once don't collide.
fn process_salt() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    nanos ^ ((std::process::id() as u64) << 32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> StoreConfig {
        StoreConfig {
            path: dir.path().join("store"),
            create_if_missing: true,
            sync_every: 1,
        }
    }

    fn fields(value: serde_json::Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn items() -> CollectionPath {
        CollectionPath::new("test", "items").unwrap()
    }

    #[test]
    fn test_create_store() {
        let dir = TempDir::new().unwrap();
        let store = DocumentStore::create(test_config(&dir)).unwrap();

        let path = store.path().unwrap();
        assert!(path.join("MANIFEST").exists());
        assert!(path.join(LOG_FILE).exists());
    }

    #[test]
    fn test_add_assigns_id() {
        let store = DocumentStore::in_memory();

        let doc = store
            .add(&items(), fields(json!({"name": "Lamb Shank"})))
            .unwrap();

        assert_eq!(doc.id.as_str().len(), ID_LEN);
        assert!(doc.id.as_str().chars().all(|c| c.is_ascii_alphanumeric()));

        let stored = store.get(&items().doc(doc.id.clone()).unwrap()).unwrap();
        assert_eq!(stored.fields["name"], "Lamb Shank");
    }

    #[test]
    fn test_ids_are_unique() {
        let store = DocumentStore::in_memory();
        let mut ids = HashSet::new();
        for i in 0..500 {
            let doc = store.add(&items(), fields(json!({"i": i}))).unwrap();
            assert!(ids.insert(doc.id));
        }
        assert_eq!(store.list(&items()).len(), 500);
    }

    #[test]
    fn test_set_replaces_wholesale() {
        let store = DocumentStore::in_memory();
        let path = CollectionPath::new("test", "settings")
            .unwrap()
            .doc("config")
            .unwrap();

        store
            .set(&path, fields(json!({"shopName": "A", "currency": "$"})))
            .unwrap();
        store.set(&path, fields(json!({"shopName": "B"}))).unwrap();

        let doc = store.get(&path).unwrap();
        assert_eq!(doc.fields["shopName"], "B");
        assert!(!doc.fields.contains_key("currency"));
    }

    #[test]
    fn test_update_merges() {
        let store = DocumentStore::in_memory();
        let doc = store
            .add(&items(), fields(json!({"name": "Soup", "createdAt": 1})))
            .unwrap();
        let path = items().doc(doc.id).unwrap();

        let updated = store
            .update(&path, fields(json!({"name": "Lentil Soup"})))
            .unwrap();

        assert_eq!(updated.fields["name"], "Lentil Soup");
        assert_eq!(updated.fields["createdAt"], 1);
    }

    #[test]
    fn test_update_missing_fails() {
        let store = DocumentStore::in_memory();
        let path = items().doc("nope").unwrap();

        let result = store.update(&path, fields(json!({"name": "x"})));
        assert!(matches!(result, Err(MenuError::DocumentNotFound(_))));
    }

    #[test]
    fn test_delete() {
        let store = DocumentStore::in_memory();
        let doc = store.add(&items(), fields(json!({"name": "Soup"}))).unwrap();
        let path = items().doc(doc.id).unwrap();

        assert!(store.delete(&path).unwrap());
        assert!(store.get(&path).is_none());
        assert!(!store.delete(&path).unwrap());
        assert_eq!(store.stats().collection_count, 0);
    }

    #[test]
    fn test_watch_collection_gets_initial_and_live_snapshots() {
        let store = DocumentStore::in_memory();
        store.add(&items(), fields(json!({"name": "Soup"}))).unwrap();

        let handle = store.watch_collection(&items(), &SubscriptionConfig::default());

        match handle.recv_timeout(Duration::from_millis(100)).unwrap() {
            StoreEvent::CollectionSnapshot { documents, .. } => assert_eq!(documents.len(), 1),
            other => panic!("Expected CollectionSnapshot, got {:?}", other),
        }

        store.add(&items(), fields(json!({"name": "Salad"}))).unwrap();

        match handle.recv_timeout(Duration::from_millis(100)).unwrap() {
            StoreEvent::CollectionSnapshot {
                documents,
                sequence,
                ..
            } => {
                assert_eq!(documents.len(), 2);
                assert_eq!(sequence, Sequence(2));
            }
            other => panic!("Expected CollectionSnapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_watch_document_reports_absence() {
        let store = DocumentStore::in_memory();
        let path = CollectionPath::new("test", "settings")
            .unwrap()
            .doc("config")
            .unwrap();

        let handle = store.watch_document(&path, &SubscriptionConfig::default());
        match handle.try_recv().unwrap() {
            StoreEvent::DocumentSnapshot { document, .. } => assert!(document.is_none()),
            other => panic!("Expected DocumentSnapshot, got {:?}", other),
        }

        store.set(&path, fields(json!({"shopName": "A"}))).unwrap();
        match handle.try_recv().unwrap() {
            StoreEvent::DocumentSnapshot { document, .. } => {
                assert_eq!(document.unwrap().fields["shopName"], "A")
            }
            other => panic!("Expected DocumentSnapshot, got {:?}", other),
        }
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let (kept, deleted) = {
            let store = DocumentStore::create(config.clone()).unwrap();
            let kept = store.add(&items(), fields(json!({"name": "Soup"}))).unwrap();
            let deleted = store.add(&items(), fields(json!({"name": "Salad"}))).unwrap();
            store.delete(&items().doc(deleted.id.clone()).unwrap()).unwrap();
            store.sync().unwrap();
            (kept.id, deleted.id)
        };

        let store = DocumentStore::open(config).unwrap();
        assert!(store.get(&items().doc(kept).unwrap()).is_some());
        assert!(store.get(&items().doc(deleted).unwrap()).is_none());
        assert_eq!(store.stats().sequence, Sequence(3));
    }

    #[test]
    fn test_store_lock() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let _store = DocumentStore::create(config.clone()).unwrap();
        let result = DocumentStore::open(config);
        assert!(matches!(result, Err(MenuError::Locked)));
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            create_if_missing: false,
            ..test_config(&dir)
        };

        let result = DocumentStore::open_or_create(config);
        assert!(matches!(result, Err(MenuError::NotInitialized)));
    }

    #[test]
    fn test_compact() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let id = {
            let store = DocumentStore::create(config.clone()).unwrap();
            let doc = store.add(&items(), fields(json!({"name": "v0"}))).unwrap();
            let path = items().doc(doc.id.clone()).unwrap();
            for i in 1..50 {
                store
                    .set(&path, fields(json!({"name": format!("v{}", i)})))
                    .unwrap();
            }

            let before = store.stats().log_size_bytes;
            assert_eq!(store.compact().unwrap(), 1);
            assert!(store.stats().log_size_bytes < before);
            doc.id
        };

        let store = DocumentStore::open(config).unwrap();
        let doc = store.get(&items().doc(id).unwrap()).unwrap();
        assert_eq!(doc.fields["name"], "v49");
        assert_eq!(store.stats().sequence, Sequence(50));
    }

    #[test]
    fn test_stats() {
        let store = DocumentStore::in_memory();
        let categories = CollectionPath::new("test", "categories").unwrap();
        store.add(&items(), fields(json!({}))).unwrap();
        store.add(&items(), fields(json!({}))).unwrap();
        store.add(&categories, fields(json!({}))).unwrap();
        let _handle = store.watch_collection(&items(), &SubscriptionConfig::default());

        let stats = store.stats();
        assert_eq!(stats.document_count, 3);
        assert_eq!(stats.collection_count, 2);
        assert_eq!(stats.subscription_count, 1);
        assert_eq!(stats.sequence, Sequence(3));
        assert_eq!(stats.log_size_bytes, 0);
    }
}
