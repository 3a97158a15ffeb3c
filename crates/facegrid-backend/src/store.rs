//! Object store seam plus in-memory and redb-backed implementations.
//!
//! Writes are overwrite-by-key, which is what makes repeated worker output
//! for a redelivered job harmless.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use redb::{Database, ReadableDatabase, ReadableTable};
use tokio::sync::RwLock;
use tracing::debug;

use crate::BackendFuture;
use crate::error::{BackendError, BackendResult};
use crate::tables::{BUCKETS, OBJECTS, object_key};

/// Blob storage keyed by bucket and opaque string key.
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `bucket/key`, replacing any previous value.
    fn put<'a>(&'a self, bucket: &'a str, key: &'a str, body: Vec<u8>) -> BackendFuture<'a, ()>;

    /// Fetch the object at `bucket/key`.
    fn get<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, Vec<u8>>;
}

// ── In-memory ──────────────────────────────────────────────────────

/// Ephemeral object store.
pub struct MemoryObjectStore {
    buckets: RwLock<HashMap<String, HashMap<String, Vec<u8>>>>,
    available: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new(buckets: &[&str]) -> Self {
        let buckets = buckets
            .iter()
            .map(|b| (b.to_string(), HashMap::new()))
            .collect();
        Self {
            buckets: RwLock::new(buckets),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Remove an object; returns true if it existed.
    pub async fn remove(&self, bucket: &str, key: &str) -> bool {
        let mut buckets = self.buckets.write().await;
        buckets
            .get_mut(bucket)
            .is_some_and(|objects| objects.remove(key).is_some())
    }

    /// Number of objects in a bucket (0 for an unknown bucket).
    pub async fn object_count(&self, bucket: &str) -> usize {
        let buckets = self.buckets.read().await;
        buckets.get(bucket).map_or(0, HashMap::len)
    }

    fn check_available(&self) -> BackendResult<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("object store".to_string()))
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put<'a>(&'a self, bucket: &'a str, key: &'a str, body: Vec<u8>) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.check_available()?;
            let mut buckets = self.buckets.write().await;
            let objects = buckets
                .get_mut(bucket)
                .ok_or_else(|| BackendError::BucketNotFound(bucket.to_string()))?;
            debug!(%bucket, %key, size = body.len(), "object stored");
            objects.insert(key.to_string(), body);
            Ok(())
        })
    }

    fn get<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, Vec<u8>> {
        Box::pin(async move {
            self.check_available()?;
            let buckets = self.buckets.read().await;
            let objects = buckets
                .get(bucket)
                .ok_or_else(|| BackendError::BucketNotFound(bucket.to_string()))?;
            objects
                .get(key)
                .cloned()
                .ok_or_else(|| BackendError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
        })
    }
}

// ── redb ───────────────────────────────────────────────────────────

/// Convert any `Display` error into `BackendError::Storage`.
macro_rules! storage_err {
    ($what:literal) => {
        |e| BackendError::Storage(format!(concat!($what, ": {}"), e))
    };
}

/// Durable object store backed by a redb file.
///
/// `Clone` shares the same database handle.
#[derive(Clone)]
pub struct RedbObjectStore {
    db: Arc<Database>,
    buckets: Arc<HashSet<String>>,
}

impl RedbObjectStore {
    /// Open (or create) the store at `path` and make sure `buckets` exist.
    pub fn open(path: &Path, buckets: &[&str]) -> BackendResult<Self> {
        let db = Database::create(path).map_err(storage_err!("open"))?;
        let store = Self::with_db(db, buckets)?;
        debug!(?path, "object store opened");
        Ok(store)
    }

    /// Create an ephemeral store on redb's in-memory backend.
    pub fn open_in_memory(buckets: &[&str]) -> BackendResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(storage_err!("open"))?;
        Self::with_db(db, buckets)
    }

    fn with_db(db: Database, buckets: &[&str]) -> BackendResult<Self> {
        let txn = db.begin_write().map_err(storage_err!("transaction"))?;
        {
            txn.open_table(OBJECTS).map_err(storage_err!("table"))?;
            let mut table = txn.open_table(BUCKETS).map_err(storage_err!("table"))?;
            for bucket in buckets {
                table.insert(*bucket, b"".as_slice()).map_err(storage_err!("write"))?;
            }
        }
        txn.commit().map_err(storage_err!("commit"))?;

        // Buckets created by earlier runs stay addressable.
        let mut known = HashSet::new();
        {
            let read = db.begin_read().map_err(storage_err!("transaction"))?;
            let table = read.open_table(BUCKETS).map_err(storage_err!("table"))?;
            for entry in table.iter().map_err(storage_err!("read"))? {
                let (name, _) = entry.map_err(storage_err!("read"))?;
                known.insert(name.value().to_string());
            }
        }

        Ok(Self {
            db: Arc::new(db),
            buckets: Arc::new(known),
        })
    }

    fn check_bucket(&self, bucket: &str) -> BackendResult<()> {
        if self.buckets.contains(bucket) {
            Ok(())
        } else {
            Err(BackendError::BucketNotFound(bucket.to_string()))
        }
    }

    fn put_sync(&self, bucket: &str, key: &str, body: &[u8]) -> BackendResult<()> {
        self.check_bucket(bucket)?;
        let full_key = object_key(bucket, key);
        let txn = self.db.begin_write().map_err(storage_err!("transaction"))?;
        {
            let mut table = txn.open_table(OBJECTS).map_err(storage_err!("table"))?;
            table
                .insert(full_key.as_str(), body)
                .map_err(storage_err!("write"))?;
        }
        txn.commit().map_err(storage_err!("commit"))?;
        debug!(key = %full_key, size = body.len(), "object stored");
        Ok(())
    }

    fn get_sync(&self, bucket: &str, key: &str) -> BackendResult<Vec<u8>> {
        self.check_bucket(bucket)?;
        let full_key = object_key(bucket, key);
        let txn = self.db.begin_read().map_err(storage_err!("transaction"))?;
        let table = txn.open_table(OBJECTS).map_err(storage_err!("table"))?;
        match table.get(full_key.as_str()).map_err(storage_err!("read"))? {
            Some(guard) => Ok(guard.value().to_vec()),
            None => Err(BackendError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
        }
    }
}

impl ObjectStore for RedbObjectStore {
    fn put<'a>(&'a self, bucket: &'a str, key: &'a str, body: Vec<u8>) -> BackendFuture<'a, ()> {
        Box::pin(async move { self.put_sync(bucket, key, &body) })
    }

    fn get<'a>(&'a self, bucket: &'a str, key: &'a str) -> BackendFuture<'a, Vec<u8>> {
        Box::pin(async move { self.get_sync(bucket, key) })
    }
}
