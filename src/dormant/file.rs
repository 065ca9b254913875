//! File-backed dormant store
//!
//! Persists the full mapping as a single versioned JSON document at a
//! stable path. Every call serializes or deserializes the whole file;
//! in-process access is serialized by one mutex held across the file
//! operation. Writes go to a sibling temp file and are renamed into place,
//! which is as atomic as the filesystem allows; a torn write is an
//! acceptable recovery loss and is overwritten by the next successful
//! write.

use crate::error::DormantError;
use crate::types::{now_millis, CacheKey, CacheValue, EntryRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write as IoWrite;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Current on-disk document version
const DOCUMENT_VERSION: u32 = 1;

/// Owned form of the on-disk document
#[derive(Deserialize)]
struct Document<K, V> {
    version: u32,
    entries: Vec<(K, EntryRecord<V>)>,
}

/// Borrowed form used when writing
#[derive(Serialize)]
struct DocumentRef<'a, K, V> {
    version: u32,
    entries: Vec<(&'a K, &'a EntryRecord<V>)>,
}

/// Stable default document path for a `(K, V)` cache instantiation
///
/// Lives under the OS temporary directory in an `embercache` folder; the
/// file name is derived from the type pair so distinct instantiations never
/// share a document.
pub fn default_path_for<K: 'static, V: 'static>() -> PathBuf {
    let type_tag: String = std::any::type_name::<(K, V)>()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    std::env::temp_dir()
        .join("embercache")
        .join(format!("{type_tag}.json"))
}

/// Default dormant store: one JSON document behind a mutex
pub struct FileDormantStore<K, V> {
    /// Backing document path
    path: PathBuf,

    /// Logical TTL applied on the read path (milliseconds)
    ttl_ms: i64,

    /// Serializes all file operations within the process
    io_lock: Mutex<()>,

    /// Last-known cardinality
    last_count: AtomicUsize,

    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K: CacheKey, V: CacheValue> FileDormantStore<K, V> {
    /// Create a store over the given document path
    pub fn new(path: PathBuf, dormant_ttl_ms: u64) -> Self {
        Self {
            path,
            ttl_ms: dormant_ttl_ms as i64,
            io_lock: Mutex::new(()),
            last_count: AtomicUsize::new(0),
            _marker: PhantomData,
        }
    }

    /// Create a store at the default per-type path
    pub fn at_default_path(dormant_ttl_ms: u64) -> Self {
        Self::new(default_path_for::<K, V>(), dormant_ttl_ms)
    }

    /// The backing document path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_unlocked(&self) -> Result<HashMap<K, EntryRecord<V>>, DormantError> {
        let bytes = fs::read(&self.path)?;
        let document: Document<K, V> = serde_json::from_slice(&bytes)
            .map_err(|e| DormantError::Serialization(e.to_string()))?;
        if document.version != DOCUMENT_VERSION {
            return Err(DormantError::Serialization(format!(
                "unsupported document version {}",
                document.version
            )));
        }

        let now = now_millis();
        let records: HashMap<K, EntryRecord<V>> = document
            .entries
            .into_iter()
            .filter(|(_, record)| !record.is_expired(self.ttl_ms, now))
            .collect();
        self.last_count.store(records.len(), Ordering::Relaxed);
        Ok(records)
    }

    fn store_unlocked(&self, records: &HashMap<K, EntryRecord<V>>) -> Result<(), DormantError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let document = DocumentRef {
            version: DOCUMENT_VERSION,
            entries: records.iter().collect(),
        };
        let bytes = serde_json::to_vec(&document)
            .map_err(|e| DormantError::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        self.last_count.store(records.len(), Ordering::Relaxed);
        debug!(
            records = records.len(),
            path = %self.path.display(),
            "dormant document written"
        );
        Ok(())
    }
}

#[async_trait]
impl<K: CacheKey, V: CacheValue> super::DormantStore<K, V> for FileDormantStore<K, V> {
    async fn read(&self) -> Result<HashMap<K, EntryRecord<V>>, DormantError> {
        let _guard = self.io_lock.lock();
        self.load_unlocked()
    }

    async fn write(&self, records: &HashMap<K, EntryRecord<V>>) -> Result<(), DormantError> {
        let _guard = self.io_lock.lock();
        self.store_unlocked(records)
    }

    async fn clear(&self) -> Result<(), DormantError> {
        let _guard = self.io_lock.lock();
        self.store_unlocked(&HashMap::new())
    }

    async fn exists(&self) -> bool {
        self.path.exists()
    }

    async fn is_empty(&self) -> bool {
        let _guard = self.io_lock.lock();
        self.load_unlocked().map(|r| r.is_empty()).unwrap_or(true)
    }

    async fn is_accessible(&self) -> bool {
        match fs::metadata(&self.path) {
            Ok(_) => File::open(&self.path).is_ok(),
            // Absent is fine: the document is created on first use
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(_) => false,
        }
    }

    async fn ensure_exists(&self) -> Result<(), DormantError> {
        let _guard = self.io_lock.lock();
        if !self.path.exists() {
            self.store_unlocked(&HashMap::new())?;
        }
        Ok(())
    }

    fn count(&self) -> usize {
        self.last_count.load(Ordering::Relaxed)
    }
}
