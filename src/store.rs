use crate::storage::Storage;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A capacity-bounded, newest-first collection persisted as one named blob.
///
/// Every `append` is a whole-document replace: load the current document
/// (missing or corrupt means empty), build a fresh one with the new entry
/// in front and the old entries truncated to capacity, then store it. The
/// underlying storage offers no append or patch semantics, so in-place
/// mutation is never attempted.
pub struct BoundedStore<T> {
    storage: Arc<dyn Storage>,
    blob_name: String,
    doc_key: &'static str,
    capacity: usize,
    warned_unavailable: AtomicBool,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> BoundedStore<T> {
    pub fn new(
        storage: Arc<dyn Storage>,
        blob_name: impl Into<String>,
        doc_key: &'static str,
        capacity: usize,
    ) -> Self {
        Self {
            storage,
            blob_name: blob_name.into(),
            doc_key,
            capacity,
            warned_unavailable: AtomicBool::new(false),
            _marker: std::marker::PhantomData,
        }
    }

    /// Prepend `entry` and evict from the tail past capacity.
    ///
    /// Degrades to a no-op (after a single warning) when storage is
    /// unavailable; diagnostics must never crash the caller.
    pub fn append(&self, entry: T) {
        let mut entries = self.load_all();
        entries.insert(0, entry);
        entries.truncate(self.capacity);

        let bytes = match self.document(&entries) {
            Ok(b) => b,
            Err(e) => {
                warn!("Failed to serialize {}: {}", self.blob_name, e);
                return;
            }
        };

        if let Err(e) = self.storage.write(&self.blob_name, &bytes) {
            self.warn_once(&format!("append to {} failed: {}", self.blob_name, e));
        }
    }

    /// All persisted entries, newest first. Missing, unreadable, or corrupt
    /// documents are treated as empty; a corrupt blob is reinitialized to
    /// the canonical empty form so the store self-heals.
    pub fn load_all(&self) -> Vec<T> {
        let bytes = match self.storage.read(&self.blob_name) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Vec::new(),
            Err(e) => {
                self.warn_once(&format!("read of {} failed: {}", self.blob_name, e));
                return Vec::new();
            }
        };

        match self.parse(&bytes) {
            Some(entries) => entries,
            None => {
                warn!(
                    "{} is corrupt, reinitializing as empty",
                    self.blob_name
                );
                self.reinit_empty();
                Vec::new()
            }
        }
    }

    /// Remove the persisted blob entirely.
    pub fn clear(&self) {
        self.storage.remove(&self.blob_name);
    }

    fn document(&self, entries: &[T]) -> Result<Vec<u8>, serde_json::Error> {
        let mut doc = Map::new();
        doc.insert(self.doc_key.to_string(), serde_json::to_value(entries)?);
        serde_json::to_vec(&Value::Object(doc))
    }

    fn parse(&self, bytes: &[u8]) -> Option<Vec<T>> {
        let doc: Value = serde_json::from_slice(bytes).ok()?;
        let arr = doc.get(self.doc_key)?.as_array()?;
        let mut entries = Vec::with_capacity(arr.len());
        for item in arr {
            entries.push(serde_json::from_value(item.clone()).ok()?);
        }
        Some(entries)
    }

    fn reinit_empty(&self) {
        let bytes = match self.document(&[]) {
            Ok(b) => b,
            Err(_) => return,
        };
        if let Err(e) = self.storage.write(&self.blob_name, &bytes) {
            self.warn_once(&format!("reinit of {} failed: {}", self.blob_name, e));
        }
    }

    fn warn_once(&self, msg: &str) {
        if !self.warned_unavailable.swap(true, Ordering::Relaxed) {
            warn!("Storage unavailable, continuing without persistence: {}", msg);
        }
    }
}
