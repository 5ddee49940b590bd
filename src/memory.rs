//! An in-memory image store.
//!
//! [`MemoryStore`] implements every collaborator trait over plain maps. It is
//! what the unit and integration tests run against, and it counts calls to
//! the snapshot size oracle so memoization can be observed.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use crate::{
    descriptor::Descriptor,
    digest::Digest,
    error::{Error, Result},
    store::{
        matches_any, ContentStore, ContentWriter, Filter, ImageIndex, ImageRecord, SnapshotUsage,
    },
};

#[derive(Debug, Default)]
struct Inner {
    blobs: HashMap<Digest, Vec<u8>>,
    images: BTreeMap<String, ImageRecord>,
    snapshots: HashMap<String, i64>,
    failing: HashSet<String>,
    usage_calls: HashMap<String, usize>,
}

/// Blobs, image records and snapshot sizes held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain maps behind; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop a blob without going through [`ContentStore::delete`].
    pub fn remove_blob(&self, digest: &Digest) -> bool {
        self.lock().blobs.remove(digest).is_some()
    }

    pub fn contains_blob(&self, digest: &Digest) -> bool {
        self.lock().blobs.contains_key(digest)
    }

    pub fn blob_count(&self) -> usize {
        self.lock().blobs.len()
    }

    pub fn image_count(&self) -> usize {
        self.lock().images.len()
    }

    /// Record the on-disk size of snapshot `key`.
    pub fn set_usage(&self, key: impl Into<String>, size: i64) {
        self.lock().snapshots.insert(key.into(), size);
    }

    /// Make every later [`SnapshotUsage::usage`] call for `key` fail.
    pub fn fail_usage(&self, key: impl Into<String>) {
        self.lock().failing.insert(key.into());
    }

    /// How often the size of `key` was asked for.
    pub fn usage_calls(&self, key: &str) -> usize {
        self.lock().usage_calls.get(key).copied().unwrap_or(0)
    }

    /// How often any snapshot size was asked for.
    pub fn total_usage_calls(&self) -> usize {
        self.lock().usage_calls.values().sum()
    }
}

impl ContentStore for MemoryStore {
    fn info(&self, digest: &Digest) -> Result<i64> {
        match self.lock().blobs.get(digest) {
            Some(data) => i64::try_from(data.len())
                .map_err(|_| Error::CorruptMetadata(format!("blob {digest} is too large"))),
            None => Err(Error::NotFound(format!("content {digest}"))),
        }
    }

    fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>> {
        self.lock()
            .blobs
            .get(digest)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("content {digest}")))
    }

    fn delete(&self, digest: &Digest) -> Result<()> {
        match self.lock().blobs.remove(digest) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("content {digest}"))),
        }
    }
}

impl ContentWriter for MemoryStore {
    fn write_blob(&self, media_type: &str, data: &[u8]) -> Result<Descriptor> {
        let digest = Digest::from_content(data);
        let size = i64::try_from(data.len())
            .map_err(|_| Error::InvalidParameter(format!("blob of {} bytes", data.len())))?;
        self.lock().blobs.insert(digest.clone(), data.to_vec());
        Ok(Descriptor::new(media_type, digest, size))
    }
}

impl ImageIndex for MemoryStore {
    fn list(&self, filters: &[Filter]) -> Result<Vec<ImageRecord>> {
        Ok(self
            .lock()
            .images
            .values()
            .filter(|r| matches_any(filters, r))
            .cloned()
            .collect())
    }

    fn get(&self, name: &str) -> Result<ImageRecord> {
        self.lock()
            .images
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("image {name:?}")))
    }

    fn create(&self, record: ImageRecord) -> Result<ImageRecord> {
        let mut inner = self.lock();
        if inner.images.contains_key(&record.name) {
            return Err(Error::AlreadyExists(format!("image {:?}", record.name)));
        }
        inner.images.insert(record.name.clone(), record.clone());
        Ok(record)
    }

    fn delete(&self, name: &str) -> Result<()> {
        match self.lock().images.remove(name) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("image {name:?}"))),
        }
    }
}

impl SnapshotUsage for MemoryStore {
    fn usage(&self, key: &str) -> Result<i64> {
        let mut inner = self.lock();
        *inner.usage_calls.entry(key.to_string()).or_default() += 1;
        if inner.failing.contains(key) {
            return Err(Error::Io(std::io::Error::other(format!(
                "snapshot {key} is unavailable"
            ))));
        }
        inner
            .snapshots
            .get(key)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("snapshot {key}")))
    }
}
