use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use tpk_types::BlobId;

use crate::catalog::Catalog;
use crate::error::{ArchiveError, ArchiveResult};
use crate::traits::Archive;

#[derive(Default)]
struct Inner {
    blobs: Vec<Vec<u8>>,
    catalog: Catalog,
}

/// In-memory, `Vec`-backed archive.
///
/// Intended for tests and embedding. Blobs live behind a `RwLock`, so any
/// number of readers can share the archive through an `Arc`.
pub struct InMemoryArchive {
    inner: RwLock<Inner>,
    read_only: AtomicBool,
}

impl InMemoryArchive {
    /// Create a new empty, writable archive.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            read_only: AtomicBool::new(false),
        }
    }

    /// Stop accepting appends and tags. Existing blobs stay readable.
    pub fn set_read_only(&self) {
        self.read_only.store(true, Ordering::Release);
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.inner
            .read()
            .expect("lock poisoned")
            .blobs
            .iter()
            .map(|b| b.len() as u64)
            .sum()
    }

    /// Number of labels in the catalog.
    pub fn label_count(&self) -> usize {
        self.inner.read().expect("lock poisoned").catalog.len()
    }
}

impl Default for InMemoryArchive {
    fn default() -> Self {
        Self::new()
    }
}

impl Archive for InMemoryArchive {
    fn append(&self, data: &[u8]) -> ArchiveResult<BlobId> {
        if !self.is_writable() {
            return Err(ArchiveError::ReadOnly);
        }
        let mut inner = self.inner.write().expect("lock poisoned");
        let id = BlobId::new(inner.blobs.len() as u64);
        inner.blobs.push(data.to_vec());
        Ok(id)
    }

    fn read(&self, id: BlobId) -> ArchiveResult<Vec<u8>> {
        let inner = self.inner.read().expect("lock poisoned");
        usize::try_from(id.get())
            .ok()
            .and_then(|i| inner.blobs.get(i))
            .cloned()
            .ok_or(ArchiveError::NotFound(id))
    }

    fn tag(&self, id: BlobId, name: &str, category: &str) -> ArchiveResult<()> {
        if !self.is_writable() {
            return Err(ArchiveError::ReadOnly);
        }
        let mut inner = self.inner.write().expect("lock poisoned");
        if id.get() >= inner.blobs.len() as u64 {
            return Err(ArchiveError::NotFound(id));
        }
        inner.catalog.insert(id, name, category);
        Ok(())
    }

    fn find(&self, name: &str, category: &str) -> ArchiveResult<Vec<BlobId>> {
        Ok(self
            .inner
            .read()
            .expect("lock poisoned")
            .catalog
            .find(name, category))
    }

    fn is_writable(&self) -> bool {
        !self.read_only.load(Ordering::Acquire)
    }

    fn blob_count(&self) -> u64 {
        self.inner.read().expect("lock poisoned").blobs.len() as u64
    }

    fn blob_len(&self, id: BlobId) -> ArchiveResult<u64> {
        let inner = self.inner.read().expect("lock poisoned");
        usize::try_from(id.get())
            .ok()
            .and_then(|i| inner.blobs.get(i))
            .map(|b| b.len() as u64)
            .ok_or(ArchiveError::NotFound(id))
    }
}

impl std::fmt::Debug for InMemoryArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryArchive")
            .field("blob_count", &self.blob_count())
            .field("writable", &self.is_writable())
            .finish()
    }
}
