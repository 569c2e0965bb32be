use tpk_types::BlobId;

use crate::error::ArchiveResult;

/// Append-only store of opaque blobs.
///
/// All implementations must satisfy these invariants:
/// - Blob ids increase strictly with every append within one archive.
/// - A blob never changes once appended, so concurrent reads are safe.
/// - The archive never interprets blob contents.
/// - Tags are additive: tagging never hides or rewrites earlier tags.
/// - All I/O errors are propagated, never silently ignored.
pub trait Archive: Send + Sync {
    /// Append a blob and return its newly assigned id.
    ///
    /// Returns `ArchiveError::ReadOnly` if the archive does not accept writes.
    fn append(&self, data: &[u8]) -> ArchiveResult<BlobId>;

    /// Read a blob by id.
    ///
    /// Returns `ArchiveError::NotFound` if no blob has this id.
    fn read(&self, id: BlobId) -> ArchiveResult<Vec<u8>>;

    /// Attach a `(name, category)` label to an existing blob.
    fn tag(&self, id: BlobId, name: &str, category: &str) -> ArchiveResult<()>;

    /// All blobs carrying exactly this `(name, category)` label, in append
    /// order.
    fn find(&self, name: &str, category: &str) -> ArchiveResult<Vec<BlobId>>;

    /// Whether `append` and `tag` are accepted.
    fn is_writable(&self) -> bool;

    /// Whether `read` is served.
    fn is_readable(&self) -> bool {
        true
    }

    /// Number of blobs appended so far.
    fn blob_count(&self) -> u64;

    /// Size in bytes of a stored blob.
    ///
    /// Default implementation reads the blob. Backends that keep an offset
    /// table should override it.
    fn blob_len(&self, id: BlobId) -> ArchiveResult<u64> {
        self.read(id).map(|data| data.len() as u64)
    }
}
