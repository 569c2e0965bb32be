use std::marker::PhantomData;
use std::sync::Arc;

use tpk_archive::Archive;
use tpk_types::{BlobId, Schema, TypeTag};
use tracing::{debug, warn};

use crate::column::ColumnPacker;
use crate::error::{PackError, PackResult};
use crate::projection::ColumnRequest;
use crate::record::peek_packer_tag;

/// A packer type that can be rebuilt from its footer.
pub trait Restore: Sized {
    /// Tag written ahead of every header and footer of this packer type.
    fn packer_tag() -> TypeTag;

    /// Rebuild a read-only packer from footer blob `footer`.
    fn restore(
        archive: Arc<dyn Archive>,
        name: &str,
        category: &str,
        footer: BlobId,
        request: &ColumnRequest,
    ) -> PackResult<Self>;
}

/// Every stored collection of packer type `P` labelled `(name, category)`,
/// oldest first.
///
/// Opening only inspects footers; nothing is restored until
/// [`get`](Self::get).
pub struct Reference<P> {
    archive: Arc<dyn Archive>,
    name: String,
    category: String,
    ids: Vec<BlobId>,
    request: ColumnRequest,
    _packer: PhantomData<fn() -> P>,
}

impl<P: Restore> Reference<P> {
    pub fn open(archive: Arc<dyn Archive>, name: &str, category: &str) -> PackResult<Self> {
        let expected = P::packer_tag();
        let mut ids = Vec::new();
        for id in archive.find(name, category)? {
            let bytes = archive.read(id)?;
            match peek_packer_tag(&bytes) {
                Ok(tag) if expected.ensure_compatible(&tag).is_ok() => ids.push(id),
                Ok(tag) => debug!(
                    blob = %id,
                    found = %tag,
                    expected = %expected,
                    "skipping other packer type"
                ),
                Err(e) => warn!(blob = %id, error = %e, "skipping unreadable labelled blob"),
            }
        }
        debug!(name, category, matches = ids.len(), "reference opened");
        Ok(Self {
            archive,
            name: name.to_string(),
            category: category.to_string(),
            ids,
            request: ColumnRequest::All,
            _packer: PhantomData,
        })
    }

    /// Number of matching stored collections.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Footer blobs of the matching collections, oldest first.
    pub fn ids(&self) -> &[BlobId] {
        &self.ids
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn request(&self) -> &ColumnRequest {
        &self.request
    }

    /// Restore the `i`-th matching collection.
    pub fn get(&self, i: usize) -> PackResult<P> {
        let id = self.ids.get(i).ok_or(PackError::OccurrenceOutOfRange {
            index: i,
            count: self.ids.len(),
        })?;
        P::restore(
            Arc::clone(&self.archive),
            &self.name,
            &self.category,
            *id,
            &self.request,
        )
    }

    /// Restore the most recently written matching collection.
    pub fn latest(&self) -> PackResult<P> {
        match self.ids.len() {
            0 => Err(PackError::OccurrenceOutOfRange { index: 0, count: 0 }),
            n => self.get(n - 1),
        }
    }
}

impl Reference<ColumnPacker> {
    /// Read back exactly the prototype's columns, in the prototype's order.
    pub fn with_prototype(
        archive: Arc<dyn Archive>,
        name: &str,
        category: &str,
        prototype: Schema,
    ) -> PackResult<Self> {
        let mut reference = Self::open(archive, name, category)?;
        reference.request = ColumnRequest::Prototype(prototype);
        Ok(reference)
    }

    /// Keep the stored layout but read back only the named columns.
    pub fn with_columns<S: AsRef<str>>(
        archive: Arc<dyn Archive>,
        name: &str,
        category: &str,
        columns: &[S],
    ) -> PackResult<Self> {
        let mut reference = Self::open(archive, name, category)?;
        reference.request =
            ColumnRequest::Select(columns.iter().map(|c| c.as_ref().to_string()).collect());
        Ok(reference)
    }
}

impl<P> std::fmt::Debug for Reference<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reference")
            .field("name", &self.name)
            .field("category", &self.category)
            .field("ids", &self.ids)
            .field("request", &self.request)
            .finish()
    }
}
