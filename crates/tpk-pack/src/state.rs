use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tpk_archive::Archive;
use tpk_types::{BlobId, ColumnType, Schema, TypeTag, Value};
use tracing::{info, warn};

use crate::buffer::FillBuffer;
use crate::config::PackerConfig;
use crate::error::{PackError, PackResult};
use crate::index::IndexTable;
use crate::record::{save_footer, save_header, FooterRecord, HeaderRecord, HeaderRef};

static NEXT_OBJECT_NUMBER: AtomicU64 = AtomicU64::new(0);

/// Bookkeeping shared by both packer layouts: identity, settings, row count,
/// and the header/footer lifecycle.
pub(crate) struct PackerState {
    pub packer_tag: TypeTag,
    pub archive: Arc<dyn Archive>,
    pub name: String,
    pub category: String,
    pub title: String,
    pub config: PackerConfig,
    pub header: Option<HeaderRef>,
    pub n_rows: u64,
    pub object_number: u64,
    /// Set once the footer exists, whether written here or read back.
    pub finalized: bool,
}

impl PackerState {
    pub fn new(
        packer_tag: TypeTag,
        archive: Arc<dyn Archive>,
        name: &str,
        category: &str,
        title: &str,
        config: PackerConfig,
    ) -> PackResult<Self> {
        config.validate()?;
        Ok(Self {
            packer_tag,
            archive,
            name: name.to_string(),
            category: category.to_string(),
            title: title.to_string(),
            config,
            header: None,
            n_rows: 0,
            object_number: NEXT_OBJECT_NUMBER.fetch_add(1, Ordering::Relaxed),
            finalized: false,
        })
    }

    /// State of a collection read back from its footer.
    #[allow(clippy::too_many_arguments)]
    pub fn restored(
        packer_tag: TypeTag,
        archive: Arc<dyn Archive>,
        name: &str,
        category: &str,
        title: String,
        config: PackerConfig,
        header: HeaderRef,
        n_rows: u64,
    ) -> Self {
        Self {
            packer_tag,
            archive,
            name: name.to_string(),
            category: category.to_string(),
            title,
            config,
            header: Some(header),
            n_rows,
            object_number: NEXT_OBJECT_NUMBER.fetch_add(1, Ordering::Relaxed),
            finalized: true,
        }
    }

    pub fn is_writable(&self) -> bool {
        !self.finalized && self.archive.is_writable()
    }

    /// Whether a fill may proceed. Rejections are logged, not raised.
    pub fn accepts_fill(&self) -> bool {
        if self.finalized {
            warn!(
                name = %self.name,
                category = %self.category,
                "fill rejected: collection already written"
            );
            return false;
        }
        if !self.archive.is_writable() {
            warn!(
                name = %self.name,
                category = %self.category,
                "fill rejected: archive is read-only"
            );
            return false;
        }
        true
    }

    pub fn check_row(&self, row: u64) -> PackResult<()> {
        if row >= self.n_rows {
            return Err(PackError::RowOutOfRange {
                row,
                n_rows: self.n_rows,
            });
        }
        Ok(())
    }

    /// Fails once the header is stored: `what` would then disagree with the
    /// archive.
    pub fn check_header_pending(&self, what: &str) -> PackResult<()> {
        if self.header.is_some() {
            return Err(PackError::Configuration(format!(
                "cannot change {what} of {:?} once its header is stored",
                self.name
            )));
        }
        Ok(())
    }

    /// Applies to every later flush. A stored header keeps the size it was
    /// written with; the footer records the final one.
    pub fn set_buffer_size<'a>(
        &mut self,
        buffer_size: usize,
        fills: impl IntoIterator<Item = &'a mut FillBuffer>,
    ) -> PackResult<()> {
        let config = self.config.clone().with_buffer_size(buffer_size);
        config.validate()?;
        self.config = config;
        for fill in fills {
            fill.set_threshold(buffer_size);
        }
        Ok(())
    }

    pub fn ensure_header(&mut self, schema: &Schema) -> PackResult<HeaderRef> {
        if let Some(header) = self.header {
            return Ok(header);
        }
        let record = HeaderRecord::new(schema, &self.title, &self.config);
        let header = save_header(self.archive.as_ref(), &self.packer_tag, &record)?;
        self.header = Some(header);
        Ok(header)
    }

    /// Flush one fill stream and index the resulting buffer. The header goes
    /// out first if this is the collection's first buffer.
    pub fn flush(
        &mut self,
        schema: &Schema,
        fill: &mut FillBuffer,
        index: &mut IndexTable,
    ) -> PackResult<()> {
        if fill.is_empty() {
            return Ok(());
        }
        self.ensure_header(schema)?;
        if let Some(flushed) = fill.flush(self.archive.as_ref(), self.config.compression)? {
            index.append(flushed.first_row, flushed.blob_id, flushed.rows)?;
        }
        Ok(())
    }

    /// Write the footer for fully flushed `indexes` and label it.
    pub fn finish(&mut self, schema: &Schema, indexes: Vec<IndexTable>) -> PackResult<BlobId> {
        let header = self.ensure_header(schema)?;
        let blobs: usize = indexes.iter().map(IndexTable::len).sum();
        let footer = FooterRecord {
            header: header.blob_id,
            header_digest: header.digest,
            n_rows: self.n_rows,
            buffer_size: self.config.buffer_size as u64,
            indexes,
        };
        let id = save_footer(
            self.archive.as_ref(),
            &self.packer_tag,
            &footer,
            &self.name,
            &self.category,
        )?;
        self.finalized = true;
        info!(
            name = %self.name,
            category = %self.category,
            rows = self.n_rows,
            buffers = blobs,
            footer = %id,
            "collection written"
        );
        Ok(id)
    }

    /// Whether `write` can do anything. Logs when pending rows are stranded
    /// by a read-only archive.
    pub fn can_write(&self) -> bool {
        if self.finalized {
            return false;
        }
        if !self.archive.is_writable() {
            if self.n_rows > 0 {
                warn!(
                    name = %self.name,
                    rows = self.n_rows,
                    "archive is read-only, collection not written"
                );
            }
            return false;
        }
        true
    }
}

/// Cell-by-cell content equality of two decoded rows; see
/// [`Value::content_eq`].
pub(crate) fn rows_content_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.content_eq(y))
}

/// Decode one stored item, which must be consumed exactly.
pub(crate) fn decode_item(bytes: &[u8], ty: ColumnType) -> PackResult<Value> {
    let mut input = bytes;
    let value = ty.decode(&mut input)?;
    if !input.is_empty() {
        return Err(PackError::Decode(format!(
            "{} trailing bytes after {ty} value",
            input.len()
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use tpk_archive::InMemoryArchive;

    use super::*;
    use crate::config::Compression;

    fn state(archive: Arc<dyn Archive>) -> PackerState {
        PackerState::new(
            TypeTag::new("tpk::Test", 1),
            archive,
            "n",
            "c",
            "t",
            PackerConfig::default().with_compression(Compression::None),
        )
        .unwrap()
    }

    fn schema() -> Schema {
        Schema::with_default_names(&[ColumnType::U32]).unwrap()
    }

    #[test]
    fn object_numbers_are_distinct() {
        let archive: Arc<dyn Archive> = Arc::new(InMemoryArchive::new());
        let a = state(Arc::clone(&archive));
        let b = state(archive);
        assert_ne!(a.object_number, b.object_number);
    }

    #[test]
    fn invalid_config_rejected() {
        let archive: Arc<dyn Archive> = Arc::new(InMemoryArchive::new());
        let result = PackerState::new(
            TypeTag::new("tpk::Test", 1),
            archive,
            "n",
            "c",
            "",
            PackerConfig::default().with_compression(Compression::Zstd { level: 0 }),
        );
        assert!(matches!(result, Err(PackError::Configuration(_))));
    }

    #[test]
    fn header_is_saved_once() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut s = state(archive.clone());
        let first = s.ensure_header(&schema()).unwrap();
        let second = s.ensure_header(&schema()).unwrap();
        assert_eq!(first, second);
        assert_eq!(archive.blob_count(), 1);
        assert!(s.check_header_pending("title").is_err());
    }

    #[test]
    fn finish_labels_footer_and_finalizes() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut s = state(archive.clone());
        let id = s.finish(&schema(), vec![IndexTable::new()]).unwrap();
        assert!(s.finalized);
        assert!(!s.is_writable());
        assert!(!s.accepts_fill());
        assert!(!s.can_write());
        assert_eq!(archive.find("n", "c").unwrap(), vec![id]);
    }

    #[test]
    fn read_only_archive_refuses() {
        let archive = Arc::new(InMemoryArchive::new());
        archive.set_read_only();
        let s = state(archive);
        assert!(!s.accepts_fill());
        assert!(!s.can_write());
    }

    #[test]
    fn rows_compare_by_content() {
        let narrow = [Value::I32(4), Value::F64(0.5)];
        let wide = [Value::I64(4), Value::F64(0.5)];
        assert!(rows_content_eq(&narrow, &wide));
        assert!(!rows_content_eq(&narrow, &[Value::I64(5), Value::F64(0.5)]));
        assert!(!rows_content_eq(&narrow, &[Value::I32(4)]));
    }

    #[test]
    fn decode_item_rejects_trailing_bytes() {
        assert_eq!(decode_item(&[1, 0, 0, 0], ColumnType::U32).unwrap(), Value::U32(1));
        assert!(matches!(
            decode_item(&[1, 0, 0, 0, 9], ColumnType::U32).unwrap_err(),
            PackError::Decode(_)
        ));
    }
}
