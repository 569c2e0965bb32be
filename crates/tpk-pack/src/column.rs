use std::sync::Arc;

use tpk_archive::Archive;
use tpk_types::{BlobId, ColumnType, Row, Schema, TypeError, TypeTag, Value};
use tracing::{debug, error};

use crate::buffer::{read_item, FillBuffer, ReadCache};
use crate::config::PackerConfig;
use crate::error::{PackError, PackResult};
use crate::index::IndexTable;
use crate::projection::{ColumnRequest, Projection};
use crate::record::{load_records, HeaderRef, COLUMN_PACKER};
use crate::reference::Restore;
use crate::state::{decode_item, rows_content_eq, PackerState};

/// Persistent collection of rows stored column by column.
///
/// Every column has its own fill buffer, threshold check, buffer blobs, and
/// index table, so reading one column never touches the others. A packer
/// read back through a [`Reference`](crate::Reference) may expose a subset
/// of the stored columns, possibly reordered (see [`ColumnRequest`]).
pub struct ColumnPacker {
    state: PackerState,
    /// Columns as exposed, after projection.
    schema: Schema,
    projection: Projection,
    // Per stored column.
    fills: Vec<FillBuffer>,
    caches: Vec<ReadCache>,
    indexes: Vec<IndexTable>,
}

impl ColumnPacker {
    pub fn new(
        schema: Schema,
        title: &str,
        archive: Arc<dyn Archive>,
        name: &str,
        category: &str,
        config: PackerConfig,
    ) -> PackResult<Self> {
        let state = PackerState::new(
            <Self as Restore>::packer_tag(),
            archive,
            name,
            category,
            title,
            config,
        )?;
        let n = schema.len();
        let fills = (0..n)
            .map(|c| FillBuffer::new(c as u32, state.config.buffer_size))
            .collect();
        debug!(
            name,
            category,
            columns = n,
            buffer_size = state.config.buffer_size,
            object = state.object_number,
            "column packer created"
        );
        Ok(Self {
            state,
            projection: Projection::identity(&schema),
            schema,
            fills,
            caches: (0..n).map(|_| ReadCache::new()).collect(),
            indexes: vec![IndexTable::new(); n],
        })
    }

    /// Column names and types taken from `(name, value)` pairs.
    pub fn from_prototype<S: AsRef<str>>(
        title: &str,
        archive: Arc<dyn Archive>,
        name: &str,
        category: &str,
        prototype: &[(S, Value)],
        config: PackerConfig,
    ) -> PackResult<Self> {
        let schema = Schema::from_prototype(prototype)?;
        Self::new(schema, title, archive, name, category, config)
    }

    /// Columns named `c0, c1, ...` with an empty title.
    pub fn with_default_names(
        types: &[ColumnType],
        archive: Arc<dyn Archive>,
        name: &str,
        category: &str,
        config: PackerConfig,
    ) -> PackResult<Self> {
        let schema = Schema::with_default_names(types)?;
        Self::new(schema, "", archive, name, category, config)
    }

    /// Append one row, splitting it into its columns.
    ///
    /// Returns `Ok(false)`, with nothing changed, once the collection has been
    /// written or when the archive is read-only. Each column whose buffer
    /// grows past the threshold is flushed on its own.
    pub fn fill(&mut self, row: &[Value]) -> PackResult<bool> {
        if !self.state.accepts_fill() {
            return Ok(false);
        }
        self.schema.check_row(row)?;
        for ((field, value), fill) in self.schema.fields().iter().zip(row).zip(&mut self.fills) {
            fill.append(|buf| Ok(field.ty.encode(value, buf)?))?;
        }
        self.state.n_rows += 1;
        for (fill, index) in self.fills.iter_mut().zip(&mut self.indexes) {
            if fill.exceeds_threshold() {
                self.state.flush(&self.schema, fill, index)?;
            }
        }
        Ok(true)
    }

    /// Flush every column and write the footer. Calling it again does
    /// nothing. Returns `Ok(false)` if the archive is read-only and the
    /// collection was never written.
    pub fn write(&mut self) -> PackResult<bool> {
        if self.state.finalized {
            return Ok(true);
        }
        if !self.state.can_write() {
            return Ok(false);
        }
        for (fill, index) in self.fills.iter_mut().zip(&mut self.indexes) {
            self.state.flush(&self.schema, fill, index)?;
        }
        self.state.finish(&self.schema, self.indexes.clone())?;
        Ok(true)
    }

    /// Decode row `row` into `out`. Columns excluded at open time keep
    /// whatever `out` held; if `out` has the wrong length it is first reset
    /// to the schema's default row.
    pub fn row_contents(&mut self, row: u64, out: &mut Row) -> PackResult<()> {
        self.state.check_row(row)?;
        if out.len() != self.schema.len() {
            *out = self.schema.default_row();
        }
        let archive = self.state.archive.as_ref();
        for (i, field) in self.schema.fields().iter().enumerate() {
            if !self.projection.is_read_back(i) {
                continue;
            }
            let Some(c) = self.projection.stored_column(i) else {
                continue;
            };
            let bytes = read_item(
                &self.fills[c],
                &mut self.caches[c],
                archive,
                &self.indexes[c],
                row,
            )?;
            out[i] = decode_item(bytes, field.ty)?;
        }
        Ok(())
    }

    pub fn row(&mut self, row: u64) -> PackResult<Row> {
        let mut out = self.schema.default_row();
        self.row_contents(row, &mut out)?;
        Ok(out)
    }

    /// One cell. Only the buffer of `column` is consulted.
    pub fn fetch_item(&mut self, column: usize, row: u64) -> PackResult<Value> {
        let (c, ty) = self.readable_column(column)?;
        self.state.check_row(row)?;
        let bytes = read_item(
            &self.fills[c],
            &mut self.caches[c],
            self.state.archive.as_ref(),
            &self.indexes[c],
            row,
        )?;
        decode_item(bytes, ty)
    }

    /// [`fetch_item`](Self::fetch_item) converted to a concrete type.
    pub fn fetch_as<T>(&mut self, column: usize, row: u64) -> PackResult<T>
    where
        T: TryFrom<Value, Error = TypeError>,
    {
        Ok(T::try_from(self.fetch_item(column, row)?)?)
    }

    /// Forward iterator over every value of one column. It keeps its own
    /// read buffer and leaves the packer's caches alone.
    pub fn column_iter(&self, column: usize) -> PackResult<ColumnIter<'_>> {
        let (stored, ty) = self.readable_column(column)?;
        Ok(ColumnIter {
            packer: self,
            stored,
            ty,
            next_row: 0,
            end: self.state.n_rows,
            cache: ReadCache::new(),
        })
    }

    /// Same column names, same row count, same read-back columns, and cells
    /// equal by content. Column types may differ: numbers compare by value
    /// across widths.
    pub fn content_eq(&mut self, other: &mut ColumnPacker) -> PackResult<bool> {
        if !self.schema.names().eq(other.schema.names())
            || self.n_rows() != other.n_rows()
            || self.projection.mask() != other.projection.mask()
        {
            return Ok(false);
        }
        let mut mine = self.schema.default_row();
        let mut theirs = other.schema.default_row();
        for row in 0..self.n_rows() {
            self.row_contents(row, &mut mine)?;
            other.row_contents(row, &mut theirs)?;
            if !rows_content_eq(&mine, &theirs) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Stored column and type behind exposed `column`, if it was read back.
    fn readable_column(&self, column: usize) -> PackResult<(usize, ColumnType)> {
        let field = self.schema.field(column).ok_or(PackError::ColumnOutOfRange {
            column,
            n_columns: self.schema.len(),
        })?;
        if !self.projection.is_read_back(column) {
            return Err(PackError::SchemaMismatch(format!(
                "column {:?} was not read back",
                field.name
            )));
        }
        let stored = self
            .projection
            .stored_column(column)
            .ok_or(PackError::ColumnOutOfRange {
                column,
                n_columns: self.schema.len(),
            })?;
        Ok((stored, field.ty))
    }

    pub fn n_rows(&self) -> u64 {
        self.state.n_rows
    }

    pub fn n_columns(&self) -> usize {
        self.schema.len()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn column_name(&self, column: usize) -> Option<&str> {
        self.schema.field(column).map(|f| f.name.as_str())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema.names().collect()
    }

    pub fn column_number(&self, name: &str) -> Option<usize> {
        self.schema.column_number(name)
    }

    /// Rename a column. Only allowed until the header is stored, i.e. before
    /// the first flush of any column.
    pub fn set_column_name(&mut self, column: usize, name: &str) -> PackResult<()> {
        let n_columns = self.schema.len();
        if column >= n_columns {
            return Err(PackError::ColumnOutOfRange { column, n_columns });
        }
        self.state.check_header_pending("column names")?;
        self.schema.rename(column, name)?;
        self.projection = Projection::identity(&self.schema);
        for cache in &mut self.caches {
            cache.invalidate();
        }
        Ok(())
    }

    /// Index table of exposed `column`.
    pub fn column_index(&self, column: usize) -> Option<&IndexTable> {
        self.projection
            .stored_column(column)
            .and_then(|c| self.indexes.get(c))
    }

    // -----------------------------------------------------------------------
    // Projection
    // -----------------------------------------------------------------------

    /// Every stored column is exposed, in stored order.
    pub fn is_original(&self) -> bool {
        self.projection.is_original()
    }

    pub fn n_original_columns(&self) -> usize {
        self.projection.original().len()
    }

    pub fn original_column_names(&self) -> Vec<&str> {
        self.projection.original().names().collect()
    }

    pub fn original_column_name(&self, stored: usize) -> Option<&str> {
        self.projection
            .original()
            .field(stored)
            .map(|f| f.name.as_str())
    }

    pub fn original_column_number(&self, name: &str) -> Option<usize> {
        self.projection.original().column_number(name)
    }

    /// Stored column behind exposed `column`.
    pub fn original_column(&self, column: usize) -> Option<usize> {
        self.projection.stored_column(column)
    }

    /// Per exposed column: whether it was read back.
    pub fn readback_mask(&self) -> &[bool] {
        self.projection.mask()
    }

    pub fn n_columns_read_back(&self) -> usize {
        self.projection.n_read_back()
    }

    // -----------------------------------------------------------------------
    // Inspectors
    // -----------------------------------------------------------------------

    pub fn title(&self) -> &str {
        &self.state.title
    }

    pub fn set_title(&mut self, title: &str) -> PackResult<()> {
        self.state.check_header_pending("the title")?;
        self.state.title = title.to_string();
        Ok(())
    }

    pub fn buffer_size(&self) -> usize {
        self.state.config.buffer_size
    }

    /// Change the per-column flush threshold for subsequent fills. The
    /// value in force at [`write`](Self::write) is stored in the footer.
    pub fn set_buffer_size(&mut self, buffer_size: usize) -> PackResult<()> {
        self.state.set_buffer_size(buffer_size, self.fills.iter_mut())
    }

    pub fn config(&self) -> &PackerConfig {
        &self.state.config
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn category(&self) -> &str {
        &self.state.category
    }

    pub fn archive(&self) -> &Arc<dyn Archive> {
        &self.state.archive
    }

    pub fn is_readable(&self) -> bool {
        self.state.archive.is_readable()
    }

    pub fn is_writable(&self) -> bool {
        self.state.is_writable()
    }

    /// Process-unique number of this packer object. Not stored.
    pub fn object_number(&self) -> u64 {
        self.state.object_number
    }

    /// Values of exposed `column` still waiting in its fill buffer.
    pub fn pending_values(&self, column: usize) -> Option<usize> {
        self.projection
            .stored_column(column)
            .and_then(|c| self.fills.get(c))
            .map(FillBuffer::len)
    }

    pub fn clear_read_cache(&mut self) {
        for cache in &mut self.caches {
            cache.invalidate();
        }
    }
}

impl Restore for ColumnPacker {
    fn packer_tag() -> TypeTag {
        TypeTag::new(COLUMN_PACKER, 1)
    }

    fn restore(
        archive: Arc<dyn Archive>,
        name: &str,
        category: &str,
        footer_id: BlobId,
        request: &ColumnRequest,
    ) -> PackResult<Self> {
        let (footer, header) = load_records(archive.as_ref(), &Self::packer_tag(), footer_id)?;
        let original = header.schema()?;
        if footer.indexes.len() != original.len() {
            return Err(PackError::Corrupt {
                blob: footer_id,
                reason: format!(
                    "{} index tables for {} stored columns",
                    footer.indexes.len(),
                    original.len()
                ),
            });
        }
        let (schema, projection) = Projection::resolve(&original, request)?;
        let config = footer.config(&header);
        let fills = (0..original.len())
            .map(|c| FillBuffer::resume(c as u32, config.buffer_size, footer.n_rows))
            .collect();
        let state = PackerState::restored(
            Self::packer_tag(),
            archive,
            name,
            category,
            header.title,
            config,
            HeaderRef {
                blob_id: footer.header,
                digest: footer.header_digest,
            },
            footer.n_rows,
        );
        debug!(
            name,
            category,
            rows = footer.n_rows,
            stored = original.len(),
            read_back = projection.n_read_back(),
            footer = %footer_id,
            "column packer restored"
        );
        Ok(Self {
            state,
            schema,
            projection,
            fills,
            caches: (0..original.len()).map(|_| ReadCache::new()).collect(),
            indexes: footer.indexes,
        })
    }
}

impl Drop for ColumnPacker {
    fn drop(&mut self) {
        if let Err(e) = self.write() {
            error!(
                name = %self.state.name,
                category = %self.state.category,
                error = %e,
                "implicit write failed"
            );
        }
    }
}

impl std::fmt::Debug for ColumnPacker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnPacker")
            .field("name", &self.state.name)
            .field("category", &self.state.category)
            .field("columns", &self.schema.len())
            .field("stored_columns", &self.projection.original().len())
            .field("rows", &self.state.n_rows)
            .field("finalized", &self.state.finalized)
            .finish()
    }
}

/// Read-only forward iterator over one column of a [`ColumnPacker`].
///
/// Yields `Err` once and then stops if a buffer cannot be loaded.
#[derive(Debug)]
pub struct ColumnIter<'a> {
    packer: &'a ColumnPacker,
    stored: usize,
    ty: ColumnType,
    next_row: u64,
    end: u64,
    cache: ReadCache,
}

impl Iterator for ColumnIter<'_> {
    type Item = PackResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_row >= self.end {
            return None;
        }
        let row = self.next_row;
        self.next_row += 1;
        let ty = self.ty;
        let packer = self.packer;
        let result = read_item(
            &packer.fills[self.stored],
            &mut self.cache,
            packer.state.archive.as_ref(),
            &packer.indexes[self.stored],
            row,
        )
        .and_then(|bytes| decode_item(bytes, ty));
        if result.is_err() {
            self.next_row = self.end;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.end - self.next_row) as usize;
        (left, Some(left))
    }
}

impl ExactSizeIterator for ColumnIter<'_> {}

#[cfg(test)]
mod tests {
    use tpk_archive::InMemoryArchive;
    use tpk_types::Field;

    use super::*;
    use crate::config::Compression;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("n", ColumnType::U64),
            Field::new("flag", ColumnType::Bool),
            Field::new("label", ColumnType::Str),
        ])
        .unwrap()
    }

    fn packer(archive: &Arc<InMemoryArchive>, buffer_size: usize) -> ColumnPacker {
        ColumnPacker::new(
            schema(),
            "cols",
            archive.clone(),
            "cols",
            "test",
            PackerConfig::column_default()
                .with_buffer_size(buffer_size)
                .with_compression(Compression::None),
        )
        .unwrap()
    }

    fn row(i: u64) -> Row {
        vec![
            Value::from(i),
            Value::from(i % 2 == 0),
            Value::from(format!("row label {i}")),
        ]
    }

    #[test]
    fn fill_and_fetch() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut p = packer(&archive, 32);
        for i in 0..40 {
            assert!(p.fill(&row(i)).unwrap());
        }
        assert_eq!(p.n_rows(), 40);
        assert_eq!(p.fetch_item(0, 17).unwrap(), Value::from(17u64));
        assert!(!p.fetch_as::<bool>(1, 17).unwrap());
        assert_eq!(p.fetch_as::<String>(2, 39).unwrap(), "row label 39");
        assert_eq!(p.row(5).unwrap(), row(5));
    }

    #[test]
    fn fetch_as_wrong_type() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut p = packer(&archive, 32);
        p.fill(&row(1)).unwrap();
        assert!(matches!(
            p.fetch_as::<i32>(0, 0).unwrap_err(),
            PackError::SchemaMismatch(_)
        ));
    }

    #[test]
    fn fetch_out_of_range() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut p = packer(&archive, 32);
        p.fill(&row(1)).unwrap();
        assert!(matches!(
            p.fetch_item(3, 0).unwrap_err(),
            PackError::ColumnOutOfRange { .. }
        ));
        assert!(matches!(
            p.fetch_item(0, 1).unwrap_err(),
            PackError::RowOutOfRange { .. }
        ));
    }

    #[test]
    fn columns_flush_independently() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut p = packer(&archive, 16);
        for i in 0..10 {
            p.fill(&row(i)).unwrap();
        }
        // u64 values: 8 bytes each, flush every third value
        let n_index = p.column_index(0).unwrap();
        assert_eq!(n_index.len(), 3);
        assert_eq!(n_index.rows_of(1), Some(3..6));
        // bools: one byte each, never past 16 bytes
        assert_eq!(p.column_index(1).unwrap().len(), 0);
        assert_eq!(p.pending_values(1), Some(10));
        // 12-byte labels flush every second value
        assert!(p.column_index(2).unwrap().len() > n_index.len());
    }

    #[test]
    fn column_iter_walks_one_column() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut p = packer(&archive, 16);
        for i in 0..25 {
            p.fill(&row(i)).unwrap();
        }
        let iter = p.column_iter(0).unwrap();
        assert_eq!(iter.len(), 25);
        let values: Vec<u64> = iter
            .map(|v| u64::try_from(v.unwrap()).unwrap())
            .collect();
        assert_eq!(values, (0..25).collect::<Vec<_>>());

        assert!(matches!(
            p.column_iter(9).unwrap_err(),
            PackError::ColumnOutOfRange { .. }
        ));
    }

    #[test]
    fn write_flushes_every_column() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut p = packer(&archive, 1 << 16);
        for i in 0..5 {
            p.fill(&row(i)).unwrap();
        }
        assert!(p.write().unwrap());
        for c in 0..3 {
            assert_eq!(p.column_index(c).unwrap().len(), 1);
            assert_eq!(p.pending_values(c), Some(0));
        }
        // header, three buffers, footer
        assert_eq!(archive.blob_count(), 5);
        assert!(p.write().unwrap());
        assert_eq!(archive.blob_count(), 5);
        assert!(!p.fill(&row(9)).unwrap());
    }

    #[test]
    fn fresh_packer_is_original() {
        let archive = Arc::new(InMemoryArchive::new());
        let p = packer(&archive, 64);
        assert!(p.is_original());
        assert_eq!(p.n_original_columns(), 3);
        assert_eq!(p.original_column_names(), vec!["n", "flag", "label"]);
        assert_eq!(p.original_column_name(2), Some("label"));
        assert_eq!(p.original_column_number("flag"), Some(1));
        assert_eq!(p.original_column(1), Some(1));
        assert_eq!(p.readback_mask(), &[true, true, true]);
        assert_eq!(p.n_columns_read_back(), 3);
    }

    #[test]
    fn content_eq_ignores_buffering() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut a = packer(&archive, 8);
        let mut b = packer(&archive, 4096);
        for i in 0..30 {
            a.fill(&row(i)).unwrap();
            b.fill(&row(i)).unwrap();
        }
        assert!(a.content_eq(&mut b).unwrap());
        a.fill(&row(0)).unwrap();
        b.fill(&row(1)).unwrap();
        assert!(!a.content_eq(&mut b).unwrap());
    }

    #[test]
    fn rename_before_first_flush_only() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut p = packer(&archive, 0);
        p.set_column_name(2, "text").unwrap();
        assert_eq!(p.column_number("text"), Some(2));
        assert_eq!(p.original_column_name(2), Some("text"));
        p.fill(&row(0)).unwrap();
        assert!(matches!(
            p.set_column_name(2, "again").unwrap_err(),
            PackError::Configuration(_)
        ));
    }
}
