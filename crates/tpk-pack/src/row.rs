use std::sync::Arc;

use tpk_archive::Archive;
use tpk_types::{BlobId, ColumnType, Row, Schema, TypeTag, Value};
use tracing::{debug, error};

use crate::buffer::{read_item, FillBuffer, ReadCache};
use crate::config::PackerConfig;
use crate::error::{PackError, PackResult};
use crate::index::IndexTable;
use crate::projection::ColumnRequest;
use crate::record::{load_records, HeaderRef, ROW_PACKER};
use crate::reference::Restore;
use crate::state::{rows_content_eq, PackerState};

/// Persistent collection of rows stored row by row.
///
/// Whole rows are serialized into one fill buffer; when the buffer grows past
/// the configured size it is written to the archive as a single blob and
/// indexed by its first row. Reading a row loads (and caches) the one blob
/// that holds it. Rows not yet flushed are served from the fill buffer.
///
/// The collection is finalized by [`write`](Self::write), or implicitly when
/// the packer is dropped.
pub struct RowPacker {
    state: PackerState,
    schema: Schema,
    fill: FillBuffer,
    cache: ReadCache,
    index: IndexTable,
}

impl RowPacker {
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
        let fill = FillBuffer::new(0, state.config.buffer_size);
        debug!(
            name,
            category,
            columns = schema.len(),
            buffer_size = state.config.buffer_size,
            object = state.object_number,
            "row packer created"
        );
        Ok(Self {
            state,
            schema,
            fill,
            cache: ReadCache::new(),
            index: IndexTable::new(),
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

    /// Append one row.
    ///
    /// Returns `Ok(false)`, with nothing changed, once the collection has been
    /// written or when the archive is read-only. A row that does not match
    /// the schema is a [`PackError::SchemaMismatch`].
    pub fn fill(&mut self, row: &[Value]) -> PackResult<bool> {
        if !self.state.accepts_fill() {
            return Ok(false);
        }
        self.schema.check_row(row)?;
        let fields = self.schema.fields();
        self.fill.append(|buf| {
            for (field, value) in fields.iter().zip(row) {
                field.ty.encode(value, buf)?;
            }
            Ok(())
        })?;
        self.state.n_rows += 1;
        if self.fill.exceeds_threshold() {
            self.state.flush(&self.schema, &mut self.fill, &mut self.index)?;
        }
        Ok(true)
    }

    /// Flush pending rows and write the footer. Calling it again does
    /// nothing. Returns `Ok(false)` if the archive is read-only and the
    /// collection was never written.
    pub fn write(&mut self) -> PackResult<bool> {
        if self.state.finalized {
            return Ok(true);
        }
        if !self.state.can_write() {
            return Ok(false);
        }
        self.state.flush(&self.schema, &mut self.fill, &mut self.index)?;
        self.state.finish(&self.schema, vec![self.index.clone()])?;
        Ok(true)
    }

    /// Decode row `row` into `out`, replacing its contents.
    pub fn row_contents(&mut self, row: u64, out: &mut Row) -> PackResult<()> {
        self.state.check_row(row)?;
        let bytes = read_item(
            &self.fill,
            &mut self.cache,
            self.state.archive.as_ref(),
            &self.index,
            row,
        )?;
        let mut input = bytes;
        out.clear();
        for field in self.schema.fields() {
            out.push(field.ty.decode(&mut input)?);
        }
        if !input.is_empty() {
            return Err(PackError::Decode(format!(
                "{} trailing bytes after row {row}",
                input.len()
            )));
        }
        Ok(())
    }

    pub fn row(&mut self, row: u64) -> PackResult<Row> {
        let mut out = Row::with_capacity(self.schema.len());
        self.row_contents(row, &mut out)?;
        Ok(out)
    }

    /// One cell, decoded from its row.
    pub fn value(&mut self, row: u64, column: usize) -> PackResult<Value> {
        let n_columns = self.schema.len();
        if column >= n_columns {
            return Err(PackError::ColumnOutOfRange { column, n_columns });
        }
        let mut out = self.row(row)?;
        Ok(out.swap_remove(column))
    }

    /// Same column names, same row count, and cells equal by content.
    /// Column types may differ: numbers compare by value across widths.
    pub fn content_eq(&mut self, other: &mut RowPacker) -> PackResult<bool> {
        if !self.schema.names().eq(other.schema.names()) || self.n_rows() != other.n_rows() {
            return Ok(false);
        }
        let mut mine = Row::new();
        let mut theirs = Row::new();
        for row in 0..self.n_rows() {
            self.row_contents(row, &mut mine)?;
            other.row_contents(row, &mut theirs)?;
            if !rows_content_eq(&mine, &theirs) {
                return Ok(false);
            }
        }
        Ok(true)
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
    /// the first flush.
    pub fn set_column_name(&mut self, column: usize, name: &str) -> PackResult<()> {
        let n_columns = self.schema.len();
        if column >= n_columns {
            return Err(PackError::ColumnOutOfRange { column, n_columns });
        }
        self.state.check_header_pending("column names")?;
        self.schema.rename(column, name)?;
        self.cache.invalidate();
        Ok(())
    }

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

    /// Change the flush threshold for subsequent fills. The value in force
    /// at [`write`](Self::write) is stored in the footer.
    pub fn set_buffer_size(&mut self, buffer_size: usize) -> PackResult<()> {
        self.state.set_buffer_size(buffer_size, std::iter::once(&mut self.fill))
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

    pub fn index(&self) -> &IndexTable {
        &self.index
    }

    /// Rows still waiting in the fill buffer.
    pub fn pending_rows(&self) -> usize {
        self.fill.len()
    }

    pub fn clear_read_cache(&mut self) {
        self.cache.invalidate();
    }
}

impl Restore for RowPacker {
    fn packer_tag() -> TypeTag {
        TypeTag::new(ROW_PACKER, 1)
    }

    fn restore(
        archive: Arc<dyn Archive>,
        name: &str,
        category: &str,
        footer_id: BlobId,
        request: &ColumnRequest,
    ) -> PackResult<Self> {
        if *request != ColumnRequest::All {
            return Err(PackError::SchemaMismatch(
                "row packers always read back whole rows".into(),
            ));
        }
        let (footer, header) = load_records(archive.as_ref(), &Self::packer_tag(), footer_id)?;
        let schema = header.schema()?;
        let config = footer.config(&header);
        let index = match <[IndexTable; 1]>::try_from(footer.indexes) {
            Ok([index]) => index,
            Err(indexes) => {
                return Err(PackError::Corrupt {
                    blob: footer_id,
                    reason: format!("row packer footer holds {} index tables", indexes.len()),
                })
            }
        };
        let fill = FillBuffer::resume(0, config.buffer_size, footer.n_rows);
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
        debug!(name, category, rows = footer.n_rows, footer = %footer_id, "row packer restored");
        Ok(Self {
            state,
            schema,
            fill,
            cache: ReadCache::new(),
            index,
        })
    }
}

impl Drop for RowPacker {
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

impl std::fmt::Debug for RowPacker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowPacker")
            .field("name", &self.state.name)
            .field("category", &self.state.category)
            .field("columns", &self.schema.len())
            .field("rows", &self.state.n_rows)
            .field("buffers", &self.index.len())
            .field("finalized", &self.state.finalized)
            .finish()
    }
}
