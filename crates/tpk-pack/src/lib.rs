//! Persistent, schema-versioned tuple collections.
//!
//! A packer accepts rows of typed values, batches their serialized bytes in
//! memory, and writes each batch to an [`Archive`] as one blob once it grows
//! past a size threshold. A small index maps row numbers to the blob holding
//! them, so any row can be read back by loading a single blob.
//!
//! # Layouts
//!
//! - [`RowPacker`] -- whole rows share one buffer
//! - [`ColumnPacker`] -- one buffer per column, columns readable on their own
//!
//! # Stored shape
//!
//! Each collection is a header record, zero or more buffer records, and a
//! footer record carrying the index tables. Only the footer is labelled with
//! the collection's `(name, category)`; [`Reference`] finds footers by label
//! and restores read-only packers from them.
//!
//! [`Archive`]: tpk_archive::Archive

pub mod buffer;
pub mod column;
pub mod config;
pub mod error;
pub mod index;
pub mod projection;
pub mod record;
pub mod reference;
pub mod row;
mod state;

pub use buffer::{FillBuffer, FlushedBuffer, ReadBuffer, ReadCache};
pub use column::{ColumnIter, ColumnPacker};
pub use config::{Compression, PackerConfig, MAX_BUFFER_SIZE};
pub use error::{ErrorCategory, PackError, PackResult};
pub use index::{IndexEntry, IndexTable};
pub use projection::{ColumnRequest, Projection};
pub use record::{ColumnSpec, FooterRecord, HeaderRecord};
pub use reference::{Reference, Restore};
pub use row::RowPacker;
