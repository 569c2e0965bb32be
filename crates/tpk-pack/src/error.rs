use thiserror::Error;
use tpk_archive::ArchiveError;
use tpk_types::{BlobId, TypeError};

/// Coarse classification of a [`PackError`].
///
/// Rejected fills are not errors at all: `fill` reports them as `Ok(false)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad schema or configuration at construction time.
    Configuration,
    /// Row, column, or occurrence index out of bounds.
    Range,
    /// Requested columns or stored type tags do not match.
    SchemaMismatch,
    /// Archive I/O failed or stored bytes are damaged.
    Stream,
}

#[derive(Debug, Error)]
pub enum PackError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("row {row} out of range: collection has {n_rows} rows")]
    RowOutOfRange { row: u64, n_rows: u64 },

    #[error("column {column} out of range: collection has {n_columns} columns")]
    ColumnOutOfRange { column: usize, n_columns: usize },

    #[error("occurrence {index} out of range: {count} stored collections match")]
    OccurrenceOutOfRange { index: usize, count: usize },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("corrupt record in blob {blob}: {reason}")]
    Corrupt { blob: BlobId, reason: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("compression failed: {0}")]
    Compression(String),

    #[error("decompression failed: {0}")]
    Decompression(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PackError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::RowOutOfRange { .. }
            | Self::ColumnOutOfRange { .. }
            | Self::OccurrenceOutOfRange { .. } => ErrorCategory::Range,
            Self::SchemaMismatch(_) => ErrorCategory::SchemaMismatch,
            Self::Archive(_)
            | Self::Corrupt { .. }
            | Self::Decode(_)
            | Self::Compression(_)
            | Self::Decompression(_)
            | Self::Serialization(_) => ErrorCategory::Stream,
        }
    }
}

impl From<TypeError> for PackError {
    fn from(e: TypeError) -> Self {
        if let TypeError::ColumnOutOfRange { column, n_columns } = e {
            Self::ColumnOutOfRange { column, n_columns }
        } else if e.is_schema_definition() {
            Self::Configuration(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::SchemaMismatch(e.to_string())
        }
    }
}

pub type PackResult<T> = Result<T, PackError>;
