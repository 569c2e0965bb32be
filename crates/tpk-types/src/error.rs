use thiserror::Error;

/// Errors produced by type, schema, and wire operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("empty column name at position {0}")]
    EmptyColumnName(usize),

    #[error("schema must have at least one column")]
    EmptySchema,

    #[error("column {column} out of range for {n_columns} columns")]
    ColumnOutOfRange { column: usize, n_columns: usize },

    #[error("unknown type tag: {0}")]
    UnknownType(String),

    #[error("incompatible type tag: expected {expected}, got {actual}")]
    IncompatibleTag { expected: String, actual: String },

    #[error("value type mismatch: column expects {expected}, got {actual}")]
    ValueMismatch { expected: String, actual: String },

    #[error("truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("varint overflow")]
    VarintOverflow,

    #[error("invalid utf-8: {0}")]
    InvalidUtf8(String),
}

impl TypeError {
    /// Returns `true` if the error describes a malformed schema definition
    /// rather than malformed data.
    pub fn is_schema_definition(&self) -> bool {
        matches!(
            self,
            Self::DuplicateColumn(_) | Self::EmptyColumnName(_) | Self::EmptySchema
        )
    }

    /// Returns `true` if the error comes from decoding damaged or short input.
    pub fn is_decode(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. } | Self::VarintOverflow | Self::InvalidUtf8(_)
        )
    }
}
