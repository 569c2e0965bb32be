use tpk_types::BlobId;

/// Errors from archive operations.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The requested blob does not exist.
    #[error("blob not found: {0}")]
    NotFound(BlobId),

    /// The archive refuses appends and tags.
    #[error("archive is read-only")]
    ReadOnly,

    /// I/O error from the underlying medium.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored entry failed framing or checksum validation.
    #[error("corrupt archive entry at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// An earlier write failed part way; the file must be reopened.
    #[error("archive writer failed earlier, reopen the archive to continue")]
    WriterFailed,

    #[error("invalid archive magic: expected {expected}, got {actual}")]
    InvalidMagic { expected: String, actual: String },

    #[error("unsupported archive version: {0}")]
    UnsupportedVersion(u32),
}

/// Result alias for archive operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;
