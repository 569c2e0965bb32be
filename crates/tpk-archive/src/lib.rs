//! Append-only blob archives for tuplepack.
//!
//! An archive hands out strictly increasing [`BlobId`]s for opaque byte
//! blobs, serves them back by id, and keeps a catalog of `(name, category)`
//! labels so that higher layers can find their records again. The archive
//! never looks inside a blob.
//!
//! # Backends
//!
//! All backends implement the [`Archive`] trait:
//!
//! - [`InMemoryArchive`] -- `Vec`-backed archive for tests and embedding
//! - [`FileArchive`] -- single-file append log, memory-mapped when read-only
//!
//! [`BlobId`]: tpk_types::BlobId

pub mod catalog;
pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use catalog::Catalog;
pub use error::{ArchiveError, ArchiveResult};
pub use file::FileArchive;
pub use memory::InMemoryArchive;
pub use traits::Archive;
