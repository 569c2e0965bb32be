//! Foundation types for tuplepack.
//!
//! Every other tuplepack crate depends on `tpk-types`. It owns the pieces of
//! the format that are independent of any storage medium: how a record
//! announces its type, how column values are laid out as bytes, and what a
//! schema is.
//!
//! # Key Types
//!
//! - [`TypeTag`] -- `(name, version)` marker preceding every serialized aggregate
//! - [`BlobId`] -- archive-assigned, monotonically increasing blob identifier
//! - [`ColumnType`] / [`Value`] -- supported column types and cell values
//! - [`Schema`] / [`Field`] -- ordered, duplicate-free column descriptors

pub mod blob;
pub mod error;
pub mod schema;
pub mod tag;
pub mod value;
pub mod wire;

pub use blob::BlobId;
pub use error::TypeError;
pub use schema::{Field, Schema};
pub use tag::TypeTag;
pub use value::{ColumnType, Row, Value};
