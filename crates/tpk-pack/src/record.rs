//! Records a packer stores next to its buffers.
//!
//! Every header and footer blob starts with the packer's type tag, then the
//! record's own tag, then a bincode body. Buffers carry only their record
//! tag (see `buffer.rs`); they are reached through a footer, never by label.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tpk_archive::Archive;
use tpk_types::{BlobId, ColumnType, Field, Schema, TypeTag};
use tracing::trace;

use crate::config::{Compression, PackerConfig};
use crate::error::{PackError, PackResult};
use crate::index::IndexTable;

pub const ROW_PACKER: &str = "tpk::RowPacker";
pub const COLUMN_PACKER: &str = "tpk::ColumnPacker";

pub(crate) fn header_tag() -> TypeTag {
    TypeTag::new("tpk::HeaderRecord", 1)
}

pub(crate) fn footer_tag() -> TypeTag {
    TypeTag::new("tpk::FooterRecord", 1)
}

pub(crate) fn buffer_tag() -> TypeTag {
    TypeTag::new("tpk::BufferRecord", 1)
}

/// Stored name and type tag of one column.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub tag: TypeTag,
}

/// Static description of a collection, written once before its first
/// buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRecord {
    pub title: String,
    pub buffer_size: u64,
    pub compression: Compression,
    pub columns: Vec<ColumnSpec>,
}

impl HeaderRecord {
    pub fn new(schema: &Schema, title: &str, config: &PackerConfig) -> Self {
        Self {
            title: title.to_string(),
            buffer_size: config.buffer_size as u64,
            compression: config.compression,
            columns: schema
                .fields()
                .iter()
                .map(|f| ColumnSpec {
                    name: f.name.clone(),
                    tag: f.ty.tag(),
                })
                .collect(),
        }
    }

    /// Rebuild the stored schema. Unknown or too-new column tags are a
    /// schema mismatch.
    pub fn schema(&self) -> PackResult<Schema> {
        let fields = self
            .columns
            .iter()
            .map(|c| Ok(Field::new(c.name.clone(), ColumnType::from_tag(&c.tag)?)))
            .collect::<PackResult<Vec<_>>>()?;
        Schema::new(fields).map_err(|e| PackError::SchemaMismatch(e.to_string()))
    }

    /// The buffering settings the collection was written with.
    pub fn config(&self) -> PackerConfig {
        PackerConfig {
            buffer_size: usize::try_from(self.buffer_size).unwrap_or(usize::MAX),
            compression: self.compression,
        }
    }
}

/// Closing record of a collection. The only blob that carries the
/// collection's `(name, category)` label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FooterRecord {
    pub header: BlobId,
    pub header_digest: [u8; 32],
    pub n_rows: u64,
    /// Flush threshold in force when the collection was written. Differs
    /// from the header's when it was changed after the first flush.
    pub buffer_size: u64,
    /// One table for a row packer, one per stored column for a column packer.
    pub indexes: Vec<IndexTable>,
}

impl FooterRecord {
    /// Settings of the finished collection: the header's compression with
    /// the final flush threshold.
    pub fn config(&self, header: &HeaderRecord) -> PackerConfig {
        PackerConfig {
            buffer_size: usize::try_from(self.buffer_size).unwrap_or(usize::MAX),
            ..header.config()
        }
    }
}

/// Where a persisted header lives and what it hashed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeaderRef {
    pub blob_id: BlobId,
    pub digest: [u8; 32],
}

pub(crate) fn encode_record<T: Serialize>(
    packer: &TypeTag,
    record: &TypeTag,
    body: &T,
) -> PackResult<Vec<u8>> {
    let mut buf = Vec::new();
    packer.write_to(&mut buf);
    record.write_to(&mut buf);
    bincode::serialize_into(&mut buf, body)
        .map_err(|e| PackError::Serialization(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn decode_record<T: DeserializeOwned>(
    blob: BlobId,
    bytes: &[u8],
    packer: &TypeTag,
    record: &TypeTag,
) -> PackResult<T> {
    let mut input = bytes;
    packer.expect_from(&mut input)?;
    record.expect_from(&mut input)?;
    bincode::deserialize(input).map_err(|e| PackError::Corrupt {
        blob,
        reason: e.to_string(),
    })
}

/// Read just the leading packer tag of a stored record.
pub(crate) fn peek_packer_tag(bytes: &[u8]) -> PackResult<TypeTag> {
    let mut input = bytes;
    Ok(TypeTag::read_from(&mut input)?)
}

/// Append the header record and return where it went.
pub(crate) fn save_header(
    archive: &dyn Archive,
    packer: &TypeTag,
    header: &HeaderRecord,
) -> PackResult<HeaderRef> {
    let bytes = encode_record(packer, &header_tag(), header)?;
    let blob_id = archive.append(&bytes)?;
    trace!(blob = %blob_id, columns = header.columns.len(), "saved header");
    Ok(HeaderRef {
        blob_id,
        digest: *blake3::hash(&bytes).as_bytes(),
    })
}

/// Append the footer record and label it.
pub(crate) fn save_footer(
    archive: &dyn Archive,
    packer: &TypeTag,
    footer: &FooterRecord,
    name: &str,
    category: &str,
) -> PackResult<BlobId> {
    let bytes = encode_record(packer, &footer_tag(), footer)?;
    let blob_id = archive.append(&bytes)?;
    archive.tag(blob_id, name, category)?;
    Ok(blob_id)
}

/// Load a footer and the header it points to, checking the header digest
/// and every index table against the footer's row count.
pub(crate) fn load_records(
    archive: &dyn Archive,
    packer: &TypeTag,
    footer_id: BlobId,
) -> PackResult<(FooterRecord, HeaderRecord)> {
    let footer_bytes = archive.read(footer_id)?;
    let footer: FooterRecord = decode_record(footer_id, &footer_bytes, packer, &footer_tag())?;

    let header_bytes = archive.read(footer.header)?;
    let digest = blake3::hash(&header_bytes);
    if digest.as_bytes() != &footer.header_digest {
        return Err(PackError::Corrupt {
            blob: footer.header,
            reason: format!(
                "header digest {} does not match footer {}",
                hex::encode(&digest.as_bytes()[..8]),
                hex::encode(&footer.header_digest[..8])
            ),
        });
    }
    let header: HeaderRecord = decode_record(footer.header, &header_bytes, packer, &header_tag())?;

    for index in &footer.indexes {
        index.validate(footer.n_rows, footer_id)?;
    }
    Ok((footer, header))
}
