use tpk_archive::Archive;
use tpk_types::{wire, BlobId};
use tracing::{debug, trace};

use crate::config::Compression;
use crate::error::{PackError, PackResult};
use crate::index::IndexTable;
use crate::record::buffer_tag;

/// Summary of one buffer written to the archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushedBuffer {
    pub blob_id: BlobId,
    pub first_row: u64,
    pub rows: u64,
    /// Bytes of serialized items before compression.
    pub raw_bytes: usize,
}

/// Accumulates serialized items (whole rows, or single values of one
/// column) until the owner decides to flush.
///
/// Item `k` occupies `data[offsets[k]..offsets[k + 1]]`, the last one runs to
/// the end of `data`.
#[derive(Debug)]
pub struct FillBuffer {
    column: u32,
    first_row: u64,
    offsets: Vec<usize>,
    data: Vec<u8>,
    threshold: usize,
}

impl FillBuffer {
    pub fn new(column: u32, threshold: usize) -> Self {
        Self::resume(column, threshold, 0)
    }

    /// An empty buffer whose next item is row `first_row`.
    pub fn resume(column: u32, threshold: usize, first_row: u64) -> Self {
        Self {
            column,
            first_row,
            offsets: Vec::new(),
            data: Vec::new(),
            threshold,
        }
    }

    /// Serialize one item with `encode`. If `encode` fails the buffer is left
    /// exactly as it was.
    pub fn append<F>(&mut self, encode: F) -> PackResult<()>
    where
        F: FnOnce(&mut Vec<u8>) -> PackResult<()>,
    {
        let start = self.data.len();
        if let Err(e) = encode(&mut self.data) {
            self.data.truncate(start);
            return Err(e);
        }
        self.offsets.push(start);
        Ok(())
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn first_row(&self) -> u64 {
        self.first_row
    }

    /// Row number the next appended item will get.
    pub fn end_row(&self) -> u64 {
        self.first_row + self.offsets.len() as u64
    }

    /// Serialized bytes held.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: usize) {
        self.threshold = threshold;
    }

    pub fn exceeds_threshold(&self) -> bool {
        self.data.len() > self.threshold
    }

    /// Serialized bytes of `row`, if it is still held here.
    pub fn item(&self, row: u64) -> Option<&[u8]> {
        if row < self.first_row || row >= self.end_row() {
            return None;
        }
        item_at(&self.offsets, &self.data, (row - self.first_row) as usize)
    }

    /// Write the held items as one buffer record and start over at the next
    /// row. An empty buffer writes nothing.
    pub fn flush(
        &mut self,
        archive: &dyn Archive,
        compression: Compression,
    ) -> PackResult<Option<FlushedBuffer>> {
        if self.is_empty() {
            return Ok(None);
        }
        let bytes = encode_buffer(
            self.column,
            self.first_row,
            &self.offsets,
            &self.data,
            compression,
        )?;
        let blob_id = archive.append(&bytes)?;
        let flushed = FlushedBuffer {
            blob_id,
            first_row: self.first_row,
            rows: self.offsets.len() as u64,
            raw_bytes: self.data.len(),
        };
        debug!(
            column = self.column,
            first_row = flushed.first_row,
            rows = flushed.rows,
            raw = flushed.raw_bytes,
            stored = bytes.len(),
            blob = %blob_id,
            "flushed buffer"
        );
        self.first_row += flushed.rows;
        self.offsets.clear();
        self.data.clear();
        Ok(Some(flushed))
    }
}

/// A flushed buffer loaded back from the archive.
#[derive(Debug)]
pub struct ReadBuffer {
    blob_id: BlobId,
    column: u32,
    first_row: u64,
    offsets: Vec<usize>,
    data: Vec<u8>,
}

impl ReadBuffer {
    /// Load and verify blob `blob_id`, which the index says holds column
    /// `column` starting at `first_row`.
    pub fn load(
        archive: &dyn Archive,
        blob_id: BlobId,
        column: u32,
        first_row: u64,
    ) -> PackResult<Self> {
        let bytes = archive.read(blob_id)?;
        let buffer = decode_buffer(blob_id, &bytes)?;
        if buffer.column != column || buffer.first_row != first_row {
            return Err(PackError::Corrupt {
                blob: blob_id,
                reason: format!(
                    "buffer holds column {} from row {}, index expects column {column} \
                     from row {first_row}",
                    buffer.column, buffer.first_row
                ),
            });
        }
        trace!(blob = %blob_id, column, first_row, rows = buffer.offsets.len(), "loaded buffer");
        Ok(buffer)
    }

    pub fn blob_id(&self) -> BlobId {
        self.blob_id
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    pub fn first_row(&self) -> u64 {
        self.first_row
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn contains(&self, row: u64) -> bool {
        row >= self.first_row && row < self.first_row + self.offsets.len() as u64
    }

    pub fn item(&self, row: u64) -> Option<&[u8]> {
        if !self.contains(row) {
            return None;
        }
        item_at(&self.offsets, &self.data, (row - self.first_row) as usize)
    }
}

/// Holds at most one loaded buffer per fill stream.
#[derive(Debug, Default)]
pub struct ReadCache {
    buffer: Option<ReadBuffer>,
}

impl ReadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialized bytes of a flushed `row`, loading its buffer on a miss.
    pub fn item(
        &mut self,
        archive: &dyn Archive,
        index: &IndexTable,
        column: u32,
        row: u64,
    ) -> PackResult<&[u8]> {
        let hit = matches!(&self.buffer, Some(b) if b.contains(row));
        if !hit {
            let entry = index.lookup(row).ok_or(PackError::RowOutOfRange {
                row,
                n_rows: index.flushed_rows(),
            })?;
            self.buffer = Some(ReadBuffer::load(
                archive,
                entry.blob_id,
                column,
                entry.first_row,
            )?);
        }
        match &self.buffer {
            Some(buffer) => buffer.item(row).ok_or_else(|| PackError::Corrupt {
                blob: buffer.blob_id,
                reason: format!("row {row} missing from buffer"),
            }),
            None => Err(PackError::RowOutOfRange {
                row,
                n_rows: index.flushed_rows(),
            }),
        }
    }

    /// Blob currently held, if any.
    pub fn loaded(&self) -> Option<BlobId> {
        self.buffer.as_ref().map(ReadBuffer::blob_id)
    }

    pub fn invalidate(&mut self) {
        self.buffer = None;
    }
}

/// Serialized bytes of `row` from whichever side holds it: the unflushed
/// fill buffer or a flushed buffer through the cache.
pub(crate) fn read_item<'a>(
    fill: &'a FillBuffer,
    cache: &'a mut ReadCache,
    archive: &dyn Archive,
    index: &IndexTable,
    row: u64,
) -> PackResult<&'a [u8]> {
    if let Some(item) = fill.item(row) {
        return Ok(item);
    }
    cache.item(archive, index, fill.column(), row)
}

fn item_at<'a>(offsets: &[usize], data: &'a [u8], k: usize) -> Option<&'a [u8]> {
    let start = *offsets.get(k)?;
    let end = offsets.get(k + 1).copied().unwrap_or(data.len());
    data.get(start..end)
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------
//
// [buffer tag][column: u32 LE][first_row: varint][count: varint]
// [item length: varint] * count
// [compression: u8][raw length: varint][stored length: varint]
// [crc32 of stored payload: u32 LE][stored payload]

fn encode_buffer(
    column: u32,
    first_row: u64,
    offsets: &[usize],
    data: &[u8],
    compression: Compression,
) -> PackResult<Vec<u8>> {
    let stored = compression.compress(data)?;
    let mut buf = Vec::with_capacity(stored.len() + offsets.len() * 2 + 64);
    buffer_tag().write_to(&mut buf);
    buf.extend_from_slice(&column.to_le_bytes());
    wire::encode_varint(&mut buf, first_row);
    wire::encode_varint(&mut buf, offsets.len() as u64);
    for k in 0..offsets.len() {
        let end = offsets.get(k + 1).copied().unwrap_or(data.len());
        wire::encode_varint(&mut buf, (end - offsets[k]) as u64);
    }
    buf.push(compression.code());
    wire::encode_varint(&mut buf, data.len() as u64);
    wire::encode_varint(&mut buf, stored.len() as u64);
    buf.extend_from_slice(&crc32fast::hash(&stored).to_le_bytes());
    buf.extend_from_slice(&stored);
    Ok(buf)
}

fn decode_buffer(blob_id: BlobId, bytes: &[u8]) -> PackResult<ReadBuffer> {
    let corrupt = |reason: String| PackError::Corrupt {
        blob: blob_id,
        reason,
    };
    let mut input = bytes;
    buffer_tag().expect_from(&mut input)?;
    let column = u32::from_le_bytes(wire::take_array::<4>(&mut input)?);
    let first_row = wire::decode_varint(&mut input)?;
    let count = wire::decode_varint(&mut input)?;
    // Every length takes at least one byte.
    if count > input.len() as u64 {
        return Err(corrupt(format!("item count {count} exceeds record size")));
    }
    let mut offsets = Vec::with_capacity(count as usize);
    let mut total = 0u64;
    for _ in 0..count {
        offsets.push(total as usize);
        total = total
            .checked_add(wire::decode_varint(&mut input)?)
            .ok_or_else(|| corrupt("item lengths overflow".into()))?;
    }
    let code = wire::take_array::<1>(&mut input)?[0];
    let raw_len = wire::decode_varint(&mut input)?;
    let stored_len = wire::decode_varint(&mut input)?;
    let expected_crc = u32::from_le_bytes(wire::take_array::<4>(&mut input)?);
    if stored_len != input.len() as u64 {
        return Err(corrupt(format!(
            "payload is {} bytes, header says {stored_len}",
            input.len()
        )));
    }
    let actual_crc = crc32fast::hash(input);
    if actual_crc != expected_crc {
        return Err(corrupt(format!(
            "payload crc {actual_crc:08x}, expected {expected_crc:08x}"
        )));
    }
    let data = Compression::decompress(code, input)?;
    if data.len() as u64 != raw_len || total != raw_len {
        return Err(corrupt(format!(
            "payload holds {} bytes, items need {total}, header says {raw_len}",
            data.len()
        )));
    }
    Ok(ReadBuffer {
        blob_id,
        column,
        first_row,
        offsets,
        data,
    })
}

#[cfg(test)]
mod tests {
    use tpk_archive::InMemoryArchive;

    use super::*;

    fn push(fill: &mut FillBuffer, bytes: &[u8]) {
        fill.append(|buf| {
            buf.extend_from_slice(bytes);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn fill_tracks_items() {
        let mut fill = FillBuffer::new(0, 100);
        push(&mut fill, b"ab");
        push(&mut fill, b"");
        push(&mut fill, b"cde");
        assert_eq!(fill.len(), 3);
        assert_eq!(fill.size(), 5);
        assert_eq!(fill.item(0), Some(&b"ab"[..]));
        assert_eq!(fill.item(1), Some(&b""[..]));
        assert_eq!(fill.item(2), Some(&b"cde"[..]));
        assert_eq!(fill.item(3), None);
    }

    #[test]
    fn failed_append_leaves_buffer_untouched() {
        let mut fill = FillBuffer::new(0, 100);
        push(&mut fill, b"ab");
        let err = fill
            .append(|buf| {
                buf.extend_from_slice(b"junk");
                Err(PackError::SchemaMismatch("nope".into()))
            })
            .unwrap_err();
        assert!(matches!(err, PackError::SchemaMismatch(_)));
        assert_eq!(fill.len(), 1);
        assert_eq!(fill.size(), 2);
    }

    #[test]
    fn threshold_is_strictly_exceeded() {
        let mut fill = FillBuffer::new(0, 4);
        push(&mut fill, b"abcd");
        assert!(!fill.exceeds_threshold());
        push(&mut fill, b"e");
        assert!(fill.exceeds_threshold());

        let mut zero = FillBuffer::new(0, 0);
        assert!(!zero.exceeds_threshold());
        push(&mut zero, b"x");
        assert!(zero.exceeds_threshold());
    }

    #[test]
    fn empty_flush_writes_nothing() {
        let archive = InMemoryArchive::new();
        let mut fill = FillBuffer::new(0, 0);
        assert!(fill.flush(&archive, Compression::None).unwrap().is_none());
        assert_eq!(archive.blob_count(), 0);
    }

    #[test]
    fn flush_then_load() {
        let archive = InMemoryArchive::new();
        let mut fill = FillBuffer::resume(3, 0, 10);
        push(&mut fill, b"one");
        push(&mut fill, b"two!");
        let flushed = fill
            .flush(&archive, Compression::Zstd { level: 3 })
            .unwrap()
            .unwrap();
        assert_eq!(flushed.first_row, 10);
        assert_eq!(flushed.rows, 2);
        assert_eq!(fill.first_row(), 12);
        assert!(fill.is_empty());

        let loaded = ReadBuffer::load(&archive, flushed.blob_id, 3, 10).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.item(10), Some(&b"one"[..]));
        assert_eq!(loaded.item(11), Some(&b"two!"[..]));
        assert_eq!(loaded.item(12), None);
    }

    #[test]
    fn load_rejects_wrong_position() {
        let archive = InMemoryArchive::new();
        let mut fill = FillBuffer::new(1, 0);
        push(&mut fill, b"x");
        let flushed = fill.flush(&archive, Compression::None).unwrap().unwrap();
        assert!(ReadBuffer::load(&archive, flushed.blob_id, 2, 0).is_err());
        assert!(ReadBuffer::load(&archive, flushed.blob_id, 1, 5).is_err());
    }

    #[test]
    fn load_detects_payload_damage() {
        let archive = InMemoryArchive::new();
        let mut fill = FillBuffer::new(0, 0);
        push(&mut fill, b"payload bytes");
        let flushed = fill.flush(&archive, Compression::None).unwrap().unwrap();

        let mut bytes = archive.read(flushed.blob_id).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        let damaged = archive.append(&bytes).unwrap();
        let err = ReadBuffer::load(&archive, damaged, 0, 0).unwrap_err();
        assert!(matches!(err, PackError::Corrupt { .. }));
    }

    #[test]
    fn cache_loads_on_miss_only() {
        let archive = InMemoryArchive::new();
        let mut fill = FillBuffer::new(0, 2);
        let mut index = IndexTable::new();
        for row in 0..6u8 {
            push(&mut fill, &[row, row]);
            if fill.exceeds_threshold() {
                let f = fill.flush(&archive, Compression::None).unwrap().unwrap();
                index.append(f.first_row, f.blob_id, f.rows).unwrap();
            }
        }
        assert_eq!(index.len(), 3);

        let mut cache = ReadCache::new();
        assert_eq!(cache.item(&archive, &index, 0, 3).unwrap(), &[3, 3]);
        let held = cache.loaded();
        assert_eq!(cache.item(&archive, &index, 0, 2).unwrap(), &[2, 2]);
        assert_eq!(cache.loaded(), held);
        assert_eq!(cache.item(&archive, &index, 0, 0).unwrap(), &[0, 0]);
        assert_ne!(cache.loaded(), held);

        cache.invalidate();
        assert_eq!(cache.loaded(), None);
        assert!(cache.item(&archive, &index, 0, 6).is_err());
    }

    #[test]
    fn read_item_prefers_fill_buffer() {
        let archive = InMemoryArchive::new();
        let mut fill = FillBuffer::new(0, 0);
        let mut index = IndexTable::new();
        push(&mut fill, b"flushed");
        let f = fill.flush(&archive, Compression::None).unwrap().unwrap();
        index.append(f.first_row, f.blob_id, f.rows).unwrap();
        push(&mut fill, b"pending");

        let mut cache = ReadCache::new();
        assert_eq!(
            read_item(&fill, &mut cache, &archive, &index, 1).unwrap(),
            b"pending"
        );
        assert_eq!(cache.loaded(), None);
        assert_eq!(
            read_item(&fill, &mut cache, &archive, &index, 0).unwrap(),
            b"flushed"
        );
    }
}
