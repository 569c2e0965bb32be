use std::ops::Range;

use serde::{Deserialize, Serialize};
use tpk_types::BlobId;

use crate::error::{PackError, PackResult};

/// One flushed buffer: the first row it holds and the blob it lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub first_row: u64,
    pub blob_id: BlobId,
}

/// Row-to-buffer lookup table for one fill stream.
///
/// Entries are sorted by `first_row`, start at row 0, and tile the flushed
/// rows without gaps: entry `i` covers `first_row[i]..first_row[i + 1]`, the
/// last one runs up to `flushed_rows()`. Rows past that still sit in the
/// owner's fill buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexTable {
    entries: Vec<IndexEntry>,
    end: u64,
}

impl IndexTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a flushed buffer holding `rows` rows starting at `first_row`.
    pub fn append(&mut self, first_row: u64, blob_id: BlobId, rows: u64) -> PackResult<()> {
        if rows == 0 {
            return Err(PackError::Corrupt {
                blob: blob_id,
                reason: "indexed buffer holds no rows".into(),
            });
        }
        if first_row != self.end {
            return Err(PackError::Corrupt {
                blob: blob_id,
                reason: format!(
                    "buffer starts at row {first_row}, index is contiguous up to {}",
                    self.end
                ),
            });
        }
        self.entries.push(IndexEntry { first_row, blob_id });
        self.end = first_row + rows;
        Ok(())
    }

    /// The buffer holding `row`, or `None` if the row was never flushed.
    pub fn lookup(&self, row: u64) -> Option<IndexEntry> {
        if row >= self.end {
            return None;
        }
        let pos = self.entries.partition_point(|e| e.first_row <= row);
        pos.checked_sub(1).map(|i| self.entries[i])
    }

    /// Rows covered by entry `i`.
    pub fn rows_of(&self, i: usize) -> Option<Range<u64>> {
        let start = self.entries.get(i)?.first_row;
        let end = self
            .entries
            .get(i + 1)
            .map_or(self.end, |next| next.first_row);
        Some(start..end)
    }

    /// Number of rows stored in flushed buffers.
    pub fn flushed_rows(&self) -> u64 {
        self.end
    }

    /// Rows covered once `pending` unflushed rows are added.
    pub fn coverage_end(&self, pending: u64) -> u64 {
        self.end + pending
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check a table read back from storage against the row count of its
    /// collection. `origin` names the blob the table came from.
    pub fn validate(&self, n_rows: u64, origin: BlobId) -> PackResult<()> {
        let corrupt = |reason: String| PackError::Corrupt {
            blob: origin,
            reason,
        };
        if let Some(first) = self.entries.first() {
            if first.first_row != 0 {
                return Err(corrupt(format!(
                    "index starts at row {}, expected 0",
                    first.first_row
                )));
            }
        }
        for pair in self.entries.windows(2) {
            if pair[1].first_row <= pair[0].first_row {
                return Err(corrupt(format!(
                    "index rows not increasing: {} then {}",
                    pair[0].first_row, pair[1].first_row
                )));
            }
        }
        if let Some(last) = self.entries.last() {
            if last.first_row >= self.end {
                return Err(corrupt(format!(
                    "last buffer starts at row {} past index end {}",
                    last.first_row, self.end
                )));
            }
        }
        if self.end != n_rows {
            return Err(corrupt(format!(
                "index covers {} rows, collection has {n_rows}",
                self.end
            )));
        }
        Ok(())
    }
}
