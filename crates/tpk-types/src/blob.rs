use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier the archive assigns to an appended blob.
///
/// Ids are handed out in strictly increasing order within one archive, so
/// comparing two ids tells which blob was appended first.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobId(u64);

impl BlobId {
    /// Wrap a raw archive id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw numeric id.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// The id that follows this one.
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobId({})", self.0)
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for BlobId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<BlobId> for u64 {
    fn from(id: BlobId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_follows_raw_value() {
        assert!(BlobId::new(1) < BlobId::new(2));
        assert_eq!(BlobId::new(7).next(), BlobId::new(8));
    }

    #[test]
    fn display_and_debug() {
        let id = BlobId::new(42);
        assert_eq!(format!("{id}"), "#42");
        assert_eq!(format!("{id:?}"), "BlobId(42)");
    }

    #[test]
    fn raw_conversions() {
        let id: BlobId = 9u64.into();
        assert_eq!(u64::from(id), 9);
        assert_eq!(id.get(), 9);
    }
}
