use std::collections::BTreeMap;

use tpk_types::BlobId;

/// `(name, category)` labels attached to blobs.
///
/// Shared by every archive backend; the backend decides where the labels
/// are persisted.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    labels: BTreeMap<(String, String), Vec<BlobId>>,
    count: usize,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a label. Ids under one label stay sorted and unique.
    pub fn insert(&mut self, id: BlobId, name: &str, category: &str) {
        let ids = self
            .labels
            .entry((name.to_string(), category.to_string()))
            .or_default();
        if let Err(pos) = ids.binary_search(&id) {
            ids.insert(pos, id);
            self.count += 1;
        }
    }

    /// Ids labelled with exactly `(name, category)`, ascending.
    pub fn find(&self, name: &str, category: &str) -> Vec<BlobId> {
        self.labels
            .get(&(name.to_string(), category.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of labels recorded.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_is_exact_match() {
        let mut catalog = Catalog::new();
        catalog.insert(BlobId::new(3), "ntuple", "run1");
        catalog.insert(BlobId::new(5), "ntuple", "run2");
        catalog.insert(BlobId::new(4), "ntuple2", "run1");

        assert_eq!(catalog.find("ntuple", "run1"), vec![BlobId::new(3)]);
        assert_eq!(catalog.find("ntuple", "run2"), vec![BlobId::new(5)]);
        assert!(catalog.find("ntuple", "run3").is_empty());
    }

    #[test]
    fn ids_sorted_and_deduplicated() {
        let mut catalog = Catalog::new();
        catalog.insert(BlobId::new(9), "a", "b");
        catalog.insert(BlobId::new(2), "a", "b");
        catalog.insert(BlobId::new(9), "a", "b");
        assert_eq!(catalog.find("a", "b"), vec![BlobId::new(2), BlobId::new(9)]);
        assert_eq!(catalog.len(), 2);
    }
}
