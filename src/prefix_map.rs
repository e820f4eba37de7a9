use std::ops::Range;

use crate::config::{prefix_mask, HashCode};

/// One hash table: point ids sorted by their code in one repetition.
///
/// Points sharing a prefix form a contiguous range, so probing with a
/// shorter prefix only widens the range found for a longer one.
#[derive(Debug, Clone, Default)]
pub struct PrefixMap {
    hashes: Vec<HashCode>,
    indices: Vec<u32>,
}

impl PrefixMap {
    /// Build from `(code, point id)` pairs in any order.
    pub fn build(mut entries: Vec<(HashCode, u32)>) -> Self {
        entries.sort_unstable();
        let (hashes, indices) = entries.into_iter().unzip();
        Self { hashes, indices }
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Positions of the entries sharing the top `prefix` bits with `code`.
    pub fn range(&self, code: HashCode, prefix: usize) -> Range<usize> {
        let mask = prefix_mask(prefix);
        let key = code & mask;
        let lo = self.hashes.partition_point(|&h| h & mask < key);
        let hi = lo + self.hashes[lo..].partition_point(|&h| h & mask == key);
        lo..hi
    }

    pub fn indices(&self, range: Range<usize>) -> &[u32] {
        &self.indices[range]
    }

    /// Consecutive ranges of entries with equal masked codes.
    pub fn buckets(&self, prefix: usize) -> Vec<Range<usize>> {
        let mask = prefix_mask(prefix);
        let mut buckets = Vec::new();
        let mut start = 0;
        while start < self.hashes.len() {
            let key = self.hashes[start] & mask;
            let end = start + self.hashes[start..].partition_point(|&h| h & mask == key);
            buckets.push(start..end);
            start = end;
        }
        buckets
    }

    pub fn memory_usage(&self) -> usize {
        self.hashes.len() * std::mem::size_of::<HashCode>()
            + self.indices.len() * std::mem::size_of::<u32>()
    }

    /// Bytes one table costs for `num_points` points.
    pub fn expected_memory(num_points: usize) -> usize {
        num_points * (std::mem::size_of::<HashCode>() + std::mem::size_of::<u32>())
    }
}
