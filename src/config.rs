use serde::{Deserialize, Serialize};

use crate::hash_source::HashSourceArgs;

/// A single hash code. Only the low [`MAX_HASHBITS`] bits are ever set.
pub type HashCode = u32;

/// Width of every hash code produced by the crate.
///
/// Hash sources left-align their codes in this field, so prefix comparisons
/// in the tables, the sketches and the deduplicator all agree on which bits
/// are the "top" ones.
pub const MAX_HASHBITS: usize = 24;

/// Bits of the per-point sketch kept by the index.
pub const DEFAULT_SKETCH_BITS: usize = 64;

/// Fraction of the allowed failure probability (`1 - recall`) handed to the
/// sketch filter. The rest bounds the hash-table stopping rule.
pub const SKETCH_FAILURE_SHARE: f32 = 0.5;

/// Mask selecting the top `prefix` bits of a code.
#[inline]
pub fn prefix_mask(prefix: usize) -> HashCode {
    debug_assert!(prefix <= MAX_HASHBITS);
    HashCode::MAX << (MAX_HASHBITS - prefix)
}

/// How candidates are pre-filtered before the exact similarity is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterType {
    /// Every candidate is verified exactly.
    None,
    /// Candidates whose sketch upper bound cannot beat the current k-th
    /// similarity are skipped.
    #[default]
    Sketch,
}

/// Index construction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig<A> {
    /// Budget in bytes for hash tables, deduplicator matrix, sketches and
    /// hash-function storage.
    pub memory_limit: usize,
    /// Hash source strategy together with the hash family arguments.
    pub hash_source: HashSourceArgs<A>,
    /// Bits of each repetition's code, at most [`MAX_HASHBITS`].
    pub bits_per_repetition: usize,
    /// Upper bound on the number of tables the memory planner may choose.
    pub max_tables: usize,
    /// Base seed; each rebuild derives a fresh seed from it.
    pub seed: u64,
    /// Worker threads for parallel loops. `None` uses the global rayon pool.
    pub num_threads: Option<usize>,
}

impl<A: Default> IndexConfig<A> {
    pub fn new(memory_limit: usize) -> Self {
        Self {
            memory_limit,
            hash_source: HashSourceArgs::default(),
            bits_per_repetition: MAX_HASHBITS,
            max_tables: 1024,
            seed: 0x5eed_1234_abcd_0001,
            num_threads: None,
        }
    }
}

impl<A> IndexConfig<A> {
    pub fn with_hash_source(mut self, hash_source: HashSourceArgs<A>) -> Self {
        self.hash_source = hash_source;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_bits_per_repetition(mut self, bits: usize) -> Self {
        self.bits_per_repetition = bits;
        self
    }

    pub fn with_max_tables(mut self, max_tables: usize) -> Self {
        self.max_tables = max_tables;
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }
}

/// Parameters for a recall-targeted query.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearchParams {
    pub k: usize,
    /// Target probability of returning each of the true k nearest neighbours.
    pub recall: f32,
    pub filter: FilterType,
}

impl SearchParams {
    pub fn new(k: usize, recall: f32) -> Self {
        Self {
            k,
            recall,
            filter: FilterType::default(),
        }
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// Failure budgets `(hash_target, sketch_delta)` derived from the recall.
    pub(crate) fn failure_budget(&self) -> (f32, f32) {
        failure_budget(self.recall, self.filter)
    }
}

pub(crate) fn failure_budget(recall: f32, filter: FilterType) -> (f32, f32) {
    let allowed = (1.0 - recall).max(0.0);
    match filter {
        FilterType::None => (allowed, 0.0),
        FilterType::Sketch => (
            allowed * (1.0 - SKETCH_FAILURE_SHARE),
            allowed * SKETCH_FAILURE_SHARE,
        ),
    }
}
