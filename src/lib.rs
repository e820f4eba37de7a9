pub mod config;
pub mod deduplicator;
pub mod hash;
pub mod hash_source;
pub mod prefix_map;
pub mod rotation;
pub mod similarity;
pub mod sketch;

mod brute_force;
mod dataset;
mod index;
mod join;
mod math;
mod memory;
mod topk;

pub use config::{FilterType, HashCode, IndexConfig, SearchParams, MAX_HASHBITS};
pub use dataset::Dataset;
pub use deduplicator::Deduplicator;
pub use hash::{
    CrossPolytopeArgs, CrossPolytopeHash, HashFamily, HashFunction, MinHash, MinHashArgs, SimHash,
    SimHashArgs,
};
pub use hash_source::{HashSource, HashSourceArgs, HashSourceKind};
pub use index::{Index, IndexState};
pub use memory::MemoryPlan;
pub use rotation::TransformKind;
pub use similarity::{Cosine, Description, Jaccard, SimilarityMeasure};
pub use sketch::Sketch;
pub use topk::{PairResult, SearchResult, TopK};

#[cfg(test)]
mod tests;

/// Cosine index with cross-polytope hashing.
pub type CosineIndex = Index<Cosine, CrossPolytopeHash>;

/// Jaccard index with MinHash.
pub type JaccardIndex = Index<Jaccard, MinHash>;

/// Errors that can occur when configuring, building or querying an index.
#[derive(thiserror::Error, Debug)]
pub enum LshError {
    /// Returned when a point or query does not match the index description.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// Returned when an invalid configuration is supplied.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// Returned when the memory budget cannot hold even one table.
    #[error("insufficient memory: need at least {required} bytes, budget is {available}")]
    InsufficientMemory { required: usize, available: usize },
    /// Returned when searching or joining before the first rebuild.
    #[error("index has not been built; call `rebuild` first")]
    NotBuilt,
    /// Returned when the worker pool cannot be created.
    #[error("failed to create thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
