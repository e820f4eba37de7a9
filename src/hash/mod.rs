//! Locality-sensitive hash families.
//!
//! A [`HashFamily`] is a distribution over [`HashFunction`]s for one
//! similarity measure. Each sampled function maps a stored point to
//! `bits_per_function` bits (returned in the low bits of a [`HashCode`]).
//! Hash sources concatenate function outputs into repetition codes.

mod crosspolytope;
mod minhash;
mod simhash;

use std::fmt::Debug;

use rand::rngs::StdRng;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::HashCode;
use crate::similarity::{Description, Elem, SimilarityMeasure};
use crate::LshError;

pub use crosspolytope::{CrossPolytopeArgs, CrossPolytopeFunction, CrossPolytopeHash};
pub use minhash::{MinHash, MinHashArgs, MinHashFunction};
pub use simhash::{SimHash, SimHashArgs, SimHashFunction};

/// One sampled hash function.
pub trait HashFunction<E>: Send + Sync + Debug {
    fn hash(&self, point: &[E]) -> HashCode;
}

pub trait HashFamily: Send + Sync + Sized + Debug + 'static {
    type Measure: SimilarityMeasure;
    type Args: Debug + Clone + Default + Serialize + DeserializeOwned + Send + Sync;
    type Function: HashFunction<Elem<Self::Measure>>;

    fn new(desc: Description, args: Self::Args) -> Result<Self, LshError>;

    /// Number of bits produced by one sampled function.
    fn bits_per_function(&self) -> usize;

    fn sample(&self, rng: &mut StdRng) -> Self::Function;

    /// Probability that one sampled function maps two points of the given
    /// similarity to the same code.
    fn collision_probability(&self, similarity: f32) -> f32;

    /// Bytes of storage per sampled function.
    fn function_memory(&self) -> usize;

    /// Probability that the top `bits` bits of a concatenated code collide.
    ///
    /// A partially used function counts as a whole one, so this is a lower
    /// bound whenever `bits` is not a multiple of the function width.
    fn prefix_collision_probability(&self, similarity: f32, bits: usize) -> f32 {
        let per_function = self.bits_per_function().max(1);
        let p = self.collision_probability(similarity);
        let mut prob = p.powi((bits / per_function) as i32);
        if bits % per_function > 0 {
            prob *= p;
        }
        prob
    }
}
