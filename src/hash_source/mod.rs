//! Strategies for producing one code per repetition from many hash functions.

mod independent;
mod pool;
mod tensor;

use std::sync::Arc;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::config::{HashCode, MAX_HASHBITS};
use crate::hash::HashFamily;
use crate::similarity::Elem;
use crate::LshError;

pub use independent::IndependentHashSource;
pub use pool::HashPool;
pub use tensor::TensoredHashSource;

/// How hash functions are shared between repetitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HashSourceKind {
    /// Every repetition owns its functions.
    #[default]
    Independent,
    /// Repetitions draw their functions from a shared pool.
    Pooled { pool_size: usize },
    /// Repetitions combine one of `ceil(sqrt(R))` left codes with one of as
    /// many right codes.
    Tensored,
}

/// Hash source strategy together with the family arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HashSourceArgs<A> {
    pub kind: HashSourceKind,
    pub hash_args: A,
}

impl<A> HashSourceArgs<A> {
    pub fn independent(hash_args: A) -> Self {
        Self {
            kind: HashSourceKind::Independent,
            hash_args,
        }
    }

    pub fn pooled(pool_size: usize, hash_args: A) -> Self {
        Self {
            kind: HashSourceKind::Pooled { pool_size },
            hash_args,
        }
    }

    pub fn tensored(hash_args: A) -> Self {
        Self {
            kind: HashSourceKind::Tensored,
            hash_args,
        }
    }

    pub(crate) fn validate(&self, bits_per_repetition: usize) -> Result<(), LshError> {
        if bits_per_repetition == 0 || bits_per_repetition > MAX_HASHBITS {
            return Err(LshError::InvalidConfig(
                "bits per repetition must be in 1..=MAX_HASHBITS",
            ));
        }
        match self.kind {
            HashSourceKind::Pooled { pool_size: 0 } => {
                Err(LshError::InvalidConfig("pool size must be positive"))
            }
            HashSourceKind::Tensored if bits_per_repetition < 2 => Err(LshError::InvalidConfig(
                "tensoring needs at least 2 bits per repetition",
            )),
            _ => Ok(()),
        }
    }

    /// Sample a source with `num_repetitions` codes of `bits_per_repetition`
    /// bits each.
    pub fn build<F: HashFamily>(
        &self,
        family: Arc<F>,
        num_repetitions: usize,
        bits_per_repetition: usize,
        rng: &mut StdRng,
    ) -> Result<DynamicHashSource<F>, LshError> {
        self.validate(bits_per_repetition)?;
        let source = match self.kind {
            HashSourceKind::Independent => DynamicHashSource::Independent(
                IndependentHashSource::sample(family, num_repetitions, bits_per_repetition, rng),
            ),
            HashSourceKind::Pooled { pool_size } => DynamicHashSource::Pooled(HashPool::sample(
                family,
                pool_size,
                num_repetitions,
                bits_per_repetition,
                rng,
            )),
            HashSourceKind::Tensored => DynamicHashSource::Tensored(TensoredHashSource::sample(
                family,
                num_repetitions,
                bits_per_repetition,
                rng,
            )),
        };
        Ok(source)
    }

    /// Bytes of hash-function storage a built source would need.
    pub fn function_memory<F: HashFamily>(
        &self,
        family: &F,
        num_repetitions: usize,
        bits_per_repetition: usize,
    ) -> usize {
        let per_function = family.function_memory();
        let functions = |bits: usize| functions_per_repetition(family, bits);
        match self.kind {
            HashSourceKind::Independent => {
                num_repetitions * functions(bits_per_repetition) * per_function
            }
            HashSourceKind::Pooled { pool_size } => {
                pool_size * per_function
                    + num_repetitions
                        * functions(bits_per_repetition)
                        * std::mem::size_of::<u32>()
            }
            HashSourceKind::Tensored => {
                let (left_bits, right_bits) = tensor::split_bits(bits_per_repetition);
                let m = tensor::ceil_sqrt(num_repetitions);
                m * (functions(left_bits) + functions(right_bits)) * per_function
            }
        }
    }
}

/// Per-point code stream over a fixed number of repetitions.
///
/// Codes are left-aligned in a [`MAX_HASHBITS`]-bit field, so
/// [`crate::config::prefix_mask`] selects their top bits.
pub trait HashSource<F: HashFamily>: Send + Sync {
    fn num_repetitions(&self) -> usize;

    fn bits_per_repetition(&self) -> usize;

    /// Replace the contents of `out` with the code of every repetition.
    fn hash_repetitions(&self, point: &[Elem<F::Measure>], out: &mut Vec<HashCode>);

    /// Code of a single repetition. Equal to `hash_repetitions(point)[rep]`.
    fn hash_repetition(&self, point: &[Elem<F::Measure>], rep: usize) -> HashCode;

    /// Probability that two points of the given similarity share the top
    /// `prefix` bits in one repetition.
    fn collision_probability(&self, similarity: f32, prefix: usize) -> f32;

    /// Probability that a point of the given similarity has not collided
    /// with the query after every repetition was probed at `prefix + 1`
    /// bits and the first `tables_probed` at `prefix` bits.
    fn failure_probability(&self, similarity: f32, tables_probed: usize, prefix: usize) -> f32;

    fn memory_usage(&self) -> usize;
}

pub(crate) fn functions_per_repetition<F: HashFamily>(family: &F, bits: usize) -> usize {
    let per_function = family.bits_per_function().max(1);
    (bits + per_function - 1) / per_function
}

/// Concatenate function outputs (first in the highest bits), truncate to
/// `total_bits` and left-align in the [`MAX_HASHBITS`] field.
pub(crate) fn concatenate<I>(parts: I, bits_per_function: usize, total_bits: usize) -> HashCode
where
    I: IntoIterator<Item = HashCode>,
{
    let mut code: HashCode = 0;
    let mut remaining = total_bits;
    for part in parts {
        if remaining == 0 {
            break;
        }
        let take = bits_per_function.min(remaining);
        code = (code << take) | (part >> (bits_per_function - take));
        remaining -= take;
    }
    code << (MAX_HASHBITS - total_bits)
}

/// Failure probability of independent repetitions.
pub(crate) fn independent_failure<F: HashFamily>(
    family: &F,
    num_repetitions: usize,
    bits_per_repetition: usize,
    similarity: f32,
    tables_probed: usize,
    prefix: usize,
) -> f32 {
    let probed = tables_probed.min(num_repetitions);
    let current = 1.0 - family.prefix_collision_probability(similarity, prefix);
    let longer = if prefix >= bits_per_repetition {
        1.0
    } else {
        1.0 - family.prefix_collision_probability(similarity, prefix + 1)
    };
    current.powi(probed as i32) * longer.powi((num_repetitions - probed) as i32)
}

/// The hash source chosen by [`HashSourceArgs`].
pub enum DynamicHashSource<F: HashFamily> {
    Independent(IndependentHashSource<F>),
    Pooled(HashPool<F>),
    Tensored(TensoredHashSource<F>),
}

impl<F: HashFamily> DynamicHashSource<F> {
    fn inner(&self) -> &dyn HashSource<F> {
        match self {
            DynamicHashSource::Independent(source) => source,
            DynamicHashSource::Pooled(source) => source,
            DynamicHashSource::Tensored(source) => source,
        }
    }
}

impl<F: HashFamily> HashSource<F> for DynamicHashSource<F> {
    fn num_repetitions(&self) -> usize {
        self.inner().num_repetitions()
    }

    fn bits_per_repetition(&self) -> usize {
        self.inner().bits_per_repetition()
    }

    fn hash_repetitions(&self, point: &[Elem<F::Measure>], out: &mut Vec<HashCode>) {
        self.inner().hash_repetitions(point, out)
    }

    fn hash_repetition(&self, point: &[Elem<F::Measure>], rep: usize) -> HashCode {
        self.inner().hash_repetition(point, rep)
    }

    fn collision_probability(&self, similarity: f32, prefix: usize) -> f32 {
        self.inner().collision_probability(similarity, prefix)
    }

    fn failure_probability(&self, similarity: f32, tables_probed: usize, prefix: usize) -> f32 {
        self.inner()
            .failure_probability(similarity, tables_probed, prefix)
    }

    fn memory_usage(&self) -> usize {
        self.inner().memory_usage()
    }
}
