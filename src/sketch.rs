use rand::rngs::StdRng;

use crate::config::DEFAULT_SKETCH_BITS;
use crate::hash::{HashFamily, HashFunction};
use crate::similarity::Elem;
use crate::LshError;

/// Fixed-width bit signature of a point, one bit per one-bit hash function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sketch<const WORDS: usize = 1> {
    words: [u64; WORDS],
}

/// Sketch width stored per point by the index.
pub type IndexSketch = Sketch<{ DEFAULT_SKETCH_BITS / 64 }>;

/// Source of [`IndexSketch`]es.
pub type IndexSketchSource<F> = SketchSource<F, { DEFAULT_SKETCH_BITS / 64 }>;

impl<const WORDS: usize> Sketch<WORDS> {
    pub const BITS: usize = 64 * WORDS;

    /// Pack the first `WORDS` words of `words`. Missing words are zero.
    pub fn build_from(words: &[u64]) -> Self {
        let mut packed = [0u64; WORDS];
        for (dst, &src) in packed.iter_mut().zip(words) {
            *dst = src;
        }
        Self { words: packed }
    }

    #[inline]
    pub fn hamming_distance(&self, other: &Self) -> u32 {
        self.words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }

    /// Upper bound on the per-bit collision probability of the two points
    /// that holds with probability at least `1 - delta`.
    #[inline]
    pub fn collision_probability_upper_bound(&self, other: &Self, delta: f32) -> f32 {
        if delta <= 0.0 {
            return 1.0;
        }
        let bits = Self::BITS as f32;
        let agreement = (bits - self.hamming_distance(other) as f32) / bits;
        let theta = (2.0 / bits * (1.0 / delta).ln()).sqrt();
        (agreement + theta).min(1.0)
    }
}

/// Samples the `64 * WORDS` one-bit functions that define every sketch.
pub struct SketchSource<F: HashFamily, const WORDS: usize = 1> {
    functions: Vec<F::Function>,
    function_memory: usize,
}

impl<F: HashFamily, const WORDS: usize> SketchSource<F, WORDS> {
    pub fn sample(family: &F, rng: &mut StdRng) -> Result<Self, LshError> {
        if family.bits_per_function() != 1 {
            return Err(LshError::InvalidConfig(
                "sketch family must produce one bit per function",
            ));
        }
        let functions = (0..Sketch::<WORDS>::BITS)
            .map(|_| family.sample(rng))
            .collect();
        Ok(Self {
            functions,
            function_memory: family.function_memory(),
        })
    }

    pub fn sketch(&self, point: &[Elem<F::Measure>]) -> Sketch<WORDS> {
        let mut words = [0u64; WORDS];
        for (i, function) in self.functions.iter().enumerate() {
            words[i / 64] |= ((function.hash(point) & 1) as u64) << (i % 64);
        }
        Sketch::build_from(&words)
    }

    pub fn memory_usage(&self) -> usize {
        self.functions.len() * self.function_memory
    }

    /// Function storage a sketch source for `family` needs.
    pub fn expected_memory(family: &F) -> usize {
        Sketch::<WORDS>::BITS * family.function_memory()
    }
}
