use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{HashCode, MAX_HASHBITS};
use crate::hash::{HashFamily, HashFunction};
use crate::similarity::{Description, Jaccard};
use crate::LshError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinHashArgs {
    pub bits_per_function: usize,
}

impl Default for MinHashArgs {
    fn default() -> Self {
        Self {
            bits_per_function: 8,
        }
    }
}

impl MinHashArgs {
    /// One-bit MinHash, as used for Jaccard sketches.
    pub fn one_bit() -> Self {
        Self {
            bits_per_function: 1,
        }
    }
}

/// Minimum of a random permutation of the token ids.
#[derive(Debug, Clone)]
pub struct MinHash {
    bits: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct MinHashFunction {
    multiplier: u64,
    offset: u64,
    bits: usize,
}

impl HashFunction<u32> for MinHashFunction {
    fn hash(&self, point: &[u32]) -> HashCode {
        let min = point
            .iter()
            .map(|&token| {
                mix64(
                    self.multiplier
                        .wrapping_mul(token as u64)
                        .wrapping_add(self.offset),
                )
            })
            .min()
            .unwrap_or(u64::MAX);
        ((min >> 32) as u32) >> (32 - self.bits)
    }
}

/// SplitMix64 finalizer. Breaks up the arithmetic structure of the
/// multiply-add so that minima over consecutive ids behave like random ones.
#[inline]
fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

impl HashFamily for MinHash {
    type Measure = Jaccard;
    type Args = MinHashArgs;
    type Function = MinHashFunction;

    fn new(_desc: Description, args: MinHashArgs) -> Result<Self, LshError> {
        if args.bits_per_function == 0 || args.bits_per_function > MAX_HASHBITS {
            return Err(LshError::InvalidConfig(
                "minhash bits per function must be in 1..=MAX_HASHBITS",
            ));
        }
        Ok(Self {
            bits: args.bits_per_function,
        })
    }

    fn bits_per_function(&self) -> usize {
        self.bits
    }

    fn sample(&self, rng: &mut StdRng) -> MinHashFunction {
        MinHashFunction {
            multiplier: rng.gen::<u64>() | 1,
            offset: rng.gen::<u64>(),
            bits: self.bits,
        }
    }

    fn collision_probability(&self, similarity: f32) -> f32 {
        let j = similarity.clamp(0.0, 1.0);
        let chance = (-(self.bits as f32)).exp2();
        j + (1.0 - j) * chance
    }

    fn function_memory(&self) -> usize {
        std::mem::size_of::<MinHashFunction>()
    }
}
