use std::f32::consts::PI;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::config::{HashCode, MAX_HASHBITS};
use crate::hash::{HashFamily, HashFunction};
use crate::rotation::{DynamicRotator, TransformKind};
use crate::similarity::{Cosine, Description};
use crate::LshError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimHashArgs {
    pub transform: TransformKind,
    pub bits_per_function: usize,
}

impl Default for SimHashArgs {
    fn default() -> Self {
        Self {
            transform: TransformKind::Dense,
            bits_per_function: 1,
        }
    }
}

/// Sign of random projections (random hyperplane hashing).
#[derive(Debug, Clone)]
pub struct SimHash {
    desc: Description,
    args: SimHashArgs,
}

#[derive(Debug, Clone)]
pub struct SimHashFunction {
    rotator: DynamicRotator,
    bits: usize,
}

impl HashFunction<f32> for SimHashFunction {
    fn hash(&self, point: &[f32]) -> HashCode {
        let projected = self.rotator.rotate(point);
        projected[..self.bits]
            .iter()
            .fold(0, |code, &value| (code << 1) | (value >= 0.0) as HashCode)
    }
}

impl HashFamily for SimHash {
    type Measure = Cosine;
    type Args = SimHashArgs;
    type Function = SimHashFunction;

    fn new(desc: Description, args: SimHashArgs) -> Result<Self, LshError> {
        if args.bits_per_function == 0 || args.bits_per_function > MAX_HASHBITS {
            return Err(LshError::InvalidConfig(
                "simhash bits per function must be in 1..=MAX_HASHBITS",
            ));
        }
        let outputs = args
            .transform
            .output_dim(desc.dimensions, args.bits_per_function);
        if args.bits_per_function > outputs {
            return Err(LshError::InvalidConfig(
                "simhash bits per function exceed the transform output",
            ));
        }
        Ok(Self { desc, args })
    }

    fn bits_per_function(&self) -> usize {
        self.args.bits_per_function
    }

    fn sample(&self, rng: &mut StdRng) -> SimHashFunction {
        SimHashFunction {
            rotator: DynamicRotator::sample(
                self.args.transform,
                self.desc.dimensions,
                self.args.bits_per_function,
                rng,
            ),
            bits: self.args.bits_per_function,
        }
    }

    fn collision_probability(&self, similarity: f32) -> f32 {
        let per_bit = 1.0 - similarity.clamp(-1.0, 1.0).acos() / PI;
        per_bit.powi(self.args.bits_per_function as i32)
    }

    fn function_memory(&self) -> usize {
        std::mem::size_of::<SimHashFunction>()
            + self
                .args
                .transform
                .memory_usage(self.desc.dimensions, self.args.bits_per_function)
    }
}
