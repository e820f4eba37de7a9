use rand::prelude::*;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{HashCode, MAX_HASHBITS};
use crate::hash::{HashFamily, HashFunction};
use crate::math::{argmax_abs, dot, normalize};
use crate::rotation::{DynamicRotator, TransformKind};
use crate::similarity::{Cosine, Description};
use crate::LshError;

/// Similarity levels of the estimated collision table, evenly spaced in [-1, 1].
const PROBABILITY_LEVELS: usize = 41;
const ESTIMATION_SEED: u64 = 0x0c55_0bad_2f17_3e01;
/// Pairs hashed by one sampled function during estimation.
const PAIRS_PER_FUNCTION: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossPolytopeArgs {
    pub transform: TransformKind,
    /// Vector pairs sampled per similarity level when estimating the
    /// collision probability table.
    pub estimation_samples: usize,
}

impl Default for CrossPolytopeArgs {
    fn default() -> Self {
        Self {
            transform: TransformKind::Fht,
            estimation_samples: 500,
        }
    }
}

/// Nearest signed axis after a random rotation.
#[derive(Debug, Clone)]
pub struct CrossPolytopeHash {
    desc: Description,
    args: CrossPolytopeArgs,
    output_dim: usize,
    bits: usize,
    probabilities: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct CrossPolytopeFunction {
    rotator: DynamicRotator,
}

impl HashFunction<f32> for CrossPolytopeFunction {
    fn hash(&self, point: &[f32]) -> HashCode {
        let rotated = self.rotator.rotate(point);
        let (idx, value) = argmax_abs(&rotated);
        2 * idx as HashCode + (value < 0.0) as HashCode
    }
}

impl CrossPolytopeHash {
    /// Monte-Carlo estimate of the collision probability at each level,
    /// made monotone with `p(1) = 1`.
    fn estimate_probabilities(&self) -> Vec<f32> {
        let dims = self.desc.dimensions;
        let samples = self.args.estimation_samples.max(1);
        let mut probabilities: Vec<f32> = (0..PROBABILITY_LEVELS)
            .into_par_iter()
            .map(|level| {
                let similarity = level_similarity(level);
                let mut rng = StdRng::seed_from_u64(ESTIMATION_SEED ^ level as u64);
                let mut function = self.sample(&mut rng);
                let mut hits = 0usize;
                for pair in 0..samples {
                    if pair > 0 && pair % PAIRS_PER_FUNCTION == 0 {
                        function = self.sample(&mut rng);
                    }
                    let (u, v) = correlated_pair(dims, similarity, &mut rng);
                    if function.hash(&u) == function.hash(&v) {
                        hits += 1;
                    }
                }
                hits as f32 / samples as f32
            })
            .collect();

        let mut running = 0.0f32;
        for p in probabilities.iter_mut() {
            running = running.max(*p);
            *p = running;
        }
        if let Some(last) = probabilities.last_mut() {
            *last = 1.0;
        }
        probabilities
    }
}

fn level_similarity(level: usize) -> f32 {
    -1.0 + 2.0 * level as f32 / (PROBABILITY_LEVELS - 1) as f32
}

fn random_unit<R: Rng + ?Sized>(dims: usize, rng: &mut R) -> Vec<f32> {
    loop {
        let mut v: Vec<f32> = (0..dims).map(|_| rng.sample(StandardNormal)).collect();
        if normalize(&mut v) > 0.0 {
            return v;
        }
    }
}

/// Two unit vectors with inner product `similarity`.
fn correlated_pair<R: Rng + ?Sized>(dims: usize, similarity: f32, rng: &mut R) -> (Vec<f32>, Vec<f32>) {
    let u = random_unit(dims, rng);
    if dims == 1 {
        let sign = if similarity >= 0.0 { 1.0 } else { -1.0 };
        return (u.clone(), vec![u[0] * sign]);
    }
    let mut w = random_unit(dims, rng);
    let overlap = dot(&u, &w);
    for (wi, ui) in w.iter_mut().zip(&u) {
        *wi -= overlap * ui;
    }
    normalize(&mut w);
    let orthogonal = (1.0 - similarity * similarity).max(0.0).sqrt();
    let v = u
        .iter()
        .zip(&w)
        .map(|(ui, wi)| similarity * ui + orthogonal * wi)
        .collect();
    (u, v)
}

impl HashFamily for CrossPolytopeHash {
    type Measure = Cosine;
    type Args = CrossPolytopeArgs;
    type Function = CrossPolytopeFunction;

    fn new(desc: Description, args: CrossPolytopeArgs) -> Result<Self, LshError> {
        let output_dim = args.transform.output_dim(desc.dimensions, desc.dimensions);
        let bits = (2 * output_dim).next_power_of_two().trailing_zeros() as usize;
        if bits > MAX_HASHBITS {
            return Err(LshError::InvalidConfig(
                "cross-polytope code width exceeds MAX_HASHBITS",
            ));
        }
        let mut family = Self {
            desc,
            args,
            output_dim,
            bits,
            probabilities: Vec::new(),
        };
        family.probabilities = family.estimate_probabilities();
        Ok(family)
    }

    fn bits_per_function(&self) -> usize {
        self.bits
    }

    fn sample(&self, rng: &mut StdRng) -> CrossPolytopeFunction {
        CrossPolytopeFunction {
            rotator: DynamicRotator::sample(
                self.args.transform,
                self.desc.dimensions,
                self.output_dim,
                rng,
            ),
        }
    }

    fn collision_probability(&self, similarity: f32) -> f32 {
        let position = (similarity.clamp(-1.0, 1.0) + 1.0) / 2.0 * (PROBABILITY_LEVELS - 1) as f32;
        let lower = (position.floor() as usize).min(PROBABILITY_LEVELS - 2);
        let frac = position - lower as f32;
        self.probabilities[lower] * (1.0 - frac) + self.probabilities[lower + 1] * frac
    }

    fn function_memory(&self) -> usize {
        std::mem::size_of::<CrossPolytopeFunction>()
            + self
                .args
                .transform
                .memory_usage(self.desc.dimensions, self.output_dim)
    }
}
