use std::sync::Arc;

use rand::prelude::*;

use crate::config::HashCode;
use crate::hash::{HashFamily, HashFunction};
use crate::hash_source::{concatenate, functions_per_repetition, HashSource};
use crate::similarity::Elem;

/// Log-probability below the binomial mode at which pool outcomes are
/// dropped from the failure estimate.
const NEGLIGIBLE_LOG_MASS: f64 = 36.0;

/// Repetitions built from a shared pool of functions.
///
/// Each repetition is a random sequence of pool indices. Batch hashing
/// evaluates every pool function once and assembles all repetitions from
/// the cached outputs.
pub struct HashPool<F: HashFamily> {
    family: Arc<F>,
    pool: Vec<F::Function>,
    /// `ln(i!)` for `i` in `0..=pool_size`.
    ln_factorial: Vec<f64>,
    indices: Vec<u32>,
    functions_per_repetition: usize,
    num_repetitions: usize,
    bits_per_repetition: usize,
}

impl<F: HashFamily> HashPool<F> {
    pub fn sample(
        family: Arc<F>,
        pool_size: usize,
        num_repetitions: usize,
        bits_per_repetition: usize,
        rng: &mut StdRng,
    ) -> Self {
        let pool_size = pool_size.max(1);
        let pool = (0..pool_size).map(|_| family.sample(rng)).collect();
        let functions_per_repetition = functions_per_repetition(&*family, bits_per_repetition);
        let indices = (0..num_repetitions * functions_per_repetition)
            .map(|_| rng.gen_range(0..pool_size) as u32)
            .collect();
        let ln_factorial = std::iter::once(0.0)
            .chain((1..=pool_size).scan(0.0, |acc, i| {
                *acc += (i as f64).ln();
                Some(*acc)
            }))
            .collect();
        Self {
            family,
            pool,
            ln_factorial,
            indices,
            functions_per_repetition,
            num_repetitions,
            bits_per_repetition,
        }
    }

    fn repetition_indices(&self, rep: usize) -> &[u32] {
        let start = rep * self.functions_per_repetition;
        &self.indices[start..start + self.functions_per_repetition]
    }
}

impl<F: HashFamily> HashSource<F> for HashPool<F> {
    fn num_repetitions(&self) -> usize {
        self.num_repetitions
    }

    fn bits_per_repetition(&self) -> usize {
        self.bits_per_repetition
    }

    fn hash_repetitions(&self, point: &[Elem<F::Measure>], out: &mut Vec<HashCode>) {
        let pool_codes: Vec<HashCode> = self.pool.iter().map(|f| f.hash(point)).collect();
        let bits_per_function = self.family.bits_per_function();
        out.clear();
        out.extend((0..self.num_repetitions).map(|rep| {
            concatenate(
                self.repetition_indices(rep)
                    .iter()
                    .map(|&idx| pool_codes[idx as usize]),
                bits_per_function,
                self.bits_per_repetition,
            )
        }));
    }

    fn hash_repetition(&self, point: &[Elem<F::Measure>], rep: usize) -> HashCode {
        concatenate(
            self.repetition_indices(rep)
                .iter()
                .map(|&idx| self.pool[idx as usize].hash(point)),
            self.family.bits_per_function(),
            self.bits_per_repetition,
        )
    }

    fn collision_probability(&self, similarity: f32, prefix: usize) -> f32 {
        self.family.prefix_collision_probability(similarity, prefix)
    }

    /// Repetitions share pool functions, so their collisions are
    /// correlated. Conditioned on the number `x` of pool functions that
    /// collide, a repetition using `f` functions collides with probability
    /// `(x / pool_size)^f`, independently of the others; the failure is the
    /// expectation of that over `x ~ Binomial(pool_size, p)`.
    fn failure_probability(&self, similarity: f32, tables_probed: usize, prefix: usize) -> f32 {
        let per_function = self.family.bits_per_function().max(1);
        let functions = |bits: usize| ((bits + per_function - 1) / per_function) as i32;
        let current = functions(prefix);
        let longer = (prefix < self.bits_per_repetition).then(|| functions(prefix + 1));
        let probed = tables_probed.min(self.num_repetitions);
        let remaining = (self.num_repetitions - probed) as i32;
        let probed = probed as i32;
        let pool_size = self.pool.len() as f64;

        let p = f64::from(self.family.collision_probability(similarity));
        let failure = binomial_expectation(&self.ln_factorial, p, |colliding| {
            let share = colliding as f64 / pool_size;
            let miss_current = (1.0 - share.powi(current)).powi(probed);
            let miss_longer = longer.map_or(1.0, |f| (1.0 - share.powi(f)).powi(remaining));
            miss_current * miss_longer
        });
        failure.clamp(0.0, 1.0) as f32
    }

    fn memory_usage(&self) -> usize {
        self.pool.len() * self.family.function_memory()
            + self.indices.len() * std::mem::size_of::<u32>()
    }
}

/// `E[value(X)]` for `X ~ Binomial(n, p)`, `n = ln_factorial.len() - 1`.
///
/// Walks outwards from the mode and stops once the probability mass is
/// negligible, so the cost grows with the standard deviation rather than `n`.
fn binomial_expectation(ln_factorial: &[f64], p: f64, value: impl Fn(usize) -> f64) -> f64 {
    let n = ln_factorial.len() - 1;
    if p <= 0.0 {
        return value(0);
    }
    if p >= 1.0 {
        return value(n);
    }
    let (ln_p, ln_q) = (p.ln(), (1.0 - p).ln());
    let ln_pmf = |x: usize| {
        ln_factorial[n] - ln_factorial[x] - ln_factorial[n - x]
            + x as f64 * ln_p
            + (n - x) as f64 * ln_q
    };
    let mode = ((((n + 1) as f64) * p).floor() as usize).min(n);
    let floor = ln_pmf(mode) - NEGLIGIBLE_LOG_MASS;

    let mut total = 0.0;
    for x in (0..=mode).rev() {
        let ln_mass = ln_pmf(x);
        if ln_mass < floor {
            break;
        }
        total += ln_mass.exp() * value(x);
    }
    for x in mode + 1..=n {
        let ln_mass = ln_pmf(x);
        if ln_mass < floor {
            break;
        }
        total += ln_mass.exp() * value(x);
    }
    total
}
