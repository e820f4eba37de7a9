use std::sync::Arc;

use rand::rngs::StdRng;

use crate::config::HashCode;
use crate::hash::{HashFamily, HashFunction};
use crate::hash_source::{concatenate, functions_per_repetition, independent_failure, HashSource};
use crate::similarity::Elem;

/// Every repetition concatenates its own freshly sampled functions.
pub struct IndependentHashSource<F: HashFamily> {
    family: Arc<F>,
    functions: Vec<F::Function>,
    functions_per_repetition: usize,
    num_repetitions: usize,
    bits_per_repetition: usize,
}

impl<F: HashFamily> IndependentHashSource<F> {
    pub fn sample(
        family: Arc<F>,
        num_repetitions: usize,
        bits_per_repetition: usize,
        rng: &mut StdRng,
    ) -> Self {
        let functions_per_repetition = functions_per_repetition(&*family, bits_per_repetition);
        let functions = (0..num_repetitions * functions_per_repetition)
            .map(|_| family.sample(rng))
            .collect();
        Self {
            family,
            functions,
            functions_per_repetition,
            num_repetitions,
            bits_per_repetition,
        }
    }

    fn repetition_functions(&self, rep: usize) -> &[F::Function] {
        let start = rep * self.functions_per_repetition;
        &self.functions[start..start + self.functions_per_repetition]
    }
}

impl<F: HashFamily> HashSource<F> for IndependentHashSource<F> {
    fn num_repetitions(&self) -> usize {
        self.num_repetitions
    }

    fn bits_per_repetition(&self) -> usize {
        self.bits_per_repetition
    }

    fn hash_repetitions(&self, point: &[Elem<F::Measure>], out: &mut Vec<HashCode>) {
        out.clear();
        out.extend((0..self.num_repetitions).map(|rep| self.hash_repetition(point, rep)));
    }

    fn hash_repetition(&self, point: &[Elem<F::Measure>], rep: usize) -> HashCode {
        concatenate(
            self.repetition_functions(rep)
                .iter()
                .map(|function| function.hash(point)),
            self.family.bits_per_function(),
            self.bits_per_repetition,
        )
    }

    fn collision_probability(&self, similarity: f32, prefix: usize) -> f32 {
        self.family.prefix_collision_probability(similarity, prefix)
    }

    fn failure_probability(&self, similarity: f32, tables_probed: usize, prefix: usize) -> f32 {
        independent_failure(
            &*self.family,
            self.num_repetitions,
            self.bits_per_repetition,
            similarity,
            tables_probed,
            prefix,
        )
    }

    fn memory_usage(&self) -> usize {
        self.functions.len() * self.family.function_memory()
    }
}
