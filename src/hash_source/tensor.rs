use std::sync::Arc;

use rand::rngs::StdRng;

use crate::config::{HashCode, MAX_HASHBITS};
use crate::hash::HashFamily;
use crate::hash_source::{HashSource, IndependentHashSource};
use crate::similarity::Elem;

/// Repetitions formed from pairs of half-width codes.
///
/// With `m = ceil(sqrt(R))` left and right codes, repetition `r` combines
/// left code `r / m` with right code `r % m`, interleaving their bits from
/// the top (left, right, left, ...). A prefix of `d` bits therefore holds
/// `ceil(d / 2)` left bits and `floor(d / 2)` right bits.
pub struct TensoredHashSource<F: HashFamily> {
    left: IndependentHashSource<F>,
    right: IndependentHashSource<F>,
    side: usize,
    num_repetitions: usize,
    bits_per_repetition: usize,
}

pub(crate) fn split_bits(bits: usize) -> (usize, usize) {
    ((bits + 1) / 2, bits / 2)
}

pub(crate) fn ceil_sqrt(value: usize) -> usize {
    let mut root = (value as f64).sqrt() as usize;
    while root * root < value {
        root += 1;
    }
    while root > 0 && (root - 1) * (root - 1) >= value {
        root -= 1;
    }
    root
}

/// Interleave two left-aligned codes bit by bit, starting with `left`.
fn interleave(left: HashCode, right: HashCode, total_bits: usize) -> HashCode {
    let mut code: HashCode = 0;
    for i in 0..total_bits {
        let source = if i % 2 == 0 { left } else { right };
        let bit = (source >> (MAX_HASHBITS - 1 - i / 2)) & 1;
        code = (code << 1) | bit;
    }
    code << (MAX_HASHBITS - total_bits)
}

impl<F: HashFamily> TensoredHashSource<F> {
    pub fn sample(
        family: Arc<F>,
        num_repetitions: usize,
        bits_per_repetition: usize,
        rng: &mut StdRng,
    ) -> Self {
        let side = ceil_sqrt(num_repetitions);
        let (left_bits, right_bits) = split_bits(bits_per_repetition);
        let left = IndependentHashSource::sample(family.clone(), side, left_bits, rng);
        let right = IndependentHashSource::sample(family, side, right_bits, rng);
        Self {
            left,
            right,
            side,
            num_repetitions,
            bits_per_repetition,
        }
    }

    /// Probability that none of `rows` left codes times all right codes
    /// collide at the given prefix.
    fn grid_failure(&self, similarity: f32, rows: usize, prefix: usize) -> f32 {
        let (left_bits, right_bits) = split_bits(prefix);
        let left = self.left.collision_probability(similarity, left_bits);
        let right = self.right.collision_probability(similarity, right_bits);
        let any_left = 1.0 - (1.0 - left).powi(rows as i32);
        let any_right = 1.0 - (1.0 - right).powi(self.side as i32);
        1.0 - any_left * any_right
    }
}

impl<F: HashFamily> HashSource<F> for TensoredHashSource<F> {
    fn num_repetitions(&self) -> usize {
        self.num_repetitions
    }

    fn bits_per_repetition(&self) -> usize {
        self.bits_per_repetition
    }

    fn hash_repetitions(&self, point: &[Elem<F::Measure>], out: &mut Vec<HashCode>) {
        let mut left = Vec::with_capacity(self.side);
        let mut right = Vec::with_capacity(self.side);
        self.left.hash_repetitions(point, &mut left);
        self.right.hash_repetitions(point, &mut right);
        out.clear();
        out.extend((0..self.num_repetitions).map(|rep| {
            interleave(
                left[rep / self.side],
                right[rep % self.side],
                self.bits_per_repetition,
            )
        }));
    }

    fn hash_repetition(&self, point: &[Elem<F::Measure>], rep: usize) -> HashCode {
        interleave(
            self.left.hash_repetition(point, rep / self.side),
            self.right.hash_repetition(point, rep % self.side),
            self.bits_per_repetition,
        )
    }

    fn collision_probability(&self, similarity: f32, prefix: usize) -> f32 {
        let (left_bits, right_bits) = split_bits(prefix);
        self.left.collision_probability(similarity, left_bits)
            * self.right.collision_probability(similarity, right_bits)
    }

    fn failure_probability(&self, similarity: f32, tables_probed: usize, prefix: usize) -> f32 {
        if self.side == 0 {
            return 1.0;
        }
        let probed_rows = tables_probed.min(self.num_repetitions) / self.side;
        let current = self.grid_failure(similarity, probed_rows, prefix);
        let longer = if prefix >= self.bits_per_repetition {
            1.0
        } else {
            self.grid_failure(similarity, self.num_repetitions / self.side, prefix + 1)
        };
        current.min(longer)
    }

    fn memory_usage(&self) -> usize {
        self.left.memory_usage() + self.right.memory_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceil_sqrt_rounds_up() {
        assert_eq!(ceil_sqrt(0), 0);
        assert_eq!(ceil_sqrt(1), 1);
        assert_eq!(ceil_sqrt(2), 2);
        assert_eq!(ceil_sqrt(16), 4);
        assert_eq!(ceil_sqrt(17), 5);
    }

    #[test]
    fn interleave_alternates_from_the_top() {
        let align = |bits: HashCode, width: usize| bits << (MAX_HASHBITS - width);
        // left 101, right 00 -> 1 0 0 0 1
        let code = interleave(align(0b101, 3), align(0b00, 2), 5);
        assert_eq!(code, align(0b10001, 5));
        let code = interleave(align(0b11, 2), align(0b01, 2), 4);
        assert_eq!(code, align(0b1011, 4));
    }
}
