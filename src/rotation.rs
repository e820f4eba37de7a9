use rand::prelude::*;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::math::dot;

/// Which random transform a projection-based hash family applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransformKind {
    /// Dense Gaussian projection matrix. `O(rows * dim)` per point.
    #[default]
    Dense,
    /// Sign flips interleaved with Fast Hadamard Transforms. `O(dim log dim)`
    /// per point, output padded to a multiple of 64.
    Fht,
}

impl TransformKind {
    /// Output width of the transform for `dim` inputs and `rows` requested
    /// projections.
    pub fn output_dim(self, dim: usize, rows: usize) -> usize {
        match self {
            TransformKind::Dense => rows,
            TransformKind::Fht => round_up_to_multiple(dim.max(1), 64),
        }
    }

    /// Bytes needed to store one sampled transform.
    pub fn memory_usage(self, dim: usize, rows: usize) -> usize {
        match self {
            TransformKind::Dense => rows * dim * std::mem::size_of::<f32>(),
            TransformKind::Fht => 4 * self.output_dim(dim, rows) / 8,
        }
    }
}

fn round_up_to_multiple(value: usize, multiple: usize) -> usize {
    ((value + multiple - 1) / multiple) * multiple
}

/// A random linear map applied before reading off hash bits.
pub trait Rotator: Send + Sync {
    fn dim(&self) -> usize;

    fn output_dim(&self) -> usize;

    fn rotate(&self, input: &[f32]) -> Vec<f32> {
        let mut output = vec![0.0f32; self.output_dim()];
        self.rotate_into(input, &mut output);
        output
    }

    fn rotate_into(&self, input: &[f32], output: &mut [f32]);
}

/// Dense projection with i.i.d. standard normal entries.
#[derive(Debug, Clone)]
pub struct GaussianRotator {
    dim: usize,
    rows: usize,
    matrix: Vec<f32>, // Row-major: rows x dim
}

impl GaussianRotator {
    pub fn sample<R: Rng + ?Sized>(dim: usize, rows: usize, rng: &mut R) -> Self {
        let matrix = (0..rows * dim)
            .map(|_| StandardNormal.sample(rng))
            .collect::<Vec<f32>>();
        Self { dim, rows, matrix }
    }
}

impl Rotator for GaussianRotator {
    fn dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.rows
    }

    fn rotate_into(&self, input: &[f32], output: &mut [f32]) {
        assert_eq!(input.len(), self.dim);
        assert_eq!(output.len(), self.rows);
        for (out, row) in output.iter_mut().zip(self.matrix.chunks_exact(self.dim.max(1))) {
            *out = dot(input, row);
        }
    }
}

/// Fast Hadamard Transform rotator with Kac's walk for dimensions that are
/// not a power of two.
#[derive(Debug, Clone)]
pub struct FhtKacRotator {
    dim: usize,
    padded_dim: usize,
    flip: Vec<u8>, // 4 rounds of padded_dim flip bits
    trunc_dim: usize,
    fac: f32,
}

impl FhtKacRotator {
    pub fn sample<R: Rng + ?Sized>(dim: usize, rng: &mut R) -> Self {
        let dim = dim.max(1);
        let padded_dim = TransformKind::Fht.output_dim(dim, 0);
        let flip: Vec<u8> = (0..4 * padded_dim / 8).map(|_| rng.gen::<u8>()).collect();

        let trunc_dim = 1 << floor_log2(dim);
        let fac = 1.0 / (trunc_dim as f32).sqrt();

        Self {
            dim,
            padded_dim,
            flip,
            trunc_dim,
            fac,
        }
    }

    fn flip_sign(data: &mut [f32], flip_bits: &[u8]) {
        for (i, value) in data.iter_mut().enumerate() {
            if (flip_bits[i / 8] >> (i % 8)) & 1 == 1 {
                *value = -*value;
            }
        }
    }

    /// In-place unnormalized Walsh-Hadamard transform.
    fn fht(data: &mut [f32]) {
        let n = data.len();
        debug_assert!(n.is_power_of_two());

        let mut h = 1;
        while h < n {
            for i in (0..n).step_by(h * 2) {
                for j in i..(i + h) {
                    let x = data[j];
                    let y = data[j + h];
                    data[j] = x + y;
                    data[j + h] = x - y;
                }
            }
            h *= 2;
        }
    }

    fn kacs_walk(data: &mut [f32]) {
        let half = data.len() / 2;
        for i in 0..half {
            let x = data[i];
            let y = data[i + half];
            data[i] = x + y;
            data[i + half] = x - y;
        }
    }

    fn rescale(data: &mut [f32], factor: f32) {
        for value in data.iter_mut() {
            *value *= factor;
        }
    }
}

impl Rotator for FhtKacRotator {
    fn dim(&self) -> usize {
        self.dim
    }

    fn output_dim(&self) -> usize {
        self.padded_dim
    }

    fn rotate_into(&self, input: &[f32], output: &mut [f32]) {
        assert!(input.len() <= self.dim);
        assert_eq!(output.len(), self.padded_dim);

        output[..input.len()].copy_from_slice(input);
        output[input.len()..].fill(0.0);

        let stride = self.padded_dim / 8;
        let flips = |round: usize| &self.flip[round * stride..(round + 1) * stride];

        if self.trunc_dim == self.padded_dim {
            for round in 0..4 {
                Self::flip_sign(output, flips(round));
                Self::fht(output);
                Self::rescale(output, self.fac);
            }
        } else {
            // Alternate between the leading and trailing power-of-two window
            // and mix the halves with a Kac step after each round.
            let start = self.padded_dim - self.trunc_dim;
            for round in 0..4 {
                Self::flip_sign(output, flips(round));
                let window = if round % 2 == 0 {
                    &mut output[..self.trunc_dim]
                } else {
                    &mut output[start..]
                };
                Self::fht(window);
                Self::rescale(window, self.fac);
                Self::kacs_walk(output);
            }
            Self::rescale(output, 0.25);
        }
    }
}

fn floor_log2(x: usize) -> usize {
    assert!(x > 0, "floor_log2 requires positive input");
    (usize::BITS - 1 - x.leading_zeros()) as usize
}

/// Either transform behind one type, chosen by [`TransformKind`].
#[derive(Debug, Clone)]
pub enum DynamicRotator {
    Dense(GaussianRotator),
    Fht(FhtKacRotator),
}

impl DynamicRotator {
    pub fn sample<R: Rng + ?Sized>(kind: TransformKind, dim: usize, rows: usize, rng: &mut R) -> Self {
        match kind {
            TransformKind::Dense => DynamicRotator::Dense(GaussianRotator::sample(dim, rows, rng)),
            TransformKind::Fht => DynamicRotator::Fht(FhtKacRotator::sample(dim, rng)),
        }
    }

    pub fn output_dim(&self) -> usize {
        match self {
            DynamicRotator::Dense(r) => r.output_dim(),
            DynamicRotator::Fht(r) => r.output_dim(),
        }
    }

    pub fn rotate(&self, input: &[f32]) -> Vec<f32> {
        match self {
            DynamicRotator::Dense(r) => r.rotate(input),
            DynamicRotator::Fht(r) => r.rotate(input),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_log2() {
        assert_eq!(floor_log2(1), 0);
        assert_eq!(floor_log2(3), 1);
        assert_eq!(floor_log2(8), 3);
        assert_eq!(floor_log2(960), 9);
    }

    #[test]
    fn test_fht_is_self_inverse_up_to_scale() {
        let mut data = vec![1.0, 2.0, 3.0, 4.0];
        FhtKacRotator::fht(&mut data);
        FhtKacRotator::fht(&mut data);
        for (i, &val) in data.iter().enumerate() {
            assert!((val - (i + 1) as f32 * 4.0).abs() < 1e-5);
        }
    }

    #[test]
    fn fht_rotator_preserves_norm() {
        let mut rng = StdRng::seed_from_u64(54321);
        for dim in [64usize, 100, 128] {
            let rotator = FhtKacRotator::sample(dim, &mut rng);
            let input: Vec<f32> = (0..dim).map(|i| ((i * 7) % 13) as f32 - 6.0).collect();
            let output = rotator.rotate(&input);
            assert_eq!(output.len(), rotator.output_dim());
            let before: f32 = input.iter().map(|x| x * x).sum::<f32>().sqrt();
            let after: f32 = output.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!(
                (before - after).abs() / before < 1e-3,
                "dim {dim}: {before} vs {after}"
            );
        }
    }

    #[test]
    fn gaussian_rotator_has_requested_shape() {
        let mut rng = StdRng::seed_from_u64(11);
        let rotator = GaussianRotator::sample(16, 5, &mut rng);
        assert_eq!(rotator.dim(), 16);
        assert_eq!(rotator.output_dim(), 5);
        assert_eq!(rotator.rotate(&[1.0; 16]).len(), 5);
    }

    #[test]
    fn transform_memory_accounts_for_storage() {
        assert_eq!(TransformKind::Dense.memory_usage(10, 3), 120);
        assert_eq!(TransformKind::Fht.output_dim(100, 1), 128);
        assert_eq!(TransformKind::Fht.memory_usage(100, 1), 64);
    }
}
