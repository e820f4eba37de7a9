//! Per-point, per-repetition code matrix answering "first repetition at
//! which two points agree on a prefix".

use rayon::prelude::*;

use crate::config::{prefix_mask, HashCode};
use crate::memory::allocate_aligned_vec;

/// Repetitions compared per vector step. Rows are padded to a multiple.
pub const WORDS_PER_VEC: usize = 8;

/// Row-major `num_points x stride` matrix of hash codes.
///
/// Row `i`, column `r` holds the code of point `i` under repetition `r`.
/// Padding columns (`r >= num_repetitions`) are never reported.
pub struct Deduplicator {
    num_points: usize,
    num_repetitions: usize,
    stride: usize,
    hashes: Vec<HashCode>,
    use_avx2: bool,
}

impl Deduplicator {
    pub fn new(num_points: usize, num_repetitions: usize) -> Self {
        let stride = num_repetitions.div_ceil(WORDS_PER_VEC) * WORDS_PER_VEC;
        Self {
            num_points,
            num_repetitions,
            stride,
            hashes: allocate_aligned_vec(num_points * stride),
            use_avx2: detect_avx2(),
        }
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn num_repetitions(&self) -> usize {
        self.num_repetitions
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn is_empty(&self) -> bool {
        self.num_points == 0
    }

    /// Bytes one repetition costs for `num_points` points.
    pub fn repetition_memory_usage(num_points: usize) -> usize {
        num_points * std::mem::size_of::<HashCode>()
    }

    pub fn memory_usage(&self) -> usize {
        self.hashes.len() * std::mem::size_of::<HashCode>()
    }

    #[inline]
    pub fn insert(&mut self, point: usize, rep: usize, code: HashCode) {
        assert!(rep < self.num_repetitions, "repetition out of range");
        self.hashes[point * self.stride + rep] = code;
    }

    #[inline]
    pub fn get(&self, point: usize, rep: usize) -> HashCode {
        assert!(rep < self.num_repetitions, "repetition out of range");
        self.hashes[point * self.stride + rep]
    }

    /// Parallel iterator over padded rows, in point order.
    pub(crate) fn rows_mut(&mut self) -> rayon::slice::ChunksExactMut<'_, HashCode> {
        self.hashes.par_chunks_exact_mut(self.stride.max(1))
    }

    #[inline]
    fn row(&self, point: usize) -> &[HashCode] {
        &self.hashes[point * self.stride..(point + 1) * self.stride]
    }

    /// First repetition, scanning from 0, at which `r` and `s` share the top
    /// `prefix` bits.
    pub fn first_collision_at(&self, r: usize, s: usize, prefix: usize) -> Option<usize> {
        self.scan(r, s, prefix_mask(prefix), 0, self.num_repetitions)
    }

    /// Same as [`Deduplicator::first_collision_at`] but scanning
    /// `start, start + 1, ..` and wrapping around.
    pub fn first_collision_from(
        &self,
        r: usize,
        s: usize,
        prefix: usize,
        start: usize,
    ) -> Option<usize> {
        if self.num_repetitions == 0 {
            return None;
        }
        let mask = prefix_mask(prefix);
        let start = start % self.num_repetitions;
        self.scan(r, s, mask, start, self.num_repetitions)
            .or_else(|| self.scan(r, s, mask, 0, start))
    }

    /// Rotated scan starting at `(r + s) mod num_repetitions`.
    #[inline]
    pub fn compute_at(&self, r: usize, s: usize, prefix: usize) -> Option<usize> {
        self.first_collision_from(r, s, prefix, r + s)
    }

    pub fn first_collision_at_scalar(&self, r: usize, s: usize, prefix: usize) -> Option<usize> {
        let mask = prefix_mask(prefix);
        scan_scalar(self.row(r), self.row(s), mask, 0, self.num_repetitions)
    }

    pub fn first_collision_from_scalar(
        &self,
        r: usize,
        s: usize,
        prefix: usize,
        start: usize,
    ) -> Option<usize> {
        if self.num_repetitions == 0 {
            return None;
        }
        let mask = prefix_mask(prefix);
        let start = start % self.num_repetitions;
        let (a, b) = (self.row(r), self.row(s));
        scan_scalar(a, b, mask, start, self.num_repetitions)
            .or_else(|| scan_scalar(a, b, mask, 0, start))
    }

    /// Block scan over repetitions `from..to`.
    fn scan(&self, r: usize, s: usize, mask: HashCode, from: usize, to: usize) -> Option<usize> {
        if from >= to {
            return None;
        }
        let (a, b) = (self.row(r), self.row(s));
        let mut block = from - from % WORDS_PER_VEC;
        while block < to {
            let lanes = &a[block..block + WORDS_PER_VEC];
            let other = &b[block..block + WORDS_PER_VEC];
            let mut hits = self.block_matches(lanes, other, mask);
            hits &= lane_window(block, from, to);
            if hits != 0 {
                return Some(block + hits.trailing_zeros() as usize);
            }
            block += WORDS_PER_VEC;
        }
        None
    }

    #[inline]
    fn block_matches(&self, a: &[HashCode], b: &[HashCode], mask: HashCode) -> u32 {
        #[cfg(target_arch = "x86_64")]
        {
            if self.use_avx2 {
                // SAFETY: AVX2 was detected in `new`, and both slices hold
                // WORDS_PER_VEC codes.
                return unsafe { x86::block_matches_avx2(a, b, mask) };
            }
        }
        block_matches_portable(a, b, mask)
    }
}

fn detect_avx2() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        is_x86_feature_detected!("avx2")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Lanes of the block starting at `block` whose repetition lies in `from..to`.
#[inline]
fn lane_window(block: usize, from: usize, to: usize) -> u32 {
    let lo = from.saturating_sub(block).min(WORDS_PER_VEC);
    let hi = to.saturating_sub(block).min(WORDS_PER_VEC);
    let upto = |n: usize| ((1u32 << n) - 1) & 0xff;
    upto(hi) & !upto(lo)
}

#[inline]
fn block_matches_portable(a: &[HashCode], b: &[HashCode], mask: HashCode) -> u32 {
    a.iter()
        .zip(b)
        .enumerate()
        .fold(0u32, |hits, (lane, (&x, &y))| {
            hits | (((x & mask) == (y & mask)) as u32) << lane
        })
}

fn scan_scalar(a: &[HashCode], b: &[HashCode], mask: HashCode, from: usize, to: usize) -> Option<usize> {
    (from..to).find(|&rep| a[rep] & mask == b[rep] & mask)
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use core::arch::x86_64::*;

    use crate::config::HashCode;
    use crate::deduplicator::WORDS_PER_VEC;

    #[inline]
    #[target_feature(enable = "avx2")]
    pub unsafe fn block_matches_avx2(a: &[HashCode], b: &[HashCode], mask: HashCode) -> u32 {
        debug_assert!(a.len() >= WORDS_PER_VEC && b.len() >= WORDS_PER_VEC);
        let mask = _mm256_set1_epi32(mask as i32);
        let va = _mm256_and_si256(_mm256_loadu_si256(a.as_ptr() as *const __m256i), mask);
        let vb = _mm256_and_si256(_mm256_loadu_si256(b.as_ptr() as *const __m256i), mask);
        let eq = _mm256_cmpeq_epi32(va, vb);
        _mm256_movemask_ps(_mm256_castsi256_ps(eq)) as u32
    }
}
