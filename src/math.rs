/// Compute the dot product between two vectors.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            // SAFETY: We just checked that AVX2 is available on this CPU.
            return unsafe { x86::dot_avx2(a, b) };
        }
    }

    #[cfg(target_arch = "aarch64")]
    let result = unsafe { neon::dot_neon(a, b) };

    #[cfg(not(target_arch = "aarch64"))]
    let result = dot_scalar(a, b);

    result
}

/// Squared L2 norm.
#[inline]
pub fn norm_sqr(v: &[f32]) -> f32 {
    dot(v, v)
}

/// Scale `v` to unit length in place and return the original norm.
///
/// Vectors with (near) zero norm are left untouched and `0.0` is returned.
#[inline]
pub fn normalize(v: &mut [f32]) -> f32 {
    let norm = norm_sqr(v).sqrt();
    if norm <= f32::EPSILON {
        return 0.0;
    }
    for value in v.iter_mut() {
        *value /= norm;
    }
    norm
}

/// Index and value of the coordinate with the largest magnitude.
///
/// Ties go to the lowest index. Returns `(0, 0.0)` for an empty slice.
#[inline]
pub fn argmax_abs(v: &[f32]) -> (usize, f32) {
    let mut best = 0usize;
    let mut best_abs = f32::NEG_INFINITY;
    for (idx, &value) in v.iter().enumerate() {
        if value.abs() > best_abs {
            best_abs = value.abs();
            best = idx;
        }
    }
    (best, v.get(best).copied().unwrap_or(0.0))
}

#[inline]
pub(crate) fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use core::arch::x86_64::*;

    #[inline]
    #[target_feature(enable = "avx2")]
    pub unsafe fn dot_avx2(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len();
        let chunks = len / 8;
        let a_ptr = a.as_ptr();
        let b_ptr = b.as_ptr();

        let mut acc = _mm256_setzero_ps();
        let mut i = 0usize;
        while i < chunks * 8 {
            let va = _mm256_loadu_ps(a_ptr.add(i));
            let vb = _mm256_loadu_ps(b_ptr.add(i));
            acc = _mm256_add_ps(acc, _mm256_mul_ps(va, vb));
            i += 8;
        }

        let mut lanes = [0f32; 8];
        _mm256_storeu_ps(lanes.as_mut_ptr(), acc);
        let mut sum: f32 = lanes.iter().sum();

        while i < len {
            sum += *a_ptr.add(i) * *b_ptr.add(i);
            i += 1;
        }
        sum
    }
}

#[cfg(target_arch = "aarch64")]
mod neon {
    use core::arch::aarch64::*;

    #[inline]
    #[target_feature(enable = "neon")]
    pub unsafe fn dot_neon(a: &[f32], b: &[f32]) -> f32 {
        let len = a.len();
        let chunks = len / 4;
        let a_ptr = a.as_ptr();
        let b_ptr = b.as_ptr();

        let mut acc = vdupq_n_f32(0.0);
        let mut i = 0usize;
        while i < chunks * 4 {
            let va = vld1q_f32(a_ptr.add(i));
            let vb = vld1q_f32(b_ptr.add(i));
            acc = vaddq_f32(acc, vmulq_f32(va, vb));
            i += 4;
        }

        let mut sum = vaddvq_f32(acc);
        while i < len {
            sum += *a_ptr.add(i) * *b_ptr.add(i);
            i += 1;
        }
        sum
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_matches_scalar_on_odd_lengths() {
        for len in [0usize, 1, 7, 8, 9, 31, 64, 100] {
            let a: Vec<f32> = (0..len).map(|i| (i as f32 * 0.37).sin()).collect();
            let b: Vec<f32> = (0..len).map(|i| (i as f32 * 0.11).cos()).collect();
            let fast = dot(&a, &b);
            let slow = dot_scalar(&a, &b);
            assert!((fast - slow).abs() < 1e-4, "len {len}: {fast} vs {slow}");
        }
    }

    #[test]
    fn normalize_produces_unit_vectors() {
        let mut v = vec![3.0, 4.0];
        let norm = normalize(&mut v);
        assert!((norm - 5.0).abs() < 1e-6);
        assert!((norm_sqr(&v) - 1.0).abs() < 1e-6);

        let mut zero = vec![0.0; 4];
        assert_eq!(normalize(&mut zero), 0.0);
        assert!(zero.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn argmax_abs_prefers_magnitude_and_lowest_index() {
        assert_eq!(argmax_abs(&[0.1, -0.9, 0.5]), (1, -0.9));
        assert_eq!(argmax_abs(&[0.5, -0.5]), (0, 0.5));
    }
}
