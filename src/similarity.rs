use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::hash::{HashFamily, MinHash, MinHashArgs, SimHash, SimHashArgs};
use crate::math::{dot, normalize};
use crate::LshError;

/// Metadata shared by every point stored under one measure.
///
/// For cosine this is the vector length, for Jaccard the size of the token
/// universe (every element must be below it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    pub dimensions: usize,
}

impl Description {
    pub fn new(dimensions: usize) -> Result<Self, LshError> {
        if dimensions == 0 {
            return Err(LshError::InvalidConfig("dimensions must be positive"));
        }
        Ok(Self { dimensions })
    }
}

/// Encoding and exact similarity for one similarity measure.
pub trait SimilarityMeasure: Send + Sync + Sized + 'static {
    /// Element type of a stored point.
    type Elem: Copy + Default + Send + Sync + Debug + 'static;
    /// Raw input accepted by [`SimilarityMeasure::encode`].
    type Input: ?Sized;
    /// One-bit family used to build per-point sketches.
    type SketchFamily: HashFamily<Measure = Self>;

    fn validate(input: &Self::Input, desc: &Description) -> Result<(), LshError>;

    /// Append the stored form of `input` to `out`. `input` must have passed
    /// [`SimilarityMeasure::validate`].
    fn encode_into(input: &Self::Input, desc: &Description, out: &mut Vec<Self::Elem>);

    fn encode(input: &Self::Input, desc: &Description) -> Result<Vec<Self::Elem>, LshError> {
        Self::validate(input, desc)?;
        let mut out = Vec::new();
        Self::encode_into(input, desc, &mut out);
        Ok(out)
    }

    /// Exact similarity between two stored points.
    fn similarity(a: &[Self::Elem], b: &[Self::Elem], desc: &Description) -> f32;

    fn sketch_family(desc: &Description) -> Result<Self::SketchFamily, LshError>;
}

/// Stored element type of measure `S`.
pub type Elem<S> = <S as SimilarityMeasure>::Elem;

/// Cosine similarity over dense vectors. Points are stored normalized, so
/// the similarity is a plain dot product.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cosine;

impl SimilarityMeasure for Cosine {
    type Elem = f32;
    type Input = [f32];
    type SketchFamily = SimHash;

    fn validate(input: &[f32], desc: &Description) -> Result<(), LshError> {
        if input.len() != desc.dimensions {
            return Err(LshError::DimensionMismatch {
                expected: desc.dimensions,
                got: input.len(),
            });
        }
        Ok(())
    }

    fn encode_into(input: &[f32], _desc: &Description, out: &mut Vec<f32>) {
        let start = out.len();
        out.extend_from_slice(input);
        normalize(&mut out[start..]);
    }

    fn similarity(a: &[f32], b: &[f32], _desc: &Description) -> f32 {
        dot(a, b).clamp(-1.0, 1.0)
    }

    fn sketch_family(desc: &Description) -> Result<SimHash, LshError> {
        SimHash::new(*desc, SimHashArgs::default())
    }
}

/// Jaccard similarity over sets of token ids, stored sorted and deduplicated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Jaccard;

/// Size ratio above which the galloping merge is used.
const GALLOP_RATIO: usize = 8;

impl SimilarityMeasure for Jaccard {
    type Elem = u32;
    type Input = [u32];
    type SketchFamily = MinHash;

    fn validate(input: &[u32], desc: &Description) -> Result<(), LshError> {
        match input.iter().find(|&&token| token as usize >= desc.dimensions) {
            Some(&token) => Err(LshError::DimensionMismatch {
                expected: desc.dimensions,
                got: token as usize + 1,
            }),
            None => Ok(()),
        }
    }

    fn encode_into(input: &[u32], _desc: &Description, out: &mut Vec<u32>) {
        let start = out.len();
        out.extend_from_slice(input);
        out[start..].sort_unstable();
        let unique = dedup_sorted(&mut out[start..]);
        out.truncate(start + unique);
    }

    fn similarity(a: &[u32], b: &[u32], _desc: &Description) -> f32 {
        let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
        if small.len() * GALLOP_RATIO <= large.len() {
            jaccard_gallop(small, large)
        } else {
            jaccard_linear(a, b)
        }
    }

    fn sketch_family(desc: &Description) -> Result<MinHash, LshError> {
        MinHash::new(*desc, MinHashArgs::one_bit())
    }
}

/// Compacts a sorted slice in place and returns the number of unique values.
fn dedup_sorted(values: &mut [u32]) -> usize {
    if values.is_empty() {
        return 0;
    }
    let mut write = 1;
    for read in 1..values.len() {
        if values[read] != values[write - 1] {
            values[write] = values[read];
            write += 1;
        }
    }
    write
}

fn jaccard_from_counts(intersection: usize, a_len: usize, b_len: usize) -> f32 {
    let union = a_len + b_len - intersection;
    if union == 0 {
        // Two empty sets are identical.
        return 1.0;
    }
    intersection as f32 / union as f32
}

/// Jaccard similarity of two sorted sets using a linear merge.
pub fn jaccard_linear(a: &[u32], b: &[u32]) -> f32 {
    let mut i = 0;
    let mut j = 0;
    let mut intersection = 0;
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                intersection += 1;
                i += 1;
                j += 1;
            }
        }
    }
    jaccard_from_counts(intersection, a.len(), b.len())
}

/// Jaccard similarity of two sorted sets, galloping through the larger one.
pub fn jaccard_gallop(a: &[u32], b: &[u32]) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let intersection = gallop_intersection(small, large);
    jaccard_from_counts(intersection, a.len(), b.len())
}

fn gallop_intersection(small: &[u32], large: &[u32]) -> usize {
    let mut count = 0;
    let mut base = 0;
    for &x in small {
        if base >= large.len() {
            break;
        }
        let mut bound = 1;
        while base + bound < large.len() && large[base + bound] < x {
            bound *= 2;
        }
        // large[base + bound / 2] < x unless bound == 1, so the first
        // element >= x lies in this window.
        let lo = base + bound / 2;
        let hi = (base + bound + 1).min(large.len());
        let pos = lo + large[lo..hi].partition_point(|&y| y < x);
        if pos < large.len() && large[pos] == x {
            count += 1;
            base = pos + 1;
        } else {
            base = pos;
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sorted_set(max_len: usize, universe: u32) -> impl Strategy<Value = Vec<u32>> {
        prop::collection::btree_set(0..universe, 0..max_len)
            .prop_map(|set| set.into_iter().collect::<Vec<u32>>())
    }

    #[test]
    fn cosine_self_similarity_is_one() {
        let desc = Description::new(3).unwrap();
        let point = Cosine::encode(&[1.0, -2.0, 0.5], &desc).unwrap();
        assert!((Cosine::similarity(&point, &point, &desc) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_rejects_wrong_dimensions() {
        let desc = Description::new(4).unwrap();
        let err = Cosine::encode(&[1.0, 2.0], &desc).unwrap_err();
        assert!(matches!(
            err,
            LshError::DimensionMismatch { expected: 4, got: 2 }
        ));
    }

    #[test]
    fn jaccard_encode_sorts_and_dedups() {
        let desc = Description::new(100).unwrap();
        let point = Jaccard::encode(&[9, 3, 3, 7, 9, 1], &desc).unwrap();
        assert_eq!(point, vec![1, 3, 7, 9]);
        assert!(Jaccard::encode(&[4, 100], &desc).is_err());
    }

    #[test]
    fn jaccard_known_values() {
        assert!((jaccard_linear(&[1, 2, 3], &[2, 3, 4]) - 0.5).abs() < 1e-6);
        assert_eq!(jaccard_linear(&[1, 2], &[3, 4]), 0.0);
        assert_eq!(jaccard_linear(&[], &[]), 1.0);
        assert_eq!(jaccard_gallop(&[], &[1, 2, 3]), 0.0);
        let desc = Description::new(10).unwrap();
        assert_eq!(Jaccard::similarity(&[1, 5, 8], &[1, 5, 8], &desc), 1.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn gallop_agrees_with_linear_long_short(
            long in sorted_set(400, 1000),
            short in sorted_set(12, 1000),
        ) {
            prop_assert_eq!(jaccard_linear(&long, &short), jaccard_gallop(&long, &short));
            prop_assert_eq!(jaccard_linear(&short, &long), jaccard_gallop(&short, &long));
        }

        #[test]
        fn gallop_agrees_with_linear_similar_sizes(
            a in sorted_set(200, 300),
            b in sorted_set(200, 300),
        ) {
            prop_assert_eq!(jaccard_linear(&a, &b), jaccard_gallop(&a, &b));
        }

        #[test]
        fn gallop_agrees_with_linear_short_short(
            a in sorted_set(8, 20),
            b in sorted_set(8, 20),
        ) {
            prop_assert_eq!(jaccard_linear(&a, &b), jaccard_gallop(&a, &b));
        }
    }
}
