//! Exact search and joins. These ignore the hash tables and work on every
//! inserted point, so they need no rebuild.

use rayon::prelude::*;
use tracing::info;

use crate::hash::HashFamily;
use crate::index::{Index, Progress};
use crate::similarity::SimilarityMeasure;
use crate::topk::{PairResult, SearchResult, TopK};
use crate::LshError;

impl<S: SimilarityMeasure, H: HashFamily<Measure = S>> Index<S, H> {
    /// Exact `k` most similar points to `query`.
    pub fn search_bf(&self, query: &S::Input, k: usize) -> Result<Vec<SearchResult>, LshError> {
        let dataset = self.dataset();
        let point = S::encode(query, dataset.description())?;
        let top = self.install(|| {
            (0..dataset.len())
                .into_par_iter()
                .fold(
                    || TopK::new(k),
                    |mut top, id| {
                        let similarity =
                            S::similarity(&point, dataset.point(id), dataset.description());
                        top.insert(id, similarity);
                        top
                    },
                )
                .reduce(
                    || TopK::new(k),
                    |mut left, right| {
                        left.merge(right);
                        left
                    },
                )
        });
        Ok(top.into_results())
    }

    /// Exact `k` most similar other points, for every point.
    pub fn bf_join(&self, k: usize) -> Result<Vec<Vec<SearchResult>>, LshError> {
        let dataset = self.dataset();
        let n = dataset.len();
        info!(points = n, k, "brute-force join");
        let progress = Progress::new("brute-force join", n);
        let lists = self.install(|| {
            (0..n)
                .into_par_iter()
                .map(|a| {
                    let mut top = TopK::new(k);
                    for b in (0..n).filter(|&b| b != a) {
                        top.insert(b, dataset.similarity(a, b));
                    }
                    progress.tick();
                    top.into_results()
                })
                .collect()
        });
        Ok(lists)
    }

    /// Exact `k` most similar pairs `(a, b)` with `a < b`.
    pub fn global_bf_join(&self, k: usize) -> Result<Vec<PairResult>, LshError> {
        let dataset = self.dataset();
        let n = dataset.len();
        info!(points = n, k, "global brute-force join");
        let top = self.install(|| {
            (0..n)
                .into_par_iter()
                .fold(
                    || TopK::new(k),
                    |mut top, a| {
                        for b in a + 1..n {
                            top.insert((a, b), dataset.similarity(a, b));
                        }
                        top
                    },
                )
                .reduce(
                    || TopK::new(k),
                    |mut left, right| {
                        left.merge(right);
                        left
                    },
                )
        });
        Ok(top.into_results())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::IndexConfig;
    use crate::hash::{MinHash, MinHashArgs};
    use crate::index::Index;
    use crate::similarity::Jaccard;

    fn jaccard_index() -> Index<Jaccard, MinHash> {
        let mut index = Index::new(10, IndexConfig::<MinHashArgs>::new(1 << 20)).unwrap();
        let sets: [&[u32]; 5] = [&[1, 2, 3], &[1, 2, 3, 4], &[7, 8], &[2, 3], &[7, 8, 9]];
        for set in sets {
            index.insert(set).unwrap();
        }
        index
    }

    #[test]
    fn bf_join_excludes_self_and_ranks() {
        let lists = jaccard_index().bf_join(2).unwrap();
        assert_eq!(lists.len(), 5);
        let ids: Vec<usize> = lists[0].iter().map(|r| r.id).collect();
        // {1,2,3} vs {1,2,3,4} = 0.75, vs {2,3} = 0.667
        assert_eq!(ids, vec![1, 3]);
        assert!(lists.iter().enumerate().all(|(i, l)| l.iter().all(|r| r.id != i)));
    }

    #[test]
    fn global_bf_join_orders_pairs() {
        let pairs = jaccard_index().global_bf_join(3).unwrap();
        let found: Vec<(usize, usize)> = pairs.iter().map(|p| p.pair).collect();
        // 0.75 (0,1), 0.667 (0,3) and (2,4)
        assert_eq!(found, vec![(0, 1), (0, 3), (2, 4)]);
        assert!(pairs.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }

    #[test]
    fn search_bf_needs_no_build() {
        let index = jaccard_index();
        let results = index.search_bf(&[7, 8], 2).unwrap();
        assert_eq!(results[0].id, 2);
        assert_eq!(results[0].similarity, 1.0);
        assert_eq!(results[1].id, 4);
    }
}
