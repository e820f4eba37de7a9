//! Approximate similarity joins over the built points.
//!
//! `lsh_join` and `global_lsh_join` enumerate colliding pairs table by
//! table, from the longest prefix down. A pair is evaluated once: at the
//! longest prefix where it collides in some repetition, and in the
//! repetition [`Deduplicator::compute_at`] assigns it. Because that
//! assignment is rotated per pair, stopping conditions are checked after
//! every table of a prefix level has been processed.

use rayon::prelude::*;
use roaring::RoaringBitmap;
use tracing::{debug, info};

use crate::config::{FilterType, SearchParams};
use crate::deduplicator::Deduplicator;
use crate::hash::HashFamily;
use crate::hash_source::HashSource;
use crate::index::{validate_recall, BuiltIndex, Index, Progress};
use crate::similarity::SimilarityMeasure;
use crate::topk::{PairResult, SearchResult, TopK};
use crate::LshError;

impl<S: SimilarityMeasure, H: HashFamily<Measure = S>> Index<S, H> {
    /// One search per built point for its `k` most similar other points.
    pub fn naive_lsh_join(
        &self,
        k: usize,
        recall: f32,
    ) -> Result<Vec<Vec<SearchResult>>, LshError> {
        validate_recall(recall)?;
        let built = self.built()?;
        let dataset = self.dataset();
        let params = SearchParams::new(k + 1, recall);
        info!(points = built.num_points, k, recall, "naive lsh join");
        let progress = Progress::new("naive lsh join", built.num_points);
        let lists = self.install(|| {
            (0..built.num_points)
                .into_par_iter()
                .map(|id| {
                    let mut results = self
                        .search_encoded(built, dataset.point(id), &params)
                        .into_results();
                    results.retain(|result| result.id != id);
                    results.truncate(k);
                    progress.tick();
                    results
                })
                .collect()
        });
        Ok(lists)
    }

    /// Approximate `k` most similar other points for every built point.
    pub fn lsh_join(&self, k: usize, recall: f32) -> Result<Vec<Vec<SearchResult>>, LshError> {
        self.lsh_join_with(SearchParams::new(k, recall))
    }

    pub fn lsh_join_with(&self, params: SearchParams) -> Result<Vec<Vec<SearchResult>>, LshError> {
        validate_recall(params.recall)?;
        let built = self.built()?;
        let n = built.num_points;
        let (target, delta) = params.failure_budget();
        let mut tops: Vec<TopK<usize>> = (0..n).map(|_| TopK::new(params.k)).collect();
        if params.k == 0 || n < 2 || built.tables.is_empty() {
            return Ok(tops.into_iter().map(|top| top.into_results()).collect());
        }
        info!(points = n, k = params.k, recall = params.recall, "lsh join");
        let mut active: RoaringBitmap = (0..n as u32).collect();
        let bits = built.hash_source.bits_per_repetition();
        let tables = built.tables.len();

        for prefix in (0..=bits).rev() {
            for rep in 0..tables {
                let pairs = self.install(|| {
                    self.collect_pairs(
                        built,
                        prefix,
                        rep,
                        params.filter,
                        delta,
                        |a, b| active.contains(a as u32) || active.contains(b as u32),
                        |a, b| min_threshold(tops[a].threshold(), tops[b].threshold()),
                    )
                });
                for (a, b, similarity) in pairs {
                    tops[a].insert(b, similarity);
                    tops[b].insert(a, similarity);
                }
            }

            let finished: Vec<u32> = active
                .iter()
                .filter(|&id| {
                    tops[id as usize].threshold().is_some_and(|kth| {
                        built.hash_source.failure_probability(kth, tables, prefix) <= target
                    })
                })
                .collect();
            for id in finished {
                active.remove(id);
            }
            debug!(prefix, active = active.len(), "lsh join level done");
            if active.is_empty() {
                break;
            }
        }

        Ok(tops.into_iter().map(|top| top.into_results()).collect())
    }

    /// Approximate `k` most similar pairs among the built points.
    pub fn global_lsh_join(&self, k: usize, recall: f32) -> Result<Vec<PairResult>, LshError> {
        self.global_lsh_join_with(SearchParams::new(k, recall))
    }

    pub fn global_lsh_join_with(&self, params: SearchParams) -> Result<Vec<PairResult>, LshError> {
        validate_recall(params.recall)?;
        let built = self.built()?;
        let n = built.num_points;
        let (target, delta) = params.failure_budget();
        let mut top: TopK<(usize, usize)> = TopK::new(params.k);
        if params.k == 0 || n < 2 || built.tables.is_empty() {
            return Ok(top.into_results());
        }
        info!(points = n, k = params.k, recall = params.recall, "global lsh join");
        let bits = built.hash_source.bits_per_repetition();
        let tables = built.tables.len();

        for prefix in (0..=bits).rev() {
            for rep in 0..tables {
                let threshold = top.threshold();
                let pairs = self.install(|| {
                    self.collect_pairs(
                        built,
                        prefix,
                        rep,
                        params.filter,
                        delta,
                        |_, _| true,
                        |_, _| threshold,
                    )
                });
                for (a, b, similarity) in pairs {
                    top.insert((a, b), similarity);
                }
            }

            let done = top.threshold().is_some_and(|kth| {
                built.hash_source.failure_probability(kth, tables, prefix) <= target
            });
            debug!(prefix, threshold = ?top.threshold(), "global lsh join level done");
            if done {
                break;
            }
        }

        Ok(top.into_results())
    }

    /// Pairs `(a, b)`, `a < b`, assigned to table `rep` at `prefix`, with
    /// their exact similarity.
    ///
    /// `wanted` selects pairs worth evaluating, `threshold` gives the
    /// similarity a pair has to beat for the sketch filter.
    #[allow(clippy::too_many_arguments)]
    fn collect_pairs<W, T>(
        &self,
        built: &BuiltIndex<S, H>,
        prefix: usize,
        rep: usize,
        filter: FilterType,
        delta: f32,
        wanted: W,
        threshold: T,
    ) -> Vec<(usize, usize, f32)>
    where
        W: Fn(usize, usize) -> bool + Sync,
        T: Fn(usize, usize) -> Option<f32> + Sync,
    {
        let table = &built.tables[rep];
        let dedup = &built.deduplicator;
        let bits = built.hash_source.bits_per_repetition();
        let dataset = self.dataset();
        let sketch_family = self.sketch_family();

        let evaluate = |a: usize, b: usize| -> Option<(usize, usize, f32)> {
            let (a, b) = (a.min(b), a.max(b));
            if !wanted(a, b) || !assigned_here(dedup, a, b, prefix, bits, rep) {
                return None;
            }
            if filter == FilterType::Sketch {
                if let Some(kth) = threshold(a, b) {
                    let bound = built.sketches[a]
                        .collision_probability_upper_bound(&built.sketches[b], delta);
                    if bound < sketch_family.collision_probability(kth) {
                        return None;
                    }
                }
            }
            Some((a, b, dataset.similarity(a, b)))
        };
        let evaluate = &evaluate;

        table
            .buckets(prefix)
            .into_par_iter()
            .flat_map(|bucket| {
                let ids = table.indices(bucket);
                (0..ids.len()).into_par_iter().flat_map_iter(move |i| {
                    ids[i + 1..]
                        .iter()
                        .filter_map(move |&b| evaluate(ids[i] as usize, b as usize))
                })
            })
            .collect()
    }
}

/// Whether the pair's first collision at the longest shared prefix falls in
/// table `rep`.
fn assigned_here(
    dedup: &Deduplicator,
    a: usize,
    b: usize,
    prefix: usize,
    bits: usize,
    rep: usize,
) -> bool {
    if prefix < bits && dedup.first_collision_at(a, b, prefix + 1).is_some() {
        return false;
    }
    dedup.compute_at(a, b, prefix) == Some(rep)
}

fn min_threshold(a: Option<f32>, b: Option<f32>) -> Option<f32> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        _ => None,
    }
}
