use std::collections::HashSet;

use rand::prelude::*;

use crate::hash_source::HashSourceArgs;
use crate::{
    Cosine, CosineIndex, CrossPolytopeArgs, FilterType, Index, IndexConfig, IndexState, Jaccard,
    JaccardIndex, LshError, MinHashArgs, SearchParams, SearchResult, SimHash, SimHashArgs,
};

fn random_vector(dim: usize, rng: &mut StdRng) -> Vec<f32> {
    (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect()
}

fn random_set(universe: u32, len: usize, rng: &mut StdRng) -> Vec<u32> {
    (0..len).map(|_| rng.gen_range(0..universe)).collect()
}

fn simhash_config(memory_limit: usize) -> IndexConfig<SimHashArgs> {
    IndexConfig::<SimHashArgs>::new(memory_limit)
        .with_max_tables(100)
        .with_seed(42)
}

fn simhash_index(points: &[Vec<f32>], config: IndexConfig<SimHashArgs>) -> Index<Cosine, SimHash> {
    let mut index = Index::new(points[0].len(), config).unwrap();
    for point in points {
        index.insert(point.as_slice()).unwrap();
    }
    index.rebuild(true).unwrap();
    index
}

fn ids(results: &[SearchResult]) -> Vec<usize> {
    results.iter().map(|r| r.id).collect()
}

/// Fraction of `expected` ids present in `found`.
fn recall_of(found: &[SearchResult], expected: &[SearchResult]) -> f32 {
    if expected.is_empty() {
        return 1.0;
    }
    let found: HashSet<usize> = found.iter().map(|r| r.id).collect();
    let hits = expected.iter().filter(|r| found.contains(&r.id)).count();
    hits as f32 / expected.len() as f32
}

fn join_recall(found: &[Vec<SearchResult>], expected: &[Vec<SearchResult>]) -> f32 {
    let total: f32 = found
        .iter()
        .zip(expected)
        .map(|(f, e)| recall_of(f, e))
        .sum();
    total / expected.len() as f32
}

#[test]
fn cosine_self_queries_return_the_point_itself() {
    let dim = 16;
    for seed in [7u64, 11, 13] {
        let mut rng = StdRng::seed_from_u64(seed);
        let points: Vec<Vec<f32>> = (0..1000).map(|_| random_vector(dim, &mut rng)).collect();
        let index = simhash_index(&points, simhash_config(16 << 20).with_seed(seed));

        let hits = (0..100)
            .filter(|&id| {
                let results = index.search(&points[id], 10, 0.9).unwrap();
                results.first().map(|r| r.id) == Some(id)
            })
            .count();
        assert!(hits >= 90, "seed {seed}: only {hits} of 100 self matches");
    }
}

#[test]
fn search_recall_meets_target_on_average() {
    let dim = 16;
    let mut rng = StdRng::seed_from_u64(1234);
    let points: Vec<Vec<f32>> = (0..2000).map(|_| random_vector(dim, &mut rng)).collect();
    let index = simhash_index(&points, simhash_config(16 << 20));
    assert_eq!(index.state(), IndexState::Built);
    assert!(index.num_tables() > 1);

    let mut total = 0.0;
    let queries = 100;
    for _ in 0..queries {
        let query = random_vector(dim, &mut rng);
        let exact = index.search_bf(&query, 10).unwrap();
        let approx = index.search(&query, 10, 0.9).unwrap();
        assert!(approx.len() <= 10);
        assert!(approx.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        total += recall_of(&approx, &exact);
    }
    let recall = total / queries as f32;
    assert!(recall >= 0.75, "average recall {recall}");
}

#[test]
fn full_recall_search_is_exact() {
    let dim = 8;
    let mut rng = StdRng::seed_from_u64(5);
    let points: Vec<Vec<f32>> = (0..300).map(|_| random_vector(dim, &mut rng)).collect();
    let index = simhash_index(&points, simhash_config(16 << 20).with_max_tables(1));

    let params = SearchParams::new(10, 1.0).with_filter(FilterType::None);
    for _ in 0..20 {
        let query = random_vector(dim, &mut rng);
        let exact = index.search_bf(&query, 10).unwrap();
        let approx = index.search_with(&query, params).unwrap();
        assert_eq!(ids(&approx), ids(&exact));
    }
}

#[test]
fn bf_join_matches_reference_computation() {
    let dim = 8;
    let mut rng = StdRng::seed_from_u64(99);
    let points: Vec<Vec<f32>> = (0..50).map(|_| random_vector(dim, &mut rng)).collect();
    let index = simhash_index(&points, simhash_config(1 << 20));

    let normalize = |v: &[f32]| {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        v.iter().map(|x| x / norm).collect::<Vec<f32>>()
    };
    let unit: Vec<Vec<f32>> = points.iter().map(|p| normalize(p)).collect();

    let lists = index.bf_join(5).unwrap();
    assert_eq!(lists.len(), points.len());
    for (a, list) in lists.iter().enumerate() {
        let mut reference: Vec<(usize, f32)> = (0..points.len())
            .filter(|&b| b != a)
            .map(|b| {
                let dot: f32 = unit[a].iter().zip(&unit[b]).map(|(x, y)| x * y).sum();
                (b, dot)
            })
            .collect();
        reference.sort_by(|x, y| y.1.total_cmp(&x.1));
        assert_eq!(list.len(), 5);
        for (result, (id, similarity)) in list.iter().zip(&reference) {
            assert_eq!(result.id, *id);
            assert!((result.similarity - similarity).abs() < 1e-4);
        }
    }
}

#[test]
fn bf_join_is_unaffected_by_rebuilds() {
    let dim = 8;
    let mut rng = StdRng::seed_from_u64(3);
    let points: Vec<Vec<f32>> = (0..60).map(|_| random_vector(dim, &mut rng)).collect();
    let mut index = simhash_index(&points, simhash_config(1 << 20));

    let first = index.bf_join(4).unwrap();
    index.rebuild(false).unwrap();
    let second = index.bf_join(4).unwrap();
    assert_eq!(first.len(), second.len());
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(ids(a), ids(b));
    }
}

#[test]
fn same_seed_gives_same_results() {
    let dim = 12;
    let mut rng = StdRng::seed_from_u64(17);
    let points: Vec<Vec<f32>> = (0..500).map(|_| random_vector(dim, &mut rng)).collect();
    let left = simhash_index(&points, simhash_config(4 << 20));
    let right = simhash_index(&points, simhash_config(4 << 20).with_num_threads(2));
    assert_eq!(left.num_tables(), right.num_tables());

    for _ in 0..10 {
        let query = random_vector(dim, &mut rng);
        let a = left.search(&query, 5, 0.8).unwrap();
        let b = right.search(&query, 5, 0.8).unwrap();
        assert_eq!(ids(&a), ids(&b));
    }
}

#[test]
fn full_recall_joins_are_exact() {
    let dim = 8;
    let mut rng = StdRng::seed_from_u64(21);
    let points: Vec<Vec<f32>> = (0..80).map(|_| random_vector(dim, &mut rng)).collect();
    let index = simhash_index(&points, simhash_config(1 << 20).with_max_tables(1));
    let params = SearchParams::new(3, 1.0).with_filter(FilterType::None);

    let exact = index.bf_join(3).unwrap();
    let approx = index.lsh_join_with(params).unwrap();
    assert_eq!(approx.len(), exact.len());
    for (a, e) in approx.iter().zip(&exact) {
        assert_eq!(ids(a), ids(e));
    }

    let exact_pairs = index.global_bf_join(10).unwrap();
    let approx_pairs = index
        .global_lsh_join_with(SearchParams::new(10, 1.0).with_filter(FilterType::None))
        .unwrap();
    let pairs = |v: &[crate::PairResult]| v.iter().map(|p| p.pair).collect::<Vec<_>>();
    assert_eq!(pairs(&approx_pairs), pairs(&exact_pairs));
}

#[test]
fn lsh_join_recall_against_brute_force() {
    let dim = 16;
    let mut rng = StdRng::seed_from_u64(808);
    let points: Vec<Vec<f32>> = (0..600).map(|_| random_vector(dim, &mut rng)).collect();
    let index = simhash_index(&points, simhash_config(8 << 20));

    let exact = index.bf_join(5).unwrap();
    let approx = index.lsh_join(5, 0.9).unwrap();
    assert_eq!(approx.len(), points.len());
    for (id, list) in approx.iter().enumerate() {
        assert!(list.len() <= 5);
        assert!(list.iter().all(|r| r.id != id));
        assert!(list.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    }
    let recall = join_recall(&approx, &exact);
    assert!(recall >= 0.75, "lsh join recall {recall}");

    let naive = index.naive_lsh_join(5, 0.9).unwrap();
    assert!(naive.iter().enumerate().all(|(id, l)| l.iter().all(|r| r.id != id)));
    let recall = join_recall(&naive, &exact);
    assert!(recall >= 0.75, "naive lsh join recall {recall}");
}

#[test]
fn global_lsh_join_finds_planted_pairs() {
    let dim = 16;
    let mut rng = StdRng::seed_from_u64(4242);
    let mut points: Vec<Vec<f32>> = (0..400).map(|_| random_vector(dim, &mut rng)).collect();
    // near copies of the first five points
    for id in 0..5 {
        let copy: Vec<f32> = points[id].iter().map(|x| x + 0.01 * (rng.gen::<f32>() - 0.5)).collect();
        points.push(copy);
    }
    let index = simhash_index(&points, simhash_config(8 << 20));

    let exact = index.global_bf_join(5).unwrap();
    let expected: HashSet<(usize, usize)> = (0..5).map(|id| (id, 400 + id)).collect();
    assert_eq!(exact.iter().map(|p| p.pair).collect::<HashSet<_>>(), expected);

    let approx = index.global_lsh_join(5, 0.9).unwrap();
    assert!(approx.iter().all(|p| p.pair.0 < p.pair.1));
    let found = approx.iter().filter(|p| expected.contains(&p.pair)).count();
    assert!(found >= 4, "found {found} of 5 planted pairs");
}

#[test]
fn cross_polytope_cosine_index() {
    let dim = 32;
    let mut rng = StdRng::seed_from_u64(77);
    let points: Vec<Vec<f32>> = (0..1000).map(|_| random_vector(dim, &mut rng)).collect();
    let config = IndexConfig::<CrossPolytopeArgs>::new(16 << 20)
        .with_max_tables(64)
        .with_seed(9);
    let mut index = CosineIndex::new(dim, config).unwrap();
    for point in &points {
        index.insert(point.as_slice()).unwrap();
    }
    index.rebuild(true).unwrap();
    assert!(index.memory_usage() <= 16 << 20);

    let hits = (0..50)
        .filter(|&id| index.search(&points[id], 5, 0.9).unwrap()[0].id == id)
        .count();
    assert!(hits >= 45, "only {hits} of 50 self matches");

    let mut total = 0.0;
    for _ in 0..50 {
        let query = random_vector(dim, &mut rng);
        let exact = index.search_bf(&query, 10).unwrap();
        total += recall_of(&index.search(&query, 10, 0.9).unwrap(), &exact);
    }
    let recall = total / 50.0;
    assert!(recall >= 0.6, "cross-polytope recall {recall}");
}

#[test]
fn tensored_source_search() {
    let dim = 16;
    let mut rng = StdRng::seed_from_u64(31);
    let points: Vec<Vec<f32>> = (0..1500).map(|_| random_vector(dim, &mut rng)).collect();
    let config = simhash_config(16 << 20)
        .with_hash_source(HashSourceArgs::tensored(SimHashArgs::default()));
    let index = simhash_index(&points, config);

    let hits = (0..50)
        .filter(|&id| index.search(&points[id], 10, 0.9).unwrap()[0].id == id)
        .count();
    assert!(hits >= 45, "only {hits} of 50 self matches");

    let mut total = 0.0;
    for _ in 0..50 {
        let query = random_vector(dim, &mut rng);
        let exact = index.search_bf(&query, 10).unwrap();
        total += recall_of(&index.search(&query, 10, 0.9).unwrap(), &exact);
    }
    let recall = total / 50.0;
    assert!(recall >= 0.7, "tensored recall {recall}");
}

#[test]
fn pooled_source_meets_recall_target() {
    let dim = 24;
    let mut rng = StdRng::seed_from_u64(606);
    let points: Vec<Vec<f32>> = (0..800).map(|_| random_vector(dim, &mut rng)).collect();
    // fewer pool functions than a single repetition uses
    let config = simhash_config(8 << 20)
        .with_hash_source(HashSourceArgs::pooled(16, SimHashArgs::default()));
    let index = simhash_index(&points, config);

    let mut total = 0.0;
    let queries = 100;
    for _ in 0..queries {
        let query = random_vector(dim, &mut rng);
        let exact = index.search_bf(&query, 10).unwrap();
        total += recall_of(&index.search(&query, 10, 0.9).unwrap(), &exact);
    }
    let recall = total / queries as f32;
    assert!(recall >= 0.9, "pooled recall {recall}");
}

#[test]
fn jaccard_join_finds_overlapping_sets() {
    let universe = 5000;
    let mut rng = StdRng::seed_from_u64(2024);
    let mut index = JaccardIndex::new(universe as usize, IndexConfig::<MinHashArgs>::new(8 << 20))
        .unwrap();
    // groups of five sets sharing most tokens
    for _ in 0..60 {
        let base = random_set(universe, 40, &mut rng);
        for _ in 0..5 {
            let mut set = base.clone();
            set.truncate(32);
            set.extend(random_set(universe, 8, &mut rng));
            index.insert(&set).unwrap();
        }
    }
    index.rebuild(true).unwrap();

    let exact = index.bf_join(4).unwrap();
    let approx = index.lsh_join(4, 0.9).unwrap();
    let recall = join_recall(&approx, &exact);
    assert!(recall >= 0.75, "jaccard join recall {recall}");

    let query = index.get(7).unwrap().to_vec();
    let results = index.search(&query, 5, 0.9).unwrap();
    assert_eq!(results[0].id, 7);
    assert_eq!(results[0].similarity, 1.0);
}

#[test]
fn jaccard_rejects_out_of_range_tokens() {
    let mut index = Index::<Jaccard, crate::MinHash>::new(100, IndexConfig::new(1 << 20)).unwrap();
    assert!(matches!(
        index.insert(&[3, 100]),
        Err(LshError::DimensionMismatch { expected: 100, got: 101 })
    ));
    assert!(index.is_empty());
}

#[test]
fn joins_require_a_build() {
    let mut index = Index::<Cosine, SimHash>::new(4, simhash_config(1 << 20)).unwrap();
    index.insert(&[1.0, 0.0, 0.0, 0.0]).unwrap();
    index.insert(&[0.0, 1.0, 0.0, 0.0]).unwrap();
    assert!(matches!(index.lsh_join(1, 0.9), Err(LshError::NotBuilt)));
    assert!(matches!(index.global_lsh_join(1, 0.9), Err(LshError::NotBuilt)));
    assert!(matches!(index.naive_lsh_join(1, 0.9), Err(LshError::NotBuilt)));
    // exact joins work on the inserted points directly
    assert_eq!(index.bf_join(1).unwrap()[0][0].id, 1);
}

#[test]
fn tiny_budget_is_rejected() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut index = Index::<Cosine, SimHash>::new(8, simhash_config(100)).unwrap();
    for _ in 0..1000 {
        index.insert(random_vector(8, &mut rng).as_slice()).unwrap();
    }
    match index.rebuild(false) {
        Err(LshError::InsufficientMemory {
            required,
            available,
        }) => {
            assert!(required > available);
            assert_eq!(available, 100);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(index.state(), IndexState::Populated);
}

#[test]
fn larger_budget_gives_more_tables() {
    let mut rng = StdRng::seed_from_u64(8);
    let points: Vec<Vec<f32>> = (0..1000).map(|_| random_vector(8, &mut rng)).collect();
    let small = simhash_index(&points, simhash_config(200 << 10).with_max_tables(1024));
    let large = simhash_index(&points, simhash_config(2 << 20).with_max_tables(1024));
    assert!(small.num_tables() >= 1);
    assert!(large.num_tables() > small.num_tables());
    assert!(small.memory_usage() <= 200 << 10);
    assert!(large.memory_usage() <= 2 << 20);
}
