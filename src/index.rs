use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::prelude::*;
use rayon::prelude::*;
use roaring::RoaringBitmap;
use tracing::{debug, info};

use crate::config::{FilterType, IndexConfig, SearchParams};
use crate::dataset::Dataset;
use crate::deduplicator::Deduplicator;
use crate::hash::HashFamily;
use crate::hash_source::{DynamicHashSource, HashSource};
use crate::memory::{MemoryModel, MemoryPlan};
use crate::prefix_map::PrefixMap;
use crate::similarity::{Description, Elem, SimilarityMeasure};
use crate::sketch::{IndexSketch, IndexSketchSource};
use crate::topk::{SearchResult, TopK};
use crate::LshError;

/// Lifecycle of an [`Index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// No points and no build.
    Empty,
    /// Points inserted but never built; not searchable.
    Populated,
    /// Every inserted point is searchable.
    Built,
    /// Searchable, with insertions pending a rebuild.
    Stale,
}

/// Everything derived from the dataset by one rebuild.
pub(crate) struct BuiltIndex<S: SimilarityMeasure, H: HashFamily<Measure = S>> {
    pub(crate) num_points: usize,
    pub(crate) hash_source: DynamicHashSource<H>,
    pub(crate) sketch_source: IndexSketchSource<S::SketchFamily>,
    pub(crate) tables: Vec<PrefixMap>,
    pub(crate) sketches: Vec<IndexSketch>,
    pub(crate) deduplicator: Deduplicator,
    pub(crate) plan: MemoryPlan,
}

/// Multi-table LSH index with recall-targeted search.
///
/// Points become searchable only after [`Index::rebuild`]. Each rebuild
/// chooses as many tables as fit in the configured memory budget and
/// samples fresh hash functions.
pub struct Index<S: SimilarityMeasure, H: HashFamily<Measure = S>> {
    description: Description,
    config: IndexConfig<H::Args>,
    family: Arc<H>,
    sketch_family: Arc<S::SketchFamily>,
    dataset: Dataset<S>,
    built: Option<BuiltIndex<S, H>>,
    generation: u64,
    /// Dedicated workers when `num_threads` is configured, else the global
    /// rayon pool is used.
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl<S: SimilarityMeasure, H: HashFamily<Measure = S>> Index<S, H> {
    /// Create an empty index over points of `dimensions` dimensions (for
    /// Jaccard: a token universe of that size).
    pub fn new(dimensions: usize, config: IndexConfig<H::Args>) -> Result<Self, LshError> {
        let description = Description::new(dimensions)?;
        config.hash_source.validate(config.bits_per_repetition)?;
        if config.max_tables == 0 {
            return Err(LshError::InvalidConfig("max_tables must be positive"));
        }
        if config.num_threads == Some(0) {
            return Err(LshError::InvalidConfig("num_threads must be positive"));
        }
        let family = Arc::new(H::new(description, config.hash_source.hash_args.clone())?);
        let sketch_family = Arc::new(S::sketch_family(&description)?);
        let pool = config
            .num_threads
            .map(|threads| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map(Arc::new)
            })
            .transpose()?;
        Ok(Self {
            description,
            config,
            family,
            sketch_family,
            dataset: Dataset::new(description),
            built: None,
            generation: 0,
            pool,
        })
    }

    pub fn description(&self) -> &Description {
        &self.description
    }

    pub fn config(&self) -> &IndexConfig<H::Args> {
        &self.config
    }

    /// Store a point and return its id. Not searchable until the next
    /// rebuild.
    pub fn insert(&mut self, point: &S::Input) -> Result<usize, LshError> {
        self.dataset.insert(point)
    }

    /// Stored form of point `id`.
    pub fn get(&self, id: usize) -> Option<&[Elem<S>]> {
        self.dataset.get(id)
    }

    /// Number of inserted points, built or not.
    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Tables of the current build (0 before the first rebuild).
    pub fn num_tables(&self) -> usize {
        self.built.as_ref().map_or(0, |built| built.tables.len())
    }

    /// Bytes the current build was planned to use.
    pub fn memory_usage(&self) -> usize {
        self.built.as_ref().map_or(0, |built| built.plan.required)
    }

    pub fn state(&self) -> IndexState {
        match &self.built {
            None if self.dataset.is_empty() => IndexState::Empty,
            None => IndexState::Populated,
            Some(built) if built.num_points == self.dataset.len() => IndexState::Built,
            Some(_) => IndexState::Stale,
        }
    }

    pub(crate) fn dataset(&self) -> &Dataset<S> {
        &self.dataset
    }

    pub(crate) fn sketch_family(&self) -> &S::SketchFamily {
        &self.sketch_family
    }

    pub(crate) fn built(&self) -> Result<&BuiltIndex<S, H>, LshError> {
        self.built.as_ref().ok_or(LshError::NotBuilt)
    }

    /// Run `op` on the configured workers, or on the caller's pool.
    pub(crate) fn install<R: Send>(&self, op: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    fn memory_model(&self, num_points: usize) -> MemoryModel<impl Fn(usize) -> usize + '_> {
        MemoryModel {
            fixed: num_points * std::mem::size_of::<IndexSketch>()
                + IndexSketchSource::<S::SketchFamily>::expected_memory(&*self.sketch_family),
            per_table: PrefixMap::expected_memory(num_points)
                + Deduplicator::repetition_memory_usage(num_points),
            function_memory: move |tables: usize| {
                self.config.hash_source.function_memory(
                    &*self.family,
                    tables,
                    self.config.bits_per_repetition,
                )
            },
        }
    }

    /// Discard the previous build and index every inserted point.
    ///
    /// The table count is the largest that fits the memory budget. Hash
    /// functions are resampled from a seed derived from the configured one
    /// and the rebuild count.
    pub fn rebuild(&mut self, parallel: bool) -> Result<(), LshError> {
        let num_points = self.dataset.len();
        let bits = self.config.bits_per_repetition;

        let plan = if num_points == 0 {
            MemoryPlan {
                num_tables: 0,
                required: 0,
            }
        } else {
            self.memory_model(num_points)
                .plan(self.config.memory_limit, self.config.max_tables)?
        };

        self.generation += 1;
        let seed = self.config.seed ^ self.generation.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        let mut rng = StdRng::seed_from_u64(seed);
        let sketch_source =
            IndexSketchSource::<S::SketchFamily>::sample(&*self.sketch_family, &mut rng)?;
        let hash_source =
            self.config
                .hash_source
                .build(self.family.clone(), plan.num_tables, bits, &mut rng)?;

        info!(
            points = num_points,
            tables = plan.num_tables,
            bits_per_repetition = bits,
            planned_bytes = plan.required,
            memory_limit = self.config.memory_limit,
            parallel,
            "rebuilding index"
        );

        let dataset = &self.dataset;
        let build = || {
            let deduplicator = hash_points(dataset, &hash_source, plan.num_tables, parallel);

            let sketch = |id: usize| sketch_source.sketch(dataset.point(id));
            let sketches: Vec<IndexSketch> = if parallel {
                (0..num_points).into_par_iter().map(sketch).collect()
            } else {
                (0..num_points).map(sketch).collect()
            };

            let table = |rep: usize| {
                PrefixMap::build(
                    (0..num_points)
                        .map(|id| (deduplicator.get(id, rep), id as u32))
                        .collect(),
                )
            };
            let tables: Vec<PrefixMap> = if parallel {
                (0..plan.num_tables).into_par_iter().map(table).collect()
            } else {
                (0..plan.num_tables).map(table).collect()
            };

            BuiltIndex {
                num_points,
                hash_source,
                sketch_source,
                tables,
                sketches,
                deduplicator,
                plan,
            }
        };
        let built = if parallel { self.install(build) } else { build() };

        debug!(generation = self.generation, "index rebuilt");
        self.built = Some(built);
        Ok(())
    }

    /// Approximate `k` most similar built points, each true neighbour being
    /// found with probability at least `recall`.
    pub fn search(
        &self,
        query: &S::Input,
        k: usize,
        recall: f32,
    ) -> Result<Vec<SearchResult>, LshError> {
        self.search_with(query, SearchParams::new(k, recall))
    }

    pub fn search_with(
        &self,
        query: &S::Input,
        params: SearchParams,
    ) -> Result<Vec<SearchResult>, LshError> {
        validate_recall(params.recall)?;
        let built = self.built()?;
        let point = S::encode(query, &self.description)?;
        Ok(self.search_encoded(built, &point, &params).into_results())
    }

    /// Probe tables from the longest prefix down, scanning only entries
    /// newly covered at each shorter prefix, until the failure probability
    /// of the current k-th similarity drops below the target.
    pub(crate) fn search_encoded(
        &self,
        built: &BuiltIndex<S, H>,
        point: &[Elem<S>],
        params: &SearchParams,
    ) -> TopK<usize> {
        let mut top = TopK::new(params.k);
        if params.k == 0 || built.num_points == 0 || built.tables.is_empty() {
            return top;
        }
        let (target, delta) = params.failure_budget();
        let query_sketch =
            (params.filter == FilterType::Sketch).then(|| built.sketch_source.sketch(point));

        let mut codes = Vec::with_capacity(built.tables.len());
        built.hash_source.hash_repetitions(point, &mut codes);

        let mut visited = RoaringBitmap::new();
        let mut previous: Vec<Range<usize>> = vec![0..0; built.tables.len()];
        let bits = built.hash_source.bits_per_repetition();

        for prefix in (0..=bits).rev() {
            for (rep, table) in built.tables.iter().enumerate() {
                let range = table.range(codes[rep], prefix);
                let seen = &previous[rep];
                let fresh = if seen.is_empty() {
                    [range.clone(), 0..0]
                } else {
                    [range.start..seen.start, seen.end..range.end]
                };

                for part in fresh {
                    for &id in table.indices(part) {
                        if !visited.insert(id) {
                            continue;
                        }
                        let id = id as usize;
                        if let (Some(sketch), Some(kth)) = (&query_sketch, top.threshold()) {
                            let bound =
                                sketch.collision_probability_upper_bound(&built.sketches[id], delta);
                            if bound < self.sketch_family.collision_probability(kth) {
                                continue;
                            }
                        }
                        let similarity =
                            S::similarity(point, self.dataset.point(id), &self.description);
                        top.insert(id, similarity);
                    }
                }
                previous[rep] = range;

                if visited.len() as usize >= built.num_points {
                    return top;
                }
                if let Some(kth) = top.threshold() {
                    if built.hash_source.failure_probability(kth, rep + 1, prefix) <= target {
                        return top;
                    }
                }
            }
        }
        top
    }
}

/// Fill the code matrix with every repetition's code of every point.
fn hash_points<S, H>(
    dataset: &Dataset<S>,
    hash_source: &DynamicHashSource<H>,
    num_tables: usize,
    parallel: bool,
) -> Deduplicator
where
    S: SimilarityMeasure,
    H: HashFamily<Measure = S>,
{
    let num_points = dataset.len();
    let mut deduplicator = Deduplicator::new(num_points, num_tables);
    let progress = Progress::new("hashing points", num_points);
    if parallel {
        deduplicator.rows_mut().enumerate().for_each_init(
            Vec::new,
            |codes, (id, row)| {
                hash_source.hash_repetitions(dataset.point(id), codes);
                row[..codes.len()].copy_from_slice(codes);
                progress.tick();
            },
        );
    } else {
        let mut codes = Vec::with_capacity(num_tables);
        for id in 0..num_points {
            hash_source.hash_repetitions(dataset.point(id), &mut codes);
            for (rep, &code) in codes.iter().enumerate() {
                deduplicator.insert(id, rep, code);
            }
            progress.tick();
        }
    }
    deduplicator
}

pub(crate) fn validate_recall(recall: f32) -> Result<(), LshError> {
    if (0.0..=1.0).contains(&recall) {
        Ok(())
    } else {
        Err(LshError::InvalidConfig("recall must be in [0, 1]"))
    }
}

/// Shared completion counter, logged every 5%.
pub(crate) struct Progress {
    task: &'static str,
    total: usize,
    step: usize,
    completed: AtomicUsize,
}

impl Progress {
    pub(crate) fn new(task: &'static str, total: usize) -> Self {
        Self {
            task,
            total,
            step: (total / 20).max(1),
            completed: AtomicUsize::new(0),
        }
    }

    pub(crate) fn tick(&self) {
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        if completed % self.step == 0 || completed == self.total {
            debug!(
                task = self.task,
                completed,
                total = self.total,
                percent = format_args!("{:.1}", 100.0 * completed as f64 / self.total as f64),
                "progress"
            );
        }
    }
}
