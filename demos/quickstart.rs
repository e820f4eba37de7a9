use lshjoin::{CosineIndex, CrossPolytopeArgs, IndexConfig};
use rand::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(42);
    let dim = 64;

    // Generate 10,000 random vectors
    let dataset: Vec<Vec<f32>> = (0..10_000)
        .map(|_| (0..dim).map(|_| rng.gen::<f32>() * 2.0 - 1.0).collect())
        .collect();

    // Cross-polytope tables within a 64 MiB budget
    let config = IndexConfig::<CrossPolytopeArgs>::new(64 << 20).with_seed(42);
    let mut index = CosineIndex::new(dim, config)?;
    for point in &dataset {
        index.insert(point.as_slice())?;
    }
    index.rebuild(true)?;
    println!(
        "{} tables, {} bytes planned",
        index.num_tables(),
        index.memory_usage()
    );

    // Top 10 neighbours, each found with probability at least 0.9
    let results = index.search(dataset[0].as_slice(), 10, 0.9)?;
    println!(
        "Top neighbor ID: {}, similarity: {}",
        results[0].id, results[0].similarity
    );

    // Five most similar pairs in the whole dataset
    for pair in index.global_lsh_join(5, 0.9)? {
        println!("{:?}: {}", pair.pair, pair.similarity);
    }
    Ok(())
}
