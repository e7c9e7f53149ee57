//! Interpretive vs. compiled traversal across tree depths.
//!
//! Mirrors the shape of the original comparison runs: a handful of depths
//! over a small feature vector, each measured for the interpreter and for
//! the compiled evaluators.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use treejit::{CompiledResolver, DecisionTree, ResolverConfig};

const FEATURES: u32 = 5;

fn bench_traversal(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1234);
    let mut group = c.benchmark_group("traversal");

    for (depth, function_depth, switch_depth) in [(3, 3, 1), (4, 4, 2), (6, 3, 3), (8, 4, 2)] {
        let tree = DecisionTree::random(depth, FEATURES, &mut rng);
        let resolver = CompiledResolver::new(
            tree,
            ResolverConfig {
                feature_count: FEATURES,
                function_depth,
                switch_depth,
                cache_dir: None,
            },
        )
        .expect("compilation failed");

        let inputs: Vec<Vec<f32>> = (0..256)
            .map(|_| (0..FEATURES).map(|_| rng.gen::<f32>()).collect())
            .collect();

        let mut cursor = 0usize;
        group.bench_function(format!("interpreter_d{depth}"), |b| {
            b.iter(|| {
                cursor = (cursor + 1) % inputs.len();
                black_box(resolver.tree().traverse(black_box(&inputs[cursor])))
            })
        });

        let mut cursor = 0usize;
        group.bench_function(format!("compiled_d{depth}_fd{function_depth}_sd{switch_depth}"), |b| {
            b.iter(|| {
                cursor = (cursor + 1) % inputs.len();
                black_box(resolver.run(black_box(&inputs[cursor])))
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_traversal);
criterion_main!(benches);
