//! Demo driver: compiles a random tree, cross-checks the compiled
//! evaluators against the interpretive traversal and reports timings for
//! both paths.
//!
//! ```text
//! treejit [depth] [features] [function_depth] [switch_depth] [samples]
//! ```
//!
//! Compiled artifacts are cached in the working directory, so a second run
//! with the same parameters skips code generation.

use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use treejit::{CompiledResolver, DecisionTree, ResolverConfig};

fn arg(args: &mut env::Args, default: u32) -> u32 {
    match args.next() {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            eprintln!("not a number: {raw}");
            process::exit(2);
        }),
        None => default,
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = env::args();
    args.next(); // program name
    let depth = arg(&mut args, 8);
    let features = arg(&mut args, 5);
    let function_depth = arg(&mut args, 4);
    let switch_depth = arg(&mut args, 2);
    let samples = arg(&mut args, 10_000) as usize;

    let mut rng = StdRng::seed_from_u64(depth as u64 ^ (features as u64) << 8);
    let tree = DecisionTree::random(depth, features, &mut rng);
    println!(
        "tree: depth {depth}, {} nodes, {features} features",
        tree.node_count()
    );

    let started = Instant::now();
    let resolver = match CompiledResolver::new(
        tree,
        ResolverConfig {
            feature_count: features,
            function_depth,
            switch_depth,
            cache_dir: Some(PathBuf::from(".")),
        },
    ) {
        Ok(resolver) => resolver,
        Err(e) => {
            eprintln!("compilation failed: {e}");
            process::exit(1);
        }
    };
    let functions = treejit::jit::layout::num_evaluators(depth, function_depth);
    println!(
        "{} in {:.1?} ({functions} functions, fd {function_depth}, sd {switch_depth})",
        if resolver.loaded_from_cache() {
            "loaded from cache"
        } else {
            "compiled"
        },
        started.elapsed(),
    );

    let inputs: Vec<Vec<f32>> = (0..samples)
        .map(|_| (0..features).map(|_| rng.gen::<f32>()).collect())
        .collect();

    // Every sample must agree with the interpreter before timing anything.
    for input in &inputs {
        let compiled = resolver.run(input);
        let interpreted = resolver.tree().traverse(input);
        assert_eq!(compiled, interpreted, "compiled/interpreted divergence");
    }
    println!("verified {samples} samples against the interpreter");

    let started = Instant::now();
    let mut checksum = 0i64;
    for input in &inputs {
        checksum = checksum.wrapping_add(resolver.tree().traverse(input));
    }
    let interpreted = started.elapsed();

    let started = Instant::now();
    let mut compiled_checksum = 0i64;
    for input in &inputs {
        compiled_checksum = compiled_checksum.wrapping_add(resolver.run(input));
    }
    let compiled = started.elapsed();
    assert_eq!(checksum, compiled_checksum);

    println!("interpreter: {interpreted:.1?}  compiled: {compiled:.1?}");
}
