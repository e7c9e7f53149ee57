//! treejit - JIT specializing compiler for perfect binary decision trees
//!
//! Traversing a deep decision tree one node at a time is a long chain of
//! data-dependent branches. treejit instead compiles a tree to native code
//! specialized for its exact shape and thresholds: the tree is partitioned
//! into subtrees of `function_depth` levels, each compiled to one evaluator
//! function, and within an evaluator `switch_depth` levels of predicates
//! are evaluated in parallel into a condition vector that a single
//! multi-way switch dispatches on.
//!
//! # Architecture
//!
//! 1. **Tree model** (`tree` module)
//!    - Perfect binary tree of predicate nodes, breadth-first storage
//!    - Reference interpretive traversal (the correctness oracle)
//!
//! 2. **JIT engine** (`jit` module)
//!    - Index arithmetic and per-leaf path bitmaps feeding the emitter
//!    - Cranelift IR emission, compilation and symbol resolution
//!    - On-disk object cache keyed by tree shape and codegen parameters
//!
//! 3. **Resolver** (`resolver` module)
//!    - Compiles or cache-loads a tree's evaluators and walks them at run
//!      time: each call advances the traversal `function_depth` levels
//!
//! # Example
//!
//! ```no_run
//! use treejit::{CompiledResolver, DecisionTree, ResolverConfig};
//!
//! let mut rng = rand::thread_rng();
//! let tree = DecisionTree::random(8, 5, &mut rng);
//! let resolver = CompiledResolver::new(
//!     tree,
//!     ResolverConfig {
//!         feature_count: 5,
//!         function_depth: 4,
//!         switch_depth: 2,
//!         cache_dir: None,
//!     },
//! )?;
//!
//! let leaf = resolver.run(&[0.1, 0.9, 0.4, 0.7, 0.2]);
//! assert_eq!(leaf, resolver.tree().traverse(&[0.1, 0.9, 0.4, 0.7, 0.2]));
//! # Ok::<(), treejit::jit::JitError>(())
//! ```

pub mod jit;
pub mod resolver;
pub mod tree;

pub use resolver::{CompiledResolver, ResolverConfig};
pub use tree::{Comparator, DecisionTree, Operation, TreeNode};
