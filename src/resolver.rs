//! Compiled tree resolver.
//!
//! [`CompiledResolver`] is the run-time face of the crate: it owns a tree
//! together with its compiled evaluators and walks them to answer queries.
//! Construction either loads the evaluators from the on-disk object cache
//! or compiles them and populates the cache for the next process.

use std::collections::HashMap;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::jit::cache::{LoadedCode, ObjectCache};
use crate::jit::compiler::{evaluator_symbol, CompiledEvaluators, JitCompiler, SubtreeEvaluatorFn};
use crate::jit::layout::evaluator_roots;
use crate::jit::types::{JitError, JitResult, MAX_SWITCH_LEVELS};
use crate::tree::DecisionTree;

/// Compilation parameters for a resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Number of features in the input vectors; part of the cache key.
    pub feature_count: u32,
    /// Tree levels evaluated per compiled function. Must divide the tree
    /// depth.
    pub function_depth: u32,
    /// Tree levels collapsed into one condition-vector switch. Must divide
    /// `function_depth`; at most [`MAX_SWITCH_LEVELS`].
    pub switch_depth: u32,
    /// Directory for the object cache, or None to compile in memory only.
    pub cache_dir: Option<PathBuf>,
}

/// Whatever keeps the evaluator machine code alive.
enum CodeBacking {
    /// Freshly compiled: the JIT module owns the code.
    Jit(#[allow(dead_code)] CompiledEvaluators),
    /// Loaded from the object cache: the mapping owns the code.
    Cache(#[allow(dead_code)] LoadedCode),
}

/// A decision tree with JIT-compiled evaluators.
pub struct CompiledResolver {
    tree: DecisionTree,
    evaluators: HashMap<i64, SubtreeEvaluatorFn>,
    backing: CodeBacking,
    compiled_functions: usize,
}

// SAFETY: after construction the resolver is immutable. Evaluator code is
// read-only executable memory owned by the backing, and the evaluators
// themselves only read their input argument, so concurrent `run` calls from
// many threads are sound.
unsafe impl Send for CompiledResolver {}
unsafe impl Sync for CompiledResolver {}

impl CompiledResolver {
    /// Compiles (or cache-loads) the evaluators for `tree`.
    ///
    /// Panics when the configuration violates the partitioning contract:
    /// `function_depth` must divide the tree depth, `switch_depth` must
    /// divide `function_depth` and stay within [`MAX_SWITCH_LEVELS`], and
    /// `feature_count` must be positive.
    pub fn new(tree: DecisionTree, config: ResolverConfig) -> JitResult<Self> {
        let depth = tree.depth();
        assert!(
            config.function_depth >= 1 && depth % config.function_depth == 0,
            "function depth {} does not divide tree depth {depth}",
            config.function_depth
        );
        assert!(
            config.switch_depth >= 1 && config.function_depth % config.switch_depth == 0,
            "switch depth {} does not divide function depth {}",
            config.switch_depth,
            config.function_depth
        );
        assert!(
            config.switch_depth <= MAX_SWITCH_LEVELS,
            "switch depth {} exceeds the supported maximum {MAX_SWITCH_LEVELS}",
            config.switch_depth
        );
        assert!(config.feature_count > 0, "need at least one feature");

        let compiler = JitCompiler::new()?;
        let cache = config.cache_dir.as_ref().map(|dir| {
            ObjectCache::new(
                dir,
                depth,
                config.feature_count,
                config.function_depth,
                config.switch_depth,
            )
        });

        if let Some(cache) = &cache {
            match cache.load(&tree, compiler.triple()) {
                Ok(Some(code)) => match Self::collect_cached(&tree, &config, &code) {
                    Ok(evaluators) => {
                        return Ok(Self {
                            tree,
                            evaluators,
                            backing: CodeBacking::Cache(code),
                            compiled_functions: 0,
                        });
                    }
                    Err(e) => {
                        warn!(target: "treejit::jit::cache", error = %e, "cached object unusable, recompiling");
                    }
                },
                Ok(None) => {
                    debug!(target: "treejit::jit::cache", "object cache miss, compiling");
                }
                Err(e) => {
                    warn!(target: "treejit::jit::cache", error = %e, "object cache unusable, recompiling");
                }
            }
        }

        let compiled = compiler.compile_tree(&tree, config.function_depth, config.switch_depth)?;
        if let Some(cache) = &cache {
            match compiled.artifact() {
                Some(functions) => {
                    if let Err(e) = cache.store(&tree, compiled.triple(), functions) {
                        warn!(target: "treejit::jit::cache", error = %e, "failed to write object cache, continuing in memory");
                    }
                }
                None => {
                    debug!(target: "treejit::jit::cache", "compiled code not cacheable, skipping cache write");
                }
            }
        }

        let evaluators = compiled.evaluators().clone();
        let compiled_functions = evaluators.len();
        Ok(Self {
            tree,
            evaluators,
            backing: CodeBacking::Jit(compiled),
            compiled_functions,
        })
    }

    /// Looks up every expected evaluator symbol in a loaded cache object.
    fn collect_cached(
        tree: &DecisionTree,
        config: &ResolverConfig,
        code: &LoadedCode,
    ) -> JitResult<HashMap<i64, SubtreeEvaluatorFn>> {
        let roots = evaluator_roots(tree.depth(), config.function_depth);
        let mut evaluators = HashMap::with_capacity(roots.len());
        for root in roots {
            let name = evaluator_symbol(root);
            let ptr = code
                .symbol(&name)
                .ok_or_else(|| JitError::MissingEvaluator(name))?;
            // SAFETY: the cached function was compiled with exactly this
            // signature; its code stays alive as long as `code` does.
            let evaluator = unsafe { std::mem::transmute::<*const u8, SubtreeEvaluatorFn>(ptr) };
            evaluators.insert(root, evaluator);
        }
        Ok(evaluators)
    }

    /// Walks the compiled evaluators from the root and returns the leaf
    /// index the input reaches.
    ///
    /// No bounds check is performed on `input`: it must cover every feature
    /// index the tree references.
    pub fn run(&self, input: &[f32]) -> i64 {
        let first_leaf = self.tree.first_leaf_index();
        let data = input.as_ptr();
        let mut idx = 0i64;
        while idx < first_leaf {
            let evaluator = self.evaluators[&idx];
            // SAFETY: evaluator code is alive (owned by self.backing) and
            // reads only features the tree names, which `input` covers per
            // this method's contract.
            idx = unsafe { evaluator(data) };
        }
        idx
    }

    pub fn tree(&self) -> &DecisionTree {
        &self.tree
    }

    /// True when the evaluators came from the on-disk object cache.
    pub fn loaded_from_cache(&self) -> bool {
        matches!(self.backing, CodeBacking::Cache(_))
    }

    /// Number of functions compiled for this instance; zero on a cache hit.
    pub fn compiled_function_count(&self) -> usize {
        self.compiled_functions
    }
}
