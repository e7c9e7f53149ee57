//! Cranelift IR generation for subtree evaluators.
//!
//! An evaluator advances a traversal by `function_depth` levels from its
//! root node in a single call. Rather than branching once per node, it
//! evaluates `switch_depth` levels of predicates at a time into a condition
//! vector and dispatches on the vector with one multi-way switch; deeper
//! levels within the same function nest further switches inside the case
//! blocks. Every case ends by handing the continuation node index to a
//! shared merge block, which is what the function returns.

use cranelift::codegen::ir::{BlockArg, FuncRef};
use cranelift::prelude::*;

use crate::jit::layout::{subtree_node_index, tree_nodes};
use crate::jit::paths::{condition_variants, leaf_paths};
use crate::jit::types::MAX_SWITCH_LEVELS;
use crate::tree::{Comparator, DecisionTree, Operation, TreeNode};

/// IR emission context for one evaluator function.
pub struct EvaluatorCodegen<'a, 'b> {
    builder: &'a mut FunctionBuilder<'b>,
    tree: &'a DecisionTree,
    /// The function's single argument: pointer to the input feature vector.
    input_ptr: Value,
    /// Imported natural-log helper.
    ln_func: FuncRef,
}

impl<'a, 'b> EvaluatorCodegen<'a, 'b> {
    pub fn new(
        builder: &'a mut FunctionBuilder<'b>,
        tree: &'a DecisionTree,
        input_ptr: Value,
        ln_func: FuncRef,
    ) -> Self {
        Self {
            builder,
            tree,
            input_ptr,
            ln_func,
        }
    }

    /// Emits the body of the evaluator rooted at `root`: `function_depth`
    /// levels of traversal as `function_depth / switch_depth` nested
    /// condition-vector switches. Returns the continuation index value;
    /// the caller wraps it in the function's return.
    pub fn emit_evaluator(&mut self, root: i64, function_depth: u32, switch_depth: u32) -> Value {
        assert!(
            switch_depth >= 1 && function_depth % switch_depth == 0,
            "function depth {function_depth} must be a multiple of switch depth {switch_depth}"
        );
        assert!(
            switch_depth <= MAX_SWITCH_LEVELS,
            "switch depth {switch_depth} exceeds the i64 condition vector"
        );
        self.emit_subtree_switch(root, switch_depth, function_depth / switch_depth - 1)
    }

    /// One condition-vector switch over the `levels`-deep subtree at `root`,
    /// recursing into `nested` further switches inside each case.
    fn emit_subtree_switch(&mut self, root: i64, levels: u32, nested: u32) -> Value {
        let num_internal = tree_nodes(levels) as u32;
        let condition_vector = self.emit_condition_vector(root, num_internal);

        // One target block per subtree leaf; each leaf claims every vector
        // value that agrees with its path bits. The default arm is required
        // by the switch construct but unreachable: the variant sets cover
        // all 2^num_internal values.
        let merge_block = self.builder.create_block();
        self.builder.append_block_param(merge_block, types::I64);
        let unreachable_block = self.builder.create_block();

        let paths = leaf_paths(root, levels);
        let mut switch = cranelift_frontend::Switch::new();
        let mut case_blocks = Vec::with_capacity(paths.len());
        for path in &paths {
            let block = self.builder.create_block();
            for variant in condition_variants(num_internal, &path.bits) {
                switch.set_entry(variant as u128, block);
            }
            case_blocks.push(block);
        }
        switch.emit(self.builder, condition_vector, unreachable_block);

        for (path, block) in paths.iter().zip(case_blocks) {
            self.builder.switch_to_block(block);
            self.builder.seal_block(block);
            let continuation = if nested > 0 {
                self.emit_subtree_switch(path.node_idx, levels, nested - 1)
            } else {
                self.builder.ins().iconst(types::I64, path.node_idx)
            };
            self.builder
                .ins()
                .jump(merge_block, &[BlockArg::Value(continuation)]);
        }

        self.builder.switch_to_block(unreachable_block);
        self.builder.seal_block(unreachable_block);
        self.builder.ins().trap(TrapCode::unwrap_user(1));

        self.builder.seal_block(merge_block);
        self.builder.switch_to_block(merge_block);
        self.builder.block_params(merge_block)[0]
    }

    /// Evaluates all `num_internal` predicates of the subtree at `root` and
    /// packs the outcomes into an i64: bit b holds the outcome of the node
    /// at bit offset b.
    fn emit_condition_vector(&mut self, root: i64, num_internal: u32) -> Value {
        let mut vector = self.builder.ins().iconst(types::I64, 0);
        for bit_offset in 0..num_internal {
            let node_idx = subtree_node_index(root, bit_offset);
            let outcome = self.emit_node_predicate(self.tree.node(node_idx));
            let outcome_wide = self.builder.ins().uextend(types::I64, outcome);
            let positioned = self.builder.ins().ishl_imm(outcome_wide, bit_offset as i64);
            vector = self.builder.ins().bor(vector, positioned);
        }
        vector
    }

    /// Loads the node's feature, applies its operation and compares against
    /// the bias. Comparisons are ordered, so NaN features produce false.
    fn emit_node_predicate(&mut self, node: &TreeNode) -> Value {
        let offset = node.feature_idx as i32 * 4;
        let feature =
            self.builder
                .ins()
                .load(types::F32, MemFlags::trusted(), self.input_ptr, offset);

        let comparable = match node.op {
            Operation::Bypass => feature,
            Operation::Sqrt => self.builder.ins().sqrt(feature),
            Operation::Ln => {
                let call = self.builder.ins().call(self.ln_func, &[feature]);
                self.builder.inst_results(call)[0]
            }
        };

        let bias = self.builder.ins().f32const(node.bias);
        let condition = match node.comparator {
            Comparator::LessThan => FloatCC::LessThan,
            Comparator::GreaterThan => FloatCC::GreaterThan,
        };
        self.builder.ins().fcmp(condition, comparable, bias)
    }
}
