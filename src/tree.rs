//! Decision tree model.
//!
//! A [`DecisionTree`] is a perfect binary tree of predicate nodes stored
//! breadth-first: depth D gives 2^D - 1 internal nodes at indices
//! [0, 2^D - 1), with node i branching to 2i+1 on a false outcome and 2i+2
//! on a true outcome. The 2^D leaves occupy the next index range
//! [2^D - 1, 2^(D+1) - 1) and carry no data; a traversal's result is the
//! leaf index it reaches. Trees are immutable once built.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Transformation applied to a feature value before comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Use the feature value unchanged.
    Bypass,
    /// Square root of the feature value.
    Sqrt,
    /// Natural logarithm of the feature value.
    Ln,
}

impl Operation {
    /// Applies the transformation to a feature value.
    pub fn apply(self, value: f32) -> f32 {
        match self {
            Operation::Bypass => value,
            Operation::Sqrt => value.sqrt(),
            Operation::Ln => value.ln(),
        }
    }

    /// Bias that splits inputs uniform on [0, 1) evenly under this
    /// operation.
    pub fn balanced_bias(self) -> f32 {
        match self {
            Operation::Bypass => 0.5,
            Operation::Sqrt => 0.5f32.sqrt(),
            Operation::Ln => 0.5f32.ln(),
        }
    }
}

/// Comparison deciding a node's branch.
///
/// Both comparators are ordered: a NaN operand makes the predicate false,
/// so NaN inputs deterministically take the false branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    LessThan,
    GreaterThan,
}

impl Comparator {
    /// Evaluates the comparison.
    pub fn evaluate(self, lhs: f32, rhs: f32) -> bool {
        match self {
            Comparator::LessThan => lhs < rhs,
            Comparator::GreaterThan => lhs > rhs,
        }
    }
}

/// A single internal node: one feature, one transformation, one threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature_idx: u32,
    pub op: Operation,
    pub comparator: Comparator,
    pub bias: f32,
}

impl TreeNode {
    pub fn new(feature_idx: u32, op: Operation, comparator: Comparator, bias: f32) -> Self {
        Self {
            feature_idx,
            op,
            comparator,
            bias,
        }
    }

    /// Outcome of this node's predicate for an input vector.
    ///
    /// Reads `input[feature_idx]` without a bounds check beyond the slice's
    /// own; callers guarantee the vector covers every feature the tree uses.
    pub fn evaluate(&self, input: &[f32]) -> bool {
        let value = self.op.apply(input[self.feature_idx as usize]);
        self.comparator.evaluate(value, self.bias)
    }
}

/// A perfect binary decision tree, read-only after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionTree {
    depth: u32,
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Builds a tree of `depth` levels from its breadth-first node list.
    ///
    /// Panics unless `nodes` holds exactly 2^depth - 1 entries.
    pub fn new(depth: u32, nodes: Vec<TreeNode>) -> Self {
        assert!(depth >= 1, "tree depth must be at least 1");
        assert_eq!(
            nodes.len(),
            (1usize << depth) - 1,
            "a perfect tree of depth {depth} has {} internal nodes",
            (1usize << depth) - 1
        );
        Self { depth, nodes }
    }

    /// Generates a random tree over `feature_count` features.
    ///
    /// Operations and comparators are drawn uniformly; each node's bias is
    /// the balanced split point for its operation, keeping traversals of
    /// uniform [0, 1) inputs spread evenly across leaves.
    pub fn random(depth: u32, feature_count: u32, rng: &mut impl Rng) -> Self {
        assert!(feature_count > 0, "need at least one feature");
        let node_count = (1usize << depth) - 1;
        let nodes = (0..node_count)
            .map(|_| {
                let op = match rng.gen_range(0..3) {
                    0 => Operation::Bypass,
                    1 => Operation::Sqrt,
                    _ => Operation::Ln,
                };
                let comparator = if rng.gen_bool(0.5) {
                    Comparator::LessThan
                } else {
                    Comparator::GreaterThan
                };
                TreeNode::new(rng.gen_range(0..feature_count), op, comparator, op.balanced_bias())
            })
            .collect();
        Self::new(depth, nodes)
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Number of internal nodes, 2^depth - 1. Also the first leaf index.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// First index of the leaf range [node_count, node_count + 2^depth).
    pub fn first_leaf_index(&self) -> i64 {
        self.nodes.len() as i64
    }

    pub fn leaf_count(&self) -> usize {
        1 << self.depth
    }

    pub fn node(&self, index: i64) -> &TreeNode {
        &self.nodes[index as usize]
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// Reference interpretive traversal: walks one node at a time from the
    /// root and returns the leaf index reached. The compiled evaluators must
    /// agree with this on every input.
    pub fn traverse(&self, input: &[f32]) -> i64 {
        let first_leaf = self.first_leaf_index();
        let mut idx = 0i64;
        while idx < first_leaf {
            idx = if self.nodes[idx as usize].evaluate(input) {
                2 * idx + 2
            } else {
                2 * idx + 1
            };
        }
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Depth-2 tree on a single feature: thresholds 0.5 at the root, 0.25
    /// and 0.75 at its children, all `GreaterThan`. Inputs in the k-th
    /// quarter of [0, 1) land on the k-th leaf.
    fn quartile_tree() -> DecisionTree {
        DecisionTree::new(
            2,
            vec![
                TreeNode::new(0, Operation::Bypass, Comparator::GreaterThan, 0.5),
                TreeNode::new(0, Operation::Bypass, Comparator::GreaterThan, 0.25),
                TreeNode::new(0, Operation::Bypass, Comparator::GreaterThan, 0.75),
            ],
        )
    }

    #[test]
    fn quartile_tree_routes_by_quarter() {
        let tree = quartile_tree();
        assert_eq!(tree.traverse(&[0.125]), 3);
        assert_eq!(tree.traverse(&[0.375]), 4);
        assert_eq!(tree.traverse(&[0.625]), 5);
        assert_eq!(tree.traverse(&[0.875]), 6);
    }

    #[test]
    fn distinct_features_route_independently() {
        // Same shape, but node i reads feature i against a 0.5 threshold.
        let tree = DecisionTree::new(
            2,
            vec![
                TreeNode::new(0, Operation::Bypass, Comparator::GreaterThan, 0.5),
                TreeNode::new(1, Operation::Bypass, Comparator::GreaterThan, 0.5),
                TreeNode::new(2, Operation::Bypass, Comparator::GreaterThan, 0.5),
            ],
        );
        assert_eq!(tree.traverse(&[0.0, 0.0, 0.0]), 3);
        assert_eq!(tree.traverse(&[0.0, 1.0, 0.0]), 4);
        assert_eq!(tree.traverse(&[1.0, 0.0, 0.0]), 5);
        assert_eq!(tree.traverse(&[1.0, 0.0, 1.0]), 6);
    }

    #[test]
    fn nan_takes_the_false_branch_for_both_comparators() {
        for comparator in [Comparator::LessThan, Comparator::GreaterThan] {
            let tree = DecisionTree::new(
                1,
                vec![TreeNode::new(0, Operation::Bypass, comparator, 0.5)],
            );
            assert_eq!(tree.traverse(&[f32::NAN]), 1);
        }
    }

    #[test]
    fn operations_transform_before_comparing() {
        // sqrt(0.36) = 0.6 > 0.5, but the raw value is below the bias.
        let sqrt_node = TreeNode::new(0, Operation::Sqrt, Comparator::GreaterThan, 0.5);
        assert!(sqrt_node.evaluate(&[0.36]));
        let bypass_node = TreeNode::new(0, Operation::Bypass, Comparator::GreaterThan, 0.5);
        assert!(!bypass_node.evaluate(&[0.36]));

        // ln(e) = 1 exceeds a zero bias, ln(0.5) does not.
        let ln_node = TreeNode::new(0, Operation::Ln, Comparator::GreaterThan, 0.0);
        assert!(ln_node.evaluate(&[std::f32::consts::E]));
        assert!(!ln_node.evaluate(&[0.5]));
    }

    #[test]
    fn random_trees_have_the_right_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        for depth in 1..=6 {
            let tree = DecisionTree::random(depth, 5, &mut rng);
            assert_eq!(tree.node_count(), (1 << depth) - 1);
            assert_eq!(tree.leaf_count(), 1 << depth);
            assert!(tree.nodes().iter().all(|n| n.feature_idx < 5));
        }
    }

    #[test]
    fn traversal_always_reaches_the_leaf_range() {
        let mut rng = StdRng::seed_from_u64(11);
        let tree = DecisionTree::random(5, 3, &mut rng);
        let first_leaf = tree.first_leaf_index();
        for _ in 0..1000 {
            let input: Vec<f32> = (0..3).map(|_| rng.gen::<f32>()).collect();
            let leaf = tree.traverse(&input);
            assert!(leaf >= first_leaf && leaf < first_leaf + tree.leaf_count() as i64);
        }
    }
}
