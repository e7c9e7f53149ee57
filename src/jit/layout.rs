//! Index arithmetic for perfect binary trees.
//!
//! A perfect tree of depth D keeps its 2^D - 1 internal nodes at indices
//! [0, 2^D - 1) in breadth-first order; node i has children 2i+1 (false
//! branch) and 2i+2 (true branch), and the 2^D leaves occupy the next index
//! range. A subtree embedded in the full tree numbers its own nodes 0..
//! breadth-first as well (its "bit offsets"); the functions here translate
//! between the two numberings.

/// Number of nodes in a perfect tree of `levels` levels. Doubles as the
/// first global index on level `levels`.
pub fn tree_nodes(levels: u32) -> i64 {
    (1i64 << levels) - 1
}

/// Level of a global node index (root is level 0).
pub fn level_of(index: i64) -> u32 {
    debug_assert!(index >= 0);
    ((index + 1) as u64).ilog2()
}

/// Global index of the node at `bit_offset` inside the subtree rooted at
/// `subtree_root`.
///
/// Bit offsets count the subtree's nodes breadth-first: offset 0 is the
/// subtree root, offsets [2^l - 1, 2^(l+1) - 1) form level `l` below it.
/// On level `root_level + l` of the full tree the subtree owns a contiguous
/// block of 2^l nodes starting at `root_offset * 2^l`, which is what makes
/// this a pure index computation. The mapping is equally valid for offsets
/// one level past a subtree of `k` levels, where it names the roots the
/// traversal continues from.
pub fn subtree_node_index(subtree_root: i64, bit_offset: u32) -> i64 {
    let root_level = level_of(subtree_root);
    let node_level = (bit_offset as u64 + 1).ilog2();

    let first_on_root_level = tree_nodes(root_level);
    let first_on_node_level = tree_nodes(root_level + node_level);

    let root_offset = subtree_root - first_on_root_level;
    let nodes_on_level = 1i64 << node_level;
    let offset_in_level = bit_offset as i64 - (nodes_on_level - 1);

    first_on_node_level + root_offset * nodes_on_level + offset_in_level
}

/// Roots of the evaluator functions for a tree of `depth` levels split into
/// functions of `function_depth` levels: every node on levels 0,
/// `function_depth`, 2*`function_depth`, ...
pub fn evaluator_roots(depth: u32, function_depth: u32) -> Vec<i64> {
    debug_assert!(function_depth > 0 && depth % function_depth == 0);
    let mut roots = Vec::new();
    for level in (0..depth).step_by(function_depth as usize) {
        roots.extend(tree_nodes(level)..tree_nodes(level + 1));
    }
    roots
}

/// Number of evaluator functions compiled for a tree of `depth` levels.
pub fn num_evaluators(depth: u32, function_depth: u32) -> i64 {
    let mut count = 0;
    for step in 0..depth / function_depth {
        count += 1i64 << (function_depth * step);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_nodes_doubles_as_first_index_on_level() {
        assert_eq!(tree_nodes(0), 0);
        assert_eq!(tree_nodes(1), 1);
        assert_eq!(tree_nodes(2), 3);
        assert_eq!(tree_nodes(4), 15);
    }

    #[test]
    fn level_of_breadth_first_indices() {
        assert_eq!(level_of(0), 0);
        assert_eq!(level_of(1), 1);
        assert_eq!(level_of(2), 1);
        assert_eq!(level_of(3), 2);
        assert_eq!(level_of(6), 2);
        assert_eq!(level_of(7), 3);
    }

    #[test]
    fn subtree_offsets_at_root_are_global_indices() {
        for bit_offset in 0..15 {
            assert_eq!(subtree_node_index(0, bit_offset), bit_offset as i64);
        }
    }

    #[test]
    fn subtree_offsets_follow_child_arithmetic() {
        // Offsets 1 and 2 of any subtree are the root's direct children.
        for root in [0i64, 1, 2, 3, 6, 7, 12] {
            assert_eq!(subtree_node_index(root, 1), 2 * root + 1);
            assert_eq!(subtree_node_index(root, 2), 2 * root + 2);
        }
    }

    /// Walks parent links to check membership in the subtree rooted at `root`.
    fn in_subtree(root: i64, mut index: i64) -> bool {
        while index > root {
            index = (index - 1) / 2;
        }
        index == root
    }

    #[test]
    fn internal_offsets_are_distinct_and_inside_the_subtree() {
        for root in [0i64, 1, 2, 4, 9, 33] {
            for levels in 1..=3u32 {
                let count = tree_nodes(levels) as u32;
                let indices: Vec<i64> = (0..count)
                    .map(|b| subtree_node_index(root, b))
                    .collect();

                for &idx in &indices {
                    assert!(in_subtree(root, idx), "index {idx} outside subtree {root}");
                }
                let mut deduped = indices.clone();
                deduped.sort_unstable();
                deduped.dedup();
                assert_eq!(deduped.len(), indices.len());
            }
        }
    }

    #[test]
    fn continuation_offsets_name_the_next_level_down() {
        // For a 2-level subtree at root 1, offsets 3..=6 are the four nodes
        // two levels below: children of nodes 3 and 4.
        assert_eq!(subtree_node_index(1, 3), 7);
        assert_eq!(subtree_node_index(1, 4), 8);
        assert_eq!(subtree_node_index(1, 5), 9);
        assert_eq!(subtree_node_index(1, 6), 10);
    }

    #[test]
    fn evaluator_roots_cover_function_levels() {
        assert_eq!(evaluator_roots(2, 1), vec![0, 1, 2]);
        assert_eq!(evaluator_roots(4, 2), vec![0, 3, 4, 5, 6]);
        assert_eq!(evaluator_roots(4, 4), vec![0]);
    }

    #[test]
    fn evaluator_count_matches_roots() {
        for (depth, fd) in [(2, 1), (4, 2), (4, 4), (6, 3), (12, 4)] {
            assert_eq!(
                num_evaluators(depth, fd),
                evaluator_roots(depth, fd).len() as i64
            );
        }
        assert_eq!(num_evaluators(12, 4), 1 + 16 + 256);
    }
}
