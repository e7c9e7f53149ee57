//! Leaf path bitmaps and condition-vector variants.
//!
//! A subtree of `k` levels evaluates all of its 2^k - 1 predicates at once
//! into a condition vector whose bit `b` is the outcome of the node at bit
//! offset `b`. Routing then dispatches on the vector: each subtree leaf is
//! reached for every vector value that agrees with the leaf's root-to-leaf
//! path on the ancestor bits, while the remaining bits (nodes off the path)
//! are free to take any value. This module computes the per-leaf path
//! constraints and expands them into the concrete case values.

use std::collections::HashMap;

/// Path constraints for one leaf of a subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafPath {
    /// Global index of the node reached below the subtree (an internal node
    /// of the full tree, or one of its leaves).
    pub node_idx: i64,
    /// Required outcome for each ancestor inside the subtree, keyed by the
    /// ancestor's bit offset.
    pub bits: HashMap<u32, bool>,
}

/// Builds the 2^levels leaf descriptors of the subtree rooted at
/// `subtree_root`, in true-first order.
///
/// Children of bit offset `b` are at offsets 2b+1 (false) and 2b+2 (true),
/// mirroring the global child arithmetic, so the recursion walks (global
/// index, bit offset) pairs in lockstep. Each recursion level appends both
/// halves and then marks the freshly appended descriptors with its own bit.
pub fn leaf_paths(subtree_root: i64, levels: u32) -> Vec<LeafPath> {
    let mut result = Vec::with_capacity(1 << levels);
    push_paths(subtree_root, 0, levels, &mut result);
    debug_assert_eq!(result.len(), 1 << levels);
    result
}

fn push_paths(node_idx: i64, bit_offset: u32, remaining: u32, out: &mut Vec<LeafPath>) {
    if remaining == 0 {
        out.push(LeafPath {
            node_idx,
            bits: HashMap::new(),
        });
        return;
    }

    let marked = 1usize << (remaining - 1);

    push_paths(2 * node_idx + 2, 2 * bit_offset + 2, remaining - 1, out);
    for path in out.iter_mut().rev().take(marked) {
        path.bits.insert(bit_offset, true);
    }

    push_paths(2 * node_idx + 1, 2 * bit_offset + 1, remaining - 1, out);
    for path in out.iter_mut().rev().take(marked) {
        path.bits.insert(bit_offset, false);
    }
}

/// Condition-vector value with every constrained-true bit set and all other
/// bits zero.
pub fn fixed_template(bits: &HashMap<u32, bool>) -> u64 {
    let mut template = 0u64;
    for (&bit, &value) in bits {
        if value {
            template |= 1 << bit;
        }
    }
    template
}

/// Every condition-vector value that routes to the leaf described by `bits`,
/// over a subtree with `num_internal` predicate bits.
///
/// The don't-care bits (offsets absent from the map) are expanded over all
/// 2^v combinations; the union of variants across a subtree's leaves is
/// exactly {0, ..., 2^num_internal - 1}.
pub fn condition_variants(num_internal: u32, bits: &HashMap<u32, bool>) -> Vec<u64> {
    let template = fixed_template(bits);
    let variable: Vec<u32> = (0..num_internal)
        .filter(|b| !bits.contains_key(b))
        .collect();

    let mut variants = Vec::with_capacity(1 << variable.len());
    for combination in 0u64..(1u64 << variable.len()) {
        let mut vector = template;
        for (i, &bit) in variable.iter().enumerate() {
            if combination >> i & 1 == 1 {
                vector |= 1 << bit;
            }
        }
        variants.push(vector);
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn two_level_paths_at_the_root() {
        let paths = leaf_paths(0, 2);
        assert_eq!(paths.len(), 4);

        // True-first order: the all-true path comes out first.
        assert_eq!(paths[0].node_idx, 6);
        assert_eq!(paths[0].bits, HashMap::from([(0, true), (2, true)]));
        assert_eq!(paths[1].node_idx, 5);
        assert_eq!(paths[1].bits, HashMap::from([(0, true), (2, false)]));
        assert_eq!(paths[2].node_idx, 4);
        assert_eq!(paths[2].bits, HashMap::from([(0, false), (1, true)]));
        assert_eq!(paths[3].node_idx, 3);
        assert_eq!(paths[3].bits, HashMap::from([(0, false), (1, false)]));
    }

    #[test]
    fn every_path_carries_one_bit_per_level() {
        for levels in 1..=4u32 {
            let paths = leaf_paths(0, levels);
            assert_eq!(paths.len(), 1 << levels);
            for path in &paths {
                assert_eq!(path.bits.len(), levels as usize);
            }
        }
    }

    #[test]
    fn paths_realize_distinct_constraint_sets() {
        for levels in 1..=3u32 {
            let paths = leaf_paths(0, levels);
            let mut seen = HashSet::new();
            for path in &paths {
                let mut constraints: Vec<(u32, bool)> =
                    path.bits.iter().map(|(&b, &v)| (b, v)).collect();
                constraints.sort_unstable();
                assert!(seen.insert(constraints), "duplicate path constraints");
            }
            assert_eq!(seen.len(), 1 << levels);
        }
    }

    #[test]
    fn two_level_variants_at_the_root() {
        let paths = leaf_paths(0, 2);
        let variants: Vec<Vec<u64>> = paths
            .iter()
            .map(|p| condition_variants(3, &p.bits))
            .collect();

        let as_sets: Vec<HashSet<u64>> = variants
            .iter()
            .map(|v| v.iter().copied().collect())
            .collect();
        assert_eq!(as_sets[0], HashSet::from([0b101, 0b111])); // leaf 6
        assert_eq!(as_sets[1], HashSet::from([0b001, 0b011])); // leaf 5
        assert_eq!(as_sets[2], HashSet::from([0b010, 0b110])); // leaf 4
        assert_eq!(as_sets[3], HashSet::from([0b000, 0b100])); // leaf 3
    }

    #[test]
    fn variants_partition_the_condition_vector_space() {
        for levels in 1..=3u32 {
            for root in [0i64, 2, 5] {
                let num_internal = (1u32 << levels) - 1;
                let paths = leaf_paths(root, levels);

                let mut all = HashSet::new();
                let mut total = 0usize;
                for path in &paths {
                    let variants = condition_variants(num_internal, &path.bits);
                    assert_eq!(variants.len(), 1 << (num_internal - levels));
                    total += variants.len();
                    for v in variants {
                        assert!(all.insert(v), "variant {v:#b} produced twice");
                    }
                }

                // Disjoint and exhaustive over all 2^num_internal values.
                assert_eq!(total, 1 << num_internal);
                assert_eq!(all.len(), 1 << num_internal);
                assert!(all.iter().all(|&v| v < (1 << num_internal)));
            }
        }
    }

}
