//! Level-wise forest growth.
//!
//! All trees of a round grow together, one depth at a time: refresh per-row
//! node ids, compute the depth's histograms, find splits, adopt them subject
//! to the leaf budget, route rows to children. A tree finishes when none of
//! its frontier nodes yields an admissible split or its leaf budget runs out.

use std::collections::HashMap;

use crate::config::{BoostConfig, TreeConfig};
use crate::data::{ArrayBlock, RaggedBlock};
use crate::exec::PartitionedDataset;
use crate::histogram::{Histogram, HistogramComputer, HistogramInput};
use crate::sampling::SampleBlock;
use crate::selector::Selector;
use crate::split::{find_node_split, leaf_weight, Split, SplitParams};
use crate::width::{HistValue, IdWidth};

use super::{LearningNode, Node, TreeModel};

// ============================================================================
// TreeState
// ============================================================================

/// Bookkeeping for one tree while the forest grows.
#[derive(Debug, Clone)]
pub struct TreeState {
    /// Adopted splits by heap node id.
    pub splits: HashMap<u32, Split>,
    /// Finalized leaf weights by heap node id.
    pub leaf_weights: HashMap<u32, f64>,
    /// Frontier nodes still eligible for expansion.
    pub active: Vec<LearningNode>,
    /// Splits the tree may still adopt before hitting `max_leaves`.
    pub remaining_leaves: usize,
    /// Whether the tree stopped growing.
    pub finished: bool,
}

impl TreeState {
    fn new(max_leaves: usize) -> Self {
        Self {
            splits: HashMap::new(),
            leaf_weights: HashMap::new(),
            active: vec![LearningNode::new(1, 0.0)],
            remaining_leaves: max_leaves.saturating_sub(1),
            finished: false,
        }
    }

    /// Turn every frontier node into a leaf and stop the tree.
    fn finalize(&mut self) {
        for node in self.active.drain(..) {
            self.leaf_weights.insert(node.id, node.weight);
        }
        self.finished = true;
    }

    /// Freeze into a pre-order arena model.
    fn freeze(&self) -> TreeModel {
        fn build(state: &TreeState, id: u32, nodes: &mut Vec<Node>) {
            if let Some(split) = state.splits.get(&id) {
                let at = nodes.len();
                // Placeholder; children indices are known after recursion.
                nodes.push(Node::Leaf { weight: 0.0 });
                let left = nodes.len() as u32;
                build(state, 2 * id, nodes);
                let right = nodes.len() as u32;
                build(state, 2 * id + 1, nodes);
                nodes[at] = Node::Internal {
                    col: split.col,
                    kind: split.kind,
                    data: split.data.clone(),
                    left,
                    right,
                };
            } else {
                let weight = state.leaf_weights.get(&id).copied().unwrap_or(0.0);
                nodes.push(Node::Leaf { weight });
            }
        }

        let mut nodes = Vec::new();
        build(self, 1, &mut nodes);
        TreeModel::from_nodes(nodes)
    }
}

// ============================================================================
// Level refit hook
// ============================================================================

/// Recomputes gradient blocks after a level's splits were adopted.
///
/// `node_weights` maps `(tree, node)` to the node's current predicted weight;
/// nodes absent from the map contribute nothing yet.
pub trait LevelRefitter<H: HistValue>: Sync {
    /// Produce the refit grad-hess block for one sample block.
    fn refit(
        &self,
        block: &SampleBlock<H>,
        node_ids: &RaggedBlock,
        node_weights: &HashMap<(u32, u32), f64>,
    ) -> ArrayBlock<H>;
}

// ============================================================================
// grow_forest
// ============================================================================

/// Inputs for growing one round's forest.
pub struct GrowForestArgs<'a, H: HistValue> {
    /// Hyperparameters.
    pub config: &'a BoostConfig,
    /// Per-round tree config (column selector, categorical columns).
    pub tree_cfg: &'a TreeConfig,
    /// Sampled training blocks.
    pub data: &'a PartitionedDataset<SampleBlock<H>>,
    /// Grad-hess blocks aligned with `data`; replaced on level refits.
    pub grads: PartitionedDataset<ArrayBlock<H>>,
    /// Bin count per column.
    pub bins_per_col: &'a [u32],
    /// Trees in this round.
    pub num_trees: usize,
    /// Raw outputs per instance.
    pub raw_size: usize,
    /// Packed width of node ids.
    pub node_width: IdWidth,
    /// Optional per-level gradient refitter.
    pub refitter: Option<&'a dyn LevelRefitter<H>>,
}

/// Grow all trees of one round level-wise and freeze them.
pub fn grow_forest<H: HistValue>(
    args: GrowForestArgs<'_, H>,
    computer: &mut dyn HistogramComputer<H>,
) -> Vec<TreeModel> {
    let config = args.config;
    let params = SplitParams::from_config(config);
    let tree_ids: Vec<u32> = (0..args.num_trees as u32).collect();
    let seed = config
        .effective_seed()
        .wrapping_add((args.tree_cfg.iteration as u64).wrapping_mul(0x517C_C1B7_2722_0A95));

    let mut grads = args.grads;
    let mut node_ids: PartitionedDataset<RaggedBlock> = args
        .data
        .map(|block| block.tree_ids.map_constant(args.node_width, 1));
    let mut states: Vec<TreeState> = (0..args.num_trees)
        .map(|_| TreeState::new(config.max_leaves))
        .collect();

    computer.reset();

    for depth in 0..config.max_depth {
        let active_pairs: Vec<(u32, u32)> = states
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.finished)
            .flat_map(|(t, s)| s.active.iter().map(move |n| (t as u32, n.id)))
            .collect();
        if active_pairs.is_empty() {
            break;
        }

        // Column sampling at this level, intersected with the round's
        // tree-level selector.
        let level_selector = Selector::hash(
            seed.wrapping_add((depth as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
            config.col_sample_rate_by_node,
        );
        let selector = Selector::union(args.tree_cfg.column_selector.clone(), level_selector);
        let node_row_selector = if config.sub_sample_rate_by_node < 1.0 {
            Some(Selector::hash(
                seed ^ 0xA076_1D64_78BD_642F,
                config.sub_sample_rate_by_node,
            ))
        } else {
            None
        };

        let input = HistogramInput {
            data: args.data,
            grads: &grads,
            node_ids: &node_ids,
            selector: &selector,
            node_row_selector: node_row_selector.as_ref(),
            bins_per_col: args.bins_per_col,
            cat_cols: &args.tree_cfg.cat_cols,
            rank_cols: &args.tree_cfg.rank_cols,
            tree_ids: &tree_ids,
            raw_size: args.raw_size,
            num_partitions: args.data.num_partitions(),
        };
        let hists = computer.compute(&input, depth, &active_pairs, config);

        // Group histograms per (tree, node); input is sorted by key.
        let mut per_node: HashMap<(u32, u32), Vec<(u32, &Histogram<H>)>> = HashMap::new();
        for (key, hist) in &hists {
            per_node
                .entry((key.tree, key.node))
                .or_default()
                .push((key.col, hist));
        }

        // Split finding per frontier node.
        for (tree_idx, state) in states.iter_mut().enumerate() {
            if state.finished {
                continue;
            }
            for node in &mut state.active {
                node.split = None;
                if let Some(cols) = per_node.get(&(tree_idx as u32, node.id)) {
                    if let Some((_, first)) = cols.first() {
                        let (grad_sum, hess_sum) = first.total();
                        node.grad_sum = grad_sum;
                        node.hess_sum = hess_sum;
                        node.weight = leaf_weight(grad_sum, hess_sum, &params);
                    }
                    node.split = find_node_split(
                        cols,
                        |c| args.tree_cfg.is_cat(c),
                        |c| args.tree_cfg.is_rank(c),
                        &params,
                    );
                }
            }
        }

        // Split adoption, in ascending node order per tree.
        let mut routing: HashMap<(u32, u32), Split> = HashMap::new();
        for (tree_idx, state) in states.iter_mut().enumerate() {
            if state.finished {
                continue;
            }
            let mut frontier = std::mem::take(&mut state.active);
            frontier.sort_by_key(|n| n.id);
            let mut next_active = Vec::new();

            for node in frontier {
                let adopt = node.split.is_some() && state.remaining_leaves > 0;
                if adopt {
                    let split = node.split.expect("checked above");
                    state.remaining_leaves -= 1;
                    next_active.push(LearningNode::new(2 * node.id, split.weight_left));
                    next_active.push(LearningNode::new(2 * node.id + 1, split.weight_right));
                    routing.insert((tree_idx as u32, node.id), split.clone());
                    state.splits.insert(node.id, split);
                } else {
                    state.leaf_weights.insert(node.id, node.weight);
                }
            }

            state.active = next_active;
            if state.active.is_empty() || state.remaining_leaves == 0 {
                state.finalize();
            }
        }

        if routing.is_empty() {
            break;
        }

        // Route rows through the adopted splits.
        node_ids = args.data.zip_map(&node_ids, |block, nodes| {
            let mut out = nodes.clone();
            for row in 0..block.num_rows() {
                for j in 0..block.tree_ids.row_len(row) {
                    let tree = block.tree_ids.get(row, j);
                    let node = out.get(row, j);
                    if let Some(split) = routing.get(&(tree, node)) {
                        let bin = block.bins.row(row).get(split.col);
                        let child = if split.goes_left(bin) {
                            2 * node
                        } else {
                            2 * node + 1
                        };
                        out.set(row, j, child);
                    }
                }
            }
            out
        });

        // Optional per-level Newton refit of the gradients.
        if let Some(refitter) = args.refitter {
            let mut weights: HashMap<(u32, u32), f64> = HashMap::new();
            for (tree_idx, state) in states.iter().enumerate() {
                for node in &state.active {
                    weights.insert((tree_idx as u32, node.id), node.weight);
                }
                for (&id, &w) in &state.leaf_weights {
                    weights.insert((tree_idx as u32, id), w);
                }
            }
            grads = args
                .data
                .zip_map(&node_ids, |block, nodes| refitter.refit(block, nodes, &weights));
        }
    }

    // Depth limit reached: whatever is still active becomes leaves.
    for state in &mut states {
        if !state.finished {
            state.finalize();
        }
    }

    states.iter().map(TreeState::freeze).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistogramType;
    use crate::data::{BinBlock, CompactArray};
    use crate::histogram::{BasicComputer, SubtractComputer};
    use crate::split::SplitData;

    /// 64 rows over two partitions; label +1 for bins 1..=2 of column 0,
    /// -1 for bins 3..=4. Gradient equals the negative label (squared loss
    /// toward 0 raw prediction), hessian 1.
    fn toy_round(
        num_trees: usize,
    ) -> (
        PartitionedDataset<SampleBlock<f64>>,
        PartitionedDataset<ArrayBlock<f64>>,
    ) {
        let mut data_parts = Vec::new();
        let mut grad_parts = Vec::new();
        let mut i = 0u32;
        let tree_list: Vec<u32> = (0..num_trees as u32).collect();
        for _ in 0..2 {
            let mut bins = BinBlock::new(2, IdWidth::U8, IdWidth::U8);
            let mut labels = ArrayBlock::new(1);
            let mut grads = ArrayBlock::new(2);
            let mut raw = ArrayBlock::new(1);
            let mut weights = Vec::new();
            for _ in 0..32 {
                let b0 = 1 + i % 4;
                let label = if b0 <= 2 { 1.0 } else { -1.0 };
                bins.push_row([(0, b0), (1, 1 + (i % 2))]);
                labels.push_row(&[label]);
                grads.push_row(&[-label, 1.0]);
                raw.push_row(&[0.0]);
                weights.push(1.0);
                i += 1;
            }
            let rows = bins.num_rows();
            data_parts.push(vec![SampleBlock {
                bins,
                labels,
                weights: CompactArray::from_vec(weights),
                raw,
                tree_ids: RaggedBlock::uniform(IdWidth::U8, rows, &tree_list),
            }]);
            grad_parts.push(vec![grads]);
        }
        (
            PartitionedDataset::from_partitions(data_parts),
            PartitionedDataset::from_partitions(grad_parts),
        )
    }

    fn grow(
        config: &BoostConfig,
        num_trees: usize,
        computer: &mut dyn HistogramComputer<f64>,
    ) -> Vec<TreeModel> {
        let (data, grads) = toy_round(num_trees);
        let tree_cfg = TreeConfig::new(config, 0, 2);
        let args = GrowForestArgs {
            config,
            tree_cfg: &tree_cfg,
            data: &data,
            grads,
            bins_per_col: &[8, 8],
            num_trees,
            raw_size: 1,
            node_width: IdWidth::U16,
            refitter: None,
        };
        grow_forest(args, computer)
    }

    #[test]
    fn grows_a_separating_stump() {
        let config = BoostConfig {
            max_depth: 1,
            min_node_hess: 1.0,
            ..Default::default()
        };
        let trees = grow(&config, 1, &mut BasicComputer);
        assert_eq!(trees.len(), 1);
        let tree = &trees[0];
        assert_eq!(tree.depth(), 1, "max_depth 1 must yield a stump");
        assert_eq!(tree.num_leaves(), 2);

        // Rows with bins 1..2 carry gradient -1 (label +1): left weight > 0.
        match &tree.nodes()[0] {
            Node::Internal { col, data, .. } => {
                assert_eq!(*col, 0);
                match data {
                    SplitData::Threshold { bin, .. } => assert_eq!(*bin, 2),
                    _ => panic!("expected threshold split"),
                }
            }
            _ => panic!("expected internal root"),
        }
        let left = tree.predict(&|_| 1);
        let right = tree.predict(&|_| 4);
        assert!(left > 0.0 && right < 0.0, "left {left} right {right}");
    }

    #[test]
    fn node_ids_follow_heap_scheme() {
        let config = BoostConfig {
            max_depth: 3,
            min_node_hess: 0.5,
            ..Default::default()
        };
        let trees = grow(&config, 1, &mut BasicComputer);
        // Structure is a valid binary tree: every internal node has two
        // children inside the arena.
        let tree = &trees[0];
        for node in tree.nodes() {
            if let Node::Internal { left, right, .. } = node {
                assert!((*left as usize) < tree.num_nodes());
                assert!((*right as usize) < tree.num_nodes());
                assert_ne!(left, right);
            }
        }
        assert_eq!(
            tree.num_leaves(),
            tree.num_nodes() - tree.num_leaves() + 1,
            "binary tree leaf/internal relation"
        );
    }

    #[test]
    fn max_leaves_bounds_growth() {
        let config = BoostConfig {
            max_depth: 6,
            max_leaves: 2,
            min_node_hess: 0.5,
            ..Default::default()
        };
        let trees = grow(&config, 1, &mut BasicComputer);
        assert!(trees[0].num_leaves() <= 2);
    }

    #[test]
    fn constant_gradient_grows_nothing() {
        // All labels equal: gradients identical, no split has positive gain.
        let config = BoostConfig::default();
        let mut data_parts = Vec::new();
        let mut grad_parts = Vec::new();
        let mut bins = BinBlock::new(1, IdWidth::U8, IdWidth::U8);
        let mut labels = ArrayBlock::new(1);
        let mut grads = ArrayBlock::new(2);
        let mut raw = ArrayBlock::new(1);
        let mut weights = Vec::new();
        for i in 0..16 {
            bins.push_row([(0, 1 + i % 4)]);
            labels.push_row(&[7.0]);
            grads.push_row(&[-7.0, 1.0]);
            raw.push_row(&[0.0]);
            weights.push(1.0);
        }
        let rows = bins.num_rows();
        data_parts.push(vec![SampleBlock {
            bins,
            labels,
            weights: CompactArray::from_vec(weights),
            raw,
            tree_ids: RaggedBlock::uniform(IdWidth::U8, rows, &[0]),
        }]);
        grad_parts.push(vec![grads]);
        let data = PartitionedDataset::from_partitions(data_parts);
        let grads = PartitionedDataset::from_partitions(grad_parts);

        let tree_cfg = TreeConfig::new(&config, 0, 1);
        let args = GrowForestArgs {
            config: &config,
            tree_cfg: &tree_cfg,
            data: &data,
            grads,
            bins_per_col: &[8],
            num_trees: 1,
            raw_size: 1,
            node_width: IdWidth::U16,
            refitter: None,
        };
        let trees = grow_forest(args, &mut BasicComputer);
        assert!(trees[0].is_empty(), "no admissible split means empty tree");
    }

    #[test]
    fn subtract_strategy_grows_same_stump() {
        let config = BoostConfig {
            max_depth: 2,
            min_node_hess: 0.5,
            histogram_type: HistogramType::Subtract,
            ..Default::default()
        };
        let basic = grow(&config, 1, &mut BasicComputer);
        let mut sub = SubtractComputer::new();
        let subtracted = grow(&config, 1, &mut sub);
        assert_eq!(basic, subtracted);
    }

    #[test]
    fn forest_trees_are_identical_without_sampling() {
        let config = BoostConfig {
            max_depth: 2,
            ..Default::default()
        };
        let trees = grow(&config, 3, &mut BasicComputer);
        assert_eq!(trees.len(), 3);
        assert_eq!(trees[0], trees[1]);
        assert_eq!(trees[1], trees[2]);
    }
}
