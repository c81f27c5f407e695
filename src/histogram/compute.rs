//! Histogram construction strategies.
//!
//! All strategies share one local pass: per partition, rows filtered by a
//! node predicate accumulate `(grad, hess)` into dense per-`(tree, node, col)`
//! scratches for their active non-zero bins, node totals are credited to the
//! zero bin, and the zero bin is fixed up to `total - non-zero sums`. The
//! strategies differ in which nodes they build and how local results become
//! global ones:
//!
//! - [`BasicComputer`] rebuilds every active node at every depth;
//! - [`SubtractComputer`] builds right children only and derives left
//!   siblings as `parent - right`, retaining parents between depths;
//! - [`VoteComputer`] lets every partition vote for its locally best columns
//!   and reduces only histograms of the winning columns.

use std::collections::{BTreeSet, HashMap, HashSet};

use rayon::prelude::*;

use crate::config::BoostConfig;
use crate::data::{ArrayBlock, RaggedBlock};
use crate::exec::{
    aggregate_by_key, select_partitioner, HistKey, KeyPartitioner, PartitionedDataset,
    SkipNodePartitioner,
};
use crate::sampling::SampleBlock;
use crate::selector::Selector;
use crate::split::{find_col_split, SplitParams};
use crate::width::HistValue;

use super::{DenseScratch, Histogram};

// ============================================================================
// Input bundle
// ============================================================================

/// Everything one depth of histogram construction needs to see.
pub struct HistogramInput<'a, H: HistValue> {
    /// Sampled blocks (bins, weights, tree memberships).
    pub data: &'a PartitionedDataset<SampleBlock<H>>,
    /// Per-row grad-hess rows, `2 * raw_size` wide, aligned with `data`.
    pub grads: &'a PartitionedDataset<ArrayBlock<H>>,
    /// Per-row current node ids, aligned with each row's tree-id list.
    pub node_ids: &'a PartitionedDataset<RaggedBlock>,
    /// Column selector for this depth (tree-level and level-level combined).
    pub selector: &'a Selector,
    /// Optional per-node instance selector (`sub_sample_rate_by_node`).
    pub node_row_selector: Option<&'a Selector>,
    /// Bin count per column.
    pub bins_per_col: &'a [u32],
    /// Categorical columns.
    pub cat_cols: &'a BTreeSet<u32>,
    /// Ranking columns.
    pub rank_cols: &'a BTreeSet<u32>,
    /// Tree ids of the round.
    pub tree_ids: &'a [u32],
    /// Raw outputs per instance.
    pub raw_size: usize,
    /// Shuffle partition count.
    pub num_partitions: usize,
}

impl<'a, H: HistValue> HistogramInput<'a, H> {
    fn num_cols(&self) -> usize {
        self.bins_per_col.len()
    }

    /// Expected distinct `(tree, col)` keys after column sampling, the input
    /// to the partitioner selection rule.
    fn expected_keys(&self, config: &BoostConfig) -> f64 {
        self.tree_ids.len() as f64
            * self.num_cols() as f64
            * config.col_sample_rate_by_tree
            * config.col_sample_rate_by_node
    }

    fn partitioner(&self, config: &BoostConfig, depth: u32) -> Box<dyn KeyPartitioner> {
        select_partitioner(
            self.num_partitions,
            depth,
            self.expected_keys(config),
            self.tree_ids,
            self.num_cols(),
        )
    }
}

// ============================================================================
// Computer trait
// ============================================================================

/// One strategy for producing the depth's node histograms.
pub trait HistogramComputer<H: HistValue>: Send {
    /// Histograms for the active `(tree, node)` pairs at `depth`, merged
    /// across partitions and sorted by key.
    fn compute(
        &mut self,
        input: &HistogramInput<'_, H>,
        depth: u32,
        active: &[(u32, u32)],
        config: &BoostConfig,
    ) -> Vec<(HistKey, Histogram<H>)>;

    /// Drop any state carried between depths before the next round.
    fn reset(&mut self);
}

// ============================================================================
// Shared local pass
// ============================================================================

fn node_row_key(partition: usize, block: usize, row: usize, node: u32) -> u64 {
    let base = ((partition as u64) << 40) | ((block as u64) << 20) | row as u64;
    base ^ (node as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Build the local histograms of one partition.
///
/// `node_filter` decides which `(tree, node)` memberships of a row
/// participate; `active` is the authoritative set of growable nodes.
fn build_local_partition<H: HistValue>(
    partition: usize,
    blocks: &[SampleBlock<H>],
    grads: &[ArrayBlock<H>],
    node_ids: &[RaggedBlock],
    input: &HistogramInput<'_, H>,
    node_filter: &(dyn Fn(u32) -> bool + Sync),
    active: &HashSet<(u32, u32)>,
) -> Vec<(HistKey, Histogram<H>)> {
    let mut totals: HashMap<(u32, u32), (H, H)> = HashMap::new();
    let mut scratches: HashMap<HistKey, DenseScratch<H>> = HashMap::new();

    for (block_idx, block) in blocks.iter().enumerate() {
        let grad_block = &grads[block_idx];
        let node_block = &node_ids[block_idx];

        for row in 0..block.num_rows() {
            let grad_row = grad_block.row(row);
            let bin_row = block.bins.row(row);

            for j in 0..block.tree_ids.row_len(row) {
                let tree = block.tree_ids.get(row, j);
                let node = node_block.get(row, j);
                if !node_filter(node) || !active.contains(&(tree, node)) {
                    continue;
                }
                if let Some(nrs) = input.node_row_selector {
                    if !nrs.contains(tree, node_row_key(partition, block_idx, row, node)) {
                        continue;
                    }
                }

                let pair = 2 * (tree as usize % input.raw_size);
                let grad = grad_row[pair];
                let hess = grad_row[pair + 1];

                let entry = totals
                    .entry((tree, node))
                    .or_insert((H::default(), H::default()));
                entry.0 += grad;
                entry.1 += hess;

                for (col, bin) in bin_row.active_iter() {
                    if !input.selector.contains(tree, col as u64) {
                        continue;
                    }
                    scratches
                        .entry(HistKey::new(tree, node, col))
                        .or_insert_with(|| DenseScratch::new(input.bins_per_col[col as usize]))
                        .add(bin, grad, hess);
                }
            }
        }
    }

    // Credit node totals to the zero bin of every selected column, then fix
    // the zero bin up to the missing/zero mass.
    for (&(tree, node), &(grad_sum, hess_sum)) in &totals {
        for col in 0..input.num_cols() as u32 {
            if !input.selector.contains(tree, col as u64) {
                continue;
            }
            scratches
                .entry(HistKey::new(tree, node, col))
                .or_insert_with(|| DenseScratch::new(input.bins_per_col[col as usize]))
                .add(0, grad_sum, hess_sum);
        }
    }

    let mut out: Vec<(HistKey, Histogram<H>)> = scratches
        .into_iter()
        .map(|(key, mut scratch)| {
            scratch.fixup_zero_bin();
            (key, scratch.freeze())
        })
        .collect();
    out.sort_by_key(|(key, _)| *key);
    out
}

/// Run the local pass on every partition in parallel.
fn build_local<H: HistValue>(
    input: &HistogramInput<'_, H>,
    node_filter: &(dyn Fn(u32) -> bool + Sync),
    active: &HashSet<(u32, u32)>,
) -> Vec<Vec<(HistKey, Histogram<H>)>> {
    (0..input.data.num_partitions())
        .into_par_iter()
        .map(|p| {
            build_local_partition(
                p,
                input.data.partition(p),
                input.grads.partition(p),
                input.node_ids.partition(p),
                input,
                node_filter,
                active,
            )
        })
        .collect()
}

/// Shuffle local histograms and merge per key.
fn reduce_local<H: HistValue>(
    local: Vec<Vec<(HistKey, Histogram<H>)>>,
    partitioner: &dyn KeyPartitioner,
) -> Vec<(HistKey, Histogram<H>)> {
    let ds = PartitionedDataset::from_partitions(local);
    let merged = aggregate_by_key(&ds, partitioner, |acc, other| *acc = acc.plus(&other));
    let mut out = merged.collect();
    out.sort_by_key(|(key, _)| *key);
    out
}

// ============================================================================
// BasicComputer
// ============================================================================

/// Rebuild histograms for every active node at every depth.
#[derive(Debug, Default)]
pub struct BasicComputer;

impl<H: HistValue> HistogramComputer<H> for BasicComputer {
    fn compute(
        &mut self,
        input: &HistogramInput<'_, H>,
        depth: u32,
        active: &[(u32, u32)],
        config: &BoostConfig,
    ) -> Vec<(HistKey, Histogram<H>)> {
        let floor = 1u32 << depth;
        let active_set: HashSet<(u32, u32)> = active.iter().copied().collect();
        let local = build_local(input, &move |node: u32| node >= floor, &active_set);
        let partitioner = input.partitioner(config, depth);
        reduce_local(local, partitioner.as_ref())
    }

    fn reset(&mut self) {}
}

// ============================================================================
// SubtractComputer
// ============================================================================

/// Build right children only; derive left siblings as `parent - right`.
///
/// Parent histograms are retained between depths, and the partitioner is
/// fixed for the whole round so keys whose node id changes stay put. After
/// derivation, histograms that cannot produce a split any more (hessian mass
/// below `2 * min_node_hess`, or at most two stored slots) are dropped and
/// not retained.
pub struct SubtractComputer<H: HistValue> {
    parents: HashMap<HistKey, Histogram<H>>,
    partitioner: Option<SkipNodePartitioner>,
}

impl<H: HistValue> Default for SubtractComputer<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: HistValue> SubtractComputer<H> {
    /// Fresh computer with no retained parents.
    pub fn new() -> Self {
        Self {
            parents: HashMap::new(),
            partitioner: None,
        }
    }

    fn splittable(hist: &Histogram<H>, min_node_hess: f64) -> bool {
        let (_, hess) = hist.total();
        hess >= 2.0 * min_node_hess && hist.stored() > 2
    }
}

impl<H: HistValue> HistogramComputer<H> for SubtractComputer<H> {
    fn compute(
        &mut self,
        input: &HistogramInput<'_, H>,
        depth: u32,
        active: &[(u32, u32)],
        config: &BoostConfig,
    ) -> Vec<(HistKey, Histogram<H>)> {
        // One partitioner per round: node-independent, so the aggregation
        // partitioning survives node-id changes between depths.
        let partitioner = self
            .partitioner
            .get_or_insert_with(|| {
                SkipNodePartitioner::new(
                    input.num_partitions,
                    input.tree_ids.to_vec(),
                    input.num_cols(),
                )
            })
            .clone();
        let active_set: HashSet<(u32, u32)> = active.iter().copied().collect();

        let result: Vec<(HistKey, Histogram<H>)> = if depth == 0 {
            let local = build_local(input, &move |node: u32| node >= 1, &active_set);
            reduce_local(local, &partitioner)
        } else {
            // Build right children only.
            let floor = 1u32 << depth;
            let local = build_local(
                input,
                &move |node: u32| node >= floor && node % 2 == 1,
                &active_set,
            );
            let rights: HashMap<HistKey, Histogram<H>> =
                reduce_local(local, &partitioner).into_iter().collect();

            let mut out: Vec<(HistKey, Histogram<H>)> = Vec::new();
            for &(tree, node) in active {
                for col in 0..input.num_cols() as u32 {
                    if !input.selector.contains(tree, col as u64) {
                        continue;
                    }
                    let key = HistKey::new(tree, node, col);
                    if node % 2 == 1 {
                        if let Some(hist) = rights.get(&key) {
                            out.push((key, hist.clone()));
                        }
                    } else {
                        // Left child: parent minus right sibling.
                        let parent_key = HistKey::new(tree, node / 2, col);
                        let sibling_key = HistKey::new(tree, node + 1, col);
                        if let Some(parent) = self.parents.get(&parent_key) {
                            let left = match rights.get(&sibling_key) {
                                Some(right) => parent.minus(right),
                                None => parent.clone(),
                            };
                            out.push((key, left));
                        }
                    }
                }
            }
            out.sort_by_key(|(key, _)| *key);
            out
        };

        let filtered: Vec<(HistKey, Histogram<H>)> = result
            .into_iter()
            .filter(|(_, hist)| Self::splittable(hist, config.min_node_hess))
            .collect();

        self.parents = filtered.iter().cloned().collect();
        filtered
    }

    fn reset(&mut self) {
        self.parents.clear();
        self.partitioner = None;
    }
}

// ============================================================================
// VoteComputer
// ============================================================================

/// Two-phase top-K column voting.
///
/// Each partition scores its local histograms and votes for its top-K columns
/// per `(tree, node)`; the global vote sum keeps the top `2K` columns, and
/// only those histograms are reduced globally. The reduced histograms are
/// exact; the approximation is that a column missing from every partition's
/// top-K cannot win.
#[derive(Debug, Default)]
pub struct VoteComputer;

impl VoteComputer {
    fn local_top_k<H: HistValue>(
        local: &[(HistKey, Histogram<H>)],
        params: &SplitParams,
        cat_cols: &BTreeSet<u32>,
        rank_cols: &BTreeSet<u32>,
        top_k: usize,
    ) -> Vec<HistKey> {
        // Gain per key, then the K best columns of every (tree, node).
        let mut by_node: HashMap<(u32, u32), Vec<(f64, u32)>> = HashMap::new();
        for (key, hist) in local {
            let gain = find_col_split(
                key.col,
                hist,
                cat_cols.contains(&key.col),
                rank_cols.contains(&key.col),
                params,
            )
            .map(|split| split.gain)
            .unwrap_or(0.0);
            by_node
                .entry((key.tree, key.node))
                .or_default()
                .push((gain, key.col));
        }

        let mut votes = Vec::new();
        for ((tree, node), mut cols) in by_node {
            cols.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            });
            for &(_, col) in cols.iter().take(top_k) {
                votes.push(HistKey::new(tree, node, col));
            }
        }
        votes
    }
}

impl<H: HistValue> HistogramComputer<H> for VoteComputer {
    fn compute(
        &mut self,
        input: &HistogramInput<'_, H>,
        depth: u32,
        active: &[(u32, u32)],
        config: &BoostConfig,
    ) -> Vec<(HistKey, Histogram<H>)> {
        let floor = 1u32 << depth;
        let active_set: HashSet<(u32, u32)> = active.iter().copied().collect();
        let local = build_local(input, &move |node: u32| node >= floor, &active_set);

        // Phase 1: one vote per partition for each of its top-K columns.
        let params = SplitParams::from_config(config);
        let votes: Vec<Vec<HistKey>> = local
            .par_iter()
            .map(|part| {
                Self::local_top_k(part, &params, input.cat_cols, input.rank_cols, config.top_k)
            })
            .collect();

        // Phase 2: global vote count, top 2K columns per (tree, node).
        let mut counts: HashMap<(u32, u32), HashMap<u32, u32>> = HashMap::new();
        for key in votes.into_iter().flatten() {
            *counts
                .entry((key.tree, key.node))
                .or_default()
                .entry(key.col)
                .or_insert(0) += 1;
        }
        let mut survivors: HashSet<HistKey> = HashSet::new();
        for ((tree, node), cols) in counts {
            let mut ranked: Vec<(u32, u32)> = cols.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            for &(col, _) in ranked.iter().take(2 * config.top_k) {
                survivors.insert(HistKey::new(tree, node, col));
            }
        }

        // Phase 3: reduce only surviving keys.
        let filtered: Vec<Vec<(HistKey, Histogram<H>)>> = local
            .into_iter()
            .map(|part| {
                part.into_iter()
                    .filter(|(key, _)| survivors.contains(key))
                    .collect()
            })
            .collect();
        let partitioner = input.partitioner(config, depth);
        reduce_local(filtered, partitioner.as_ref())
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ArrayBlock, BinBlock, CompactArray, RaggedBlock};
    use crate::width::IdWidth;

    /// Two partitions, one block each, 4 rows per block, 2 columns, one tree.
    /// Gradients are the row's label, hessians 1.
    fn toy_input() -> (
        PartitionedDataset<SampleBlock<f64>>,
        PartitionedDataset<ArrayBlock<f64>>,
        PartitionedDataset<RaggedBlock>,
        Vec<u32>,
    ) {
        let mut data_parts = Vec::new();
        let mut grad_parts = Vec::new();
        let mut node_parts = Vec::new();
        let mut value = 0u32;

        for _ in 0..2 {
            let mut bins = BinBlock::new(2, IdWidth::U8, IdWidth::U8);
            let mut labels = ArrayBlock::new(1);
            let mut grads = ArrayBlock::new(2);
            let mut raw = ArrayBlock::new(1);
            let mut weights = Vec::new();
            for _ in 0..4 {
                // Column 0 cycles bins 1..=4, column 1 stays in bin 1 except
                // every fourth row, which is bin 0 (missing).
                let b0 = 1 + value % 4;
                if value % 4 == 3 {
                    bins.push_row([(0, b0)]);
                } else {
                    bins.push_row([(0, b0), (1, 1)]);
                }
                labels.push_row(&[value as f64]);
                grads.push_row(&[value as f64, 1.0]);
                raw.push_row(&[0.0]);
                weights.push(1.0);
                value += 1;
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
            node_parts.push(vec![RaggedBlock::uniform(IdWidth::U16, rows, &[1])]);
        }

        (
            PartitionedDataset::from_partitions(data_parts),
            PartitionedDataset::from_partitions(grad_parts),
            PartitionedDataset::from_partitions(node_parts),
            vec![0],
        )
    }

    fn input<'a>(
        data: &'a PartitionedDataset<SampleBlock<f64>>,
        grads: &'a PartitionedDataset<ArrayBlock<f64>>,
        node_ids: &'a PartitionedDataset<RaggedBlock>,
        tree_ids: &'a [u32],
        bins_per_col: &'a [u32],
        selector: &'a Selector,
        empty: &'a BTreeSet<u32>,
    ) -> HistogramInput<'a, f64> {
        HistogramInput {
            data,
            grads,
            node_ids,
            selector,
            node_row_selector: None,
            bins_per_col,
            cat_cols: empty,
            rank_cols: empty,
            tree_ids,
            raw_size: 1,
            num_partitions: 2,
        }
    }

    #[test]
    fn basic_histograms_conserve_mass() {
        let (data, grads, node_ids, tree_ids) = toy_input();
        let bins_per_col = vec![8u32, 8];
        let selector = Selector::True;
        let empty = BTreeSet::new();
        let inp = input(&data, &grads, &node_ids, &tree_ids, &bins_per_col, &selector, &empty);

        let mut computer = BasicComputer;
        let hists = computer.compute(&inp, 0, &[(0, 1)], &BoostConfig::default());
        assert_eq!(hists.len(), 2, "one histogram per column");

        // Total gradient = sum 0..8 = 28, hessian = 8 rows.
        for (key, hist) in &hists {
            let (g, h) = hist.total();
            assert!((g - 28.0).abs() < 1e-9, "col {} grad {g}", key.col);
            assert!((h - 8.0).abs() < 1e-9, "col {} hess {h}", key.col);
        }
    }

    #[test]
    fn zero_bin_holds_missing_mass() {
        let (data, grads, node_ids, tree_ids) = toy_input();
        let bins_per_col = vec![8u32, 8];
        let selector = Selector::True;
        let empty = BTreeSet::new();
        let inp = input(&data, &grads, &node_ids, &tree_ids, &bins_per_col, &selector, &empty);

        let mut computer = BasicComputer;
        let hists = computer.compute(&inp, 0, &[(0, 1)], &BoostConfig::default());

        // Column 1: rows 3 and 7 are missing (bin 0): grads 3 + 7 = 10.
        let col1 = hists
            .iter()
            .find(|(key, _)| key.col == 1)
            .map(|(_, h)| h)
            .unwrap();
        let (g0, h0) = col1.bin_stats(0);
        assert!((g0 - 10.0).abs() < 1e-9, "missing grad {g0}");
        assert!((h0 - 2.0).abs() < 1e-9, "missing hess {h0}");
    }

    #[test]
    fn column_selector_limits_columns() {
        let (data, grads, node_ids, tree_ids) = toy_input();
        let bins_per_col = vec![8u32, 8];
        // A selector that only accepts column 0.
        let selector = Selector::hash(1, 0.5);
        let col0 = selector.contains(0, 0);
        let col1 = selector.contains(0, 1);
        let empty = BTreeSet::new();
        let inp = input(&data, &grads, &node_ids, &tree_ids, &bins_per_col, &selector, &empty);

        let mut computer = BasicComputer;
        let hists = computer.compute(&inp, 0, &[(0, 1)], &BoostConfig::default());
        let expected = (col0 as usize) + (col1 as usize);
        assert_eq!(hists.len(), expected);
    }

    #[test]
    fn subtract_matches_basic_at_root() {
        let (data, grads, node_ids, tree_ids) = toy_input();
        let bins_per_col = vec![8u32, 8];
        let selector = Selector::True;
        let empty = BTreeSet::new();
        let inp = input(&data, &grads, &node_ids, &tree_ids, &bins_per_col, &selector, &empty);
        let config = BoostConfig::default();

        let basic = BasicComputer.compute(&inp, 0, &[(0, 1)], &config);
        let mut sub = SubtractComputer::new();
        let subtracted = sub.compute(&inp, 0, &[(0, 1)], &config);
        assert_eq!(basic, subtracted);
    }

    #[test]
    fn subtract_derives_left_from_parent() {
        let (data, grads, node_ids, tree_ids) = toy_input();
        let bins_per_col = vec![8u32, 8];
        let selector = Selector::True;
        let empty = BTreeSet::new();
        let config = BoostConfig {
            min_node_hess: 0.0,
            ..Default::default()
        };

        let inp = input(&data, &grads, &node_ids, &tree_ids, &bins_per_col, &selector, &empty);
        let mut sub = SubtractComputer::new();
        let roots = sub.compute(&inp, 0, &[(0, 1)], &config);
        assert!(!roots.is_empty());

        // Route rows to children: bins 1..=2 of column 0 left (node 2),
        // bins 3..=4 right (node 3).
        let routed = data.zip_map(&node_ids, |block, nodes| {
            let mut out = nodes.clone();
            for row in 0..block.num_rows() {
                let bin = block.bins.row(row).get(0);
                out.set(row, 0, if bin <= 2 { 2 } else { 3 });
            }
            out
        });

        let inp2 = input(&data, &grads, &routed, &tree_ids, &bins_per_col, &selector, &empty);
        let children = sub.compute(&inp2, 1, &[(0, 2), (0, 3)], &config);

        let basic = BasicComputer.compute(&inp2, 1, &[(0, 2), (0, 3)], &config);
        let basic_map: HashMap<HistKey, Histogram<f64>> = basic.into_iter().collect();

        for (key, hist) in &children {
            let expect = &basic_map[key];
            let (g, h) = hist.total();
            let (eg, eh) = expect.total();
            assert!((g - eg).abs() < 1e-9, "{key:?}: {g} vs {eg}");
            assert!((h - eh).abs() < 1e-9, "{key:?}: {h} vs {eh}");
            for b in 0..hist.num_bins() {
                let (bg, bh) = hist.bin_stats(b);
                let (xg, xh) = expect.bin_stats(b);
                assert!((bg - xg).abs() < 1e-9, "{key:?} bin {b}");
                assert!((bh - xh).abs() < 1e-9, "{key:?} bin {b}");
            }
        }
    }

    #[test]
    fn vote_keeps_winning_columns() {
        let (data, grads, node_ids, tree_ids) = toy_input();
        let bins_per_col = vec![8u32, 8];
        let selector = Selector::True;
        let empty = BTreeSet::new();
        let config = BoostConfig {
            top_k: 1,
            ..Default::default()
        };
        let inp = input(&data, &grads, &node_ids, &tree_ids, &bins_per_col, &selector, &empty);

        let mut computer = VoteComputer;
        let hists = computer.compute(&inp, 0, &[(0, 1)], &config);
        // With K = 1 the survivors are at most 2 columns; both exist here.
        assert!(!hists.is_empty() && hists.len() <= 2);

        // Surviving histograms are exact.
        for (key, hist) in &hists {
            let (g, h) = hist.total();
            assert!((g - 28.0).abs() < 1e-9, "col {} grad {g}", key.col);
            assert!((h - 8.0).abs() < 1e-9, "col {} hess {h}", key.col);
        }
    }
}
