//! Instance sampling: which rows contribute to which trees of a round.
//!
//! Every sampler produces blocks bundling the surviving rows' bins, labels,
//! weights and raw predictions together with a per-row tree-id list: the base
//! trees of the round that row participates in. Granularities:
//!
//! - none: every row participates in every tree;
//! - partition / block: whole partitions or blocks are kept per tree;
//! - row: individual rows are kept per tree and blocks are rebuilt;
//! - GOSS: rows with large gradient norm are always kept, the rest are
//!   down-sampled and re-weighted to compensate.
//!
//! All decisions go through [`Selector`], so sampling is a pure function of
//! `(seed, tree, key)` and identical on every thread.

use serde::{Deserialize, Serialize};

use crate::config::{BoostConfig, SubSampleType};
use crate::data::{ArrayBlock, BinBlock, CompactArray, RaggedBlock};
use crate::errors::{GbmError, Result};
use crate::exec::PartitionedDataset;
use crate::selector::Selector;
use crate::width::{HistValue, IdWidth};

// ============================================================================
// Block bundles
// ============================================================================

/// One block of discretized training instances, materialized once per fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceBlock {
    /// Discretized rows.
    pub bins: BinBlock,
    /// Raw label rows (`row_len` = label dimension).
    pub labels: ArrayBlock<f64>,
    /// Instance weights.
    pub weights: CompactArray<f64>,
}

impl InstanceBlock {
    /// Number of rows in the block.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.bins.num_rows()
    }
}

/// One sampled block for a boosting round.
#[derive(Debug, Clone)]
pub struct SampleBlock<H> {
    /// Discretized rows.
    pub bins: BinBlock,
    /// Raw label rows.
    pub labels: ArrayBlock<f64>,
    /// Instance weights, already re-weighted for GOSS survivors.
    pub weights: CompactArray<f64>,
    /// Raw predictions at the start of the round (`row_len` = raw size).
    pub raw: ArrayBlock<H>,
    /// Base trees each row participates in.
    pub tree_ids: RaggedBlock,
}

impl<H> SampleBlock<H> {
    /// Number of rows in the block.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.bins.num_rows()
    }
}

// ============================================================================
// Stable sampling keys
// ============================================================================

/// Stable key of a block within the dataset.
#[inline]
fn block_key(partition: usize, block: usize) -> u64 {
    ((partition as u64) << 40) | block as u64
}

/// Stable key of a row within the dataset.
#[inline]
fn row_key(partition: usize, block: usize, row: usize) -> u64 {
    ((partition as u64) << 40) | ((block as u64) << 20) | row as u64
}

// ============================================================================
// Sampling entry point
// ============================================================================

/// Sample the training data for one boosting round.
///
/// `grad_norms` (per-row squared gradient norms) is required for GOSS and
/// ignored otherwise.
pub fn sample_blocks<H: HistValue>(
    data: &PartitionedDataset<InstanceBlock>,
    raw: &PartitionedDataset<ArrayBlock<H>>,
    config: &BoostConfig,
    iteration: usize,
    num_trees: usize,
    tree_width: IdWidth,
    grad_norms: Option<&PartitionedDataset<CompactArray<f64>>>,
) -> Result<PartitionedDataset<SampleBlock<H>>> {
    let all_trees: Vec<u32> = (0..num_trees as u32).collect();
    let seed = config
        .effective_seed()
        .wrapping_add(iteration as u64)
        .wrapping_mul(0x9E37_79B9_7F4A_7C15);

    let rate = config.sub_sample_rate_by_tree;
    let kind = if rate >= 1.0 && config.sub_sample_type != SubSampleType::Goss {
        // Full rate degenerates to the no-sampling path regardless of kind.
        None
    } else {
        Some(config.sub_sample_type)
    };

    match kind {
        None => Ok(data.zip_map(raw, |block, raw_block| SampleBlock {
            bins: block.bins.clone(),
            labels: block.labels.clone(),
            weights: block.weights.clone(),
            raw: raw_block.clone(),
            tree_ids: RaggedBlock::uniform(tree_width, block.num_rows(), &all_trees),
        })),
        Some(SubSampleType::Partition) => {
            let selector = Selector::hash(seed, rate);
            Ok(sample_by_unit(data, raw, &selector, num_trees, tree_width, UnitGranularity::Partition))
        }
        Some(SubSampleType::Block) => {
            let selector = Selector::hash(seed, rate);
            Ok(sample_by_unit(data, raw, &selector, num_trees, tree_width, UnitGranularity::Block))
        }
        Some(SubSampleType::Row) => {
            let selector = Selector::hash(seed, rate);
            Ok(sample_rows(data, raw, &selector, num_trees, tree_width, config.block_size))
        }
        Some(SubSampleType::Goss) => {
            let norms = grad_norms.ok_or_else(|| {
                GbmError::data("GOSS sampling requires per-row gradient norms")
            })?;
            sample_goss(data, raw, norms, config, seed, num_trees, tree_width)
        }
    }
}

// ============================================================================
// Partition / block granularity
// ============================================================================

#[derive(Clone, Copy, PartialEq)]
enum UnitGranularity {
    Partition,
    Block,
}

fn sample_by_unit<H: HistValue>(
    data: &PartitionedDataset<InstanceBlock>,
    raw: &PartitionedDataset<ArrayBlock<H>>,
    selector: &Selector,
    num_trees: usize,
    tree_width: IdWidth,
    granularity: UnitGranularity,
) -> PartitionedDataset<SampleBlock<H>> {
    data.zip_map(raw, |block, raw_block| (block.clone(), raw_block.clone()))
        .map_partitions(|partition, items| {
            items
                .iter()
                .enumerate()
                .filter_map(|(block_idx, (block, raw_block))| {
                    let key = match granularity {
                        UnitGranularity::Partition => block_key(partition, 0),
                        UnitGranularity::Block => block_key(partition, block_idx),
                    };
                    let trees = selector.index(key, num_trees as u32);
                    if trees.is_empty() {
                        return None;
                    }
                    Some(SampleBlock {
                        bins: block.bins.clone(),
                        labels: block.labels.clone(),
                        weights: block.weights.clone(),
                        raw: raw_block.clone(),
                        tree_ids: RaggedBlock::uniform(tree_width, block.num_rows(), &trees),
                    })
                })
                .collect()
        })
}

// ============================================================================
// Row granularity
// ============================================================================

fn sample_rows<H: HistValue>(
    data: &PartitionedDataset<InstanceBlock>,
    raw: &PartitionedDataset<ArrayBlock<H>>,
    selector: &Selector,
    num_trees: usize,
    tree_width: IdWidth,
    block_size: usize,
) -> PartitionedDataset<SampleBlock<H>> {
    data.zip_map(raw, |block, raw_block| (block.clone(), raw_block.clone()))
        .map_partitions(|partition, items| {
            let mut out: Vec<SampleBlock<H>> = Vec::new();
            let mut builder: Option<SampleBlockBuilder<H>> = None;

            for (block_idx, (block, raw_block)) in items.iter().enumerate() {
                for row in 0..block.num_rows() {
                    let key = row_key(partition, block_idx, row);
                    let trees = selector.index(key, num_trees as u32);
                    if trees.is_empty() {
                        continue;
                    }
                    let b = builder.get_or_insert_with(|| {
                        SampleBlockBuilder::new(
                            block.bins.num_cols(),
                            block.labels.row_len(),
                            raw_block.row_len(),
                            &block.bins,
                            tree_width,
                        )
                    });
                    b.push(block, raw_block, row, &trees, 1.0);
                    if b.len() >= block_size {
                        out.push(builder.take().unwrap().finish());
                    }
                }
            }
            if let Some(b) = builder {
                if b.len() > 0 {
                    out.push(b.finish());
                }
            }
            out
        })
}

/// Accumulates surviving rows into fresh blocks of at most `block_size` rows.
struct SampleBlockBuilder<H> {
    bins: BinBlock,
    labels: ArrayBlock<f64>,
    weights: Vec<f64>,
    raw: ArrayBlock<H>,
    tree_ids: RaggedBlock,
}

impl<H: HistValue> SampleBlockBuilder<H> {
    fn new(
        num_cols: usize,
        label_len: usize,
        raw_len: usize,
        template: &BinBlock,
        tree_width: IdWidth,
    ) -> Self {
        Self {
            bins: BinBlock::new(num_cols, template_col_width(template), template_bin_width(template)),
            labels: ArrayBlock::new(label_len),
            weights: Vec::new(),
            raw: ArrayBlock::new(raw_len),
            tree_ids: RaggedBlock::new(tree_width),
        }
    }

    fn push(
        &mut self,
        block: &InstanceBlock,
        raw_block: &ArrayBlock<H>,
        row: usize,
        trees: &[u32],
        weight_scale: f64,
    ) {
        self.bins.push_row(block.bins.row(row).active_iter());
        self.labels.push_row(block.labels.row(row));
        self.weights.push(block.weights.get(row) * weight_scale);
        self.raw.push_row(raw_block.row(row));
        self.tree_ids.push_row(trees.iter().copied());
    }

    fn len(&self) -> usize {
        self.bins.num_rows()
    }

    fn finish(self) -> SampleBlock<H> {
        SampleBlock {
            bins: self.bins,
            labels: self.labels,
            weights: CompactArray::from_vec(self.weights),
            raw: self.raw,
            tree_ids: self.tree_ids,
        }
    }
}

fn template_col_width(block: &BinBlock) -> IdWidth {
    IdWidth::for_range(block.num_cols().saturating_sub(1) as u64)
}

fn template_bin_width(_block: &BinBlock) -> IdWidth {
    // Bin ids are bounded by max_bins; u16 covers every admissible config
    // while keeping rebuilt blocks compact.
    IdWidth::U16
}

// ============================================================================
// GOSS
// ============================================================================

fn sample_goss<H: HistValue>(
    data: &PartitionedDataset<InstanceBlock>,
    raw: &PartitionedDataset<ArrayBlock<H>>,
    grad_norms: &PartitionedDataset<CompactArray<f64>>,
    config: &BoostConfig,
    seed: u64,
    num_trees: usize,
    tree_width: IdWidth,
) -> Result<PartitionedDataset<SampleBlock<H>>> {
    let top_rate = config.top_rate;
    let other_rate = config.other_rate;
    let threshold = top_quantile_threshold(grad_norms, top_rate, config.aggregation_depth);
    let keep_rate = other_rate / (1.0 - top_rate);
    let amplify = (1.0 - top_rate) / other_rate;
    let selector = Selector::hash(seed ^ 0x5DEE_CE66_D154_21C7, keep_rate);
    let all_trees: Vec<u32> = (0..num_trees as u32).collect();

    let bundled = data
        .zip_map(raw, |block, raw_block| (block.clone(), raw_block.clone()))
        .zip_map(grad_norms, |pair, norms| (pair.0.clone(), pair.1.clone(), norms.clone()));

    Ok(bundled.map_partitions(|partition, items| {
        let mut out: Vec<SampleBlock<H>> = Vec::new();
        let mut builder: Option<SampleBlockBuilder<H>> = None;

        for (block_idx, (block, raw_block, norms)) in items.iter().enumerate() {
            for row in 0..block.num_rows() {
                let norm = norms.get(row);
                let (trees, scale) = if norm >= threshold {
                    (all_trees.clone(), 1.0)
                } else {
                    let key = row_key(partition, block_idx, row);
                    let trees = selector.index(key, num_trees as u32);
                    if trees.is_empty() {
                        continue;
                    }
                    (trees, amplify)
                };
                let b = builder.get_or_insert_with(|| {
                    SampleBlockBuilder::new(
                        block.bins.num_cols(),
                        block.labels.row_len(),
                        raw_block.row_len(),
                        &block.bins,
                        tree_width,
                    )
                });
                b.push(block, raw_block, row, &trees, scale);
                if b.len() >= config.block_size {
                    out.push(builder.take().unwrap().finish());
                }
            }
        }
        if let Some(b) = builder {
            if b.len() > 0 {
                out.push(b.finish());
            }
        }
        out
    }))
}

/// Threshold such that roughly `top_rate` of the mass sits at or above it.
fn top_quantile_threshold(
    grad_norms: &PartitionedDataset<CompactArray<f64>>,
    top_rate: f64,
    aggregation_depth: usize,
) -> f64 {
    let mut summaries: Vec<QuantileSummary> = (0..grad_norms.num_partitions())
        .map(|p| {
            let mut summary = QuantileSummary::new();
            for block in grad_norms.partition(p) {
                for &value in block.as_slice() {
                    summary.insert(value);
                }
            }
            summary.compress();
            summary
        })
        .collect();

    // Tree reduce: merge in groups sized so roughly `aggregation_depth`
    // rounds reach a single summary.
    while summaries.len() > 1 {
        let group = group_size(summaries.len(), aggregation_depth);
        summaries = summaries
            .chunks(group)
            .map(|chunk| {
                let mut merged = chunk[0].clone();
                for other in &chunk[1..] {
                    merged.merge(other);
                }
                merged.compress();
                merged
            })
            .collect();
    }

    summaries
        .pop()
        .map(|s| s.query(1.0 - top_rate))
        .unwrap_or(f64::INFINITY)
}

fn group_size(n: usize, depth: usize) -> usize {
    let size = (n as f64).powf(1.0 / depth.max(1) as f64).ceil() as usize;
    size.max(2)
}

// ============================================================================
// QuantileSummary
// ============================================================================

/// Bounded-size quantile sketch over a stream of values.
///
/// Keeps a sorted sample of at most `MAX_SAMPLES` values; compression selects
/// evenly spaced ranks, so merged summaries stay rank-representative. Good
/// enough for the GOSS threshold, which tolerates a small rank error.
#[derive(Debug, Clone, Default)]
pub struct QuantileSummary {
    values: Vec<f64>,
}

const MAX_SAMPLES: usize = 1024;

impl QuantileSummary {
    /// Empty summary.
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Observe one value.
    pub fn insert(&mut self, value: f64) {
        if value.is_finite() {
            self.values.push(value);
            if self.values.len() >= 4 * MAX_SAMPLES {
                self.compress();
            }
        }
    }

    /// Fold another summary in.
    pub fn merge(&mut self, other: &Self) {
        self.values.extend_from_slice(&other.values);
    }

    /// Shrink the retained sample to `MAX_SAMPLES` evenly spaced ranks.
    pub fn compress(&mut self) {
        self.values
            .sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        if self.values.len() > MAX_SAMPLES {
            let step = self.values.len() as f64 / MAX_SAMPLES as f64;
            let compressed: Vec<f64> = (0..MAX_SAMPLES)
                .map(|i| self.values[((i as f64 + 0.5) * step) as usize])
                .collect();
            self.values = compressed;
        }
    }

    /// Approximate `q`-quantile (q in [0, 1]).
    pub fn query(&self, q: f64) -> f64 {
        if self.values.is_empty() {
            return f64::INFINITY;
        }
        let mut sorted = self.values.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((q.clamp(0.0, 1.0)) * (sorted.len() - 1) as f64).round() as usize;
        sorted[rank]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::width::IdWidth;

    fn toy_data(
        rows_per_block: usize,
        blocks_per_partition: usize,
        partitions: usize,
    ) -> (
        PartitionedDataset<InstanceBlock>,
        PartitionedDataset<ArrayBlock<f64>>,
    ) {
        let mut parts = Vec::new();
        let mut raw_parts = Vec::new();
        let mut counter = 0u32;
        for _ in 0..partitions {
            let mut blocks = Vec::new();
            let mut raws = Vec::new();
            for _ in 0..blocks_per_partition {
                let mut bins = BinBlock::new(3, IdWidth::U8, IdWidth::U8);
                let mut labels = ArrayBlock::new(1);
                let mut weights = Vec::new();
                let mut raw = ArrayBlock::new(1);
                for _ in 0..rows_per_block {
                    bins.push_row([(0, 1 + counter % 3), (2, 1)]);
                    labels.push_row(&[counter as f64]);
                    weights.push(1.0);
                    raw.push_row(&[0.0]);
                    counter += 1;
                }
                blocks.push(InstanceBlock {
                    bins,
                    labels,
                    weights: CompactArray::from_vec(weights),
                });
                raws.push(raw);
            }
            parts.push(blocks);
            raw_parts.push(raws);
        }
        (
            PartitionedDataset::from_partitions(parts),
            PartitionedDataset::from_partitions(raw_parts),
        )
    }

    fn config_with(kind: SubSampleType, rate: f64) -> BoostConfig {
        BoostConfig {
            sub_sample_type: kind,
            sub_sample_rate_by_tree: rate,
            seed: 11,
            ..Default::default()
        }
    }

    #[test]
    fn full_rate_keeps_everything() {
        let (data, raw) = toy_data(4, 2, 2);
        let config = config_with(SubSampleType::Row, 1.0);
        let sampled =
            sample_blocks(&data, &raw, &config, 0, 2, IdWidth::U8, None).unwrap();
        let total: usize = sampled.iter().map(|b| b.num_rows()).sum();
        assert_eq!(total, 16);
        for block in sampled.iter() {
            for row in 0..block.num_rows() {
                assert_eq!(block.tree_ids.row(row).collect::<Vec<_>>(), vec![0, 1]);
            }
        }
    }

    #[test]
    fn block_sampling_keeps_whole_blocks() {
        let (data, raw) = toy_data(4, 8, 2);
        let config = config_with(SubSampleType::Block, 0.5);
        let sampled =
            sample_blocks(&data, &raw, &config, 0, 1, IdWidth::U8, None).unwrap();
        for block in sampled.iter() {
            assert_eq!(block.num_rows(), 4);
            // All rows of a kept block share the block's tree list.
            let first: Vec<u32> = block.tree_ids.row(0).collect();
            for row in 1..block.num_rows() {
                assert_eq!(block.tree_ids.row(row).collect::<Vec<u32>>(), first);
            }
        }
        let total: usize = sampled.iter().map(|b| b.num_rows()).sum();
        assert!(total < 64 && total > 0, "total {total}");
    }

    #[test]
    fn partition_sampling_is_all_or_nothing_per_partition() {
        let (data, raw) = toy_data(4, 4, 6);
        let config = config_with(SubSampleType::Partition, 0.5);
        let sampled =
            sample_blocks(&data, &raw, &config, 0, 1, IdWidth::U8, None).unwrap();
        for p in 0..sampled.num_partitions() {
            let n = sampled.partition(p).len();
            assert!(n == 0 || n == 4, "partition kept {n} blocks");
        }
    }

    #[test]
    fn row_sampling_rebuilds_blocks() {
        let (data, raw) = toy_data(100, 2, 1);
        let mut config = config_with(SubSampleType::Row, 0.4);
        config.block_size = 16;
        let sampled =
            sample_blocks(&data, &raw, &config, 0, 1, IdWidth::U8, None).unwrap();
        let total: usize = sampled.iter().map(|b| b.num_rows()).sum();
        assert!((40..=120).contains(&total), "kept {total} of 200");
        for block in sampled.iter() {
            assert!(block.num_rows() <= 16);
            assert_eq!(block.labels.num_rows(), block.num_rows());
            assert_eq!(block.raw.num_rows(), block.num_rows());
            assert_eq!(block.weights.len(), block.num_rows());
        }
    }

    #[test]
    fn row_sampling_is_reproducible() {
        let (data, raw) = toy_data(50, 2, 2);
        let config = config_with(SubSampleType::Row, 0.5);
        let a = sample_blocks(&data, &raw, &config, 3, 2, IdWidth::U8, None).unwrap();
        let b = sample_blocks(&data, &raw, &config, 3, 2, IdWidth::U8, None).unwrap();
        let rows_a: Vec<f64> = a.iter().flat_map(|blk| blk.labels.flat().to_vec()).collect();
        let rows_b: Vec<f64> = b.iter().flat_map(|blk| blk.labels.flat().to_vec()).collect();
        assert_eq!(rows_a, rows_b);
    }

    #[test]
    fn goss_keeps_top_rows_for_all_trees() {
        let (data, raw) = toy_data(100, 1, 1);
        let mut config = config_with(SubSampleType::Goss, 1.0);
        config.top_rate = 0.2;
        config.other_rate = 0.1;

        // Row i has gradient norm i: the top 20 rows are 80..100.
        let norms = data.map(|block| {
            CompactArray::from_vec(block.labels.rows().map(|r| r[0]).collect())
        });
        let sampled =
            sample_blocks(&data, &raw, &config, 0, 2, IdWidth::U8, Some(&norms)).unwrap();

        let amplify = (1.0 - 0.2) / 0.1;
        let mut top_kept = 0;
        for block in sampled.iter() {
            for row in 0..block.num_rows() {
                let label = block.labels.row(row)[0];
                let trees: Vec<u32> = block.tree_ids.row(row).collect();
                let weight = block.weights.get(row);
                if weight == 1.0 {
                    // Above the threshold: joins every tree at full weight.
                    assert_eq!(trees, vec![0, 1], "top rows join every tree");
                    if label >= 80.0 {
                        top_kept += 1;
                    }
                } else {
                    assert!((weight - amplify).abs() < 1e-9, "weight {weight}");
                    assert!(!trees.is_empty());
                }
            }
        }
        assert!(top_kept >= 19, "top rows must survive, kept {top_kept}");
    }

    #[test]
    fn quantile_summary_tracks_rank() {
        let mut summary = QuantileSummary::new();
        for i in 0..10_000 {
            summary.insert(i as f64);
        }
        summary.compress();
        let q80 = summary.query(0.8);
        assert!((q80 - 8000.0).abs() < 200.0, "q80 {q80}");
    }

    #[test]
    fn quantile_summary_merge_preserves_rank() {
        let mut a = QuantileSummary::new();
        let mut b = QuantileSummary::new();
        for i in 0..5000 {
            a.insert(i as f64);
            b.insert((5000 + i) as f64);
        }
        a.compress();
        b.compress();
        a.merge(&b);
        a.compress();
        let median = a.query(0.5);
        assert!((median - 5000.0).abs() < 300.0, "median {median}");
    }
}
