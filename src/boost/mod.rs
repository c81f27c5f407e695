//! The boosting loop.
//!
//! [`GBM`] composes everything: per-iteration sampling, gradient computation,
//! forest growth, DART dropout, raw-prediction maintenance, metrics,
//! callbacks, early stopping and checkpointing. [`GBMRegressor`] and
//! [`GBMClassifier`] are the thin task-specific entry points.
//!
//! Raw predictions are maintained incrementally: the training (and optional
//! validation) datasets carry one raw row per instance, updated after every
//! round by the new trees' contributions plus, under DART, the weight-rescale
//! deltas of the dropped trees. Tree weights are stored with the step size
//! folded in, so a tree's contribution is always `weight * tree(bins)`.

use std::collections::BTreeMap;

use rand::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

use crate::config::{BoostConfig, BoostType, FloatType, HistogramType, SubSampleType};
use crate::data::{ArrayBlock, BinBlock, BinRow, CompactArray, RaggedBlock};
use crate::discretizer::Discretizer;
use crate::errors::{GbmError, Result};
use crate::exec::{Broadcast, Checkpointer, PartitionedDataset, ResourceCleaner};
use crate::histogram::{BasicComputer, HistogramComputer, SubtractComputer, VoteComputer};
use crate::logger::TrainingLogger;
use crate::metrics::{ErrorRate, EvalFunc, EvalState, EarlyStopper, LogLoss, Rmse};
use crate::model::GBMModel;
use crate::objective::{LogisticObj, ObjFunc, SquareObj};
use crate::sampling::{sample_blocks, InstanceBlock, SampleBlock};
use crate::tree::{grow_forest, GrowForestArgs, LevelRefitter, TreeModel};
use crate::width::{HistValue, WidthPlan};

mod dataset;

pub use dataset::Dataset;

// ============================================================================
// Callbacks
// ============================================================================

/// What a callback sees after an iteration.
///
/// The model snapshot is a deep copy; mutating state through a callback is
/// impossible by construction. Hyperparameter changes go through
/// [`CallbackOutcome::next_config`] and take effect from the next iteration.
pub struct CallbackContext<'a> {
    /// Config active during the finished iteration.
    pub config: &'a BoostConfig,
    /// Snapshot of the model after the iteration.
    pub snapshot: &'a GBMModel,
    /// Zero-based iteration index.
    pub iteration: usize,
    /// Metric history on the training set, one map per iteration.
    pub train_metrics: &'a [BTreeMap<String, f64>],
    /// Metric history on the validation set, one map per iteration.
    pub test_metrics: &'a [BTreeMap<String, f64>],
}

/// Callback decision.
#[derive(Debug, Default)]
pub struct CallbackOutcome {
    /// Stop training after this iteration.
    pub stop: bool,
    /// Config to use from the next iteration on; validated before adoption.
    pub next_config: Option<BoostConfig>,
}

/// Hook invoked after every boosting iteration.
pub trait Callback: Send {
    /// Inspect the iteration and decide whether to stop or re-configure.
    fn after_iteration(&mut self, ctx: &CallbackContext<'_>) -> CallbackOutcome;
}

// ============================================================================
// GBM engine
// ============================================================================

/// The boosting engine, parameterized by a [`BoostConfig`].
pub struct GBM {
    config: BoostConfig,
}

impl GBM {
    /// Create an engine.
    pub fn new(config: BoostConfig) -> Self {
        Self { config }
    }

    /// Fit an ensemble.
    ///
    /// `evals` drive the metric history; the first one on the validation set
    /// is the early-stopping metric. `callbacks` run after every iteration.
    pub fn fit(
        &self,
        objective: &dyn ObjFunc,
        evals: &[&dyn EvalFunc],
        callbacks: &mut [&mut dyn Callback],
        train: &Dataset,
        valid: Option<&Dataset>,
    ) -> Result<GBMModel> {
        self.config.validate()?;
        train.validate()?;
        if let Some(valid) = valid {
            valid.validate()?;
            if valid.num_cols() != train.num_cols() {
                return Err(GbmError::data(format!(
                    "validation data has {} columns, training data has {}",
                    valid.num_cols(),
                    train.num_cols()
                )));
            }
        }

        let discretizer = Discretizer::fit(
            train.feature_rows(),
            train.num_cols(),
            &self.config,
        )?;

        let mut run = || match self.config.float_type {
            FloatType::Float => {
                self.fit_core::<f32>(objective, evals, callbacks, train, valid, &discretizer)
            }
            FloatType::Double => {
                self.fit_core::<f64>(objective, evals, callbacks, train, valid, &discretizer)
            }
        };

        if self.config.n_threads > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.n_threads)
                .build()
                .map_err(|e| GbmError::data(format!("thread pool creation failed: {e}")))?;
            pool.install(run)
        } else {
            run()
        }
    }

    fn fit_core<H: HistValue>(
        &self,
        objective: &dyn ObjFunc,
        evals: &[&dyn EvalFunc],
        callbacks: &mut [&mut dyn Callback],
        train: &Dataset,
        valid: Option<&Dataset>,
        discretizer: &Discretizer,
    ) -> Result<GBMModel> {
        let mut config = self.config.clone();
        let mut logger = TrainingLogger::new(config.verbosity);

        let raw_size = objective.raw_size();
        if train.label_dim() != raw_size {
            return Err(GbmError::data(format!(
                "objective `{}` expects {} label values per row, got {}",
                objective.name(),
                raw_size,
                train.label_dim()
            )));
        }

        let num_cols = train.num_cols();
        let bins_per_col = discretizer.bins_per_col();
        let plan = WidthPlan::select(
            config.num_trees_per_round(raw_size),
            config.max_depth,
            num_cols,
            config.max_bins,
        );
        logger.debug(&format!("width plan: {plan:?}"));

        // Materialize discretized blocks once.
        let blocks = build_blocks(train, discretizer, &config)?;
        let valid_blocks = match valid {
            Some(v) => Some(build_blocks(v, discretizer, &config)?),
            None => None,
        };

        // Base score: inverse link of the weighted mean label.
        let raw_base = base_score(train, objective);
        let mut raw = init_raw::<H>(&blocks, &raw_base);
        let mut valid_raw = valid_blocks
            .as_ref()
            .map(|vb| init_raw::<H>(vb, &raw_base));

        // Checkpointers; disabled without a directory.
        let ckpt_interval = config
            .checkpoint_dir
            .as_ref()
            .map(|_| config.checkpoint_interval)
            .unwrap_or(-1);
        let ckpt_dir = config
            .checkpoint_dir
            .clone()
            .unwrap_or_else(|| std::path::PathBuf::from("."));
        let mut ckpt_train = Checkpointer::new(ckpt_dir.clone(), "train-raw", ckpt_interval, 2);
        let mut ckpt_valid = Checkpointer::new(ckpt_dir, "test-raw", ckpt_interval, 2);

        let mut computer: Box<dyn HistogramComputer<H>> = match config.histogram_type {
            HistogramType::Basic => Box::new(BasicComputer),
            HistogramType::Subtract => Box::new(SubtractComputer::new()),
            HistogramType::Vote => Box::new(VoteComputer),
        };

        let mut trees: Vec<TreeModel> = Vec::new();
        let mut weights: Vec<f64> = Vec::new();
        let mut tree_outputs: Vec<u32> = Vec::new();
        let mut train_history: Vec<BTreeMap<String, f64>> = Vec::new();
        let mut test_history: Vec<BTreeMap<String, f64>> = Vec::new();

        let mut stopper = if config.early_stop_iters >= 1 && valid.is_some() && !evals.is_empty()
        {
            Some(EarlyStopper::new(
                config.early_stop_iters as usize,
                evals[0].is_larger_better(),
            ))
        } else {
            None
        };

        logger.start_training(config.max_iter, train.num_rows(), num_cols);

        let mut iteration = 0;
        while iteration < config.max_iter {
            let mut cleaner = ResourceCleaner::new();
            let num_trees = config.num_trees_per_round(raw_size);

            // --- DART dropout -------------------------------------------------
            let dropped: Vec<usize> = if config.boost_type == BoostType::Dart && !trees.is_empty()
            {
                select_dropped(&config, iteration, trees.len())
            } else {
                Vec::new()
            };
            let dropped_refs: Vec<(&TreeModel, f64, usize)> = dropped
                .iter()
                .map(|&t| (&trees[t], weights[t], tree_outputs[t] as usize))
                .collect();

            // --- Sampling + gradients ----------------------------------------
            let grad_norms = if config.sub_sample_type == SubSampleType::Goss {
                Some(blocks.zip_map(&raw, |block, raw_block| {
                    grad_norm_block(objective, block, raw_block, &dropped_refs)
                }))
            } else {
                None
            };

            let sampled = sample_blocks(
                &blocks,
                &raw,
                &config,
                iteration,
                num_trees,
                plan.tree,
                grad_norms.as_ref(),
            )?;
            let grads = sampled.map(|block| sampled_grad_block(objective, block, &dropped_refs));

            // --- Grow the round's forest --------------------------------------
            let tree_cfg = Broadcast::new(crate::config::TreeConfig::new(
                &config, iteration, num_cols,
            ));
            cleaner.register_broadcast(&tree_cfg);

            let refitter = LeafRefitter {
                objective,
                step_size: config.step_size,
                dropped: dropped_refs.clone(),
            };
            let args = GrowForestArgs {
                config: &config,
                tree_cfg: tree_cfg.value(),
                data: &sampled,
                grads,
                bins_per_col: &bins_per_col,
                num_trees,
                raw_size,
                node_width: plan.node,
                refitter: if config.leaf_boosting {
                    Some(&refitter)
                } else {
                    None
                },
            };
            let round_trees = grow_forest(args, computer.as_mut());
            drop(refitter);

            let grown: Vec<(u32, TreeModel)> = round_trees
                .into_iter()
                .enumerate()
                .filter(|(_, tree)| !tree.is_empty())
                .map(|(t, tree)| ((t % raw_size) as u32, tree))
                .collect();

            if grown.is_empty() {
                logger.info(&format!(
                    "iter {iteration}: no tree found an admissible split, finishing"
                ));
                cleaner.clear(false, &logger).ok();
                break;
            }

            // --- Incorporate trees and update raw predictions -----------------
            let k = dropped.len();
            let new_weight = config.step_size / (k as f64 + 1.0);
            let rescales: Vec<(&TreeModel, f64, usize)> = dropped
                .iter()
                .map(|&t| {
                    let old = weights[t];
                    let scaled = old * k as f64 / (k as f64 + 1.0);
                    (&trees[t], scaled - old, tree_outputs[t] as usize)
                })
                .collect();

            let additions: Vec<(&TreeModel, f64, usize)> = grown
                .iter()
                .map(|(output, tree)| (tree, new_weight, *output as usize))
                .collect();

            raw = apply_contributions(&blocks, &raw, &additions, &rescales);
            if let (Some(vb), Some(vr)) = (valid_blocks.as_ref(), valid_raw.as_ref()) {
                valid_raw = Some(apply_contributions(vb, vr, &additions, &rescales));
            }

            drop(additions);
            drop(rescales);
            drop(dropped_refs);

            for &t in &dropped {
                weights[t] *= k as f64 / (k as f64 + 1.0);
            }
            for (output, tree) in grown {
                trees.push(tree);
                weights.push(new_weight);
                tree_outputs.push(output);
            }

            // --- Metrics -------------------------------------------------------
            let mut train_metrics = BTreeMap::new();
            for func in evals {
                train_metrics.insert(
                    func.name().to_string(),
                    compute_metric(&blocks, &raw, objective, *func),
                );
            }
            let mut test_metrics = BTreeMap::new();
            if let (Some(vb), Some(vr)) = (valid_blocks.as_ref(), valid_raw.as_ref()) {
                for func in evals {
                    test_metrics.insert(
                        func.name().to_string(),
                        compute_metric(vb, vr, objective, *func),
                    );
                }
            }

            let mut log_line: Vec<(String, f64)> = train_metrics
                .iter()
                .map(|(name, value)| (format!("train-{name}"), *value))
                .collect();
            log_line.extend(
                test_metrics
                    .iter()
                    .map(|(name, value)| (format!("valid-{name}"), *value)),
            );
            logger.log_iteration(iteration, &log_line);

            train_history.push(train_metrics);
            test_history.push(test_metrics);

            // --- Checkpointing -------------------------------------------------
            ckpt_train.update(&raw, iteration)?;
            if let Some(vr) = valid_raw.as_ref() {
                ckpt_valid.update(vr, iteration)?;
            }

            // --- Callbacks -----------------------------------------------------
            let mut stop_requested = false;
            let mut next_config: Option<BoostConfig> = None;
            if !callbacks.is_empty() {
                let snapshot = build_model(
                    objective,
                    &raw_base,
                    discretizer,
                    &trees,
                    &weights,
                    &tree_outputs,
                );
                let ctx = CallbackContext {
                    config: &config,
                    snapshot: &snapshot,
                    iteration,
                    train_metrics: &train_history,
                    test_metrics: &test_history,
                };
                for callback in callbacks.iter_mut() {
                    let outcome = callback.after_iteration(&ctx);
                    stop_requested |= outcome.stop;
                    if let Some(cfg) = outcome.next_config {
                        cfg.validate()?;
                        next_config = Some(cfg);
                    }
                }
            }

            // --- Early stopping ------------------------------------------------
            if let Some(stopper) = stopper.as_mut() {
                let name = evals[0].name();
                if let Some(value) = test_history
                    .last()
                    .and_then(|metrics| metrics.get(name))
                    .copied()
                {
                    if stopper.update(value) {
                        logger.log_early_stop(iteration, stopper.best_iteration(), name);
                        cleaner.clear(false, &logger).ok();
                        break;
                    }
                }
            }

            cleaner.clear(false, &logger).ok();

            if stop_requested {
                logger.info(&format!("iter {iteration}: callback requested stop"));
                break;
            }
            if let Some(cfg) = next_config {
                config = cfg;
            }
            iteration += 1;
        }

        ckpt_train.clear(false, &logger).ok();
        ckpt_valid.clear(false, &logger).ok();
        logger.finish_training(trees.len());

        Ok(build_model(
            objective,
            &raw_base,
            discretizer,
            &trees,
            &weights,
            &tree_outputs,
        ))
    }
}

// ============================================================================
// Task wrappers
// ============================================================================

/// Regression entry point (squared loss, RMSE history).
pub struct GBMRegressor {
    /// Hyperparameters.
    pub config: BoostConfig,
}

impl GBMRegressor {
    /// Create a regressor.
    pub fn new(config: BoostConfig) -> Self {
        Self { config }
    }

    /// Fit on scalar-label data.
    pub fn fit(&self, train: &Dataset, valid: Option<&Dataset>) -> Result<GBMModel> {
        GBM::new(self.config.clone()).fit(&SquareObj, &[&Rmse], &mut [], train, valid)
    }
}

/// Binary classification entry point (logistic loss, log-loss and error
/// history).
pub struct GBMClassifier {
    /// Hyperparameters.
    pub config: BoostConfig,
}

impl GBMClassifier {
    /// Create a classifier.
    pub fn new(config: BoostConfig) -> Self {
        Self { config }
    }

    /// Fit on {0, 1}-label data.
    pub fn fit(&self, train: &Dataset, valid: Option<&Dataset>) -> Result<GBMModel> {
        GBM::new(self.config.clone()).fit(
            &LogisticObj,
            &[&LogLoss, &ErrorRate],
            &mut [],
            train,
            valid,
        )
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn build_model(
    objective: &dyn ObjFunc,
    raw_base: &[f64],
    discretizer: &Discretizer,
    trees: &[TreeModel],
    weights: &[f64],
    tree_outputs: &[u32],
) -> GBMModel {
    GBMModel {
        obj_name: objective.name().to_string(),
        raw_base_score: raw_base.to_vec(),
        discretizer: discretizer.clone(),
        trees: trees.to_vec(),
        weights: weights.to_vec(),
        tree_outputs: tree_outputs.to_vec(),
        metadata: BTreeMap::from([(
            "format".to_string(),
            "groveboost/1".to_string(),
        )]),
    }
}

fn base_score(train: &Dataset, objective: &dyn ObjFunc) -> Vec<f64> {
    let dim = train.label_dim();
    let mut sums = vec![0.0; dim];
    let mut weight_sum = 0.0;
    for row in 0..train.num_rows() {
        let w = train.weight(row);
        weight_sum += w;
        for (k, &y) in train.label(row).iter().enumerate() {
            sums[k] += w * y;
        }
    }
    if weight_sum > 0.0 {
        for s in &mut sums {
            *s /= weight_sum;
        }
    }
    objective.inverse_transform(&mut sums);
    sums
}

fn build_blocks(
    ds: &Dataset,
    discretizer: &Discretizer,
    config: &BoostConfig,
) -> Result<PartitionedDataset<InstanceBlock>> {
    let plan = WidthPlan::select(1, config.max_depth, ds.num_cols(), config.max_bins);
    let mut out = Vec::new();
    let mut bins = BinBlock::new(ds.num_cols(), plan.col, plan.bin);
    let mut labels = ArrayBlock::new(ds.label_dim());
    let mut weights = Vec::new();

    for row in 0..ds.num_rows() {
        bins.push_row(discretizer.transform(ds.features(row)));
        labels.push_row(ds.label(row));
        weights.push(ds.weight(row));

        if bins.num_rows() >= config.block_size {
            out.push(InstanceBlock {
                bins: std::mem::replace(&mut bins, BinBlock::new(ds.num_cols(), plan.col, plan.bin)),
                labels: std::mem::replace(&mut labels, ArrayBlock::new(ds.label_dim())),
                weights: CompactArray::from_vec(std::mem::take(&mut weights)),
            });
        }
    }
    if bins.num_rows() > 0 {
        out.push(InstanceBlock {
            bins,
            labels,
            weights: CompactArray::from_vec(weights),
        });
    }
    if out.is_empty() {
        return Err(GbmError::data("training dataset is empty"));
    }
    Ok(PartitionedDataset::partition_items(out, config.num_partitions))
}

fn init_raw<H: HistValue>(
    blocks: &PartitionedDataset<InstanceBlock>,
    raw_base: &[f64],
) -> PartitionedDataset<ArrayBlock<H>> {
    let base: Vec<H> = raw_base.iter().map(|&v| H::from_f64(v)).collect();
    blocks.map(move |block| {
        let mut out = ArrayBlock::new(base.len());
        for _ in 0..block.num_rows() {
            out.push_row(&base);
        }
        out
    })
}

/// DART: pick which existing trees to drop this iteration.
fn select_dropped(config: &BoostConfig, iteration: usize, num_trees: usize) -> Vec<usize> {
    let seed = config
        .effective_seed()
        .wrapping_add(0x0D0D_0D0D)
        .wrapping_add((iteration as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);

    if rng.gen::<f64>() < config.drop_skip {
        return Vec::new();
    }

    // Binomial draw, then clamp into [min_drop, min(max_drop, n)]; a draw of
    // zero means this iteration behaves like plain gbtree.
    let candidates = (0..num_trees)
        .filter(|_| rng.gen::<f64>() < config.drop_rate)
        .count();
    if candidates == 0 {
        return Vec::new();
    }
    let k = candidates
        .max(config.min_drop.max(1))
        .min(config.max_drop.min(num_trees));
    if k == 0 {
        return Vec::new();
    }

    // Uniform without replacement via partial Fisher-Yates.
    let mut indices: Vec<usize> = (0..num_trees).collect();
    for i in 0..k {
        let j = rng.gen_range(i..num_trees);
        indices.swap(i, j);
    }
    let mut dropped = indices[..k].to_vec();
    dropped.sort_unstable();
    dropped
}

/// Transformed scores for one row after removing dropped contributions.
fn effective_scores<H: HistValue>(
    objective: &dyn ObjFunc,
    raw: &[H],
    bins: BinRow<'_>,
    dropped: &[(&TreeModel, f64, usize)],
) -> Vec<f64> {
    let mut scores: Vec<f64> = raw.iter().map(|v| v.to_f64()).collect();
    for &(tree, weight, output) in dropped {
        scores[output] -= weight * tree.predict(&|c| bins.get(c));
    }
    objective.transform(&mut scores);
    scores
}

/// Grad-hess block for one sampled block, weighted by instance weight.
fn sampled_grad_block<H: HistValue>(
    objective: &dyn ObjFunc,
    block: &SampleBlock<H>,
    dropped: &[(&TreeModel, f64, usize)],
) -> ArrayBlock<H> {
    let raw_size = block.raw.row_len();
    let mut out = ArrayBlock::new(2 * raw_size);
    let mut grad = vec![0.0; raw_size];
    let mut hess = vec![0.0; raw_size];
    let mut row_out = vec![H::default(); 2 * raw_size];

    for row in 0..block.num_rows() {
        let scores = effective_scores(objective, block.raw.row(row), block.bins.row(row), dropped);
        objective.compute(block.labels.row(row), &scores, &mut grad, &mut hess);
        let w = block.weights.get(row);
        for k in 0..raw_size {
            row_out[2 * k] = H::from_f64(grad[k] * w);
            row_out[2 * k + 1] = H::from_f64(hess[k] * w);
        }
        out.push_row(&row_out);
    }
    out
}

/// Per-row squared gradient norms over the full training data (GOSS input).
fn grad_norm_block<H: HistValue>(
    objective: &dyn ObjFunc,
    block: &InstanceBlock,
    raw_block: &ArrayBlock<H>,
    dropped: &[(&TreeModel, f64, usize)],
) -> CompactArray<f64> {
    let raw_size = raw_block.row_len();
    let mut grad = vec![0.0; raw_size];
    let mut hess = vec![0.0; raw_size];
    let mut norms = Vec::with_capacity(block.num_rows());

    for row in 0..block.num_rows() {
        let scores = effective_scores(objective, raw_block.row(row), block.bins.row(row), dropped);
        objective.compute(block.labels.row(row), &scores, &mut grad, &mut hess);
        let w = block.weights.get(row);
        norms.push(grad.iter().map(|g| (g * w) * (g * w)).sum());
    }
    CompactArray::from_vec(norms)
}

/// Add tree contributions (and DART rescale deltas) to raw predictions.
fn apply_contributions<H: HistValue>(
    blocks: &PartitionedDataset<InstanceBlock>,
    raw: &PartitionedDataset<ArrayBlock<H>>,
    additions: &[(&TreeModel, f64, usize)],
    rescales: &[(&TreeModel, f64, usize)],
) -> PartitionedDataset<ArrayBlock<H>> {
    blocks.zip_map(raw, |block, raw_block| {
        let mut out = raw_block.clone();
        for row in 0..block.num_rows() {
            let bins = block.bins.row(row);
            let out_row = out.row_mut(row);
            for &(tree, weight, output) in additions.iter().chain(rescales) {
                let value = weight * tree.predict(&|c| bins.get(c));
                out_row[output] = out_row[output] + H::from_f64(value);
            }
        }
        out
    })
}

/// Incremental metric over aligned block/raw datasets.
fn compute_metric<H: HistValue>(
    blocks: &PartitionedDataset<InstanceBlock>,
    raw: &PartitionedDataset<ArrayBlock<H>>,
    objective: &dyn ObjFunc,
    func: &dyn EvalFunc,
) -> f64 {
    let partials: Vec<EvalState> = (0..blocks.num_partitions())
        .into_par_iter()
        .map(|p| {
            let mut state = EvalState::default();
            for (block, raw_block) in blocks.partition(p).iter().zip(raw.partition(p).iter()) {
                for row in 0..block.num_rows() {
                    let mut scores: Vec<f64> =
                        raw_block.row(row).iter().map(|v| v.to_f64()).collect();
                    objective.transform(&mut scores);
                    func.update(&mut state, block.weights.get(row), block.labels.row(row), &scores);
                }
            }
            state
        })
        .collect();
    let merged = partials
        .into_iter()
        .fold(EvalState::default(), EvalState::merge);
    func.finish(&merged)
}

/// Per-level Newton refit used when `leaf_boosting` is on.
struct LeafRefitter<'a> {
    objective: &'a dyn ObjFunc,
    step_size: f64,
    dropped: Vec<(&'a TreeModel, f64, usize)>,
}

impl<'a, H: HistValue> LevelRefitter<H> for LeafRefitter<'a> {
    fn refit(
        &self,
        block: &SampleBlock<H>,
        node_ids: &RaggedBlock,
        node_weights: &std::collections::HashMap<(u32, u32), f64>,
    ) -> ArrayBlock<H> {
        let raw_size = block.raw.row_len();
        let mut out = ArrayBlock::new(2 * raw_size);
        let mut grad = vec![0.0; raw_size];
        let mut hess = vec![0.0; raw_size];
        let mut row_out = vec![H::default(); 2 * raw_size];

        for row in 0..block.num_rows() {
            let bins = block.bins.row(row);
            let mut scores: Vec<f64> = block.raw.row(row).iter().map(|v| v.to_f64()).collect();
            for &(tree, weight, output) in &self.dropped {
                scores[output] -= weight * tree.predict(&|c| bins.get(c));
            }
            // Fold in the growing trees' current node predictions (first
            // forest member per output).
            for j in 0..block.tree_ids.row_len(row) {
                let tree = block.tree_ids.get(row, j);
                if (tree as usize) < raw_size {
                    let node = node_ids.get(row, j);
                    if let Some(&w) = node_weights.get(&(tree, node)) {
                        scores[tree as usize] += self.step_size * w;
                    }
                }
            }
            self.objective.transform(&mut scores);
            self.objective
                .compute(block.labels.row(row), &scores, &mut grad, &mut hess);
            let w = block.weights.get(row);
            for k in 0..raw_size {
                row_out[2 * k] = H::from_f64(grad[k] * w);
                row_out[2 * k + 1] = H::from_f64(hess[k] * w);
            }
            out.push_row(&row_out);
        }
        out
    }
}
