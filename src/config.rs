//! Training configuration.
//!
//! [`BoostConfig`] is the immutable per-iteration snapshot of every
//! hyperparameter. It is validated once at the start of `fit`; violations
//! produce [`GbmError::InvalidConfig`] naming the parameter and its
//! constraint. Callbacks may publish an updated config that takes effect from
//! the next iteration, so nothing inside the loop mutates a live config.
//!
//! Use struct construction with `..Default::default()`:
//!
//! ```
//! use groveboost::config::{BoostConfig, BoostType};
//!
//! let config = BoostConfig {
//!     boost_type: BoostType::Dart,
//!     max_iter: 50,
//!     step_size: 0.05,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::collections::BTreeSet;

use crate::errors::{GbmError, Result};
use crate::logger::Verbosity;
use crate::selector::Selector;

// ============================================================================
// Enumerated options
// ============================================================================

/// Boosting regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoostType {
    /// Standard gradient boosting.
    #[default]
    GbTree,
    /// Dropouts meet Multiple Additive Regression Trees.
    Dart,
}

/// Histogram computation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistogramType {
    /// Rebuild histograms for every active node at every depth.
    #[default]
    Basic,
    /// Build right children only and derive left siblings by subtraction.
    Subtract,
    /// Two-phase top-K column voting before the global reduce.
    Vote,
}

/// Granularity of instance sub-sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubSampleType {
    /// Keep or drop individual rows; surviving rows are re-blocked.
    Row,
    /// Keep or drop whole blocks.
    #[default]
    Block,
    /// Keep or drop whole partitions.
    Partition,
    /// Gradient-based one-side sampling.
    Goss,
}

/// Accumulation width for histograms, tree weights and raw predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FloatType {
    /// Single precision.
    #[default]
    Float,
    /// Double precision.
    Double,
}

/// Storage level for cached datasets.
///
/// `None` is not representable on purpose: every cached dataset must be
/// materialized somewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageLevel {
    /// Deserialized in memory, spill to disk.
    MemoryAndDisk,
    /// Serialized in memory, spill to disk.
    MemoryAndDiskSer,
    /// Disk only.
    DiskOnly,
}

impl StorageLevel {
    /// Parse the textual form used in persisted configs.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MEMORY_AND_DISK" => Some(Self::MemoryAndDisk),
            "MEMORY_AND_DISK_SER" => Some(Self::MemoryAndDiskSer),
            "DISK_ONLY" => Some(Self::DiskOnly),
            _ => None,
        }
    }
}

// ============================================================================
// BoostConfig
// ============================================================================

/// Immutable per-iteration hyperparameter snapshot.
#[derive(Debug, Clone)]
pub struct BoostConfig {
    // --- Boosting ---
    /// Boosting regime.
    pub boost_type: BoostType,
    /// Number of boosting iterations.
    pub max_iter: usize,
    /// Shrinkage applied to every new tree's contribution.
    pub step_size: f64,
    /// Number of trees trained in parallel per round, per raw output.
    pub forest_size: usize,

    // --- Tree structure ---
    /// Maximum tree depth, in [1, 30].
    pub max_depth: u32,
    /// Maximum number of leaves per tree.
    pub max_leaves: usize,
    /// Maximum number of discretization bins per column.
    pub max_bins: usize,

    // --- Regularization ---
    /// L1 regularization on leaf weights.
    pub reg_alpha: f64,
    /// L2 regularization on leaf weights.
    pub reg_lambda: f64,
    /// Minimum gain required to adopt a split.
    pub min_gain: f64,
    /// Minimum hessian sum required in each child.
    pub min_node_hess: f64,

    // --- Instance sampling ---
    /// Fraction of instances participating in each tree.
    pub sub_sample_rate_by_tree: f64,
    /// Fraction of instances participating at each node expansion.
    pub sub_sample_rate_by_node: f64,
    /// Granularity of instance sub-sampling.
    pub sub_sample_type: SubSampleType,
    /// GOSS: fraction of instances kept by top gradient norm.
    pub top_rate: f64,
    /// GOSS: sampling fraction of the remaining instances.
    pub other_rate: f64,

    // --- Column sampling ---
    /// Fraction of columns available to each tree.
    pub col_sample_rate_by_tree: f64,
    /// Fraction of tree columns available at each depth level.
    pub col_sample_rate_by_node: f64,

    // --- Histograms ---
    /// Histogram computation strategy.
    pub histogram_type: HistogramType,
    /// Vote strategy: local candidate columns per node.
    pub top_k: usize,
    /// Categorical columns with at most this many non-zero bins are split
    /// by exhaustive bipartition enumeration.
    pub max_brute_bins: usize,

    // --- DART ---
    /// Expected fraction of existing trees dropped per iteration.
    pub drop_rate: f64,
    /// Probability of skipping dropout entirely for an iteration.
    pub drop_skip: f64,
    /// Minimum number of trees dropped when dropout happens.
    pub min_drop: usize,
    /// Maximum number of trees dropped when dropout happens.
    pub max_drop: usize,

    // --- Data layout ---
    /// Maximum instances per block.
    pub block_size: usize,
    /// Number of partitions for the training datasets.
    pub num_partitions: usize,
    /// Accumulation width for histograms and raw predictions.
    pub float_type: FloatType,
    /// Treat explicit zeros as missing values during discretization.
    pub zero_as_missing: bool,
    /// Discretization recipe, e.g. `"width:round"`.
    pub discretization_type: String,
    /// Columns treated as categorical.
    pub cat_cols: BTreeSet<usize>,
    /// Columns treated as ranking columns.
    pub rank_cols: BTreeSet<usize>,

    // --- Execution ---
    /// Random seed; -1 derives a fixed default.
    pub seed: i64,
    /// Threads for the fit call: 0 uses the global pool, n > 0 a dedicated one.
    pub n_threads: usize,
    /// Depth of the tree-reduce used when merging quantile summaries.
    pub aggregation_depth: usize,
    /// Refit gradients after each adopted level (per-level Newton step).
    pub leaf_boosting: bool,

    // --- Checkpointing & storage ---
    /// Checkpoint cadence in iterations; -1 disables checkpointing.
    pub checkpoint_interval: i32,
    /// Directory for checkpoint files; unset disables checkpointing too.
    pub checkpoint_dir: Option<std::path::PathBuf>,
    /// Storage level for per-iteration sampled data.
    pub storage_level1: StorageLevel,
    /// Storage level for training-side raw predictions.
    pub storage_level2: StorageLevel,
    /// Storage level for test-side raw predictions.
    pub storage_level3: StorageLevel,

    // --- Evaluation ---
    /// Early stopping patience on the designated test metric; -1 disables.
    pub early_stop_iters: i32,
    /// Logging verbosity.
    pub verbosity: Verbosity,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            boost_type: BoostType::GbTree,
            max_iter: 20,
            step_size: 0.1,
            forest_size: 1,
            max_depth: 5,
            max_leaves: 1000,
            max_bins: 256,
            reg_alpha: 0.0,
            reg_lambda: 1.0,
            min_gain: 0.0,
            min_node_hess: 1.0,
            sub_sample_rate_by_tree: 1.0,
            sub_sample_rate_by_node: 1.0,
            sub_sample_type: SubSampleType::Block,
            top_rate: 0.2,
            other_rate: 0.1,
            col_sample_rate_by_tree: 1.0,
            col_sample_rate_by_node: 1.0,
            histogram_type: HistogramType::Basic,
            top_k: 20,
            max_brute_bins: 10,
            drop_rate: 0.0,
            drop_skip: 0.5,
            min_drop: 0,
            max_drop: 50,
            block_size: 4096,
            num_partitions: 4,
            float_type: FloatType::Float,
            zero_as_missing: false,
            discretization_type: "width:round".to_string(),
            cat_cols: BTreeSet::new(),
            rank_cols: BTreeSet::new(),
            seed: -1,
            n_threads: 0,
            aggregation_depth: 2,
            leaf_boosting: false,
            checkpoint_interval: 10,
            checkpoint_dir: None,
            storage_level1: StorageLevel::MemoryAndDisk,
            storage_level2: StorageLevel::MemoryAndDiskSer,
            storage_level3: StorageLevel::DiskOnly,
            early_stop_iters: -1,
            verbosity: Verbosity::default(),
        }
    }
}

impl BoostConfig {
    /// Validate every hyperparameter against its constraint.
    ///
    /// Returns the first violation found, naming the parameter.
    pub fn validate(&self) -> Result<()> {
        fn rate_in_unit(
            param: &'static str,
            value: f64,
            inclusive_one: bool,
        ) -> Result<()> {
            let ok = if inclusive_one {
                value > 0.0 && value <= 1.0
            } else {
                value > 0.0 && value < 1.0
            };
            if ok {
                Ok(())
            } else {
                let bound = if inclusive_one { "(0, 1]" } else { "(0, 1)" };
                Err(GbmError::config(param, format!("must be in {bound}, got {value}")))
            }
        }

        if !(1..=30).contains(&self.max_depth) {
            return Err(GbmError::config(
                "max_depth",
                format!("must be in [1, 30], got {}", self.max_depth),
            ));
        }
        if self.max_leaves < 2 {
            return Err(GbmError::config(
                "max_leaves",
                format!("must be >= 2, got {}", self.max_leaves),
            ));
        }
        if self.max_bins < 4 {
            return Err(GbmError::config(
                "max_bins",
                format!("must be >= 4, got {}", self.max_bins),
            ));
        }
        if self.step_size <= 0.0 || !self.step_size.is_finite() {
            return Err(GbmError::config(
                "step_size",
                format!("must be > 0, got {}", self.step_size),
            ));
        }
        if self.reg_alpha < 0.0 {
            return Err(GbmError::config("reg_alpha", "must be >= 0"));
        }
        if self.reg_lambda < 0.0 {
            return Err(GbmError::config("reg_lambda", "must be >= 0"));
        }
        if self.min_gain < 0.0 {
            return Err(GbmError::config("min_gain", "must be >= 0"));
        }
        if self.min_node_hess < 0.0 {
            return Err(GbmError::config("min_node_hess", "must be >= 0"));
        }
        rate_in_unit("sub_sample_rate_by_tree", self.sub_sample_rate_by_tree, true)?;
        rate_in_unit("sub_sample_rate_by_node", self.sub_sample_rate_by_node, true)?;
        rate_in_unit("col_sample_rate_by_tree", self.col_sample_rate_by_tree, true)?;
        rate_in_unit("col_sample_rate_by_node", self.col_sample_rate_by_node, true)?;
        if self.sub_sample_type == SubSampleType::Goss {
            rate_in_unit("top_rate", self.top_rate, false)?;
            rate_in_unit("other_rate", self.other_rate, false)?;
            // GOSS amplification requires head room above the kept fraction.
            if self.top_rate + self.other_rate >= 1.0 {
                return Err(GbmError::config(
                    "other_rate",
                    format!(
                        "top_rate + other_rate must be < 1, got {}",
                        self.top_rate + self.other_rate
                    ),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.drop_rate) {
            return Err(GbmError::config("drop_rate", "must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.drop_skip) {
            return Err(GbmError::config("drop_skip", "must be in [0, 1]"));
        }
        if self.min_drop > self.max_drop {
            return Err(GbmError::config(
                "min_drop",
                format!(
                    "must be <= max_drop, got min_drop={} max_drop={}",
                    self.min_drop, self.max_drop
                ),
            ));
        }
        if self.block_size == 0 {
            return Err(GbmError::config("block_size", "must be > 0"));
        }
        if self.forest_size == 0 {
            return Err(GbmError::config("forest_size", "must be > 0"));
        }
        if self.num_partitions == 0 {
            return Err(GbmError::config("num_partitions", "must be > 0"));
        }
        if self.top_k == 0 {
            return Err(GbmError::config("top_k", "must be > 0"));
        }
        if self.aggregation_depth == 0 {
            return Err(GbmError::config("aggregation_depth", "must be > 0"));
        }
        if self.checkpoint_interval != -1 && self.checkpoint_interval < 1 {
            return Err(GbmError::config(
                "checkpoint_interval",
                format!("must be -1 or >= 1, got {}", self.checkpoint_interval),
            ));
        }
        if self.early_stop_iters != -1 && self.early_stop_iters < 1 {
            return Err(GbmError::config(
                "early_stop_iters",
                format!("must be -1 or >= 1, got {}", self.early_stop_iters),
            ));
        }
        Ok(())
    }

    /// Effective random seed; a negative configured seed maps to a fixed one.
    #[inline]
    pub fn effective_seed(&self) -> u64 {
        if self.seed < 0 {
            0x6772_6f76_6542_6f6f
        } else {
            self.seed as u64
        }
    }

    /// Trees trained per boosting round (`forest_size * raw_size`).
    #[inline]
    pub fn num_trees_per_round(&self, raw_size: usize) -> usize {
        self.forest_size * raw_size
    }
}

// ============================================================================
// TreeConfig
// ============================================================================

/// Per-iteration tree-building snapshot derived from [`BoostConfig`].
///
/// Captures the column sampling decisions made for one round so histogram
/// construction and split finding agree on the allowed columns.
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Boosting iteration this config belongs to.
    pub iteration: usize,
    /// Column selector for this round (tree-level and level-level combined).
    pub column_selector: Selector,
    /// Sampled columns that are categorical.
    pub cat_cols: BTreeSet<u32>,
    /// Sampled columns that are ranking columns.
    pub rank_cols: BTreeSet<u32>,
    /// Total column count of the discretized space.
    pub num_cols: usize,
}

impl TreeConfig {
    /// Build the tree config for one iteration.
    pub fn new(config: &BoostConfig, iteration: usize, num_cols: usize) -> Self {
        let column_selector = if config.col_sample_rate_by_tree < 1.0 {
            Selector::hash(
                config
                    .effective_seed()
                    .wrapping_add(iteration as u64),
                config.col_sample_rate_by_tree,
            )
        } else {
            Selector::True
        };

        let cat_cols = config.cat_cols.iter().map(|&c| c as u32).collect();
        let rank_cols = config.rank_cols.iter().map(|&c| c as u32).collect();

        Self {
            iteration,
            column_selector,
            cat_cols,
            rank_cols,
            num_cols,
        }
    }

    /// Whether the column is categorical.
    #[inline]
    pub fn is_cat(&self, col: u32) -> bool {
        self.cat_cols.contains(&col)
    }

    /// Whether the column is a ranking column.
    #[inline]
    pub fn is_rank(&self, col: u32) -> bool {
        self.rank_cols.contains(&col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(BoostConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_depth() {
        let config = BoostConfig {
            max_depth: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_depth"));

        let config = BoostConfig {
            max_depth: 31,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_goss_rates_summing_past_one() {
        let config = BoostConfig {
            sub_sample_type: SubSampleType::Goss,
            top_rate: 0.6,
            other_rate: 0.5,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("other_rate"));
    }

    #[test]
    fn goss_rates_ignored_for_other_samplers() {
        // The same rates are fine when GOSS is not selected.
        let config = BoostConfig {
            sub_sample_type: SubSampleType::Block,
            top_rate: 0.6,
            other_rate: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_checkpoint_interval() {
        let config = BoostConfig {
            checkpoint_interval: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BoostConfig {
            checkpoint_interval: -1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn negative_seed_maps_to_fixed_default() {
        let a = BoostConfig {
            seed: -1,
            ..Default::default()
        };
        let b = BoostConfig {
            seed: -7,
            ..Default::default()
        };
        assert_eq!(a.effective_seed(), b.effective_seed());

        let c = BoostConfig {
            seed: 42,
            ..Default::default()
        };
        assert_eq!(c.effective_seed(), 42);
    }

    #[test]
    fn num_trees_per_round_multiplies_raw_size() {
        let config = BoostConfig {
            forest_size: 3,
            ..Default::default()
        };
        assert_eq!(config.num_trees_per_round(1), 3);
        assert_eq!(config.num_trees_per_round(4), 12);
    }
}
