//! Feature discretization.
//!
//! The engine trains on bin vectors, never on raw features; discretization is
//! a collaborator the model carries around for prediction. Bin 0 is reserved
//! for zero/missing everywhere: NaN always maps to 0, and explicit zeros do
//! too when `zero_as_missing` is set.
//!
//! The `"width:round"` recipe is equal-width binning over the observed value
//! range with rounded bin edges. Categorical columns map category `c` to bin
//! `c + 1`; ranking columns hold small ordered integers and bin them
//! directly.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::config::BoostConfig;
use crate::errors::{GbmError, Result};

// ============================================================================
// Column recipes
// ============================================================================

/// Per-column discretization recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColDiscretizer {
    /// Equal-width bins over `[min, max]`.
    Numeric {
        /// Smallest observed finite value.
        min: f64,
        /// Largest observed finite value.
        max: f64,
        /// Total bins including the reserved zero bin.
        num_bins: u32,
    },
    /// Category `c` maps to bin `c + 1`.
    Categorical {
        /// Number of categories.
        num_cats: u32,
    },
    /// Ordered integer values binned directly, capped at `num_bins - 1`.
    Ranking {
        /// Total bins including the reserved zero bin.
        num_bins: u32,
    },
}

impl ColDiscretizer {
    /// Total bins including the reserved zero bin.
    pub fn num_bins(&self) -> u32 {
        match self {
            Self::Numeric { num_bins, .. } => *num_bins,
            Self::Categorical { num_cats } => num_cats + 1,
            Self::Ranking { num_bins } => *num_bins,
        }
    }

    fn bin_for(&self, value: f64, zero_as_missing: bool) -> u32 {
        if value.is_nan() {
            return 0;
        }
        if zero_as_missing && value == 0.0 {
            return 0;
        }
        match self {
            Self::Numeric { min, max, num_bins } => {
                let usable = num_bins - 1;
                if usable == 0 || max <= min {
                    return 1.min(*num_bins - 1);
                }
                let width = (max - min) / usable as f64;
                let raw = ((value - min) / width).floor() as i64 + 1;
                raw.clamp(1, usable as i64) as u32
            }
            Self::Categorical { num_cats } => {
                let cat = value.round();
                if cat < 0.0 || cat >= *num_cats as f64 {
                    0
                } else {
                    cat as u32 + 1
                }
            }
            Self::Ranking { num_bins } => {
                let rank = value.round();
                if rank < 0.0 {
                    0
                } else {
                    (rank as u32 + 1).min(num_bins - 1)
                }
            }
        }
    }
}

// ============================================================================
// Discretizer
// ============================================================================

/// Maps raw feature vectors to sparse bin vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discretizer {
    cols: Vec<ColDiscretizer>,
    zero_as_missing: bool,
}

impl Discretizer {
    /// Fit column recipes from training rows.
    ///
    /// Categorical and ranking columns come from the config; everything else
    /// is numeric equal-width with at most `max_bins` bins.
    pub fn fit<'a>(
        rows: impl Iterator<Item = &'a [f64]>,
        num_cols: usize,
        config: &BoostConfig,
    ) -> Result<Self> {
        if config.discretization_type != "width:round" {
            return Err(GbmError::config(
                "discretization_type",
                format!(
                    "unknown recipe `{}`; supported: width:round",
                    config.discretization_type
                ),
            ));
        }
        let cat_cols: BTreeSet<usize> = config.cat_cols.iter().copied().collect();
        let rank_cols: BTreeSet<usize> = config.rank_cols.iter().copied().collect();

        let mut mins = vec![f64::INFINITY; num_cols];
        let mut maxs = vec![f64::NEG_INFINITY; num_cols];
        let mut top = vec![0.0f64; num_cols];
        let mut seen_rows = 0usize;

        for row in rows {
            if row.len() != num_cols {
                return Err(GbmError::data(format!(
                    "feature dimension mismatch: expected {num_cols}, got {}",
                    row.len()
                )));
            }
            seen_rows += 1;
            for (col, &value) in row.iter().enumerate() {
                if !value.is_finite() {
                    continue;
                }
                mins[col] = mins[col].min(value);
                maxs[col] = maxs[col].max(value);
                top[col] = top[col].max(value);
            }
        }
        if seen_rows == 0 {
            return Err(GbmError::data("cannot fit discretizer on an empty dataset"));
        }

        let cols = (0..num_cols)
            .map(|col| {
                if cat_cols.contains(&col) {
                    let num_cats = top[col].round().max(0.0) as u32 + 1;
                    if num_cats as usize + 1 > config.max_bins {
                        return Err(GbmError::config(
                            "max_bins",
                            format!(
                                "must cover every category: column {col} has {num_cats} \
                                 categories but max_bins is {}",
                                config.max_bins
                            ),
                        ));
                    }
                    Ok(ColDiscretizer::Categorical { num_cats })
                } else if rank_cols.contains(&col) {
                    Ok(ColDiscretizer::Ranking {
                        num_bins: config.max_bins as u32,
                    })
                } else {
                    let (min, max) = if mins[col].is_finite() {
                        (mins[col], maxs[col])
                    } else {
                        (0.0, 0.0)
                    };
                    // Rounded edges keep bin boundaries stable across refits
                    // on slightly shifted samples.
                    Ok(ColDiscretizer::Numeric {
                        min: round_edge(min),
                        max: round_edge_up(max),
                        num_bins: config.max_bins as u32,
                    })
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            cols,
            zero_as_missing: config.zero_as_missing,
        })
    }

    /// Column count.
    #[inline]
    pub fn num_cols(&self) -> usize {
        self.cols.len()
    }

    /// Total bins per column, including the reserved zero bin.
    pub fn bins_per_col(&self) -> Vec<u32> {
        self.cols.iter().map(|c| c.num_bins()).collect()
    }

    /// Map one feature vector to sorted `(col, bin)` pairs; zero bins are
    /// omitted.
    pub fn transform(&self, features: &[f64]) -> Vec<(u32, u32)> {
        debug_assert_eq!(features.len(), self.cols.len());
        features
            .iter()
            .zip(self.cols.iter())
            .enumerate()
            .filter_map(|(col, (&value, recipe))| {
                let bin = recipe.bin_for(value, self.zero_as_missing);
                if bin == 0 {
                    None
                } else {
                    Some((col as u32, bin))
                }
            })
            .collect()
    }
}

fn round_edge(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        let scale = 10f64.powi(2 - v.abs().log10().floor() as i32);
        (v * scale).floor() / scale
    }
}

fn round_edge_up(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        let scale = 10f64.powi(2 - v.abs().log10().floor() as i32);
        (v * scale).ceil() / scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fit_numeric(values: &[f64], max_bins: usize) -> Discretizer {
        let rows: Vec<Vec<f64>> = values.iter().map(|&v| vec![v]).collect();
        let config = BoostConfig {
            max_bins,
            ..Default::default()
        };
        Discretizer::fit(rows.iter().map(|r| r.as_slice()), 1, &config).unwrap()
    }

    #[test]
    fn numeric_bins_are_monotone() {
        let d = fit_numeric(&[0.0, 1.0, 2.0, 3.0, 10.0], 16);
        let mut last = 0;
        for v in [0.0f64, 0.5, 1.0, 2.0, 5.0, 9.9, 10.0] {
            let bin = d.transform(&[v]).first().map(|&(_, b)| b).unwrap_or(0);
            assert!(bin >= last, "bins must be monotone in the value");
            last = bin;
        }
    }

    #[test]
    fn nan_maps_to_zero_bin() {
        let d = fit_numeric(&[1.0, 2.0, 3.0], 8);
        assert!(d.transform(&[f64::NAN]).is_empty());
    }

    #[test]
    fn zero_as_missing_drops_zeros() {
        let rows: Vec<Vec<f64>> = vec![vec![0.0], vec![1.0], vec![2.0]];
        let config = BoostConfig {
            zero_as_missing: true,
            max_bins: 8,
            ..Default::default()
        };
        let d = Discretizer::fit(rows.iter().map(|r| r.as_slice()), 1, &config).unwrap();
        assert!(d.transform(&[0.0]).is_empty());
        assert!(!d.transform(&[1.0]).is_empty());
    }

    #[test]
    fn categorical_maps_to_shifted_bins() {
        let rows: Vec<Vec<f64>> = vec![vec![0.0], vec![1.0], vec![2.0]];
        let config = BoostConfig {
            cat_cols: [0usize].into_iter().collect(),
            max_bins: 8,
            ..Default::default()
        };
        let d = Discretizer::fit(rows.iter().map(|r| r.as_slice()), 1, &config).unwrap();
        assert_eq!(d.transform(&[0.0]), vec![(0, 1)]);
        assert_eq!(d.transform(&[2.0]), vec![(0, 3)]);
        // Out-of-vocabulary category falls back to the missing bin.
        assert!(d.transform(&[9.0]).is_empty());
    }

    #[test]
    fn rejects_cat_cardinality_above_max_bins() {
        let rows: Vec<Vec<f64>> = (0..300).map(|i| vec![i as f64]).collect();
        let config = BoostConfig {
            cat_cols: [0usize].into_iter().collect(),
            max_bins: 16,
            ..Default::default()
        };
        let err = Discretizer::fit(rows.iter().map(|r| r.as_slice()), 1, &config).unwrap_err();
        assert!(err.to_string().contains("max_bins"));
    }

    #[test]
    fn rejects_unknown_recipe() {
        let rows: Vec<Vec<f64>> = vec![vec![1.0]];
        let config = BoostConfig {
            discretization_type: "depth:exact".to_string(),
            ..Default::default()
        };
        let err = Discretizer::fit(rows.iter().map(|r| r.as_slice()), 1, &config).unwrap_err();
        assert!(err.to_string().contains("discretization_type"));
    }

    #[test]
    fn dimension_mismatch_is_data_error() {
        let rows: Vec<Vec<f64>> = vec![vec![1.0, 2.0], vec![3.0]];
        let config = BoostConfig::default();
        let err = Discretizer::fit(rows.iter().map(|r| r.as_slice()), 2, &config).unwrap_err();
        assert!(matches!(err, GbmError::InvalidData(_)));
    }

    #[test]
    fn serde_roundtrip() {
        let d = fit_numeric(&[1.0, 5.0, 9.0], 32);
        let bytes = postcard::to_allocvec(&d).unwrap();
        let back: Discretizer = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn bins_per_col_includes_zero_bin() {
        let rows: Vec<Vec<f64>> = vec![vec![1.0, 0.0], vec![2.0, 1.0]];
        let config = BoostConfig {
            cat_cols: [1usize].into_iter().collect(),
            max_bins: 64,
            ..Default::default()
        };
        let d = Discretizer::fit(rows.iter().map(|r| r.as_slice()), 2, &config).unwrap();
        assert_eq!(d.bins_per_col(), vec![64, 3]);
    }
}
