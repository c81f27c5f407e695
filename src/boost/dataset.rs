//! Training input: rows of features, labels and optional weights.

use crate::errors::{GbmError, Result};

/// In-memory training dataset.
///
/// Labels are vectors to accommodate multi-output objectives; the common
/// scalar case uses [`Dataset::new`]. Weights default to 1.
#[derive(Debug, Clone)]
pub struct Dataset {
    features: Vec<Vec<f64>>,
    labels: Vec<Vec<f64>>,
    weights: Vec<f64>,
}

impl Dataset {
    /// Dataset with scalar labels and unit weights.
    pub fn new(features: Vec<Vec<f64>>, labels: Vec<f64>) -> Self {
        let weights = vec![1.0; features.len()];
        Self {
            features,
            labels: labels.into_iter().map(|y| vec![y]).collect(),
            weights,
        }
    }

    /// Dataset with vector labels and unit weights.
    pub fn with_vector_labels(features: Vec<Vec<f64>>, labels: Vec<Vec<f64>>) -> Self {
        let weights = vec![1.0; features.len()];
        Self {
            features,
            labels,
            weights,
        }
    }

    /// Attach per-instance weights.
    pub fn with_weights(mut self, weights: Vec<f64>) -> Self {
        self.weights = weights;
        self
    }

    /// Number of rows.
    #[inline]
    pub fn num_rows(&self) -> usize {
        self.features.len()
    }

    /// Number of feature columns.
    #[inline]
    pub fn num_cols(&self) -> usize {
        self.features.first().map(|r| r.len()).unwrap_or(0)
    }

    /// Label values per row.
    #[inline]
    pub fn label_dim(&self) -> usize {
        self.labels.first().map(|l| l.len()).unwrap_or(0)
    }

    /// Feature row `i`.
    #[inline]
    pub fn features(&self, i: usize) -> &[f64] {
        &self.features[i]
    }

    /// Label row `i`.
    #[inline]
    pub fn label(&self, i: usize) -> &[f64] {
        &self.labels[i]
    }

    /// Weight of row `i`.
    #[inline]
    pub fn weight(&self, i: usize) -> f64 {
        self.weights[i]
    }

    /// Iterate over feature rows.
    pub fn feature_rows(&self) -> impl Iterator<Item = &[f64]> {
        self.features.iter().map(|r| r.as_slice())
    }

    /// Check labels, weights and dimensions.
    pub fn validate(&self) -> Result<()> {
        if self.features.is_empty() {
            return Err(GbmError::data("dataset holds no rows"));
        }
        if self.labels.len() != self.features.len() {
            return Err(GbmError::data(format!(
                "{} feature rows but {} label rows",
                self.features.len(),
                self.labels.len()
            )));
        }
        if self.weights.len() != self.features.len() {
            return Err(GbmError::data(format!(
                "{} feature rows but {} weights",
                self.features.len(),
                self.weights.len()
            )));
        }

        let num_cols = self.num_cols();
        let label_dim = self.label_dim();
        if label_dim == 0 {
            return Err(GbmError::data("rows carry no label"));
        }
        for (i, row) in self.features.iter().enumerate() {
            if row.len() != num_cols {
                return Err(GbmError::data(format!(
                    "row {i} has {} features, expected {num_cols}",
                    row.len()
                )));
            }
        }
        for (i, label) in self.labels.iter().enumerate() {
            if label.len() != label_dim {
                return Err(GbmError::data(format!(
                    "row {i} has {} label values, expected {label_dim}",
                    label.len()
                )));
            }
            if label.iter().any(|y| !y.is_finite()) {
                return Err(GbmError::data(format!("label of row {i} is not finite")));
            }
        }
        for (i, &w) in self.weights.iter().enumerate() {
            if !w.is_finite() || w < 0.0 {
                return Err(GbmError::data(format!(
                    "weight of row {i} must be finite and non-negative, got {w}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_constructor_wraps_labels() {
        let ds = Dataset::new(vec![vec![1.0], vec![2.0]], vec![0.5, 1.5]);
        assert_eq!(ds.num_rows(), 2);
        assert_eq!(ds.label_dim(), 1);
        assert_eq!(ds.label(1), &[1.5]);
        assert_eq!(ds.weight(0), 1.0);
        assert!(ds.validate().is_ok());
    }

    #[test]
    fn rejects_nan_label() {
        let ds = Dataset::new(vec![vec![1.0]], vec![f64::NAN]);
        assert!(ds.validate().is_err());
    }

    #[test]
    fn rejects_negative_weight() {
        let ds = Dataset::new(vec![vec![1.0]], vec![1.0]).with_weights(vec![-0.5]);
        assert!(ds.validate().is_err());
    }

    #[test]
    fn rejects_ragged_features() {
        let ds = Dataset::new(vec![vec![1.0, 2.0], vec![3.0]], vec![0.0, 1.0]);
        assert!(ds.validate().is_err());
    }

    #[test]
    fn rejects_missing_labels() {
        let ds = Dataset::with_vector_labels(vec![vec![1.0]], vec![vec![]]);
        assert!(ds.validate().is_err());
    }
}
