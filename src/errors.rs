//! Error types for training and model storage.
//!
//! All fallible public entry points return [`GbmError`]. Numeric edge cases
//! (non-splittable nodes, rounds where no tree grows) are normal control flow
//! and never surface as errors.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GbmError>;

/// Typed failure carrying kind, message and offending context.
#[derive(Debug, Error)]
pub enum GbmError {
    /// A hyperparameter violated its constraint. Raised before any work starts.
    #[error("invalid value for `{param}`: {constraint}")]
    InvalidConfig {
        /// Name of the offending parameter.
        param: &'static str,
        /// Human-readable constraint, e.g. "must be in (0, 1]".
        constraint: String,
    },

    /// Input data is unusable: missing label, NaN/Inf label or weight,
    /// negative weight, feature dimension mismatch.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Writing a checkpoint to stable storage failed. Fatal for the fit call.
    #[error("checkpoint write failed: {0}")]
    Checkpoint(#[from] std::io::Error),

    /// Model payload could not be encoded or decoded.
    #[error("model codec error: {0}")]
    Codec(#[from] postcard::Error),

    /// A stored model file is malformed (bad magic, unsupported version).
    #[error("invalid model file: {0}")]
    Format(String),
}

impl GbmError {
    /// Shorthand for configuration violations.
    pub fn config(param: &'static str, constraint: impl Into<String>) -> Self {
        Self::InvalidConfig {
            param,
            constraint: constraint.into(),
        }
    }

    /// Shorthand for data validation failures.
    pub fn data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_parameter() {
        let err = GbmError::config("max_depth", "must be in [1, 30]");
        let msg = err.to_string();
        assert!(msg.contains("max_depth"));
        assert!(msg.contains("[1, 30]"));
    }

    #[test]
    fn data_error_carries_message() {
        let err = GbmError::data("label contains NaN at row 17");
        assert!(err.to_string().contains("row 17"));
    }
}
