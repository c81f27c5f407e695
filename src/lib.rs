//! groveboost: histogram-based gradient boosting over row-partitioned blocks.
//!
//! The engine learns an additive ensemble of regression trees by repeatedly
//! fitting trees to the gradient of a differentiable loss, using a
//! histogram-based split finder over pre-binned features. It supports plain
//! gradient boosting (`gbtree`) and DART dropout boosting, three histogram
//! strategies (basic, subtract, vote), and instance sampling at row, block,
//! partition and GOSS granularity.
//!
//! # Quick start
//!
//! ```
//! use groveboost::{BoostConfig, Dataset, GBMRegressor};
//!
//! let features: Vec<Vec<f64>> = (0..200).map(|i| vec![i as f64 / 200.0]).collect();
//! let labels: Vec<f64> = features.iter().map(|f| f[0]).collect();
//! let train = Dataset::new(features, labels);
//!
//! let config = BoostConfig {
//!     max_iter: 5,
//!     verbosity: groveboost::Verbosity::Silent,
//!     ..Default::default()
//! };
//! let model = GBMRegressor::new(config).fit(&train, None).unwrap();
//! let prediction = model.predict(&[0.25])[0];
//! assert!(prediction.is_finite());
//! ```

pub mod boost;
pub mod config;
pub mod data;
pub mod discretizer;
pub mod errors;
pub mod exec;
pub mod histogram;
pub mod logger;
pub mod metrics;
pub mod model;
pub mod objective;
pub mod sampling;
pub mod selector;
pub mod split;
pub mod tree;
pub mod width;

pub use boost::{Callback, CallbackContext, CallbackOutcome, Dataset, GBM, GBMClassifier, GBMRegressor};
pub use config::{BoostConfig, BoostType, FloatType, HistogramType, StorageLevel, SubSampleType};
pub use errors::{GbmError, Result};
pub use logger::Verbosity;
pub use model::GBMModel;
pub use objective::{LogisticObj, ObjFunc, SquareObj};
