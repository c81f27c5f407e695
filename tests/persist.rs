//! Model persistence round trips on trained ensembles.

use groveboost::config::{BoostConfig, HistogramType};
use groveboost::logger::Verbosity;
use groveboost::model::GBMModel;
use groveboost::{Dataset, GBMClassifier, GBMRegressor};

fn regression_model() -> (GBMModel, Dataset) {
    let features: Vec<Vec<f64>> = (0..400)
        .map(|i| {
            let x = i as f64 / 400.0;
            vec![x, (x * 7.3).fract(), ((i % 5) as f64)]
        })
        .collect();
    let labels: Vec<f64> = features.iter().map(|f| f[0] * 3.0 - f[1]).collect();
    let train = Dataset::new(features, labels);
    let config = BoostConfig {
        max_iter: 6,
        max_depth: 4,
        cat_cols: [2usize].into_iter().collect(),
        verbosity: Verbosity::Silent,
        ..Default::default()
    };
    let model = GBMRegressor::new(config).fit(&train, None).unwrap();
    (model, train)
}

#[test]
fn trained_model_roundtrips_through_bytes() {
    let (model, train) = regression_model();
    assert!(model.num_trees() > 0);

    let bytes = model.to_bytes().unwrap();
    let back = GBMModel::from_bytes(&bytes).unwrap();
    assert_eq!(back, model);

    for i in (0..train.num_rows()).step_by(17) {
        let row = train.features(i);
        assert_eq!(model.predict(row), back.predict(row));
        assert_eq!(model.predict_raw(row), back.predict_raw(row));
        assert_eq!(model.predict_leaves(row), back.predict_leaves(row));
    }
}

#[test]
fn trained_model_roundtrips_through_file() {
    let (model, train) = regression_model();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ensemble.gbmf");

    model.save(&path).unwrap();
    let back = GBMModel::load(&path).unwrap();

    for i in (0..train.num_rows()).step_by(41) {
        let row = train.features(i);
        assert_eq!(model.predict(row), back.predict(row));
    }
}

#[test]
fn classifier_model_roundtrips_with_categorical_splits() {
    let features: Vec<Vec<f64>> = (0..300)
        .map(|i| vec![(i % 3) as f64, (i % 11) as f64 / 11.0])
        .collect();
    let labels: Vec<f64> = features
        .iter()
        .map(|f| if f[0] == 1.0 { 1.0 } else { 0.0 })
        .collect();
    let train = Dataset::new(features, labels);

    let config = BoostConfig {
        max_iter: 5,
        max_depth: 3,
        cat_cols: [0usize].into_iter().collect(),
        histogram_type: HistogramType::Subtract,
        verbosity: Verbosity::Silent,
        ..Default::default()
    };
    let model = GBMClassifier::new(config).fit(&train, None).unwrap();
    assert!(model.num_trees() > 0);

    let back = GBMModel::from_bytes(&model.to_bytes().unwrap()).unwrap();
    assert_eq!(back, model);
    for i in 0..30 {
        let row = train.features(i);
        assert_eq!(model.predict(row), back.predict(row));
    }
}

#[test]
fn leaf_one_hot_dimensions_are_consistent() {
    let (model, train) = regression_model();
    let total_leaves: usize = model.trees.iter().map(|t| t.num_leaves()).sum();
    for i in (0..train.num_rows()).step_by(61) {
        let one_hot = model.predict_leaves_one_hot(train.features(i));
        assert_eq!(one_hot.len(), total_leaves);
        let hot = one_hot.iter().filter(|&&v| v == 1.0).count();
        assert_eq!(hot, model.num_trees());
    }
}
