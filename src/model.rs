//! Persisted model: ensemble, base score, discretizer, codec.
//!
//! The persisted layout is `{objective name, raw base score, discretizer,
//! trees, weights, metadata}`. Trees serialize as a pre-order walk of
//! `(kind, payload)` records so the on-disk format is independent of the
//! in-memory arena. Files carry a small magic/version header followed by a
//! postcard payload.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::discretizer::Discretizer;
use crate::errors::{GbmError, Result};
use crate::objective::BuiltinObj;
use crate::split::{BinSet, SplitData, SplitKind};
use crate::tree::{Node, TreeModel};

// ============================================================================
// GBMModel
// ============================================================================

/// Trained additive ensemble.
#[derive(Debug, Clone, PartialEq)]
pub struct GBMModel {
    /// Objective name (resolvable via [`BuiltinObj::parse`] for built-ins).
    pub obj_name: String,
    /// Raw-space base score, one per raw output.
    pub raw_base_score: Vec<f64>,
    /// Discretizer used at fit time; prediction reuses it.
    pub discretizer: Discretizer,
    /// Trees in append order.
    pub trees: Vec<TreeModel>,
    /// Effective per-tree multipliers (step size and DART weight folded in).
    pub weights: Vec<f64>,
    /// Raw output each tree contributes to.
    pub tree_outputs: Vec<u32>,
    /// Free-form key/value metadata.
    pub metadata: BTreeMap<String, String>,
}

impl GBMModel {
    /// Number of trees in the ensemble.
    #[inline]
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Raw outputs per instance.
    #[inline]
    pub fn raw_size(&self) -> usize {
        self.raw_base_score.len()
    }

    /// Raw (pre-link) prediction for one feature vector.
    pub fn predict_raw(&self, features: &[f64]) -> Vec<f64> {
        let pairs = self.discretizer.transform(features);
        let get_bin = |col: u32| -> u32 {
            pairs
                .binary_search_by_key(&col, |&(c, _)| c)
                .map(|pos| pairs[pos].1)
                .unwrap_or(0)
        };

        let mut raw = self.raw_base_score.clone();
        for (idx, tree) in self.trees.iter().enumerate() {
            let output = self.tree_outputs[idx] as usize;
            raw[output] += self.weights[idx] * tree.predict(&get_bin);
        }
        raw
    }

    /// Transformed prediction for one feature vector.
    pub fn predict(&self, features: &[f64]) -> Vec<f64> {
        let mut raw = self.predict_raw(features);
        if let Some(obj) = BuiltinObj::parse(&self.obj_name) {
            obj.as_obj().transform(&mut raw);
        }
        raw
    }

    /// Transformed predictions for many rows.
    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|row| self.predict(row)).collect()
    }

    /// Per-tree leaf indices for one feature vector.
    pub fn predict_leaves(&self, features: &[f64]) -> Vec<u32> {
        let pairs = self.discretizer.transform(features);
        let get_bin = |col: u32| -> u32 {
            pairs
                .binary_search_by_key(&col, |&(c, _)| c)
                .map(|pos| pairs[pos].1)
                .unwrap_or(0)
        };
        self.trees.iter().map(|tree| tree.leaf_for(&get_bin)).collect()
    }

    /// One-hot encoded leaf indicator over all trees' leaves.
    pub fn predict_leaves_one_hot(&self, features: &[f64]) -> Vec<f64> {
        let leaves = self.predict_leaves(features);
        let mut out = Vec::new();
        for (tree, &leaf) in self.trees.iter().zip(leaves.iter()) {
            // Leaf position within this tree's leaf ordering.
            let mut position = 0;
            let mut hot = 0;
            for (idx, node) in tree.nodes().iter().enumerate() {
                if matches!(node, Node::Leaf { .. }) {
                    if idx as u32 == leaf {
                        hot = position;
                    }
                    position += 1;
                }
            }
            let mut slot = vec![0.0; tree.num_leaves()];
            slot[hot] = 1.0;
            out.extend(slot);
        }
        out
    }

    // ------------------------------------------------------------------
    // Codec
    // ------------------------------------------------------------------

    /// Serialize to the native byte format.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let schema = ModelSchema::from_model(self);
        let payload = postcard::to_allocvec(&schema)?;
        let mut bytes = Vec::with_capacity(payload.len() + HEADER_LEN);
        bytes.extend_from_slice(MAGIC);
        bytes.push(VERSION_MAJOR);
        bytes.push(VERSION_MINOR);
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    /// Deserialize from the native byte format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(GbmError::Format("missing GBMF magic".to_string()));
        }
        if bytes[4] != VERSION_MAJOR {
            return Err(GbmError::Format(format!(
                "unsupported major version {}",
                bytes[4]
            )));
        }
        let schema: ModelSchema = postcard::from_bytes(&bytes[HEADER_LEN..])?;
        schema.into_model()
    }

    /// Write the model to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Read a model from a file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(&fs::read(path)?)
    }
}

// ============================================================================
// Schema
// ============================================================================

const MAGIC: &[u8; 4] = b"GBMF";
const VERSION_MAJOR: u8 = 1;
const VERSION_MINOR: u8 = 0;
const HEADER_LEN: usize = 6;

/// One pre-order tree record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum NodeRecord {
    /// Numeric threshold split; children follow in pre-order.
    Numeric {
        col: u32,
        bin: u32,
        missing_left: bool,
    },
    /// Ranking threshold split.
    Ranking {
        col: u32,
        bin: u32,
        missing_left: bool,
    },
    /// Categorical set split; `left` lists the bins routed left.
    Set { col: u32, left: Vec<u32> },
    /// Terminal node.
    Leaf { weight: f64 },
}

/// Stable serialization schema, separate from the runtime types.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelSchema {
    obj_name: String,
    raw_base_score: Vec<f64>,
    discretizer: Discretizer,
    trees: Vec<Vec<NodeRecord>>,
    weights: Vec<f64>,
    tree_outputs: Vec<u32>,
    metadata: BTreeMap<String, String>,
}

impl ModelSchema {
    fn from_model(model: &GBMModel) -> Self {
        Self {
            obj_name: model.obj_name.clone(),
            raw_base_score: model.raw_base_score.clone(),
            discretizer: model.discretizer.clone(),
            trees: model.trees.iter().map(tree_to_records).collect(),
            weights: model.weights.clone(),
            tree_outputs: model.tree_outputs.clone(),
            metadata: model.metadata.clone(),
        }
    }

    fn into_model(self) -> Result<GBMModel> {
        let trees = self
            .trees
            .iter()
            .map(|records| tree_from_records(records))
            .collect::<Result<Vec<_>>>()?;
        if trees.len() != self.weights.len() || trees.len() != self.tree_outputs.len() {
            return Err(GbmError::Format(
                "tree, weight and output counts disagree".to_string(),
            ));
        }
        Ok(GBMModel {
            obj_name: self.obj_name,
            raw_base_score: self.raw_base_score,
            discretizer: self.discretizer,
            trees,
            weights: self.weights,
            tree_outputs: self.tree_outputs,
            metadata: self.metadata,
        })
    }
}

fn tree_to_records(tree: &TreeModel) -> Vec<NodeRecord> {
    fn walk(tree: &TreeModel, at: u32, out: &mut Vec<NodeRecord>) {
        match &tree.nodes()[at as usize] {
            Node::Leaf { weight } => out.push(NodeRecord::Leaf { weight: *weight }),
            Node::Internal {
                col,
                kind,
                data,
                left,
                right,
            } => {
                let record = match (kind, data) {
                    (SplitKind::Numeric, SplitData::Threshold { bin, missing_left }) => {
                        NodeRecord::Numeric {
                            col: *col,
                            bin: *bin,
                            missing_left: *missing_left,
                        }
                    }
                    (SplitKind::Ranking, SplitData::Threshold { bin, missing_left }) => {
                        NodeRecord::Ranking {
                            col: *col,
                            bin: *bin,
                            missing_left: *missing_left,
                        }
                    }
                    (_, SplitData::Set { left }) => NodeRecord::Set {
                        col: *col,
                        left: left.iter().collect(),
                    },
                    (SplitKind::Categorical, SplitData::Threshold { bin, missing_left }) => {
                        // A categorical split always carries a set; tolerate a
                        // threshold payload by treating it as numeric routing.
                        NodeRecord::Numeric {
                            col: *col,
                            bin: *bin,
                            missing_left: *missing_left,
                        }
                    }
                };
                out.push(record);
                walk(tree, *left, out);
                walk(tree, *right, out);
            }
        }
    }

    let mut out = Vec::with_capacity(tree.num_nodes());
    walk(tree, 0, &mut out);
    out
}

fn tree_from_records(records: &[NodeRecord]) -> Result<TreeModel> {
    fn build(records: &[NodeRecord], cursor: &mut usize, nodes: &mut Vec<Node>) -> Result<u32> {
        let record = records
            .get(*cursor)
            .ok_or_else(|| GbmError::Format("truncated tree record stream".to_string()))?
            .clone();
        *cursor += 1;
        let at = nodes.len() as u32;
        match record {
            NodeRecord::Leaf { weight } => {
                nodes.push(Node::Leaf { weight });
            }
            NodeRecord::Numeric { col, bin, missing_left } => {
                nodes.push(Node::Leaf { weight: 0.0 });
                let left = build(records, cursor, nodes)?;
                let right = build(records, cursor, nodes)?;
                nodes[at as usize] = Node::Internal {
                    col,
                    kind: SplitKind::Numeric,
                    data: SplitData::Threshold { bin, missing_left },
                    left,
                    right,
                };
            }
            NodeRecord::Ranking { col, bin, missing_left } => {
                nodes.push(Node::Leaf { weight: 0.0 });
                let left = build(records, cursor, nodes)?;
                let right = build(records, cursor, nodes)?;
                nodes[at as usize] = Node::Internal {
                    col,
                    kind: SplitKind::Ranking,
                    data: SplitData::Threshold { bin, missing_left },
                    left,
                    right,
                };
            }
            NodeRecord::Set { col, left: bins } => {
                nodes.push(Node::Leaf { weight: 0.0 });
                let left = build(records, cursor, nodes)?;
                let right = build(records, cursor, nodes)?;
                nodes[at as usize] = Node::Internal {
                    col,
                    kind: SplitKind::Categorical,
                    data: SplitData::Set {
                        left: BinSet::from_bins(bins),
                    },
                    left,
                    right,
                };
            }
        }
        Ok(at)
    }

    let mut nodes = Vec::with_capacity(records.len());
    let mut cursor = 0;
    build(records, &mut cursor, &mut nodes)?;
    if cursor != records.len() {
        return Err(GbmError::Format(format!(
            "trailing records after tree end: consumed {cursor} of {}",
            records.len()
        )));
    }
    Ok(TreeModel::from_nodes(nodes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BoostConfig;

    fn toy_model() -> GBMModel {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let config = BoostConfig {
            cat_cols: [1usize].into_iter().collect(),
            max_bins: 16,
            ..Default::default()
        };
        let discretizer =
            Discretizer::fit(rows.iter().map(|r| r.as_slice()), 2, &config).unwrap();

        let tree = TreeModel::from_nodes(vec![
            Node::Internal {
                col: 0,
                kind: SplitKind::Numeric,
                data: SplitData::Threshold {
                    bin: 5,
                    missing_left: false,
                },
                left: 1,
                right: 2,
            },
            Node::Leaf { weight: -0.5 },
            Node::Internal {
                col: 1,
                kind: SplitKind::Categorical,
                data: SplitData::Set {
                    left: BinSet::from_bins([1, 3]),
                },
                left: 3,
                right: 4,
            },
            Node::Leaf { weight: 0.25 },
            Node::Leaf { weight: 0.75 },
        ]);

        GBMModel {
            obj_name: "square".to_string(),
            raw_base_score: vec![1.0],
            discretizer,
            trees: vec![tree],
            weights: vec![0.1],
            tree_outputs: vec![0],
            metadata: BTreeMap::from([(
                "trained_by".to_string(),
                "groveboost-tests".to_string(),
            )]),
        }
    }

    #[test]
    fn codec_roundtrip_preserves_predictions() {
        let model = toy_model();
        let bytes = model.to_bytes().unwrap();
        let back = GBMModel::from_bytes(&bytes).unwrap();
        assert_eq!(back, model);

        for i in 0..20 {
            let row = vec![i as f64, (i % 3) as f64];
            assert_eq!(model.predict(&row), back.predict(&row));
            assert_eq!(model.predict_leaves(&row), back.predict_leaves(&row));
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = toy_model().to_bytes().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            GBMModel::from_bytes(&bytes),
            Err(GbmError::Format(_))
        ));
    }

    #[test]
    fn bad_version_is_rejected() {
        let mut bytes = toy_model().to_bytes().unwrap();
        bytes[4] = 99;
        assert!(GBMModel::from_bytes(&bytes).is_err());
    }

    #[test]
    fn file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.gbmf");
        let model = toy_model();
        model.save(&path).unwrap();
        let back = GBMModel::load(&path).unwrap();
        assert_eq!(back, model);
    }

    #[test]
    fn preorder_records_reconstruct_structure() {
        let model = toy_model();
        let records = tree_to_records(&model.trees[0]);
        // Root, left leaf, inner, its two leaves.
        assert_eq!(records.len(), 5);
        assert!(matches!(records[0], NodeRecord::Numeric { .. }));
        assert!(matches!(records[1], NodeRecord::Leaf { .. }));
        assert!(matches!(records[2], NodeRecord::Set { .. }));

        let rebuilt = tree_from_records(&records).unwrap();
        assert_eq!(rebuilt, model.trees[0]);
    }

    #[test]
    fn one_hot_leaves_have_single_hot_bit() {
        let model = toy_model();
        for i in 0..10 {
            let row = vec![i as f64, (i % 3) as f64];
            let one_hot = model.predict_leaves_one_hot(&row);
            assert_eq!(one_hot.len(), model.trees[0].num_leaves());
            assert_eq!(one_hot.iter().filter(|&&v| v == 1.0).count(), 1);
        }
    }

    #[test]
    fn raw_prediction_adds_weighted_trees() {
        let model = toy_model();
        let row = vec![0.0, 0.0];
        let raw = model.predict_raw(&row);
        // Base 1.0 plus 0.1 * leaf weight.
        let leaf = model.trees[0].predict(&|col| {
            let pairs = model.discretizer.transform(&row);
            pairs
                .iter()
                .find(|&&(c, _)| c == col)
                .map(|&(_, b)| b)
                .unwrap_or(0)
        });
        assert!((raw[0] - (1.0 + 0.1 * leaf)).abs() < 1e-12);
    }
}
