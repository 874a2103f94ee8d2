//! Classification models extracted from the converged search graph.
//!
//! A [`Model`] is a binary tree over binarized features. Siblings in the
//! extraction may share whole subtrees, so children are reference-counted.
//! Equality and hashing are structural over the leaf partition, which is how
//! the extraction deduplicates alternative derivations of the same tree.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde_json::{json, Value};

use crate::bits::BitSet;
use crate::config::Config;
use crate::data::Dataset;

/// One extracted decision tree.
#[derive(Debug, Clone)]
pub struct Model {
    node: Node,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        /// Rows this leaf captures.
        capture: BitSet,
        /// Predicted target index.
        prediction: usize,
        /// Training loss incurred by this leaf.
        loss: f32,
        /// Complexity penalty incurred by this leaf.
        complexity: f32,
    },
    Split {
        /// Binarized feature index.
        feature: usize,
        /// Subtree for rows where the feature is false.
        negative: Arc<Model>,
        /// Subtree for rows where the feature is true.
        positive: Arc<Model>,
    },
}

impl Model {
    /// A terminal node classifying `capture` by its cost-minimizing label.
    pub fn leaf(capture: BitSet, dataset: &Dataset, config: &Config, work: &mut BitSet) -> Self {
        let stats = dataset.summary_statistics(&capture, work);
        Self {
            node: Node::Leaf {
                capture,
                prediction: stats.optimal,
                loss: stats.max_loss,
                complexity: config.regularization,
            },
        }
    }

    /// An internal node splitting on `feature`.
    pub fn split(feature: usize, negative: Arc<Model>, positive: Arc<Model>) -> Self {
        Self {
            node: Node::Split {
                feature,
                negative,
                positive,
            },
        }
    }

    /// Training loss of the whole tree.
    pub fn loss(&self) -> f32 {
        match &self.node {
            Node::Leaf { loss, .. } => *loss,
            Node::Split {
                negative, positive, ..
            } => negative.loss() + positive.loss(),
        }
    }

    /// Complexity penalty of the whole tree (one unit per leaf).
    pub fn complexity(&self) -> f32 {
        match &self.node {
            Node::Leaf { complexity, .. } => *complexity,
            Node::Split {
                negative, positive, ..
            } => negative.complexity() + positive.complexity(),
        }
    }

    /// Number of leaves.
    pub fn leaves(&self) -> usize {
        match &self.node {
            Node::Leaf { .. } => 1,
            Node::Split {
                negative, positive, ..
            } => negative.leaves() + positive.leaves(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.node, Node::Leaf { .. })
    }

    /// Predict the target index for one sample of binarized features.
    pub fn predict(&self, features: &BitSet) -> usize {
        match &self.node {
            Node::Leaf { prediction, .. } => *prediction,
            Node::Split {
                feature,
                negative,
                positive,
            } => {
                if features.get(*feature) {
                    positive.predict(features)
                } else {
                    negative.predict(features)
                }
            }
        }
    }

    /// JSON representation: leaves carry `prediction`, `loss` and
    /// `complexity`; internal nodes carry `feature` and their two branches.
    pub fn to_json(&self) -> Value {
        match &self.node {
            Node::Leaf {
                prediction,
                loss,
                complexity,
                ..
            } => json!({
                "prediction": prediction,
                "loss": loss,
                "complexity": complexity,
            }),
            Node::Split {
                feature,
                negative,
                positive,
            } => json!({
                "feature": feature,
                "false": negative.to_json(),
                "true": positive.to_json(),
            }),
        }
    }
}

/// Serialize a set of models as a pretty-printed JSON array.
pub fn render_models(models: &[Arc<Model>]) -> String {
    let array = Value::Array(models.iter().map(|model| model.to_json()).collect());
    serde_json::to_string_pretty(&array).unwrap_or_else(|_| "[]".to_string())
}

// Structural equality over the leaf partition: two derivations of the same
// tree compare equal even when their subtrees are not shared.
impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        match (&self.node, &other.node) {
            (
                Node::Leaf {
                    capture: a,
                    prediction: pa,
                    ..
                },
                Node::Leaf {
                    capture: b,
                    prediction: pb,
                    ..
                },
            ) => a == b && pa == pb,
            (
                Node::Split {
                    feature: fa,
                    negative: na,
                    positive: pa,
                },
                Node::Split {
                    feature: fb,
                    negative: nb,
                    positive: pb,
                },
            ) => fa == fb && na == nb && pa == pb,
            _ => false,
        }
    }
}

impl Eq for Model {}

impl Hash for Model {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match &self.node {
            Node::Leaf {
                capture, prediction, ..
            } => {
                0u8.hash(state);
                capture.hash(state);
                prediction.hash(state);
            }
            Node::Split {
                feature,
                negative,
                positive,
            } => {
                1u8.hash(state);
                feature.hash(state);
                negative.hash(state);
                positive.hash(state);
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DenseMatrix;
    use approx::assert_abs_diff_eq;

    fn dataset() -> Dataset {
        // Feature 0 separates the labels perfectly.
        let input = DenseMatrix::from_vec(
            vec![
                false, true, false, // x=0 -> 0
                true, false, true, // x=1 -> 1
            ],
            2,
            3,
        );
        let costs = DenseMatrix::from_vec(vec![0.0, 1.0, 1.0, 0.0], 2, 2);
        Dataset::new(&input, &costs, Dataset::trivial_feature_map(1), None).unwrap()
    }

    fn leaf_for(rows: &[usize], dataset: &Dataset) -> Arc<Model> {
        let config = Config::builder().regularization(0.1).build().unwrap();
        let mut work = BitSet::empty(dataset.n_rows());
        let mut capture = BitSet::empty(dataset.n_rows());
        for &row in rows {
            capture.set(row, true);
        }
        Arc::new(Model::leaf(capture, dataset, &config, &mut work))
    }

    #[test]
    fn leaf_statistics() {
        let dataset = dataset();
        let leaf = leaf_for(&[0], &dataset);
        assert!(leaf.is_leaf());
        assert_eq!(leaf.leaves(), 1);
        assert_abs_diff_eq!(leaf.loss(), 0.0);
        assert_abs_diff_eq!(leaf.complexity(), 0.1);
    }

    #[test]
    fn split_aggregates_and_predicts() {
        let dataset = dataset();
        let negative = leaf_for(&[0], &dataset);
        let positive = leaf_for(&[1], &dataset);
        let model = Model::split(0, negative, positive);

        assert_eq!(model.leaves(), 2);
        assert_abs_diff_eq!(model.loss(), 0.0);
        assert_abs_diff_eq!(model.complexity(), 0.2);

        assert_eq!(model.predict(dataset.row_features(0)), 0);
        assert_eq!(model.predict(dataset.row_features(1)), 1);
    }

    #[test]
    fn equality_is_structural() {
        let dataset = dataset();
        let a = Model::split(0, leaf_for(&[0], &dataset), leaf_for(&[1], &dataset));
        let b = Model::split(0, leaf_for(&[0], &dataset), leaf_for(&[1], &dataset));
        assert_eq!(a, b);

        let c = Model::split(0, leaf_for(&[1], &dataset), leaf_for(&[0], &dataset));
        assert_ne!(a, c);
    }

    #[test]
    fn json_shape() {
        let dataset = dataset();
        let model = Model::split(0, leaf_for(&[0], &dataset), leaf_for(&[1], &dataset));
        let value = model.to_json();
        assert_eq!(value["feature"], 0);
        assert_eq!(value["false"]["prediction"], 0);
        assert_eq!(value["true"]["prediction"], 1);

        let rendered = render_models(&[Arc::new(model)]);
        assert!(rendered.starts_with('['));
        assert!(rendered.contains("\"feature\""));
    }
}
