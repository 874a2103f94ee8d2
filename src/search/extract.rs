//! Model extraction from the converged dependency graph.
//!
//! Starting at the root vertex, every feature whose recorded split upper
//! bound meets the vertex's certified upper bound spawns the cross product of
//! its children's optimal models; vertices whose single-leaf risk meets the
//! bound contribute a leaf. Children missing from the graph (pruned before
//! exploration) are materialized directly as leaves.

use std::sync::Arc;

use crate::bits::BitSet;
use crate::model::Model;
use crate::search::lock;
use crate::search::optimizer::Optimizer;

const EPS: f32 = f32::EPSILON;

impl Optimizer<'_> {
    /// Collect all optimal models reachable from the root, up to
    /// `model_limit` (`0` extracts nothing).
    ///
    /// With a non-zero optimality gap the result holds models inside the gap,
    /// without a guarantee that the true optimum is among them.
    pub fn models(&self) -> Vec<Arc<Model>> {
        if self.config.model_limit == 0 {
            return Vec::new();
        }
        let Some(root) = lock(&self.root).clone() else {
            return Vec::new();
        };
        let mut work = BitSet::empty(self.dataset.n_rows());
        let mut results = Vec::new();
        self.extract(&root, &mut results, &mut work);
        results
    }

    fn extract(&self, key: &BitSet, results: &mut Vec<Arc<Model>>, work: &mut BitSet) {
        let Some(vertex_ref) = self.graph.vertex(key) else {
            return;
        };
        let task = lock(&vertex_ref).clone();

        if task.base_objective() <= task.upperbound() + EPS {
            push_unique(
                results,
                Arc::new(Model::leaf(
                    task.capture_set().clone(),
                    self.dataset,
                    self.config,
                    work,
                )),
            );
        }

        let Some(bounds_ref) = self.graph.bounds(key) else {
            return;
        };
        let bounds = lock(&bounds_ref).clone();

        for bound in bounds {
            if bound.upper > task.upperbound() + EPS {
                continue;
            }
            let feature = bound.feature;

            let mut negatives: Vec<Arc<Model>> = Vec::new();
            let mut positives: Vec<Arc<Model>> = Vec::new();
            for positive in [false, true] {
                let signed = if positive {
                    feature as i32 + 1
                } else {
                    -(feature as i32 + 1)
                };
                let side = if positive {
                    &mut positives
                } else {
                    &mut negatives
                };
                match self.graph.child(&(key.clone(), signed)) {
                    Some(child_key) => self.extract(&child_key, side, work),
                    None => {
                        // The child was never stored; classify its rows with
                        // a directly materialized leaf.
                        let subset = self.materialize_subset(&task, feature, positive);
                        side.push(Arc::new(Model::leaf(
                            subset,
                            self.dataset,
                            self.config,
                            work,
                        )));
                    }
                }
            }
            if negatives.is_empty() || positives.is_empty() {
                continue;
            }

            if self.config.rule_list {
                self.extract_rule_lists(
                    &task, feature, &negatives, &positives, results, work,
                );
            } else {
                for negative in &negatives {
                    for positive in &positives {
                        if self.at_model_limit(results) {
                            continue;
                        }
                        push_unique(
                            results,
                            Arc::new(Model::split(feature, negative.clone(), positive.clone())),
                        );
                    }
                }
            }
        }
    }

    /// Rule-list combinations: one side is a freshly materialized leaf, the
    /// other a recursive result, gated by the combined risk.
    fn extract_rule_lists(
        &self,
        task: &crate::search::task::Task,
        feature: usize,
        negatives: &[Arc<Model>],
        positives: &[Arc<Model>],
        results: &mut Vec<Arc<Model>>,
        work: &mut BitSet,
    ) {
        let negative_subset = self.materialize_subset(task, feature, false);
        let positive_subset = self.materialize_subset(task, feature, true);

        let left_leaf_risk = self
            .dataset
            .summary_statistics(&negative_subset, work)
            .max_loss
            + self.config.regularization;
        let right_leaf_risk = self
            .dataset
            .summary_statistics(&positive_subset, work)
            .max_loss
            + self.config.regularization;

        for negative in negatives {
            let risk = right_leaf_risk + negative.loss() + negative.complexity();
            if risk <= task.upperbound() + EPS && !self.at_model_limit(results) {
                let positive_leaf = Arc::new(Model::leaf(
                    positive_subset.clone(),
                    self.dataset,
                    self.config,
                    work,
                ));
                push_unique(
                    results,
                    Arc::new(Model::split(feature, negative.clone(), positive_leaf)),
                );
            }
        }
        for positive in positives {
            let risk = left_leaf_risk + positive.loss() + positive.complexity();
            if risk <= task.upperbound() + EPS && !self.at_model_limit(results) {
                let negative_leaf = Arc::new(Model::leaf(
                    negative_subset.clone(),
                    self.dataset,
                    self.config,
                    work,
                ));
                push_unique(
                    results,
                    Arc::new(Model::split(feature, negative_leaf, positive.clone())),
                );
            }
        }
    }

    fn materialize_subset(
        &self,
        task: &crate::search::task::Task,
        feature: usize,
        positive: bool,
    ) -> BitSet {
        let mut subset = task.capture_set().clone();
        self.dataset.subset_inplace(&mut subset, feature, positive);
        if self.config.has_depth_budget() {
            subset.set_depth_budget(subset.depth_budget() - 1);
        }
        subset
    }

    #[inline]
    fn at_model_limit(&self, results: &[Arc<Model>]) -> bool {
        self.config.model_limit > 0 && results.len() >= self.config.model_limit
    }
}

/// Insert a model unless an equivalent one is already present. Result sets
/// are tiny (bounded by `model_limit`), so a linear scan beats hashing.
fn push_unique(results: &mut Vec<Arc<Model>>, model: Arc<Model>) {
    if !results.iter().any(|existing| **existing == *model) {
        results.push(model);
    }
}
