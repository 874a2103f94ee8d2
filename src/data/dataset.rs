//! Binary-featured training data and its derived statistics.
//!
//! [`Dataset`] is immutable after construction and shared by reference across
//! all search workers. It holds row and column views of the features and
//! targets as bit sets, the per-target cost vectors derived from the cost
//! matrix, and the majority bitmask that powers the equivalent-points bound.
//!
//! The cost matrix handed to [`Dataset::new`] is in raw per-sample units
//! (`C[i][j]` = cost of predicting class `i` when the truth is `j`). It is
//! normalized by `1/N` at construction so that every loss flowing through the
//! optimizer is directly comparable against the leaf penalty.

use std::collections::{BTreeSet, HashMap};

use crate::bits::BitSet;
use crate::data::matrix::DenseMatrix;

// =============================================================================
// DatasetError
// =============================================================================

/// Errors raised while validating raw training inputs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DatasetError {
    /// The input matrix has no rows.
    #[error("input matrix has no rows")]
    EmptyInput,
    /// The input matrix has no feature columns once targets are accounted for.
    #[error("input matrix has no feature columns ({n_cols} columns, {n_targets} targets)")]
    NoFeatureColumns { n_cols: usize, n_targets: usize },
    /// The cost matrix is not square or is empty.
    #[error("cost matrix must be square and non-empty, got {n_rows}x{n_cols}")]
    CostMatrixNotSquare { n_rows: usize, n_cols: usize },
    /// The reference matrix does not match the dataset shape.
    #[error("reference matrix must be {expected_rows}x{expected_cols}, got {n_rows}x{n_cols}")]
    ReferenceShapeMismatch {
        expected_rows: usize,
        expected_cols: usize,
        n_rows: usize,
        n_cols: usize,
    },
    /// A row has no target bit set.
    #[error("row {row} has no target set")]
    RowWithoutTarget { row: usize },
    /// A binarized feature index is missing from the feature map.
    #[error("binarized feature {feature} not found in the feature map")]
    UnmappedFeature { feature: usize },
}

// =============================================================================
// SummaryStatistics
// =============================================================================

/// Loss statistics of a capture set, all in normalized per-sample units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SummaryStatistics {
    /// Akaike-style information of the captured target distribution.
    pub info: f32,
    /// Maximum cost reduction achievable by changing the prediction.
    pub potential: f32,
    /// Loss of the best single-leaf labeling.
    pub max_loss: f32,
    /// Lower bound on achievable loss; equals `guaranteed_min_loss` unless a
    /// reference model is present.
    pub min_loss: f32,
    /// Equivalent-points lower bound (always provable).
    pub guaranteed_min_loss: f32,
    /// The cost-minimizing prediction (lowest index on ties).
    pub optimal: usize,
}

// =============================================================================
// Dataset
// =============================================================================

/// Immutable binarized training data shared across search workers.
#[derive(Debug, Clone)]
pub struct Dataset {
    n_rows: usize,
    n_features: usize,
    n_targets: usize,

    row_features: Vec<BitSet>,
    row_targets: Vec<BitSet>,
    col_features: Vec<BitSet>,
    col_targets: Vec<BitSet>,

    /// Bit `r` is set when row `r`'s target is the cost-minimizing label of
    /// its feature-equivalence class.
    majority: BitSet,

    /// Raw cost matrix as provided, kept for persistence.
    raw_costs: DenseMatrix<f32>,
    /// Cost matrix normalized by `1/N`.
    costs: DenseMatrix<f32>,
    diff_costs: Vec<f32>,
    match_costs: Vec<f32>,
    mismatch_costs: Vec<f32>,

    reference_targets: Option<Vec<BitSet>>,
    feature_map: Vec<BTreeSet<usize>>,
}

impl Dataset {
    /// Build a dataset from an input matrix of `rows x (features + targets)`
    /// booleans (targets one-hot in the trailing columns), a raw square cost
    /// matrix, a feature map, and an optional reference-prediction matrix.
    pub fn new(
        input: &DenseMatrix<bool>,
        cost_matrix: &DenseMatrix<f32>,
        feature_map: Vec<BTreeSet<usize>>,
        reference: Option<&DenseMatrix<bool>>,
    ) -> Result<Self, DatasetError> {
        let n_targets = cost_matrix.n_rows();
        if cost_matrix.n_rows() != cost_matrix.n_cols() || n_targets == 0 {
            return Err(DatasetError::CostMatrixNotSquare {
                n_rows: cost_matrix.n_rows(),
                n_cols: cost_matrix.n_cols(),
            });
        }
        if input.n_cols() <= n_targets {
            return Err(DatasetError::NoFeatureColumns {
                n_cols: input.n_cols(),
                n_targets,
            });
        }
        if input.n_rows() == 0 {
            return Err(DatasetError::EmptyInput);
        }
        let n_rows = input.n_rows();
        let n_features = input.n_cols() - n_targets;

        if let Some(reference) = reference {
            if reference.n_rows() != n_rows || reference.n_cols() != n_targets {
                return Err(DatasetError::ReferenceShapeMismatch {
                    expected_rows: n_rows,
                    expected_cols: n_targets,
                    n_rows: reference.n_rows(),
                    n_cols: reference.n_cols(),
                });
            }
        }

        let mut dataset = Self {
            n_rows,
            n_features,
            n_targets,
            row_features: vec![BitSet::empty(n_features); n_rows],
            row_targets: vec![BitSet::empty(n_targets); n_rows],
            col_features: vec![BitSet::empty(n_rows); n_features],
            col_targets: vec![BitSet::empty(n_rows); n_targets],
            majority: BitSet::empty(n_rows),
            raw_costs: cost_matrix.clone(),
            costs: cost_matrix.clone(),
            diff_costs: Vec::new(),
            match_costs: Vec::new(),
            mismatch_costs: Vec::new(),
            reference_targets: None,
            feature_map,
        };

        dataset.construct_bitmasks(input);
        dataset.construct_cost_vectors();
        dataset.construct_majority_bitmask()?;
        if let Some(reference) = reference {
            dataset.construct_reference_bitmasks(reference);
        }
        Ok(dataset)
    }

    /// The trivial feature map: original feature `i` maps to `{i}`.
    pub fn trivial_feature_map(n_features: usize) -> Vec<BTreeSet<usize>> {
        (0..n_features).map(|i| BTreeSet::from([i])).collect()
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    #[inline]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    #[inline]
    pub fn n_targets(&self) -> usize {
        self.n_targets
    }

    #[inline]
    pub fn has_reference(&self) -> bool {
        self.reference_targets.is_some()
    }

    /// Feature view of one row.
    #[inline]
    pub fn row_features(&self, row: usize) -> &BitSet {
        &self.row_features[row]
    }

    /// Target view of one row.
    #[inline]
    pub fn row_targets(&self, row: usize) -> &BitSet {
        &self.row_targets[row]
    }

    pub(crate) fn feature_map(&self) -> &[BTreeSet<usize>] {
        &self.feature_map
    }

    pub(crate) fn raw_costs(&self) -> &DenseMatrix<f32> {
        &self.raw_costs
    }

    pub(crate) fn reference_targets(&self) -> Option<&[BitSet]> {
        self.reference_targets.as_deref()
    }

    /// The original feature index behind a binarized feature.
    pub fn original_feature(&self, binarized: usize) -> Result<usize, DatasetError> {
        self.feature_map
            .iter()
            .position(|set| set.contains(&binarized))
            .ok_or(DatasetError::UnmappedFeature { feature: binarized })
    }

    // =========================================================================
    // Derived statistics
    // =========================================================================

    /// Compute the loss statistics of `capture`. `work` is a caller-owned
    /// row-sized scratch set.
    pub fn summary_statistics(&self, capture: &BitSet, work: &mut BitSet) -> SummaryStatistics {
        let support = capture.count() as f32 / self.n_rows as f32;

        let mut distribution = vec![0usize; self.n_targets];
        for (target, count) in distribution.iter_mut().enumerate() {
            work.copy_bits_from(capture);
            work.and_with(&self.col_targets[target]);
            *count = work.count();
        }

        // Best single-leaf labeling, lowest index on ties.
        let mut max_loss = f32::MAX;
        let mut optimal = 0usize;
        for i in 0..self.n_targets {
            let mut cost = 0.0f32;
            for (j, &count) in distribution.iter().enumerate() {
                cost += self.costs.row_slice(i)[j] * count as f32;
            }
            if cost < max_loss {
                max_loss = cost;
                optimal = i;
            }
        }

        let mut guaranteed_min_loss = 0.0f32;
        let mut potential = 0.0f32;
        let mut info = 0.0f32;
        for (target, &count) in distribution.iter().enumerate() {
            potential += self.diff_costs[target] * count as f32;

            // Captured majority points with this label.
            work.copy_bits_from(capture);
            work.and_with(&self.majority);
            work.and_with(&self.col_targets[target]);
            guaranteed_min_loss += self.match_costs[target] * work.count() as f32;

            // Captured minority points with this label.
            work.copy_bits_from(capture);
            work.and_not(&self.majority);
            work.and_with(&self.col_targets[target]);
            guaranteed_min_loss += self.mismatch_costs[target] * work.count() as f32;

            if count > 0 {
                info += support * count as f32 * ((count as f32).ln() - support.ln());
            }
        }

        // Floating point noise can push the equivalent-points bound a hair
        // past max_loss; clip to keep min <= max.
        guaranteed_min_loss = guaranteed_min_loss.min(max_loss);

        let min_loss = match &self.reference_targets {
            None => guaranteed_min_loss,
            Some(reference) => {
                let mut loss = 0.0f32;
                for target in 0..self.n_targets {
                    work.copy_bits_from(capture);
                    work.and_with(&self.col_targets[target]);
                    work.and_with(&reference[target]);
                    loss += self.match_costs[target] * work.count() as f32;

                    work.copy_bits_from(capture);
                    work.and_with(&self.col_targets[target]);
                    work.and_not(&reference[target]);
                    loss += self.mismatch_costs[target] * work.count() as f32;
                }
                loss
            }
        };

        SummaryStatistics {
            info,
            potential,
            max_loss,
            min_loss,
            guaranteed_min_loss,
            optimal,
        }
    }

    /// Restrict `capture` to the rows where feature `j` holds (`positive`) or
    /// does not hold.
    #[inline]
    pub fn subset_inplace(&self, capture: &mut BitSet, feature: usize, positive: bool) {
        if positive {
            capture.and_with(&self.col_features[feature]);
        } else {
            capture.and_not(&self.col_features[feature]);
        }
    }

    /// Similar-support distance between features `i` and `j` on the captured
    /// rows: the cheaper of relabeling the rows where they disagree or the
    /// rows where they agree.
    pub fn distance(&self, capture: &BitSet, i: usize, j: usize, work: &mut BitSet) -> f32 {
        let mut positive = 0.0f32;
        let mut negative = 0.0f32;
        for target in 0..self.n_targets {
            work.copy_bits_from(&self.col_features[i]);
            work.xor_with(&self.col_features[j]);
            work.and_with(capture);
            work.and_with(&self.col_targets[target]);
            positive += self.diff_costs[target] * work.count() as f32;

            work.copy_bits_from(&self.col_features[i]);
            work.xnor_with(&self.col_features[j]);
            work.and_with(capture);
            work.and_with(&self.col_targets[target]);
            negative += self.diff_costs[target] * work.count() as f32;
        }
        positive.min(negative)
    }

    // =========================================================================
    // Construction helpers
    // =========================================================================

    fn construct_bitmasks(&mut self, input: &DenseMatrix<bool>) {
        for row in 0..self.n_rows {
            let values = input.row_slice(row);
            for (col, &bit) in values[..self.n_features].iter().enumerate() {
                self.row_features[row].set(col, bit);
                self.col_features[col].set(row, bit);
            }
            for (target, &bit) in values[self.n_features..].iter().enumerate() {
                self.row_targets[row].set(target, bit);
                self.col_targets[target].set(row, bit);
            }
        }
    }

    fn construct_cost_vectors(&mut self) {
        let scale = 1.0 / self.n_rows as f32;
        let normalized: Vec<f32> = self.raw_costs.as_slice().iter().map(|c| c * scale).collect();
        self.costs = DenseMatrix::from_vec(normalized, self.n_targets, self.n_targets);

        self.diff_costs = vec![0.0; self.n_targets];
        self.match_costs = vec![0.0; self.n_targets];
        self.mismatch_costs = vec![f32::MAX; self.n_targets];
        for i in 0..self.n_targets {
            let mut max_cost = f32::MIN;
            let mut min_cost = f32::MAX;
            for j in 0..self.n_targets {
                let cost = self.costs.row_slice(j)[i];
                max_cost = max_cost.max(cost);
                min_cost = min_cost.min(cost);
                if i == j {
                    self.match_costs[i] = cost;
                } else {
                    self.mismatch_costs[i] = self.mismatch_costs[i].min(cost);
                }
            }
            self.diff_costs[i] = max_cost - min_cost;
        }
    }

    /// Group rows by identical feature views, pick the cost-minimizing label
    /// per group, and mark the rows whose own target matches it.
    fn construct_majority_bitmask(&mut self) -> Result<(), DatasetError> {
        let mut distributions: HashMap<&BitSet, Vec<usize>> = HashMap::new();
        for row in 0..self.n_rows {
            let entry = distributions
                .entry(&self.row_features[row])
                .or_insert_with(|| vec![0; self.n_targets]);
            for (target, count) in entry.iter_mut().enumerate() {
                *count += self.row_targets[row].get(target) as usize;
            }
        }

        let mut minimizers: HashMap<&BitSet, usize> = HashMap::new();
        for (&id, distribution) in &distributions {
            let mut min = f32::MAX;
            let mut minimizer = 0usize;
            for i in 0..self.n_targets {
                let mut cost = 0.0f32;
                for (j, &count) in distribution.iter().enumerate() {
                    cost += self.costs.row_slice(i)[j] * count as f32;
                }
                if cost < min {
                    min = cost;
                    minimizer = i;
                }
            }
            minimizers.insert(id, minimizer);
        }

        let mut majority = BitSet::empty(self.n_rows);
        for row in 0..self.n_rows {
            let minimizer = minimizers[&self.row_features[row]];
            let empirical = self.row_targets[row].scan(0, true);
            if empirical >= self.n_targets {
                return Err(DatasetError::RowWithoutTarget { row });
            }
            majority.set(row, minimizer == empirical);
        }
        self.majority = majority;
        Ok(())
    }

    fn construct_reference_bitmasks(&mut self, reference: &DenseMatrix<bool>) {
        let mut targets = vec![BitSet::empty(self.n_rows); self.n_targets];
        for (target, mask) in targets.iter_mut().enumerate() {
            for row in 0..self.n_rows {
                if let Some(&bit) = reference.get(row, target) {
                    mask.set(row, bit);
                }
            }
        }
        self.reference_targets = Some(targets);
    }
}

// =============================================================================
// Tests
// =============================================================================
