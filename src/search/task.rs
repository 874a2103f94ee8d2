//! A subproblem of the search: one capture set plus its bound state.

use crate::bits::BitSet;
use crate::config::Config;
use crate::data::Dataset;
use crate::search::SearchError;

/// A subproblem over a subset of rows, with the features still worth
/// splitting on and the certified objective interval.
///
/// Tasks self-initialize their bounds from the dataset's summary statistics
/// and classify themselves on construction: provably useless subproblems
/// collapse to `lower = upper = base_objective` with an emptied feature set.
#[derive(Debug, Clone)]
pub struct Task {
    capture_set: BitSet,
    feature_set: BitSet,

    /// Reserved feature-reorder record; carried through the graph for model
    /// reconstruction once non-binary encodings land.
    order: Vec<i32>,

    support: f32,
    information: f32,
    base_objective: f32,

    lowerbound: f32,
    upperbound: f32,

    /// Provable lower bound even when `reference_lb` lets `lowerbound` ride
    /// on a possibly optimistic reference model.
    guaranteed_lowerbound: f32,

    lowerscope: f32,
    upperscope: f32,
    /// The upperscope at which this task last dispatched its explorers.
    coverage: f32,

    /// Feature index backing the current upper bound, `-1` if none.
    optimal_feature: i32,
}

impl Task {
    /// Build and classify a subproblem. `work` is a row-sized scratch set.
    ///
    /// # Errors
    ///
    /// Returns an integrity violation if classification produces an inverted
    /// bound interval; that indicates corrupted statistics, not a recoverable
    /// state.
    pub fn new(
        capture_set: BitSet,
        feature_set: BitSet,
        dataset: &Dataset,
        config: &Config,
        work: &mut BitSet,
    ) -> Result<Self, SearchError> {
        let support = capture_set.count() as f32 / dataset.n_rows() as f32;
        let regularization = config.regularization;
        let terminal = capture_set.count() <= 1 || feature_set.is_empty();

        let stats = dataset.summary_statistics(&capture_set, work);

        // The base objective is the risk of not splitting: one leaf.
        let base_objective = stats.max_loss + regularization;
        // Any tree beating the base objective uses at least two leaves.
        let lowerbound = base_objective.min(stats.min_loss + 2.0 * regularization);
        let guaranteed_lowerbound =
            base_objective.min(stats.guaranteed_min_loss + 2.0 * regularization);

        let mut task = Self {
            capture_set,
            feature_set,
            order: Vec::new(),
            support,
            information: stats.info,
            base_objective,
            lowerbound,
            upperbound: base_objective,
            guaranteed_lowerbound,
            lowerscope: f32::MIN,
            upperscope: f32::MAX,
            coverage: f32::MIN,
            optimal_feature: -1,
        };

        let depth_exhausted =
            config.has_depth_budget() && task.capture_set.depth_budget() == 1;

        if 1.0 - stats.min_loss < regularization
            || (stats.potential < 2.0 * regularization && 1.0 - stats.max_loss < regularization)
        {
            // Provably not part of any optimal tree: the achievable accuracy
            // cannot pay for the leaf it would cost.
            task.collapse_to_leaf();
        } else if stats.max_loss - stats.min_loss < regularization
            || stats.potential < 2.0 * regularization
            || terminal
            || depth_exhausted
        {
            // Provably never an internal node of an optimal tree.
            task.collapse_to_leaf();
        }

        if task.lowerbound > task.upperbound {
            return Err(SearchError::IntegrityViolation {
                context: "Task::new",
                reason: format!(
                    "invalid bounds [{}, {}]",
                    task.lowerbound, task.upperbound
                ),
            });
        }
        Ok(task)
    }

    fn collapse_to_leaf(&mut self) {
        self.lowerbound = self.base_objective;
        self.upperbound = self.base_objective;
        self.feature_set.clear();
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline]
    pub fn capture_set(&self) -> &BitSet {
        &self.capture_set
    }

    #[inline]
    pub fn feature_set(&self) -> &BitSet {
        &self.feature_set
    }

    #[inline]
    pub fn order(&self) -> &[i32] {
        &self.order
    }

    #[inline]
    pub fn support(&self) -> f32 {
        self.support
    }

    #[inline]
    pub fn information(&self) -> f32 {
        self.information
    }

    #[inline]
    pub fn base_objective(&self) -> f32 {
        self.base_objective
    }

    #[inline]
    pub fn lowerbound(&self) -> f32 {
        self.lowerbound
    }

    #[inline]
    pub fn upperbound(&self) -> f32 {
        self.upperbound
    }

    #[inline]
    pub fn lowerscope(&self) -> f32 {
        self.lowerscope
    }

    #[inline]
    pub fn upperscope(&self) -> f32 {
        self.upperscope
    }

    #[inline]
    pub fn coverage(&self) -> f32 {
        self.coverage
    }

    #[inline]
    pub fn set_coverage(&mut self, coverage: f32) {
        self.coverage = coverage;
    }

    #[inline]
    pub fn optimal_feature(&self) -> i32 {
        self.optimal_feature
    }

    /// The certified optimality gap.
    #[inline]
    pub fn uncertainty(&self) -> f32 {
        (self.upperbound - self.lowerbound).max(0.0)
    }

    /// Lower bound without reference-model optimism.
    #[inline]
    pub fn guaranteed_lowerbound(&self, config: &Config) -> f32 {
        if config.reference_lb {
            self.guaranteed_lowerbound
        } else {
            self.lowerbound
        }
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Widen the recorded scope window with another requested scope.
    pub fn scope(&mut self, new_scope: f32) {
        if new_scope == 0.0 {
            return;
        }
        let new_scope = new_scope.max(0.0);
        self.upperscope = if self.upperscope == f32::MAX {
            new_scope
        } else {
            self.upperscope.max(new_scope)
        };
        self.lowerscope = if self.lowerscope == f32::MIN {
            new_scope
        } else {
            self.lowerscope.min(new_scope)
        };
    }

    /// Remove a feature from consideration.
    #[inline]
    pub fn prune_feature(&mut self, feature: usize) {
        self.feature_set.set(feature, false);
    }

    /// Tighten the bound interval and record the backing feature. Returns
    /// whether the proposal differed from the current interval.
    pub fn update(&mut self, config: &Config, lower: f32, upper: f32, optimal_feature: i32) -> bool {
        let change = lower != self.lowerbound || upper != self.upperbound;
        self.lowerbound = self.lowerbound.max(lower);
        self.upperbound = self.upperbound.min(upper);
        self.lowerbound = self.lowerbound.min(self.upperbound);

        self.optimal_feature = optimal_feature;

        if (config.cancellation && 1.0 - self.lowerbound < 0.0)
            || self.upperbound - self.lowerbound <= f32::EPSILON
        {
            self.lowerbound = self.upperbound;
        }
        change
    }

    /// Construct the children of every live feature into `neighbourhood`
    /// (`2j` holds the negative side, `2j + 1` the positive side), pruning
    /// features whose splits are degenerate on this capture set.
    pub fn create_children(
        &mut self,
        dataset: &Dataset,
        config: &Config,
        neighbourhood: &mut [Option<Task>],
        buffer: &mut BitSet,
        work: &mut BitSet,
    ) -> Result<(), SearchError> {
        let live: Vec<usize> = self.feature_set.iter_set().collect();
        for feature in live {
            let mut skip = false;
            for (k, positive) in [false, true].into_iter().enumerate() {
                buffer.copy_bits_from(&self.capture_set);
                buffer.set_depth_budget(self.capture_set.depth_budget());
                dataset.subset_inplace(buffer, feature, positive);
                if config.has_depth_budget() {
                    // Children spend one level of the budget.
                    buffer.set_depth_budget(buffer.depth_budget() - 1);
                }
                if buffer.is_empty() || buffer.count() == self.capture_set.count() {
                    skip = true;
                    continue;
                }
                let child = Task::new(
                    buffer.clone(),
                    self.feature_set.clone(),
                    dataset,
                    config,
                    work,
                )?;
                neighbourhood[2 * feature + k] = Some(child);
            }
            if skip {
                self.prune_feature(feature);
            }
        }
        Ok(())
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

    fn xor_dataset() -> Dataset {
        // Rows (x0, x1) -> label: XOR truth table, one-hot targets appended.
        let input = DenseMatrix::from_vec(
            vec![
                false, false, true, false, // (0,0) -> 0
                false, true, false, true, // (0,1) -> 1
                true, false, false, true, // (1,0) -> 1
                true, true, true, false, // (1,1) -> 0
            ],
            4,
            4,
        );
        let costs = DenseMatrix::from_vec(vec![0.0, 1.0, 1.0, 0.0], 2, 2);
        Dataset::new(&input, &costs, Dataset::trivial_feature_map(2), None).unwrap()
    }

    fn config(regularization: f32) -> Config {
        Config::builder().regularization(regularization).build().unwrap()
    }

    #[test]
    fn splittable_task_adopts_provisional_bounds() {
        let dataset = xor_dataset();
        let config = config(0.01);
        let mut work = BitSet::empty(4);
        let task = Task::new(
            BitSet::full(4),
            BitSet::full(2),
            &dataset,
            &config,
            &mut work,
        )
        .unwrap();

        // Best single leaf misclassifies half the rows.
        assert_abs_diff_eq!(task.base_objective(), 0.51, epsilon = 1e-6);
        // Equivalent points bound is zero here, so the floor is two leaves.
        assert_abs_diff_eq!(task.lowerbound(), 0.02, epsilon = 1e-6);
        assert_abs_diff_eq!(task.upperbound(), 0.51, epsilon = 1e-6);
        assert!(!task.feature_set().is_empty());
    }

    #[test]
    fn single_row_task_becomes_a_leaf() {
        let dataset = xor_dataset();
        let config = config(0.01);
        let mut work = BitSet::empty(4);
        let mut capture = BitSet::empty(4);
        capture.set(2, true);
        let task = Task::new(capture, BitSet::full(2), &dataset, &config, &mut work).unwrap();
        assert_abs_diff_eq!(task.lowerbound(), task.upperbound());
        assert_abs_diff_eq!(task.upperbound(), task.base_objective());
        assert!(task.feature_set().is_empty());
    }

    #[test]
    fn huge_regularization_prunes_entirely() {
        let dataset = xor_dataset();
        // A leaf penalty no accuracy gain can pay for.
        let config = config(0.9);
        let mut work = BitSet::empty(4);
        let task = Task::new(
            BitSet::full(4),
            BitSet::full(2),
            &dataset,
            &config,
            &mut work,
        )
        .unwrap();
        assert!(task.feature_set().is_empty());
        assert_abs_diff_eq!(task.lowerbound(), task.base_objective());
    }

    #[test]
    fn exhausted_depth_budget_forces_a_leaf() {
        let dataset = xor_dataset();
        let config = Config::builder()
            .regularization(0.01)
            .depth_budget(1)
            .build()
            .unwrap();
        let mut work = BitSet::empty(4);
        let task = Task::new(
            BitSet::full(4).with_depth_budget(1),
            BitSet::full(2),
            &dataset,
            &config,
            &mut work,
        )
        .unwrap();
        assert!(task.feature_set().is_empty());
    }

    #[test]
    fn scope_grows_the_window() {
        let dataset = xor_dataset();
        let config = config(0.01);
        let mut work = BitSet::empty(4);
        let mut task = Task::new(
            BitSet::full(4),
            BitSet::full(2),
            &dataset,
            &config,
            &mut work,
        )
        .unwrap();

        task.scope(0.4);
        assert_abs_diff_eq!(task.upperscope(), 0.4);
        assert_abs_diff_eq!(task.lowerscope(), 0.4);
        task.scope(0.6);
        assert_abs_diff_eq!(task.upperscope(), 0.6);
        assert_abs_diff_eq!(task.lowerscope(), 0.4);
        task.scope(0.2);
        assert_abs_diff_eq!(task.upperscope(), 0.6);
        assert_abs_diff_eq!(task.lowerscope(), 0.2);
        // Zero is a sentinel, not a scope.
        task.scope(0.0);
        assert_abs_diff_eq!(task.lowerscope(), 0.2);
    }

    #[test]
    fn update_clamps_and_collapses_small_gaps() {
        let dataset = xor_dataset();
        let config = config(0.01);
        let mut work = BitSet::empty(4);
        let mut task = Task::new(
            BitSet::full(4),
            BitSet::full(2),
            &dataset,
            &config,
            &mut work,
        )
        .unwrap();

        let changed = task.update(&config, 0.03, 0.2, 1);
        assert!(changed);
        assert_abs_diff_eq!(task.lowerbound(), 0.03);
        assert_abs_diff_eq!(task.upperbound(), 0.2);
        assert_eq!(task.optimal_feature(), 1);

        // A gap within epsilon snaps shut.
        task.update(&config, 0.2 - f32::EPSILON / 2.0, 0.2, 1);
        assert_abs_diff_eq!(task.lowerbound(), task.upperbound());
        assert_abs_diff_eq!(task.uncertainty(), 0.0);
    }

    #[test]
    fn update_never_inverts_bounds() {
        let dataset = xor_dataset();
        let config = config(0.01);
        let mut work = BitSet::empty(4);
        let mut task = Task::new(
            BitSet::full(4),
            BitSet::full(2),
            &dataset,
            &config,
            &mut work,
        )
        .unwrap();
        // A lower proposal above the upper proposal clamps instead of
        // inverting.
        task.update(&config, 0.4, 0.3, -1);
        assert!(task.lowerbound() <= task.upperbound());
    }

    #[test]
    fn create_children_prunes_degenerate_features() {
        // Feature 1 is constant over the capture set; splitting on it leaves
        // the capture unchanged on one side and empty on the other.
        let input = DenseMatrix::from_vec(
            vec![
                true, true, true, false, // x=(1,1) -> 0
                false, true, false, true, // x=(0,1) -> 1
            ],
            2,
            4,
        );
        let costs = DenseMatrix::from_vec(vec![0.0, 1.0, 1.0, 0.0], 2, 2);
        let dataset =
            Dataset::new(&input, &costs, Dataset::trivial_feature_map(2), None).unwrap();
        let config = config(0.01);
        let mut work = BitSet::empty(2);
        let mut buffer = BitSet::empty(2);
        let mut task = Task::new(
            BitSet::full(2),
            BitSet::full(2),
            &dataset,
            &config,
            &mut work,
        )
        .unwrap();
        let mut neighbourhood: Vec<Option<Task>> = vec![None; 4];
        task.create_children(&dataset, &config, &mut neighbourhood, &mut buffer, &mut work)
            .unwrap();

        assert!(task.feature_set().get(0));
        assert!(!task.feature_set().get(1), "constant feature must be pruned");
        assert!(neighbourhood[0].is_some() && neighbourhood[1].is_some());
    }

    #[test]
    fn create_children_decrements_depth_budget() {
        let dataset = xor_dataset();
        let config = Config::builder()
            .regularization(0.01)
            .depth_budget(3)
            .build()
            .unwrap();
        let mut work = BitSet::empty(4);
        let mut buffer = BitSet::empty(4);
        let mut task = Task::new(
            BitSet::full(4).with_depth_budget(3),
            BitSet::full(2),
            &dataset,
            &config,
            &mut work,
        )
        .unwrap();
        let mut neighbourhood: Vec<Option<Task>> = vec![None; 4];
        task.create_children(&dataset, &config, &mut neighbourhood, &mut buffer, &mut work)
            .unwrap();
        let child = neighbourhood[0].as_ref().unwrap();
        assert_eq!(child.capture_set().depth_budget(), 2);
    }
}
