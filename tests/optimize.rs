//! End-to-end optimization tests.
//!
//! Focused on certified objective values and terminal status over small,
//! fully-checkable problems.

use approx::assert_abs_diff_eq;
use rstest::rstest;
use serde_json::Value;

use osdt::testing::{labeled_dataset, labeled_dataset_with_reference, xor_dataset};
use osdt::{fit, Config, Status};

/// Parse the result's model JSON array.
fn parse_models(result: &osdt::FitResult) -> Vec<Value> {
    if result.model.is_empty() {
        return Vec::new();
    }
    match serde_json::from_str(&result.model).expect("model JSON parses") {
        Value::Array(models) => models,
        other => panic!("expected a JSON array, got {other}"),
    }
}

fn count_leaves(node: &Value) -> usize {
    if node.get("prediction").is_some() {
        1
    } else {
        count_leaves(&node["false"]) + count_leaves(&node["true"])
    }
}

// =============================================================================
// Single-leaf scenarios
// =============================================================================

#[rstest]
// One row, one feature, one target: a leaf costing only the penalty.
#[case(vec![(vec![true], 0)], 1, 0.05, 0.05, 0.0)]
// Two identical rows with conflicting labels: the feature is useless, the
// best model is a leaf eating one of the two rows.
#[case(vec![(vec![true], 0), (vec![true], 1)], 2, 0.05, 0.55, 0.5)]
fn converges_to_a_single_leaf(
    #[case] rows: Vec<(Vec<bool>, usize)>,
    #[case] n_targets: usize,
    #[case] regularization: f32,
    #[case] expected_objective: f64,
    #[case] expected_loss: f64,
) {
    let rows: Vec<(&[bool], usize)> = rows.iter().map(|(x, y)| (x.as_slice(), *y)).collect();
    let dataset = labeled_dataset(&rows, n_targets);
    let config = Config::builder()
        .regularization(regularization)
        .build()
        .unwrap();

    let result = fit(&dataset, &config);
    assert_eq!(result.status, Status::Converged);
    assert_abs_diff_eq!(result.lower_bound, expected_objective, epsilon = 1e-5);
    assert_abs_diff_eq!(result.upper_bound, expected_objective, epsilon = 1e-5);
    assert_abs_diff_eq!(result.model_loss, expected_loss, epsilon = 1e-5);

    let models = parse_models(&result);
    assert_eq!(models.len(), 1);
    assert_eq!(count_leaves(&models[0]), 1);
}

// =============================================================================
// XOR
// =============================================================================

#[test]
fn xor_needs_four_leaves() {
    let dataset = xor_dataset();
    let config = Config::builder().regularization(0.01).build().unwrap();

    let result = fit(&dataset, &config);
    assert_eq!(result.status, Status::Converged);
    assert_abs_diff_eq!(result.lower_bound, 0.04, epsilon = 1e-5);
    assert_abs_diff_eq!(result.upper_bound, 0.04, epsilon = 1e-5);
    assert_abs_diff_eq!(result.model_loss, 0.0, epsilon = 1e-6);

    let models = parse_models(&result);
    assert_eq!(models.len(), 1);
    assert_eq!(count_leaves(&models[0]), 4);
}

#[test]
fn xor_has_two_optimal_trees() {
    // Split on either feature first: both orders reach the optimum.
    let dataset = xor_dataset();
    let config = Config::builder()
        .regularization(0.01)
        .model_limit(10)
        .build()
        .unwrap();

    let result = fit(&dataset, &config);
    assert_eq!(result.status, Status::Converged);
    let models = parse_models(&result);
    assert_eq!(models.len(), 2);
    for model in &models {
        assert_eq!(count_leaves(model), 4);
    }
}

#[test]
fn model_limit_zero_extracts_nothing() {
    let dataset = xor_dataset();
    let config = Config::builder()
        .regularization(0.01)
        .model_limit(0)
        .build()
        .unwrap();

    let result = fit(&dataset, &config);
    assert_eq!(result.status, Status::Converged);
    assert!(result.model.is_empty());
}

// =============================================================================
// Depth budgets
// =============================================================================

#[test]
fn depth_budget_two_on_xor_falls_back_to_a_leaf() {
    // One split costs two leaves but removes no error mass on XOR, so the
    // depth-2 optimum is the bare root leaf.
    let dataset = xor_dataset();
    let config = Config::builder()
        .regularization(0.01)
        .depth_budget(2)
        .build()
        .unwrap();

    let result = fit(&dataset, &config);
    assert_eq!(result.status, Status::Converged);
    assert_abs_diff_eq!(result.lower_bound, 0.51, epsilon = 1e-5);
    assert_abs_diff_eq!(result.upper_bound, 0.51, epsilon = 1e-5);
    assert_abs_diff_eq!(result.model_loss, 0.5, epsilon = 1e-5);

    let models = parse_models(&result);
    assert_eq!(count_leaves(&models[0]), 1);
}

#[test]
fn depth_budget_two_accepts_a_paying_split() {
    // A perfectly separating feature: the depth-2 split wipes out the loss.
    let dataset = labeled_dataset(
        &[
            (&[false], 0),
            (&[false], 0),
            (&[true], 1),
            (&[true], 1),
        ],
        2,
    );
    let config = Config::builder()
        .regularization(0.01)
        .depth_budget(2)
        .build()
        .unwrap();

    let result = fit(&dataset, &config);
    assert_eq!(result.status, Status::Converged);
    assert_abs_diff_eq!(result.lower_bound, 0.02, epsilon = 1e-5);
    assert_abs_diff_eq!(result.model_loss, 0.0, epsilon = 1e-6);
    let models = parse_models(&result);
    assert_eq!(count_leaves(&models[0]), 2);
}

#[test]
fn depth_budget_three_recovers_the_xor_tree() {
    let dataset = xor_dataset();
    let config = Config::builder()
        .regularization(0.01)
        .depth_budget(3)
        .build()
        .unwrap();

    let result = fit(&dataset, &config);
    assert_eq!(result.status, Status::Converged);
    assert_abs_diff_eq!(result.upper_bound, 0.04, epsilon = 1e-5);
    let models = parse_models(&result);
    assert_eq!(count_leaves(&models[0]), 4);
}

// =============================================================================
// Reference lower bound
// =============================================================================

#[test]
fn reference_matching_truth_changes_nothing() {
    // A reference equal to the true labels can only tighten lower bounds; the
    // optimum and the extracted model set must be identical.
    let rows: &[(&[bool], usize)] = &[
        (&[false, false], 0),
        (&[false, true], 1),
        (&[true, false], 1),
        (&[true, true], 0),
    ];
    let plain = labeled_dataset(rows, 2);
    let referenced = labeled_dataset_with_reference(rows, 2, Some(&[0, 1, 1, 0]));

    let baseline_config = Config::builder()
        .regularization(0.01)
        .model_limit(10)
        .build()
        .unwrap();
    let reference_config = Config::builder()
        .regularization(0.01)
        .model_limit(10)
        .reference_lb(true)
        .build()
        .unwrap();

    let baseline = fit(&plain, &baseline_config);
    let referenced = fit(&referenced, &reference_config);

    assert_eq!(baseline.status, Status::Converged);
    assert_eq!(referenced.status, Status::Converged);
    assert_abs_diff_eq!(baseline.upper_bound, referenced.upper_bound, epsilon = 1e-6);
    assert_abs_diff_eq!(baseline.model_loss, referenced.model_loss, epsilon = 1e-6);

    let mut baseline_models: Vec<String> =
        parse_models(&baseline).iter().map(Value::to_string).collect();
    let mut referenced_models: Vec<String> =
        parse_models(&referenced).iter().map(Value::to_string).collect();
    baseline_models.sort();
    referenced_models.sort();
    assert_eq!(baseline_models, referenced_models);
}

// =============================================================================
// Rule lists
// =============================================================================

#[test]
fn rule_list_topology_costs_an_extra_error_on_xor() {
    // A rule list must keep one side of every split a leaf: on XOR the best
    // list misclassifies one row with three leaves.
    let dataset = xor_dataset();
    let config = Config::builder()
        .regularization(0.01)
        .rule_list(true)
        .build()
        .unwrap();

    let result = fit(&dataset, &config);
    assert_eq!(result.status, Status::Converged);
    assert_abs_diff_eq!(result.upper_bound, 0.28, epsilon = 1e-5);
    assert_abs_diff_eq!(result.model_loss, 0.25, epsilon = 1e-5);
}

// =============================================================================
// Parallel execution
// =============================================================================

#[test]
fn parallel_workers_reach_the_single_threaded_objective() {
    // Three features, one irrelevant; eight rows of x0 XOR x1.
    let rows: Vec<(Vec<bool>, usize)> = (0..8u8)
        .map(|bits| {
            let x = [bits & 1 == 1, bits >> 1 & 1 == 1, bits >> 2 & 1 == 1];
            let label = usize::from((bits & 1 == 1) ^ (bits >> 1 & 1 == 1));
            (x.to_vec(), label)
        })
        .collect();
    let rows: Vec<(&[bool], usize)> = rows.iter().map(|(x, y)| (x.as_slice(), *y)).collect();
    let dataset = labeled_dataset(&rows, 2);

    let sequential = fit(
        &dataset,
        &Config::builder().regularization(0.01).build().unwrap(),
    );
    let parallel = fit(
        &dataset,
        &Config::builder()
            .regularization(0.01)
            .worker_limit(4)
            .build()
            .unwrap(),
    );

    assert_eq!(sequential.status, Status::Converged);
    assert_eq!(parallel.status, Status::Converged);
    assert_abs_diff_eq!(sequential.upper_bound, 0.04, epsilon = 1e-5);
    assert_abs_diff_eq!(parallel.upper_bound, sequential.upper_bound, epsilon = 1e-6);
    assert_abs_diff_eq!(parallel.lower_bound, parallel.upper_bound, epsilon = 1e-6);
}

// =============================================================================
// Result invariants
// =============================================================================

#[test]
fn bounds_are_always_ordered() {
    for regularization in [0.005f32, 0.05, 0.3, 0.45] {
        let dataset = xor_dataset();
        let config = Config::builder()
            .regularization(regularization)
            .build()
            .unwrap();
        let result = fit(&dataset, &config);
        assert!(
            result.lower_bound <= result.upper_bound,
            "inverted bounds at lambda {regularization}"
        );
        assert!(result.graph_size >= 1);
        assert!(result.n_iterations >= 1);
    }
}
