//! Small synthetic datasets for tests and examples.

use ndarray::Array2;

use crate::data::{Dataset, DenseMatrix};

/// Build a dataset from labeled boolean rows with a uniform 0/1 cost matrix
/// and the trivial feature map.
///
/// # Panics
///
/// Panics when the rows are jagged or a label is out of range; these are
/// programming errors in test fixtures.
pub fn labeled_dataset(rows: &[(&[bool], usize)], n_targets: usize) -> Dataset {
    labeled_dataset_with_reference(rows, n_targets, None)
}

/// Like [`labeled_dataset`], with reference predictions (one label per row).
pub fn labeled_dataset_with_reference(
    rows: &[(&[bool], usize)],
    n_targets: usize,
    reference: Option<&[usize]>,
) -> Dataset {
    assert!(!rows.is_empty(), "fixture needs at least one row");
    let n_features = rows[0].0.len();

    let mut data = Vec::with_capacity(rows.len() * (n_features + n_targets));
    for (features, label) in rows {
        assert_eq!(features.len(), n_features, "jagged fixture row");
        assert!(*label < n_targets, "label {label} out of range");
        data.extend_from_slice(features);
        for target in 0..n_targets {
            data.push(target == *label);
        }
    }
    let input = DenseMatrix::from_vec(data, rows.len(), n_features + n_targets);

    let mut costs = vec![1.0f32; n_targets * n_targets];
    for target in 0..n_targets {
        costs[target * n_targets + target] = 0.0;
    }
    let cost_matrix = DenseMatrix::from_vec(costs, n_targets, n_targets);

    let reference_matrix = reference.map(|labels| {
        assert_eq!(labels.len(), rows.len(), "one reference label per row");
        let mut bits = Vec::with_capacity(rows.len() * n_targets);
        for &label in labels {
            for target in 0..n_targets {
                bits.push(target == label);
            }
        }
        DenseMatrix::from_vec(bits, rows.len(), n_targets)
    });

    Dataset::new(
        &input,
        &cost_matrix,
        Dataset::trivial_feature_map(n_features),
        reference_matrix.as_ref(),
    )
    .expect("fixture dataset is valid")
}

/// The four-row XOR problem over two features.
pub fn xor_dataset() -> Dataset {
    labeled_dataset(
        &[
            (&[false, false], 0),
            (&[false, true], 1),
            (&[true, false], 1),
            (&[true, true], 0),
        ],
        2,
    )
}

/// Build a dataset from an `ndarray` feature matrix and a label vector,
/// exercising the same conversion path external callers use.
pub fn dataset_from_arrays(features: &Array2<bool>, labels: &[usize], n_targets: usize) -> Dataset {
    assert_eq!(features.nrows(), labels.len());
    let mut input = Array2::from_elem((features.nrows(), features.ncols() + n_targets), false);
    for (row, &label) in labels.iter().enumerate() {
        for col in 0..features.ncols() {
            input[(row, col)] = features[(row, col)];
        }
        input[(row, features.ncols() + label)] = true;
    }
    let input = DenseMatrix::from_array(input.view());

    let mut costs = vec![1.0f32; n_targets * n_targets];
    for target in 0..n_targets {
        costs[target * n_targets + target] = 0.0;
    }
    let cost_matrix = DenseMatrix::from_vec(costs, n_targets, n_targets);
    Dataset::new(
        &input,
        &cost_matrix,
        Dataset::trivial_feature_map(features.ncols()),
        None,
    )
    .expect("fixture dataset is valid")
}
