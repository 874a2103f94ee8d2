//! Dataset and configuration persistence round trips.

use std::path::PathBuf;

use osdt::testing::labeled_dataset_with_reference;
use osdt::{BitSet, Config, Dataset};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("osdt-it").join(name);
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

#[test]
fn dataset_roundtrip_preserves_every_capture_statistic() {
    // Twelve rows over three features with a deliberately imperfect
    // reference, so both bound paths are exercised.
    let rows: Vec<(Vec<bool>, usize)> = (0..12u8)
        .map(|i| {
            let x = [i & 1 == 1, i >> 1 & 1 == 1, i % 3 == 0];
            ((x.to_vec()), usize::from(i % 3 == 1))
        })
        .collect();
    let rows: Vec<(&[bool], usize)> = rows.iter().map(|(x, y)| (x.as_slice(), *y)).collect();
    let reference: Vec<usize> = (0..12).map(|i| usize::from(i % 2 == 0)).collect();
    let dataset = labeled_dataset_with_reference(&rows, 2, Some(&reference));

    let path = scratch_dir("dataset").join("dataset.txt");
    dataset.save(&path).expect("save dataset");
    let restored = Dataset::load(&path).expect("load dataset");

    assert_eq!(restored.n_rows(), dataset.n_rows());
    assert_eq!(restored.n_features(), dataset.n_features());
    assert_eq!(restored.n_targets(), dataset.n_targets());
    assert!(restored.has_reference());

    // Statistics must be bitwise identical on a spread of capture sets.
    let mut work_a = BitSet::empty(dataset.n_rows());
    let mut work_b = BitSet::empty(dataset.n_rows());
    for seed in 0u16..64 {
        let mut capture = BitSet::empty(dataset.n_rows());
        for row in 0..dataset.n_rows() {
            capture.set(row, (seed.wrapping_mul(row as u16 + 7) >> 2) & 1 == 1);
        }
        let expected = dataset.summary_statistics(&capture, &mut work_a);
        let actual = restored.summary_statistics(&capture, &mut work_b);
        assert_eq!(expected, actual, "statistics diverged for seed {seed}");
    }
}

#[test]
fn dataset_roundtrip_preserves_feature_map() {
    let rows: &[(&[bool], usize)] = &[
        (&[true, false, true], 0),
        (&[false, true, false], 1),
    ];
    let dataset = labeled_dataset_with_reference(rows, 2, None);
    let path = scratch_dir("feature-map").join("dataset.txt");
    dataset.save(&path).expect("save dataset");
    let restored = Dataset::load(&path).expect("load dataset");

    for feature in 0..3 {
        assert_eq!(
            restored.original_feature(feature).unwrap(),
            dataset.original_feature(feature).unwrap()
        );
    }
    assert!(restored.original_feature(3).is_err());
}

#[test]
fn config_roundtrip_through_json_file() {
    let config = Config::builder()
        .regularization(0.02)
        .upperbound_guess(0.4)
        .depth_budget(5)
        .reference_lb(true)
        .look_ahead(false)
        .build()
        .unwrap();

    let path = scratch_dir("config").join("config.json");
    config.save(&path).expect("save config");
    let restored = Config::load(&path).expect("load config");

    assert!((restored.regularization - 0.02).abs() < 1e-6);
    assert!((restored.upperbound_guess - 0.4).abs() < 1e-6);
    assert_eq!(restored.depth_budget, 5);
    assert!(restored.reference_lb);
    assert!(!restored.look_ahead);
    assert!(restored.similar_support);
}

#[test]
fn config_load_rejects_invalid_values() {
    let path = scratch_dir("bad-config").join("config.json");
    std::fs::write(&path, r#"{"regularization": -0.5}"#).unwrap();
    assert!(Config::load(&path).is_err());
}
