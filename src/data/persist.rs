//! Dataset persistence.
//!
//! The on-disk layout is a whitespace-delimited text format:
//!
//! ```text
//! <rows> <cols>
//! <input matrix values, row-major, 0/1>
//! <targets> <targets>
//! <cost matrix values, row-major, raw floats>
//! <0|1>                      # has reference matrix
//! [<reference matrix>]       # same framing as the input matrix
//! <one line per original feature: its binarized feature indices>
//! ```
//!
//! The raw (un-normalized) cost matrix is persisted, so a load re-derives the
//! exact same normalized statistics.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;

use crate::data::dataset::{Dataset, DatasetError};
use crate::data::matrix::DenseMatrix;

/// Errors raised while persisting or restoring a dataset.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("dataset file i/o failed")]
    Io(#[from] std::io::Error),
    #[error("dataset file is malformed: {0}")]
    Parse(String),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

impl Dataset {
    /// Persist the dataset to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let mut out = String::new();
        write_bool_matrix(&mut out, self.n_rows(), self.n_features() + self.n_targets(), |row, col| {
            if col < self.n_features() {
                self.row_features(row).get(col)
            } else {
                self.row_targets(row).get(col - self.n_features())
            }
        });
        let costs = self.raw_costs();
        let _ = writeln!(out, "{} {}", costs.n_rows(), costs.n_cols());
        for row in 0..costs.n_rows() {
            let line: Vec<String> = costs.row_slice(row).iter().map(|v| v.to_string()).collect();
            let _ = writeln!(out, "{}", line.join(" "));
        }
        match self.reference_targets() {
            Some(reference) => {
                let _ = writeln!(out, "1");
                write_bool_matrix(&mut out, self.n_rows(), self.n_targets(), |row, col| {
                    reference[col].get(row)
                });
            }
            None => {
                let _ = writeln!(out, "0");
            }
        }
        for set in self.feature_map() {
            let line: Vec<String> = set.iter().map(|v| v.to_string()).collect();
            let _ = writeln!(out, "{}", line.join(" "));
        }
        std::fs::write(path, out)?;
        Ok(())
    }

    /// Restore a dataset previously written by [`Dataset::save`].
    pub fn load(path: impl AsRef<Path>) -> Result<Dataset, PersistError> {
        let text = std::fs::read_to_string(path)?;
        let mut lines = text.lines();

        let input = read_matrix(&mut lines, parse_bit)?;
        let cost_matrix = read_matrix(&mut lines, parse_float)?;

        let flag_line = lines
            .next()
            .ok_or_else(|| PersistError::Parse("missing reference flag".into()))?;
        let has_reference = match flag_line.trim() {
            "1" => true,
            "0" => false,
            other => {
                return Err(PersistError::Parse(format!(
                    "reference flag must be 0 or 1, got {other:?}"
                )))
            }
        };
        let reference = if has_reference {
            Some(read_matrix(&mut lines, parse_bit)?)
        } else {
            None
        };

        let mut feature_map: Vec<BTreeSet<usize>> = Vec::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let mut set = BTreeSet::new();
            for token in line.split_whitespace() {
                let index: usize = token
                    .parse()
                    .map_err(|_| PersistError::Parse(format!("bad feature index {token:?}")))?;
                set.insert(index);
            }
            feature_map.push(set);
        }

        Ok(Dataset::new(
            &input,
            &cost_matrix,
            feature_map,
            reference.as_ref(),
        )?)
    }
}

fn write_bool_matrix(
    out: &mut String,
    n_rows: usize,
    n_cols: usize,
    mut value: impl FnMut(usize, usize) -> bool,
) {
    let _ = writeln!(out, "{n_rows} {n_cols}");
    for row in 0..n_rows {
        let line: Vec<&str> = (0..n_cols)
            .map(|col| if value(row, col) { "1" } else { "0" })
            .collect();
        let _ = writeln!(out, "{}", line.join(" "));
    }
}

fn parse_bit(token: &str) -> Result<bool, PersistError> {
    match token {
        "1" => Ok(true),
        "0" => Ok(false),
        other => Err(PersistError::Parse(format!("expected 0/1, got {other:?}"))),
    }
}

fn parse_float(token: &str) -> Result<f32, PersistError> {
    token
        .parse()
        .map_err(|_| PersistError::Parse(format!("expected a float, got {token:?}")))
}

fn read_matrix<'a, T: Copy>(
    lines: &mut impl Iterator<Item = &'a str>,
    parse: impl Fn(&str) -> Result<T, PersistError>,
) -> Result<DenseMatrix<T>, PersistError> {
    let header = lines
        .next()
        .ok_or_else(|| PersistError::Parse("missing matrix header".into()))?;
    let mut dims = header.split_whitespace();
    let n_rows: usize = dims
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| PersistError::Parse(format!("bad matrix header {header:?}")))?;
    let n_cols: usize = dims
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| PersistError::Parse(format!("bad matrix header {header:?}")))?;

    let mut values = Vec::with_capacity(n_rows * n_cols);
    while values.len() < n_rows * n_cols {
        let line = lines
            .next()
            .ok_or_else(|| PersistError::Parse("matrix body truncated".into()))?;
        for token in line.split_whitespace() {
            values.push(parse(token)?);
        }
    }
    if values.len() != n_rows * n_cols {
        return Err(PersistError::Parse(format!(
            "matrix body has {} values, expected {}",
            values.len(),
            n_rows * n_cols
        )));
    }
    Ok(DenseMatrix::from_vec(values, n_rows, n_cols))
}
