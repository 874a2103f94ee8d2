//! Training data: raw matrices, the binarized dataset, and persistence.
//!
//! [`DenseMatrix`] carries inputs at the boundary; [`Dataset`] is the shared
//! immutable view the optimizer actually works against.

mod dataset;
mod matrix;
mod persist;

pub use dataset::{Dataset, DatasetError, SummaryStatistics};
pub use matrix::DenseMatrix;
pub use persist::PersistError;
