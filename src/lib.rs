//! osdt: certifiably optimal sparse decision trees.
//!
//! A concurrent branch-and-bound search over a dependency graph of
//! subproblems, producing decision trees that provably minimize
//!
//! ```text
//! R(T) = (1/N) * sum_i cost(pred_T(x_i), y_i) + lambda * |leaves(T)|
//! ```
//!
//! over a binary-featured, multi-class training matrix, together with a
//! certified lower/upper bound pair.
//!
//! # Key Types
//!
//! - [`Dataset`] - Binarized training data plus derived statistics
//! - [`Config`] - Search configuration builder
//! - [`fit`] - Run the optimization end to end
//! - [`FitResult`] / [`Status`] - Outcome, bounds and run statistics
//! - [`Model`] - An extracted decision tree
//!
//! # Example
//!
//! ```
//! use osdt::{fit, Config, Dataset, DenseMatrix, Status};
//!
//! // One feature that separates two classes perfectly.
//! let input = DenseMatrix::from_vec(
//!     vec![
//!         false, true, false, // x=0 -> class 0
//!         true, false, true, // x=1 -> class 1
//!     ],
//!     2,
//!     3,
//! );
//! let costs = DenseMatrix::from_vec(vec![0.0, 1.0, 1.0, 0.0], 2, 2);
//! let dataset = Dataset::new(&input, &costs, Dataset::trivial_feature_map(1), None).unwrap();
//!
//! let config = Config::builder().regularization(0.1).build().unwrap();
//! let result = fit(&dataset, &config);
//! assert_eq!(result.status, Status::Converged);
//! ```

pub mod bits;
pub mod config;
pub mod data;
pub mod fit;
pub mod logger;
pub mod model;
pub mod search;
pub mod testing;

// Re-export approx traits for users who want to compare objectives
pub use approx;

pub use bits::BitSet;
pub use config::{Config, ConfigError};
pub use data::{Dataset, DatasetError, DenseMatrix, PersistError, SummaryStatistics};
pub use fit::{fit, FitResult, Status};
pub use logger::Verbosity;
pub use model::{render_models, Model};
pub use search::{LocalState, Message, Optimizer, SearchError};
