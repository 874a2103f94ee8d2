//! Search configuration with builder pattern.
//!
//! [`Config`] collects every knob of the optimizer. It is built through the
//! `bon` builder with validation at build time, and round-trips through JSON
//! (`config.json` files) with the historical key names.
//!
//! # Example
//!
//! ```
//! use osdt::Config;
//!
//! // All defaults
//! let config = Config::builder().build().unwrap();
//!
//! // Customize the penalty and the thread count
//! let config = Config::builder()
//!     .regularization(0.01)
//!     .worker_limit(4)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.worker_limit, 4);
//! ```

use std::path::Path;

use bon::Builder;
use serde::{Deserialize, Serialize};

// =============================================================================
// ConfigError
// =============================================================================

/// Errors that can occur while validating or loading a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Regularization must be non-negative and finite.
    #[error("regularization must be non-negative and finite, got {0}")]
    InvalidRegularization(f32),
    /// The upper-bound guess must lie in `[0, 1]` (0 disables it).
    #[error("upperbound_guess must be in [0, 1], got {0}")]
    InvalidUpperboundGuess(f32),
    /// Configuration file i/o failed.
    #[error("configuration file i/o failed")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid JSON for this schema.
    #[error("configuration file is malformed")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Config
// =============================================================================

/// Configuration of the branch-and-bound search.
///
/// All running searches within a process may share one instance by reference;
/// it is immutable after construction.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(derive(Clone, Debug), finish_fn(vis = "", name = __build_internal))]
#[serde(default)]
pub struct Config {
    /// Penalty incurred for each leaf in the model. Default: 0.05.
    #[builder(default = 0.05)]
    pub regularization: f32,

    /// Cap on the root upper bound, for pruning with a greedy warm start.
    /// `0` disables the cap. Default: 0.
    #[builder(default = 0.0)]
    #[serde(rename = "upperbound")]
    pub upperbound_guess: f32,

    /// Maximum runtime in seconds. `0` means unlimited. Default: 0.
    #[builder(default = 0)]
    pub time_limit: u64,

    /// Number of worker threads. `0` falls back to single-threaded execution.
    /// Default: 1.
    #[builder(default = 1)]
    pub worker_limit: usize,

    /// Maximum number of optimal models to extract. `0` extracts nothing.
    /// Default: 1.
    #[builder(default = 1)]
    pub model_limit: usize,

    /// Print periodic progress to standard output. Default: false.
    #[builder(default = false)]
    pub verbose: bool,

    /// Print a graph walk when the search ends without converging.
    /// Default: false.
    #[builder(default = false)]
    pub diagnostics: bool,

    /// Maximum tree depth, counting a lone root leaf as depth 1. `0` means
    /// unlimited. Default: 0.
    #[builder(default = 0)]
    pub depth_budget: u8,

    /// Use reference predictions to tighten lower bounds. Default: false.
    #[builder(default = false)]
    #[serde(rename = "reference_LB")]
    pub reference_lb: bool,

    /// One-step look-ahead bound via scopes. Default: true.
    #[builder(default = true)]
    pub look_ahead: bool,

    /// Similar-support bound via the feature distance index. Default: true.
    #[builder(default = true)]
    pub similar_support: bool,

    /// Collapse provably dead subproblems. Default: true.
    #[builder(default = true)]
    pub cancellation: bool,

    /// Deduplicate equivalent subproblems by capture set. Default: true.
    #[builder(default = true)]
    pub feature_transform: bool,

    /// Restrict models to rule-list topology. Default: false.
    #[builder(default = false)]
    pub rule_list: bool,

    /// Reserved for non-binary split encodings. Default: false.
    #[builder(default = false)]
    pub non_binary: bool,

    /// Path to a directory used to store traces. Empty disables. Accepted for
    /// compatibility; no trace sink is wired up.
    #[builder(default = String::new())]
    pub trace: String,

    /// Path to a directory used to store tree traces. Empty disables.
    /// Accepted for compatibility; no sink is wired up.
    #[builder(default = String::new())]
    pub tree: String,

    /// Path to a CSV file receiving per-tick runtime statistics. Empty
    /// disables. Default: empty.
    #[builder(default = String::new())]
    pub profile: String,
}

impl<S: config_builder::IsComplete> ConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `regularization` is negative or not
    /// finite, or when `upperbound_guess` lies outside `[0, 1]`.
    pub fn build(self) -> Result<Config, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.regularization.is_finite() || self.regularization < 0.0 {
            return Err(ConfigError::InvalidRegularization(self.regularization));
        }
        if !self.upperbound_guess.is_finite()
            || !(0.0..=1.0).contains(&self.upperbound_guess)
        {
            return Err(ConfigError::InvalidUpperboundGuess(self.upperbound_guess));
        }
        Ok(())
    }

    /// Worker count actually used by the driver: `worker_limit == 0` falls
    /// back to one thread.
    #[inline]
    pub fn workers(&self) -> usize {
        self.worker_limit.max(1)
    }

    /// Whether solutions are depth-constrained.
    #[inline]
    pub fn has_depth_budget(&self) -> bool {
        self.depth_budget != 0
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build().expect("default config is valid")
    }
}

// =============================================================================
// Tests
// =============================================================================
