//! Top-level driver: spawn workers, run the search, classify the outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::config::Config;
use crate::data::Dataset;
use crate::logger::SearchLogger;
use crate::model::render_models;
use crate::search::{lock, LocalState, Optimizer, SearchError};

// =============================================================================
// Status & FitResult
// =============================================================================

/// Terminal state of one optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Bounds met and at least one model extracted.
    Converged,
    /// The gap stayed open because time ran out or work was left queued.
    Timeout,
    /// The gap stayed open with an idle queue, or a worker failed.
    NonConvergence,
    /// Bounds met but no model could be extracted.
    FalseConvergence,
    /// The search never ran.
    Uninitialized,
}

/// Outcome of [`fit`]: the extracted models plus run statistics.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// JSON array of extracted trees; empty on failure.
    pub model: String,
    /// Number of subproblems in the dependency graph.
    pub graph_size: u64,
    /// Total worker iterations.
    pub n_iterations: u64,
    /// Certified objective lower bound.
    pub lower_bound: f64,
    /// Certified objective upper bound.
    pub upper_bound: f64,
    /// Training loss of the first extracted model.
    pub model_loss: f64,
    /// Wall time of the search in seconds.
    pub time_elapsed: f64,
    pub status: Status,
}

impl Default for FitResult {
    fn default() -> Self {
        Self {
            model: String::new(),
            graph_size: 0,
            n_iterations: 0,
            lower_bound: 0.0,
            upper_bound: 1.0,
            model_loss: 0.0,
            time_elapsed: 0.0,
            status: Status::Uninitialized,
        }
    }
}

/// Pure outcome classification, split out so every branch is testable
/// without driving a real search into it.
pub(crate) fn classify_status(
    lower_bound: f64,
    upper_bound: f64,
    timed_out: bool,
    queue_nonempty: bool,
    has_models: bool,
    model_limit: usize,
) -> Status {
    if lower_bound != upper_bound {
        if timed_out || queue_nonempty {
            Status::Timeout
        } else {
            Status::NonConvergence
        }
    } else if !has_models && model_limit != 0 {
        Status::FalseConvergence
    } else {
        Status::Converged
    }
}

// =============================================================================
// fit
// =============================================================================

/// Run the full optimization: seed the root problem, drive `worker_limit`
/// workers until completion or timeout, then extract models and classify the
/// terminal status.
pub fn fit(dataset: &Dataset, config: &Config) -> FitResult {
    let logger = SearchLogger::new(config.verbose.into());
    logger.status("starting optimization");

    let mut optimizer = Optimizer::new(config, dataset);
    optimizer.initialize();
    let optimizer = &optimizer;

    let iterations = AtomicU64::new(0);
    let failure: Mutex<Option<SearchError>> = Mutex::new(None);

    let worker_loop = |worker: usize| {
        let mut state = LocalState::new(dataset.n_rows(), dataset.n_features());
        loop {
            match optimizer.iterate(&mut state, worker) {
                Ok(true) => {
                    iterations.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false) => break,
                Err(error) => {
                    *lock(&failure) = Some(error);
                    optimizer.abort();
                    break;
                }
            }
        }
    };

    let workers = config.workers();
    if workers > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .expect("failed to create thread pool");
        pool.broadcast(|context| worker_loop(context.index()));
    } else {
        worker_loop(0);
    }

    let mut result = FitResult {
        time_elapsed: optimizer.time_elapsed(),
        graph_size: optimizer.size() as u64,
        n_iterations: iterations.load(Ordering::Relaxed),
        ..FitResult::default()
    };
    let (lower, upper) = optimizer.objective_boundary();
    result.lower_bound = lower as f64;
    result.upper_bound = upper as f64;

    if let Some(error) = lock(&failure).take() {
        // A failed worker leaves partial bounds and no model.
        eprintln!("[osdt] worker failed: {error}");
        result.status = Status::NonConvergence;
        return result;
    }

    logger.status(&format!(
        "optimization complete: {:.3}s, {} iterations, graph size {}, objective [{}, {}]",
        result.time_elapsed, result.n_iterations, result.graph_size, lower, upper,
    ));

    let timed_out = optimizer.timeout();
    let queue_nonempty = optimizer.queue_len() > 0;
    let models = optimizer.models();
    result.status = classify_status(
        result.lower_bound,
        result.upper_bound,
        timed_out,
        queue_nonempty,
        !models.is_empty(),
        config.model_limit,
    );

    if config.diagnostics
        && matches!(result.status, Status::NonConvergence | Status::FalseConvergence)
    {
        optimizer.diagnose_non_convergence();
    }

    if let Some(first) = models.first() {
        result.model_loss = first.loss() as f64;
        result.model = render_models(&models);
        logger.status(&format!(
            "models extracted: {}, loss {}, complexity {}",
            models.len(),
            first.loss(),
            first.complexity(),
        ));
    }

    result
}

// =============================================================================
// Tests
// =============================================================================
