//! The concurrent branch-and-bound search.
//!
//! Subproblems ([`Task`]) keyed by their capture sets live in a shared
//! dependency [`Graph`]; workers drain a priority [`MessageQueue`] of
//! exploration (downward) and exploitation (upward) messages, each of which
//! mutates the graph and may enqueue more messages. The [`Optimizer`] owns
//! the shared state and implements message dispatch; model extraction walks
//! the converged graph.

mod diagnostics;
mod extract;
mod graph;
mod local;
mod message;
mod optimizer;
mod queue;
mod task;

pub use graph::{EdgeState, Graph, SplitBound};
pub use local::LocalState;
pub use message::Message;
pub use optimizer::Optimizer;
pub use queue::MessageQueue;
pub use task::Task;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Fatal search-side failures. A worker that hits one unwinds; the others
/// observe the shared abort flag and stop at the next iteration boundary.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SearchError {
    /// A bound invariant was violated (lower bound above upper bound).
    #[error("integrity violation in {context}: {reason}")]
    IntegrityViolation {
        context: &'static str,
        reason: String,
    },
}

/// Lock a mutex, recovering the data if a failed worker poisoned it. The
/// guarded structures stay internally consistent because every writer
/// re-establishes its invariants before the guard drops.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
