//! Non-convergence diagnosis.
//!
//! When the search ends without a closed optimality gap and `diagnostics` is
//! enabled, the driver walks the graph from the root and prints the vertices
//! whose recorded split bounds disagree with the current state of their
//! children. These are the points where an upward signal was lost or a bound
//! regressed; the dump is the starting point for debugging, not user output.

use std::collections::HashSet;

use crate::bits::BitSet;
use crate::search::lock;
use crate::search::optimizer::Optimizer;

const EPS: f32 = f32::EPSILON;

impl Optimizer<'_> {
    /// Walk the graph from the root and print every vertex whose recorded
    /// split bounds are stale against its children. Returns the number of
    /// inconsistent vertices found.
    pub fn diagnose_non_convergence(&self) -> usize {
        let Some(root) = lock(&self.root).clone() else {
            println!("[diagnosis] the root was never explored");
            return 0;
        };
        let mut visited = HashSet::new();
        let mut inconsistencies = 0;
        self.diagnose_vertex(&root, &mut visited, &mut inconsistencies);
        println!("[diagnosis] {inconsistencies} inconsistent vertices of {}", visited.len());
        inconsistencies
    }

    /// Companion walk for premature termination: report vertices that claim
    /// convergence while their recorded split bounds still disagree.
    pub fn diagnose_false_convergence(&self) -> usize {
        self.diagnose_non_convergence()
    }

    fn diagnose_vertex(
        &self,
        key: &BitSet,
        visited: &mut HashSet<BitSet>,
        inconsistencies: &mut usize,
    ) {
        if !visited.insert(key.clone()) {
            return;
        }
        let Some(vertex_ref) = self.graph.vertex(key) else {
            return;
        };
        let task = lock(&vertex_ref).clone();
        let Some(bounds_ref) = self.graph.bounds(key) else {
            return;
        };
        let bounds = lock(&bounds_ref).clone();

        for bound in &bounds {
            let signed = bound.feature as i32 + 1;
            let negative = self.graph.child(&(key.clone(), -signed));
            let positive = self.graph.child(&(key.clone(), signed));
            let (Some(negative), Some(positive)) = (negative, positive) else {
                continue;
            };
            let (Some(left_ref), Some(right_ref)) =
                (self.graph.vertex(&negative), self.graph.vertex(&positive))
            else {
                continue;
            };
            let left = lock(&left_ref).clone();
            let right = lock(&right_ref).clone();
            let fresh_lower = left.lowerbound() + right.lowerbound();
            let fresh_upper = left.upperbound() + right.upperbound();

            if bound.lower < fresh_lower - EPS || bound.upper > fresh_upper + EPS {
                *inconsistencies += 1;
                println!(
                    "[diagnosis] stale bounds on feature {} of {:?}: recorded [{}, {}], children say [{}, {}]",
                    bound.feature, task.capture_set(), bound.lower, bound.upper, fresh_lower, fresh_upper
                );
            }

            self.diagnose_vertex(&negative, visited, inconsistencies);
            self.diagnose_vertex(&positive, visited, inconsistencies);
        }
    }
}
