//! The shared dependency graph of subproblems.
//!
//! Five sharded concurrent maps, all keyed by capture sets (or capture set
//! plus signed feature). Values that workers mutate in place are wrapped in
//! `Arc<Mutex<_>>`: a lookup clones the handle and releases the map shard
//! immediately, so an exclusive accessor is a lock on one entry and disjoint
//! keys never contend.
//!
//! Lock order is parent before child. Vertex locks are only ever nested from
//! a capture set to one of its strict subsets, which the split semantics
//! guarantee is acyclic; bounds and edge locks nest inside the owning vertex
//! lock and take no further locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::bits::BitSet;
use crate::search::task::Task;

/// Exclusive handle on a stored task.
pub type VertexRef = Arc<Mutex<Task>>;

/// Split bounds recorded for one feature of a vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitBound {
    pub feature: usize,
    pub lower: f32,
    pub upper: f32,
}

/// Backward edge payload: which features of the parent wait on this child,
/// and the tightest scope the parent asked for.
#[derive(Debug, Clone)]
pub struct EdgeState {
    pub pending: BitSet,
    pub scope: f32,
}

impl EdgeState {
    pub fn new(n_features: usize, scope: f32) -> Self {
        Self {
            pending: BitSet::empty(n_features),
            scope,
        }
    }
}

/// Signed-feature child key: negative feature means "feature is false".
pub type ChildKey = (BitSet, i32);

/// Concurrent store of every discovered subproblem and the relations between
/// them.
#[derive(Debug, Default)]
pub struct Graph {
    /// capture set -> subproblem state.
    vertices: DashMap<BitSet, VertexRef>,
    /// capture set -> per-feature split bounds, in feature order.
    bounds: DashMap<BitSet, Arc<Mutex<Vec<SplitBound>>>>,
    /// (parent capture, signed feature) -> child capture.
    children: DashMap<ChildKey, BitSet>,
    /// child capture -> parent capture -> edge state.
    edges: DashMap<BitSet, Arc<Mutex<HashMap<BitSet, EdgeState>>>>,
    /// (parent capture, signed feature) -> feature reorder record.
    translations: DashMap<ChildKey, Vec<i32>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored vertices.
    pub fn size(&self) -> usize {
        self.vertices.len()
    }

    /// Insert a task unless the key is already present. Returns the stored
    /// handle and whether an insertion happened.
    pub fn insert_vertex(&self, key: BitSet, task: Task) -> (VertexRef, bool) {
        match self.vertices.entry(key) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => (entry.insert(Arc::new(Mutex::new(task))).clone(), true),
        }
    }

    pub fn vertex(&self, key: &BitSet) -> Option<VertexRef> {
        self.vertices.get(key).map(|entry| entry.value().clone())
    }

    /// Get-or-create the bounds list of a vertex. Returns the handle and
    /// whether this call created it.
    pub fn insert_bounds(&self, key: BitSet) -> (Arc<Mutex<Vec<SplitBound>>>, bool) {
        match self.bounds.entry(key) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => (entry.insert(Arc::default()).clone(), true),
        }
    }

    pub fn bounds(&self, key: &BitSet) -> Option<Arc<Mutex<Vec<SplitBound>>>> {
        self.bounds.get(key).map(|entry| entry.value().clone())
    }

    /// Record a parent-to-child link. The first writer wins; the child of a
    /// (parent, feature) pair never changes.
    pub fn insert_child(&self, key: ChildKey, child: BitSet) {
        self.children.entry(key).or_insert(child);
    }

    pub fn child(&self, key: &ChildKey) -> Option<BitSet> {
        self.children.get(key).map(|entry| entry.value().clone())
    }

    /// Record a feature reorder for a link. First writer wins.
    pub fn insert_translation(&self, key: ChildKey, order: Vec<i32>) {
        self.translations.entry(key).or_insert(order);
    }

    pub fn translation(&self, key: &ChildKey) -> Option<Vec<i32>> {
        self.translations.get(key).map(|entry| entry.value().clone())
    }

    /// Get-or-create the backward edge map of a child.
    pub fn edges_entry(&self, child: BitSet) -> Arc<Mutex<HashMap<BitSet, EdgeState>>> {
        self.edges.entry(child).or_default().clone()
    }

    pub fn edges(&self, child: &BitSet) -> Option<Arc<Mutex<HashMap<BitSet, EdgeState>>>> {
        self.edges.get(child).map(|entry| entry.value().clone())
    }
}
