//! Search state and message dispatch.
//!
//! One [`Optimizer`] is shared by reference across all workers. Workers call
//! [`Optimizer::iterate`] in a loop: pop a message, dispatch it against the
//! graph, and report whether the search is still active. Worker 0 doubles as
//! the coordinator: it advances the tick counter, refreshes the shared
//! `active` flag, and feeds the progress logger and profile sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::bits::BitSet;
use crate::config::Config;
use crate::data::Dataset;
use crate::logger::{ProfileSink, SearchLogger};
use crate::search::graph::{EdgeState, Graph, SplitBound};
use crate::search::local::LocalState;
use crate::search::message::Message;
use crate::search::queue::MessageQueue;
use crate::search::task::Task;
use crate::search::{lock, SearchError};

const EPS: f32 = f32::EPSILON;

/// Iterations between periodic completion checks on worker 0.
const TICK_DURATION: u64 = 10_000;

/// Pack an objective interval into one atomic word so readers always observe
/// a consistent pair.
#[inline]
fn pack_boundary(lower: f32, upper: f32) -> u64 {
    ((lower.to_bits() as u64) << 32) | upper.to_bits() as u64
}

#[inline]
fn unpack_boundary(packed: u64) -> (f32, f32) {
    (
        f32::from_bits((packed >> 32) as u32),
        f32::from_bits(packed as u32),
    )
}

/// Shared state of one optimization run.
pub struct Optimizer<'a> {
    pub(crate) config: &'a Config,
    pub(crate) dataset: &'a Dataset,
    pub(crate) graph: Graph,
    pub(crate) queue: MessageQueue,

    start: Instant,
    ticks: AtomicU64,
    active: AtomicBool,

    /// Packed `(global_lowerbound, global_upperbound)`.
    boundary: AtomicU64,
    /// Capture set of the root subproblem, once explored.
    pub(crate) root: Mutex<Option<BitSet>>,

    explore: AtomicU64,
    exploit: AtomicU64,

    logger: SearchLogger,
    profile: Mutex<Option<ProfileSink>>,
}

impl<'a> Optimizer<'a> {
    pub fn new(config: &'a Config, dataset: &'a Dataset) -> Self {
        Self {
            config,
            dataset,
            graph: Graph::new(),
            queue: MessageQueue::new(),
            start: Instant::now(),
            ticks: AtomicU64::new(0),
            active: AtomicBool::new(true),
            boundary: AtomicU64::new(pack_boundary(f32::MIN, f32::MAX)),
            root: Mutex::new(None),
            explore: AtomicU64::new(0),
            exploit: AtomicU64::new(0),
            logger: SearchLogger::new(config.verbose.into()),
            profile: Mutex::new(None),
        }
    }

    /// Seed the queue with the root exploration message and start the clock.
    pub fn initialize(&mut self) {
        if !self.config.profile.is_empty() {
            match ProfileSink::create(&self.config.profile) {
                Ok(sink) => *lock(&self.profile) = Some(sink),
                Err(error) => eprintln!("[osdt] cannot open profile sink: {error}"),
            }
        }

        let n = self.dataset.n_rows();
        let m = self.dataset.n_features();
        self.queue.push(Message::Exploration {
            sender: BitSet::empty(0),
            capture: BitSet::full(n).with_depth_budget(self.config.depth_budget),
            features: BitSet::full(m),
            feature: 0,
            scope: f32::MAX,
            priority: 0.0,
        });

        self.start = Instant::now();
    }

    /// The certified global objective interval.
    pub fn objective_boundary(&self) -> (f32, f32) {
        unpack_boundary(self.boundary.load(Ordering::Acquire))
    }

    /// The certified global optimality gap.
    pub fn uncertainty(&self) -> f32 {
        let (lower, upper) = self.objective_boundary();
        let value = upper - lower;
        if value < EPS {
            0.0
        } else {
            value
        }
    }

    pub fn complete(&self) -> bool {
        self.uncertainty() == 0.0
    }

    /// Wall time since [`Optimizer::initialize`], in seconds.
    pub fn time_elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn timeout(&self) -> bool {
        self.config.time_limit > 0 && self.time_elapsed() > self.config.time_limit as f64
    }

    /// Number of vertices in the dependency graph.
    pub fn size(&self) -> usize {
        self.graph.size()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Stop all workers at their next iteration boundary.
    pub fn abort(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// One worker iteration: pop and dispatch a message, then (on worker 0)
    /// refresh the shared progress state. Returns whether the search is still
    /// active.
    pub fn iterate(&self, state: &mut LocalState, worker: usize) -> Result<bool, SearchError> {
        let mut global_update = false;
        match self.queue.pop() {
            Some(message) => {
                let counter = if message.is_exploration() {
                    &self.explore
                } else {
                    &self.exploit
                };
                global_update = self.dispatch(message, state)?;
                counter.fetch_add(1, Ordering::Relaxed);
            }
            None => std::thread::yield_now(),
        }

        // Worker 0 manages ticks and the continuation flag for everyone.
        if worker == 0 {
            let ticks = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
            if global_update || self.complete() || ticks % TICK_DURATION == 0 {
                let active = !self.complete()
                    && !self.timeout()
                    && (self.config.worker_limit > 1 || !self.queue.is_empty());
                self.active.store(active, Ordering::Release);
                self.report(ticks);
            }
        }
        Ok(self.active.load(Ordering::Acquire))
    }

    fn report(&self, ticks: u64) {
        let (lower, upper) = self.objective_boundary();
        self.logger.progress(
            self.time_elapsed(),
            lower,
            upper,
            self.graph.size(),
            self.queue.len(),
        );
        let mut profile = lock(&self.profile);
        if let Some(sink) = profile.as_mut() {
            let _ = sink.row(
                ticks,
                self.time_elapsed(),
                lower,
                upper,
                self.graph.size(),
                self.queue.len(),
                self.explore.swap(0, Ordering::Relaxed),
                self.exploit.swap(0, Ordering::Relaxed),
            );
        }
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    fn dispatch(&self, message: Message, state: &mut LocalState) -> Result<bool, SearchError> {
        match message {
            Message::Exploration {
                sender,
                capture,
                features,
                feature,
                scope,
                ..
            } => self.dispatch_exploration(sender, capture, features, feature, scope, state),
            Message::Exploitation {
                recipient,
                features,
                ..
            } => self.dispatch_exploitation(recipient, features, state),
        }
    }

    /// Downward message: construct the subproblem, store it and its split
    /// bounds, link it into the graph, and fan out explorers.
    fn dispatch_exploration(
        &self,
        sender: BitSet,
        capture: BitSet,
        features: BitSet,
        feature: i32,
        scope: f32,
        state: &mut LocalState,
    ) -> Result<bool, SearchError> {
        let is_root = capture.count() == capture.len();

        let mut task = Task::new(
            capture,
            features,
            self.dataset,
            self.config,
            &mut state.column_buffer,
        )?;
        task.scope(scope);
        {
            let LocalState {
                neighbourhood,
                subset_buffer,
                column_buffer,
            } = state;
            task.create_children(
                self.dataset,
                self.config,
                neighbourhood,
                subset_buffer,
                column_buffer,
            )?;
        }

        let key = task.capture_set().clone();
        let (vertex_ref, _inserted) = self.graph.insert_vertex(key, task);
        let mut vertex = lock(&vertex_ref);

        self.store_children(&mut vertex, state);

        let mut global_update = false;
        if is_root {
            let mut root_upperbound = 1.0f32;
            if self.config.upperbound_guess > 0.0 {
                root_upperbound = root_upperbound.min(self.config.upperbound_guess);
            }
            let lower = vertex.lowerbound();
            vertex.update(self.config, lower, root_upperbound, -1);
            *lock(&self.root) = Some(vertex.capture_set().clone());
            global_update = self.update_root(vertex.lowerbound(), vertex.upperbound());
        } else {
            let parents = self.link_to_parent(
                &sender,
                feature,
                scope,
                vertex.capture_set().clone(),
                vertex.order().to_vec(),
            );
            self.signal_exploiters(&parents, &vertex);
        }

        if self.config.reference_lb || scope >= vertex.upperscope() {
            self.send_explorers(&mut vertex, scope, state);
        }

        Ok(global_update)
    }

    /// Upward message: re-read the signalled children, tighten this vertex,
    /// and propagate further up.
    fn dispatch_exploitation(
        &self,
        recipient: BitSet,
        features: BitSet,
        state: &mut LocalState,
    ) -> Result<bool, SearchError> {
        let Some(vertex_ref) = self.graph.vertex(&recipient) else {
            return Ok(false);
        };
        let mut vertex = lock(&vertex_ref);

        if vertex.uncertainty() == 0.0
            || (!self.config.reference_lb && vertex.lowerbound() >= vertex.upperscope() - EPS)
        {
            return Ok(false);
        }

        self.load_children(&mut vertex, &features, state);

        let is_root = vertex.capture_set().count() == vertex.capture_set().len();
        if is_root {
            Ok(self.update_root(vertex.lowerbound(), vertex.upperbound()))
        } else {
            if let Some(parents) = self.graph.edges(&recipient) {
                self.signal_exploiters(&parents, &vertex);
            }
            Ok(false)
        }
    }

    // =========================================================================
    // Bound propagation
    // =========================================================================

    /// The induced bound interval of splitting on one feature, given its two
    /// child tasks.
    fn split_bounds(&self, left: &Task, right: &Task) -> (f32, f32) {
        if self.config.rule_list {
            // One side of a rule-list split must stay a leaf.
            let lower = (left.lowerbound() + right.base_objective())
                .min(left.base_objective() + right.lowerbound());
            let upper = (left.upperbound() + right.base_objective())
                .min(left.base_objective() + right.upperbound());
            (lower, upper)
        } else {
            (
                left.lowerbound() + right.lowerbound(),
                left.upperbound() + right.upperbound(),
            )
        }
    }

    /// First-time registration of a vertex's per-feature split bounds, in
    /// feature order. Also folds the bounds into the task.
    fn store_children(&self, task: &mut Task, state: &mut LocalState) {
        let (bounds_ref, created) = self.graph.insert_bounds(task.capture_set().clone());
        if !created {
            return;
        }
        let mut bounds = lock(&bounds_ref);

        let mut lower = task.base_objective();
        let mut upper = task.base_objective();
        let mut optimal_feature = -1i32;

        let live: Vec<usize> = task.feature_set().iter_set().collect();
        for feature in live {
            if !self.config.feature_transform {
                // Without capture-set deduplication, refresh the locally
                // built children from any stored equivalents.
                for k in 0..2 {
                    let slot = 2 * feature + k;
                    let stored = state.neighbourhood[slot]
                        .as_ref()
                        .and_then(|child| self.graph.vertex(child.capture_set()));
                    if let Some(stored) = stored {
                        state.neighbourhood[slot] = Some(lock(&stored).clone());
                    }
                }
            }

            let (Some(left), Some(right)) = (
                state.neighbourhood[2 * feature].as_ref(),
                state.neighbourhood[2 * feature + 1].as_ref(),
            ) else {
                continue;
            };

            let (split_lower, split_upper) = self.split_bounds(left, right);
            bounds.push(SplitBound {
                feature,
                lower: split_lower,
                upper: split_upper,
            });
            if split_lower > task.upperscope() {
                continue;
            }
            if split_upper < upper {
                optimal_feature = feature as i32;
            }
            lower = lower.min(split_lower);
            upper = upper.min(split_upper);
        }
        drop(bounds);
        task.update(self.config, lower, upper, optimal_feature);
    }

    /// Refresh the split bounds of the signalled features from the stored
    /// children, apply the similar-support tightening, and fold the result
    /// into the task. Returns whether the task's bounds moved.
    fn load_children(&self, task: &mut Task, signals: &BitSet, state: &mut LocalState) -> bool {
        let Some(bounds_ref) = self.graph.bounds(task.capture_set()) else {
            return false;
        };
        let mut bounds = lock(&bounds_ref);

        let mut lower = task.base_objective();
        let mut upper = task.base_objective();
        let mut optimal_feature = -1i32;

        for index in 0..bounds.len() {
            let feature = bounds[index].feature;

            if signals.get(feature) {
                // An update is pending: re-read both children.
                let mut ready = true;
                for k in 0..2 {
                    let signed = if k == 0 {
                        -(feature as i32 + 1)
                    } else {
                        feature as i32 + 1
                    };
                    let child = self
                        .graph
                        .child(&(task.capture_set().clone(), signed))
                        .and_then(|child_key| self.graph.vertex(&child_key));
                    match child {
                        Some(child_ref) => {
                            state.neighbourhood[2 * feature + k] = Some(lock(&child_ref).clone());
                        }
                        None => ready = false,
                    }
                }
                if ready {
                    if let (Some(left), Some(right)) = (
                        state.neighbourhood[2 * feature].as_ref(),
                        state.neighbourhood[2 * feature + 1].as_ref(),
                    ) {
                        let (split_lower, split_upper) = self.split_bounds(left, right);
                        bounds[index].lower = split_lower;
                        bounds[index].upper = split_upper;
                    }
                }
            }

            if self.config.similar_support {
                // Tighten against the adjacent features in registration
                // order: two features that split the capture similarly must
                // have similar split bounds.
                if index > 0 {
                    let previous = bounds[index - 1];
                    let distance = self.dataset.distance(
                        task.capture_set(),
                        feature,
                        previous.feature,
                        &mut state.column_buffer,
                    );
                    bounds[index].lower = bounds[index].lower.max(previous.lower - distance);
                    bounds[index].upper = bounds[index].upper.min(previous.upper + distance);
                }
                if index + 1 < bounds.len() {
                    let next = bounds[index + 1];
                    let distance = self.dataset.distance(
                        task.capture_set(),
                        feature,
                        next.feature,
                        &mut state.column_buffer,
                    );
                    bounds[index].lower = bounds[index].lower.max(next.lower - distance);
                    bounds[index].upper = bounds[index].upper.min(next.upper + distance);
                }
            }

            if bounds[index].lower > task.upperscope() {
                continue;
            }
            if bounds[index].upper < upper {
                optimal_feature = feature as i32;
            }
            lower = lower.min(bounds[index].lower);
            upper = upper.min(bounds[index].upper);
        }
        drop(bounds);
        task.update(self.config, lower, upper, optimal_feature)
    }

    /// Register the backward edge from a freshly explored child to the parent
    /// that requested it. Returns the child's edge map for signalling.
    fn link_to_parent(
        &self,
        parent: &BitSet,
        feature: i32,
        scope: f32,
        child: BitSet,
        order: Vec<i32>,
    ) -> Arc<Mutex<HashMap<BitSet, EdgeState>>> {
        let index = feature.unsigned_abs() as usize - 1;
        self.graph
            .insert_translation((parent.clone(), feature), order);
        self.graph.insert_child((parent.clone(), feature), child.clone());

        let edges = self.graph.edges_entry(child);
        {
            let mut map = lock(&edges);
            let state = map
                .entry(parent.clone())
                .or_insert_with(|| EdgeState::new(self.dataset.n_features(), scope));
            state.pending.set(index, true);
            state.scope = state.scope.min(scope);
        }
        edges
    }

    /// Wake the parents whose pending features this vertex can now inform.
    fn signal_exploiters(&self, parents: &Mutex<HashMap<BitSet, EdgeState>>, task: &Task) {
        if task.uncertainty() != 0.0 && task.lowerbound() < task.lowerscope() - EPS {
            return;
        }
        let map = lock(parents);
        for (parent, edge) in map.iter() {
            if edge.pending.is_empty() {
                continue;
            }
            if task.lowerbound() < edge.scope - EPS && task.uncertainty() > 0.0 {
                continue;
            }
            self.queue.push(Message::Exploitation {
                sender: task.capture_set().clone(),
                recipient: parent.clone(),
                features: edge.pending.clone(),
                priority: task.support() - task.lowerbound(),
            });
        }
    }

    // =========================================================================
    // Explorer dispatch
    // =========================================================================

    /// Fan exploration messages out to every child split still worth
    /// visiting under the current exploration boundary.
    fn send_explorers(&self, parent: &mut Task, new_scope: f32, state: &LocalState) {
        if parent.uncertainty() == 0.0 {
            return;
        }
        parent.scope(new_scope);

        let mut boundary = parent.upperbound();
        if self.config.look_ahead {
            boundary = boundary.min(parent.upperscope());
        }

        let live: Vec<usize> = parent.feature_set().iter_set().collect();
        for feature in live {
            let (Some(left), Some(right)) = (
                state.neighbourhood[2 * feature].as_ref(),
                state.neighbourhood[2 * feature + 1].as_ref(),
            ) else {
                continue;
            };
            let (lower, upper) = self.split_bounds(left, right);

            if lower > boundary {
                continue; // Out of scope.
            }
            if upper <= parent.coverage() {
                continue; // Already explored at this coverage.
            }

            let signed = feature as i32 + 1;
            if self.config.rule_list {
                self.send_explorer(parent, left, boundary - right.base_objective(), -signed);
                self.send_explorer(parent, right, boundary - left.base_objective(), signed);
            } else {
                self.send_explorer(
                    parent,
                    left,
                    boundary - right.guaranteed_lowerbound(self.config),
                    -signed,
                );
                self.send_explorer(
                    parent,
                    right,
                    boundary - left.guaranteed_lowerbound(self.config),
                    signed,
                );
            }
        }

        parent.set_coverage(parent.upperscope());
    }

    /// Send one exploration message, unless an equivalent vertex already
    /// covers the requested scope; then just graft a backward edge onto it.
    fn send_explorer(&self, parent: &Task, child: &Task, scope: f32, feature: i32) {
        let key = (parent.capture_set().clone(), feature);
        if let Some(existing) = self.graph.child(&key) {
            if let Some(vertex_ref) = self.graph.vertex(&existing) {
                let mut vertex = lock(&vertex_ref);
                if scope < vertex.upperscope() {
                    let edges = self.graph.edges_entry(vertex.capture_set().clone());
                    {
                        let mut map = lock(&edges);
                        let state = map.entry(parent.capture_set().clone()).or_insert_with(|| {
                            EdgeState::new(self.dataset.n_features(), scope)
                        });
                        state
                            .pending
                            .set(feature.unsigned_abs() as usize - 1, true);
                        state.scope = state.scope.min(scope);
                    }
                    vertex.scope(scope);
                    return;
                }
            }
        }
        self.queue.push(Message::Exploration {
            sender: parent.capture_set().clone(),
            capture: child.capture_set().clone(),
            features: parent.feature_set().clone(),
            feature,
            scope,
            priority: parent.support() - parent.lowerbound(),
        });
    }

    // =========================================================================
    // Root boundary
    // =========================================================================

    /// Publish the root's bound interval as the global objective boundary.
    /// Returns whether the published interval changed.
    fn update_root(&self, lower: f32, upper: f32) -> bool {
        let (current_lower, current_upper) = self.objective_boundary();
        let change = lower != current_lower || upper != current_upper;
        self.boundary
            .store(pack_boundary(lower.min(upper), upper), Ordering::Release);
        change
    }
}

// =============================================================================
// Tests
// =============================================================================
