//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, derived
//! nodes and effects. It owns the dependency graph and drives the two
//! propagation phases.
//!
//! # How It Works
//!
//! 1. When a cell, derived node or effect is created, it registers with the
//!    runtime and receives a `NodeId`.
//!
//! 2. When a derived node or effect runs, the reactive context records what
//!    it reads; the runtime swaps those reads in as its upstream edges.
//!
//! 3. When a cell's value changes, the runtime:
//!    a. Runs the mark phase on the scheduler
//!    b. Queues reachable effects
//!    c. Unless a batch is open or a computation is running, settles:
//!       each queued effect is refreshed, which pulls every derived node
//!       it reads up to date first
//!    d. Derived nodes nobody reads stay dirty
//!
//! # Threading
//!
//! There is one runtime per thread and handles are `!Send`, so the whole
//! graph is only ever touched from the thread that built it.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use tracing::{debug, trace, warn};

use crate::config::RuntimeConfig;
use crate::error::{ReactiveError, Result};
use crate::graph::{Body, GraphSnapshot, NodeId, NodeKind, NodeState, UpdateScheduler};

use super::context::ReactiveContext;

/// Something the runtime can re-run: a derived node or an effect.
pub trait Computation {
    /// Run the body once.
    ///
    /// Returns whether the node's observable value changed. Effects always
    /// return `Ok(false)` unless the body failed.
    fn run(&self) -> Result<bool>;

    /// Called once when the node is explicitly disposed.
    fn dispose(&self) {}
}

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// The per-thread reactive runtime.
pub struct Runtime {
    scheduler: RefCell<UpdateScheduler>,

    /// Nodes whose handles dropped while the scheduler was borrowed.
    graveyard: RefCell<Vec<NodeId>>,

    /// Maybe-dirty nodes whose inputs are being checked right now.
    checking: RefCell<Vec<NodeId>>,

    batch_depth: Cell<usize>,
    settling: Cell<bool>,
    config: RefCell<RuntimeConfig>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            scheduler: RefCell::new(UpdateScheduler::new()),
            graveyard: RefCell::new(Vec::new()),
            checking: RefCell::new(Vec::new()),
            batch_depth: Cell::new(0),
            settling: Cell::new(false),
            config: RefCell::new(RuntimeConfig::default()),
        }
    }

    pub(crate) fn with<R>(f: impl FnOnce(&Runtime) -> R) -> R {
        RUNTIME.with(f)
    }

    /// Replace this thread's configuration.
    pub fn configure(config: RuntimeConfig) {
        Self::with(|rt| *rt.config.borrow_mut() = config);
    }

    /// Inspect this thread's configuration.
    pub fn with_config<R>(f: impl FnOnce(&RuntimeConfig) -> R) -> R {
        Self::with(|rt| f(&rt.config.borrow()))
    }

    /// The current epoch: the number of mark passes so far.
    pub fn epoch() -> u64 {
        Self::with(|rt| rt.scheduler.borrow().epoch())
    }

    /// Number of live nodes in this thread's graph.
    pub fn node_count() -> usize {
        Self::with(|rt| {
            rt.bury_dead();
            rt.scheduler.borrow().node_count()
        })
    }

    /// Number of effects waiting for the next settle pass.
    pub fn pending_effects() -> usize {
        Self::with(|rt| rt.scheduler.borrow().pending_count())
    }

    /// Serializable view of the graph.
    pub fn snapshot() -> GraphSnapshot {
        Self::with(|rt| {
            rt.bury_dead();
            rt.scheduler.borrow().snapshot()
        })
    }

    /// Check if reads are currently being recorded.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register a node. `build` receives the new id and returns the body
    /// the arena should hold plus whatever the caller wants back.
    pub(crate) fn register<R>(
        &self,
        kind: NodeKind,
        build: impl FnOnce(NodeId) -> (Body, R),
    ) -> (NodeId, R) {
        let (id, out) = self.scheduler.borrow_mut().insert_with(kind, build);
        trace!(node = ?id, ?kind, "node registered");
        (id, out)
    }

    /// Remove a node whose last handle was dropped or that was disposed.
    ///
    /// Safe to call from `Drop`: if the runtime is gone nothing happens, and
    /// if the arena is busy the removal is deferred.
    pub(crate) fn release(id: NodeId) {
        let _ = RUNTIME.try_with(|rt| {
            let removed = match rt.scheduler.try_borrow_mut() {
                Ok(mut scheduler) => scheduler.remove(id),
                Err(_) => {
                    rt.graveyard.borrow_mut().push(id);
                    None
                }
            };
            drop(removed);
        });
    }

    fn bury_dead(&self) {
        let dead = std::mem::take(&mut *self.graveyard.borrow_mut());
        if dead.is_empty() {
            return;
        }
        let removed: Vec<_> = {
            let mut scheduler = self.scheduler.borrow_mut();
            dead.into_iter().filter_map(|id| scheduler.remove(id)).collect()
        };
        drop(removed);
    }

    pub(crate) fn state(&self, id: NodeId) -> Option<NodeState> {
        self.scheduler.borrow().state(id)
    }

    pub(crate) fn upstream_count(&self, id: NodeId) -> usize {
        self.scheduler.borrow().upstream_count(id)
    }

    pub(crate) fn dependent_count(&self, id: NodeId) -> usize {
        self.scheduler.borrow().dependent_count(id)
    }

    fn set_state(&self, id: NodeId, state: NodeState) {
        self.scheduler.borrow_mut().set_state(id, state);
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Everything a tracked read of a derived node does before handing out
    /// the cached value: cycle check, edge registration, refresh.
    pub(crate) fn prepare_read(&self, id: NodeId) -> Result<()> {
        if ReactiveContext::contains(id) {
            return Err(cycle_at(id));
        }

        let outcome = self.refresh(id);
        // Recording a read that closed a cycle through the reader would
        // leave the cycle in the graph even if the reader recovers.
        let closes_cycle = matches!(
            &outcome,
            Err(ReactiveError::CyclicDependency { node, .. }) if self.on_read_path(*node)
        );
        if !closes_cycle {
            ReactiveContext::track_dependency(id);
        }
        outcome
    }

    /// Whether `id` is computing or having its inputs checked.
    fn on_read_path(&self, id: NodeId) -> bool {
        ReactiveContext::contains(id) || self.checking.borrow().contains(&id)
    }

    /// Bring `id` up to date.
    ///
    /// Clean nodes return immediately. Maybe-dirty nodes refresh their
    /// derived inputs in read order and only recompute if one of them
    /// changed. Dirty nodes recompute.
    pub(crate) fn refresh(&self, id: NodeId) -> Result<()> {
        let (state, upstream) = {
            let scheduler = self.scheduler.borrow();
            match scheduler.get(id) {
                Some(node) => (node.state(), node.upstream().clone()),
                None => return Err(ReactiveError::StaleReadAfterDispose { node: id }),
            }
        };

        match state {
            NodeState::Clean => return Ok(()),
            _ if self.checking.borrow().contains(&id) => return Err(cycle_at(id)),
            NodeState::Dirty => {}
            NodeState::MaybeDirty => {
                let _checking = CheckGuard::enter(&self.checking, id);
                for source in upstream {
                    let source_kind = self.scheduler.borrow().kind(source);
                    match source_kind {
                        Some(NodeKind::Derived) => {}
                        // Cells are always current.
                        Some(_) => continue,
                        // An input went away; only a rerun can tell whether
                        // it still matters.
                        None => {
                            self.set_state(id, NodeState::Dirty);
                            break;
                        }
                    }

                    // A failing input is handed to this node's own
                    // computation, which may recover from it.
                    if let Err(err) = self.refresh(source) {
                        trace!(node = ?id, input = ?source, error = %err, "input failed");
                        self.set_state(id, NodeState::Dirty);
                        break;
                    }
                    if self.state(id) == Some(NodeState::Dirty) {
                        break;
                    }
                }

                if self.state(id) != Some(NodeState::Dirty) {
                    self.set_state(id, NodeState::Clean);
                    return Ok(());
                }
            }
        }

        self.recompute(id)
    }

    /// Run a node's body inside a fresh reactive context and rebuild its
    /// upstream from what it read.
    fn recompute(&self, id: NodeId) -> Result<()> {
        if ReactiveContext::contains(id) {
            return Err(cycle_at(id));
        }

        let (kind, computation) = {
            let scheduler = self.scheduler.borrow();
            let node = scheduler
                .get(id)
                .ok_or(ReactiveError::StaleReadAfterDispose { node: id })?;
            (node.kind(), node.computation())
        };
        let Some(computation) = computation else {
            return Err(ReactiveError::StaleReadAfterDispose { node: id });
        };

        if kind == NodeKind::Effect {
            // Cleared before the body runs so that writes made by the body
            // can queue it again.
            self.set_state(id, NodeState::Clean);
        }

        let context = ReactiveContext::enter(id, kind);
        let outcome = computation.run();
        let dependencies = context.finish();

        {
            let mut scheduler = self.scheduler.borrow_mut();
            scheduler.set_upstream(id, dependencies);
            match &outcome {
                Ok(changed) => {
                    if kind == NodeKind::Derived {
                        scheduler.set_state(id, NodeState::Clean);
                    }
                    if *changed {
                        scheduler.mark_dependents_dirty(id, ReactiveContext::contains);
                    }
                }
                Err(_) if kind == NodeKind::Derived => {
                    scheduler.set_state(id, NodeState::Dirty);
                }
                Err(_) => {}
            }
        }

        match (kind, outcome) {
            (_, Ok(changed)) => {
                debug!(node = ?id, ?kind, changed, "recomputed");
                Ok(())
            }
            (NodeKind::Effect, Err(err)) => {
                self.report_effect_error(id, err);
                Ok(())
            }
            (_, Err(err)) => {
                debug!(node = ?id, error = %err, "recompute failed");
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Reject writes while any derived node is computing.
    pub(crate) fn check_write(&self, cell: NodeId) -> Result<()> {
        match ReactiveContext::active_derived() {
            Some(active) => Err(ReactiveError::WriteDuringCompute { cell, active }),
            None => Ok(()),
        }
    }

    /// A cell's value changed: mark, then settle if nothing holds it back.
    pub(crate) fn notify_write(&self, cell: NodeId) {
        self.bury_dead();
        let expanded = self.scheduler.borrow_mut().mark_changed(cell);
        trace!(cell = ?cell, expanded, "mark phase done");
        self.flush();
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    /// First run of a freshly registered effect.
    pub(crate) fn run_new_effect(&self, id: NodeId) {
        if let Err(err) = self.recompute(id) {
            self.report_effect_error(id, err);
        }
        self.flush();
    }

    pub(crate) fn dispose_effect(&self, id: NodeId) {
        let removed = self.scheduler.borrow_mut().remove(id);
        if let Some(node) = removed {
            if let Some(computation) = node.computation() {
                computation.dispose();
            }
            debug!(effect = ?id, "effect disposed");
        }
    }

    pub(crate) fn report_effect_error(&self, id: NodeId, err: ReactiveError) {
        let handler = self.config.borrow().effect_error_handler();
        handler(id, &err);
    }

    // ------------------------------------------------------------------
    // Settle
    // ------------------------------------------------------------------

    /// Settle unless a batch is open, a computation is running, or a settle
    /// pass is already draining the queue.
    pub(crate) fn flush(&self) {
        if self.batch_depth.get() > 0 || self.settling.get() || ReactiveContext::depth() > 0 {
            return;
        }
        if self.scheduler.borrow().pending_count() == 0 {
            return;
        }
        self.settle();
    }

    /// Settle phase: run pending effects, first created first, until the
    /// queue is empty. Effects queued by writes made during the pass join
    /// the same pass.
    fn settle(&self) {
        let _guard = SettleGuard::enter(&self.settling);
        let max_runs = self.config.borrow().max_effect_reruns();
        let mut runs: HashMap<NodeId, usize> = HashMap::new();

        loop {
            let next = self.scheduler.borrow_mut().pop_pending();
            let Some(effect) = next else {
                break;
            };

            let count = runs.entry(effect).or_insert(0);
            *count += 1;
            if *count > max_runs {
                warn!(effect = ?effect, runs = max_runs, "effect keeps re-triggering itself");
                self.report_effect_error(
                    effect,
                    ReactiveError::EffectLoop {
                        effect,
                        runs: max_runs,
                    },
                );
                continue;
            }

            if let Err(err) = self.refresh(effect) {
                self.report_effect_error(effect, err);
            }
        }

        debug!(effects = runs.len(), "settle pass done");
    }

    // ------------------------------------------------------------------
    // Batching
    // ------------------------------------------------------------------

    pub(crate) fn open_batch(&self) {
        self.batch_depth.set(self.batch_depth.get() + 1);
    }

    pub(crate) fn close_batch() {
        let _ = RUNTIME.try_with(|rt| {
            rt.batch_depth.set(rt.batch_depth.get().saturating_sub(1));
        });
    }

    pub(crate) fn is_batching(&self) -> bool {
        self.batch_depth.get() > 0
    }
}

fn cycle_at(node: NodeId) -> ReactiveError {
    ReactiveError::CyclicDependency {
        node,
        stack: ReactiveContext::stack(),
    }
}

/// Pops the node off the checking list even if a computation panics.
struct CheckGuard<'a> {
    list: &'a RefCell<Vec<NodeId>>,
}

impl<'a> CheckGuard<'a> {
    fn enter(list: &'a RefCell<Vec<NodeId>>, id: NodeId) -> Self {
        list.borrow_mut().push(id);
        Self { list }
    }
}

impl Drop for CheckGuard<'_> {
    fn drop(&mut self) {
        self.list.borrow_mut().pop();
    }
}

/// Resets the settling flag even if an effect panics.
struct SettleGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> SettleGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self { flag }
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    struct Counter {
        runs: Cell<usize>,
        changed: bool,
    }

    impl Computation for Counter {
        fn run(&self) -> Result<bool> {
            self.runs.set(self.runs.get() + 1);
            Ok(self.changed)
        }
    }

    fn register_derived(rt: &Runtime, changed: bool) -> (NodeId, Rc<Counter>) {
        rt.register(NodeKind::Derived, |_| {
            let counter = Rc::new(Counter {
                runs: Cell::new(0),
                changed,
            });
            let weak: std::rc::Weak<dyn Computation> = Rc::downgrade(&counter) as std::rc::Weak<Counter>;
            (Body::Derived(weak), counter)
        })
    }

    #[test]
    fn runtime_registers_and_releases() {
        Runtime::with(|rt| {
            let (id, _) = rt.register(NodeKind::Source, |_| (Body::Source, ()));
            assert!(rt.state(id).is_some());

            Runtime::release(id);
            assert!(rt.state(id).is_none());
        });
    }

    #[test]
    fn refresh_recomputes_dirty_node_once() {
        Runtime::with(|rt| {
            let (id, counter) = register_derived(rt, true);

            rt.refresh(id).unwrap();
            rt.refresh(id).unwrap();
            assert_eq!(counter.runs.get(), 1);
            assert_eq!(rt.state(id), Some(NodeState::Clean));
        });
    }

    #[test]
    fn refresh_of_dead_node_is_stale() {
        Runtime::with(|rt| {
            let (id, counter) = register_derived(rt, true);
            drop(counter);

            assert!(matches!(
                rt.refresh(id),
                Err(ReactiveError::StaleReadAfterDispose { .. })
            ));
        });
    }

    #[test]
    fn write_is_rejected_inside_derived_context() {
        Runtime::with(|rt| {
            let (cell, _) = rt.register(NodeKind::Source, |_| (Body::Source, ()));
            let (derived, _counter) = register_derived(rt, true);

            assert!(rt.check_write(cell).is_ok());

            let _ctx = ReactiveContext::enter(derived, NodeKind::Derived);
            assert!(matches!(
                rt.check_write(cell),
                Err(ReactiveError::WriteDuringCompute { active, .. }) if active == derived
            ));
        });
    }

    #[test]
    fn batch_depth_nests() {
        Runtime::with(|rt| {
            rt.open_batch();
            rt.open_batch();
            Runtime::close_batch();
            assert!(rt.is_batching());
            Runtime::close_batch();
            assert!(!rt.is_batching());
        });
    }

    #[test]
    fn pending_effects_counts_deferred_runs() {
        use crate::reactive::{batch, Cell, Effect};

        let cell = Cell::new(0);
        let reader = cell.clone();
        let _effect = Effect::new(move || {
            reader.read();
            Ok(None)
        });
        assert_eq!(Runtime::pending_effects(), 0);

        batch(|| {
            cell.write(1).unwrap();
            cell.write(2).unwrap();
            assert_eq!(Runtime::pending_effects(), 1);
        });
        assert_eq!(Runtime::pending_effects(), 0);
    }

    #[test]
    fn tracking_is_only_active_inside_a_computation() {
        use crate::reactive::{untrack, Effect};

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _effect = Effect::new(move || {
            sink.borrow_mut().push(Runtime::is_tracking());
            sink.borrow_mut().push(untrack(Runtime::is_tracking));
            Ok(None)
        });

        assert!(!Runtime::is_tracking());
        assert_eq!(*seen.borrow(), vec![true, false]);
    }

    #[test]
    fn configuration_is_per_thread_and_replaceable() {
        let default = Runtime::with_config(|config| config.max_effect_reruns());

        Runtime::configure(RuntimeConfig::default().with_max_effect_reruns(7));
        assert_eq!(Runtime::with_config(|config| config.max_effect_reruns()), 7);

        let other = std::thread::spawn(|| Runtime::with_config(|config| config.max_effect_reruns()))
            .join()
            .unwrap();
        assert_eq!(other, default);

        Runtime::configure(RuntimeConfig::default());
        assert_eq!(Runtime::with_config(|config| config.max_effect_reruns()), default);
    }
}
