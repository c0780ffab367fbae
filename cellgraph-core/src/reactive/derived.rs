//! Derived Node Implementation
//!
//! A derived node is a cached value computed from other reactive values.
//!
//! # How Derived Nodes Work
//!
//! 1. Nothing runs at creation. The first read computes and caches.
//!
//! 2. While clean, reads return the cached value.
//!
//! 3. A write upstream marks the node dirty (direct input) or maybe-dirty
//!    (something further up).
//!
//! 4. On next read, a maybe-dirty node first refreshes its derived inputs.
//!    If none of them changed it becomes clean without recomputing.
//!
//! 5. A recompute rebuilds the upstream set from scratch, so branches that
//!    stop reading a value stop depending on it. If the result compares
//!    equal to the cached value, dependents are left alone.
//!
//! # Failure
//!
//! If the compute function fails, the cached value is kept, the node stays
//! dirty so the next read retries, and the error goes to the caller.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::error::{ReactiveError, Result};
use crate::graph::{Body, NodeId, NodeKind, NodeState};

use super::runtime::{Computation, Runtime};
use super::{Comparator, Source};

type ComputeFn<T> = Box<dyn Fn() -> Result<T>>;

struct DerivedInner<T> {
    id: NodeId,
    compute: ComputeFn<T>,
    comparator: Comparator<T>,

    /// The cached value (None if never successfully computed).
    value: RefCell<Option<T>>,

    disposed: Cell<bool>,
    compute_count: Cell<usize>,
}

impl<T> Computation for DerivedInner<T>
where
    T: 'static,
{
    fn run(&self) -> Result<bool> {
        self.compute_count.set(self.compute_count.get() + 1);
        let next = (self.compute)()?;

        let changed = match &*self.value.borrow() {
            Some(previous) => !(self.comparator)(previous, &next),
            None => true,
        };
        if changed {
            let previous = self.value.replace(Some(next));
            drop(previous);
        }
        Ok(changed)
    }
}

impl<T> Drop for DerivedInner<T> {
    fn drop(&mut self) {
        if !self.disposed.get() {
            Runtime::release(self.id);
        }
    }
}

/// A lazily cached value computed from other reactive values.
///
/// # Example
///
/// ```rust
/// use cellgraph_core::Cell;
///
/// let a = Cell::new(2);
/// let b = a.derive(|x| x * 2);
/// assert_eq!(b.read().unwrap(), 4);
///
/// a.write(3).unwrap();
/// assert_eq!(b.read().unwrap(), 6);
/// ```
pub struct Derived<T> {
    inner: Rc<DerivedInner<T>>,
}

/// Create a derived node compared with `PartialEq`.
pub fn create_derived<T, F>(compute: F) -> Derived<T>
where
    T: Clone + PartialEq + 'static,
    F: Fn() -> Result<T> + 'static,
{
    Derived::new(compute)
}

impl<T> Derived<T>
where
    T: Clone + 'static,
{
    /// Create a derived node compared with `PartialEq`.
    ///
    /// The computation is not run until the first read.
    pub fn new<F>(compute: F) -> Self
    where
        T: PartialEq,
        F: Fn() -> Result<T> + 'static,
    {
        Self::with_comparator(compute, T::eq)
    }

    /// Create a derived node with a custom equality check. When the new
    /// result compares equal to the cached one, dependents are not
    /// invalidated.
    pub fn with_comparator<F, C>(compute: F, comparator: C) -> Self
    where
        F: Fn() -> Result<T> + 'static,
        C: Fn(&T, &T) -> bool + 'static,
    {
        let compute: ComputeFn<T> = Box::new(compute);
        let comparator: Comparator<T> = Rc::new(comparator);

        let (_, inner) = Runtime::with(|rt| {
            rt.register(NodeKind::Derived, |id| {
                let inner = Rc::new(DerivedInner {
                    id,
                    compute,
                    comparator,
                    value: RefCell::new(None),
                    disposed: Cell::new(false),
                    compute_count: Cell::new(0),
                });
                let body: Weak<dyn Computation> = Rc::downgrade(&inner) as Weak<dyn Computation>;
                (Body::Derived(body), inner)
            })
        });
        Self { inner }
    }

    /// The node id.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Inside a reactive context this also records the dependency.
    pub fn read(&self) -> Result<T> {
        self.ensure_live()?;
        Runtime::with(|rt| rt.prepare_read(self.inner.id))?;
        self.cached()
    }

    /// Get the current value without recording a dependency.
    pub fn read_untracked(&self) -> Result<T> {
        self.ensure_live()?;
        Runtime::with(|rt| rt.refresh(self.inner.id))?;
        self.cached()
    }

    /// The last successfully computed value, without refreshing. Can be
    /// stale; `None` before the first successful compute or after disposal.
    pub fn peek(&self) -> Option<T> {
        self.inner.value.borrow().clone()
    }

    fn cached(&self) -> Result<T> {
        self.inner
            .value
            .borrow()
            .clone()
            .ok_or(ReactiveError::StaleReadAfterDispose {
                node: self.inner.id,
            })
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.disposed.get() {
            return Err(ReactiveError::StaleReadAfterDispose {
                node: self.inner.id,
            });
        }
        Ok(())
    }

    /// Chain another derived node off this one.
    pub fn derive<U, F>(&self, f: F) -> Derived<U>
    where
        U: Clone + PartialEq + 'static,
        F: Fn(&T) -> U + 'static,
    {
        self.derive_with(f, U::eq)
    }

    /// Like [`derive`](Self::derive), with a custom comparator.
    pub fn derive_with<U, F, C>(&self, f: F, comparator: C) -> Derived<U>
    where
        U: Clone + 'static,
        F: Fn(&T) -> U + 'static,
        C: Fn(&U, &U) -> bool + 'static,
    {
        let source = self.clone();
        Derived::with_comparator(move || source.read().map(|value| f(&value)), comparator)
    }

    /// Remove the node from the graph. Later reads fail with
    /// [`StaleReadAfterDispose`](ReactiveError::StaleReadAfterDispose).
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        Runtime::release(self.inner.id);
        let previous = self.inner.value.take();
        drop(previous);
        debug!(node = ?self.inner.id, "derived node disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// Current dirty state, `None` once disposed.
    pub fn state(&self) -> Option<NodeState> {
        Runtime::with(|rt| rt.state(self.inner.id))
    }

    /// Whether the next read will have to do work.
    pub fn is_dirty(&self) -> bool {
        self.state().is_some_and(|state| state != NodeState::Clean)
    }

    /// How many times the compute function has been invoked.
    pub fn compute_count(&self) -> usize {
        self.inner.compute_count.get()
    }

    /// Number of nodes read by the last computation.
    pub fn dependency_count(&self) -> usize {
        Runtime::with(|rt| rt.upstream_count(self.inner.id))
    }

    /// Number of live nodes that read this node.
    pub fn dependent_count(&self) -> usize {
        Runtime::with(|rt| rt.dependent_count(self.inner.id))
    }
}

impl<T> Source<T> for Derived<T>
where
    T: Clone + 'static,
{
    fn read(&self) -> Result<T> {
        Derived::read(self)
    }

    fn node_id(&self) -> NodeId {
        self.inner.id
    }
}

impl<T> Clone for Derived<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Derived<T>
where
    T: Clone + Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("cached", &self.peek())
            .field("compute_count", &self.compute_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
