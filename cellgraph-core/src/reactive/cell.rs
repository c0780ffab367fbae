//! Cell Implementation
//!
//! A Cell is the fundamental reactive primitive. It holds a value and is
//! the root of every propagation pass.
//!
//! # How Cells Work
//!
//! 1. When a cell is read within a reactive context (derived node or
//!    effect), the read is recorded as an upstream edge of that context.
//!
//! 2. When a cell is written with a value its comparator considers
//!    different, everything downstream is marked and pending effects settle.
//!
//! 3. Writes with an equal value do nothing at all.
//!
//! # Ownership
//!
//! Handles are cheap clones of shared state. The node is removed from the
//! graph when the last handle drops.

use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;

use tracing::trace;

use crate::error::{ReactiveError, Result};
use crate::graph::{Body, NodeId, NodeKind};

use super::context::ReactiveContext;
use super::derived::Derived;
use super::runtime::Runtime;
use super::{Comparator, Source};

struct CellInner<T> {
    id: NodeId,
    value: RefCell<T>,
    comparator: Comparator<T>,
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        Runtime::release(self.id);
    }
}

/// A mutable reactive value holder.
///
/// # Example
///
/// ```rust
/// use cellgraph_core::Cell;
///
/// let count = Cell::new(0);
/// assert_eq!(count.read(), 0);
///
/// count.write(5).unwrap();
/// assert_eq!(count.read(), 5);
/// ```
pub struct Cell<T> {
    inner: Rc<CellInner<T>>,
}

/// Create a cell compared with `PartialEq`.
pub fn create_cell<T>(value: T) -> Cell<T>
where
    T: Clone + PartialEq + 'static,
{
    Cell::new(value)
}

impl<T> Cell<T>
where
    T: Clone + 'static,
{
    /// Create a new cell whose writes are compared with `PartialEq`.
    pub fn new(value: T) -> Self
    where
        T: PartialEq,
    {
        Self::with_comparator(value, T::eq)
    }

    /// Create a new cell with a custom equality check. A write is ignored
    /// when `comparator(current, next)` returns true.
    pub fn with_comparator<F>(value: T, comparator: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        let comparator: Comparator<T> = Rc::new(comparator);
        let (_, inner) = Runtime::with(|rt| {
            rt.register(NodeKind::Source, |id| {
                let inner = Rc::new(CellInner {
                    id,
                    value: RefCell::new(value),
                    comparator,
                });
                (Body::Source, inner)
            })
        });
        Self { inner }
    }

    /// The cell's node id.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, this also records the cell as
    /// a dependency of the running computation.
    pub fn read(&self) -> T {
        ReactiveContext::track_dependency(self.inner.id);
        self.inner.value.borrow().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn read_untracked(&self) -> T {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value, tracking the read.
    ///
    /// Writing this cell from inside `f` fails with
    /// [`WriteWhileBorrowed`](crate::ReactiveError::WriteWhileBorrowed).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        ReactiveContext::track_dependency(self.inner.id);
        f(&self.inner.value.borrow())
    }

    /// Set a new value.
    ///
    /// Returns `Ok(false)` if the comparator considered the value unchanged,
    /// in which case nothing downstream is touched. Fails with
    /// [`WriteDuringCompute`](crate::ReactiveError::WriteDuringCompute) when
    /// called while a derived node is computing.
    pub fn write(&self, value: T) -> Result<bool> {
        Runtime::with(|rt| {
            rt.check_write(self.inner.id)?;

            let busy = || ReactiveError::WriteWhileBorrowed {
                cell: self.inner.id,
            };

            let unchanged = {
                let current = self.inner.value.try_borrow().map_err(|_| busy())?;
                (self.inner.comparator)(&current, &value)
            };
            if unchanged {
                trace!(cell = ?self.inner.id, "write ignored, value unchanged");
                return Ok(false);
            }

            let previous = match self.inner.value.try_borrow_mut() {
                Ok(mut slot) => std::mem::replace(&mut *slot, value),
                Err(_) => return Err(busy()),
            };
            drop(previous);

            rt.notify_write(self.inner.id);
            Ok(true)
        })
    }

    /// Update the value using a function of the current value.
    ///
    /// `f` works on a copy, so it may read or write this cell itself.
    pub fn update<F>(&self, f: F) -> Result<bool>
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.read_untracked();
        self.write(f(&current))
    }

    /// Create a derived node computed from this cell's value, compared with
    /// `PartialEq`.
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
        Derived::with_comparator(move || Ok(source.with(&f)), comparator)
    }

    /// Number of live nodes that read this cell.
    pub fn dependent_count(&self) -> usize {
        Runtime::with(|rt| rt.dependent_count(self.inner.id))
    }
}

impl<T> Source<T> for Cell<T>
where
    T: Clone + 'static,
{
    fn read(&self) -> Result<T> {
        Ok(Cell::read(self))
    }

    fn node_id(&self) -> NodeId {
        self.inner.id
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Cell<T>
where
    T: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::Effect;
    use std::cell::Cell as Counter;

    #[test]
    fn cell_read_and_write() {
        let cell = Cell::new(0);
        assert_eq!(cell.read(), 0);

        assert!(cell.write(42).unwrap());
        assert_eq!(cell.read(), 42);
    }

    #[test]
    fn cell_update() {
        let cell = Cell::new(10);
        cell.update(|v| v + 5).unwrap();
        assert_eq!(cell.read(), 15);
    }

    #[test]
    fn equal_write_is_a_no_op() {
        let cell = Cell::new(7);
        let epoch = Runtime::epoch();

        assert!(!cell.write(7).unwrap());
        assert_eq!(Runtime::epoch(), epoch);
    }

    #[test]
    fn custom_comparator_decides_equality() {
        // Case-insensitive strings
        let cell = Cell::with_comparator("Hello".to_string(), |a: &String, b: &String| {
            a.eq_ignore_ascii_case(b)
        });

        assert!(!cell.write("HELLO".to_string()).unwrap());
        assert_eq!(cell.read(), "Hello");

        assert!(cell.write("bye".to_string()).unwrap());
        assert_eq!(cell.read(), "bye");
    }

    #[test]
    fn cell_clone_shares_state() {
        let cell1 = Cell::new(0);
        let cell2 = cell1.clone();

        cell1.write(42).unwrap();
        assert_eq!(cell2.read(), 42);
        assert_eq!(cell1.id(), cell2.id());
    }

    #[test]
    fn dropping_last_handle_removes_node() {
        let cell = Cell::new(1);
        let id = cell.id();
        let clone = cell.clone();

        drop(cell);
        assert!(Runtime::with(|rt| rt.state(id).is_some()));

        drop(clone);
        assert!(!Runtime::with(|rt| rt.state(id).is_some()));
    }

    #[test]
    fn write_notifies_effect() {
        let cell = Cell::new(0);
        let seen = Rc::new(Counter::new(-1));

        let reader = cell.clone();
        let sink = Rc::clone(&seen);
        let _effect = Effect::new(move || {
            sink.set(reader.read());
            Ok(None)
        });
        assert_eq!(seen.get(), 0);
        assert_eq!(cell.dependent_count(), 1);

        cell.write(3).unwrap();
        assert_eq!(seen.get(), 3);
    }

    #[test]
    fn write_from_inside_with_is_rejected() {
        let cell = Cell::new(1);
        let result = cell.with(|v| cell.write(v + 1));

        assert!(matches!(
            result,
            Err(ReactiveError::WriteWhileBorrowed { cell: id }) if id == cell.id()
        ));
        assert_eq!(cell.read(), 1);
    }

    #[test]
    fn update_closure_may_touch_the_cell() {
        let cell = Cell::new(1);
        let changed = cell
            .update(|v| {
                assert_eq!(cell.read(), *v);
                v * 10
            })
            .unwrap();

        assert!(changed);
        assert_eq!(cell.read(), 10);
    }

    #[test]
    fn self_referencing_writes_inside_effect_do_not_panic() {
        let trigger = Cell::new(0);
        let counter = Cell::new(0);
        let rejected = Rc::new(Counter::new(0));

        let (t, cell, misses) = (trigger.clone(), counter.clone(), Rc::clone(&rejected));
        let effect = Effect::new(move || {
            t.read();
            crate::reactive::untrack(|| {
                if cell.with(|v| cell.write(v + 1)).is_err() {
                    misses.set(misses.get() + 1);
                }
                cell.update(|v| v + 1)
            })?;
            Ok(None)
        });

        assert_eq!(rejected.get(), 1);
        assert_eq!(counter.read_untracked(), 1);

        trigger.write(1).unwrap();
        assert_eq!(effect.run_count(), 2);
        assert_eq!(rejected.get(), 2);
        assert_eq!(counter.read_untracked(), 2);
        assert_eq!(counter.dependent_count(), 0);
    }

    #[test]
    fn untracked_read_does_not_subscribe() {
        let cell = Cell::new(0);
        let runs = Rc::new(Counter::new(0));

        let reader = cell.clone();
        let counter = Rc::clone(&runs);
        let _effect = Effect::new(move || {
            counter.set(counter.get() + 1);
            let _ = reader.read_untracked();
            Ok(None)
        });

        cell.write(1).unwrap();
        assert_eq!(runs.get(), 1);
        assert_eq!(cell.dependent_count(), 0);
    }
}
