//! Reactive Primitives
//!
//! This module implements the reactive system: cells, derived nodes and
//! effects, wired together by a per-thread runtime.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] is a container for mutable state. Reading it inside a derived
//! node or effect records an upstream edge; writing a different value
//! invalidates everything downstream.
//!
//! ## Derived nodes
//!
//! A [`Derived`] caches a value computed from other nodes. It is lazy: it
//! only recomputes when read after one of its inputs actually changed.
//!
//! ## Effects
//!
//! An [`Effect`] runs a side-effecting function whenever something it read
//! changes. Effects are eager and run after every derived node they depend
//! on has settled, so they only ever observe consistent values.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered at run time. While a computation runs, a
//! thread-local context stack collects every read; when it finishes, the
//! collected set replaces the node's previous upstream edges. A write does
//! the cheap part eagerly (marking reachable nodes dirty) and leaves the
//! expensive part (recomputing) to whoever reads next.

mod batch;
mod cell;
mod context;
mod derived;
mod effect;
mod runtime;
mod selector;

use std::rc::Rc;

use crate::error::Result;
use crate::graph::NodeId;

pub use batch::{batch, is_batching, untrack};
pub use cell::{create_cell, Cell};
pub use context::ReactiveContext;
pub use derived::{create_derived, Derived};
pub use effect::{cleanup, create_effect, Cleanup, Effect};
pub use runtime::{Computation, Runtime};
pub use selector::{create_memoized_selector, create_selector};

/// Equality check deciding whether a new value counts as a change.
pub type Comparator<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// A node whose value can be read: a [`Cell`] or a [`Derived`].
pub trait Source<T> {
    /// Read the current value, recording the read in the running
    /// computation.
    fn read(&self) -> Result<T>;

    /// The node backing this source.
    fn node_id(&self) -> NodeId;
}
