//! Cellgraph Core
//!
//! This crate provides a fine-grained reactive dependency-tracking engine.
//! It implements:
//!
//! - Reactive primitives (cells, derived nodes, effects)
//! - Automatic, dynamic dependency tracking
//! - Glitch-free push-pull propagation with equality short-circuiting
//! - Batching of writes into a single settle pass
//!
//! The crate is designed to be used both as a native Rust library and,
//! with the `python` feature, as a Python extension module via PyO3.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Cells, derived nodes, effects, batching and the runtime
//! - `graph`: The node arena and the update scheduler
//! - `error`: The error taxonomy
//! - `config`: Per-thread runtime configuration
//!
//! # Example
//!
//! ```rust
//! use cellgraph_core::{Cell, Derived};
//!
//! // Create a cell
//! let a = Cell::new(1);
//!
//! // Two derived values and one that combines them
//! let b = a.derive(|x| x + 1);
//! let c = a.derive(|x| x * 10);
//! let (b2, c2) = (b.clone(), c.clone());
//! let d = Derived::new(move || Ok(b2.read()? + c2.read()?));
//!
//! assert_eq!(d.read().unwrap(), 12);
//!
//! // Update the cell
//! a.write(2).unwrap();
//! assert_eq!(d.read().unwrap(), 23);
//! assert_eq!(d.compute_count(), 2);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;

#[cfg(feature = "python")]
mod python;

pub use config::RuntimeConfig;
pub use error::{ReactiveError, Result};
pub use graph::{GraphSnapshot, NodeId, NodeKind, NodeSnapshot, NodeState};
pub use reactive::{
    batch, cleanup, create_cell, create_derived, create_effect, create_memoized_selector,
    create_selector, untrack, Cell, Cleanup, Derived, Effect, Source,
};

use reactive::Runtime;

/// Install `config` for this thread's runtime.
pub fn configure(config: RuntimeConfig) {
    Runtime::configure(config);
}

/// Serializable view of this thread's dependency graph.
pub fn graph_snapshot() -> GraphSnapshot {
    Runtime::snapshot()
}

/// Number of mark passes run on this thread so far.
pub fn current_epoch() -> u64 {
    Runtime::epoch()
}

/// Number of live nodes in this thread's graph.
pub fn node_count() -> usize {
    Runtime::node_count()
}
