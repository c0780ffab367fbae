//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between cells, derived nodes and effects.
//!
//! # Overview
//!
//! The dependency graph is a directed acyclic graph (DAG) where:
//!
//! - Nodes represent cells (sources) or computations (derived nodes, effects)
//! - Edges represent dependencies: if A reads B, there is an edge from B to A
//!
//! When a cell changes, we traverse the graph to find all affected nodes
//! and mark them. Derived nodes then recompute lazily on their next read.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a generational arena (`slotmap`). Edges are plain
//!    `NodeId`s, so a dropped node leaves behind ids that stop resolving
//!    instead of dangling pointers.
//!
//! 2. We maintain both forward (upstream) and reverse (dependents) edges.
//!    Upstream is rebuilt on every run; dependents are updated from the
//!    difference and pruned lazily during traversal.
//!
//! 3. Edges are never added while a computation is still running. The
//!    computation stack collects reads and the whole upstream set is swapped
//!    in once the run ends.

mod node;
mod scheduler;

pub use node::{NodeId, NodeKind, NodeState};
pub use scheduler::{GraphSnapshot, NodeSnapshot, UpdateScheduler};

pub(crate) use node::{Body, Upstream};
