//! Error types for the reactive engine.

use std::error::Error as StdError;

use thiserror::Error;

use crate::graph::NodeId;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Everything that can go wrong while reading, writing or computing.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// A derivation transitively read itself.
    ///
    /// `stack` is the active computation stack at the moment of detection,
    /// outermost first.
    #[error("cyclic dependency: {node:?} was read while already computing (stack: {stack:?})")]
    CyclicDependency { node: NodeId, stack: Vec<NodeId> },

    /// A cell was written while a derived node was computing.
    #[error("write to {cell:?} rejected: {active:?} is computing")]
    WriteDuringCompute { cell: NodeId, active: NodeId },

    /// A derived node was read after it was disposed.
    #[error("read of {node:?} after it was disposed")]
    StaleReadAfterDispose { node: NodeId },

    /// A cell was written while its value was still borrowed, for example
    /// from inside the closure passed to `Cell::with`.
    #[error("write to {cell:?} rejected: its value is borrowed")]
    WriteWhileBorrowed { cell: NodeId },

    /// An effect kept re-triggering itself within a single settle pass.
    #[error("effect {effect:?} re-ran {runs} times in one settle pass")]
    EffectLoop { effect: NodeId, runs: usize },

    /// A user computation failed.
    #[error("computation failed: {0}")]
    Compute(#[source] Box<dyn StdError + 'static>),
}

impl ReactiveError {
    /// Wrap an arbitrary error raised by a compute or effect body.
    pub fn compute<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + 'static>>,
    {
        Self::Compute(err.into())
    }

    /// True for the engine's own structural errors (as opposed to user
    /// computation failures).
    pub fn is_structural(&self) -> bool {
        !matches!(self, Self::Compute(_))
    }
}

impl From<&str> for ReactiveError {
    fn from(msg: &str) -> Self {
        Self::compute(msg)
    }
}

impl From<String> for ReactiveError {
    fn from(msg: String) -> Self {
        Self::compute(msg)
    }
}
