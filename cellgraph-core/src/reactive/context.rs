//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a cell or derived node
//! is read, we record it against the innermost running computation.
//!
//! # Implementation
//!
//! We use a thread-local stack. Running a derived node or an effect pushes
//! an entry; the guard pops it when the run ends (or unwinds). Nested
//! entries appear when a derived node reads another derived node that is
//! dirty.
//!
//! The full stack, not just the top, is consulted for two checks: a read of
//! a node that is already on the stack is a cycle, and a write while any
//! derived node is on the stack is rejected.

use std::cell::RefCell;

use smallvec::SmallVec;

use crate::graph::{NodeId, NodeKind, Upstream};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    /// A derived node or effect is running.
    Compute { node: NodeId, kind: NodeKind },

    /// Tracking is suspended (see [`untrack`](crate::reactive::untrack)).
    Untracked,
}

/// An entry in the reactive context stack.
#[derive(Debug, Clone)]
struct ContextEntry {
    frame: Frame,
    /// Nodes read during this run, in first-read order, without duplicates.
    dependencies: Upstream,
}

/// Guard that pops the context when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
pub struct ReactiveContext {
    frame: Frame,
    finished: bool,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given node.
    pub(crate) fn enter(node: NodeId, kind: NodeKind) -> Self {
        Self::push(Frame::Compute { node, kind })
    }

    /// Enter a context in which reads are not recorded.
    pub(crate) fn untracked() -> Self {
        Self::push(Frame::Untracked)
    }

    fn push(frame: Frame) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                frame,
                dependencies: SmallVec::new(),
            });
        });

        Self {
            frame,
            finished: false,
        }
    }

    /// Leave the context, returning what was read while it was active.
    pub(crate) fn finish(mut self) -> Upstream {
        self.finished = true;
        self.pop().map(|entry| entry.dependencies).unwrap_or_default()
    }

    fn pop(&self) -> Option<ContextEntry> {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Verify we're popping the right context.
            if let Some(entry) = &popped {
                debug_assert_eq!(
                    entry.frame, self.frame,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.frame, entry.frame
                );
            }
            popped
        })
    }

    /// Check if reads are currently being recorded.
    pub fn is_active() -> bool {
        Self::current().is_some()
    }

    /// The node whose run is recording reads, if any.
    pub fn current() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| match stack.borrow().last() {
            Some(ContextEntry {
                frame: Frame::Compute { node, .. },
                ..
            }) => Some(*node),
            _ => None,
        })
    }

    /// Number of entries on the stack, including untracked ones.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }

    /// Record a read of `node` against the innermost computation.
    pub(crate) fn track_dependency(node: NodeId) {
        CONTEXT_STACK.with(|stack| {
            if let Some(entry) = stack.borrow_mut().last_mut() {
                if matches!(entry.frame, Frame::Compute { .. })
                    && !entry.dependencies.contains(&node)
                {
                    entry.dependencies.push(node);
                }
            }
        });
    }

    /// Whether `node` is currently running somewhere on the stack.
    pub(crate) fn contains(node: NodeId) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack.borrow().iter().any(|entry| {
                matches!(entry.frame, Frame::Compute { node: running, .. } if running == node)
            })
        })
    }

    /// The innermost derived node on the stack, if any.
    pub(crate) fn active_derived() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| {
            stack.borrow().iter().rev().find_map(|entry| match entry.frame {
                Frame::Compute {
                    node,
                    kind: NodeKind::Derived,
                } => Some(node),
                _ => None,
            })
        })
    }

    /// The running nodes, outermost first.
    pub(crate) fn stack() -> Vec<NodeId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .filter_map(|entry| match entry.frame {
                    Frame::Compute { node, .. } => Some(node),
                    Frame::Untracked => None,
                })
                .collect()
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}
