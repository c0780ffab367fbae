//! Graph Nodes
//!
//! This module defines the node records that live in the dependency graph
//! arena. A node never owns typed values; those live in the handles
//! (`Cell`, `Derived`, `Effect`). The arena only keeps what propagation
//! needs: kind, dirty state, the epoch stamp and both edge directions.

use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use serde::Serialize;
use smallvec::SmallVec;
use slotmap::new_key_type;

use crate::reactive::Computation;

new_key_type! {
    /// Stable, generational slot identifying a node in the graph arena.
    ///
    /// A removed node's id never resolves again, even if its slot is reused,
    /// so holding a `NodeId` behaves like a weak reference.
    pub struct NodeId;
}

/// Upstream edges are usually few; keep them inline.
pub(crate) type Upstream = SmallVec<[NodeId; 4]>;

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeKind {
    /// A cell. These are the roots of the graph.
    /// They have no dependencies, only dependents.
    Source,

    /// A derived node. These have dependencies and may have dependents.
    /// They cache their computed value.
    Derived,

    /// An effect node. These are leaves of the graph.
    Effect,
}

/// Dirty state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeState {
    /// The node's value is up-to-date.
    Clean,

    /// Something upstream was written, but it is not yet known whether any
    /// direct input actually changed.
    MaybeDirty,

    /// A direct input changed. The node must recompute on next read.
    Dirty,
}

/// What the arena holds to re-run a node.
pub(crate) enum Body {
    /// Cells are never recomputed.
    Source,

    /// Held weakly: a derived node lives as long as its handles.
    Derived(Weak<dyn Computation>),

    /// Held strongly: an effect lives until it is disposed.
    Effect(Rc<dyn Computation>),
}

/// A node in the dependency graph.
pub(crate) struct Node {
    kind: NodeKind,
    state: NodeState,

    /// Creation order. Pending effects run in ascending `seq`.
    seq: u64,

    /// Epoch of the last mark pass that expanded this node.
    stamp: u64,

    /// Nodes that this node read during its last run.
    upstream: Upstream,

    /// Nodes that read this node. Entries may outlive the nodes they name;
    /// they are pruned while marking.
    dependents: IndexSet<NodeId>,

    body: Body,
}

impl Node {
    pub(crate) fn new(kind: NodeKind, seq: u64, body: Body) -> Self {
        Self {
            kind,
            state: match kind {
                NodeKind::Source => NodeState::Clean,
                // Start dirty to ensure first computation
                NodeKind::Derived | NodeKind::Effect => NodeState::Dirty,
            },
            seq,
            stamp: 0,
            upstream: Upstream::new(),
            dependents: IndexSet::new(),
            body,
        }
    }

    pub(crate) fn kind(&self) -> NodeKind {
        self.kind
    }

    pub(crate) fn state(&self) -> NodeState {
        self.state
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub(crate) fn stamp(&self) -> u64 {
        self.stamp
    }

    pub(crate) fn set_stamp(&mut self, epoch: u64) {
        self.stamp = epoch;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.state = NodeState::Clean;
    }

    /// Clean nodes become maybe-dirty; dirty nodes stay dirty.
    pub(crate) fn mark_maybe_dirty(&mut self) {
        if self.state == NodeState::Clean {
            self.state = NodeState::MaybeDirty;
        }
    }

    pub(crate) fn mark_dirty(&mut self) {
        if self.kind != NodeKind::Source {
            self.state = NodeState::Dirty;
        }
    }

    pub(crate) fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    pub(crate) fn replace_upstream(&mut self, upstream: Upstream) -> Upstream {
        std::mem::replace(&mut self.upstream, upstream)
    }

    pub(crate) fn dependents(&self) -> &IndexSet<NodeId> {
        &self.dependents
    }

    pub(crate) fn add_dependent(&mut self, id: NodeId) {
        self.dependents.insert(id);
    }

    pub(crate) fn remove_dependent(&mut self, id: NodeId) {
        self.dependents.shift_remove(&id);
    }

    pub(crate) fn retain_dependents(&mut self, keep: impl Fn(&NodeId) -> bool) {
        self.dependents.retain(|id| keep(id));
    }

    /// False once a derived node's last handle is gone.
    pub(crate) fn is_live(&self) -> bool {
        match &self.body {
            Body::Derived(weak) => weak.strong_count() > 0,
            Body::Source | Body::Effect(_) => true,
        }
    }

    /// The runnable body, if this node has one that is still alive.
    pub(crate) fn computation(&self) -> Option<Rc<dyn Computation>> {
        match &self.body {
            Body::Source => None,
            Body::Derived(weak) => weak.upgrade(),
            Body::Effect(rc) => Some(Rc::clone(rc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn source_node_starts_clean() {
        let node = Node::new(NodeKind::Source, 0, Body::Source);
        assert_eq!(node.kind(), NodeKind::Source);
        assert_eq!(node.state(), NodeState::Clean);
    }

    #[test]
    fn source_node_never_becomes_dirty() {
        let mut node = Node::new(NodeKind::Source, 0, Body::Source);
        node.mark_dirty();
        node.mark_maybe_dirty();
        assert_eq!(node.state(), NodeState::Clean);
    }

    #[test]
    fn dirty_state_transitions() {
        let mut node = Node::new(NodeKind::Effect, 0, Body::Source);

        assert_eq!(node.state(), NodeState::Dirty);

        node.mark_clean();
        assert_eq!(node.state(), NodeState::Clean);

        node.mark_maybe_dirty();
        assert_eq!(node.state(), NodeState::MaybeDirty);

        node.mark_dirty();
        assert_eq!(node.state(), NodeState::Dirty);

        // Maybe-dirty never downgrades dirty
        node.mark_maybe_dirty();
        assert_eq!(node.state(), NodeState::Dirty);
    }

    #[test]
    fn dependents_keep_insertion_order() {
        let mut ids: SlotMap<NodeId, ()> = SlotMap::with_key();
        let (a, b, c) = (ids.insert(()), ids.insert(()), ids.insert(()));

        let mut node = Node::new(NodeKind::Source, 0, Body::Source);
        node.add_dependent(c);
        node.add_dependent(a);
        node.add_dependent(b);
        node.add_dependent(a);
        assert_eq!(node.dependents().iter().copied().collect::<Vec<_>>(), vec![c, a, b]);

        node.remove_dependent(a);
        assert_eq!(node.dependents().iter().copied().collect::<Vec<_>>(), vec![c, b]);
    }

    #[test]
    fn derived_body_dies_with_its_owner() {
        struct Nop;
        impl Computation for Nop {
            fn run(&self) -> crate::Result<bool> {
                Ok(false)
            }
        }

        let owner: Rc<dyn Computation> = Rc::new(Nop);
        let node = Node::new(NodeKind::Derived, 0, Body::Derived(Rc::downgrade(&owner)));
        assert!(node.is_live());
        assert!(node.computation().is_some());

        drop(owner);
        assert!(!node.is_live());
        assert!(node.computation().is_none());
    }
}
