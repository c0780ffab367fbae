//! Update Scheduler
//!
//! The scheduler owns the node arena and decides which nodes need work after
//! a write. It never runs user code; the runtime pulls values through it.
//!
//! # Algorithm
//!
//! Propagation is push-pull:
//!
//! 1. When a cell changes, a fresh epoch starts and its direct dependents are
//!    marked dirty.
//! 2. Everything reachable further downstream is marked maybe-dirty. A node
//!    already stamped with the current epoch is not expanded again, so
//!    diamonds are walked once.
//! 3. Effects reached by the walk are queued; nothing is recomputed yet.
//! 4. When a derived node is later recomputed and its value changed, its
//!    direct dependents are promoted to dirty. Maybe-dirty nodes whose inputs
//!    all came back equal are simply cleaned.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;
use slotmap::SlotMap;
use tracing::trace;

use super::node::{Body, Node, NodeId, NodeKind, NodeState, Upstream};

/// Serializable view of one node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    pub state: NodeState,
    pub upstream: Vec<NodeId>,
    pub dependents: Vec<NodeId>,
}

/// Serializable view of the whole graph, for instrumentation.
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub epoch: u64,
    pub pending_effects: usize,
    pub nodes: Vec<NodeSnapshot>,
}

/// The update scheduler manages the dependency graph and coordinates updates.
pub struct UpdateScheduler {
    nodes: SlotMap<NodeId, Node>,

    /// Source of `Node::seq`.
    next_seq: u64,

    /// Incremented once per mark pass.
    epoch: u64,

    /// Effects reached by a mark pass that have not run yet, keyed by
    /// `Node::seq` so the first created pops first.
    pending: BTreeMap<u64, NodeId>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            next_seq: 0,
            epoch: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Add a node whose body needs to know its own id.
    pub(crate) fn insert_with<R>(
        &mut self,
        kind: NodeKind,
        build: impl FnOnce(NodeId) -> (Body, R),
    ) -> (NodeId, R) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut extra = None;
        let id = self.nodes.insert_with_key(|id| {
            let (body, out) = build(id);
            extra = Some(out);
            Node::new(kind, seq, body)
        });

        match extra {
            Some(out) => (id, out),
            None => unreachable!("insert_with_key always invokes its closure"),
        }
    }

    /// Remove a node from the graph and unsubscribe it from everything it
    /// read.
    ///
    /// The node is returned so the caller can drop its body once no borrow
    /// of the scheduler is held.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(id)?;
        for source in node.upstream() {
            if let Some(source) = self.nodes.get_mut(*source) {
                source.remove_dependent(id);
            }
        }
        self.pending.remove(&node.seq());
        trace!(node = ?id, kind = ?node.kind(), "node removed");
        Some(node)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn state(&self, id: NodeId) -> Option<NodeState> {
        self.nodes.get(id).map(Node::state)
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(id).map(Node::kind)
    }

    pub(crate) fn set_state(&mut self, id: NodeId, state: NodeState) {
        if let Some(node) = self.nodes.get_mut(id) {
            match state {
                NodeState::Clean => node.mark_clean(),
                NodeState::MaybeDirty => node.mark_maybe_dirty(),
                NodeState::Dirty => node.mark_dirty(),
            }
        }
    }

    /// Number of nodes that `id` reads.
    pub fn upstream_count(&self, id: NodeId) -> usize {
        self.nodes.get(id).map_or(0, |node| node.upstream().len())
    }

    /// Number of live nodes that read `id`.
    pub fn dependent_count(&self, id: NodeId) -> usize {
        self.nodes.get(id).map_or(0, |node| {
            node.dependents()
                .iter()
                .filter(|dependent| self.nodes.get(**dependent).is_some_and(Node::is_live))
                .count()
        })
    }

    /// Replace the upstream set of `id` with what its latest run read,
    /// updating the reverse edges on both the dropped and the new sources.
    pub(crate) fn set_upstream(&mut self, id: NodeId, upstream: Upstream) {
        let Some(node) = self.nodes.get_mut(id) else {
            // Disposed while running.
            return;
        };
        let previous = node.replace_upstream(upstream.clone());

        for source in previous.iter().filter(|source| !upstream.contains(source)) {
            if let Some(source) = self.nodes.get_mut(*source) {
                source.remove_dependent(id);
            }
        }
        for source in &upstream {
            if let Some(source) = self.nodes.get_mut(*source) {
                source.add_dependent(id);
            }
        }
    }

    /// Mark phase for a write to `root`.
    ///
    /// Returns the number of nodes expanded.
    pub fn mark_changed(&mut self, root: NodeId) -> usize {
        self.epoch += 1;
        let epoch = self.epoch;

        let mut queue: VecDeque<(NodeId, bool)> = self
            .live_dependents(root)
            .into_iter()
            .map(|id| (id, true))
            .collect();
        let mut expanded = 0;

        while let Some((id, direct)) = queue.pop_front() {
            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };

            // Direct dependents are always promoted, even when an earlier
            // path in this pass already stamped them.
            if direct {
                node.mark_dirty();
            } else {
                node.mark_maybe_dirty();
            }

            if node.stamp() == epoch {
                continue;
            }
            node.set_stamp(epoch);
            expanded += 1;

            trace!(node = ?id, epoch, state = ?node.state(), "marked");

            if node.kind() == NodeKind::Effect {
                self.pending.insert(node.seq(), id);
                continue;
            }

            queue.extend(self.live_dependents(id).into_iter().map(|id| (id, false)));
        }

        expanded
    }

    /// Promote the direct dependents of `id` to dirty after its value
    /// changed. Nodes for which `skip` returns true are left alone.
    pub(crate) fn mark_dependents_dirty(&mut self, id: NodeId, skip: impl Fn(NodeId) -> bool) {
        for dependent in self.live_dependents(id) {
            if skip(dependent) {
                continue;
            }
            if let Some(node) = self.nodes.get_mut(dependent) {
                node.mark_dirty();
                if node.kind() == NodeKind::Effect {
                    self.pending.insert(node.seq(), dependent);
                }
            }
        }
    }

    /// The live dependents of `id`, pruning entries for nodes that are gone.
    fn live_dependents(&mut self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };

        let (live, dead): (Vec<NodeId>, Vec<NodeId>) = node
            .dependents()
            .iter()
            .copied()
            .partition(|dependent| self.nodes.get(*dependent).is_some_and(Node::is_live));

        if !dead.is_empty() {
            for dependent in &dead {
                // Derived nodes whose handles vanished without a clean removal.
                self.nodes.remove(*dependent);
            }
            if let Some(node) = self.nodes.get_mut(id) {
                node.retain_dependents(|dependent| !dead.contains(dependent));
            }
            trace!(node = ?id, pruned = dead.len(), "pruned dead dependents");
        }

        live
    }

    /// Take the pending effect that was created first.
    pub(crate) fn pop_pending(&mut self) -> Option<NodeId> {
        // Entries for nodes pruned during a walk are skipped here.
        while let Some((_, next)) = self.pending.pop_first() {
            if self.nodes.contains_key(next) {
                return Some(next);
            }
        }
        None
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let mut nodes: Vec<(u64, NodeSnapshot)> = self
            .nodes
            .iter()
            .map(|(id, node)| {
                let snapshot = NodeSnapshot {
                    id,
                    kind: node.kind(),
                    state: node.state(),
                    upstream: node.upstream().to_vec(),
                    dependents: node.dependents().iter().copied().collect(),
                };
                (node.seq(), snapshot)
            })
            .collect();
        nodes.sort_by_key(|(seq, _)| *seq);

        GraphSnapshot {
            epoch: self.epoch,
            pending_effects: self.pending.len(),
            nodes: nodes.into_iter().map(|(_, node)| node).collect(),
        }
    }
}

impl Default for UpdateScheduler {
    fn default() -> Self {
        Self::new()
    }
}
