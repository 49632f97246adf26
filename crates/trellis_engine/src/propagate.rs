//! Incremental propagation of fact changes through the network.
//!
//! A [`Propagator`] borrows the session's memories for the duration of one
//! store operation. Inserts descend from the object-type nodes and join
//! against the opposite memory's index. Deletes walk the handle's record and
//! retract child tuples bottom-up before detaching their parents.
//! Modifications re-evaluate only the nodes whose constraints or listened
//! masks intersect the changed fields, and keep tuples (and so match
//! identities) in place when a match outcome does not change.
//!
//! Left tuples only enter nodes that a linked rule path crosses. A node
//! whose paths are all unlinked holds no left tuples and costs no join
//! work; when a path through it links, its memory is rebuilt from its
//! parent's, and when the last one unlinks the memory is dropped.

use std::collections::BTreeSet;

use trellis_foundation::{Error, Fact, FactId, Result, Value};

use crate::agenda::{ActivationRequest, Agenda};
use crate::config::ExecutionContext;
use crate::constraint::{AlphaConstraint, Diagnostic, EvalContext, MatchView};
use crate::mask::BitMask;
use crate::memory::Memories;
use crate::network::{BetaNode, CompiledRule, Node, NodeId, NodeKind, RuleBase};
use crate::path::PathMemories;
use crate::rule::Salience;
use crate::store::FactStore;
use crate::trace::{PropagationStats, TraceBuffer, TraceEvent};
use crate::tuple::{LeftTuple, RightTuple, TupleArena, TupleId};

/// Tuples, memories and link state of one session.
#[derive(Debug)]
pub struct NetworkState {
    /// Every live tuple.
    pub tuples: TupleArena,
    /// Node memories and handle records.
    pub memories: Memories,
    /// Link bits.
    pub paths: PathMemories,
}

impl NetworkState {
    /// Creates empty state for a rule base.
    #[must_use]
    pub fn new(base: &RuleBase) -> Self {
        Self {
            tuples: TupleArena::new(),
            memories: Memories::new(),
            paths: PathMemories::new(base),
        }
    }
}

/// What changed upstream of a tuple.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Change {
    /// A fact in the match was modified in these fields.
    fact: Option<(FactId, BitMask)>,
    /// An aggregate in the match changed value.
    accumulated: bool,
}

impl Change {
    fn fact(id: FactId, mask: BitMask) -> Self {
        Self {
            fact: Some((id, mask)),
            accumulated: false,
        }
    }

    fn is_some(self) -> bool {
        self.fact.is_some() || self.accumulated
    }
}

/// One propagation pass over a session's memories.
pub(crate) struct Propagator<'a> {
    pub(crate) base: &'a RuleBase,
    pub(crate) store: &'a FactStore,
    pub(crate) state: &'a mut NetworkState,
    pub(crate) agenda: &'a mut Agenda,
    pub(crate) stats: &'a mut PropagationStats,
    pub(crate) diagnostics: &'a mut Vec<Diagnostic>,
    pub(crate) trace: Option<&'a mut TraceBuffer>,
    pub(crate) cycle: u64,
    pub(crate) execution: Option<&'a ExecutionContext>,
    /// Terminal tuples removed during the pass.
    pub(crate) retracted: &'a mut Vec<TupleId>,
    /// Terminal of the rule whose consequence is running.
    pub(crate) firing: Option<NodeId>,
}

impl<'a> Propagator<'a> {
    // =========================================================================
    // Store operations
    // =========================================================================

    /// Propagates a fact that was just added to the store.
    pub(crate) fn insert_fact(&mut self, id: FactId) -> Result<()> {
        let store = self.store;
        let handle = store.get(id)?;
        self.state.memories.handle_mut(id);
        let otns = self
            .base
            .object_type_nodes(&handle.entry_point, handle.fact.type_id());
        tracing::trace!(?id, object_types = otns.len(), "propagating insert");
        for otn in otns {
            self.enter(*otn, id, &handle.fact)?;
        }
        Ok(())
    }

    /// Removes a fact from every memory. Must run before the store deletes it.
    pub(crate) fn delete_fact(&mut self, id: FactId) -> Result<()> {
        let Some(record) = self.state.memories.take_handle(id) else {
            return Ok(());
        };
        tracing::trace!(?id, roots = record.roots.len(), rights = record.right.len(), "propagating delete");

        for (_, tuple) in &record.roots {
            self.retract_left(*tuple)?;
        }
        for adapter in &record.adapters {
            if self.state.memories.adapter_exit(*adapter, id) == 0 {
                self.link(*adapter, false)?;
            }
        }
        for (beta, right) in &record.right {
            self.right_retract(*beta, *right)?;
        }
        Ok(())
    }

    /// Propagates a modification already applied to the store.
    pub(crate) fn modify_fact(&mut self, id: FactId, mask: BitMask) -> Result<()> {
        let store = self.store;
        let handle = store.get(id)?;
        let otns = self
            .base
            .object_type_nodes(&handle.entry_point, handle.fact.type_id());
        tracing::trace!(?id, mask = mask.bits(), "propagating modification");
        for otn in otns {
            let passed = self
                .state
                .memories
                .handle(id)
                .is_some_and(|r| r.passed.contains(otn));
            if passed {
                self.modify_node(*otn, id, &handle.fact, mask)?;
            } else {
                self.enter(*otn, id, &handle.fact)?;
            }
        }
        Ok(())
    }

    // =========================================================================
    // Alpha network
    // =========================================================================

    fn eval(&mut self) -> EvalContext<'_> {
        EvalContext {
            execution: self.execution,
            jit_threshold: self.base.config().jit_threshold,
            stats: &mut *self.stats,
            diagnostics: &mut *self.diagnostics,
        }
    }

    /// Children of `node` selected through its hash dispatch tables.
    fn hash_hits(&mut self, node: NodeId, fact: &Fact) -> Vec<NodeId> {
        let dispatch = self.base.alpha_dispatch(node);
        self.stats.alpha_evaluations += dispatch.len() as u64;
        dispatch
            .iter()
            .filter_map(|d| d.table.get(fact.get(d.field)).copied())
            .collect()
    }

    fn alpha_passes(
        &mut self,
        parent: NodeId,
        sink: NodeId,
        constraint: &AlphaConstraint,
        fact: &Fact,
        hits: &[NodeId],
    ) -> bool {
        let hashed = self
            .base
            .alpha_dispatch(parent)
            .iter()
            .any(|d| d.hashed.contains(&sink));
        if hashed {
            return hits.contains(&sink);
        }
        constraint.evaluate(fact, &mut self.eval())
    }

    /// A fact passed `node`: feed its sinks.
    fn enter(&mut self, node: NodeId, id: FactId, fact: &'a Fact) -> Result<()> {
        self.state.memories.handle_mut(id).passed.insert(node);
        let current = self.base.node(node)?;
        let hits = self.hash_hits(node, fact);
        for sink in &current.sinks {
            let target = self.base.node(*sink)?;
            match &target.kind {
                NodeKind::Alpha { constraint, .. } => {
                    if self.alpha_passes(node, *sink, constraint, fact, &hits) {
                        self.enter(*sink, id, fact)?;
                    }
                }
                NodeKind::LeftInputAdapter { .. } => self.adapter_assert(*sink, id)?,
                kind => {
                    if kind.beta().is_some_and(|b| b.right == node) {
                        self.right_assert(*sink, id, fact)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// A fact that still passes `node` was modified.
    fn modify_node(&mut self, node: NodeId, id: FactId, fact: &'a Fact, mask: BitMask) -> Result<()> {
        let current = self.base.node(node)?;
        let hits = self.hash_hits(node, fact);
        for sink in &current.sinks {
            let target = self.base.node(*sink)?;
            match &target.kind {
                NodeKind::Alpha { constraint, .. } => {
                    let was = self
                        .state
                        .memories
                        .handle(id)
                        .is_some_and(|r| r.passed.contains(sink));
                    let now = if constraint.mask().intersects(mask) {
                        self.alpha_passes(node, *sink, constraint, fact, &hits)
                    } else {
                        was
                    };
                    match (was, now) {
                        (true, true) => self.modify_node(*sink, id, fact, mask)?,
                        (false, true) => self.enter(*sink, id, fact)?,
                        (true, false) => self.exit(*sink, id)?,
                        (false, false) => {}
                    }
                }
                NodeKind::LeftInputAdapter { .. } => {
                    if !self.base.listened(*sink).intersects(mask) {
                        self.stats.modifications_skipped += 1;
                        continue;
                    }
                    let roots: Vec<TupleId> = self
                        .state
                        .memories
                        .handle(id)
                        .map(|r| {
                            r.roots
                                .iter()
                                .filter(|(a, _)| a == sink)
                                .map(|(_, t)| *t)
                                .collect()
                        })
                        .unwrap_or_default();
                    for tuple in roots {
                        self.modify_left(tuple, Change::fact(id, mask))?;
                    }
                }
                kind => {
                    if !kind.beta().is_some_and(|b| b.right == node) {
                        continue;
                    }
                    if !self.base.listened(*sink).intersects(mask) {
                        self.stats.modifications_skipped += 1;
                        continue;
                    }
                    let right = self.state.memories.handle(id).and_then(|r| {
                        r.right.iter().find(|(b, _)| b == sink).map(|(_, t)| *t)
                    });
                    match right {
                        Some(right) => {
                            self.right_modify(*sink, right, id, fact, Change::fact(id, mask))?;
                        }
                        None => self.right_assert(*sink, id, fact)?,
                    }
                }
            }
        }
        Ok(())
    }

    /// A fact stopped passing `node`: remove it from everything below.
    fn exit(&mut self, node: NodeId, id: FactId) -> Result<()> {
        self.state.memories.handle_mut(id).passed.remove(&node);
        let current = self.base.node(node)?;
        for sink in &current.sinks {
            let target = self.base.node(*sink)?;
            match &target.kind {
                NodeKind::Alpha { .. } => {
                    let passed = self
                        .state
                        .memories
                        .handle(id)
                        .is_some_and(|r| r.passed.contains(sink));
                    if passed {
                        self.exit(*sink, id)?;
                    }
                }
                NodeKind::LeftInputAdapter { .. } => self.adapter_retract(*sink, id)?,
                kind => {
                    if !kind.beta().is_some_and(|b| b.right == node) {
                        continue;
                    }
                    let record = self.state.memories.handle_mut(id);
                    let position = record.right.iter().position(|(b, _)| b == sink);
                    if let Some(position) = position {
                        let (_, right) = record.right.remove(position);
                        self.right_retract(*sink, right)?;
                    }
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Left input adapters
    // =========================================================================

    fn adapter_assert(&mut self, adapter: NodeId, id: FactId) -> Result<()> {
        self.state.memories.handle_mut(id).adapters.push(adapter);
        let first = self.state.memories.adapter_enter(adapter, id) == 1;
        let node = self.base.node(adapter)?;
        for sink in &node.sinks {
            if self.state.paths.is_materialized(*sink) {
                self.root(adapter, *sink, id)?;
            }
        }
        if first {
            self.link(adapter, true)?;
        }
        Ok(())
    }

    /// Creates the one-position match of a fact in one adapter sink.
    fn root(&mut self, adapter: NodeId, sink: NodeId, id: FactId) -> Result<()> {
        let tuple = self.state.tuples.add_left(LeftTuple {
            sink,
            source: adapter,
            parent: None,
            right: None,
            handle: Some(id),
            accumulated: None,
            children: Vec::new(),
            activation: None,
        });
        self.stats.tuples_created += 1;
        self.state.memories.handle_mut(id).roots.push((adapter, tuple));
        self.left_assert(sink, tuple)
    }

    fn adapter_retract(&mut self, adapter: NodeId, id: FactId) -> Result<()> {
        let record = self.state.memories.handle_mut(id);
        record.adapters.retain(|a| *a != adapter);
        let mut roots = Vec::new();
        record.roots.retain(|(a, t)| {
            if *a == adapter {
                roots.push(*t);
                false
            } else {
                true
            }
        });
        for tuple in roots {
            self.retract_left(tuple)?;
        }
        if self.state.memories.adapter_exit(adapter, id) == 0 {
            self.link(adapter, false)?;
        }
        Ok(())
    }

    // =========================================================================
    // Left tuples
    // =========================================================================

    fn facts_of(&self, tuple: TupleId) -> Vec<Option<&'a Fact>> {
        let store = self.store;
        self.state
            .tuples
            .chain(tuple)
            .into_iter()
            .map(|h| h.and_then(|h| store.fact(h)))
            .collect()
    }

    fn children_of(&self, tuple: TupleId) -> Vec<TupleId> {
        self.state
            .tuples
            .left(tuple)
            .map(|t| t.children.clone())
            .unwrap_or_default()
    }

    fn children_with_right(&self, tuple: TupleId, right: TupleId) -> Vec<TupleId> {
        self.children_of(tuple)
            .into_iter()
            .filter(|c| {
                self.state
                    .tuples
                    .left(*c)
                    .is_some_and(|t| t.right == Some(right))
            })
            .collect()
    }

    /// A tuple arrived in the left memory of its sink.
    fn left_assert(&mut self, node_id: NodeId, tuple: TupleId) -> Result<()> {
        let node = self.base.node(node_id)?;
        if let NodeKind::Terminal { .. } = node.kind {
            return self.terminal_assert(node_id, tuple);
        }
        let beta = beta_of(node)?;
        let facts = self.facts_of(tuple);
        let key = beta.index.left_key(&MatchView::new(&facts, beta.offset));
        let memory = self.state.memories.beta_mut(node_id);
        let candidates = memory.right.bucket(&key);
        memory.left.insert(tuple, key);

        for right in candidates {
            let Some((handle, fact)) = self.right_fact(right) else {
                continue;
            };
            if self.matches(node, beta, &facts, tuple, handle, fact) {
                let value = extracted(node, fact);
                self.state.memories.beta_mut(node_id).link(tuple, right, value);
                if let NodeKind::Join(_) = node.kind {
                    self.spawn(node_id, node, tuple, Some(right), Some(handle), None)?;
                }
            }
        }
        if let NodeKind::Join(_) = node.kind {
            Ok(())
        } else {
            self.refresh(node_id, node, tuple, Change::default())
        }
    }

    /// Something upstream of a tuple changed.
    fn modify_left(&mut self, tuple: TupleId, change: Change) -> Result<()> {
        let Some(sink) = self.state.tuples.left(tuple).map(|t| t.sink) else {
            return Ok(());
        };
        self.stats.tuples_updated += 1;
        let node = self.base.node(sink)?;
        if let NodeKind::Terminal { .. } = node.kind {
            return self.terminal_modify(sink, tuple, change);
        }
        let beta = beta_of(node)?;

        if !self.reads_change(beta, tuple, change) {
            for child in self.children_of(tuple) {
                self.modify_left(child, change)?;
            }
            return Ok(());
        }

        let facts = self.facts_of(tuple);
        let key = beta.index.left_key(&MatchView::new(&facts, beta.offset));
        let memory = self.state.memories.beta_mut(sink);
        memory.left.rekey(tuple, key.clone());
        let bucket: BTreeSet<TupleId> = memory.right.bucket(&key).into_iter().collect();
        let mut candidates: BTreeSet<TupleId> = memory.matches_of(tuple).into_iter().collect();
        candidates.extend(bucket.iter().copied());

        for right in candidates {
            let Some((handle, fact)) = self.right_fact(right) else {
                continue;
            };
            let was = self
                .state
                .memories
                .beta(sink)
                .is_some_and(|m| m.is_linked(tuple, right));
            let now = bucket.contains(&right) && self.matches(node, beta, &facts, tuple, handle, fact);
            self.rematch(sink, node, tuple, right, handle, fact, was, now, change)?;
        }
        if let NodeKind::Join(_) = node.kind {
            Ok(())
        } else {
            self.refresh(sink, node, tuple, change)
        }
    }

    /// Whether a beta node's own constraints read what changed in a match.
    fn reads_change(&self, beta: &BetaNode, tuple: TupleId, change: Change) -> bool {
        let Some((id, mask)) = change.fact else {
            return false;
        };
        self.state
            .tuples
            .chain(tuple)
            .iter()
            .enumerate()
            .any(|(position, h)| *h == Some(id) && beta.left_mask(position).intersects(mask))
    }

    /// Removes a tuple and, first, everything derived from it.
    fn retract_left(&mut self, tuple: TupleId) -> Result<()> {
        let Some(current) = self.state.tuples.left(tuple) else {
            return Ok(());
        };
        let sink = current.sink;
        let parent = current.parent;
        let right = current.right;
        for child in current.children.clone() {
            self.retract_left(child)?;
        }

        let node = self.base.node(sink)?;
        match node.kind {
            NodeKind::Terminal { .. } => self.terminal_retract(sink, tuple),
            _ => self.state.memories.beta_mut(sink).remove_left(tuple),
        }
        if let Some(parent) = parent.and_then(|p| self.state.tuples.left_mut(p)) {
            parent.children.retain(|c| *c != tuple);
        }
        if let Some(right) = right.and_then(|r| self.state.tuples.right_mut(r)) {
            right.children.retain(|c| *c != tuple);
        }
        self.state.tuples.free_left(tuple);
        self.stats.tuples_deleted += 1;
        Ok(())
    }

    fn retract_children(&mut self, tuple: TupleId) -> Result<()> {
        for child in self.children_of(tuple) {
            self.retract_left(child)?;
        }
        Ok(())
    }

    /// Creates one child of `parent` per materialized sink of `node`.
    fn spawn(
        &mut self,
        node_id: NodeId,
        node: &Node,
        parent: TupleId,
        right: Option<TupleId>,
        handle: Option<FactId>,
        accumulated: Option<Value>,
    ) -> Result<()> {
        for sink in &node.sinks {
            if self.state.paths.is_materialized(*sink) {
                self.spawn_into(node_id, *sink, parent, right, handle, accumulated.clone())?;
            }
        }
        Ok(())
    }

    fn spawn_into(
        &mut self,
        node_id: NodeId,
        sink: NodeId,
        parent: TupleId,
        right: Option<TupleId>,
        handle: Option<FactId>,
        accumulated: Option<Value>,
    ) -> Result<()> {
        let child = self.state.tuples.add_left(LeftTuple {
            sink,
            source: node_id,
            parent: Some(parent),
            right,
            handle,
            accumulated,
            children: Vec::new(),
            activation: None,
        });
        self.stats.tuples_created += 1;
        if let Some(p) = self.state.tuples.left_mut(parent) {
            p.children.push(child);
        }
        if let Some(r) = right.and_then(|r| self.state.tuples.right_mut(r)) {
            r.children.push(child);
        }
        self.left_assert(sink, child)
    }

    // =========================================================================
    // Beta nodes
    // =========================================================================

    fn right_fact(&self, right: TupleId) -> Option<(FactId, &'a Fact)> {
        let handle = self.state.tuples.right(right)?.handle;
        Some((handle, self.store.fact(handle)?))
    }

    /// Tests a candidate fact against a partial match.
    fn matches(
        &mut self,
        node: &Node,
        beta: &BetaNode,
        facts: &[Option<&Fact>],
        tuple: TupleId,
        handle: FactId,
        fact: &Fact,
    ) -> bool {
        if let NodeKind::Join(_) = node.kind {
            if self.state.tuples.chain_contains(tuple, handle) {
                return false;
            }
        }
        let view = MatchView::new(facts, beta.offset);
        let mut ctx = self.eval();
        beta.residual.iter().all(|c| c.evaluate(&view, fact, &mut ctx))
    }

    fn right_assert(&mut self, node_id: NodeId, id: FactId, fact: &'a Fact) -> Result<()> {
        let node = self.base.node(node_id)?;
        let beta = beta_of(node)?;
        let right = self.state.tuples.add_right(RightTuple {
            node: node_id,
            handle: id,
            children: Vec::new(),
        });
        self.state.memories.handle_mut(id).right.push((node_id, right));

        let key = beta.index.right_key(fact);
        let memory = self.state.memories.beta_mut(node_id);
        memory.right.insert(right, key.clone());
        let first = memory.right.len() == 1;
        let lefts = memory.left.bucket(&key);
        if first && links_on_right(node) {
            self.link(node_id, true)?;
        }

        for left in lefts {
            let facts = self.facts_of(left);
            if !self.matches(node, beta, &facts, left, id, fact) {
                continue;
            }
            let value = extracted(node, fact);
            self.state.memories.beta_mut(node_id).link(left, right, value);
            if let NodeKind::Join(_) = node.kind {
                self.spawn(node_id, node, left, Some(right), Some(id), None)?;
            } else {
                self.refresh(node_id, node, left, Change::default())?;
            }
        }
        Ok(())
    }

    fn right_retract(&mut self, node_id: NodeId, right: TupleId) -> Result<()> {
        let node = self.base.node(node_id)?;
        if let NodeKind::Join(_) = node.kind {
            let children = self
                .state
                .tuples
                .right(right)
                .map(|r| r.children.clone())
                .unwrap_or_default();
            for child in children {
                self.retract_left(child)?;
            }
        }
        let memory = self.state.memories.beta_mut(node_id);
        let lefts = memory.remove_right(right);
        let empty = memory.right.is_empty();
        if !matches!(node.kind, NodeKind::Join(_)) {
            for left in lefts {
                self.refresh(node_id, node, left, Change::default())?;
            }
        }
        if empty && links_on_right(node) {
            self.link(node_id, false)?;
        }
        self.state.tuples.free_right(right);
        Ok(())
    }

    fn right_modify(
        &mut self,
        node_id: NodeId,
        right: TupleId,
        id: FactId,
        fact: &'a Fact,
        change: Change,
    ) -> Result<()> {
        let node = self.base.node(node_id)?;
        let beta = beta_of(node)?;
        let key = beta.index.right_key(fact);
        let memory = self.state.memories.beta_mut(node_id);
        memory.right.rekey(right, key.clone());
        let bucket: BTreeSet<TupleId> = memory.left.bucket(&key).into_iter().collect();
        let mut candidates: BTreeSet<TupleId> = memory.matched_by(right).into_iter().collect();
        candidates.extend(bucket.iter().copied());

        for left in candidates {
            let was = self
                .state
                .memories
                .beta(node_id)
                .is_some_and(|m| m.is_linked(left, right));
            let facts = self.facts_of(left);
            let now = bucket.contains(&left) && self.matches(node, beta, &facts, left, id, fact);
            self.rematch(node_id, node, left, right, id, fact, was, now, change)?;
            if !matches!(node.kind, NodeKind::Join(_)) && (was || now) {
                self.refresh(node_id, node, left, Change::default())?;
            }
        }
        Ok(())
    }

    /// Applies a re-evaluated pair. Join nodes update their children here;
    /// the other kinds only update the pair and are refreshed by the caller.
    #[allow(clippy::too_many_arguments)]
    fn rematch(
        &mut self,
        node_id: NodeId,
        node: &Node,
        left: TupleId,
        right: TupleId,
        handle: FactId,
        fact: &Fact,
        was: bool,
        now: bool,
        change: Change,
    ) -> Result<()> {
        if let NodeKind::Join(_) = node.kind {
            match (was, now) {
                (true, true) => {
                    if change.is_some() {
                        for child in self.children_with_right(left, right) {
                            self.modify_left(child, change)?;
                        }
                    }
                }
                (false, true) => {
                    self.state.memories.beta_mut(node_id).link(left, right, Value::Nil);
                    self.spawn(node_id, node, left, Some(right), Some(handle), None)?;
                }
                (true, false) => {
                    self.state.memories.beta_mut(node_id).unlink(left, right);
                    for child in self.children_with_right(left, right) {
                        self.retract_left(child)?;
                    }
                }
                (false, false) => {}
            }
            return Ok(());
        }
        let memory = self.state.memories.beta_mut(node_id);
        if now {
            memory.link(left, right, extracted(node, fact));
        } else if was {
            memory.unlink(left, right);
        }
        Ok(())
    }

    /// Brings the output of a not, exists or accumulate node for one left
    /// tuple in line with its current matches.
    fn refresh(&mut self, node_id: NodeId, node: &Node, left: TupleId, mut change: Change) -> Result<()> {
        let Some(tuple) = self.state.tuples.left(left) else {
            return Ok(());
        };
        let has_children = !tuple.children.is_empty();
        let (wanted, accumulated) = self.gate(node_id, node, left)?;

        match (wanted, has_children) {
            (true, false) => self.spawn(node_id, node, left, None, None, accumulated),
            (false, true) => self.retract_children(left),
            (true, true) => {
                let children = self.children_of(left);
                if let Some(value) = accumulated {
                    for child in &children {
                        if let Some(t) = self.state.tuples.left_mut(*child) {
                            if t.accumulated.as_ref() != Some(&value) {
                                t.accumulated = Some(value.clone());
                                change.accumulated = true;
                            }
                        }
                    }
                }
                if change.is_some() {
                    for child in children {
                        self.modify_left(child, change)?;
                    }
                }
                Ok(())
            }
            (false, false) => Ok(()),
        }
    }

    /// Whether a not, exists or accumulate node lets a left tuple through,
    /// with the aggregate it carries.
    fn gate(&self, node_id: NodeId, node: &Node, left: TupleId) -> Result<(bool, Option<Value>)> {
        let memory = self.state.memories.beta(node_id);
        let count = memory.map_or(0, |m| m.match_count(left));
        match &node.kind {
            NodeKind::Not(_) => Ok((count == 0, None)),
            NodeKind::Exists(_) => Ok((count > 0, None)),
            NodeKind::Accumulate(_, spec) => {
                let values = memory.map(|m| m.values_of(left)).unwrap_or_default();
                let value = spec.function.combine(values.iter());
                let wanted = spec.filter.as_ref().is_none_or(|f| (f.test)(&value));
                Ok((wanted, Some(value)))
            }
            other => Err(Error::internal(format!(
                "{} node has no gated output",
                other.name()
            ))),
        }
    }

    // =========================================================================
    // Terminals
    // =========================================================================

    fn rule(&self, terminal: NodeId) -> Result<&'a CompiledRule> {
        self.base
            .rule(terminal)
            .ok_or_else(|| Error::network(format!("terminal {terminal:?} has no rule")))
    }

    fn terminal_assert(&mut self, terminal: NodeId, tuple: TupleId) -> Result<()> {
        let rule = self.rule(terminal)?;
        if !self.state.paths.is_rule_linked(terminal) {
            return Err(Error::network(format!(
                "match reached rule {} while its path is unlinked",
                rule.name
            )));
        }
        self.state.memories.add_terminal(terminal, tuple);
        if rule.no_loop && self.firing == Some(terminal) {
            tracing::trace!(rule = %rule.name, ?tuple, "no-loop suppressed activation");
            return Ok(());
        }
        self.activate(terminal, rule, tuple);
        Ok(())
    }

    fn terminal_retract(&mut self, terminal: NodeId, tuple: TupleId) {
        self.state.memories.remove_terminal(terminal, tuple);
        let activation = self.state.tuples.left(tuple).and_then(|t| t.activation);
        if let Some(cancelled) = activation.and_then(|a| self.agenda.cancel(a)) {
            self.stats.activations_cancelled += 1;
            self.record(TraceEvent::ActivationCancelled {
                activation: cancelled.id,
                rule: cancelled.rule_name,
            });
        }
        self.retracted.push(tuple);
    }

    fn terminal_modify(&mut self, terminal: NodeId, tuple: TupleId, change: Change) -> Result<()> {
        let rule = self.rule(terminal)?;
        let relevant = change.accumulated
            || change.fact.is_some_and(|(id, mask)| {
                self.state
                    .tuples
                    .chain(tuple)
                    .iter()
                    .enumerate()
                    .any(|(p, h)| {
                        *h == Some(id) && rule.listened.get(p).is_some_and(|m| m.intersects(mask))
                    })
            });
        if !relevant {
            self.stats.modifications_skipped += 1;
            return Ok(());
        }

        let pending = self
            .state
            .tuples
            .left(tuple)
            .and_then(|t| t.activation)
            .filter(|a| self.agenda.is_pending(*a));
        match pending {
            Some(activation) => {
                let (salience, recency) = self.priority(rule, tuple);
                self.agenda.reactivate(activation, salience, recency);
                tracing::trace!(rule = %rule.name, ?activation, "activation re-queued");
            }
            None => {
                if rule.no_loop && self.firing == Some(terminal) {
                    tracing::trace!(rule = %rule.name, ?tuple, "no-loop suppressed re-activation");
                    return Ok(());
                }
                self.activate(terminal, rule, tuple);
            }
        }
        Ok(())
    }

    fn priority(&self, rule: &CompiledRule, tuple: TupleId) -> (i32, u64) {
        let chain = self.state.tuples.chain(tuple);
        let recency = chain
            .iter()
            .flatten()
            .filter_map(|h| self.store.get(*h).ok())
            .map(|h| h.recency)
            .max()
            .unwrap_or(0);
        let salience = match &rule.salience {
            Salience::Static(n) => *n,
            Salience::Dynamic(f) => {
                let facts = self.facts_of(tuple);
                f(&MatchView::new(&facts, rule.offset))
            }
        };
        (salience, recency)
    }

    fn activate(&mut self, terminal: NodeId, rule: &CompiledRule, tuple: TupleId) {
        let (salience, recency) = self.priority(rule, tuple);
        let id = self.agenda.create(ActivationRequest {
            rule: terminal,
            rule_name: rule.name.clone(),
            tuple,
            salience,
            recency,
            group: rule.agenda_group.clone(),
            auto_focus: rule.auto_focus,
        });
        if let Some(t) = self.state.tuples.left_mut(tuple) {
            t.activation = Some(id);
        }
        self.stats.activations_created += 1;
        self.record(TraceEvent::ActivationCreated {
            activation: id,
            rule: rule.name.clone(),
        });
    }

    // =========================================================================
    // Linking and tracing
    // =========================================================================

    /// Sets a node's link bit, then brings the left memories along every
    /// rule path that changed in line with the new path state, root first.
    fn link(&mut self, node: NodeId, linked: bool) -> Result<()> {
        let changes = self.state.paths.set_node(self.base, node, linked);
        for change in &changes {
            tracing::debug!(rule = %change.rule, linked = change.linked, "rule path changed");
            let rule = change.rule.clone();
            let event = if change.linked {
                TraceEvent::PathLinked { rule }
            } else {
                TraceEvent::PathUnlinked { rule }
            };
            self.record(event);
        }
        for change in changes {
            let rule = self.rule(change.terminal)?;
            for sink in rule.inputs.iter().skip(1).chain([&rule.terminal]) {
                let active = self.state.paths.is_node_active(self.base, *sink);
                match (active, self.state.paths.is_materialized(*sink)) {
                    (true, false) => self.materialize(*sink)?,
                    (false, true) => self.dematerialize(*sink)?,
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Rebuilds the left memory of a node from its parent's.
    fn materialize(&mut self, sink: NodeId) -> Result<()> {
        self.state.paths.set_materialized(sink, true);
        let source = left_input(self.base.node(sink)?)?;
        let parent = self.base.node(source)?;
        tracing::trace!(?sink, ?source, "materializing left memory");
        if let NodeKind::LeftInputAdapter { .. } = parent.kind {
            for id in self.state.memories.adapter_facts(source) {
                self.root(source, sink, id)?;
            }
            return Ok(());
        }

        let lefts = self
            .state
            .memories
            .beta(source)
            .map(|m| m.left.ids())
            .unwrap_or_default();
        for left in lefts {
            if let NodeKind::Join(_) = parent.kind {
                let rights = self
                    .state
                    .memories
                    .beta(source)
                    .map(|m| m.matches_of(left))
                    .unwrap_or_default();
                for right in rights {
                    let handle = self.state.tuples.right(right).map(|r| r.handle);
                    self.spawn_into(source, sink, left, Some(right), handle, None)?;
                }
            } else {
                let (wanted, accumulated) = self.gate(source, parent, left)?;
                if wanted {
                    self.spawn_into(source, sink, left, None, None, accumulated)?;
                }
            }
        }
        Ok(())
    }

    /// Drops the left memory of a node no linked path crosses.
    fn dematerialize(&mut self, sink: NodeId) -> Result<()> {
        self.state.paths.set_materialized(sink, false);
        let tuples = match self.base.node(sink)?.kind {
            NodeKind::Terminal { .. } => self.state.memories.terminal_tuples(sink),
            _ => self
                .state
                .memories
                .beta(sink)
                .map(|m| m.left.ids())
                .unwrap_or_default(),
        };
        tracing::trace!(?sink, tuples = tuples.len(), "dropping left memory");
        for tuple in tuples {
            let root = self
                .state
                .tuples
                .left(tuple)
                .filter(|t| t.parent.is_none())
                .and_then(|t| t.handle);
            if let Some(id) = root {
                self.state.memories.forget_root(id, tuple);
            }
            self.retract_left(tuple)?;
        }
        Ok(())
    }

    fn record(&mut self, event: TraceEvent) {
        if let Some(trace) = self.trace.as_deref_mut() {
            trace.push(self.cycle, event);
        }
    }
}

fn beta_of(node: &Node) -> Result<&BetaNode> {
    node.kind.beta().ok_or_else(|| {
        Error::internal(format!(
            "{} node {:?} has no beta memory",
            node.kind.name(),
            node.id
        ))
    })
}

fn left_input(node: &Node) -> Result<NodeId> {
    match &node.kind {
        NodeKind::Terminal { left, .. } => Ok(*left),
        kind => kind.beta().map(|b| b.left).ok_or_else(|| {
            Error::internal(format!("{} node {:?} has no left input", kind.name(), node.id))
        }),
    }
}

fn links_on_right(node: &Node) -> bool {
    matches!(node.kind, NodeKind::Join(_) | NodeKind::Exists(_))
}

fn extracted(node: &Node, fact: &Fact) -> Value {
    match &node.kind {
        NodeKind::Accumulate(_, spec) => spec.function.extract(fact),
        _ => Value::Nil,
    }
}
