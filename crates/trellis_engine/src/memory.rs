//! Per-session node memories.
//!
//! Beta nodes keep an indexed left memory of partial matches and an indexed
//! right memory of candidate facts, plus the pairs known to match. Terminal
//! nodes keep the full matches they hold. Every handle keeps a record of the
//! alpha nodes it passed and the tuples it rooted, so deletes and
//! modifications reach exactly the memories the fact is in.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use trellis_foundation::{FactId, Value};

use crate::index::TupleIndex;
use crate::network::NodeId;
use crate::tuple::TupleId;

/// Memory of one join, not, exists or accumulate node.
#[derive(Debug, Default)]
pub struct BetaMemory {
    /// Partial matches waiting on the right input.
    pub left: TupleIndex<TupleId>,
    /// Facts entering from the right input.
    pub right: TupleIndex<TupleId>,
    matched: HashMap<TupleId, BTreeMap<TupleId, Value>>,
    matched_by: HashMap<TupleId, BTreeSet<TupleId>>,
}

impl BetaMemory {
    /// Creates an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `right` matches `left`, with the value it contributes to
    /// an aggregate (nil for other node kinds). Returns true if the pair is new.
    pub fn link(&mut self, left: TupleId, right: TupleId, value: Value) -> bool {
        let added = self
            .matched
            .entry(left)
            .or_default()
            .insert(right, value)
            .is_none();
        self.matched_by.entry(right).or_default().insert(left);
        added
    }

    /// Forgets a matching pair. Returns true if it was recorded.
    pub fn unlink(&mut self, left: TupleId, right: TupleId) -> bool {
        let removed = match self.matched.get_mut(&left) {
            Some(rights) => {
                let removed = rights.remove(&right).is_some();
                if rights.is_empty() {
                    self.matched.remove(&left);
                }
                removed
            }
            None => false,
        };
        if let Some(lefts) = self.matched_by.get_mut(&right) {
            lefts.remove(&left);
            if lefts.is_empty() {
                self.matched_by.remove(&right);
            }
        }
        removed
    }

    /// Returns true if the pair is recorded as matching.
    #[must_use]
    pub fn is_linked(&self, left: TupleId, right: TupleId) -> bool {
        self.matched
            .get(&left)
            .is_some_and(|rights| rights.contains_key(&right))
    }

    /// Right tuples matching a left tuple, in creation order.
    #[must_use]
    pub fn matches_of(&self, left: TupleId) -> Vec<TupleId> {
        self.matched
            .get(&left)
            .map(|rights| rights.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Number of right tuples matching a left tuple.
    #[must_use]
    pub fn match_count(&self, left: TupleId) -> usize {
        self.matched.get(&left).map_or(0, BTreeMap::len)
    }

    /// Aggregate inputs of a left tuple, in right creation order.
    #[must_use]
    pub fn values_of(&self, left: TupleId) -> Vec<Value> {
        self.matched
            .get(&left)
            .map(|rights| rights.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Left tuples a right tuple matches, in creation order.
    #[must_use]
    pub fn matched_by(&self, right: TupleId) -> Vec<TupleId> {
        self.matched_by
            .get(&right)
            .map(|lefts| lefts.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drops a left tuple and every pair it is part of.
    pub fn remove_left(&mut self, left: TupleId) {
        self.left.remove(left);
        if let Some(rights) = self.matched.remove(&left) {
            for right in rights.keys() {
                if let Some(lefts) = self.matched_by.get_mut(right) {
                    lefts.remove(&left);
                    if lefts.is_empty() {
                        self.matched_by.remove(right);
                    }
                }
            }
        }
    }

    /// Drops a right tuple and every pair it is part of. Returns the left
    /// tuples it matched.
    pub fn remove_right(&mut self, right: TupleId) -> Vec<TupleId> {
        self.right.remove(right);
        let lefts: Vec<TupleId> = self
            .matched_by
            .remove(&right)
            .map(|lefts| lefts.into_iter().collect())
            .unwrap_or_default();
        for left in &lefts {
            if let Some(rights) = self.matched.get_mut(left) {
                rights.remove(&right);
                if rights.is_empty() {
                    self.matched.remove(left);
                }
            }
        }
        lefts
    }

    /// Returns true if the memory holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty() && self.matched.is_empty()
    }
}

/// Where one handle sits in the network.
#[derive(Clone, Debug, Default)]
pub struct HandleRecord {
    /// Object-type and alpha nodes the fact passed.
    pub passed: HashSet<NodeId>,
    /// Adapters the fact entered.
    pub adapters: Vec<NodeId>,
    /// Tuples rooted by the fact, per adapter sink.
    pub roots: Vec<(NodeId, TupleId)>,
    /// Right tuples wrapping the fact, per beta node.
    pub right: Vec<(NodeId, TupleId)>,
}

/// All node memories of a session.
#[derive(Debug, Default)]
pub struct Memories {
    beta: HashMap<NodeId, BetaMemory>,
    terminals: HashMap<NodeId, BTreeSet<TupleId>>,
    adapters: HashMap<NodeId, AdapterMemory>,
    handles: HashMap<FactId, HandleRecord>,
    arrivals: u64,
}

/// Facts that passed one adapter, in arrival order.
#[derive(Debug, Default)]
struct AdapterMemory {
    order: BTreeMap<u64, FactId>,
    arrival: HashMap<FactId, u64>,
}

impl Memories {
    /// Creates empty memories.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory of a beta node, created on first use.
    pub fn beta_mut(&mut self, node: NodeId) -> &mut BetaMemory {
        self.beta.entry(node).or_default()
    }

    /// Memory of a beta node, if it has been used.
    #[must_use]
    pub fn beta(&self, node: NodeId) -> Option<&BetaMemory> {
        self.beta.get(&node)
    }

    /// Records a full match at a terminal.
    pub fn add_terminal(&mut self, node: NodeId, tuple: TupleId) {
        self.terminals.entry(node).or_default().insert(tuple);
    }

    /// Forgets a full match. Returns true if it was held.
    pub fn remove_terminal(&mut self, node: NodeId, tuple: TupleId) -> bool {
        self.terminals
            .get_mut(&node)
            .is_some_and(|tuples| tuples.remove(&tuple))
    }

    /// Full matches held by a terminal, in creation order.
    #[must_use]
    pub fn terminal_tuples(&self, node: NodeId) -> Vec<TupleId> {
        self.terminals
            .get(&node)
            .map(|t| t.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Records a fact passing an adapter. Returns how many facts the
    /// adapter now holds.
    pub fn adapter_enter(&mut self, node: NodeId, id: FactId) -> usize {
        self.arrivals += 1;
        let memory = self.adapters.entry(node).or_default();
        if let Entry::Vacant(entry) = memory.arrival.entry(id) {
            entry.insert(self.arrivals);
            memory.order.insert(self.arrivals, id);
        }
        memory.order.len()
    }

    /// Records a fact leaving an adapter. Returns how many facts remain.
    pub fn adapter_exit(&mut self, node: NodeId, id: FactId) -> usize {
        let Some(memory) = self.adapters.get_mut(&node) else {
            return 0;
        };
        if let Some(arrival) = memory.arrival.remove(&id) {
            memory.order.remove(&arrival);
        }
        let remaining = memory.order.len();
        if remaining == 0 {
            self.adapters.remove(&node);
        }
        remaining
    }

    /// Facts held by an adapter, oldest first.
    #[must_use]
    pub fn adapter_facts(&self, node: NodeId) -> Vec<FactId> {
        self.adapters
            .get(&node)
            .map(|m| m.order.values().copied().collect())
            .unwrap_or_default()
    }

    /// Record of a handle, created on first use.
    pub fn handle_mut(&mut self, id: FactId) -> &mut HandleRecord {
        self.handles.entry(id).or_default()
    }

    /// Drops a root tuple from its handle's record.
    pub fn forget_root(&mut self, id: FactId, tuple: TupleId) {
        if let Some(record) = self.handles.get_mut(&id) {
            record.roots.retain(|(_, t)| *t != tuple);
        }
    }

    /// Record of a handle.
    #[must_use]
    pub fn handle(&self, id: FactId) -> Option<&HandleRecord> {
        self.handles.get(&id)
    }

    /// Removes and returns a handle's record.
    pub fn take_handle(&mut self, id: FactId) -> Option<HandleRecord> {
        self.handles.remove(&id)
    }

    /// Returns true if no memory holds anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.beta.values().all(BetaMemory::is_empty)
            && self.terminals.values().all(BTreeSet::is_empty)
            && self.adapters.is_empty()
            && self.handles.is_empty()
    }
}
