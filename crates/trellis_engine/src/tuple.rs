//! Left and right tuples and the arena that owns them.
//!
//! A left tuple is one step of a partial match: it points at its parent (the
//! match so far) and adds at most one fact. Walking the parent chain yields
//! the full match. A right tuple wraps one fact entering a beta node's right
//! input. Tuples reference each other by [`TupleId`]; ids are never reused, so
//! a terminal tuple's id doubles as the identity of a rule match.

use std::collections::HashMap;

use trellis_foundation::{FactId, Value};

use crate::agenda::ActivationId;
use crate::network::NodeId;

/// Tuple identifier.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TupleId(u64);

impl TupleId {
    /// Creates an id from its raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A partial match held in the left memory of `sink`.
#[derive(Clone, Debug)]
pub struct LeftTuple {
    /// Node whose left input holds this tuple.
    pub sink: NodeId,
    /// Node that produced it.
    pub source: NodeId,
    /// The match this tuple extends. `None` for tuples made by an adapter.
    pub parent: Option<TupleId>,
    /// Right tuple joined to produce it.
    pub right: Option<TupleId>,
    /// Fact added at this position, if the position binds one.
    pub handle: Option<FactId>,
    /// Aggregate value for accumulate positions.
    pub accumulated: Option<Value>,
    /// Tuples this one produced downstream.
    pub children: Vec<TupleId>,
    /// Pending activation, for tuples held by a terminal.
    pub activation: Option<ActivationId>,
}

/// A fact in the right memory of `node`.
#[derive(Clone, Debug)]
pub struct RightTuple {
    /// Beta node owning the tuple.
    pub node: NodeId,
    /// The wrapped fact.
    pub handle: FactId,
    /// Left tuples produced by joining with this one.
    pub children: Vec<TupleId>,
}

/// Owner of every tuple in a session.
#[derive(Debug, Default)]
pub struct TupleArena {
    left: HashMap<TupleId, LeftTuple>,
    right: HashMap<TupleId, RightTuple>,
    next: u64,
}

impl TupleArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> TupleId {
        let id = TupleId(self.next);
        self.next += 1;
        id
    }

    /// Stores a left tuple.
    pub fn add_left(&mut self, tuple: LeftTuple) -> TupleId {
        let id = self.next_id();
        self.left.insert(id, tuple);
        id
    }

    /// Stores a right tuple.
    pub fn add_right(&mut self, tuple: RightTuple) -> TupleId {
        let id = self.next_id();
        self.right.insert(id, tuple);
        id
    }

    /// Looks up a left tuple.
    #[must_use]
    pub fn left(&self, id: TupleId) -> Option<&LeftTuple> {
        self.left.get(&id)
    }

    /// Looks up a left tuple mutably.
    pub fn left_mut(&mut self, id: TupleId) -> Option<&mut LeftTuple> {
        self.left.get_mut(&id)
    }

    /// Looks up a right tuple.
    #[must_use]
    pub fn right(&self, id: TupleId) -> Option<&RightTuple> {
        self.right.get(&id)
    }

    /// Looks up a right tuple mutably.
    pub fn right_mut(&mut self, id: TupleId) -> Option<&mut RightTuple> {
        self.right.get_mut(&id)
    }

    /// Frees a left tuple. It must already be unlinked from every memory.
    pub fn free_left(&mut self, id: TupleId) -> Option<LeftTuple> {
        self.left.remove(&id)
    }

    /// Frees a right tuple. It must already be unlinked from every memory.
    pub fn free_right(&mut self, id: TupleId) -> Option<RightTuple> {
        self.right.remove(&id)
    }

    /// Returns true if the left tuple is live.
    #[must_use]
    pub fn contains_left(&self, id: TupleId) -> bool {
        self.left.contains_key(&id)
    }

    /// Positions of a match, root first. Positions without a fact are `None`.
    #[must_use]
    pub fn chain(&self, id: TupleId) -> Vec<Option<FactId>> {
        let mut handles = Vec::new();
        let mut cursor = Some(id);
        while let Some(t) = cursor.and_then(|c| self.left.get(&c)) {
            handles.push(t.handle);
            cursor = t.parent;
        }
        handles.reverse();
        handles
    }

    /// Aggregate values of a match by position, root first.
    #[must_use]
    pub fn accumulated(&self, id: TupleId) -> Vec<Option<Value>> {
        let mut values = Vec::new();
        let mut cursor = Some(id);
        while let Some(t) = cursor.and_then(|c| self.left.get(&c)) {
            values.push(t.accumulated.clone());
            cursor = t.parent;
        }
        values.reverse();
        values
    }

    /// Returns true if the match already binds `handle`.
    #[must_use]
    pub fn chain_contains(&self, id: TupleId, handle: FactId) -> bool {
        let mut cursor = Some(id);
        while let Some(t) = cursor.and_then(|c| self.left.get(&c)) {
            if t.handle == Some(handle) {
                return true;
            }
            cursor = t.parent;
        }
        false
    }

    /// Number of live left tuples.
    #[must_use]
    pub fn left_len(&self) -> usize {
        self.left.len()
    }

    /// Number of live right tuples.
    #[must_use]
    pub fn right_len(&self) -> usize {
        self.right.len()
    }
}
