//! Hash indexes for beta memories.
//!
//! An equality join between two fields whose declared types hash stably is
//! answered from a hash bucket instead of a scan. Several such joins on one
//! node form a composite key. Every other constraint is evaluated per
//! candidate, cheapest first.

use std::collections::{BTreeSet, HashMap};

use trellis_foundation::{Fact, FieldId, Value};

use crate::constraint::{BetaConstraint, MatchView};

/// Bucket key of a tuple.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IndexKey {
    /// The node is not indexed; every tuple shares one bucket.
    Unit,
    /// One indexed field.
    Single(Value),
    /// Several indexed fields, in index order.
    Composite(Vec<Value>),
}

impl IndexKey {
    fn from_values(mut values: Vec<Value>) -> Self {
        match values.len() {
            0 => Self::Unit,
            1 => Self::Single(values.pop().unwrap_or(Value::Nil)),
            _ => Self::Composite(values),
        }
    }
}

/// One indexed equality: `conditions[left].left_field == right.right_field`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IndexedField {
    /// Earlier condition.
    pub left: usize,
    /// Field of the earlier fact.
    pub left_field: FieldId,
    /// Field of the candidate fact.
    pub right_field: FieldId,
}

/// Which equalities of a beta node are answered by its index.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct IndexSpec {
    fields: Vec<IndexedField>,
}

impl IndexSpec {
    /// Splits a node's constraints into indexed equalities and the residual
    /// constraints, sorted by cost.
    ///
    /// `stable(left, left_field, right_field)` reports whether both fields
    /// have a cheap stable hash.
    pub fn select(
        constraints: &[BetaConstraint],
        enabled: bool,
        stable: impl Fn(usize, FieldId, FieldId) -> bool,
    ) -> (Self, Vec<BetaConstraint>) {
        let mut fields = Vec::new();
        let mut rest = Vec::new();
        for constraint in constraints {
            match constraint {
                BetaConstraint::Equal {
                    left,
                    left_field,
                    right_field,
                } if enabled && stable(*left, *left_field, *right_field) => {
                    fields.push(IndexedField {
                        left: *left,
                        left_field: *left_field,
                        right_field: *right_field,
                    });
                }
                other => rest.push(other.clone()),
            }
        }
        rest.sort_by_key(BetaConstraint::cost);
        (Self { fields }, rest)
    }

    /// Returns true if the node has no index.
    #[must_use]
    pub fn is_unit(&self) -> bool {
        self.fields.is_empty()
    }

    /// The indexed equalities.
    #[must_use]
    pub fn fields(&self) -> &[IndexedField] {
        &self.fields
    }

    /// Key of a partial match.
    #[must_use]
    pub fn left_key(&self, view: &MatchView<'_>) -> IndexKey {
        IndexKey::from_values(
            self.fields
                .iter()
                .map(|f| {
                    view.fact(f.left)
                        .map_or(Value::Nil, |fact| fact.get(f.left_field).clone())
                })
                .collect(),
        )
    }

    /// Key of a candidate fact.
    #[must_use]
    pub fn right_key(&self, fact: &Fact) -> IndexKey {
        IndexKey::from_values(
            self.fields
                .iter()
                .map(|f| fact.get(f.right_field).clone())
                .collect(),
        )
    }
}

/// Tuples of one memory grouped by key.
#[derive(Clone, Debug)]
pub struct TupleIndex<T: Copy + Ord + std::hash::Hash> {
    buckets: HashMap<IndexKey, BTreeSet<T>>,
    keys: HashMap<T, IndexKey>,
}

impl<T: Copy + Ord + std::hash::Hash> Default for TupleIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy + Ord + std::hash::Hash> TupleIndex<T> {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    /// Adds a tuple under a key.
    pub fn insert(&mut self, id: T, key: IndexKey) {
        self.remove(id);
        self.buckets.entry(key.clone()).or_default().insert(id);
        self.keys.insert(id, key);
    }

    /// Removes a tuple. Returns false if it was absent.
    pub fn remove(&mut self, id: T) -> bool {
        let Some(key) = self.keys.remove(&id) else {
            return false;
        };
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.remove(&id);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
        true
    }

    /// Moves a tuple to a new key. Returns true if the key changed.
    pub fn rekey(&mut self, id: T, key: IndexKey) -> bool {
        if self.keys.get(&id) == Some(&key) {
            return false;
        }
        self.insert(id, key);
        true
    }

    /// Tuples sharing `key`, in creation order.
    #[must_use]
    pub fn bucket(&self, key: &IndexKey) -> Vec<T> {
        self.buckets
            .get(key)
            .map(|b| b.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every indexed tuple, in creation order.
    #[must_use]
    pub fn ids(&self) -> Vec<T> {
        let mut ids: Vec<T> = self.keys.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns true if the tuple is indexed.
    #[must_use]
    pub fn contains(&self, id: T) -> bool {
        self.keys.contains_key(&id)
    }

    /// Number of tuples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if no tuple is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
