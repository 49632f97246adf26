//! Truth maintenance for logically inserted facts.
//!
//! Each equality key may carry a [`BeliefSet`]: the matches whose consequences
//! justified (or negatively justified) the key's fact. A key's fact is
//! believed while it has at least one positive justification and no negative
//! one. Stated facts dominate: justifications recorded against a stated key
//! are kept but never remove it.
//!
//! This module only does the bookkeeping. It reports [`BeliefChange`]s and the
//! session turns them into inserts and retractions once propagation settles.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use trellis_foundation::FactId;

use crate::store::KeyId;
use crate::tuple::TupleId;

/// Direction of a justification.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Polarity {
    /// The match supports the fact being present.
    Positive,
    /// The match supports the fact being absent.
    Negative,
}

/// Justifications supporting one key.
#[derive(Clone, Debug, Default)]
pub struct BeliefSet {
    /// Positive justifications by match, with the facts each match used.
    positive: BTreeMap<TupleId, Vec<FactId>>,
    /// Negative justifications by match.
    negative: BTreeSet<TupleId>,
}

impl BeliefSet {
    /// Returns true if the fact should be present.
    #[must_use]
    pub fn is_believed(&self) -> bool {
        !self.positive.is_empty() && self.negative.is_empty()
    }

    /// Returns true if positive and negative support coexist.
    #[must_use]
    pub fn is_conflicted(&self) -> bool {
        !self.positive.is_empty() && !self.negative.is_empty()
    }

    /// Returns true if only negative support exists.
    #[must_use]
    pub fn is_justified_absence(&self) -> bool {
        self.positive.is_empty() && !self.negative.is_empty()
    }

    /// Number of positive justifications.
    #[must_use]
    pub fn positive_len(&self) -> usize {
        self.positive.len()
    }

    /// Number of negative justifications.
    #[must_use]
    pub fn negative_len(&self) -> usize {
        self.negative.len()
    }

    fn is_empty(&self) -> bool {
        self.positive.is_empty() && self.negative.is_empty()
    }
}

/// What a justification change did to a key's belief.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BeliefChange {
    /// Belief unchanged.
    Unchanged,
    /// The fact became believed and should be inserted unless stated.
    Asserted,
    /// The fact stopped being believed and should be retracted unless stated.
    Retracted,
}

impl BeliefChange {
    fn between(before: bool, after: bool) -> Self {
        match (before, after) {
            (false, true) => Self::Asserted,
            (true, false) => Self::Retracted,
            _ => Self::Unchanged,
        }
    }
}

/// Belief bookkeeping for one session.
#[derive(Debug, Default)]
pub struct TruthMaintenance {
    beliefs: HashMap<KeyId, BeliefSet>,
    dependencies: HashMap<TupleId, Vec<(KeyId, Polarity)>>,
    needs_sweep: bool,
}

impl TruthMaintenance {
    /// Creates empty bookkeeping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `match_id` justifies `key` with the given polarity.
    ///
    /// `support` lists the facts the match was built from. Recording the same
    /// justification twice is a no-op.
    pub fn assert_logical(
        &mut self,
        key: KeyId,
        match_id: TupleId,
        polarity: Polarity,
        support: Vec<FactId>,
    ) -> BeliefChange {
        let set = self.beliefs.entry(key).or_default();
        let before = set.is_believed();
        let added = match polarity {
            Polarity::Positive => set.positive.insert(match_id, support).is_none(),
            Polarity::Negative => set.negative.insert(match_id),
        };
        let after = set.is_believed();
        if added {
            self.dependencies
                .entry(match_id)
                .or_default()
                .push((key, polarity));
        }
        BeliefChange::between(before, after)
    }

    /// Removes one justification.
    ///
    /// Removing a justification that was never recorded is logged and ignored.
    pub fn remove_justification(
        &mut self,
        key: KeyId,
        match_id: TupleId,
        polarity: Polarity,
    ) -> BeliefChange {
        let change = self.remove_entry(key, match_id, polarity);
        if let Some(deps) = self.dependencies.get_mut(&match_id) {
            deps.retain(|d| *d != (key, polarity));
            if deps.is_empty() {
                self.dependencies.remove(&match_id);
            }
        }
        change.unwrap_or_else(|| {
            tracing::warn!(?key, ?match_id, ?polarity, "removing unknown justification");
            BeliefChange::Unchanged
        })
    }

    fn remove_entry(
        &mut self,
        key: KeyId,
        match_id: TupleId,
        polarity: Polarity,
    ) -> Option<BeliefChange> {
        let set = self.beliefs.get_mut(&key)?;
        let before = set.is_believed();
        let removed = match polarity {
            Polarity::Positive => set.positive.remove(&match_id).is_some(),
            Polarity::Negative => set.negative.remove(&match_id),
        };
        if !removed {
            return None;
        }
        let after = set.is_believed();
        if after && polarity == Polarity::Positive {
            // Remaining support may be circular.
            self.needs_sweep = true;
        }
        if set.is_empty() {
            self.beliefs.remove(&key);
        }
        Some(BeliefChange::between(before, after))
    }

    /// Removes every justification contributed by a match.
    pub fn retract_match(&mut self, match_id: TupleId) -> Vec<(KeyId, BeliefChange)> {
        let Some(deps) = self.dependencies.remove(&match_id) else {
            return Vec::new();
        };
        deps.into_iter()
            .filter_map(|(key, polarity)| {
                self.remove_entry(key, match_id, polarity)
                    .map(|change| (key, change))
            })
            .collect()
    }

    /// Justifications a match currently contributes.
    #[must_use]
    pub fn justifications_of(&self, match_id: TupleId) -> Vec<(KeyId, Polarity)> {
        self.dependencies
            .get(&match_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops a key's belief set entirely.
    pub fn detach(&mut self, key: KeyId) {
        let Some(set) = self.beliefs.remove(&key) else {
            return;
        };
        let matches = set.positive.keys().chain(set.negative.iter());
        for match_id in matches {
            if let Some(deps) = self.dependencies.get_mut(match_id) {
                deps.retain(|(k, _)| *k != key);
                if deps.is_empty() {
                    self.dependencies.remove(match_id);
                }
            }
        }
    }

    /// Moves a belief set to another key, merging with any set already there.
    pub fn rekey(&mut self, from: KeyId, to: KeyId) {
        if from == to {
            return;
        }
        let Some(set) = self.beliefs.remove(&from) else {
            return;
        };
        for deps in self.dependencies.values_mut() {
            for (k, _) in deps.iter_mut() {
                if *k == from {
                    *k = to;
                }
            }
            let mut seen = HashSet::new();
            deps.retain(|d| seen.insert(*d));
        }
        let target = self.beliefs.entry(to).or_default();
        target.positive.extend(set.positive);
        target.negative.extend(set.negative);
    }

    /// Returns the belief set of a key.
    #[must_use]
    pub fn belief(&self, key: KeyId) -> Option<&BeliefSet> {
        self.beliefs.get(&key)
    }

    /// Returns true if the key carries any justification.
    #[must_use]
    pub fn has_beliefs(&self, key: KeyId) -> bool {
        self.beliefs.contains_key(&key)
    }

    /// Returns true if the key is currently believed.
    #[must_use]
    pub fn is_believed(&self, key: KeyId) -> bool {
        self.beliefs.get(&key).is_some_and(BeliefSet::is_believed)
    }

    /// Keys supported only negatively.
    #[must_use]
    pub fn justified_absences(&self) -> Vec<KeyId> {
        let mut keys: Vec<KeyId> = self
            .beliefs
            .iter()
            .filter(|(_, set)| set.is_justified_absence())
            .map(|(k, _)| *k)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Takes the flag set when a positive justification was removed from a
    /// key that stayed believed.
    pub fn take_sweep_request(&mut self) -> bool {
        std::mem::take(&mut self.needs_sweep)
    }

    /// Finds believed justified keys without well-founded support.
    ///
    /// `justified` maps each key whose fact exists only through justification
    /// to its handle; every other live fact counts as grounded. A key is
    /// supported when one of its positive justifications was built entirely
    /// from grounded facts or facts of supported keys. The least such set is
    /// computed by iteration to a fixpoint, so support cycles with no
    /// grounded entry are reported.
    #[must_use]
    pub fn unsupported(&self, justified: &HashMap<KeyId, FactId>) -> Vec<KeyId> {
        let candidate_facts: HashSet<FactId> = justified
            .iter()
            .filter(|(k, _)| self.is_believed(**k))
            .map(|(_, f)| *f)
            .collect();
        let mut supported: HashSet<FactId> = HashSet::new();

        loop {
            let mut changed = false;
            for (key, fact) in justified {
                if !candidate_facts.contains(fact) || supported.contains(fact) {
                    continue;
                }
                let Some(set) = self.beliefs.get(key) else {
                    continue;
                };
                let grounded = set.positive.values().any(|support| {
                    support
                        .iter()
                        .all(|f| !candidate_facts.contains(f) || supported.contains(f))
                });
                if grounded {
                    supported.insert(*fact);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut unsupported: Vec<KeyId> = justified
            .iter()
            .filter(|(_, f)| candidate_facts.contains(f) && !supported.contains(f))
            .map(|(k, _)| *k)
            .collect();
        unsupported.sort_unstable();
        unsupported
    }
}
