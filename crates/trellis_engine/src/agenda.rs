//! The agenda: pending activations, conflict resolution and focus.
//!
//! Activations live in named agenda groups. Groups form a focus stack with
//! the main group at the bottom; only the group on top fires, and an empty
//! group is popped so that firing falls back to the one below. Within a
//! group the highest salience fires first and the session's
//! [`ConflictStrategy`] breaks ties.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::config::ConflictStrategy;
use crate::network::NodeId;
use crate::rule::MAIN_GROUP;
use crate::tuple::TupleId;

/// Activation identifier.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivationId(u64);

impl ActivationId {
    /// Returns the raw value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// Lifecycle of an activation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ActivationState {
    /// Waiting on the agenda.
    Pending,
    /// Its consequence is running.
    Executing,
    /// Its consequence has run.
    Fired,
    /// Removed before firing.
    Cancelled,
}

/// A rule match scheduled to fire.
#[derive(Clone, Debug)]
pub struct Activation {
    /// Identifier.
    pub id: ActivationId,
    /// Terminal node of the rule.
    pub rule: NodeId,
    /// Rule name.
    pub rule_name: Arc<str>,
    /// The full match.
    pub tuple: TupleId,
    /// Priority.
    pub salience: i32,
    /// Trigger order.
    pub sequence: u64,
    /// Recency of the newest fact in the match.
    pub recency: u64,
    /// Agenda group.
    pub group: Arc<str>,
    /// Lifecycle state.
    pub state: ActivationState,
}

/// What an activation is created from.
#[derive(Clone, Debug)]
pub struct ActivationRequest {
    /// Terminal node of the rule.
    pub rule: NodeId,
    /// Rule name.
    pub rule_name: Arc<str>,
    /// The full match.
    pub tuple: TupleId,
    /// Priority.
    pub salience: i32,
    /// Recency of the newest fact in the match.
    pub recency: u64,
    /// Agenda group.
    pub group: Arc<str>,
    /// Push the group onto the focus stack.
    pub auto_focus: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    salience: Reverse<i32>,
    primary: u64,
    secondary: u64,
    id: ActivationId,
}

/// Pending activations of one session.
#[derive(Debug)]
pub struct Agenda {
    strategy: ConflictStrategy,
    groups: HashMap<Arc<str>, BTreeSet<QueueKey>>,
    activations: HashMap<ActivationId, (Activation, QueueKey)>,
    focus: Vec<Arc<str>>,
    next_id: u64,
    next_sequence: u64,
}

impl Agenda {
    /// Creates an empty agenda with the main group focused.
    #[must_use]
    pub fn new(strategy: ConflictStrategy) -> Self {
        let main: Arc<str> = MAIN_GROUP.into();
        let mut groups = HashMap::new();
        groups.insert(Arc::clone(&main), BTreeSet::new());
        Self {
            strategy,
            groups,
            activations: HashMap::new(),
            focus: vec![main],
            next_id: 0,
            next_sequence: 0,
        }
    }

    fn key(&mut self, id: ActivationId, salience: i32, recency: u64) -> (u64, QueueKey) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let (primary, secondary) = match self.strategy {
            ConflictStrategy::Fifo => (sequence, 0),
            ConflictStrategy::Lifo => (u64::MAX - sequence, 0),
            ConflictStrategy::FactRecency => (u64::MAX - recency, sequence),
        };
        let key = QueueKey {
            salience: Reverse(salience),
            primary,
            secondary,
            id,
        };
        (sequence, key)
    }

    /// Adds a pending activation.
    pub fn create(&mut self, request: ActivationRequest) -> ActivationId {
        let id = ActivationId(self.next_id);
        self.next_id += 1;
        let (sequence, key) = self.key(id, request.salience, request.recency);
        if request.auto_focus {
            self.set_focus(&request.group);
        }
        self.groups
            .entry(Arc::clone(&request.group))
            .or_default()
            .insert(key);
        let activation = Activation {
            id,
            rule: request.rule,
            rule_name: request.rule_name,
            tuple: request.tuple,
            salience: request.salience,
            sequence,
            recency: request.recency,
            group: request.group,
            state: ActivationState::Pending,
        };
        tracing::trace!(?id, rule = %activation.rule_name, "activation created");
        self.activations.insert(id, (activation, key));
        id
    }

    /// Removes a pending activation. Returns it if it was pending.
    pub fn cancel(&mut self, id: ActivationId) -> Option<Activation> {
        let (mut activation, key) = self.activations.remove(&id)?;
        if let Some(queue) = self.groups.get_mut(&activation.group) {
            queue.remove(&key);
        }
        activation.state = ActivationState::Cancelled;
        Some(activation)
    }

    /// Re-queues a pending activation as if it had just been triggered.
    /// Returns false if it is not pending.
    pub fn reactivate(&mut self, id: ActivationId, salience: i32, recency: u64) -> bool {
        let Some((activation, old)) = self.activations.remove(&id) else {
            return false;
        };
        if let Some(queue) = self.groups.get_mut(&activation.group) {
            queue.remove(&old);
        }
        let (sequence, key) = self.key(id, salience, recency);
        let activation = Activation {
            salience,
            recency,
            sequence,
            ..activation
        };
        self.groups
            .entry(Arc::clone(&activation.group))
            .or_default()
            .insert(key);
        self.activations.insert(id, (activation, key));
        true
    }

    /// Returns true if the activation is pending.
    #[must_use]
    pub fn is_pending(&self, id: ActivationId) -> bool {
        self.activations.contains_key(&id)
    }

    /// Looks up a pending activation.
    #[must_use]
    pub fn get(&self, id: ActivationId) -> Option<&Activation> {
        self.activations.get(&id).map(|(a, _)| a)
    }

    /// Takes the next activation to fire, popping exhausted groups off the
    /// focus stack. The main group is never popped.
    pub fn next(&mut self) -> Option<Activation> {
        loop {
            let top = Arc::clone(self.focus.last()?);
            let first = self.groups.get_mut(&top).and_then(BTreeSet::pop_first);
            if let Some(key) = first {
                let (mut activation, _) = self.activations.remove(&key.id)?;
                activation.state = ActivationState::Executing;
                return Some(activation);
            }
            if self.focus.len() == 1 {
                return None;
            }
            tracing::trace!(group = %top, "agenda group exhausted");
            self.focus.pop();
        }
    }

    /// Focuses a group, unless it is already on top.
    pub fn set_focus(&mut self, group: &str) {
        if self.focus.last().is_some_and(|g| g.as_ref() == group) {
            return;
        }
        let group: Arc<str> = group.into();
        self.groups.entry(Arc::clone(&group)).or_default();
        self.focus.push(group);
    }

    /// Cancels every pending activation.
    pub fn clear(&mut self) -> Vec<Activation> {
        let mut ids: Vec<ActivationId> = self.activations.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.cancel(id)).collect()
    }

    /// Cancels every pending activation of one group.
    pub fn clear_group(&mut self, group: &str) -> Vec<Activation> {
        let Some(queue) = self.groups.get_mut(group) else {
            return Vec::new();
        };
        let keys = std::mem::take(queue);
        keys.into_iter()
            .filter_map(|key| self.activations.remove(&key.id))
            .map(|(mut a, _)| {
                a.state = ActivationState::Cancelled;
                a
            })
            .collect()
    }

    /// Pending activations, in firing order within each group.
    #[must_use]
    pub fn pending(&self) -> Vec<&Activation> {
        let mut pending: Vec<&(Activation, QueueKey)> = self.activations.values().collect();
        pending.sort_by(|(a, ka), (b, kb)| a.group.cmp(&b.group).then(ka.cmp(kb)));
        pending.into_iter().map(|(a, _)| a).collect()
    }

    /// Number of pending activations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.activations.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.activations.is_empty()
    }

    /// Names of known agenda groups, sorted.
    #[must_use]
    pub fn agenda_groups(&self) -> Vec<Arc<str>> {
        let mut groups: Vec<Arc<str>> = self.groups.keys().cloned().collect();
        groups.sort();
        groups
    }

    /// The focus stack, bottom first.
    #[must_use]
    pub fn focus_stack(&self) -> &[Arc<str>] {
        &self.focus
    }

    /// The focused group.
    #[must_use]
    pub fn focus(&self) -> &str {
        self.focus.last().map_or(MAIN_GROUP, |g| g.as_ref())
    }
}
