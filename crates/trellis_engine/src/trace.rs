//! Session observability: a bounded trace ring buffer and propagation counters.

use std::collections::VecDeque;
use std::sync::Arc;

use trellis_foundation::FactId;

use crate::agenda::ActivationId;

// =============================================================================
// Trace Event
// =============================================================================

/// Events recorded by a traced session.
#[derive(Clone, Debug, PartialEq)]
pub enum TraceEvent {
    /// A fact entered working memory.
    FactInserted {
        /// The new handle.
        fact: FactId,
        /// Whether the fact was inserted logically.
        logical: bool,
    },

    /// A fact was modified in place.
    FactUpdated {
        /// The modified handle.
        fact: FactId,
    },

    /// A fact left working memory.
    FactDeleted {
        /// The removed handle.
        fact: FactId,
    },

    /// A match produced a pending activation.
    ActivationCreated {
        /// The new activation.
        activation: ActivationId,
        /// The rule it belongs to.
        rule: Arc<str>,
    },

    /// A pending activation lost its match before firing.
    ActivationCancelled {
        /// The cancelled activation.
        activation: ActivationId,
        /// The rule it belonged to.
        rule: Arc<str>,
    },

    /// A consequence ran.
    ActivationFired {
        /// The fired activation.
        activation: ActivationId,
        /// The rule that fired.
        rule: Arc<str>,
    },

    /// Every segment of a rule's path gained a match.
    PathLinked {
        /// The rule whose path linked.
        rule: Arc<str>,
    },

    /// A segment of a rule's path lost its last match.
    PathUnlinked {
        /// The rule whose path unlinked.
        rule: Arc<str>,
    },

    /// A logically inserted fact gained support.
    FactJustified {
        /// The justified handle.
        fact: FactId,
    },

    /// A logically inserted fact lost its support and was retracted.
    FactUnjustified {
        /// The retracted handle.
        fact: FactId,
    },
}

impl TraceEvent {
    /// Returns the event type name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::FactInserted { .. } => "fact_inserted",
            Self::FactUpdated { .. } => "fact_updated",
            Self::FactDeleted { .. } => "fact_deleted",
            Self::ActivationCreated { .. } => "activation_created",
            Self::ActivationCancelled { .. } => "activation_cancelled",
            Self::ActivationFired { .. } => "activation_fired",
            Self::PathLinked { .. } => "path_linked",
            Self::PathUnlinked { .. } => "path_unlinked",
            Self::FactJustified { .. } => "fact_justified",
            Self::FactUnjustified { .. } => "fact_unjustified",
        }
    }
}

/// A recorded event.
#[derive(Clone, Debug, PartialEq)]
pub struct TraceRecord {
    /// Monotonic record id.
    pub id: u64,
    /// Number of activations fired by the session before this event.
    pub cycle: u64,
    /// What happened.
    pub event: TraceEvent,
}

// =============================================================================
// Trace Buffer
// =============================================================================

/// A ring buffer of the most recent trace records.
#[derive(Clone, Debug)]
pub struct TraceBuffer {
    records: VecDeque<TraceRecord>,
    max_size: usize,
    next_id: u64,
}

impl TraceBuffer {
    /// Creates a buffer holding at most `max_size` records.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
            next_id: 0,
        }
    }

    /// Pushes an event, evicting the oldest record when full.
    ///
    /// Returns the assigned record id.
    pub fn push(&mut self, cycle: u64, event: TraceEvent) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.records.push_back(TraceRecord { id, cycle, event });
        while self.records.len() > self.max_size {
            self.records.pop_front();
        }
        id
    }

    /// Returns the number of records in the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clears all records. Ids keep increasing.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Iterates over records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TraceRecord> {
        self.records.iter()
    }

    /// Returns records of one fire cycle.
    #[must_use]
    pub fn records_for_cycle(&self, cycle: u64) -> Vec<&TraceRecord> {
        self.records.iter().filter(|r| r.cycle == cycle).collect()
    }

    /// Returns records of a specific event type.
    #[must_use]
    pub fn by_event_type(&self, event_type: &str) -> Vec<&TraceRecord> {
        self.records
            .iter()
            .filter(|r| r.event.event_type() == event_type)
            .collect()
    }

    /// Returns the most recent N records.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<&TraceRecord> {
        let start = self.records.len().saturating_sub(count);
        self.records.iter().skip(start).collect()
    }
}

// =============================================================================
// Propagation Stats
// =============================================================================

/// Always-on counters describing the work a session has done.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropagationStats {
    /// Single-fact constraint evaluations, hash dispatches included.
    pub alpha_evaluations: u64,
    /// Cross-fact constraint evaluations.
    pub beta_evaluations: u64,
    /// Left tuples created.
    pub tuples_created: u64,
    /// Left tuples modified in place.
    pub tuples_updated: u64,
    /// Left tuples deleted.
    pub tuples_deleted: u64,
    /// Node inputs skipped because the modification missed their listened mask.
    pub modifications_skipped: u64,
    /// Predicate evaluations that returned an error.
    pub constraint_failures: u64,
    /// Activations created.
    pub activations_created: u64,
    /// Pending activations cancelled.
    pub activations_cancelled: u64,
    /// Activations fired.
    pub activations_fired: u64,
}

impl PropagationStats {
    /// Total left tuple churn (creates plus deletes).
    #[must_use]
    pub fn churn(&self) -> u64 {
        self.tuples_created + self.tuples_deleted
    }
}
