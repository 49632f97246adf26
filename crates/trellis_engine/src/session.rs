//! Sessions: working memory plus the fire loop.
//!
//! A [`Session`] owns one fact store, its network memories, the agenda and
//! the belief bookkeeping, and shares the compiled [`RuleBase`] with every
//! other session. Every store operation propagates synchronously and then
//! settles the belief layer, so a consequence always sees the network in a
//! consistent state and the next activation is chosen only after its
//! predecessor's changes are fully propagated.
//!
//! Sessions are single-threaded. Other threads talk to a running
//! [`Session::fire_until_halted`] loop through a [`SessionHandle`].

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded, unbounded};
use trellis_foundation::{Error, Fact, FactId, Result, SemanticLimit, TypeId, Value};

use crate::agenda::{Activation, ActivationId, Agenda};
use crate::belief::{BeliefSet, Polarity, TruthMaintenance};
use crate::config::SessionConfig;
use crate::constraint::Diagnostic;
use crate::handle::ExternalHandle;
use crate::mask::BitMask;
use crate::network::{NodeId, RuleBase};
use crate::propagate::{NetworkState, Propagator};
use crate::rule::DEFAULT_ENTRY_POINT;
use crate::store::{FactHandle, FactStore, KeyId, StatedInsert};
use crate::trace::{PropagationStats, TraceBuffer, TraceEvent};
use crate::tuple::TupleId;

// =============================================================================
// Remote Commands
// =============================================================================

enum Command {
    Insert {
        entry_point: Arc<str>,
        fact: Fact,
        reply: Sender<Result<FactId>>,
    },
    Update {
        id: FactId,
        fact: Fact,
        reply: Sender<Result<()>>,
    },
    Delete {
        id: FactId,
        reply: Sender<Result<()>>,
    },
    Halt,
}

/// How often an idle fire loop checks whether its handles are gone.
const HANDLE_POLL: Duration = Duration::from_millis(20);

/// Cloneable, thread-safe way to feed a session from other threads.
///
/// Submissions are applied in order between activations while the session
/// runs [`Session::fire_until_halted`], and on the next call to
/// [`Session::fire_all`] or [`Session::process_commands`] otherwise. Each
/// call returns a receiver for the operation's result.
#[derive(Clone)]
pub struct SessionHandle {
    commands: Sender<Command>,
    _live: Arc<()>,
}

impl SessionHandle {
    /// Submits a fact to the default entry point.
    pub fn insert(&self, fact: Fact) -> Receiver<Result<FactId>> {
        self.insert_into(DEFAULT_ENTRY_POINT, fact)
    }

    /// Submits a fact to a named entry point.
    pub fn insert_into(&self, entry_point: &str, fact: Fact) -> Receiver<Result<FactId>> {
        let (reply, rx) = bounded(1);
        self.send(Command::Insert {
            entry_point: Arc::from(entry_point),
            fact,
            reply,
        });
        rx
    }

    /// Submits a replacement value for a fact.
    pub fn update(&self, id: FactId, fact: Fact) -> Receiver<Result<()>> {
        let (reply, rx) = bounded(1);
        self.send(Command::Update { id, fact, reply });
        rx
    }

    /// Submits a delete.
    pub fn delete(&self, id: FactId) -> Receiver<Result<()>> {
        let (reply, rx) = bounded(1);
        self.send(Command::Delete { id, reply });
        rx
    }

    /// Asks the fire loop to stop after the current activation.
    pub fn halt(&self) {
        self.send(Command::Halt);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("session dropped, submission discarded");
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("queued", &self.commands.len())
            .finish()
    }
}

// =============================================================================
// Session
// =============================================================================

/// The activation whose consequence is running.
#[derive(Debug)]
struct Firing {
    terminal: NodeId,
    tuple: TupleId,
    asserted: HashSet<(KeyId, Polarity)>,
}

/// Working memory over a shared rule base.
pub struct Session {
    base: Arc<RuleBase>,
    config: SessionConfig,
    store: FactStore,
    tms: TruthMaintenance,
    net: NetworkState,
    agenda: Agenda,
    stats: PropagationStats,
    diagnostics: Vec<Diagnostic>,
    trace: Option<TraceBuffer>,
    cycle: u64,
    halted: bool,
    commands: Sender<Command>,
    inbox: Receiver<Command>,
    handles: Arc<()>,
    initial_fact: Option<FactId>,
    dirty: BTreeSet<KeyId>,
    retracted: Vec<TupleId>,
    firing: Option<Firing>,
}

impl Session {
    /// Creates a session and inserts the initial fact.
    ///
    /// # Errors
    ///
    /// Returns a network error if the rule base is inconsistent.
    pub fn new(base: Arc<RuleBase>, config: SessionConfig) -> Result<Self> {
        let (commands, inbox) = unbounded();
        let trace = config
            .trace_enabled
            .then(|| TraceBuffer::new(config.trace_buffer_size));
        let mut session = Self {
            net: NetworkState::new(&base),
            store: FactStore::new(config.equality),
            agenda: Agenda::new(config.conflict_strategy),
            base,
            config,
            tms: TruthMaintenance::new(),
            stats: PropagationStats::default(),
            diagnostics: Vec::new(),
            trace,
            cycle: 0,
            halted: false,
            commands,
            inbox,
            handles: Arc::new(()),
            initial_fact: None,
            dirty: BTreeSet::new(),
            retracted: Vec::new(),
            firing: None,
        };

        let initial = session
            .store
            .insert_stated(Fact::new(TypeId::INITIAL_FACT), Arc::from(DEFAULT_ENTRY_POINT))
            .id();
        session.initial_fact = Some(initial);
        session.propagator().insert_fact(initial)?;
        session.settle()?;
        tracing::debug!(rules = session.base.rules().len(), "session created");
        Ok(session)
    }

    /// Creates a session with default configuration.
    ///
    /// # Errors
    ///
    /// Returns a network error if the rule base is inconsistent.
    pub fn with_defaults(base: Arc<RuleBase>) -> Result<Self> {
        Self::new(base, SessionConfig::default())
    }

    fn propagator(&mut self) -> Propagator<'_> {
        Propagator {
            base: self.base.as_ref(),
            store: &self.store,
            state: &mut self.net,
            agenda: &mut self.agenda,
            stats: &mut self.stats,
            diagnostics: &mut self.diagnostics,
            trace: self.trace.as_mut(),
            cycle: self.cycle,
            execution: self.config.execution.as_ref(),
            retracted: &mut self.retracted,
            firing: self.firing.as_ref().map(|f| f.terminal),
        }
    }

    fn record(&mut self, event: TraceEvent) {
        if let Some(trace) = self.trace.as_mut() {
            trace.push(self.cycle, event);
        }
    }

    fn validate(&self, fact: &Fact) -> Result<()> {
        if fact.type_id() == TypeId::INITIAL_FACT {
            return Err(Error::unknown_type("InitialFact"));
        }
        self.base
            .types()
            .require(fact.type_id())?
            .validate(fact, self.base.interner())
    }

    // =========================================================================
    // Working memory
    // =========================================================================

    /// Inserts a stated fact into the default entry point.
    ///
    /// Under equality semantics inserting a fact equal to a stated one
    /// returns the existing handle.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType`, `UnknownField` or `TypeMismatch` for facts that
    /// do not conform to their declared type.
    pub fn insert(&mut self, fact: Fact) -> Result<FactId> {
        self.insert_into(DEFAULT_ENTRY_POINT, fact)
    }

    /// Inserts a stated fact into a named entry point.
    ///
    /// # Errors
    ///
    /// See [`Session::insert`].
    pub fn insert_into(&mut self, entry_point: &str, fact: Fact) -> Result<FactId> {
        let id = self.insert_stated(entry_point, fact)?;
        self.settle()?;
        Ok(id)
    }

    fn insert_stated(&mut self, entry_point: &str, fact: Fact) -> Result<FactId> {
        self.validate(&fact)?;
        match self.store.insert_stated(fact, Arc::from(entry_point)) {
            StatedInsert::New(id) => {
                tracing::trace!(?id, entry_point, "fact inserted");
                self.propagator().insert_fact(id)?;
                self.record(TraceEvent::FactInserted {
                    fact: id,
                    logical: false,
                });
                Ok(id)
            }
            StatedInsert::Existing(id) => Ok(id),
            StatedInsert::Promoted(id) => {
                tracing::debug!(?id, "justified fact became stated");
                Ok(id)
            }
        }
    }

    /// Replaces a fact's value. Only the fields that changed are propagated.
    ///
    /// # Errors
    ///
    /// Returns `StaleHandle`/`UnknownHandle` for dead handles, schema errors
    /// for non-conforming facts and `InvalidUpdate` if the type changes.
    pub fn update(&mut self, id: FactId, fact: Fact) -> Result<()> {
        self.update_stated(id, fact, None)?;
        self.settle()
    }

    /// Replaces a fact's value and propagates the given modification mask.
    ///
    /// # Errors
    ///
    /// See [`Session::update`].
    pub fn update_with_mask(&mut self, id: FactId, fact: Fact, mask: BitMask) -> Result<()> {
        self.update_stated(id, fact, Some(mask))?;
        self.settle()
    }

    /// Updates a fact through a closure over its current value.
    ///
    /// # Errors
    ///
    /// See [`Session::update`].
    pub fn modify(&mut self, id: FactId, f: impl FnOnce(&Fact) -> Fact) -> Result<()> {
        let fact = f(&self.store.get(id)?.fact);
        self.update(id, fact)
    }

    fn update_stated(&mut self, id: FactId, fact: Fact, mask: Option<BitMask>) -> Result<()> {
        if Some(id) == self.initial_fact {
            return Err(Error::invalid_update(id, "the initial fact is immutable"));
        }
        self.validate(&fact)?;
        let justified = self.store.is_justified(id);
        let outcome = self.store.update(id, fact)?;
        if outcome.old_key != outcome.new_key {
            if justified {
                self.tms.rekey(outcome.old_key, outcome.new_key);
                self.dirty.insert(outcome.new_key);
            }
            self.dirty.insert(outcome.old_key);
        }

        let mask = mask.unwrap_or_else(|| BitMask::of_fields(outcome.changed.iter().copied()));
        if mask.is_empty() {
            tracing::trace!(?id, "update changed nothing");
            return Ok(());
        }
        self.propagator().modify_fact(id, mask)?;
        self.record(TraceEvent::FactUpdated { fact: id });
        Ok(())
    }

    /// Deletes a fact.
    ///
    /// Deleting the last stated handle of a fact also drops the
    /// justifications recorded against it; the fact stays absent until a
    /// rule justifies it again.
    ///
    /// # Errors
    ///
    /// Returns `StaleHandle`/`UnknownHandle` for dead handles.
    pub fn delete(&mut self, id: FactId) -> Result<()> {
        self.delete_stated(id)?;
        self.settle()
    }

    fn delete_stated(&mut self, id: FactId) -> Result<()> {
        if Some(id) == self.initial_fact {
            return Err(Error::invalid_update(id, "the initial fact cannot be deleted"));
        }
        let key = self.store.get(id)?.key;
        let justified = self.store.is_justified(id);
        self.propagator().delete_fact(id)?;
        self.store.delete(id)?;
        let unstated = self.store.key(key).is_none_or(|k| !k.is_stated());
        if justified || unstated {
            self.tms.detach(key);
        }
        self.dirty.insert(key);
        tracing::trace!(?id, "fact deleted");
        self.record(TraceEvent::FactDeleted { fact: id });
        Ok(())
    }

    /// Finds a live handle whose fact equals `fact`.
    #[must_use]
    pub fn lookup(&self, fact: &Fact) -> Option<FactId> {
        self.store.lookup(fact).filter(|id| Some(*id) != self.initial_fact)
    }

    /// Returns the fact behind a handle.
    ///
    /// # Errors
    ///
    /// Returns `StaleHandle`/`UnknownHandle` for dead handles.
    pub fn get(&self, id: FactId) -> Result<&Fact> {
        self.store.get(id).map(|h| &h.fact)
    }

    /// Returns a handle's metadata.
    ///
    /// # Errors
    ///
    /// Returns `StaleHandle`/`UnknownHandle` for dead handles.
    pub fn fact_handle(&self, id: FactId) -> Result<&FactHandle> {
        self.store.get(id)
    }

    /// Returns true if the handle exists only through justification.
    #[must_use]
    pub fn is_justified(&self, id: FactId) -> bool {
        self.store.is_justified(id)
    }

    /// Iterates over every visible fact, in handle order.
    pub fn objects(&self) -> impl Iterator<Item = (FactId, &Fact)> {
        let initial = self.initial_fact;
        self.store
            .iter()
            .filter(move |h| Some(h.id) != initial)
            .map(|h| (h.id, &h.fact))
    }

    /// Iterates over the visible facts accepted by `filter`.
    pub fn objects_matching<'s>(
        &'s self,
        filter: impl Fn(&Fact) -> bool + 's,
    ) -> impl Iterator<Item = (FactId, &'s Fact)> + 's {
        self.objects().filter(move |(_, fact)| filter(fact))
    }

    /// Number of visible facts.
    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.objects().count()
    }

    // =========================================================================
    // Belief layer
    // =========================================================================

    fn justify(&mut self, fact: Fact, polarity: Polarity) -> Result<KeyId> {
        self.validate(&fact)?;
        let Some(tuple) = self.firing.as_ref().map(|f| f.tuple) else {
            return Err(Error::internal("logical insert outside a consequence"));
        };
        let key = self.store.key_for(&fact);
        self.dirty.insert(key);
        if !self.net.tuples.contains_left(tuple) {
            tracing::debug!(?key, "match retracted during its consequence, justification ignored");
            self.settle()?;
            return Ok(key);
        }
        if let Some(firing) = self.firing.as_mut() {
            firing.asserted.insert((key, polarity));
        }
        let support: Vec<FactId> = self.net.tuples.chain(tuple).into_iter().flatten().collect();
        self.tms.assert_logical(key, tuple, polarity, support);
        self.settle()?;
        Ok(key)
    }

    /// Brings working memory in line with every belief changed since the
    /// last call.
    fn settle(&mut self) -> Result<()> {
        loop {
            for tuple in std::mem::take(&mut self.retracted) {
                for (key, _) in self.tms.retract_match(tuple) {
                    self.dirty.insert(key);
                }
            }
            if self.tms.take_sweep_request() {
                self.sweep();
            }
            let Some(key) = self.dirty.pop_first() else {
                return Ok(());
            };
            self.reconcile(key)?;
        }
    }

    /// Detaches believed keys whose only support is circular.
    fn sweep(&mut self) {
        let justified: HashMap<KeyId, FactId> = self
            .store
            .keys()
            .filter(|k| !k.is_stated())
            .filter_map(|k| k.justified.map(|id| (k.id, id)))
            .collect();
        for key in self.tms.unsupported(&justified) {
            tracing::debug!(?key, "dropping justification cycle without grounded support");
            self.tms.detach(key);
            self.dirty.insert(key);
        }
    }

    fn reconcile(&mut self, key: KeyId) -> Result<()> {
        let Some(entry) = self.store.key(key) else {
            return Ok(());
        };
        let stated = entry.is_stated();
        let justified = entry.justified;
        let believed = self.tms.is_believed(key);

        match (believed, justified) {
            (true, None) if !stated => {
                let id = self
                    .store
                    .insert_justified(key, Arc::from(DEFAULT_ENTRY_POINT))?;
                tracing::trace!(?id, ?key, "justified fact inserted");
                self.propagator().insert_fact(id)?;
                self.record(TraceEvent::FactJustified { fact: id });
                self.record(TraceEvent::FactInserted {
                    fact: id,
                    logical: true,
                });
            }
            (false, Some(id)) => {
                tracing::trace!(?id, ?key, "justified fact retracted");
                self.propagator().delete_fact(id)?;
                self.store.delete(id)?;
                self.record(TraceEvent::FactUnjustified { fact: id });
                self.record(TraceEvent::FactDeleted { fact: id });
            }
            _ => {}
        }
        self.store.release_key(key, self.tms.has_beliefs(key));
        Ok(())
    }

    /// Belief set of a key.
    #[must_use]
    pub fn belief(&self, key: KeyId) -> Option<&BeliefSet> {
        self.tms.belief(key)
    }

    /// Handle present for a key, stated first.
    #[must_use]
    pub fn key_handle(&self, key: KeyId) -> Option<FactId> {
        let entry = self.store.key(key)?;
        entry.stated.first().copied().or(entry.justified)
    }

    /// Facts held absent by negative support only.
    #[must_use]
    pub fn justified_absences(&self) -> Vec<&Fact> {
        self.tms
            .justified_absences()
            .into_iter()
            .filter_map(|k| self.store.key(k).map(|e| &e.fact))
            .collect()
    }

    // =========================================================================
    // Fire loop
    // =========================================================================

    /// Fires activations until the agenda is empty, the loop is halted, or
    /// `max` activations have fired. Returns the number fired.
    ///
    /// # Errors
    ///
    /// Returns `ConsequenceFailed` naming the rule and activation if a
    /// consequence fails, and `LimitExceeded` if the configured activation
    /// limit is reached with work still pending.
    pub fn fire_all(&mut self, max: Option<usize>) -> Result<usize> {
        self.halted = false;
        self.process_commands();
        let mut fired = 0;
        while !self.halted && max.is_none_or(|m| fired < m) {
            self.check_limit(fired)?;
            if !self.fire_next()? {
                break;
            }
            fired += 1;
        }
        tracing::debug!(fired, pending = self.agenda.len(), "fire loop finished");
        Ok(fired)
    }

    /// Fires activations, waiting for submissions from [`SessionHandle`]s
    /// whenever the agenda is empty, until halted. Returns the number fired.
    ///
    /// The loop also returns once the agenda and the queue are empty and
    /// every handle has been dropped, since nothing could wake it again. A
    /// session that never handed out a handle behaves like
    /// [`Session::fire_all`].
    ///
    /// # Errors
    ///
    /// See [`Session::fire_all`].
    pub fn fire_until_halted(&mut self) -> Result<usize> {
        self.halted = false;
        let mut fired = 0;
        loop {
            self.process_commands();
            if self.halted {
                break;
            }
            self.check_limit(fired)?;
            if self.fire_next()? {
                fired += 1;
                continue;
            }
            if Arc::strong_count(&self.handles) == 1 && self.inbox.is_empty() {
                tracing::debug!(fired, "fire loop idle with no live handles");
                break;
            }
            match self.inbox.recv_timeout(HANDLE_POLL) {
                Ok(command) => self.apply(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!(fired, "fire loop halted");
        Ok(fired)
    }

    /// Stops the running fire loop after the current activation.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Returns true if the last fire loop was halted.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Returns a handle for submitting work from other threads.
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            commands: self.commands.clone(),
            _live: Arc::clone(&self.handles),
        }
    }

    /// Applies every queued submission. Returns how many were applied.
    pub fn process_commands(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.inbox.try_recv() {
                Ok(command) => {
                    self.apply(command);
                    applied += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return applied,
            }
        }
    }

    fn apply(&mut self, command: Command) {
        // The submitter may have dropped its receiver.
        match command {
            Command::Insert {
                entry_point,
                fact,
                reply,
            } => {
                let _ = reply.send(self.insert_into(&entry_point, fact));
            }
            Command::Update { id, fact, reply } => {
                let _ = reply.send(self.update(id, fact));
            }
            Command::Delete { id, reply } => {
                let _ = reply.send(self.delete(id));
            }
            Command::Halt => self.halt(),
        }
    }

    fn check_limit(&self, fired: usize) -> Result<()> {
        let Some(limit) = self.config.max_activations else {
            return Ok(());
        };
        if fired < limit || self.agenda.is_empty() {
            return Ok(());
        }
        let context = self
            .agenda
            .pending()
            .first()
            .map(|a| format!("next pending rule: {}", a.rule_name));
        tracing::warn!(limit, "activation limit reached");
        Err(Error::limit_exceeded(SemanticLimit::MaxActivations {
            limit,
            context,
        }))
    }

    /// Fires the next activation. Returns false if there was none.
    fn fire_next(&mut self) -> Result<bool> {
        let Some(activation) = self.agenda.next() else {
            return Ok(false);
        };
        self.cycle += 1;
        let base = Arc::clone(&self.base);
        let rule = base.rule(activation.rule).ok_or_else(|| {
            Error::network(format!("activation {:?} has no rule", activation.id))
        })?;
        let tuple = activation.tuple;

        let chain = self.net.tuples.chain(tuple);
        let values = self.net.tuples.accumulated(tuple);
        let handles = chain.get(rule.offset..).map(<[_]>::to_vec).unwrap_or_default();
        let accumulated = values.get(rule.offset..).map(<[_]>::to_vec).unwrap_or_default();
        let previous = self.tms.justifications_of(tuple);

        tracing::debug!(rule = %rule.name, activation = ?activation.id, cycle = self.cycle, "firing");
        self.stats.activations_fired += 1;
        self.record(TraceEvent::ActivationFired {
            activation: activation.id,
            rule: Arc::clone(&rule.name),
        });
        self.firing = Some(Firing {
            terminal: activation.rule,
            tuple,
            asserted: HashSet::new(),
        });

        let consequence = Arc::clone(&rule.consequence);
        let result = {
            let mut ctx = RuleContext {
                session: self,
                rule: Arc::clone(&rule.name),
                activation: activation.id,
                handles,
                accumulated,
            };
            consequence(&mut ctx)
        };

        let asserted = self.firing.take().map(|f| f.asserted).unwrap_or_default();
        let current = self.tms.justifications_of(tuple);
        for (key, polarity) in previous {
            if current.contains(&(key, polarity)) && !asserted.contains(&(key, polarity)) {
                tracing::trace!(?key, ?polarity, "withdrawing justification not repeated");
                self.tms.remove_justification(key, tuple, polarity);
                self.dirty.insert(key);
            }
        }
        self.settle()?;

        result.map(|()| true).map_err(|source| {
            tracing::error!(rule = %rule.name, activation = ?activation.id, error = %source, "consequence failed");
            Error::consequence_failed(rule.name.as_ref(), activation.id.raw(), source)
        })
    }

    // =========================================================================
    // Agenda
    // =========================================================================

    /// Pushes a group onto the focus stack.
    pub fn set_focus(&mut self, group: &str) {
        self.agenda.set_focus(group);
    }

    /// Every known agenda group, sorted.
    #[must_use]
    pub fn agenda_groups(&self) -> Vec<Arc<str>> {
        self.agenda.agenda_groups()
    }

    /// The focus stack, bottom first.
    #[must_use]
    pub fn focus_stack(&self) -> &[Arc<str>] {
        self.agenda.focus_stack()
    }

    /// Pending activations in no particular order.
    #[must_use]
    pub fn pending_activations(&self) -> Vec<&Activation> {
        self.agenda.pending()
    }

    /// Cancels every pending activation. Returns how many were cancelled.
    pub fn clear_agenda(&mut self) -> usize {
        let cancelled = self.agenda.clear();
        self.note_cancelled(cancelled)
    }

    /// Cancels the pending activations of one group.
    pub fn clear_agenda_group(&mut self, group: &str) -> usize {
        let cancelled = self.agenda.clear_group(group);
        self.note_cancelled(cancelled)
    }

    fn note_cancelled(&mut self, cancelled: Vec<Activation>) -> usize {
        let count = cancelled.len();
        for activation in cancelled {
            self.stats.activations_cancelled += 1;
            self.record(TraceEvent::ActivationCancelled {
                activation: activation.id,
                rule: activation.rule_name,
            });
        }
        count
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// The shared rule base.
    #[must_use]
    pub fn rule_base(&self) -> &Arc<RuleBase> {
        &self.base
    }

    /// Session options.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Propagation counters.
    #[must_use]
    pub fn stats(&self) -> &PropagationStats {
        &self.stats
    }

    /// Recovered constraint failures, oldest first.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// The trace buffer, if tracing is enabled.
    #[must_use]
    pub fn trace(&self) -> Option<&TraceBuffer> {
        self.trace.as_ref()
    }

    /// Number of activations fired so far.
    #[must_use]
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Complete matches a rule currently holds.
    #[must_use]
    pub fn match_count(&self, rule: &str) -> usize {
        self.base
            .rule_by_name(rule)
            .map_or(0, |r| self.net.memories.terminal_tuples(r.terminal).len())
    }

    /// Returns true if every segment of a rule's path is linked.
    #[must_use]
    pub fn is_rule_linked(&self, rule: &str) -> bool {
        self.base
            .rule_by_name(rule)
            .is_some_and(|r| self.net.paths.is_rule_linked(r.terminal))
    }

    /// Number of live left and right tuples.
    #[must_use]
    pub fn tuple_count(&self) -> usize {
        self.net.tuples.left_len() + self.net.tuples.right_len()
    }

    // =========================================================================
    // External handles
    // =========================================================================

    /// Encodes a live handle.
    ///
    /// # Errors
    ///
    /// Returns `StaleHandle`/`UnknownHandle` for dead handles.
    pub fn to_external(&self, id: FactId) -> Result<ExternalHandle> {
        if Some(id) == self.initial_fact {
            return Err(Error::unknown_handle(id));
        }
        let handle = self.store.get(id)?;
        let type_name = self
            .base
            .interner()
            .type_name(handle.fact.type_id())
            .unwrap_or_default();
        Ok(ExternalHandle::describe(handle, type_name))
    }

    /// Resolves an encoded handle. Returns `None` if it does not decode or
    /// does not name a live handle.
    #[must_use]
    pub fn resolve(&self, encoded: &str) -> Option<FactId> {
        ExternalHandle::parse(encoded)?
            .resolve(&self.store, self.base.interner())
            .filter(|id| Some(*id) != self.initial_fact)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("facts", &self.store.len())
            .field("pending", &self.agenda.len())
            .field("cycle", &self.cycle)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Rule Context
// =============================================================================

/// What a consequence sees: its match and the session to act on.
///
/// Every operation propagates before it returns, so later reads observe
/// earlier writes.
pub struct RuleContext<'s> {
    session: &'s mut Session,
    rule: Arc<str>,
    activation: ActivationId,
    handles: Vec<Option<FactId>>,
    accumulated: Vec<Option<Value>>,
}

impl RuleContext<'_> {
    /// Name of the firing rule.
    #[must_use]
    pub fn rule(&self) -> &str {
        &self.rule
    }

    /// The firing activation.
    #[must_use]
    pub fn activation(&self) -> ActivationId {
        self.activation
    }

    /// Number of conditions in the match.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true if the rule has no visible conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Handle bound by a condition. `None` for negated, existential and
    /// accumulate conditions.
    #[must_use]
    pub fn handle(&self, condition: usize) -> Option<FactId> {
        self.handles.get(condition).copied().flatten()
    }

    /// Current value of the fact bound by a condition.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the condition binds no fact and
    /// `StaleHandle` if the fact was deleted since the match was made.
    pub fn fact(&self, condition: usize) -> Result<&Fact> {
        let id = self
            .handle(condition)
            .ok_or_else(|| Error::internal(format!("condition {condition} binds no fact")))?;
        self.session.get(id)
    }

    /// Aggregate computed by an accumulate condition.
    #[must_use]
    pub fn accumulated(&self, condition: usize) -> Option<&Value> {
        self.accumulated.get(condition).and_then(Option::as_ref)
    }

    /// Read access to the session.
    #[must_use]
    pub fn session(&self) -> &Session {
        self.session
    }

    /// Inserts a stated fact.
    ///
    /// # Errors
    ///
    /// See [`Session::insert`].
    pub fn insert(&mut self, fact: Fact) -> Result<FactId> {
        self.session.insert(fact)
    }

    /// Inserts a stated fact into a named entry point.
    ///
    /// # Errors
    ///
    /// See [`Session::insert`].
    pub fn insert_into(&mut self, entry_point: &str, fact: Fact) -> Result<FactId> {
        self.session.insert_into(entry_point, fact)
    }

    /// Justifies a fact with this match. The fact is present while at least
    /// one match justifies it and nothing justifies its absence.
    ///
    /// # Errors
    ///
    /// Returns schema errors for non-conforming facts.
    pub fn insert_logical(&mut self, fact: Fact) -> Result<KeyId> {
        self.session.justify(fact, Polarity::Positive)
    }

    /// Justifies the absence of a fact with this match.
    ///
    /// # Errors
    ///
    /// Returns schema errors for non-conforming facts.
    pub fn insert_logical_negative(&mut self, fact: Fact) -> Result<KeyId> {
        self.session.justify(fact, Polarity::Negative)
    }

    /// Replaces a fact's value.
    ///
    /// # Errors
    ///
    /// See [`Session::update`].
    pub fn update(&mut self, id: FactId, fact: Fact) -> Result<()> {
        self.session.update(id, fact)
    }

    /// Updates a fact through a closure over its current value.
    ///
    /// # Errors
    ///
    /// See [`Session::update`].
    pub fn modify(&mut self, id: FactId, f: impl FnOnce(&Fact) -> Fact) -> Result<()> {
        self.session.modify(id, f)
    }

    /// Deletes a fact.
    ///
    /// # Errors
    ///
    /// See [`Session::delete`].
    pub fn delete(&mut self, id: FactId) -> Result<()> {
        self.session.delete(id)
    }

    /// Stops the fire loop once this consequence returns.
    pub fn halt(&mut self) {
        self.session.halt();
    }

    /// Pushes a group onto the focus stack.
    pub fn set_focus(&mut self, group: &str) {
        self.session.set_focus(group);
    }
}

impl fmt::Debug for RuleContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("rule", &self.rule)
            .field("activation", &self.activation)
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}
