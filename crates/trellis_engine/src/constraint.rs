//! Constraint evaluation.
//!
//! Alpha constraints test a single fact; beta constraints test a candidate
//! fact against the facts already matched by a partial match. Predicates are
//! opaque pre-compiled closures. A predicate may carry a specializer that
//! produces a faster equivalent; once a predicate has been evaluated often
//! enough the specializer runs on a background worker and its result is
//! published with a single atomic write.
//!
//! Constraints hold no per-evaluation state: everything an evaluation needs
//! is passed in through [`EvalContext`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use trellis_foundation::{Error, Fact, FieldId, Result, Value};

use crate::config::ExecutionContext;
use crate::mask::BitMask;
use crate::trace::PropagationStats;

/// Cost assigned to predicates that do not declare one.
pub const DEFAULT_PREDICATE_COST: u32 = 10;

// =============================================================================
// Evaluation Context
// =============================================================================

/// A recovered constraint failure.
#[derive(Clone, Debug, PartialEq)]
pub struct Diagnostic {
    /// Key of the failing constraint.
    pub constraint: Arc<str>,
    /// The error message.
    pub message: String,
}

/// Per-call evaluation state.
pub struct EvalContext<'a> {
    /// Where promotion work is submitted, if anywhere.
    pub execution: Option<&'a ExecutionContext>,
    /// Evaluations before promotion is requested. Zero disables promotion.
    pub jit_threshold: u32,
    /// Counters.
    pub stats: &'a mut PropagationStats,
    /// Recovered failures.
    pub diagnostics: &'a mut Vec<Diagnostic>,
}

impl EvalContext<'_> {
    fn recover(&mut self, constraint: &Arc<str>, result: Result<bool>) -> bool {
        match result {
            Ok(matched) => matched,
            Err(error) => {
                self.stats.constraint_failures += 1;
                tracing::warn!(constraint = %constraint, %error, "constraint evaluation failed");
                self.diagnostics.push(Diagnostic {
                    constraint: Arc::clone(constraint),
                    message: error.to_string(),
                });
                false
            }
        }
    }
}

/// Runs a user predicate, turning a panic into a constraint failure.
fn guarded(eval: impl FnOnce() -> Result<bool>) -> Result<bool> {
    catch_unwind(AssertUnwindSafe(eval)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string payload".to_owned());
        Err(Error::constraint_failed(format!("predicate panicked: {message}")))
    })
}

// =============================================================================
// Promotion
// =============================================================================

/// Produces a specialized version of a predicate.
pub type Specializer<F> = Arc<dyn Fn() -> Result<F> + Send + Sync>;

/// Background promotion state of one predicate.
pub struct Promotion<F> {
    evaluations: AtomicU32,
    requested: AtomicBool,
    promoted: OnceLock<F>,
    specializer: Option<Specializer<F>>,
}

impl<F: Clone + Send + Sync + 'static> Promotion<F> {
    fn new(specializer: Option<Specializer<F>>) -> Self {
        Self {
            evaluations: AtomicU32::new(0),
            requested: AtomicBool::new(false),
            promoted: OnceLock::new(),
            specializer,
        }
    }

    /// The promoted function once published.
    pub fn promoted(&self) -> Option<&F> {
        self.promoted.get()
    }

    /// Returns true once a specialized function is installed.
    pub fn is_promoted(&self) -> bool {
        self.promoted.get().is_some()
    }

    fn record(self: &Arc<Self>, key: &Arc<str>, ctx: &EvalContext<'_>) {
        if self.specializer.is_none() || ctx.jit_threshold == 0 || self.is_promoted() {
            return;
        }
        let count = self.evaluations.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        if count < ctx.jit_threshold {
            return;
        }
        let Some(execution) = ctx.execution else {
            return;
        };
        if self.requested.swap(true, Ordering::AcqRel) {
            return;
        }
        let promotion = Arc::clone(self);
        let key = Arc::clone(key);
        tracing::debug!(constraint = %key, count, "requesting predicate promotion");
        if !execution.submit(move || promotion.run(&key)) {
            self.requested.store(false, Ordering::Release);
        }
    }

    fn run(&self, key: &str) {
        let Some(specializer) = &self.specializer else {
            return;
        };
        match catch_unwind(AssertUnwindSafe(|| specializer())) {
            Ok(Ok(f)) => {
                // Losing the race to another worker is fine; both are equivalent.
                let _ = self.promoted.set(f);
                tracing::debug!(constraint = key, "predicate promoted");
            }
            Ok(Err(error)) => {
                tracing::warn!(constraint = key, %error, "predicate promotion failed");
            }
            Err(_) => {
                tracing::warn!(constraint = key, "predicate promotion panicked");
            }
        }
    }
}

// =============================================================================
// Operators
// =============================================================================

/// Comparison operator of a literal constraint.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl Operator {
    /// Applies the operator. Incomparable values never satisfy an ordering.
    #[must_use]
    pub fn apply(self, left: &Value, right: &Value) -> bool {
        use std::cmp::Ordering as O;
        match self {
            Self::Eq => left.loosely_equals(right),
            Self::Ne => !left.loosely_equals(right),
            Self::Lt => left.partial_cmp(right) == Some(O::Less),
            Self::Le => matches!(left.partial_cmp(right), Some(O::Less | O::Equal)),
            Self::Gt => left.partial_cmp(right) == Some(O::Greater),
            Self::Ge => matches!(left.partial_cmp(right), Some(O::Greater | O::Equal)),
        }
    }
}

// =============================================================================
// Alpha Constraints
// =============================================================================

/// Compiled single-fact predicate.
pub type AlphaFn = Arc<dyn Fn(&Fact) -> Result<bool> + Send + Sync>;

/// Single-fact predicate with its metadata.
pub struct AlphaPredicate {
    key: Arc<str>,
    reads: Vec<FieldId>,
    cost: u32,
    eval: AlphaFn,
    promotion: Arc<Promotion<AlphaFn>>,
}

impl AlphaPredicate {
    /// Creates a predicate. `key` identifies it: predicates with equal keys
    /// are treated as the same constraint and shared between rules.
    pub fn new(
        key: impl Into<Arc<str>>,
        eval: impl Fn(&Fact) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            reads: Vec::new(),
            cost: DEFAULT_PREDICATE_COST,
            eval: Arc::new(eval),
            promotion: Arc::new(Promotion::new(None)),
        }
    }

    /// Declares a field the predicate reads. Predicates that declare none
    /// react to every modification.
    #[must_use]
    pub fn reads(mut self, field: FieldId) -> Self {
        self.reads.push(field);
        self
    }

    /// Sets the evaluation cost used for ordering.
    #[must_use]
    pub fn cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    /// Attaches a specializer used for background promotion.
    #[must_use]
    pub fn specializer(
        mut self,
        specializer: impl Fn() -> Result<AlphaFn> + Send + Sync + 'static,
    ) -> Self {
        self.promotion = Arc::new(Promotion::new(Some(Arc::new(specializer))));
        self
    }

    /// Promotion state.
    #[must_use]
    pub fn promotion(&self) -> &Promotion<AlphaFn> {
        &self.promotion
    }
}

/// A constraint on a single fact.
#[derive(Clone)]
pub enum AlphaConstraint {
    /// Compares a field against a constant.
    Literal {
        /// The tested field.
        field: FieldId,
        /// The comparison.
        op: Operator,
        /// The constant.
        value: Value,
    },
    /// Opaque predicate.
    Predicate(Arc<AlphaPredicate>),
}

impl AlphaConstraint {
    /// `field == value`.
    pub fn eq(field: FieldId, value: impl Into<Value>) -> Self {
        Self::literal(field, Operator::Eq, value)
    }

    /// `field <op> value`.
    pub fn literal(field: FieldId, op: Operator, value: impl Into<Value>) -> Self {
        Self::Literal {
            field,
            op,
            value: value.into(),
        }
    }

    /// Key used for diagnostics and sharing.
    #[must_use]
    pub fn key(&self) -> Arc<str> {
        match self {
            Self::Literal { field, op, value } => {
                format!("{field:?} {op:?} {value:?}").into()
            }
            Self::Predicate(p) => Arc::clone(&p.key),
        }
    }

    /// Fields this constraint reads.
    #[must_use]
    pub fn mask(&self) -> BitMask {
        match self {
            Self::Literal { field, .. } => BitMask::of(*field),
            Self::Predicate(p) if p.reads.is_empty() => BitMask::ALL,
            Self::Predicate(p) => BitMask::of_fields(p.reads.iter().copied()),
        }
    }

    /// Declared field reads.
    #[must_use]
    pub fn fields(&self) -> Vec<FieldId> {
        match self {
            Self::Literal { field, .. } => vec![*field],
            Self::Predicate(p) => p.reads.clone(),
        }
    }

    /// Evaluation cost.
    #[must_use]
    pub fn cost(&self) -> u32 {
        match self {
            Self::Literal { .. } => 1,
            Self::Predicate(p) => p.cost,
        }
    }

    /// Field and value when this is a literal equality, the only form that
    /// can be hash-dispatched.
    #[must_use]
    pub fn hash_key(&self) -> Option<(FieldId, &Value)> {
        match self {
            Self::Literal {
                field,
                op: Operator::Eq,
                value,
            } => Some((*field, value)),
            _ => None,
        }
    }

    /// Tests a fact. Predicate errors count as a non-match.
    pub fn evaluate(&self, fact: &Fact, ctx: &mut EvalContext<'_>) -> bool {
        ctx.stats.alpha_evaluations += 1;
        match self {
            Self::Literal { field, op, value } => op.apply(fact.get(*field), value),
            Self::Predicate(p) => {
                let f = p.promotion.promoted().unwrap_or(&p.eval);
                let result = guarded(|| f(fact));
                p.promotion.record(&p.key, ctx);
                ctx.recover(&p.key, result)
            }
        }
    }
}

impl From<AlphaPredicate> for AlphaConstraint {
    fn from(p: AlphaPredicate) -> Self {
        Self::Predicate(Arc::new(p))
    }
}

impl PartialEq for AlphaConstraint {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Literal { field, op, value },
                Self::Literal {
                    field: f2,
                    op: o2,
                    value: v2,
                },
            ) => field == f2 && op == o2 && value == v2,
            (Self::Predicate(a), Self::Predicate(b)) => a.key == b.key,
            _ => false,
        }
    }
}

impl Eq for AlphaConstraint {}

impl Hash for AlphaConstraint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Literal { field, op, value } => {
                field.hash(state);
                op.hash(state);
                value.hash(state);
            }
            Self::Predicate(p) => p.key.hash(state),
        }
    }
}

impl fmt::Debug for AlphaConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Alpha({})", self.key())
    }
}

// =============================================================================
// Beta Constraints
// =============================================================================

/// Read-only view of the facts matched so far, addressed by condition index.
///
/// Conditions without a fact (negations, existentials, accumulations) read
/// as `None`.
#[derive(Clone, Copy)]
pub struct MatchView<'a> {
    facts: &'a [Option<&'a Fact>],
    offset: usize,
}

impl<'a> MatchView<'a> {
    /// Wraps positional facts. `offset` is the number of hidden leading
    /// positions (the initial fact anchor).
    #[must_use]
    pub fn new(facts: &'a [Option<&'a Fact>], offset: usize) -> Self {
        Self { facts, offset }
    }

    /// Fact matched by condition `index`.
    #[must_use]
    pub fn fact(&self, index: usize) -> Option<&'a Fact> {
        self.facts.get(index + self.offset).copied().flatten()
    }

    /// Number of visible conditions matched so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len().saturating_sub(self.offset)
    }

    /// Returns true if no visible condition has been matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compiled cross-fact predicate: partial match and candidate fact.
pub type BetaFn = Arc<dyn Fn(&MatchView<'_>, &Fact) -> Result<bool> + Send + Sync>;

/// Cross-fact predicate with its metadata.
pub struct BetaPredicate {
    key: Arc<str>,
    left_reads: Vec<(usize, FieldId)>,
    right_reads: Vec<FieldId>,
    cost: u32,
    eval: BetaFn,
    promotion: Arc<Promotion<BetaFn>>,
}

impl BetaPredicate {
    /// Creates a predicate identified by `key`.
    pub fn new(
        key: impl Into<Arc<str>>,
        eval: impl Fn(&MatchView<'_>, &Fact) -> Result<bool> + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            left_reads: Vec::new(),
            right_reads: Vec::new(),
            cost: DEFAULT_PREDICATE_COST,
            eval: Arc::new(eval),
            promotion: Arc::new(Promotion::new(None)),
        }
    }

    /// Declares a field read from an earlier condition's fact.
    #[must_use]
    pub fn reads_left(mut self, condition: usize, field: FieldId) -> Self {
        self.left_reads.push((condition, field));
        self
    }

    /// Declares a field read from the candidate fact.
    #[must_use]
    pub fn reads_right(mut self, field: FieldId) -> Self {
        self.right_reads.push(field);
        self
    }

    /// Sets the evaluation cost used for ordering.
    #[must_use]
    pub fn cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    /// Attaches a specializer used for background promotion.
    #[must_use]
    pub fn specializer(
        mut self,
        specializer: impl Fn() -> Result<BetaFn> + Send + Sync + 'static,
    ) -> Self {
        self.promotion = Arc::new(Promotion::new(Some(Arc::new(specializer))));
        self
    }

    /// Promotion state.
    #[must_use]
    pub fn promotion(&self) -> &Promotion<BetaFn> {
        &self.promotion
    }

    fn declares_reads(&self) -> bool {
        !self.left_reads.is_empty() || !self.right_reads.is_empty()
    }
}

/// A constraint between a partial match and a candidate fact.
#[derive(Clone)]
pub enum BetaConstraint {
    /// `conditions[left].left_field == candidate.right_field`.
    Equal {
        /// Index of the earlier condition.
        left: usize,
        /// Field of the earlier fact.
        left_field: FieldId,
        /// Field of the candidate fact.
        right_field: FieldId,
    },
    /// Opaque predicate.
    Predicate(Arc<BetaPredicate>),
}

impl BetaConstraint {
    /// Equality join between an earlier condition's field and a candidate field.
    #[must_use]
    pub fn equal(left: usize, left_field: FieldId, right_field: FieldId) -> Self {
        Self::Equal {
            left,
            left_field,
            right_field,
        }
    }

    /// Key used for diagnostics and sharing.
    #[must_use]
    pub fn key(&self) -> Arc<str> {
        match self {
            Self::Equal {
                left,
                left_field,
                right_field,
            } => format!("${left}.{left_field:?} == {right_field:?}").into(),
            Self::Predicate(p) => Arc::clone(&p.key),
        }
    }

    /// Evaluation cost.
    #[must_use]
    pub fn cost(&self) -> u32 {
        match self {
            Self::Equal { .. } => 1,
            Self::Predicate(p) => p.cost,
        }
    }

    /// Declared reads of earlier conditions' facts.
    #[must_use]
    pub fn left_fields(&self) -> Vec<(usize, FieldId)> {
        match self {
            Self::Equal {
                left, left_field, ..
            } => vec![(*left, *left_field)],
            Self::Predicate(p) => p.left_reads.clone(),
        }
    }

    /// Declared reads of the candidate fact.
    #[must_use]
    pub fn right_fields(&self) -> Vec<FieldId> {
        match self {
            Self::Equal { right_field, .. } => vec![*right_field],
            Self::Predicate(p) => p.right_reads.clone(),
        }
    }

    /// Fields read from the earlier condition `condition`.
    ///
    /// Predicates that declare no reads report every field of every
    /// earlier condition.
    #[must_use]
    pub fn left_mask(&self, condition: usize) -> BitMask {
        match self {
            Self::Equal {
                left, left_field, ..
            } if *left == condition => BitMask::of(*left_field),
            Self::Equal { .. } => BitMask::EMPTY,
            Self::Predicate(p) if !p.declares_reads() => BitMask::ALL,
            Self::Predicate(p) => BitMask::of_fields(
                p.left_reads
                    .iter()
                    .filter(|(i, _)| *i == condition)
                    .map(|(_, f)| *f),
            ),
        }
    }

    /// Fields read from the candidate fact.
    #[must_use]
    pub fn right_mask(&self) -> BitMask {
        match self {
            Self::Equal { right_field, .. } => BitMask::of(*right_field),
            Self::Predicate(p) if !p.declares_reads() => BitMask::ALL,
            Self::Predicate(p) => BitMask::of_fields(p.right_reads.iter().copied()),
        }
    }

    /// Tests a candidate fact against a partial match. Predicate errors count
    /// as a non-match.
    pub fn evaluate(&self, view: &MatchView<'_>, right: &Fact, ctx: &mut EvalContext<'_>) -> bool {
        ctx.stats.beta_evaluations += 1;
        match self {
            Self::Equal {
                left,
                left_field,
                right_field,
            } => view
                .fact(*left)
                .is_some_and(|l| l.get(*left_field).loosely_equals(right.get(*right_field))),
            Self::Predicate(p) => {
                let f = p.promotion.promoted().unwrap_or(&p.eval);
                let result = guarded(|| f(view, right));
                p.promotion.record(&p.key, ctx);
                ctx.recover(&p.key, result)
            }
        }
    }
}

impl From<BetaPredicate> for BetaConstraint {
    fn from(p: BetaPredicate) -> Self {
        Self::Predicate(Arc::new(p))
    }
}

impl PartialEq for BetaConstraint {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Equal {
                    left,
                    left_field,
                    right_field,
                },
                Self::Equal {
                    left: l2,
                    left_field: lf2,
                    right_field: rf2,
                },
            ) => left == l2 && left_field == lf2 && right_field == rf2,
            (Self::Predicate(a), Self::Predicate(b)) => a.key == b.key,
            _ => false,
        }
    }
}

impl Eq for BetaConstraint {}

impl Hash for BetaConstraint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Equal {
                left,
                left_field,
                right_field,
            } => {
                left.hash(state);
                left_field.hash(state);
                right_field.hash(state);
            }
            Self::Predicate(p) => p.key.hash(state),
        }
    }
}

impl fmt::Debug for BetaConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Beta({})", self.key())
    }
}

/// Creates a constraint failure for predicates to return.
#[must_use]
pub fn failure(message: impl Into<String>) -> Error {
    Error::constraint_failed(message)
}
