//! Rule definitions.
//!
//! A [`Rule`] is a list of conditions plus a consequence. Rules are built
//! programmatically and handed to a [`RuleBaseBuilder`](crate::RuleBaseBuilder),
//! which compiles them into the shared node network.

use std::fmt;
use std::sync::Arc;

use trellis_foundation::{Fact, FieldId, LtVec, Result, TypeId, Value};

use crate::constraint::{AlphaConstraint, BetaConstraint, MatchView};
use crate::mask::BitMask;
use crate::session::RuleContext;

/// Entry point patterns read from unless told otherwise.
pub const DEFAULT_ENTRY_POINT: &str = "DEFAULT";

/// Agenda group rules belong to unless told otherwise.
pub const MAIN_GROUP: &str = "MAIN";

/// Action run when a rule fires.
pub type Consequence = Arc<dyn Fn(&mut RuleContext<'_>) -> Result<()> + Send + Sync>;

// =============================================================================
// Patterns
// =============================================================================

/// Matches facts of one type.
#[derive(Clone, Debug)]
pub struct Pattern {
    /// Matched type (and its subtypes).
    pub fact_type: TypeId,
    /// Entry point the facts come from.
    pub entry_point: Arc<str>,
    /// Single-fact constraints.
    pub alpha: Vec<AlphaConstraint>,
    /// Constraints against earlier conditions.
    pub beta: Vec<BetaConstraint>,
    /// Extra fields whose modification re-evaluates the pattern.
    pub watch: Vec<FieldId>,
}

impl Pattern {
    /// Matches every fact of `fact_type` in the default entry point.
    #[must_use]
    pub fn new(fact_type: TypeId) -> Self {
        Self {
            fact_type,
            entry_point: Arc::from(DEFAULT_ENTRY_POINT),
            alpha: Vec::new(),
            beta: Vec::new(),
            watch: Vec::new(),
        }
    }

    /// Reads from a named entry point.
    #[must_use]
    pub fn from_entry_point(mut self, name: impl Into<Arc<str>>) -> Self {
        self.entry_point = name.into();
        self
    }

    /// Adds a single-fact constraint.
    #[must_use]
    pub fn filter(mut self, constraint: impl Into<AlphaConstraint>) -> Self {
        self.alpha.push(constraint.into());
        self
    }

    /// Adds `field == value`.
    #[must_use]
    pub fn field_eq(self, field: FieldId, value: impl Into<Value>) -> Self {
        self.filter(AlphaConstraint::eq(field, value))
    }

    /// Adds a constraint against earlier conditions.
    #[must_use]
    pub fn join(mut self, constraint: impl Into<BetaConstraint>) -> Self {
        self.beta.push(constraint.into());
        self
    }

    /// Adds `conditions[left].left_field == field`.
    #[must_use]
    pub fn join_eq(self, left: usize, left_field: FieldId, field: FieldId) -> Self {
        self.join(BetaConstraint::equal(left, left_field, field))
    }

    /// Also reacts to modifications of `field`.
    #[must_use]
    pub fn watch(mut self, field: FieldId) -> Self {
        self.watch.push(field);
        self
    }
}

// =============================================================================
// Accumulate
// =============================================================================

/// Folds the values of a custom accumulation.
pub type CombineFn = Arc<dyn Fn(&[&Value]) -> Value + Send + Sync>;

/// Extracts a fact's contribution to a custom accumulation.
pub type ExtractFn = Arc<dyn Fn(&Fact) -> Value + Send + Sync>;

/// User-defined aggregate.
#[derive(Clone)]
pub struct CustomAccumulator {
    /// Identity used for node sharing.
    pub key: Arc<str>,
    /// Fields the extractor reads.
    pub reads: Vec<FieldId>,
    /// Per-fact contribution.
    pub extract: ExtractFn,
    /// Combines all contributions, in match order.
    pub combine: CombineFn,
}

impl fmt::Debug for CustomAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Custom({})", self.key)
    }
}

/// Aggregate computed over the facts matching an accumulate pattern.
#[derive(Clone, Debug)]
pub enum AccumulateFunction {
    /// Number of matching facts.
    Count,
    /// Sum of a numeric field. Integers stay integers unless a float appears.
    Sum(FieldId),
    /// Smallest value of a field, or nil.
    Min(FieldId),
    /// Largest value of a field, or nil.
    Max(FieldId),
    /// Mean of a numeric field as a float, or nil.
    Average(FieldId),
    /// Vector of a field's values in match order.
    Collect(FieldId),
    /// User-defined fold.
    Custom(CustomAccumulator),
}

impl AccumulateFunction {
    /// Identity used for node sharing.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Custom(c) => format!("custom:{}", c.key),
            other => format!("{other:?}"),
        }
    }

    /// Fields read from each matching fact.
    #[must_use]
    pub fn reads(&self) -> Vec<FieldId> {
        match self {
            Self::Count => Vec::new(),
            Self::Sum(f) | Self::Min(f) | Self::Max(f) | Self::Average(f) | Self::Collect(f) => {
                vec![*f]
            }
            Self::Custom(c) => c.reads.clone(),
        }
    }

    /// Fields read from each matching fact as a mask. Custom folds that
    /// declare no reads depend on every field.
    #[must_use]
    pub fn mask(&self) -> BitMask {
        match self {
            Self::Count => BitMask::EMPTY,
            Self::Custom(c) if c.reads.is_empty() => BitMask::ALL,
            other => BitMask::of_fields(other.reads()),
        }
    }

    /// A fact's contribution.
    #[must_use]
    pub fn extract(&self, fact: &Fact) -> Value {
        match self {
            Self::Count => Value::Nil,
            Self::Sum(f) | Self::Min(f) | Self::Max(f) | Self::Average(f) | Self::Collect(f) => {
                fact.get(*f).clone()
            }
            Self::Custom(c) => (c.extract)(fact),
        }
    }

    /// Aggregates contributions.
    #[must_use]
    pub fn combine<'a>(&self, values: impl Iterator<Item = &'a Value>) -> Value {
        match self {
            Self::Count => Value::Int(i64::try_from(values.count()).unwrap_or(i64::MAX)),
            Self::Sum(_) => sum(values),
            Self::Min(_) => values
                .filter(|v| !v.is_nil())
                .fold(None::<&Value>, |best, v| match best {
                    Some(b) if b <= v => Some(b),
                    _ => Some(v),
                })
                .cloned()
                .unwrap_or(Value::Nil),
            Self::Max(_) => values
                .filter(|v| !v.is_nil())
                .fold(None::<&Value>, |best, v| match best {
                    Some(b) if b >= v => Some(b),
                    _ => Some(v),
                })
                .cloned()
                .unwrap_or(Value::Nil),
            Self::Average(_) => {
                let numbers: Vec<f64> = values.filter_map(Value::as_number).collect();
                if numbers.is_empty() {
                    Value::Nil
                } else {
                    #[allow(clippy::cast_precision_loss)]
                    let count = numbers.len() as f64;
                    Value::Float(numbers.iter().sum::<f64>() / count)
                }
            }
            Self::Collect(_) => Value::Vec(values.cloned().collect::<LtVec<Value>>()),
            Self::Custom(c) => {
                let all: Vec<&Value> = values.collect();
                (c.combine)(&all)
            }
        }
    }
}

fn sum<'a>(values: impl Iterator<Item = &'a Value>) -> Value {
    let mut int: Option<i64> = Some(0);
    let mut float = 0.0;
    for value in values {
        match value {
            Value::Int(n) => {
                int = int.and_then(|acc| acc.checked_add(*n));
                #[allow(clippy::cast_precision_loss)]
                {
                    float += *n as f64;
                }
            }
            Value::Float(x) => {
                int = None;
                float += x;
            }
            _ => {}
        }
    }
    int.map_or(Value::Float(float), Value::Int)
}

/// Predicate on an accumulated result.
#[derive(Clone)]
pub struct ResultFilter {
    /// Identity used for node sharing.
    pub key: Arc<str>,
    /// The test.
    pub test: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl ResultFilter {
    /// Creates a filter.
    pub fn new(
        key: impl Into<Arc<str>>,
        test: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            test: Arc::new(test),
        }
    }
}

impl fmt::Debug for ResultFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResultFilter({})", self.key)
    }
}

/// An accumulate condition.
#[derive(Clone, Debug)]
pub struct Accumulate {
    /// Facts being aggregated.
    pub pattern: Pattern,
    /// The aggregate.
    pub function: AccumulateFunction,
    /// Optional test on the result; the condition fails when it rejects.
    pub filter: Option<ResultFilter>,
}

// =============================================================================
// Conditions
// =============================================================================

/// One condition of a rule.
#[derive(Clone, Debug)]
pub enum Condition {
    /// A fact must match.
    Pattern(Pattern),
    /// No fact may match.
    Not(Pattern),
    /// At least one fact must match; binds nothing.
    Exists(Pattern),
    /// Aggregate over the matching facts.
    Accumulate(Accumulate),
}

impl Condition {
    /// The pattern the condition matches against.
    #[must_use]
    pub fn pattern(&self) -> &Pattern {
        match self {
            Self::Pattern(p) | Self::Not(p) | Self::Exists(p) => p,
            Self::Accumulate(a) => &a.pattern,
        }
    }

    /// Returns true if the condition binds a fact.
    #[must_use]
    pub const fn binds_fact(&self) -> bool {
        matches!(self, Self::Pattern(_))
    }
}

// =============================================================================
// Rule
// =============================================================================

/// Salience of a rule's activations.
#[derive(Clone)]
pub enum Salience {
    /// Fixed priority.
    Static(i32),
    /// Priority computed from the match when the activation is created.
    Dynamic(Arc<dyn Fn(&MatchView<'_>) -> i32 + Send + Sync>),
}

impl fmt::Debug for Salience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(n) => write!(f, "Static({n})"),
            Self::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

/// A production rule.
#[derive(Clone)]
pub struct Rule {
    /// Unique name.
    pub name: Arc<str>,
    /// Priority (higher fires first).
    pub salience: Salience,
    /// Agenda group the rule's activations go to.
    pub agenda_group: Arc<str>,
    /// Focus the agenda group when an activation is created.
    pub auto_focus: bool,
    /// Ignore matches created while this rule's own consequence runs.
    pub no_loop: bool,
    /// Conditions, in order.
    pub conditions: Vec<Condition>,
    /// Action.
    pub consequence: Option<Consequence>,
}

impl Rule {
    /// Creates an empty rule.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            salience: Salience::Static(0),
            agenda_group: Arc::from(MAIN_GROUP),
            auto_focus: false,
            no_loop: false,
            conditions: Vec::new(),
            consequence: None,
        }
    }

    /// Sets a fixed salience.
    #[must_use]
    pub fn salience(mut self, salience: i32) -> Self {
        self.salience = Salience::Static(salience);
        self
    }

    /// Computes salience from the match.
    #[must_use]
    pub fn dynamic_salience(
        mut self,
        salience: impl Fn(&MatchView<'_>) -> i32 + Send + Sync + 'static,
    ) -> Self {
        self.salience = Salience::Dynamic(Arc::new(salience));
        self
    }

    /// Sets the agenda group.
    #[must_use]
    pub fn agenda_group(mut self, group: impl Into<Arc<str>>) -> Self {
        self.agenda_group = group.into();
        self
    }

    /// Sets auto-focus.
    #[must_use]
    pub fn auto_focus(mut self, enabled: bool) -> Self {
        self.auto_focus = enabled;
        self
    }

    /// Sets no-loop.
    #[must_use]
    pub fn no_loop(mut self, enabled: bool) -> Self {
        self.no_loop = enabled;
        self
    }

    /// Adds a positive pattern.
    #[must_use]
    pub fn when(mut self, pattern: Pattern) -> Self {
        self.conditions.push(Condition::Pattern(pattern));
        self
    }

    /// Adds a negated pattern.
    #[must_use]
    pub fn not(mut self, pattern: Pattern) -> Self {
        self.conditions.push(Condition::Not(pattern));
        self
    }

    /// Adds an existential pattern.
    #[must_use]
    pub fn exists(mut self, pattern: Pattern) -> Self {
        self.conditions.push(Condition::Exists(pattern));
        self
    }

    /// Adds an accumulate condition.
    #[must_use]
    pub fn accumulate(
        mut self,
        pattern: Pattern,
        function: AccumulateFunction,
        filter: Option<ResultFilter>,
    ) -> Self {
        self.conditions.push(Condition::Accumulate(Accumulate {
            pattern,
            function,
            filter,
        }));
        self
    }

    /// Sets the consequence.
    #[must_use]
    pub fn then(
        mut self,
        consequence: impl Fn(&mut RuleContext<'_>) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.consequence = Some(Arc::new(consequence));
        self
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("salience", &self.salience)
            .field("agenda_group", &self.agenda_group)
            .field("conditions", &self.conditions.len())
            .finish_non_exhaustive()
    }
}
