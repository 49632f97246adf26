//! Incremental match network, agenda, and truth maintenance for Trellis.
//!
//! This crate provides:
//! - [`RuleBaseBuilder`] / [`RuleBase`] - Rule compilation into a shared node network
//! - [`Session`] - Working memory, propagation, and the fire loop
//! - [`Rule`] / [`Pattern`] - Programmatic rule definitions
//! - [`Agenda`] - Conflict resolution and agenda groups
//! - [`TruthMaintenance`] - Stated and logically justified facts
//! - [`ExternalHandle`] - Fact-handle encoding for use outside a session
//!
//! # Example
//!
//! ```
//! use trellis_engine::{FactSchema, Pattern, Rule, RuleBaseBuilder, Session};
//! use trellis_foundation::{Fact, Type};
//!
//! let mut builder = RuleBaseBuilder::new();
//! let person = builder.declare(&FactSchema::new("Person").field("age", Type::Int)).unwrap();
//! let age = builder.field("Person", "age").unwrap();
//! builder
//!     .add_rule(
//!         Rule::new("adult")
//!             .when(Pattern::new(person).filter(
//!                 trellis_engine::AlphaConstraint::literal(age, trellis_engine::Operator::Ge, 18),
//!             ))
//!             .then(|_| Ok(())),
//!     )
//!     .unwrap();
//!
//! let mut session = Session::with_defaults(builder.build().unwrap()).unwrap();
//! session.insert(Fact::new(person).with(age, 30)).unwrap();
//! assert_eq!(session.fire_all(None).unwrap(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod agenda;
pub mod belief;
pub mod config;
pub mod constraint;
pub mod handle;
pub mod index;
pub mod mask;
pub mod memory;
pub mod network;
pub mod path;
mod propagate;
pub mod rule;
pub mod schema;
pub mod session;
pub mod store;
pub mod trace;
pub mod tuple;

pub use agenda::{Activation, ActivationId, ActivationState, Agenda};
pub use belief::{BeliefChange, BeliefSet, Polarity, TruthMaintenance};
pub use config::{
    ConflictStrategy, EqualityBehavior, ExecutionContext, RuleBaseConfig, SessionConfig,
};
pub use constraint::{
    AlphaConstraint, AlphaPredicate, BetaConstraint, BetaPredicate, Diagnostic, MatchView,
    Operator,
};
pub use handle::{ExternalHandle, TraitStatus};
pub use mask::BitMask;
pub use network::{NodeId, NodeKind, RuleBase, RuleBaseBuilder};
pub use propagate::NetworkState;
pub use rule::{
    AccumulateFunction, Condition, DEFAULT_ENTRY_POINT, MAIN_GROUP, Pattern, ResultFilter, Rule,
    Salience,
};
pub use schema::{FactSchema, FieldSchema, TypeDef, TypeRegistry};
pub use session::{RuleContext, Session, SessionHandle};
pub use store::{FactHandle, FactStore, KeyId};
pub use trace::{PropagationStats, TraceBuffer, TraceEvent, TraceRecord};
