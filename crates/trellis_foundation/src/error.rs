//! Error types for the Trellis engine.
//!
//! Uses `thiserror` for ergonomic error definition with rich context.

use std::fmt;

use thiserror::Error;

use crate::fact::FactId;
use crate::types::Type;

/// The main error type for Trellis operations.
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct Error {
    /// The kind of error that occurred.
    pub kind: ErrorKind,
    /// Optional context about where the error occurred.
    pub context: Option<ErrorContext>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Adds context to this error.
    #[must_use]
    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Creates a type mismatch error.
    #[must_use]
    pub fn type_mismatch(expected: Type, actual: Type) -> Self {
        Self::new(ErrorKind::TypeMismatch { expected, actual })
    }

    /// Creates a stale handle error for a handle whose fact was deleted.
    #[must_use]
    pub fn stale_handle(id: FactId) -> Self {
        Self::new(ErrorKind::StaleHandle(id))
    }

    /// Creates an unknown handle error for an id the store never issued.
    #[must_use]
    pub fn unknown_handle(id: FactId) -> Self {
        Self::new(ErrorKind::UnknownHandle(id))
    }

    /// Creates an unknown fact type error.
    #[must_use]
    pub fn unknown_type(name: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownType(name.into()))
    }

    /// Creates an unknown field error.
    #[must_use]
    pub fn unknown_field(fact_type: impl Into<String>, field: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownField {
            fact_type: fact_type.into(),
            field: field.into(),
        })
    }

    /// Creates an invalid rule error, raised while building a rule base.
    #[must_use]
    pub fn invalid_rule(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRule {
            rule: rule.into(),
            message: message.into(),
        })
    }

    /// Creates an invalid update error.
    #[must_use]
    pub fn invalid_update(fact: FactId, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidUpdate {
            fact,
            message: message.into(),
        })
    }

    /// Creates a network inconsistency error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network(message.into()))
    }

    /// Creates a consequence failure error.
    #[must_use]
    pub fn consequence_failed(rule: impl Into<String>, activation: u64, source: Error) -> Self {
        Self::new(ErrorKind::ConsequenceFailed {
            rule: rule.into(),
            activation,
            source: Box::new(source),
        })
    }

    /// Creates a constraint failure error. Returned by predicates.
    #[must_use]
    pub fn constraint_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConstraintFailed(message.into()))
    }

    /// Creates a semantic limit exceeded error.
    #[must_use]
    pub fn limit_exceeded(limit: SemanticLimit) -> Self {
        Self::new(ErrorKind::LimitExceeded(limit))
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal(message.into()))
    }
}

/// Categorized error kinds for pattern matching.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// Type mismatch during schema validation.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The expected type.
        expected: Type,
        /// The actual type encountered.
        actual: Type,
    },

    /// Handle refers to a fact that has been deleted.
    #[error("stale fact handle: {0}")]
    StaleHandle(FactId),

    /// Handle was never issued by this store.
    #[error("unknown fact handle: {0}")]
    UnknownHandle(FactId),

    /// Fact type was not declared.
    #[error("unknown fact type: {0}")]
    UnknownType(String),

    /// Field is not declared on the fact type.
    #[error("unknown field: {field} on {fact_type}")]
    UnknownField {
        /// The fact type that was queried.
        fact_type: String,
        /// The field name that was not found.
        field: String,
    },

    /// Rule definition is malformed.
    #[error("invalid rule {rule}: {message}")]
    InvalidRule {
        /// The offending rule.
        rule: String,
        /// What is wrong with it.
        message: String,
    },

    /// Update cannot be applied to the fact.
    #[error("invalid update of {fact}: {message}")]
    InvalidUpdate {
        /// The fact being updated.
        fact: FactId,
        /// Why the update was rejected.
        message: String,
    },

    /// Node network is inconsistent.
    #[error("network error: {0}")]
    Network(String),

    /// A rule consequence returned an error; the fire loop stopped.
    #[error("consequence of rule {rule} failed (activation {activation}): {source}")]
    ConsequenceFailed {
        /// The rule whose consequence failed.
        rule: String,
        /// The activation being fired.
        activation: u64,
        /// The error the consequence returned.
        source: Box<Error>,
    },

    /// A constraint predicate could not be evaluated.
    #[error("constraint failed: {0}")]
    ConstraintFailed(String),

    /// Semantic limit exceeded (kill switch triggered).
    #[error("limit exceeded: {0}")]
    LimitExceeded(SemanticLimit),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Semantic limits (kill switches) that can be exceeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SemanticLimit {
    /// Maximum activations fired by a single fire loop exceeded.
    MaxActivations {
        /// The configured limit.
        limit: usize,
        /// Additional context about which rule(s) caused the issue.
        context: Option<String>,
    },
}

impl fmt::Display for SemanticLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MaxActivations { limit, context } => {
                write!(f, "max activations ({limit}) exceeded")?;
                if let Some(ctx) = context {
                    write!(f, ": {ctx}")?;
                }
                Ok(())
            }
        }
    }
}

/// Context about where an error occurred.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// Rule or node name.
    pub source: Option<String>,
    /// Chain of rules and nodes that led to the error.
    pub stack: Vec<String>,
}

impl ErrorContext {
    /// Creates a new empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the source rule or node.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Adds a stack frame.
    #[must_use]
    pub fn with_frame(mut self, frame: impl Into<String>) -> Self {
        self.stack.push(frame.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(source) = &self.source {
            write!(f, "at {source}")?;
        }
        if !self.stack.is_empty() {
            writeln!(f)?;
            for frame in &self.stack {
                writeln!(f, "  in {frame}")?;
            }
        }
        Ok(())
    }
}

/// Result type alias using the Trellis error.
pub type Result<T> = std::result::Result<T, Error>;
