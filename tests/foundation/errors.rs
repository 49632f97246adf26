//! Integration tests for Error types
//!
//! Tests error construction, display, context, and error kinds.

use trellis_foundation::{Error, ErrorContext, ErrorKind, FactId, SemanticLimit, Type};

// =============================================================================
// Error Construction
// =============================================================================

#[test]
fn error_type_mismatch() {
    let err = Error::type_mismatch(Type::Int, Type::String);
    assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));
    let msg = format!("{err}");
    assert!(msg.contains("int"));
    assert!(msg.contains("string"));
}

#[test]
fn error_stale_handle() {
    let err = Error::stale_handle(FactId::new(5, 2));
    assert!(matches!(err.kind, ErrorKind::StaleHandle(_)));
    assert!(format!("{err}").contains('5'));
}

#[test]
fn error_unknown_field() {
    let err = Error::unknown_field("Order", "colour");
    match &err.kind {
        ErrorKind::UnknownField { fact_type, field } => {
            assert_eq!(fact_type, "Order");
            assert_eq!(field, "colour");
        }
        other => panic!("unexpected kind: {other:?}"),
    }
}

#[test]
fn error_invalid_update() {
    let err = Error::invalid_update(FactId::new(1, 0), "fact type cannot change");
    assert!(matches!(err.kind, ErrorKind::InvalidUpdate { .. }));
    assert!(format!("{err}").contains("fact type cannot change"));
}

#[test]
fn error_consequence_failed_wraps_source() {
    let err = Error::consequence_failed("discount", 7, Error::internal("boom"));
    match &err.kind {
        ErrorKind::ConsequenceFailed {
            rule,
            activation,
            source,
        } => {
            assert_eq!(rule, "discount");
            assert_eq!(*activation, 7);
            assert!(matches!(source.kind, ErrorKind::Internal(_)));
        }
        other => panic!("unexpected kind: {other:?}"),
    }
    let msg = format!("{err}");
    assert!(msg.contains("discount"));
    assert!(msg.contains("boom"));
}

#[test]
fn error_limit_exceeded() {
    let err = Error::limit_exceeded(SemanticLimit::MaxActivations {
        limit: 10,
        context: Some("rule loop".to_string()),
    });
    let msg = format!("{err}");
    assert!(msg.contains("10"));
    assert!(msg.contains("rule loop"));
}

// =============================================================================
// Error Context
// =============================================================================

#[test]
fn error_context_display() {
    let ctx = ErrorContext::new()
        .with_source("join#3")
        .with_frame("rule discount")
        .with_frame("terminal#9");
    let text = ctx.to_string();
    assert!(text.starts_with("at join#3"));
    assert!(text.contains("in rule discount"));
    assert!(text.contains("in terminal#9"));
}

#[test]
fn error_with_context_keeps_kind() {
    let err = Error::network("orphan sink").with_context(ErrorContext::new().with_source("builder"));
    assert!(matches!(err.kind, ErrorKind::Network(_)));
    assert_eq!(err.context.unwrap().source.as_deref(), Some("builder"));
}
