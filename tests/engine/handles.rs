//! Integration tests for fact handles
//!
//! Tests equality and identity semantics, stale handles, schema validation,
//! and the external handle encoding.

use trellis_engine::{EqualityBehavior, ExternalHandle, SessionConfig, TraitStatus};
use trellis_foundation::{ErrorKind, Fact};

use crate::support::{session, session_with, shop};

// =============================================================================
// Equality Semantics
// =============================================================================

#[test]
fn equality_mode_returns_the_existing_handle() {
    let (builder, shop) = shop();
    let mut session = session(&builder);
    let first = session.insert(shop.customer_fact(1, "gold")).unwrap();
    let second = session.insert(shop.customer_fact(1, "gold")).unwrap();

    assert_eq!(first, second);
    assert_eq!(session.fact_count(), 1);
}

#[test]
fn identity_mode_keeps_every_insert() {
    let (builder, shop) = shop();
    let config = SessionConfig::default().with_equality(EqualityBehavior::Identity);
    let mut session = session_with(builder.build().unwrap(), config);
    let first = session.insert(shop.customer_fact(1, "gold")).unwrap();
    let second = session.insert(shop.customer_fact(1, "gold")).unwrap();

    assert_ne!(first, second);
    assert_eq!(session.fact_count(), 2);
    session.delete(first).unwrap();
    assert_eq!(session.lookup(&shop.customer_fact(1, "gold")), Some(second));
}

#[test]
fn objects_can_be_filtered() {
    let (builder, shop) = shop();
    let mut session = session(&builder);
    for n in 1..=4 {
        session.insert(shop.order_fact(n, n * 100)).unwrap();
    }
    session.insert(shop.customer_fact(1, "gold")).unwrap();

    let total = shop.total;
    let large: Vec<_> = session
        .objects_matching(|f| f.get(total).as_int().is_some_and(|n| n > 200))
        .collect();
    assert_eq!(large.len(), 2);
    assert_eq!(session.objects().count(), 5);
}

// =============================================================================
// Handle Lifecycle
// =============================================================================

#[test]
fn deleted_handles_go_stale() {
    let (builder, shop) = shop();
    let mut session = session(&builder);
    let old = session.insert(shop.customer_fact(1, "gold")).unwrap();
    session.delete(old).unwrap();
    let new = session.insert(shop.customer_fact(2, "gold")).unwrap();

    assert_ne!(old, new);
    let err = session.get(old).unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::StaleHandle(_) | ErrorKind::UnknownHandle(_)
    ));
    assert!(session.delete(old).is_err());
    assert!(session.update(old, shop.customer_fact(3, "gold")).is_err());
}

#[test]
fn updates_are_validated() {
    let (builder, shop) = shop();
    let mut session = session(&builder);
    let customer = session.insert(shop.customer_fact(1, "gold")).unwrap();

    let err = session.update(customer, shop.order_fact(1, 1)).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidUpdate { .. }));

    let err = session
        .update(customer, shop.customer_fact(1, "gold").with(shop.total, 5))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::UnknownField { .. }));

    let err = session
        .update(customer, Fact::new(shop.customer).with(shop.id, "one"))
        .unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TypeMismatch { .. }));

    assert_eq!(
        session.get(customer).unwrap(),
        &shop.customer_fact(1, "gold")
    );
}

// =============================================================================
// External Handles
// =============================================================================

#[test]
fn external_handles_resolve_while_live() {
    let (builder, shop) = shop();
    let mut session = session(&builder);
    let id = session.insert(shop.customer_fact(1, "gold")).unwrap();

    let external = session.to_external(id).unwrap();
    assert_eq!(external.type_name, "Customer");
    assert_eq!(external.trait_status, TraitStatus::NonTrait);
    let encoded = external.to_string();
    assert_eq!(ExternalHandle::parse(&encoded), Some(external));
    assert_eq!(session.resolve(&encoded), Some(id));

    session.delete(id).unwrap();
    assert_eq!(session.resolve(&encoded), None);
    assert!(session.to_external(id).is_err());
}

#[test]
fn foreign_and_malformed_strings_resolve_to_nothing() {
    let (builder, _) = shop();
    let session = session(&builder);

    assert_eq!(
        session.resolve("0:2147483648:171497379:-1361525545:2147483648:null:NON_TRAIT:java.lang.String"),
        None
    );
    assert_eq!(session.resolve("not a handle"), None);
    assert_eq!(session.resolve("0:0:0:0:0:null:NON_TRAIT:InitialFact"), None);
}
