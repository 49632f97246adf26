//! Integration tests for negation, existence, and accumulation

use trellis_engine::{AccumulateFunction, AlphaConstraint, Operator, Pattern, ResultFilter, Rule};
use trellis_foundation::Value;

use crate::support::{Log, session, shop};

// =============================================================================
// Not
// =============================================================================

#[test]
fn not_matches_while_nothing_joins() {
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("idle-customer")
                .when(Pattern::new(shop.customer))
                .not(Pattern::new(shop.order).join_eq(0, shop.id, shop.owner))
                .then(|_| Ok(())),
        )
        .unwrap();
    let mut session = session(&builder);

    session.insert(shop.customer_fact(1, "gold")).unwrap();
    assert_eq!(session.match_count("idle-customer"), 1);

    let first = session.insert(shop.order_fact(1, 10)).unwrap();
    let second = session.insert(shop.order_fact(1, 20)).unwrap();
    assert_eq!(session.match_count("idle-customer"), 0);

    session.delete(first).unwrap();
    assert_eq!(session.match_count("idle-customer"), 0);
    session.delete(second).unwrap();
    assert_eq!(session.match_count("idle-customer"), 1);
    assert_eq!(session.fire_all(None).unwrap(), 1);
}

#[test]
fn leading_not_is_evaluated_against_an_empty_session() {
    let log = Log::default();
    let sink = log.clone();
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("all-quiet")
                .not(Pattern::new(shop.alert))
                .then(move |ctx| {
                    assert!(ctx.handle(0).is_none());
                    sink.push("quiet");
                    Ok(())
                }),
        )
        .unwrap();
    let mut session = session(&builder);
    assert_eq!(session.match_count("all-quiet"), 1);
    assert_eq!(session.fire_all(None).unwrap(), 1);

    let alert = session.insert(shop.alert_fact("fraud")).unwrap();
    assert_eq!(session.match_count("all-quiet"), 0);
    session.delete(alert).unwrap();
    assert_eq!(session.fire_all(None).unwrap(), 1);
    assert_eq!(log.entries(), vec!["quiet", "quiet"]);
}

#[test]
fn not_reacts_to_filtered_modifications() {
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("no-large-orders")
                .when(Pattern::new(shop.customer))
                .not(
                    Pattern::new(shop.order)
                        .join_eq(0, shop.id, shop.owner)
                        .filter(AlphaConstraint::literal(shop.total, Operator::Gt, 100)),
                )
                .then(|_| Ok(())),
        )
        .unwrap();
    let mut session = session(&builder);
    session.insert(shop.customer_fact(1, "gold")).unwrap();
    let order = session.insert(shop.order_fact(1, 50)).unwrap();
    assert_eq!(session.match_count("no-large-orders"), 1);

    session.modify(order, |f| f.set(shop.total, 500)).unwrap();
    assert_eq!(session.match_count("no-large-orders"), 0);

    session.modify(order, |f| f.set(shop.total, 5)).unwrap();
    assert_eq!(session.match_count("no-large-orders"), 1);
}

// =============================================================================
// Exists
// =============================================================================

#[test]
fn exists_matches_once_however_many_facts_join() {
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("has-orders")
                .when(Pattern::new(shop.customer))
                .exists(Pattern::new(shop.order).join_eq(0, shop.id, shop.owner))
                .then(|_| Ok(())),
        )
        .unwrap();
    let mut session = session(&builder);

    session.insert(shop.customer_fact(1, "gold")).unwrap();
    assert_eq!(session.match_count("has-orders"), 0);

    let orders: Vec<_> = (1..=3)
        .map(|n| session.insert(shop.order_fact(1, n * 10)).unwrap())
        .collect();
    assert_eq!(session.match_count("has-orders"), 1);
    assert_eq!(session.pending_activations().len(), 1);

    for order in &orders[..2] {
        session.delete(*order).unwrap();
    }
    assert_eq!(session.match_count("has-orders"), 1);
    session.delete(orders[2]).unwrap();
    assert_eq!(session.match_count("has-orders"), 0);
    assert!(session.pending_activations().is_empty());
}

// =============================================================================
// Accumulate
// =============================================================================

#[test]
fn accumulate_tracks_the_aggregate() {
    let log = Log::default();
    let sink = log.clone();
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("big-spender")
                .when(Pattern::new(shop.customer))
                .accumulate(
                    Pattern::new(shop.order).join_eq(0, shop.id, shop.owner),
                    AccumulateFunction::Sum(shop.total),
                    Some(ResultFilter::new("sum>=100", |v| {
                        v.as_int().is_some_and(|n| n >= 100)
                    })),
                )
                .then(move |ctx| {
                    assert!(ctx.handle(1).is_none());
                    let sum = ctx.accumulated(1).cloned().unwrap_or(Value::Nil);
                    sink.push(sum.to_string());
                    Ok(())
                }),
        )
        .unwrap();
    let mut session = session(&builder);

    session.insert(shop.customer_fact(1, "gold")).unwrap();
    let first = session.insert(shop.order_fact(1, 60)).unwrap();
    assert_eq!(session.match_count("big-spender"), 0);

    session.insert(shop.order_fact(1, 70)).unwrap();
    assert_eq!(session.match_count("big-spender"), 1);
    session.fire_all(None).unwrap();

    session.modify(first, |f| f.set(shop.total, 80)).unwrap();
    session.fire_all(None).unwrap();
    assert_eq!(log.entries(), vec!["130", "150"]);

    session.delete(first).unwrap();
    assert_eq!(session.match_count("big-spender"), 0);
}

#[test]
fn unfiltered_count_matches_with_zero() {
    let log = Log::default();
    let sink = log.clone();
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("order-count")
                .when(Pattern::new(shop.customer))
                .accumulate(
                    Pattern::new(shop.order).join_eq(0, shop.id, shop.owner),
                    AccumulateFunction::Count,
                    None,
                )
                .then(move |ctx| {
                    sink.push(ctx.accumulated(1).map(ToString::to_string).unwrap_or_default());
                    Ok(())
                }),
        )
        .unwrap();
    let mut session = session(&builder);

    session.insert(shop.customer_fact(1, "gold")).unwrap();
    session.fire_all(None).unwrap();
    session.insert(shop.order_fact(1, 5)).unwrap();
    session.insert(shop.order_fact(1, 6)).unwrap();
    session.fire_all(None).unwrap();

    assert_eq!(log.entries(), vec!["0", "2"]);
}
