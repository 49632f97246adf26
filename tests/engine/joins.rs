//! Integration tests for joins
//!
//! Tests equality joins, predicate joins, subtypes, entry points, and the
//! effect of retracting or modifying either side of a join.

use trellis_engine::{BetaPredicate, Pattern, Rule};

use crate::support::{Log, int, session, shop};

fn customer_orders(log: &Log) -> (trellis_engine::RuleBaseBuilder, crate::support::Shop) {
    let (mut builder, shop) = shop();
    let sink = log.clone();
    let (id, total) = (shop.id, shop.total);
    builder
        .add_rule(
            Rule::new("customer-orders")
                .when(Pattern::new(shop.customer))
                .when(Pattern::new(shop.order).join_eq(0, shop.id, shop.owner))
                .then(move |ctx| {
                    let customer = int(ctx.fact(0)?.get(id));
                    let order = int(ctx.fact(1)?.get(total));
                    sink.push(format!("{customer}:{order}"));
                    Ok(())
                }),
        )
        .unwrap();
    (builder, shop)
}

// =============================================================================
// Equality Joins
// =============================================================================

#[test]
fn join_matches_on_equal_fields() {
    let log = Log::default();
    let (builder, shop) = customer_orders(&log);
    let mut session = session(&builder);

    session.insert(shop.customer_fact(1, "gold")).unwrap();
    session.insert(shop.customer_fact(2, "basic")).unwrap();
    session.insert(shop.order_fact(1, 10)).unwrap();
    session.insert(shop.order_fact(1, 20)).unwrap();
    session.insert(shop.order_fact(2, 30)).unwrap();
    session.insert(shop.order_fact(3, 40)).unwrap();

    assert_eq!(session.match_count("customer-orders"), 3);
    assert_eq!(session.fire_all(None).unwrap(), 3);

    let mut entries = log.entries();
    entries.sort();
    assert_eq!(entries, vec!["1:10", "1:20", "2:30"]);
}

#[test]
fn insertion_order_does_not_change_matches() {
    let log = Log::default();
    let (builder, shop) = customer_orders(&log);

    let mut customers_first = session(&builder);
    customers_first.insert(shop.customer_fact(1, "gold")).unwrap();
    customers_first.insert(shop.order_fact(1, 10)).unwrap();
    customers_first.insert(shop.order_fact(1, 20)).unwrap();

    let mut orders_first = session(&builder);
    orders_first.insert(shop.order_fact(1, 20)).unwrap();
    orders_first.insert(shop.order_fact(1, 10)).unwrap();
    orders_first.insert(shop.customer_fact(1, "gold")).unwrap();

    assert_eq!(customers_first.match_count("customer-orders"), 2);
    assert_eq!(orders_first.match_count("customer-orders"), 2);
}

#[test]
fn retracting_either_side_cancels_matches() {
    let log = Log::default();
    let (builder, shop) = customer_orders(&log);
    let mut session = session(&builder);

    let alice = session.insert(shop.customer_fact(1, "gold")).unwrap();
    session.insert(shop.customer_fact(2, "gold")).unwrap();
    let first = session.insert(shop.order_fact(1, 10)).unwrap();
    session.insert(shop.order_fact(1, 20)).unwrap();
    session.insert(shop.order_fact(2, 30)).unwrap();
    assert_eq!(session.pending_activations().len(), 3);

    session.delete(first).unwrap();
    assert_eq!(session.pending_activations().len(), 2);

    session.delete(alice).unwrap();
    assert_eq!(session.match_count("customer-orders"), 1);
    assert_eq!(session.fire_all(None).unwrap(), 1);
    assert_eq!(log.entries(), vec!["2:30"]);
    assert!(session.stats().activations_cancelled >= 2);
}

#[test]
fn modifying_the_join_field_moves_the_match() {
    let log = Log::default();
    let (builder, shop) = customer_orders(&log);
    let mut session = session(&builder);

    session.insert(shop.customer_fact(1, "gold")).unwrap();
    session.insert(shop.customer_fact(2, "gold")).unwrap();
    let order = session.insert(shop.order_fact(3, 10)).unwrap();
    assert_eq!(session.match_count("customer-orders"), 0);

    session.modify(order, |f| f.set(shop.owner, 2)).unwrap();
    assert_eq!(session.match_count("customer-orders"), 1);

    session.modify(order, |f| f.set(shop.owner, 1)).unwrap();
    assert_eq!(session.match_count("customer-orders"), 1);
    session.fire_all(None).unwrap();
    assert_eq!(log.entries(), vec!["1:10"]);
}

#[test]
fn self_join_never_pairs_a_fact_with_itself() {
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("same-tier")
                .when(Pattern::new(shop.customer))
                .when(Pattern::new(shop.customer).join_eq(0, shop.tier, shop.tier))
                .then(|_| Ok(())),
        )
        .unwrap();
    let mut session = session(&builder);

    session.insert(shop.customer_fact(1, "gold")).unwrap();
    assert_eq!(session.match_count("same-tier"), 0);

    session.insert(shop.customer_fact(2, "gold")).unwrap();
    session.insert(shop.customer_fact(3, "basic")).unwrap();
    assert_eq!(session.match_count("same-tier"), 2);
}

// =============================================================================
// Predicate Joins
// =============================================================================

#[test]
fn predicate_joins_compare_across_facts() {
    let (mut builder, shop) = shop();
    let (id, total) = (shop.id, shop.total);
    let larger = BetaPredicate::new("order-exceeds-id-hundreds", move |view, order| {
        let customer = view.fact(0).map_or(0, |c| int(c.get(id)));
        Ok(int(order.get(total)) > customer * 100)
    })
    .reads_left(0, id)
    .reads_right(total);
    builder
        .add_rule(
            Rule::new("big-for-customer")
                .when(Pattern::new(shop.customer))
                .when(Pattern::new(shop.order).join(larger))
                .then(|_| Ok(())),
        )
        .unwrap();
    let mut session = session(&builder);

    session.insert(shop.customer_fact(1, "gold")).unwrap();
    session.insert(shop.customer_fact(5, "gold")).unwrap();
    let order = session.insert(shop.order_fact(0, 300)).unwrap();
    assert_eq!(session.match_count("big-for-customer"), 1);

    session.modify(order, |f| f.set(shop.total, 900)).unwrap();
    assert_eq!(session.match_count("big-for-customer"), 2);
}

// =============================================================================
// Types and Entry Points
// =============================================================================

#[test]
fn supertype_patterns_match_subtype_facts() {
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("any-customer")
                .when(Pattern::new(shop.customer))
                .then(|_| Ok(())),
        )
        .unwrap();
    builder
        .add_rule(Rule::new("vip-only").when(Pattern::new(shop.vip)).then(|_| Ok(())))
        .unwrap();
    let mut session = session(&builder);

    session.insert(shop.customer_fact(1, "basic")).unwrap();
    session
        .insert(
            trellis_foundation::Fact::new(shop.vip)
                .with(shop.id, 2)
                .with(shop.tier, "gold"),
        )
        .unwrap();

    assert_eq!(session.match_count("any-customer"), 2);
    assert_eq!(session.match_count("vip-only"), 1);
}

#[test]
fn entry_points_partition_working_memory() {
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("incoming")
                .when(Pattern::new(shop.order).from_entry_point("incoming"))
                .then(|_| Ok(())),
        )
        .unwrap();
    builder
        .add_rule(Rule::new("default").when(Pattern::new(shop.order)).then(|_| Ok(())))
        .unwrap();
    let mut session = session(&builder);

    session.insert(shop.order_fact(1, 10)).unwrap();
    session.insert_into("incoming", shop.order_fact(2, 20)).unwrap();
    session.insert_into("incoming", shop.order_fact(3, 30)).unwrap();

    assert_eq!(session.match_count("incoming"), 2);
    assert_eq!(session.match_count("default"), 1);
    assert_eq!(session.fact_count(), 3);
}
