//! Integration tests for truth maintenance
//!
//! Tests logical inserts, multiple support, stated overrides, negative
//! support, and withdrawal of justifications a re-fired match no longer
//! makes.

use trellis_engine::{AlphaConstraint, Operator, Pattern, Rule};
use trellis_foundation::Value;

use crate::support::{int, session, shop};

// =============================================================================
// Positive Support
// =============================================================================

#[test]
fn justified_fact_lives_while_any_support_remains() {
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("gold-alert")
                .when(Pattern::new(shop.customer).field_eq(shop.tier, "gold"))
                .then(move |ctx| {
                    ctx.insert_logical(shop.alert_fact("gold"))?;
                    Ok(())
                }),
        )
        .unwrap();
    let mut session = session(&builder);
    let first = session.insert(shop.customer_fact(1, "gold")).unwrap();
    let second = session.insert(shop.customer_fact(2, "gold")).unwrap();
    session.fire_all(None).unwrap();

    let alert = session.lookup(&shop.alert_fact("gold")).unwrap();
    assert!(session.is_justified(alert));
    let key = session.fact_handle(alert).unwrap().key;
    assert_eq!(session.belief(key).unwrap().positive_len(), 2);

    session.delete(first).unwrap();
    assert_eq!(session.lookup(&shop.alert_fact("gold")), Some(alert));

    session.modify(second, |f| f.set(shop.tier, "basic")).unwrap();
    assert!(session.lookup(&shop.alert_fact("gold")).is_none());
    assert!(session.get(alert).is_err());
}

#[test]
fn justified_facts_chain() {
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("flag-large")
                .when(
                    Pattern::new(shop.order)
                        .filter(AlphaConstraint::literal(shop.total, Operator::Gt, 1000)),
                )
                .then(move |ctx| {
                    let owner = int(ctx.fact(0)?.get(shop.owner));
                    ctx.insert_logical(shop.alert_of("large", owner))?;
                    Ok(())
                }),
        )
        .unwrap();
    builder
        .add_rule(
            Rule::new("escalate")
                .when(Pattern::new(shop.alert).field_eq(shop.kind, "large"))
                .then(move |ctx| {
                    let owner = int(ctx.fact(0)?.get(shop.owner));
                    ctx.insert_logical(shop.alert_of("review", owner))?;
                    Ok(())
                }),
        )
        .unwrap();
    let mut session = session(&builder);
    let order = session.insert(shop.order_fact(7, 5000)).unwrap();
    assert_eq!(session.fire_all(None).unwrap(), 2);
    assert!(session.lookup(&shop.alert_of("review", 7)).is_some());

    session.delete(order).unwrap();
    assert!(session.lookup(&shop.alert_of("large", 7)).is_none());
    assert!(session.lookup(&shop.alert_of("review", 7)).is_none());
    assert_eq!(session.fact_count(), 0);
}

#[test]
fn stated_insert_takes_over_a_justified_fact() {
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("gold-alert")
                .when(Pattern::new(shop.customer).field_eq(shop.tier, "gold"))
                .then(move |ctx| {
                    ctx.insert_logical(shop.alert_fact("gold"))?;
                    Ok(())
                }),
        )
        .unwrap();
    let mut session = session(&builder);
    let customer = session.insert(shop.customer_fact(1, "gold")).unwrap();
    session.fire_all(None).unwrap();
    let justified = session.lookup(&shop.alert_fact("gold")).unwrap();

    let stated = session.insert(shop.alert_fact("gold")).unwrap();
    assert_eq!(stated, justified);
    assert!(!session.is_justified(stated));

    session.delete(customer).unwrap();
    assert_eq!(session.lookup(&shop.alert_fact("gold")), Some(stated));
}

// =============================================================================
// Negative Support
// =============================================================================

#[test]
fn negative_support_overrides_positive() {
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("suspect")
                .when(Pattern::new(shop.customer).field_eq(shop.tier, "new"))
                .then(move |ctx| {
                    ctx.insert_logical(shop.alert_fact("suspect"))?;
                    Ok(())
                }),
        )
        .unwrap();
    builder
        .add_rule(
            Rule::new("vouched")
                .when(Pattern::new(shop.order).field_eq(shop.note, "vouched"))
                .then(move |ctx| {
                    ctx.insert_logical_negative(shop.alert_fact("suspect"))?;
                    Ok(())
                }),
        )
        .unwrap();
    let mut session = session(&builder);
    session.insert(shop.customer_fact(1, "new")).unwrap();
    session.fire_all(None).unwrap();
    assert!(session.lookup(&shop.alert_fact("suspect")).is_some());

    let voucher = session
        .insert(shop.order_fact(1, 0).with(shop.note, "vouched"))
        .unwrap();
    session.fire_all(None).unwrap();
    assert!(session.lookup(&shop.alert_fact("suspect")).is_none());
    assert!(session.justified_absences().is_empty());

    session.delete(voucher).unwrap();
    assert!(session.lookup(&shop.alert_fact("suspect")).is_some());
}

#[test]
fn absence_can_be_justified_alone() {
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("no-fraud")
                .when(Pattern::new(shop.customer))
                .then(move |ctx| {
                    ctx.insert_logical_negative(shop.alert_fact("fraud"))?;
                    Ok(())
                }),
        )
        .unwrap();
    let mut session = session(&builder);
    let customer = session.insert(shop.customer_fact(1, "gold")).unwrap();
    session.fire_all(None).unwrap();

    let absent = session.justified_absences();
    assert_eq!(absent.len(), 1);
    assert_eq!(absent[0].get(shop.kind), &Value::from("fraud"));
    assert_eq!(session.fact_count(), 1);

    session.delete(customer).unwrap();
    assert!(session.justified_absences().is_empty());
}

// =============================================================================
// Re-firing
// =============================================================================

#[test]
fn refired_match_withdraws_what_it_no_longer_asserts() {
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("tier-alert")
                .when(Pattern::new(shop.customer).watch(shop.tier))
                .then(move |ctx| {
                    let customer = ctx.fact(0)?.clone();
                    let tier = customer.get(shop.tier).clone();
                    if tier.as_str() != Some("basic") {
                        let kind = tier.as_str().unwrap_or_default().to_string();
                        ctx.insert_logical(shop.alert_fact(&kind))?;
                    }
                    Ok(())
                }),
        )
        .unwrap();
    let mut session = session(&builder);
    let customer = session.insert(shop.customer_fact(1, "gold")).unwrap();
    session.fire_all(None).unwrap();
    assert!(session.lookup(&shop.alert_fact("gold")).is_some());

    session.modify(customer, |f| f.set(shop.tier, "silver")).unwrap();
    session.fire_all(None).unwrap();
    assert!(session.lookup(&shop.alert_fact("gold")).is_none());
    assert!(session.lookup(&shop.alert_fact("silver")).is_some());

    session.modify(customer, |f| f.set(shop.tier, "basic")).unwrap();
    session.fire_all(None).unwrap();
    assert_eq!(session.fact_count(), 1);
}
