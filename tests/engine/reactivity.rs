//! Integration tests for property reactivity
//!
//! Tests that modifications only wake the patterns that read the changed
//! fields, explicit masks, and the failure and tracing paths of propagation.

use trellis_engine::{
    AlphaConstraint, AlphaPredicate, BitMask, Operator, Pattern, RuleBaseConfig, Rule,
    SessionConfig,
};

use crate::support::{int, session, session_with, shop, shop_with};

fn large_orders(config: RuleBaseConfig) -> (trellis_engine::RuleBaseBuilder, crate::support::Shop) {
    let (mut builder, shop) = shop_with(config);
    builder
        .add_rule(
            Rule::new("large")
                .when(
                    Pattern::new(shop.order)
                        .filter(AlphaConstraint::literal(shop.total, Operator::Gt, 100)),
                )
                .then(|_| Ok(())),
        )
        .unwrap();
    (builder, shop)
}

// =============================================================================
// Listened Fields
// =============================================================================

#[test]
fn unread_fields_do_not_wake_rules() {
    let (builder, shop) = large_orders(RuleBaseConfig::default());
    let mut session = session(&builder);
    let order = session.insert(shop.order_fact(1, 500)).unwrap();
    assert_eq!(session.fire_all(None).unwrap(), 1);

    let before = session.stats().clone();
    session.modify(order, |f| f.set(shop.note, "gift")).unwrap();

    assert_eq!(session.fire_all(None).unwrap(), 0);
    let after = session.stats();
    assert!(after.modifications_skipped > before.modifications_skipped);
    assert_eq!(after.churn(), before.churn());
}

#[test]
fn read_fields_wake_rules() {
    let (builder, shop) = large_orders(RuleBaseConfig::default());
    let mut session = session(&builder);
    let order = session.insert(shop.order_fact(1, 500)).unwrap();
    session.fire_all(None).unwrap();

    session.modify(order, |f| f.set(shop.total, 600)).unwrap();
    assert_eq!(session.fire_all(None).unwrap(), 1);
}

#[test]
fn without_reactivity_every_change_wakes_rules() {
    let config = RuleBaseConfig::default().with_property_reactive(false);
    let (builder, shop) = large_orders(config);
    let mut session = session(&builder);
    let order = session.insert(shop.order_fact(1, 500)).unwrap();
    session.fire_all(None).unwrap();

    session.modify(order, |f| f.set(shop.note, "gift")).unwrap();
    assert_eq!(session.fire_all(None).unwrap(), 1);
}

#[test]
fn explicit_masks_override_the_computed_change() {
    let (builder, shop) = large_orders(RuleBaseConfig::default());
    let mut session = session(&builder);
    let order = session.insert(shop.order_fact(1, 500)).unwrap();
    session.fire_all(None).unwrap();

    let same = session.get(order).unwrap().clone();
    session.update(order, same.clone()).unwrap();
    assert_eq!(session.fire_all(None).unwrap(), 0);

    session
        .update_with_mask(order, same, BitMask::of(shop.total))
        .unwrap();
    assert_eq!(session.fire_all(None).unwrap(), 1);
}

#[test]
fn watched_fields_wake_unconstrained_patterns() {
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("watch-note")
                .when(Pattern::new(shop.order).watch(shop.note))
                .then(|_| Ok(())),
        )
        .unwrap();
    let mut session = session(&builder);
    let order = session.insert(shop.order_fact(1, 5)).unwrap();
    session.fire_all(None).unwrap();

    session.modify(order, |f| f.set(shop.total, 6)).unwrap();
    assert_eq!(session.fire_all(None).unwrap(), 0);
    session.modify(order, |f| f.set(shop.note, "rush")).unwrap();
    assert_eq!(session.fire_all(None).unwrap(), 1);
}

#[test]
fn unoptimized_rule_base_agrees_on_matches() {
    let build = |config: RuleBaseConfig| {
        let (mut builder, shop) = shop_with(config);
        for tier in ["gold", "silver", "bronze", "basic"] {
            builder
                .add_rule(
                    Rule::new(format!("tier-{tier}"))
                        .when(Pattern::new(shop.customer).field_eq(shop.tier, tier))
                        .when(Pattern::new(shop.order).join_eq(0, shop.id, shop.owner))
                        .then(|_| Ok(())),
                )
                .unwrap();
        }
        (builder, shop)
    };
    let (optimized, shop) = build(RuleBaseConfig::default());
    let (plain, _) = build(RuleBaseConfig::unoptimized());
    let mut fast = session(&optimized);
    let mut slow = session(&plain);

    for s in [&mut fast, &mut slow] {
        for (i, tier) in ["gold", "silver", "gold", "basic"].iter().enumerate() {
            let id = i64::try_from(i).unwrap();
            s.insert(shop.customer_fact(id, tier)).unwrap();
            s.insert(shop.order_fact(id, 10)).unwrap();
            s.insert(shop.order_fact(id, 20)).unwrap();
        }
    }
    for tier in ["gold", "silver", "bronze", "basic"] {
        let rule = format!("tier-{tier}");
        assert_eq!(fast.match_count(&rule), slow.match_count(&rule), "{rule}");
    }
    assert_eq!(fast.match_count("tier-gold"), 4);
}

// =============================================================================
// Failures and Tracing
// =============================================================================

#[test]
fn failing_predicates_are_recorded_non_matches() {
    let (mut builder, shop) = shop();
    let total = shop.total;
    let strict = AlphaPredicate::new("total-is-even", move |fact| match fact.get(total).as_int() {
        Some(n) => Ok(n % 2 == 0),
        None => Err(trellis_engine::constraint::failure("total missing")),
    })
    .reads(total);
    builder
        .add_rule(
            Rule::new("even")
                .when(Pattern::new(shop.order).filter(strict))
                .then(|_| Ok(())),
        )
        .unwrap();
    let mut session = session(&builder);

    session.insert(shop.order_fact(1, 4)).unwrap();
    session
        .insert(trellis_foundation::Fact::new(shop.order).with(shop.owner, 2))
        .unwrap();

    assert_eq!(session.match_count("even"), 1);
    assert_eq!(session.stats().constraint_failures, 1);
    assert_eq!(session.diagnostics().len(), 1);
    assert_eq!(session.diagnostics()[0].constraint.as_ref(), "total-is-even");
}

#[test]
fn panicking_predicates_do_not_poison_the_session() {
    let (mut builder, shop) = shop();
    let total = shop.total;
    let fragile = AlphaPredicate::new("total-divides-100", move |fact| {
        let n = fact.get(total).as_int().unwrap_or_default();
        Ok(100 % n == 0)
    })
    .reads(total);
    builder
        .add_rule(
            Rule::new("divisor")
                .when(Pattern::new(shop.order).filter(fragile))
                .then(|_| Ok(())),
        )
        .unwrap();
    let mut session = session(&builder);

    session.insert(shop.order_fact(1, 0)).unwrap();
    session.insert(shop.order_fact(2, 25)).unwrap();

    assert_eq!(session.match_count("divisor"), 1);
    assert_eq!(session.stats().constraint_failures, 1);
    assert_eq!(session.diagnostics()[0].constraint.as_ref(), "total-divides-100");
    assert!(session.diagnostics()[0].message.contains("panicked"));
    assert_eq!(session.fire_all(None).unwrap(), 1);
}

#[test]
fn traced_sessions_record_the_lifecycle() {
    let (builder, shop) = large_orders(RuleBaseConfig::default());
    let mut session = session_with(builder.build().unwrap(), SessionConfig::traced());
    let order = session.insert(shop.order_fact(1, 500)).unwrap();
    session.fire_all(None).unwrap();
    session.modify(order, |f| f.set(shop.total, 50)).unwrap();

    let trace = session.trace().unwrap();
    assert_eq!(trace.by_event_type("fact_inserted").len(), 1);
    assert_eq!(trace.by_event_type("activation_created").len(), 1);
    assert_eq!(trace.by_event_type("activation_fired").len(), 1);
    assert_eq!(trace.by_event_type("fact_updated").len(), 1);
    assert!(!trace.by_event_type("path_linked").is_empty());
    assert_eq!(int(session.get(order).unwrap().get(shop.total)), 50);
}
