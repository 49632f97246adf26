//! Integration tests for the agenda
//!
//! Tests salience, conflict strategies, agenda groups and focus, no-loop,
//! halting, and bounded firing.

use trellis_engine::{ConflictStrategy, MAIN_GROUP, Pattern, Rule, SessionConfig};

use crate::support::{Log, int, session, session_with, shop};

fn logging_rule(name: &str, log: &Log, pattern: Pattern) -> Rule {
    let sink = log.clone();
    let label = name.to_string();
    Rule::new(name).when(pattern).then(move |_| {
        sink.push(label.clone());
        Ok(())
    })
}

// =============================================================================
// Conflict Resolution
// =============================================================================

#[test]
fn higher_salience_fires_first() {
    let log = Log::default();
    let (mut builder, shop) = shop();
    for (name, salience) in [("low", -5), ("high", 10), ("normal", 0)] {
        builder
            .add_rule(logging_rule(name, &log, Pattern::new(shop.customer)).salience(salience))
            .unwrap();
    }
    let mut session = session(&builder);
    session.insert(shop.customer_fact(1, "gold")).unwrap();

    assert_eq!(session.fire_all(None).unwrap(), 3);
    assert_eq!(log.entries(), vec!["high", "normal", "low"]);
}

#[test]
fn strategy_breaks_salience_ties() {
    let (mut builder, shop) = shop();
    let log = Log::default();
    let sink = log.clone();
    let id = shop.id;
    builder
        .add_rule(
            Rule::new("seen")
                .when(Pattern::new(shop.customer))
                .then(move |ctx| {
                    sink.push(int(ctx.fact(0)?.get(id)).to_string());
                    Ok(())
                }),
        )
        .unwrap();
    let base = builder.build().unwrap();

    for (strategy, expected) in [
        (ConflictStrategy::Fifo, ["1", "2", "3"]),
        (ConflictStrategy::Lifo, ["3", "2", "1"]),
        (ConflictStrategy::FactRecency, ["3", "2", "1"]),
    ] {
        log.clear();
        let config = SessionConfig::default().with_conflict_strategy(strategy);
        let mut session = session_with(base.clone(), config);
        for n in 1..=3 {
            session.insert(shop.customer_fact(n, "gold")).unwrap();
        }
        session.fire_all(None).unwrap();
        assert_eq!(log.entries(), expected, "{strategy:?}");
    }
}

#[test]
fn dynamic_salience_reads_the_match() {
    let (mut builder, shop) = shop();
    let log = Log::default();
    let sink = log.clone();
    let total = shop.total;
    builder
        .add_rule(
            Rule::new("largest-first")
                .when(Pattern::new(shop.order))
                .dynamic_salience(move |view| {
                    view.fact(0)
                        .and_then(|f| f.get(total).as_int())
                        .and_then(|n| i32::try_from(n).ok())
                        .unwrap_or(0)
                })
                .then(move |ctx| {
                    sink.push(int(ctx.fact(0)?.get(total)).to_string());
                    Ok(())
                }),
        )
        .unwrap();
    let mut session = session(&builder);
    for total in [10, 30, 20] {
        session.insert(shop.order_fact(1, total)).unwrap();
    }

    session.fire_all(None).unwrap();
    assert_eq!(log.entries(), vec!["30", "20", "10"]);
}

// =============================================================================
// Agenda Groups
// =============================================================================

#[test]
fn focused_group_fires_before_returning_to_main() {
    let (mut builder, shop) = shop();
    let log = Log::default();
    let sink = log.clone();
    builder
        .add_rule(
            Rule::new("start")
                .salience(5)
                .when(Pattern::new(shop.customer))
                .then(move |ctx| {
                    sink.push("start");
                    ctx.set_focus("billing");
                    Ok(())
                }),
        )
        .unwrap();
    builder
        .add_rule(logging_rule("tidy", &log, Pattern::new(shop.customer)))
        .unwrap();
    builder
        .add_rule(logging_rule("bill", &log, Pattern::new(shop.customer)).agenda_group("billing"))
        .unwrap();
    let mut session = session(&builder);
    session.insert(shop.customer_fact(1, "gold")).unwrap();

    assert_eq!(session.fire_all(None).unwrap(), 3);
    assert_eq!(log.entries(), vec!["start", "bill", "tidy"]);
    assert_eq!(session.focus_stack().len(), 1);
    assert_eq!(session.focus_stack()[0].as_ref(), MAIN_GROUP);
}

#[test]
fn unfocused_groups_wait() {
    let (mut builder, shop) = shop();
    let log = Log::default();
    builder
        .add_rule(logging_rule("bill", &log, Pattern::new(shop.customer)).agenda_group("billing"))
        .unwrap();
    let mut session = session(&builder);
    session.insert(shop.customer_fact(1, "gold")).unwrap();
    session.insert(shop.customer_fact(2, "gold")).unwrap();

    assert_eq!(session.fire_all(None).unwrap(), 0);
    assert_eq!(session.pending_activations().len(), 2);
    assert!(session.agenda_groups().iter().any(|g| g.as_ref() == "billing"));

    assert_eq!(session.clear_agenda_group("billing"), 2);
    assert!(session.pending_activations().is_empty());
}

#[test]
fn auto_focus_pushes_its_group() {
    let (mut builder, shop) = shop();
    let log = Log::default();
    builder
        .add_rule(
            logging_rule("urgent", &log, Pattern::new(shop.alert))
                .agenda_group("alerts")
                .auto_focus(true),
        )
        .unwrap();
    let mut session = session(&builder);
    session.insert(shop.alert_fact("fraud")).unwrap();

    assert_eq!(session.focus_stack().last().map(|g| g.as_ref()), Some("alerts"));
    assert_eq!(session.fire_all(None).unwrap(), 1);
    assert_eq!(log.entries(), vec!["urgent"]);
}

// =============================================================================
// Loop Control
// =============================================================================

#[test]
fn no_loop_ignores_self_inflicted_changes() {
    let (mut builder, shop) = shop();
    let total = shop.total;
    builder
        .add_rule(
            Rule::new("surcharge")
                .no_loop(true)
                .when(Pattern::new(shop.order).watch(total))
                .then(move |ctx| {
                    let id = ctx.handle(0).unwrap();
                    ctx.modify(id, |f| f.set(total, int(f.get(total)) + 1))
                }),
        )
        .unwrap();
    let mut session = session(&builder);
    let order = session.insert(shop.order_fact(1, 100)).unwrap();

    assert_eq!(session.fire_all(None).unwrap(), 1);
    assert_eq!(int(session.get(order).unwrap().get(total)), 101);

    session.modify(order, |f| f.set(total, 200)).unwrap();
    assert_eq!(session.fire_all(None).unwrap(), 1);
    assert_eq!(int(session.get(order).unwrap().get(total)), 201);
}

#[test]
fn halt_stops_after_the_current_consequence() {
    let (mut builder, shop) = shop();
    builder
        .add_rule(
            Rule::new("stop")
                .when(Pattern::new(shop.customer))
                .then(|ctx| {
                    ctx.halt();
                    Ok(())
                }),
        )
        .unwrap();
    let mut session = session(&builder);
    for n in 1..=3 {
        session.insert(shop.customer_fact(n, "gold")).unwrap();
    }

    assert_eq!(session.fire_all(None).unwrap(), 1);
    assert!(session.is_halted());
    assert_eq!(session.fire_all(None).unwrap(), 1);
    assert_eq!(session.pending_activations().len(), 1);
}

#[test]
fn bounded_fire_leaves_the_rest_pending() {
    let (mut builder, shop) = shop();
    let log = Log::default();
    builder
        .add_rule(logging_rule("seen", &log, Pattern::new(shop.customer)))
        .unwrap();
    let mut session = session(&builder);
    for n in 1..=3 {
        session.insert(shop.customer_fact(n, "gold")).unwrap();
    }

    assert_eq!(session.fire_all(Some(2)).unwrap(), 2);
    assert_eq!(session.pending_activations().len(), 1);
    assert_eq!(session.clear_agenda(), 1);
    assert_eq!(session.fire_all(None).unwrap(), 0);
}
