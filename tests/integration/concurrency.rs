//! Sessions driven from several threads
//!
//! Tests `fire_until_halted` fed through session handles, halting an idle
//! loop, and independent sessions sharing one rule base.

use std::sync::Arc;
use std::thread;

use trellis::engine::{Pattern, Rule, RuleBase, RuleBaseConfig, Session};
use trellis::foundation::FactId;

use crate::fixture::{Fired, Ledger, ledger};

fn counting_rules(fired: &Fired) -> (Arc<RuleBase>, Ledger) {
    let (mut builder, ledger) = ledger(RuleBaseConfig::default());
    let sink = fired.clone();
    builder
        .add_rule(
            Rule::new("posted")
                .when(Pattern::new(ledger.entry))
                .then(move |_| {
                    sink.push("posted");
                    Ok(())
                }),
        )
        .unwrap();
    builder
        .add_rule(
            Rule::new("stop")
                .salience(-10)
                .when(Pattern::new(ledger.signal).field_eq(ledger.name, "stop"))
                .then(|ctx| {
                    ctx.halt();
                    Ok(())
                }),
        )
        .unwrap();
    (builder.build().unwrap(), ledger)
}

#[test]
fn submissions_from_other_threads_fire_in_the_drain_loop() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let fired = Fired::default();
    let (base, ledger) = counting_rules(&fired);
    let mut session = Session::with_defaults(base).unwrap();
    let handle = session.handle();

    let runner = thread::spawn(move || {
        let count = session.fire_until_halted().unwrap();
        (count, session)
    });

    let producers: Vec<_> = (0..2_i64)
        .map(|p| {
            let handle = handle.clone();
            thread::spawn(move || {
                (0..5_i64)
                    .map(|n| handle.insert(ledger.entry_fact(p, n)).recv().unwrap().unwrap())
                    .collect::<Vec<FactId>>()
            })
        })
        .collect();
    let inserted: Vec<FactId> = producers
        .into_iter()
        .flat_map(|p| p.join().unwrap())
        .collect();
    handle
        .insert(ledger.signal_fact("stop"))
        .recv()
        .unwrap()
        .unwrap();

    let (count, session) = runner.join().unwrap();
    assert_eq!(inserted.len(), 10);
    assert_eq!(count, 11);
    assert_eq!(fired.len(), 10);
    assert_eq!(session.fact_count(), 11);
    assert!(session.is_halted());
}

#[test]
fn an_idle_loop_stops_on_a_remote_halt() {
    let fired = Fired::default();
    let (base, _) = counting_rules(&fired);
    let mut session = Session::with_defaults(base).unwrap();
    let handle = session.handle();

    let runner = thread::spawn(move || session.fire_until_halted().unwrap());
    handle.halt();

    assert_eq!(runner.join().unwrap(), 0);
}

#[test]
fn a_loop_without_handles_returns_once_drained() {
    let fired = Fired::default();
    let (base, ledger) = counting_rules(&fired);
    let mut session = Session::with_defaults(base).unwrap();
    session.insert(ledger.entry_fact(1, 10)).unwrap();
    session.insert(ledger.entry_fact(1, 20)).unwrap();

    assert_eq!(session.fire_until_halted().unwrap(), 2);
    assert!(!session.is_halted());
    assert_eq!(fired.len(), 2);
}

#[test]
fn a_loop_returns_after_its_last_handle_drops() {
    let fired = Fired::default();
    let (base, ledger) = counting_rules(&fired);
    let mut session = Session::with_defaults(base).unwrap();
    let handle = session.handle();

    let runner = thread::spawn(move || session.fire_until_halted().unwrap());
    let producer = thread::spawn(move || {
        for n in 0..3_i64 {
            handle.insert(ledger.entry_fact(2, n)).recv().unwrap().unwrap();
        }
    });
    producer.join().unwrap();

    assert_eq!(runner.join().unwrap(), 3);
    assert_eq!(fired.len(), 3);
}

#[test]
fn remote_updates_and_deletes_are_applied_between_firings() {
    let fired = Fired::default();
    let (base, ledger) = counting_rules(&fired);
    let mut session = Session::with_defaults(base).unwrap();
    let id = session.insert(ledger.entry_fact(1, 10)).unwrap();
    let handle = session.handle();

    let update = handle.update(id, ledger.entry_fact(1, 20));
    let delete = handle.delete(id);
    assert_eq!(session.process_commands(), 2);
    assert!(update.recv().unwrap().is_ok());
    assert!(delete.recv().unwrap().is_ok());

    assert_eq!(session.fact_count(), 0);
    assert_eq!(session.fire_all(None).unwrap(), 0);
    assert!(fired.names().is_empty());
}

#[test]
fn sessions_share_a_rule_base_across_threads() {
    let fired = Fired::default();
    let (base, ledger) = counting_rules(&fired);

    let workers: Vec<_> = (0..4_i64)
        .map(|w| {
            let base = Arc::clone(&base);
            thread::spawn(move || {
                let mut session = Session::with_defaults(base).unwrap();
                for n in 0..=w {
                    session.insert(ledger.entry_fact(w, n)).unwrap();
                }
                session.fire_all(None).unwrap()
            })
        })
        .collect();
    let counts: Vec<usize> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    assert_eq!(counts, vec![1, 2, 3, 4]);
    assert_eq!(fired.len(), 10);
}
