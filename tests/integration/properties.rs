//! Property tests over arbitrary operation sequences
//!
//! Join results must not depend on insertion order or on which
//! optimizations are enabled, `not` and `exists` must partition their
//! parents, a full assert/fire/retract cycle must leave nothing behind, and
//! salience must order firing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use proptest::prelude::*;
use trellis::engine::{Pattern, Rule, RuleBase, RuleBaseConfig, Session};
use trellis::foundation::FactId;

use crate::fixture::{Fired, Ledger, ledger};

#[derive(Clone, Debug)]
enum Item {
    Account(i64),
    Entry(i64, i64),
}

fn insert(session: &mut Session, ledger: &Ledger, item: &Item) -> FactId {
    let fact = match item {
        Item::Account(id) => ledger.account_fact(*id),
        Item::Entry(account, amount) => ledger.entry_fact(*account, *amount),
    };
    session.insert(fact).unwrap()
}

fn posting_rules(config: RuleBaseConfig) -> (Arc<RuleBase>, Ledger) {
    let (mut builder, ledger) = crate::fixture::ledger(config);
    builder
        .add_rule(
            Rule::new("posted")
                .when(Pattern::new(ledger.account))
                .when(Pattern::new(ledger.entry).join_eq(0, ledger.id, ledger.account_ref))
                .then(|_| Ok(())),
        )
        .unwrap();
    builder
        .add_rule(
            Rule::new("idle")
                .when(Pattern::new(ledger.account))
                .not(Pattern::new(ledger.entry).join_eq(0, ledger.id, ledger.account_ref))
                .then(|_| Ok(())),
        )
        .unwrap();
    builder
        .add_rule(
            Rule::new("active")
                .when(Pattern::new(ledger.account))
                .exists(Pattern::new(ledger.entry).join_eq(0, ledger.id, ledger.account_ref))
                .then(|_| Ok(())),
        )
        .unwrap();
    (builder.build().unwrap(), ledger)
}

fn expected_postings(items: &[Item]) -> usize {
    let accounts: HashSet<i64> = items
        .iter()
        .filter_map(|i| match i {
            Item::Account(id) => Some(*id),
            Item::Entry(..) => None,
        })
        .collect();
    let entries: HashSet<(i64, i64)> = items
        .iter()
        .filter_map(|i| match i {
            Item::Entry(a, n) => Some((*a, *n)),
            Item::Account(_) => None,
        })
        .collect();
    entries.iter().filter(|(a, _)| accounts.contains(a)).count()
}

fn items() -> impl Strategy<Value = (Vec<Item>, Vec<Item>)> {
    (
        proptest::collection::vec(0_i64..6, 0..5),
        proptest::collection::vec((0_i64..8, 0_i64..50), 0..12),
    )
        .prop_flat_map(|(accounts, entries)| {
            let items: Vec<Item> = accounts
                .into_iter()
                .map(Item::Account)
                .chain(entries.into_iter().map(|(a, n)| Item::Entry(a, n)))
                .collect();
            (Just(items.clone()), Just(items).prop_shuffle())
        })
}

proptest! {
    #[test]
    fn joins_ignore_insertion_order_and_optimizations((ordered, shuffled) in items()) {
        let (fast, ledger) = posting_rules(RuleBaseConfig::default());
        let (slow, _) = posting_rules(RuleBaseConfig::unoptimized());

        let mut first = Session::with_defaults(fast).unwrap();
        for item in &ordered {
            insert(&mut first, &ledger, item);
        }
        let mut second = Session::with_defaults(slow).unwrap();
        for item in &shuffled {
            insert(&mut second, &ledger, item);
        }

        let expected = expected_postings(&ordered);
        prop_assert_eq!(first.match_count("posted"), expected);
        prop_assert_eq!(second.match_count("posted"), expected);
        for rule in ["idle", "active"] {
            prop_assert_eq!(first.match_count(rule), second.match_count(rule));
        }
    }

    #[test]
    fn not_and_exists_partition_their_parents(
        ops in proptest::collection::vec((any::<bool>(), 0_i64..6, 0_i64..3), 0..30)
    ) {
        let (base, ledger) = posting_rules(RuleBaseConfig::default());
        let mut session = Session::with_defaults(base).unwrap();
        let accounts = 4_i64;
        for id in 0..accounts {
            session.insert(ledger.account_fact(id)).unwrap();
        }

        let mut live: HashMap<(i64, i64), FactId> = HashMap::new();
        for (add, account, amount) in ops {
            if add {
                let id = session.insert(ledger.entry_fact(account, amount)).unwrap();
                live.insert((account, amount), id);
            } else if let Some(id) = live.remove(&(account, amount)) {
                session.delete(id).unwrap();
            }

            let active: HashSet<i64> = live
                .keys()
                .map(|(a, _)| *a)
                .filter(|a| *a < accounts)
                .collect();
            let idle = session.match_count("idle");
            let exists = session.match_count("active");
            prop_assert_eq!(idle + exists, 4);
            prop_assert_eq!(exists, active.len());
        }
    }

    #[test]
    fn assert_fire_retract_leaves_nothing_behind((items, _) in items()) {
        let (base, ledger) = posting_rules(RuleBaseConfig::default());
        let mut session = Session::with_defaults(base).unwrap();
        let baseline = session.tuple_count();

        let handles: HashSet<FactId> = items
            .iter()
            .map(|item| insert(&mut session, &ledger, item))
            .collect();
        let fired = session.fire_all(None).unwrap();
        let postings = session.match_count("posted");

        for item in &items {
            insert(&mut session, &ledger, item);
        }
        prop_assert_eq!(session.fire_all(None).unwrap(), 0);

        for id in handles {
            session.delete(id).unwrap();
        }
        prop_assert_eq!(session.fact_count(), 0);
        prop_assert!(session.pending_activations().is_empty());
        prop_assert_eq!(session.tuple_count(), baseline);
        prop_assert_eq!(session.match_count("posted"), 0);

        for item in &items {
            insert(&mut session, &ledger, item);
        }
        prop_assert_eq!(session.match_count("posted"), postings);
        prop_assert_eq!(session.fire_all(None).unwrap(), fired);
    }

    #[test]
    fn salience_orders_firing(saliences in proptest::collection::hash_set(-50_i32..50, 1..8)) {
        let (mut builder, ledger) = ledger(RuleBaseConfig::default());
        let fired = Fired::default();
        for salience in &saliences {
            let sink = fired.clone();
            let label = salience.to_string();
            builder
                .add_rule(
                    Rule::new(format!("s{salience}"))
                        .salience(*salience)
                        .when(Pattern::new(ledger.signal))
                        .then(move |_| {
                            sink.push(label.clone());
                            Ok(())
                        }),
                )
                .unwrap();
        }
        let mut session = Session::with_defaults(builder.build().unwrap()).unwrap();
        session.insert(ledger.signal_fact("go")).unwrap();
        session.fire_all(None).unwrap();

        let mut expected: Vec<i32> = saliences.into_iter().collect();
        expected.sort_unstable_by(|a, b| b.cmp(a));
        let expected: Vec<String> = expected.iter().map(ToString::to_string).collect();
        prop_assert_eq!(fired.names(), expected);
    }
}
