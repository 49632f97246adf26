//! Ledger schema shared by the cross-layer tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use trellis::engine::{FactSchema, RuleBaseBuilder, RuleBaseConfig};
use trellis::foundation::{Fact, FieldId, Type, TypeId};

#[derive(Clone, Copy)]
pub struct Ledger {
    pub account: TypeId,
    pub entry: TypeId,
    pub signal: TypeId,
    pub id: FieldId,
    pub account_ref: FieldId,
    pub amount: FieldId,
    pub memo: FieldId,
    pub name: FieldId,
}

impl Ledger {
    pub fn account_fact(&self, id: i64) -> Fact {
        Fact::new(self.account).with(self.id, id)
    }

    pub fn entry_fact(&self, account: i64, amount: i64) -> Fact {
        Fact::new(self.entry)
            .with(self.account_ref, account)
            .with(self.amount, amount)
    }

    pub fn signal_fact(&self, name: &str) -> Fact {
        Fact::new(self.signal).with(self.name, name)
    }
}

pub fn ledger(config: RuleBaseConfig) -> (RuleBaseBuilder, Ledger) {
    let mut builder = RuleBaseBuilder::with_config(config);
    let account = builder
        .declare(&FactSchema::new("Account").field("id", Type::Int))
        .unwrap();
    let entry = builder
        .declare(
            &FactSchema::new("Entry")
                .field("account", Type::Int)
                .field("amount", Type::Int)
                .field("memo", Type::String),
        )
        .unwrap();
    let signal = builder
        .declare(&FactSchema::new("Signal").field("name", Type::String))
        .unwrap();
    let ledger = Ledger {
        account,
        entry,
        signal,
        id: builder.field("Account", "id").unwrap(),
        account_ref: builder.field("Entry", "account").unwrap(),
        amount: builder.field("Entry", "amount").unwrap(),
        memo: builder.field("Entry", "memo").unwrap(),
        name: builder.field("Signal", "name").unwrap(),
    };
    (builder, ledger)
}

/// Names pushed by consequences, in firing order.
#[derive(Clone, Default)]
pub struct Fired(Arc<Mutex<Vec<String>>>);

impl Fired {
    pub fn push(&self, name: impl Into<String>) {
        self.0.lock().unwrap().push(name.into());
    }

    pub fn names(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}
