//! Shared fixture: a small order-processing schema.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use trellis_engine::{
    FactSchema, RuleBase, RuleBaseBuilder, RuleBaseConfig, Session, SessionConfig,
};
use trellis_foundation::{Fact, FieldId, Type, TypeId, Value};

/// Type and field ids of the fixture schema.
#[derive(Clone, Copy)]
pub struct Shop {
    pub customer: TypeId,
    pub vip: TypeId,
    pub order: TypeId,
    pub alert: TypeId,
    pub id: FieldId,
    pub tier: FieldId,
    pub owner: FieldId,
    pub total: FieldId,
    pub note: FieldId,
    pub kind: FieldId,
}

impl Shop {
    pub fn customer_fact(&self, id: i64, tier: &str) -> Fact {
        Fact::new(self.customer).with(self.id, id).with(self.tier, tier)
    }

    pub fn order_fact(&self, owner: i64, total: i64) -> Fact {
        Fact::new(self.order).with(self.owner, owner).with(self.total, total)
    }

    pub fn alert_fact(&self, kind: &str) -> Fact {
        Fact::new(self.alert).with(self.kind, kind)
    }

    pub fn alert_of(&self, kind: &str, owner: i64) -> Fact {
        self.alert_fact(kind).with(self.owner, owner)
    }
}

/// Declares the fixture schema on a fresh builder.
pub fn shop() -> (RuleBaseBuilder, Shop) {
    shop_with(RuleBaseConfig::default())
}

pub fn shop_with(config: RuleBaseConfig) -> (RuleBaseBuilder, Shop) {
    let mut builder = RuleBaseBuilder::with_config(config);
    let customer = builder
        .declare(
            &FactSchema::new("Customer")
                .field("id", Type::Int)
                .field("tier", Type::String),
        )
        .unwrap();
    let vip = builder
        .declare(&FactSchema::new("Vip").extends("Customer"))
        .unwrap();
    let order = builder
        .declare(
            &FactSchema::new("Order")
                .field("owner", Type::Int)
                .field("total", Type::Int)
                .field("note", Type::String),
        )
        .unwrap();
    let alert = builder
        .declare(
            &FactSchema::new("Alert")
                .field("kind", Type::String)
                .field("owner", Type::Int),
        )
        .unwrap();
    let shop = Shop {
        customer,
        vip,
        order,
        alert,
        id: builder.field("Customer", "id").unwrap(),
        tier: builder.field("Customer", "tier").unwrap(),
        owner: builder.field("Order", "owner").unwrap(),
        total: builder.field("Order", "total").unwrap(),
        note: builder.field("Order", "note").unwrap(),
        kind: builder.field("Alert", "kind").unwrap(),
    };
    (builder, shop)
}

pub fn session(builder: &RuleBaseBuilder) -> Session {
    Session::with_defaults(builder.build().unwrap()).unwrap()
}

pub fn session_with(base: Arc<RuleBase>, config: SessionConfig) -> Session {
    Session::new(base, config).unwrap()
}

/// A shared log consequences push labels into.
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

pub fn int(value: &Value) -> i64 {
    value.as_int().unwrap()
}
