//! Integration tests for Value types
//!
//! Tests Value variants, equality, hashing, ordering, display, and conversion.

use std::collections::HashSet;
use std::sync::Arc;

use trellis_foundation::{FactId, LtMap, LtVec, Type, Value};

// =============================================================================
// Value Construction
// =============================================================================

#[test]
fn value_nil() {
    let v = Value::Nil;
    assert!(v.is_nil());
    assert_eq!(v.value_type(), Type::Nil);
}

#[test]
fn value_scalars() {
    assert_eq!(Value::from(true).as_bool(), Some(true));
    assert_eq!(Value::from(42_i64).as_int(), Some(42));
    assert_eq!(Value::from(7_i32).as_int(), Some(7));
    assert_eq!(Value::from(1.5).as_float(), Some(1.5));
    assert_eq!(Value::from("hi").as_str(), Some("hi"));
    assert_eq!(Value::from(String::from("owned")).as_str(), Some("owned"));
}

#[test]
fn value_fact_ref() {
    let id = FactId::new(3, 1);
    let v = Value::from(id);
    assert_eq!(v.as_fact_ref(), Some(id));
    assert_eq!(v.value_type(), Type::FactRef);
}

#[test]
fn value_as_number_promotes_ints() {
    assert_eq!(Value::Int(2).as_number(), Some(2.0));
    assert_eq!(Value::Float(2.5).as_number(), Some(2.5));
    assert_eq!(Value::from("2").as_number(), None);
}

// =============================================================================
// Equality and Hashing
// =============================================================================

#[test]
fn strict_equality_distinguishes_numeric_types() {
    assert_ne!(Value::Int(1), Value::Float(1.0));
    assert_eq!(Value::Float(1.0), Value::Float(1.0));
}

#[test]
fn loose_equality_crosses_numeric_types() {
    assert!(Value::Int(1).loosely_equals(&Value::Float(1.0)));
    assert!(Value::Float(0.0).loosely_equals(&Value::Float(-0.0)));
    assert!(!Value::Int(1).loosely_equals(&Value::from("1")));
}

#[test]
fn floats_hash_by_bits() {
    let mut set = HashSet::new();
    set.insert(Value::Float(f64::NAN));
    set.insert(Value::Float(f64::NAN));
    set.insert(Value::Float(1.0));
    assert_eq!(set.len(), 2);
}

#[test]
fn equal_collections_hash_alike() {
    let a = LtMap::new()
        .insert(Value::from("x"), Value::Int(1))
        .insert(Value::from("y"), Value::Int(2));
    let b = LtMap::new()
        .insert(Value::from("y"), Value::Int(2))
        .insert(Value::from("x"), Value::Int(1));
    let mut set = HashSet::new();
    set.insert(Value::Map(a));
    set.insert(Value::Map(b));
    assert_eq!(set.len(), 1);
}

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn numbers_order_across_types() {
    assert!(Value::Int(1) < Value::Float(1.5));
    assert!(Value::Float(2.5) > Value::Int(2));
    assert!(Value::from("a") < Value::from("b"));
}

#[test]
fn unrelated_types_do_not_order() {
    assert_eq!(Value::Int(1).partial_cmp(&Value::from("1")), None);
    assert_eq!(Value::Nil.partial_cmp(&Value::Bool(false)), None);
}

// =============================================================================
// Display
// =============================================================================

#[test]
fn display_values() {
    assert_eq!(Value::Nil.to_string(), "nil");
    assert_eq!(Value::Int(-3).to_string(), "-3");
    assert_eq!(Value::String(Arc::from("plain")).to_string(), "plain");
    let v: LtVec<Value> = [Value::Int(1), Value::Int(2)].into_iter().collect();
    assert_eq!(Value::Vec(v).to_string(), "[1 2]");
}

#[test]
fn debug_quotes_strings() {
    assert_eq!(format!("{:?}", Value::from("q")), "\"q\"");
}
