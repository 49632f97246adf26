//! Integration tests for Layer 1: Engine
//!
//! Tests for joins, path linking, negation, the agenda, truth maintenance,
//! property reactivity, and external handles.

mod agenda;
mod belief;
mod handles;
mod joins;
mod negation;
mod reactivity;
mod support;
