//! Integration tests for Layer 0: Foundation
//!
//! Tests for core types: Value, Fact, FactId, Type, Error, and persistent collections.

mod errors;
mod values;
