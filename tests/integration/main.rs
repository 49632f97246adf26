//! Cross-layer integration tests for Trellis
//!
//! Tests whole-session behavior: properties that must hold for any
//! sequence of operations, belief fixpoints, and sessions driven from
//! several threads.

mod concurrency;
mod fixture;
mod properties;
