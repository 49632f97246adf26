//! Trellis - Incremental production-rule engine
//!
//! This crate re-exports all layers of the Trellis system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 1: trellis_engine:     Node network, propagation, agenda, truth maintenance
//! Layer 0: trellis_foundation: Core types (Value, Fact, FactId, Error)
//! ```

pub use trellis_engine as engine;
pub use trellis_foundation as foundation;
