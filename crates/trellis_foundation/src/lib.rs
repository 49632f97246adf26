//! Core types, values, and persistent collections for Trellis.
//!
//! This crate provides:
//! - [`Value`] - The value type stored in fact fields
//! - [`Fact`] - A typed record of field values
//! - [`FactId`] - Generational fact handle identifiers
//! - [`Type`] - Field type descriptors for schema validation and index selection
//! - [`Error`] - Rich error types with context
//! - Persistent collections ([`LtVec`], [`LtMap`])

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod collections;
pub mod error;
pub mod fact;
pub mod intern;
pub mod types;
pub mod value;

pub use collections::{LtMap, LtVec};
pub use error::{Error, ErrorContext, ErrorKind, Result, SemanticLimit};
pub use fact::{Fact, FactId};
pub use intern::{FieldId, Interner, TypeId};
pub use types::Type;
pub use value::Value;
