//! Name interning for fact types and fields.
//!
//! Type and field names are interned so facts carry small copyable ids and
//! constraints compare fields by integer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Interned fact type identifier.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    /// Returns the raw index of this type.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    // =========================================================================
    // Reserved Types
    // =========================================================================
    // These are always interned at startup with fixed indices.

    /// Reserved type of the initial fact that anchors rules whose first
    /// condition is a negation, existential or accumulation.
    pub const INITIAL_FACT: TypeId = TypeId(0);
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

/// Interned field identifier.
///
/// Field ids are global across types, so a field name shared by several
/// fact types maps to one id and one modification-mask bit.
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FieldId(pub(crate) u32);

impl FieldId {
    /// Returns the raw index of this field.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldId({})", self.0)
    }
}

/// Interner for fact type and field names.
///
/// Not thread-safe; it is owned by the rule-base builder and frozen into the
/// immutable rule base.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Interner {
    types: Vec<Arc<str>>,
    type_map: HashMap<Arc<str>, TypeId>,
    fields: Vec<Arc<str>>,
    field_map: HashMap<Arc<str>, FieldId>,
}

impl Interner {
    /// Reserved type names that are pre-interned at startup.
    const RESERVED_TYPES: &'static [&'static str] = &[
        "InitialFact", // TypeId(0) = INITIAL_FACT
    ];

    /// Creates a new interner with reserved types pre-interned.
    #[must_use]
    pub fn new() -> Self {
        let mut interner = Self::default();
        for (i, &name) in Self::RESERVED_TYPES.iter().enumerate() {
            let arc: Arc<str> = name.into();
            interner.types.push(arc.clone());
            interner
                .type_map
                .insert(arc, TypeId(u32::try_from(i).unwrap_or(u32::MAX)));
        }
        interner
    }

    /// Interns a type name, returning its [`TypeId`].
    ///
    /// # Errors
    ///
    /// Returns an internal error if more than `u32::MAX` types are interned.
    pub fn intern_type(&mut self, name: &str) -> Result<TypeId> {
        if let Some(&id) = self.type_map.get(name) {
            return Ok(id);
        }
        let id = TypeId(
            u32::try_from(self.types.len()).map_err(|_| Error::internal("too many fact types"))?,
        );
        let arc: Arc<str> = name.into();
        self.types.push(arc.clone());
        self.type_map.insert(arc, id);
        Ok(id)
    }

    /// Interns a field name, returning its [`FieldId`].
    ///
    /// # Errors
    ///
    /// Returns an internal error if more than `u32::MAX` fields are interned.
    pub fn intern_field(&mut self, name: &str) -> Result<FieldId> {
        if let Some(&id) = self.field_map.get(name) {
            return Ok(id);
        }
        let id = FieldId(
            u32::try_from(self.fields.len()).map_err(|_| Error::internal("too many fields"))?,
        );
        let arc: Arc<str> = name.into();
        self.fields.push(arc.clone());
        self.field_map.insert(arc, id);
        Ok(id)
    }

    /// Looks up a type without interning it.
    #[must_use]
    pub fn lookup_type(&self, name: &str) -> Option<TypeId> {
        self.type_map.get(name).copied()
    }

    /// Looks up a field without interning it.
    #[must_use]
    pub fn lookup_field(&self, name: &str) -> Option<FieldId> {
        self.field_map.get(name).copied()
    }

    /// Gets the name of a type.
    #[must_use]
    pub fn type_name(&self, id: TypeId) -> Option<&str> {
        self.types.get(id.0 as usize).map(AsRef::as_ref)
    }

    /// Gets the name of a field.
    #[must_use]
    pub fn field_name(&self, id: FieldId) -> Option<&str> {
        self.fields.get(id.0 as usize).map(AsRef::as_ref)
    }

    /// Returns the number of interned types, reserved ones included.
    #[must_use]
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    /// Returns the number of interned fields.
    #[must_use]
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }
}
