//! Facts and their generational handle identifiers.

use std::fmt;

use crate::collections::LtMap;
use crate::intern::{FieldId, TypeId};
use crate::value::Value;

/// Fact handle identifier with generational index for stale reference detection.
///
/// The generation counter increments when a slot is reused after its fact
/// was deleted, so a handle kept across a delete is detected as stale
/// instead of silently aliasing the new fact.
///
/// # Layout
/// - `index`: 64-bit slot index in the fact store
/// - `generation`: 32-bit generation counter
#[derive(Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct FactId {
    /// Slot index in the fact store.
    pub index: u64,
    /// Generation counter for stale reference detection.
    pub generation: u32,
}

impl FactId {
    /// Creates a new fact ID with the given index and generation.
    #[must_use]
    pub const fn new(index: u64, generation: u32) -> Self {
        Self { index, generation }
    }
}

impl fmt::Debug for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FactId({}v{})", self.index, self.generation)
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fact({})", self.index)
    }
}

/// A typed record of field values.
///
/// Facts are values: two facts with the same type and the same fields are
/// equal and hash alike, which is what equality-mode fact stores group on.
/// Fields not present read as [`Value::Nil`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fact {
    type_id: TypeId,
    fields: LtMap<FieldId, Value>,
}

impl Fact {
    /// Creates a fact of the given type with no fields set.
    #[must_use]
    pub fn new(type_id: TypeId) -> Self {
        Self {
            type_id,
            fields: LtMap::new(),
        }
    }

    /// Sets a field, builder style.
    #[must_use]
    pub fn with(self, field: FieldId, value: impl Into<Value>) -> Self {
        self.set(field, value)
    }

    /// Returns a copy of this fact with the field set.
    ///
    /// Setting a field to nil removes it.
    #[must_use]
    pub fn set(&self, field: FieldId, value: impl Into<Value>) -> Self {
        let value = value.into();
        let fields = if value.is_nil() {
            self.fields.remove(&field)
        } else {
            self.fields.insert(field, value)
        };
        Self {
            type_id: self.type_id,
            fields,
        }
    }

    /// Returns the fact's type.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Reads a field. Absent fields read as nil.
    #[must_use]
    pub fn get(&self, field: FieldId) -> &Value {
        const NIL: Value = Value::Nil;
        self.fields.get(&field).unwrap_or(&NIL)
    }

    /// Returns true if the field is set to a non-nil value.
    #[must_use]
    pub fn has(&self, field: FieldId) -> bool {
        self.fields.contains_key(&field)
    }

    /// Iterates over the set fields in unspecified order.
    pub fn fields(&self) -> impl Iterator<Item = (FieldId, &Value)> {
        self.fields.iter().map(|(k, v)| (*k, v))
    }

    /// Returns the fields whose values differ between `self` and `other`.
    ///
    /// Fields set on only one side are included.
    #[must_use]
    pub fn changed_fields(&self, other: &Fact) -> Vec<FieldId> {
        let mut changed: Vec<FieldId> = self
            .fields
            .iter()
            .filter(|(k, v)| other.fields.get(k) != Some(*v))
            .map(|(k, _)| *k)
            .collect();
        changed.extend(
            other
                .fields
                .keys()
                .filter(|k| !self.fields.contains_key(k))
                .copied(),
        );
        changed.sort_unstable();
        changed
    }
}

impl fmt::Debug for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<_> = self.fields().collect();
        fields.sort_unstable_by_key(|(k, _)| *k);
        f.debug_struct("Fact")
            .field("type", &self.type_id)
            .field("fields", &fields)
            .finish()
    }
}
