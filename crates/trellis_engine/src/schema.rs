//! Fact type declarations.
//!
//! A schema names a fact type, its fields with their types, and the
//! supertypes whose patterns also match it. Declared fields of a supertype
//! are inherited.

use std::collections::HashMap;
use std::sync::Arc;

use trellis_foundation::{Error, Fact, FieldId, Interner, Result, Type, TypeId};

/// Declaration of a fact type, by name.
#[derive(Clone, Debug, PartialEq)]
pub struct FactSchema {
    /// Type name.
    pub name: Arc<str>,
    /// Field definitions.
    pub fields: Vec<FieldSchema>,
    /// Direct supertypes, which must already be declared.
    pub supertypes: Vec<Arc<str>>,
}

impl FactSchema {
    /// Creates a schema with no fields.
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            supertypes: Vec::new(),
        }
    }

    /// Adds a field to the schema.
    #[must_use]
    pub fn with_field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }

    /// Shorthand for an optional field.
    #[must_use]
    pub fn field(self, name: impl Into<Arc<str>>, ty: Type) -> Self {
        self.with_field(FieldSchema::optional(name, ty))
    }

    /// Adds a direct supertype.
    #[must_use]
    pub fn extends(mut self, supertype: impl Into<Arc<str>>) -> Self {
        self.supertypes.push(supertype.into());
        self
    }
}

/// Declaration of one field.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSchema {
    /// Field name.
    pub name: Arc<str>,
    /// Field type.
    pub ty: Type,
    /// Whether inserts must set the field.
    pub required: bool,
}

impl FieldSchema {
    /// Creates a required field.
    #[must_use]
    pub fn required(name: impl Into<Arc<str>>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
        }
    }

    /// Creates an optional field (absent reads as nil).
    #[must_use]
    pub fn optional(name: impl Into<Arc<str>>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
        }
    }
}

/// A declared field after name resolution.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDef {
    /// Field type.
    pub ty: Type,
    /// Whether inserts must set the field.
    pub required: bool,
}

/// A declared fact type after name resolution.
#[derive(Clone, Debug)]
pub struct TypeDef {
    /// Interned type id.
    pub id: TypeId,
    /// Type name.
    pub name: Arc<str>,
    /// Own and inherited fields.
    pub fields: HashMap<FieldId, FieldDef>,
    /// This type followed by every transitive supertype, nearest first.
    pub ancestors: Vec<TypeId>,
}

impl TypeDef {
    /// Checks that a fact conforms to this type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` for undeclared fields and `TypeMismatch` for
    /// values of the wrong type or missing required fields.
    pub fn validate(&self, fact: &Fact, interner: &Interner) -> Result<()> {
        for (field, value) in fact.fields() {
            let Some(def) = self.fields.get(&field) else {
                let name = interner.field_name(field).unwrap_or("?");
                return Err(Error::unknown_field(self.name.as_ref(), name));
            };
            let actual = value.value_type();
            if !def.ty.accepts(&actual) {
                return Err(Error::type_mismatch(def.ty.clone(), actual));
            }
        }
        for (field, def) in &self.fields {
            if def.required && !fact.has(*field) {
                return Err(Error::type_mismatch(def.ty.clone(), Type::Nil));
            }
        }
        Ok(())
    }

    /// Declared type of a field.
    #[must_use]
    pub fn field_type(&self, field: FieldId) -> Option<&Type> {
        self.fields.get(&field).map(|d| &d.ty)
    }
}

/// All declared fact types.
#[derive(Clone, Debug, Default)]
pub struct TypeRegistry {
    types: HashMap<TypeId, TypeDef>,
}

impl TypeRegistry {
    /// Creates a registry holding only the reserved initial-fact type.
    #[must_use]
    pub fn new() -> Self {
        let mut types = HashMap::new();
        types.insert(
            TypeId::INITIAL_FACT,
            TypeDef {
                id: TypeId::INITIAL_FACT,
                name: "InitialFact".into(),
                fields: HashMap::new(),
                ancestors: vec![TypeId::INITIAL_FACT],
            },
        );
        Self { types }
    }

    /// Declares a fact type.
    ///
    /// Re-declaring an identical schema returns the existing id.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if a supertype is undeclared and `InvalidRule`
    /// if the name was already declared differently.
    pub fn declare(&mut self, interner: &mut Interner, schema: &FactSchema) -> Result<TypeId> {
        let mut fields = HashMap::new();
        let mut ancestors = Vec::new();

        for parent in &schema.supertypes {
            let def = interner
                .lookup_type(parent)
                .and_then(|id| self.types.get(&id))
                .ok_or_else(|| Error::unknown_type(parent.as_ref()))?;
            for (field, field_def) in &def.fields {
                fields.insert(*field, field_def.clone());
            }
            for ancestor in &def.ancestors {
                if !ancestors.contains(ancestor) {
                    ancestors.push(*ancestor);
                }
            }
        }

        for field in &schema.fields {
            let id = interner.intern_field(&field.name)?;
            fields.insert(
                id,
                FieldDef {
                    ty: field.ty.clone(),
                    required: field.required,
                },
            );
        }

        let id = interner.intern_type(&schema.name)?;
        ancestors.insert(0, id);

        if let Some(existing) = self.types.get(&id) {
            if existing.fields == fields && existing.ancestors == ancestors {
                return Ok(id);
            }
            return Err(Error::invalid_rule(
                schema.name.as_ref(),
                "fact type already declared with a different schema",
            ));
        }

        self.types.insert(
            id,
            TypeDef {
                id,
                name: schema.name.clone(),
                fields,
                ancestors,
            },
        );
        Ok(id)
    }

    /// Looks up a declared type.
    #[must_use]
    pub fn get(&self, id: TypeId) -> Option<&TypeDef> {
        self.types.get(&id)
    }

    /// Looks up a declared type, failing with `UnknownType`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if the type was never declared.
    pub fn require(&self, id: TypeId) -> Result<&TypeDef> {
        self.types
            .get(&id)
            .ok_or_else(|| Error::unknown_type(format!("{id:?}")))
    }

    /// Iterates over declared types.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values()
    }
}
