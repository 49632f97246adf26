//! External fact-handle encoding.
//!
//! A live handle can be written out as a colon-separated string and later
//! resolved against a session:
//!
//! ```text
//! format:id:identityHash:objectHash:recency:equalityKeyOrNull:traitStatus:typeName
//! ```
//!
//! The identity hash carries the slot generation, so a string taken before a
//! delete never resolves to the fact that reused the slot. Numbers are parsed
//! as 64-bit integers whatever the encoding side used, and anything that does
//! not decode or does not name a live handle resolves to `None`.

use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};

use trellis_foundation::{Fact, FactId, Interner};

use crate::store::{FactHandle, FactStore};

/// Encoding version written by [`ExternalHandle::describe`].
pub const HANDLE_FORMAT: i64 = 0;

/// Trait discriminator of an encoded handle.
///
/// Sessions have no trait layer, so [`ExternalHandle::describe`] always
/// writes [`TraitStatus::NonTrait`]. The other variants only come out of
/// [`ExternalHandle::parse`], for handles encoded elsewhere.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum TraitStatus {
    /// Plain fact.
    #[default]
    NonTrait,
    /// Fact that may carry traits.
    Traitable,
    /// Trait proxy.
    Trait,
}

impl TraitStatus {
    /// Encoded name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NonTrait => "NON_TRAIT",
            Self::Traitable => "TRAITABLE",
            Self::Trait => "TRAIT",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "NON_TRAIT" => Some(Self::NonTrait),
            "TRAITABLE" => Some(Self::Traitable),
            "TRAIT" => Some(Self::Trait),
            _ => None,
        }
    }
}

impl fmt::Display for TraitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded external handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExternalHandle {
    /// Encoding version.
    pub format: i64,
    /// Handle id.
    pub id: i64,
    /// Identity hash (the slot generation for handles this crate encodes).
    pub identity_hash: i64,
    /// Hash of the fact value at encoding time.
    pub object_hash: i64,
    /// Recency at encoding time.
    pub recency: i64,
    /// Equality key, if the handle had one.
    pub equality_key: Option<i64>,
    /// Trait discriminator.
    pub trait_status: TraitStatus,
    /// Name of the fact type.
    pub type_name: String,
}

impl ExternalHandle {
    /// Decodes a handle string. Returns `None` for anything malformed.
    #[must_use]
    pub fn parse(encoded: &str) -> Option<Self> {
        let mut parts = encoded.splitn(8, ':');
        let mut number = || parts.next().and_then(|p| p.trim().parse::<i64>().ok());
        let format = number()?;
        let id = number()?;
        let identity_hash = number()?;
        let object_hash = number()?;
        let recency = number()?;
        let equality_key = match parts.next()?.trim() {
            "null" => None,
            key => Some(key.parse::<i64>().ok()?),
        };
        let trait_status = TraitStatus::parse(parts.next()?.trim())?;
        let type_name = parts.next()?.to_string();
        Some(Self {
            format,
            id,
            identity_hash,
            object_hash,
            recency,
            equality_key,
            trait_status,
            type_name,
        })
    }

    /// Describes a live handle.
    #[must_use]
    pub fn describe(handle: &FactHandle, type_name: &str) -> Self {
        Self {
            format: HANDLE_FORMAT,
            id: i64::try_from(handle.id.index).unwrap_or(i64::MAX),
            identity_hash: i64::from(handle.id.generation),
            object_hash: i64::from(object_hash(&handle.fact)),
            recency: i64::try_from(handle.recency).unwrap_or(i64::MAX),
            equality_key: i64::try_from(handle.key.raw()).ok(),
            trait_status: TraitStatus::NonTrait,
            type_name: type_name.to_string(),
        }
    }

    /// Finds the live handle this string names.
    ///
    /// The id must address a live slot of the same generation and the fact
    /// must still have the encoded type.
    #[must_use]
    pub fn resolve(&self, store: &FactStore, interner: &Interner) -> Option<FactId> {
        let index = u64::try_from(self.id).ok()?;
        let generation = u32::try_from(self.identity_hash).ok()?;
        let id = FactId::new(index, generation);
        let handle = store.get(id).ok()?;
        let type_name = interner.type_name(handle.fact.type_id())?;
        (type_name == self.type_name).then_some(id)
    }
}

impl fmt::Display for ExternalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:",
            self.format, self.id, self.identity_hash, self.object_hash, self.recency
        )?;
        match self.equality_key {
            Some(key) => write!(f, "{key}")?,
            None => f.write_str("null")?,
        }
        write!(f, ":{}:{}", self.trait_status, self.type_name)
    }
}

#[allow(clippy::cast_possible_truncation)]
fn object_hash(fact: &Fact) -> i32 {
    let mut hasher = DefaultHasher::new();
    fact.hash(&mut hasher);
    hasher.finish() as i32
}
