//! Fact store: handle identity, equality keys, and change metadata.
//!
//! Handles are generational slots. Deleting a fact bumps its slot's
//! generation before the slot is reused, so a handle held across the delete
//! reports `StaleHandle` instead of aliasing the next fact.
//!
//! Every live handle belongs to an [`EqualityKey`] that groups handles whose
//! facts are equal. A key records which handles were stated by the caller and
//! which single handle, if any, exists only because of logical justification.

use std::collections::HashMap;
use std::sync::Arc;

use trellis_foundation::{Error, Fact, FactId, FieldId, Result};

use crate::config::EqualityBehavior;

// =============================================================================
// Equality Keys
// =============================================================================

/// Identifier of an equality key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u64);

impl KeyId {
    /// Returns the raw key number.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Whether a key's fact is present because it was stated, justified, or both.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum KeyStatus {
    /// Only stated handles.
    Stated,
    /// Only the justified handle.
    Justified,
    /// Stated handles exist and the key also carries justifications.
    Both,
}

/// Group of handles whose facts are equal.
#[derive(Clone, Debug)]
pub struct EqualityKey {
    /// The key's identifier.
    pub id: KeyId,
    /// The fact every handle in this key equals.
    pub fact: Fact,
    /// Handles inserted as stated facts.
    pub stated: Vec<FactId>,
    /// Handle inserted on behalf of logical justifications.
    pub justified: Option<FactId>,
    /// True once a stated insert absorbed a justified handle.
    pub promoted: bool,
}

impl EqualityKey {
    /// Current status, or `None` when no handle is live.
    #[must_use]
    pub fn status(&self) -> Option<KeyStatus> {
        match (self.stated.is_empty(), self.justified.is_some()) {
            (false, true) => Some(KeyStatus::Both),
            (false, false) if self.promoted => Some(KeyStatus::Both),
            (false, false) => Some(KeyStatus::Stated),
            (true, true) => Some(KeyStatus::Justified),
            (true, false) => None,
        }
    }

    /// Returns true if at least one stated handle is live.
    #[must_use]
    pub fn is_stated(&self) -> bool {
        !self.stated.is_empty()
    }

    fn is_empty(&self) -> bool {
        self.stated.is_empty() && self.justified.is_none()
    }
}

// =============================================================================
// Fact Handles
// =============================================================================

/// A live fact and its metadata.
#[derive(Clone, Debug)]
pub struct FactHandle {
    /// Handle identifier.
    pub id: FactId,
    /// Recency counter, bumped on insert and update.
    pub recency: u64,
    /// The fact.
    pub fact: Fact,
    /// Equality key the fact belongs to.
    pub key: KeyId,
    /// Entry point partition the fact was inserted into.
    pub entry_point: Arc<str>,
}

#[derive(Clone, Debug, Default)]
struct Slot {
    generation: u32,
    handle: Option<FactHandle>,
}

/// Result of a stated insert.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatedInsert {
    /// A new handle was created and must be propagated.
    New(FactId),
    /// An equal fact was already stated; nothing changed.
    Existing(FactId),
    /// An equal justified fact became stated; nothing to propagate.
    Promoted(FactId),
}

impl StatedInsert {
    /// The handle the caller should use.
    #[must_use]
    pub const fn id(self) -> FactId {
        match self {
            Self::New(id) | Self::Existing(id) | Self::Promoted(id) => id,
        }
    }
}

/// Result of an update.
#[derive(Clone, Debug)]
pub struct UpdateOutcome {
    /// The fact before the update.
    pub old: Fact,
    /// Fields whose values changed.
    pub changed: Vec<FieldId>,
    /// Key before the update.
    pub old_key: KeyId,
    /// Key after the update.
    pub new_key: KeyId,
}

// =============================================================================
// Fact Store
// =============================================================================

/// Owner of every live fact in a session.
#[derive(Debug)]
pub struct FactStore {
    slots: Vec<Slot>,
    free: Vec<u64>,
    recency: u64,
    keys: HashMap<KeyId, EqualityKey>,
    keys_by_fact: HashMap<Fact, KeyId>,
    next_key: u64,
    equality: EqualityBehavior,
}

impl FactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(equality: EqualityBehavior) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            recency: 0,
            keys: HashMap::new(),
            keys_by_fact: HashMap::new(),
            next_key: 0,
            equality,
        }
    }

    /// Returns the key for a fact, creating it if needed.
    pub fn key_for(&mut self, fact: &Fact) -> KeyId {
        if let Some(&id) = self.keys_by_fact.get(fact) {
            return id;
        }
        let id = KeyId(self.next_key);
        self.next_key += 1;
        self.keys_by_fact.insert(fact.clone(), id);
        self.keys.insert(
            id,
            EqualityKey {
                id,
                fact: fact.clone(),
                stated: Vec::new(),
                justified: None,
                promoted: false,
            },
        );
        id
    }

    /// Returns the existing key for a fact without creating one.
    #[must_use]
    pub fn existing_key(&self, fact: &Fact) -> Option<KeyId> {
        self.keys_by_fact.get(fact).copied()
    }

    /// Looks up a key.
    #[must_use]
    pub fn key(&self, id: KeyId) -> Option<&EqualityKey> {
        self.keys.get(&id)
    }

    /// Inserts a stated fact.
    ///
    /// Under equality semantics an equal stated fact is returned as is, and an
    /// equal justified fact is promoted to stated.
    pub fn insert_stated(&mut self, fact: Fact, entry_point: Arc<str>) -> StatedInsert {
        let key = self.key_for(&fact);
        if self.equality == EqualityBehavior::Equality {
            if let Some(k) = self.keys.get_mut(&key) {
                if let Some(&existing) = k.stated.first() {
                    return StatedInsert::Existing(existing);
                }
                if let Some(justified) = k.justified.take() {
                    k.stated.push(justified);
                    k.promoted = true;
                    return StatedInsert::Promoted(justified);
                }
            }
        }
        let id = self.allocate(fact, key, entry_point);
        if let Some(k) = self.keys.get_mut(&key) {
            k.stated.push(id);
        }
        StatedInsert::New(id)
    }

    /// Creates the justified handle for a key.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the key is unknown or already has a
    /// justified handle.
    pub fn insert_justified(&mut self, key: KeyId, entry_point: Arc<str>) -> Result<FactId> {
        let fact = match self.keys.get(&key) {
            Some(k) if k.justified.is_none() => k.fact.clone(),
            Some(_) => return Err(Error::internal("key already has a justified handle")),
            None => return Err(Error::internal(format!("unknown equality key {key:?}"))),
        };
        let id = self.allocate(fact, key, entry_point);
        if let Some(k) = self.keys.get_mut(&key) {
            k.justified = Some(id);
        }
        Ok(id)
    }

    fn allocate(&mut self, fact: Fact, key: KeyId, entry_point: Arc<str>) -> FactId {
        self.recency += 1;
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot::default());
                (self.slots.len() - 1) as u64
            }
        };
        #[allow(clippy::cast_possible_truncation)]
        let slot = &mut self.slots[index as usize];
        let id = FactId::new(index, slot.generation);
        slot.handle = Some(FactHandle {
            id,
            recency: self.recency,
            fact,
            key,
            entry_point,
        });
        id
    }

    /// Replaces a fact's value, moving it to the matching equality key.
    ///
    /// # Errors
    ///
    /// Returns `StaleHandle`/`UnknownHandle` for dead handles and
    /// `InvalidUpdate` if the fact type changes or a justified fact would
    /// merge into an occupied key.
    pub fn update(&mut self, id: FactId, fact: Fact) -> Result<UpdateOutcome> {
        let (old, old_key) = {
            let handle = self.get(id)?;
            if handle.fact.type_id() != fact.type_id() {
                return Err(Error::invalid_update(id, "fact type cannot change"));
            }
            (handle.fact.clone(), handle.key)
        };
        let justified = self.is_justified(id);
        let target = self.existing_key(&fact);
        if justified {
            if let Some(k) = target.and_then(|t| self.keys.get(&t)) {
                if k.id != old_key && !k.is_empty() {
                    return Err(Error::invalid_update(
                        id,
                        "justified fact would merge with an existing equal fact",
                    ));
                }
            }
        }

        let changed = old.changed_fields(&fact);
        let new_key = self.key_for(&fact);
        if new_key != old_key {
            self.detach(id, old_key);
            if let Some(k) = self.keys.get_mut(&new_key) {
                if justified {
                    k.justified = Some(id);
                } else {
                    k.stated.push(id);
                }
            }
        }

        self.recency += 1;
        let recency = self.recency;
        if let Some(handle) = self.handle_mut(id) {
            handle.fact = fact;
            handle.key = new_key;
            handle.recency = recency;
        }
        Ok(UpdateOutcome {
            old,
            changed,
            old_key,
            new_key,
        })
    }

    /// Removes a fact and releases its slot.
    ///
    /// Callers must have removed the handle from every node memory first.
    ///
    /// # Errors
    ///
    /// Returns `StaleHandle`/`UnknownHandle` for dead handles.
    pub fn delete(&mut self, id: FactId) -> Result<FactHandle> {
        self.get(id)?;
        #[allow(clippy::cast_possible_truncation)]
        let slot = &mut self.slots[id.index as usize];
        let handle = slot
            .handle
            .take()
            .ok_or_else(|| Error::stale_handle(id))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.detach(id, handle.key);
        Ok(handle)
    }

    fn detach(&mut self, id: FactId, key: KeyId) {
        if let Some(k) = self.keys.get_mut(&key) {
            k.stated.retain(|h| *h != id);
            if k.justified == Some(id) {
                k.justified = None;
            }
            if k.stated.is_empty() {
                k.promoted = false;
            }
        }
    }

    /// Drops a key that has no live handles. `retain` keeps it alive while
    /// the belief layer still references it.
    pub fn release_key(&mut self, key: KeyId, retain: bool) {
        if retain {
            return;
        }
        if let Some(k) = self.keys.get(&key) {
            if k.is_empty() {
                self.keys_by_fact.remove(&k.fact);
                self.keys.remove(&key);
            }
        }
    }

    /// Resolves a handle.
    ///
    /// # Errors
    ///
    /// Returns `UnknownHandle` for ids never issued and `StaleHandle` for
    /// deleted facts.
    pub fn get(&self, id: FactId) -> Result<&FactHandle> {
        let slot = usize::try_from(id.index)
            .ok()
            .and_then(|i| self.slots.get(i))
            .ok_or_else(|| Error::unknown_handle(id))?;
        match &slot.handle {
            Some(handle) if handle.id == id => Ok(handle),
            _ => Err(Error::stale_handle(id)),
        }
    }

    fn handle_mut(&mut self, id: FactId) -> Option<&mut FactHandle> {
        usize::try_from(id.index)
            .ok()
            .and_then(|i| self.slots.get_mut(i))
            .and_then(|s| s.handle.as_mut())
            .filter(|h| h.id == id)
    }

    /// Returns the fact behind a live handle.
    #[must_use]
    pub fn fact(&self, id: FactId) -> Option<&Fact> {
        self.get(id).ok().map(|h| &h.fact)
    }

    /// Returns true if the handle is live.
    #[must_use]
    pub fn contains(&self, id: FactId) -> bool {
        self.get(id).is_ok()
    }

    /// Returns true if the handle exists only through justification.
    #[must_use]
    pub fn is_justified(&self, id: FactId) -> bool {
        self.get(id)
            .ok()
            .and_then(|h| self.keys.get(&h.key))
            .is_some_and(|k| k.justified == Some(id))
    }

    /// Finds a live handle whose fact equals `fact`, preferring stated ones.
    #[must_use]
    pub fn lookup(&self, fact: &Fact) -> Option<FactId> {
        let key = self.keys.get(self.keys_by_fact.get(fact)?)?;
        key.stated.first().copied().or(key.justified)
    }

    /// Iterates over live handles in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &FactHandle> {
        self.slots.iter().filter_map(|s| s.handle.as_ref())
    }

    /// Number of live handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns true if no handle is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over keys.
    pub fn keys(&self) -> impl Iterator<Item = &EqualityKey> {
        self.keys.values()
    }
}
