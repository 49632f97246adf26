//! Field bitmasks for property reactivity.
//!
//! Each interned field maps to one bit of a 64-bit mask. Fields beyond the
//! 63rd share the last bit, which makes them conservatively overlap.

use std::fmt;

use trellis_foundation::FieldId;

/// Set of fields, one bit per field id.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct BitMask(u64);

impl BitMask {
    /// The empty mask.
    pub const EMPTY: BitMask = BitMask(0);
    /// The mask intersecting everything.
    pub const ALL: BitMask = BitMask(u64::MAX);

    const OVERFLOW_BIT: u32 = 63;

    /// Mask with the single bit for `field`.
    #[must_use]
    pub fn of(field: FieldId) -> Self {
        Self(1 << field.index().min(Self::OVERFLOW_BIT))
    }

    /// Mask of all given fields.
    #[must_use]
    pub fn of_fields(fields: impl IntoIterator<Item = FieldId>) -> Self {
        fields
            .into_iter()
            .fold(Self::EMPTY, |mask, f| mask.union(Self::of(f)))
    }

    /// Union of two masks.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns true if the masks share a bit.
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Returns true if no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for BitMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::ALL {
            write!(f, "BitMask(all)")
        } else {
            write!(f, "BitMask({:#b})", self.0)
        }
    }
}
