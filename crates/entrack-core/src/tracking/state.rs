use derive_more::Display;
use serde::{Deserialize, Serialize};

///
/// EntityState
///
/// Lifecycle state of a tracked entry. Encoded in the 3 reserved low bits of
/// the first state word, so the discriminants are part of the bit layout.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
#[repr(u8)]
pub enum EntityState {
    #[default]
    Detached = 0,
    Unchanged = 1,
    Added = 2,
    Deleted = 3,
    Modified = 4,
}

impl EntityState {
    pub(crate) const fn from_bits(bits: u32) -> Self {
        match bits {
            1 => Self::Unchanged,
            2 => Self::Added,
            3 => Self::Deleted,
            4 => Self::Modified,
            _ => Self::Detached,
        }
    }

    pub(crate) const fn to_bits(self) -> u32 {
        self as u32
    }

    /// Whether an entry in this state takes part in a save batch.
    #[must_use]
    pub const fn is_dirty(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }

    #[must_use]
    pub const fn is_tracked(self) -> bool {
        !matches!(self, Self::Detached)
    }
}
