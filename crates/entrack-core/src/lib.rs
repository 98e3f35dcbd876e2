//! Core runtime for entrack: entity shapes, dynamic values, and the change
//! tracker (state bits, value storage, keys, sidecars, identity map).
#![warn(unreachable_pub)]

pub mod error;
pub mod model;
pub mod obs;
pub mod tracking;
pub mod value;

// test
#[cfg(test)]
pub(crate) mod test_support;

///
/// CONSTANTS
///

/// Number of low bits in the first state word reserved for the entity state.
pub const STATE_BITS_RESERVED: usize = 3;

///
/// Prelude
///
/// Prelude contains only domain vocabulary.
/// No errors, sinks, or collaborators are re-exported here.
///

pub mod prelude {
    pub use crate::{
        model::{EntityShape, Model, PropertyModel},
        tracking::{EntityKey, EntityObject, EntityRef, EntityState, EntryId, StateManager},
        value::{Value, ValueBuffer, ValueKind},
    };
}
