//! Module: sidecar
//! Responsibility: named value overlays attached to a tracked entry.
//! Does not own: the entry's primary storage (passed in by the entry).
//!
//! Invariants:
//! - Reading a property the sidecar does not hold falls through to the
//!   primary storage and is never an error.
//! - A stored null (`Some(Value::Null)`) is distinct from an absent value.
//! - Commit and rollback consume the sidecar; a detached sidecar cannot be
//!   observed again through its entry.


use crate::{
    error::InternalError,
    model::{EntityShape, PropertyModel},
    tracking::ValueStorage,
    value::Value,
};
use derive_more::Display;
use std::collections::BTreeMap;

///
/// SidecarName
///

#[derive(Clone, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SidecarName {
    #[display("OriginalValues")]
    OriginalValues,
    #[display("StoreGeneratedValues")]
    StoreGeneratedValues,
    #[display("{_0}")]
    Custom(String),
}

///
/// SidecarPolicy
///
/// Flags consumed by the owning entry and the save pipeline.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[allow(clippy::struct_excessive_bools)]
pub struct SidecarPolicy {
    /// Entry reads prefer the sidecar value over primary storage.
    pub transparent_read: bool,
    /// Entry writes land in the sidecar instead of primary storage.
    pub transparent_write: bool,
    /// Committed automatically after a successful save, rolled back after a
    /// failed one.
    pub auto_commit: bool,
}

impl SidecarPolicy {
    /// Snapshot-only overlay: never read, written, or committed implicitly.
    pub const SNAPSHOT: Self = Self {
        transparent_read: false,
        transparent_write: false,
        auto_commit: false,
    };

    /// Staging overlay for values produced during a save.
    pub const STAGING: Self = Self {
        transparent_read: true,
        transparent_write: true,
        auto_commit: true,
    };
}

///
/// SidecarSlots
///
/// Dense slots are addressed by the property's original-value index; sparse
/// slots by dense property index, optionally restricted to a fixed set.
///

#[derive(Clone, Debug)]
enum SidecarSlots {
    Dense(Vec<Option<Value>>),
    Sparse {
        values: BTreeMap<usize, Value>,
        allowed: Option<Vec<usize>>,
    },
}

///
/// Sidecar
///

#[derive(Clone, Debug)]
pub struct Sidecar {
    name: SidecarName,
    policy: SidecarPolicy,
    slots: SidecarSlots,
}

impl Sidecar {
    /// Original-value overlay for `shape`: one dense slot per property with
    /// an original-value index.
    #[must_use]
    pub fn original_values(shape: &EntityShape) -> Self {
        Self {
            name: SidecarName::OriginalValues,
            policy: SidecarPolicy::SNAPSHOT,
            slots: SidecarSlots::Dense(vec![None; shape.original_value_count()]),
        }
    }

    /// Staging overlay for the store-generated properties of `shape`.
    #[must_use]
    pub fn store_generated_values(shape: &EntityShape) -> Self {
        let allowed = shape
            .properties()
            .iter()
            .filter(|p| p.is_store_generated())
            .map(PropertyModel::index)
            .collect();

        Self {
            name: SidecarName::StoreGeneratedValues,
            policy: SidecarPolicy::STAGING,
            slots: SidecarSlots::Sparse {
                values: BTreeMap::new(),
                allowed: Some(allowed),
            },
        }
    }

    /// Unrestricted sparse overlay.
    #[must_use]
    pub fn custom(name: impl Into<String>, policy: SidecarPolicy) -> Self {
        Self {
            name: SidecarName::Custom(name.into()),
            policy,
            slots: SidecarSlots::Sparse {
                values: BTreeMap::new(),
                allowed: None,
            },
        }
    }

    #[must_use]
    pub const fn name(&self) -> &SidecarName {
        &self.name
    }

    #[must_use]
    pub const fn policy(&self) -> SidecarPolicy {
        self.policy
    }

    #[must_use]
    pub const fn transparent_read(&self) -> bool {
        self.policy.transparent_read
    }

    #[must_use]
    pub const fn transparent_write(&self) -> bool {
        self.policy.transparent_write
    }

    #[must_use]
    pub const fn auto_commit(&self) -> bool {
        self.policy.auto_commit
    }

    /// Whether this sidecar has a slot for `property`.
    #[must_use]
    pub fn can_store(&self, property: &PropertyModel) -> bool {
        match &self.slots {
            SidecarSlots::Dense(slots) => property
                .original_value_index()
                .is_some_and(|i| i < slots.len()),
            SidecarSlots::Sparse { allowed, .. } => allowed
                .as_ref()
                .is_none_or(|allowed| allowed.contains(&property.index())),
        }
    }

    /// Whether a value (possibly null) is held for `property`.
    #[must_use]
    pub fn has_value(&self, property: &PropertyModel) -> bool {
        self.value(property).is_some()
    }

    /// The held value, `None` when absent.
    #[must_use]
    pub fn value(&self, property: &PropertyModel) -> Option<&Value> {
        match &self.slots {
            SidecarSlots::Dense(slots) => property
                .original_value_index()
                .and_then(|i| slots.get(i))
                .and_then(Option::as_ref),
            SidecarSlots::Sparse { values, .. } => values.get(&property.index()),
        }
    }

    /// Two-level read: the held value, else the primary value.
    pub fn get(
        &self,
        shape: &EntityShape,
        storage: &ValueStorage,
        property: &PropertyModel,
    ) -> Result<Value, InternalError> {
        match self.value(property) {
            Some(value) => Ok(value.clone()),
            None => storage.get_value(shape, property.index()),
        }
    }

    /// Store `value` for `property`; a null value is held, not dropped.
    pub fn set(&mut self, property: &PropertyModel, value: Value) -> Result<(), InternalError> {
        if !self.can_store(property) {
            return Err(InternalError::sidecar_invariant(format!(
                "sidecar '{}' cannot store property '{}'",
                self.name,
                property.name()
            )));
        }

        match &mut self.slots {
            SidecarSlots::Dense(slots) => {
                if let Some(slot) = property.original_value_index().and_then(|i| slots.get_mut(i)) {
                    *slot = Some(value);
                }
            }
            SidecarSlots::Sparse { values, .. } => {
                values.insert(property.index(), value);
            }
        }

        Ok(())
    }

    /// Copy the current primary value of every storable property.
    pub fn take_snapshot(
        &mut self,
        shape: &EntityShape,
        storage: &ValueStorage,
    ) -> Result<(), InternalError> {
        for property in shape.properties() {
            if self.can_store(property) {
                let value = storage.get_value(shape, property.index())?;
                self.set(property, value)?;
            }
        }

        Ok(())
    }

    /// Refresh only the properties that already hold a value.
    pub fn update_snapshot(
        &mut self,
        shape: &EntityShape,
        storage: &ValueStorage,
    ) -> Result<(), InternalError> {
        for property in shape.properties() {
            if self.has_value(property) {
                let value = storage.get_value(shape, property.index())?;
                self.set(property, value)?;
            }
        }

        Ok(())
    }

    /// Snapshot one property if storable and not yet held. Idempotent.
    pub fn ensure_snapshot(
        &mut self,
        shape: &EntityShape,
        storage: &ValueStorage,
        property: &PropertyModel,
    ) -> Result<(), InternalError> {
        if self.can_store(property) && !self.has_value(property) {
            let value = storage.get_value(shape, property.index())?;
            self.set(property, value)?;
        }

        Ok(())
    }

    /// Write every held value back into primary storage, consuming the
    /// sidecar. Returns the number of values written.
    pub fn commit(self, shape: &EntityShape, storage: &mut ValueStorage) -> Result<usize, InternalError> {
        let mut written = 0;
        for property in shape.properties() {
            if let Some(value) = self.value(property) {
                storage.set_value(shape, property.index(), value.clone())?;
                written += 1;
            }
        }

        Ok(written)
    }

    /// Discard the sidecar without writing anything back.
    pub fn rollback(self) {
        drop(self);
    }

    /// Forget every held value; slots stay available.
    pub fn clear(&mut self) {
        match &mut self.slots {
            SidecarSlots::Dense(slots) => slots.iter_mut().for_each(|slot| *slot = None),
            SidecarSlots::Sparse { values, .. } => values.clear(),
        }
    }

    /// Number of held values.
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.slots {
            SidecarSlots::Dense(slots) => slots.iter().filter(|slot| slot.is_some()).count(),
            SidecarSlots::Sparse { values, .. } => values.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
