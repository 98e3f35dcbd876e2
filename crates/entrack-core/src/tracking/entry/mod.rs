//! Module: entry
//! Responsibility: the per-instance tracking record.
//! Does not own: identity tables or listener delivery (see `manager`).
//!
//! Invariants:
//! - The shape never changes and `bits.property_count() == shape.property_count()`.
//! - At most one sidecar per name; sidecars keep insertion order.
//! - Key properties never report modified, whatever the bits say.

#[cfg(test)]
mod tests;

use crate::{
    error::InternalError,
    model::{EntityShape, PropertyModel},
    tracking::{
        EntityKey, EntityKeyFactory, EntityRef, EntityState, Sidecar, SidecarName, StateBits,
        ValueStorage,
    },
    value::Value,
};
use std::{fmt, sync::Arc};

///
/// TrackedEntry
///

pub struct TrackedEntry {
    shape: Arc<EntityShape>,
    storage: ValueStorage,
    bits: StateBits,
    sidecars: Vec<Sidecar>,
    registered_key: Option<EntityKey>,
    sequence: Option<u64>,
    notifying: bool,
    temporary: Vec<usize>,
}

impl TrackedEntry {
    /// Build a Detached entry and snapshot its original values.
    pub(crate) fn new(shape: Arc<EntityShape>, storage: ValueStorage) -> Result<Self, InternalError> {
        let bits = StateBits::new(shape.property_count());
        let mut entry = Self {
            shape,
            storage,
            bits,
            sidecars: Vec::new(),
            registered_key: None,
            sequence: None,
            notifying: false,
            temporary: Vec::new(),
        };

        if entry.shape.original_value_count() > 0 {
            let mut originals = Sidecar::original_values(&entry.shape);
            originals.take_snapshot(&entry.shape, &entry.storage)?;
            entry.sidecars.push(originals);
        }

        Ok(entry)
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    #[must_use]
    pub const fn shape(&self) -> &Arc<EntityShape> {
        &self.shape
    }

    #[must_use]
    pub fn entity_name(&self) -> &'static str {
        self.shape.name()
    }

    /// Native object, `None` for pure shadow entries.
    #[must_use]
    pub const fn object(&self) -> Option<&EntityRef> {
        self.storage.object()
    }

    #[must_use]
    pub fn state(&self) -> EntityState {
        self.bits.entity_state()
    }

    #[must_use]
    pub const fn bits(&self) -> &StateBits {
        &self.bits
    }

    pub(crate) const fn bits_mut(&mut self) -> &mut StateBits {
        &mut self.bits
    }

    #[must_use]
    pub const fn storage(&self) -> &ValueStorage {
        &self.storage
    }

    /// Key the entry is registered under in the key table.
    #[must_use]
    pub const fn registered_key(&self) -> Option<&EntityKey> {
        self.registered_key.as_ref()
    }

    pub(crate) fn set_registered_key(&mut self, key: Option<EntityKey>) {
        self.registered_key = key;
    }

    /// Position in tracking order, `None` while Detached.
    #[must_use]
    pub const fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub(crate) const fn set_sequence(&mut self, sequence: Option<u64>) {
        self.sequence = sequence;
    }

    /// Whether the native object pushes change notices for this entry.
    #[must_use]
    pub const fn is_notifying(&self) -> bool {
        self.notifying
    }

    pub(crate) const fn set_notifying(&mut self, notifying: bool) {
        self.notifying = notifying;
    }

    /// Property by name.
    pub fn property(&self, name: &str) -> Result<&PropertyModel, InternalError> {
        self.shape
            .find_property(name)
            .ok_or_else(|| InternalError::unknown_property(self.shape.name(), name))
    }

    /// Dense index of the property `name`.
    pub fn property_index(&self, name: &str) -> Result<usize, InternalError> {
        self.property(name).map(PropertyModel::index)
    }

    fn property_at(&self, index: usize) -> Result<PropertyModel, InternalError> {
        self.shape
            .property(index)
            .cloned()
            .ok_or_else(|| InternalError::unknown_property(self.shape.name(), format!("#{index}")))
    }

    // ---------------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------------

    /// Current value, preferring transparent-read sidecars in order.
    pub fn get_value(&self, index: usize) -> Result<Value, InternalError> {
        let property = self.property_at(index)?;
        for sidecar in &self.sidecars {
            if sidecar.transparent_read()
                && let Some(value) = sidecar.value(&property)
            {
                return Ok(value.clone());
            }
        }

        self.storage.get_value(&self.shape, index)
    }

    /// Original value, falling through to the current primary value when the
    /// property is not snapshotted.
    pub fn original_value(&self, index: usize) -> Result<Value, InternalError> {
        let property = self.property_at(index)?;
        match self.sidecar(&SidecarName::OriginalValues) {
            Some(originals) => originals.get(&self.shape, &self.storage, &property),
            None => self.storage.get_value(&self.shape, index),
        }
    }

    /// Write a value through the entry. Returns whether the value changed.
    ///
    /// The original value is snapshotted first; the write lands in the first
    /// transparent-write sidecar able to store it, else in primary storage.
    pub fn set_value(&mut self, index: usize, value: Value) -> Result<bool, InternalError> {
        let property = self.property_at(index)?;
        let entity = self.shape.name();
        if property.is_read_only() {
            return Err(InternalError::read_only_property(entity, property.name()));
        }
        if property.is_key() && !matches!(self.state(), EntityState::Detached | EntityState::Added) {
            return Err(InternalError::read_only_property(entity, property.name()));
        }
        if !property.kind().accepts(&value) {
            return Err(InternalError::interface(format!(
                "'{entity}.{}' is {} and cannot hold {value}",
                property.name(),
                property.kind()
            )));
        }

        self.ensure_original_snapshot(index)?;
        if self.get_value(index)? == value {
            return Ok(false);
        }

        match self
            .sidecars
            .iter_mut()
            .find(|s| s.transparent_write() && s.can_store(&property))
        {
            Some(sidecar) => sidecar.set(&property, value)?,
            None => self.storage.set_value(&self.shape, index, value)?,
        }
        self.temporary.retain(|&i| i != index);

        Ok(true)
    }

    /// Raw write into primary storage, no checks.
    pub(crate) fn write_value(&mut self, index: usize, value: Value) -> Result<(), InternalError> {
        self.storage.set_value(&self.shape, index, value)
    }

    /// Snapshot one original value if it is not held yet.
    pub(crate) fn ensure_original_snapshot(&mut self, index: usize) -> Result<(), InternalError> {
        let property = self.property_at(index)?;
        if let Some(slot) = self.sidecar_slot(&SidecarName::OriginalValues) {
            self.sidecars[slot].ensure_snapshot(&self.shape, &self.storage, &property)?;
        }

        Ok(())
    }

    /// Undo a partially applied transition: restore the bits and write the
    /// previous values back, newest first.
    pub(crate) fn restore(&mut self, bits: StateBits, previous: Vec<(usize, Value)>) {
        self.bits = bits;
        for (index, value) in previous.into_iter().rev() {
            self.temporary.retain(|&i| i != index);
            // Restoring a value just read from the same slot cannot fail
            // unless the native object rejects its own value.
            if let Err(err) = self.write_value(index, value) {
                tracing::warn!(entity = self.shape.name(), index, %err, "failed to restore value");
            }
        }
    }

    /// Modified flag for one property; false for key properties.
    pub fn is_property_modified(&self, index: usize) -> Result<bool, InternalError> {
        let property = self.property_at(index)?;
        if property.is_key() {
            return Ok(false);
        }

        self.bits.is_property_modified(index)
    }

    /// Names of the properties an update writes. Key and read-only flags
    /// left by a bulk `Modified` mark are not reported.
    #[must_use]
    pub fn modified_properties(&self) -> Vec<&'static str> {
        if self.state() != EntityState::Modified {
            return Vec::new();
        }

        self.writable_flags().map(PropertyModel::name).collect()
    }

    /// Whether any flag that `set_property_modified` could clear is set.
    #[must_use]
    pub fn has_modified_properties(&self) -> bool {
        self.writable_flags().next().is_some()
    }

    fn writable_flags(&self) -> impl Iterator<Item = &PropertyModel> {
        self.bits
            .modified_indices()
            .into_iter()
            .filter_map(|i| self.shape.property(i))
            .filter(|p| !p.is_key() && !p.is_read_only())
    }

    /// Snapshotted properties whose current value differs from the original.
    pub fn changed_properties(&self) -> Result<Vec<usize>, InternalError> {
        let Some(originals) = self.sidecar(&SidecarName::OriginalValues) else {
            return Ok(Vec::new());
        };

        let mut changed = Vec::new();
        for property in self.shape.properties() {
            if let Some(original) = originals.value(property)
                && *original != self.get_value(property.index())?
            {
                changed.push(property.index());
            }
        }

        Ok(changed)
    }

    /// Business key from the current key values, `None` when any part is
    /// null or, while Added, a store-generated part still holds its kind
    /// default.
    pub fn key(&self, factory: &dyn EntityKeyFactory) -> Result<Option<EntityKey>, InternalError> {
        self.key_in(factory, self.state(), &[])
    }

    /// Key the entry would have in `state` with `pending` values written.
    pub(crate) fn key_in(
        &self,
        factory: &dyn EntityKeyFactory,
        state: EntityState,
        pending: &[(usize, Value)],
    ) -> Result<Option<EntityKey>, InternalError> {
        let mut values = Vec::with_capacity(self.shape.primary_key().len());
        for &index in self.shape.primary_key() {
            let property = self.property_at(index)?;
            let value = match pending.iter().find(|(i, _)| *i == index) {
                Some((_, value)) => value.clone(),
                None => self.get_value(index)?,
            };
            // The store has not assigned this part yet.
            if state == EntityState::Added
                && property.is_store_generated()
                && value == property.kind().default_value()
            {
                return Ok(None);
            }
            values.push(value);
        }

        Ok(factory.create(values))
    }

    // ---------------------------------------------------------------------
    // Temporary values
    // ---------------------------------------------------------------------

    /// Whether the property holds a generated value not yet persisted.
    #[must_use]
    pub fn is_temporary(&self, index: usize) -> bool {
        self.temporary.contains(&index)
    }

    pub(crate) fn mark_temporary(&mut self, index: usize) {
        if !self.temporary.contains(&index) {
            self.temporary.push(index);
        }
    }

    /// Restore the kind default of every temporary value.
    pub(crate) fn reset_temporary_values(&mut self) -> Result<(), InternalError> {
        for index in std::mem::take(&mut self.temporary) {
            let default = self.property_at(index)?.kind().default_value();
            self.write_value(index, default)?;
        }

        Ok(())
    }

    // ---------------------------------------------------------------------
    // Sidecars
    // ---------------------------------------------------------------------

    /// Attach a sidecar, replacing and returning any sidecar of the same name.
    pub fn add_sidecar(&mut self, sidecar: Sidecar) -> Option<Sidecar> {
        match self.sidecar_slot(sidecar.name()) {
            Some(slot) => Some(std::mem::replace(&mut self.sidecars[slot], sidecar)),
            None => {
                self.sidecars.push(sidecar);
                None
            }
        }
    }

    #[must_use]
    pub fn sidecar(&self, name: &SidecarName) -> Option<&Sidecar> {
        self.sidecars.iter().find(|s| s.name() == name)
    }

    pub fn sidecar_mut(&mut self, name: &SidecarName) -> Option<&mut Sidecar> {
        self.sidecars.iter_mut().find(|s| s.name() == name)
    }

    pub fn sidecars(&self) -> impl Iterator<Item = &Sidecar> {
        self.sidecars.iter()
    }

    /// Detach a sidecar without touching primary storage.
    pub fn remove_sidecar(&mut self, name: &SidecarName) -> Option<Sidecar> {
        let slot = self.sidecar_slot(name)?;

        Some(self.sidecars.remove(slot))
    }

    /// Detach the named sidecar and write its values into primary storage.
    /// Returns whether a sidecar of that name was attached.
    pub fn commit_sidecar(&mut self, name: &SidecarName) -> Result<bool, InternalError> {
        let Some(sidecar) = self.remove_sidecar(name) else {
            return Ok(false);
        };
        sidecar.commit(&self.shape, &mut self.storage)?;

        Ok(true)
    }

    /// Detach the named sidecar, discarding its values.
    pub fn rollback_sidecar(&mut self, name: &SidecarName) -> bool {
        self.remove_sidecar(name).map(Sidecar::rollback).is_some()
    }

    /// Commit every auto-commit sidecar, in attachment order.
    pub fn auto_commit_sidecars(&mut self) -> Result<(), InternalError> {
        let names = self.auto_commit_names();
        for name in &names {
            self.commit_sidecar(name)?;
        }

        Ok(())
    }

    /// Roll back every auto-commit sidecar.
    pub fn auto_rollback_sidecars(&mut self) {
        self.sidecars.retain(|s| !s.auto_commit());
    }

    /// Attach a store-generated staging sidecar when an Added entry has
    /// store-generated properties.
    pub fn prepare_to_save(&mut self) {
        let wants_staging = self.state() == EntityState::Added
            && self.shape.properties().iter().any(PropertyModel::is_store_generated)
            && self.sidecar(&SidecarName::StoreGeneratedValues).is_none();

        if wants_staging {
            self.sidecars.push(Sidecar::store_generated_values(&self.shape));
        }
    }

    /// Apply the local effects of a successful save and return the state
    /// the entry moved to: Added/Modified become Unchanged with refreshed
    /// original values, Deleted becomes Detached.
    pub(crate) fn accept_changes(&mut self) -> Result<EntityState, InternalError> {
        let next = match self.state() {
            EntityState::Added | EntityState::Modified => EntityState::Unchanged,
            EntityState::Deleted => EntityState::Detached,
            state => return Ok(state),
        };

        self.bits.set_entity_state(next);
        self.temporary.clear();
        if let Some(slot) = self.sidecar_slot(&SidecarName::OriginalValues) {
            let originals = &mut self.sidecars[slot];
            originals.update_snapshot(&self.shape, &self.storage)?;
        }

        Ok(next)
    }

    fn sidecar_slot(&self, name: &SidecarName) -> Option<usize> {
        self.sidecars.iter().position(|s| s.name() == name)
    }

    fn auto_commit_names(&self) -> Vec<SidecarName> {
        self.sidecars
            .iter()
            .filter(|s| s.auto_commit())
            .map(|s| s.name().clone())
            .collect()
    }
}

impl fmt::Debug for TrackedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedEntry")
            .field("entity", &self.shape.name())
            .field("state", &self.state())
            .field("key", &self.registered_key)
            .field("sidecars", &self.sidecars.len())
            .finish_non_exhaustive()
    }
}
