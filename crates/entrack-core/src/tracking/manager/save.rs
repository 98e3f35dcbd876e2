//! Save orchestration: hand dirty entries to the persistence collaborator and
//! settle sidecars and states from its outcome.
//!
//! A save either fully applies (staged values committed, changes accepted)
//! or leaves every entry in its pre-save state with staging rolled back.

use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    model::PropertyModel,
    obs::sink::MetricsEvent,
    tracking::{EntityKey, EntityState, EntryId, SidecarName, StateManager, TrackedEntry},
    value::Value,
};
use async_trait::async_trait;
use std::collections::HashSet;

///
/// PersistenceSink
///
/// External collaborator that writes a batch to the store. It may report
/// store-assigned values with `PendingChange::set_generated`; it returns
/// the number of rows affected.
///

#[async_trait(?Send)]
pub trait PersistenceSink {
    async fn save(&mut self, batch: &mut SaveBatch) -> Result<usize, InternalError>;
}

///
/// PendingChange
///
/// One dirty entry as handed to the sink.
///

#[derive(Clone, Debug)]
pub struct PendingChange {
    entry: EntryId,
    entity: &'static str,
    state: EntityState,
    key: Option<EntityKey>,
    values: Vec<(&'static str, Value)>,
    original_values: Vec<(&'static str, Value)>,
    modified: Vec<&'static str>,
    store_generated: Vec<&'static str>,
    generated: Vec<(&'static str, Value)>,
}

impl PendingChange {
    #[must_use]
    pub const fn entry(&self) -> EntryId {
        self.entry
    }

    #[must_use]
    pub const fn entity(&self) -> &'static str {
        self.entity
    }

    #[must_use]
    pub const fn state(&self) -> EntityState {
        self.state
    }

    /// Business key at batch time, `None` while the store still has to
    /// assign part of it.
    #[must_use]
    pub const fn key(&self) -> Option<&EntityKey> {
        self.key.as_ref()
    }

    /// Current values of every property, in declaration order.
    #[must_use]
    pub fn values(&self) -> &[(&'static str, Value)] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, property: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(name, _)| *name == property)
            .map(|(_, value)| value)
    }

    /// Original values of the modified properties.
    #[must_use]
    pub fn original_values(&self) -> &[(&'static str, Value)] {
        &self.original_values
    }

    /// Properties an update must write.
    #[must_use]
    pub fn modified_properties(&self) -> &[&'static str] {
        &self.modified
    }

    /// Properties the store may assign for this change.
    #[must_use]
    pub fn store_generated_properties(&self) -> &[&'static str] {
        &self.store_generated
    }

    #[must_use]
    pub fn generated(&self) -> &[(&'static str, Value)] {
        &self.generated
    }

    /// Report a store-assigned value. Only store-generated properties of
    /// inserted entries accept one.
    pub fn set_generated(&mut self, property: &str, value: Value) -> Result<(), InternalError> {
        let Some(&name) = self.store_generated.iter().find(|&&name| name == property) else {
            return Err(InternalError::new(
                ErrorClass::Unsupported,
                ErrorOrigin::Save,
                format!(
                    "'{}.{property}' is not store-generated for a {} entry",
                    self.entity, self.state
                ),
            ));
        };

        match self.generated.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.generated.push((name, value)),
        }

        Ok(())
    }
}

///
/// SaveBatch
///
/// Dirty entries in tracking order.
///

#[derive(Clone, Debug, Default)]
pub struct SaveBatch {
    changes: Vec<PendingChange>,
}

impl SaveBatch {
    #[must_use]
    pub fn changes(&self) -> &[PendingChange] {
        &self.changes
    }

    pub fn changes_mut(&mut self) -> &mut [PendingChange] {
        &mut self.changes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl StateManager {
    /// Persist every Added, Modified, and Deleted entry.
    ///
    /// On success staged store values are committed and every change is
    /// accepted; the sink's row count is returned. On failure every
    /// auto-commit sidecar of the batch is rolled back, no entry changes
    /// state, and the sink's error is returned unchanged.
    pub async fn save_changes(&mut self, sink: &mut dyn PersistenceSink) -> Result<usize, InternalError> {
        if self.options().detects_changes_on_save() {
            self.detect_changes()?;
        } else {
            self.process_notifications()?;
        }

        let ids = self.dirty_entries();
        if ids.is_empty() {
            return Ok(0);
        }
        for &id in &ids {
            self.entry_mut(id)?.prepare_to_save();
        }

        let mut batch = match self.build_batch(&ids) {
            Ok(batch) => batch,
            Err(err) => {
                self.rollback_staging(&ids);
                return Err(err);
            }
        };
        self.record(MetricsEvent::SaveStart {
            entries: batch.len() as u64,
        });
        tracing::debug!(entries = batch.len(), "save started");

        let saved = match sink.save(&mut batch).await {
            Ok(rows) => self
                .stage_generated(&batch)
                .and_then(|()| self.check_saved_keys(&ids))
                .map(|()| rows),
            Err(err) => Err(err),
        };
        let rows = match saved {
            Ok(rows) => rows,
            Err(err) => {
                self.rollback_staging(&ids);
                self.record(MetricsEvent::SaveFailed);
                tracing::debug!(error = %err, "save failed, staging rolled back");
                return Err(err);
            }
        };

        self.commit_batch(&ids)?;
        self.record(MetricsEvent::SaveFinish { rows: rows as u64 });
        tracing::debug!(rows, "save finished");

        Ok(rows)
    }

    // Every key the batch holds once committed must be free: claimed by one
    // batch entry only and not owned by a tracked entry outside the batch.
    fn check_saved_keys(&self, ids: &[EntryId]) -> Result<(), InternalError> {
        let mut claimed = HashSet::with_capacity(ids.len());
        for &id in ids {
            let entry = self.entry(id)?;
            if entry.state() == EntityState::Deleted {
                continue;
            }
            let entity = entry.entity_name();
            let factory = self.model().entity_type(entity)?.key_factory();
            let Some(key) = entry.key_in(factory, EntityState::Unchanged, &[])? else {
                continue;
            };

            let owned_outside = self
                .by_key
                .get(&(entity, key.clone()))
                .is_some_and(|owner| *owner != id && !ids.contains(owner));
            if owned_outside || !claimed.insert((entity, key.clone())) {
                self.record(MetricsEvent::IdentityConflict { entity });
                tracing::debug!(entity, entry = %id, %key, "saved key conflict");
                return Err(InternalError::identity_conflict(entity, key.to_string()));
            }
        }

        Ok(())
    }

    // Apply a validated save. The batch's key slots are released first so
    // entries can trade keys; `accept_changes` claims the new ones.
    fn commit_batch(&mut self, ids: &[EntryId]) -> Result<(), InternalError> {
        for &id in ids {
            let entry = self.arena.get_mut(id)?;
            let entity = entry.entity_name();
            if let Some(key) = entry.registered_key().cloned() {
                entry.set_registered_key(None);
                let slot = (entity, key);
                if self.by_key.get(&slot) == Some(&id) {
                    self.by_key.remove(&slot);
                }
            }
        }

        let mut failed = None;
        for &id in ids {
            let applied = self
                .arena
                .get_mut(id)
                .and_then(TrackedEntry::auto_commit_sidecars)
                .and_then(|()| self.accept_changes(id));
            if let Err(err) = applied {
                tracing::warn!(entry = %id, error = %err, "failed to accept saved entry");
                failed.get_or_insert(err);
            }
        }

        failed.map_or(Ok(()), Err)
    }

    fn build_batch(&self, ids: &[EntryId]) -> Result<SaveBatch, InternalError> {
        let mut changes = Vec::with_capacity(ids.len());
        for &id in ids {
            let entry = self.entry(id)?;
            let shape = entry.shape();
            let state = entry.state();

            let values = shape
                .properties()
                .iter()
                .map(|p| Ok((p.name(), entry.get_value(p.index())?)))
                .collect::<Result<Vec<_>, InternalError>>()?;
            let modified = entry.modified_properties();
            let original_values = modified
                .iter()
                .map(|&name| Ok((name, entry.original_value(entry.property_index(name)?)?)))
                .collect::<Result<Vec<_>, InternalError>>()?;
            let store_generated = if self.has_staging(id) {
                shape
                    .properties()
                    .iter()
                    .filter(|p| p.is_store_generated())
                    .map(PropertyModel::name)
                    .collect()
            } else {
                Vec::new()
            };

            changes.push(PendingChange {
                entry: id,
                entity: entry.entity_name(),
                state,
                key: entry.key(self.model().entity_type(entry.entity_name())?.key_factory())?,
                values,
                original_values,
                modified,
                store_generated,
                generated: Vec::new(),
            });
        }

        Ok(SaveBatch { changes })
    }

    // Copy sink-reported values into each entry's staging sidecar.
    fn stage_generated(&mut self, batch: &SaveBatch) -> Result<(), InternalError> {
        for change in batch.changes() {
            for (name, value) in change.generated() {
                let entry = self.entry_mut(change.entry())?;
                let property = entry.property(name)?.clone();
                if !property.kind().accepts(value) {
                    return Err(InternalError::new(
                        ErrorClass::Unsupported,
                        ErrorOrigin::Save,
                        format!(
                            "store value {value} does not fit '{}.{name}' ({})",
                            change.entity(),
                            property.kind()
                        ),
                    ));
                }
                let staging = entry
                    .sidecar_mut(&SidecarName::StoreGeneratedValues)
                    .ok_or_else(|| {
                        InternalError::sidecar_invariant(format!(
                            "no staging sidecar on '{}' entry {}",
                            change.entity(),
                            change.entry()
                        ))
                    })?;
                staging.set(&property, value.clone())?;
            }
        }

        Ok(())
    }
}
