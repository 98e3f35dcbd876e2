//! Module: manager
//! Responsibility: the session-level identity map and lifecycle orchestration.
//! Does not own: value storage layout (see `storage`) or snapshot mechanics
//! (see `sidecar`).
//!
//! Invariants:
//! - An entry is in `by_reference` iff it is tracked and has a native object.
//! - An entry is in `by_key` iff it is tracked and its key is computable.
//! - No two entries share a reference slot or a key slot.
//! - Listeners observe "changing" before "changed" for every transition, in
//!   registration order, with the relationship fixer first.

mod arena;
mod save;


use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    model::Model,
    obs::sink::{self, MetricsEvent, MetricsSink},
    tracking::{
        EntityKey, EntityRef, EntityState, ObjectId, SidecarName, StateChange, StateListener,
        TrackedEntry, TrackingOptions, ValueStorage,
        fixup::{FixupScope, RelationshipFixer},
        generate::{ValueGenerator, ValueGenerators},
        notify::{ChangeFeed, ChangeNotice, ChangePhase, NoticeQueue, NotificationBus},
    },
    value::{Value, ValueBuffer},
};
use std::{collections::HashMap, fmt, sync::Arc};

// re-exports
pub use arena::EntryId;
pub(crate) use arena::EntryArena;
pub use save::{PendingChange, PersistenceSink, SaveBatch};

///
/// StateManager
///
/// One tracking session. Single-threaded: entries hold `Rc` handles to
/// native objects and every mutation goes through `&mut self`.
///

pub struct StateManager {
    model: Arc<Model>,
    options: TrackingOptions,
    arena: EntryArena,
    by_reference: HashMap<ObjectId, EntryId>,
    detached_by_reference: HashMap<ObjectId, EntryId>,
    by_key: HashMap<(&'static str, EntityKey), EntryId>,
    next_sequence: u64,
    fixer: Option<RelationshipFixer>,
    listeners: NotificationBus,
    generators: ValueGenerators,
    notices: NoticeQueue,
    metrics: Option<&'static dyn MetricsSink>,
}

impl StateManager {
    #[must_use]
    pub fn new(model: Arc<Model>) -> Self {
        Self::with_options(model, TrackingOptions::default())
    }

    #[must_use]
    pub fn with_options(model: Arc<Model>, options: TrackingOptions) -> Self {
        Self {
            model,
            options,
            arena: EntryArena::default(),
            by_reference: HashMap::new(),
            detached_by_reference: HashMap::new(),
            by_key: HashMap::new(),
            next_sequence: 0,
            fixer: options.fixes_relationships().then(RelationshipFixer::default),
            listeners: NotificationBus::default(),
            generators: ValueGenerators::default(),
            notices: NoticeQueue::default(),
            metrics: None,
        }
    }

    /// Route this session's metrics events to `sink`.
    #[must_use]
    pub const fn metrics_sink(mut self, sink: &'static dyn MetricsSink) -> Self {
        self.metrics = Some(sink);
        self
    }

    #[must_use]
    pub const fn model(&self) -> &Arc<Model> {
        &self.model
    }

    #[must_use]
    pub const fn options(&self) -> TrackingOptions {
        self.options
    }

    /// Register a value generator for one property.
    pub fn register_generator(
        &mut self,
        entity_type: &str,
        property: &str,
        generator: Arc<dyn ValueGenerator>,
    ) -> Result<(), InternalError> {
        let shape = self.model.shape(entity_type)?;
        let property = shape
            .find_property(property)
            .ok_or_else(|| InternalError::unknown_property(shape.name(), property))?;
        self.generators
            .register(shape.name(), property.name(), generator);

        Ok(())
    }

    /// Append a listener; delivery follows registration order.
    pub fn add_listener(&mut self, listener: Box<dyn StateListener>) {
        self.listeners.add(listener);
    }

    // ---------------------------------------------------------------------
    // Entry creation
    // ---------------------------------------------------------------------

    /// Entry for a native object, looked up by reference identity first.
    /// A new entry starts Detached with its original values snapshotted.
    pub fn get_or_create_entry(&mut self, object: EntityRef) -> Result<EntryId, InternalError> {
        let identity = object.identity();
        if let Some(&id) = self
            .by_reference
            .get(&identity)
            .or_else(|| self.detached_by_reference.get(&identity))
        {
            return Ok(id);
        }

        let entity_type = object.borrow().entity_type();
        let shape = Arc::clone(self.model.shape(entity_type)?);
        let storage = ValueStorage::for_object(&shape, object.clone())?;
        let id = self.arena.insert(TrackedEntry::new(Arc::clone(&shape), storage)?)?;
        self.detached_by_reference.insert(identity, id);
        self.subscribe(id, &object)?;

        self.record(MetricsEvent::EntryCreated {
            entity: shape.name(),
        });
        tracing::trace!(entity = shape.name(), entry = %id, "entry created");

        Ok(id)
    }

    /// Detached entry with no native object (pure shadow types only).
    pub fn create_shadow_entry(&mut self, entity_type: &str) -> Result<EntryId, InternalError> {
        let shape = Arc::clone(self.model.shape(entity_type)?);
        let storage = ValueStorage::shadow(&shape, None)?;
        let id = self.arena.insert(TrackedEntry::new(Arc::clone(&shape), storage)?)?;

        self.record(MetricsEvent::EntryCreated {
            entity: shape.name(),
        });

        Ok(id)
    }

    /// Entry for a raw row. Rows whose key is already tracked resolve to the
    /// existing entry; otherwise a new Unchanged entry is built and
    /// registered.
    pub fn get_or_materialize_entry(
        &mut self,
        entity_type: &str,
        row: &ValueBuffer,
    ) -> Result<EntryId, InternalError> {
        let model = Arc::clone(&self.model);
        let ty = model.entity_type(entity_type)?;
        let shape = Arc::clone(ty.shape());

        let key_values = shape.primary_key().iter().map(|&i| row.value(i)).collect();
        let key = ty.key_factory().create(key_values).ok_or_else(|| {
            InternalError::key_invariant(format!(
                "row for '{}' has a null key part",
                shape.name()
            ))
        })?;
        if let Some(&id) = self.by_key.get(&(shape.name(), key.clone())) {
            self.record(MetricsEvent::MaterializeHit {
                entity: shape.name(),
            });
            return Ok(id);
        }
        self.record(MetricsEvent::MaterializeMiss {
            entity: shape.name(),
        });

        let storage = if shape.has_native_type() {
            let materializer = ty.materializer().ok_or_else(|| {
                InternalError::new(
                    ErrorClass::NotFound,
                    ErrorOrigin::Model,
                    format!("no materializer registered for '{}'", shape.name()),
                )
            })?;
            let object = materializer.materialize(&shape, row)?;
            let mut storage = ValueStorage::for_object(&shape, object)?;
            for property in shape.properties().iter().filter(|p| p.is_shadow()) {
                storage.set_value(&shape, property.index(), row.value(property.index()))?;
            }
            storage
        } else {
            ValueStorage::shadow(&shape, Some(row))?
        };

        let object = storage.object().cloned();
        let id = self.arena.insert(TrackedEntry::new(Arc::clone(&shape), storage)?)?;
        if let Some(object) = &object {
            self.detached_by_reference.insert(object.identity(), id);
            self.subscribe(id, object)?;
        }
        self.record(MetricsEvent::EntryCreated {
            entity: shape.name(),
        });

        if let Err(err) = self.transition(id, EntityState::Unchanged, Vec::new()) {
            self.discard(id);
            return Err(err);
        }

        Ok(id)
    }

    fn subscribe(&mut self, id: EntryId, object: &EntityRef) -> Result<(), InternalError> {
        let feed = ChangeFeed::new(id, self.notices.clone());
        let notifying = object.borrow_mut().subscribe(feed);
        self.arena.get_mut(id)?.set_notifying(notifying);

        Ok(())
    }

    // Drop an entry that never became visible.
    fn discard(&mut self, id: EntryId) {
        if let Ok(entry) = self.arena.remove(id)
            && let Some(object) = entry.object()
        {
            self.detached_by_reference.remove(&object.identity());
        }
    }

    // ---------------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------------

    /// Tracked entry registered under `key`.
    #[must_use]
    pub fn try_get_entry(&self, entity_type: &str, key: &EntityKey) -> Option<EntryId> {
        let entity = self.model.shape(entity_type).ok()?.name();

        self.by_key.get(&(entity, key.clone())).copied()
    }

    /// Entry (tracked or not yet tracked) for a native object.
    #[must_use]
    pub fn entry_for(&self, object: &EntityRef) -> Option<EntryId> {
        let identity = object.identity();

        self.by_reference
            .get(&identity)
            .or_else(|| self.detached_by_reference.get(&identity))
            .copied()
    }

    pub fn entry(&self, id: EntryId) -> Result<&TrackedEntry, InternalError> {
        self.arena.get(id)
    }

    /// Mutable entry access for sidecar management. State changes still go
    /// through the manager.
    pub fn entry_mut(&mut self, id: EntryId) -> Result<&mut TrackedEntry, InternalError> {
        self.arena.get_mut(id)
    }

    pub fn state(&self, id: EntryId) -> Result<EntityState, InternalError> {
        self.arena.get(id).map(TrackedEntry::state)
    }

    /// Tracked entries in tracking order.
    #[must_use]
    pub fn entries(&self) -> Vec<(EntryId, &TrackedEntry)> {
        let mut entries: Vec<_> = self
            .arena
            .iter()
            .filter(|(_, entry)| entry.sequence().is_some())
            .collect();
        entries.sort_by_key(|(_, entry)| entry.sequence());

        entries
    }

    /// Number of live entries, tracked or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }

    // ---------------------------------------------------------------------
    // Values
    // ---------------------------------------------------------------------

    pub fn get_value(&self, id: EntryId, property: &str) -> Result<Value, InternalError> {
        let entry = self.arena.get(id)?;

        entry.get_value(entry.property_index(property)?)
    }

    pub fn original_value(&self, id: EntryId, property: &str) -> Result<Value, InternalError> {
        let entry = self.arena.get(id)?;

        entry.original_value(entry.property_index(property)?)
    }

    /// Write through the entry. A changed value on an Unchanged or Modified
    /// entry marks the property modified; a key change on a tracked Added
    /// entry moves its key slot.
    pub fn set_value(&mut self, id: EntryId, property: &str, value: Value) -> Result<(), InternalError> {
        let entry = self.arena.get_mut(id)?;
        let index = entry.property_index(property)?;
        let is_key = entry.shape().primary_key().contains(&index);
        let previous = entry.get_value(index)?;
        if !entry.set_value(index, value)? {
            return Ok(());
        }

        match entry.state() {
            EntityState::Unchanged | EntityState::Modified => self.mark_modified(id, index),
            EntityState::Added if is_key => {
                if let Err(err) = self.rekey(id) {
                    self.arena.get_mut(id)?.write_value(index, previous)?;
                    return Err(err);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // ---------------------------------------------------------------------
    // State machine
    // ---------------------------------------------------------------------

    /// Move the entry to `state`.
    ///
    /// Entering Added first awaits generated values for every
    /// generated-on-add property still holding its kind default. Nothing is
    /// mutated before those values arrive, so dropping the future leaves
    /// the entry and the identity tables untouched.
    pub async fn set_state(&mut self, id: EntryId, state: EntityState) -> Result<(), InternalError> {
        let generated = if state == EntityState::Added && self.state(id)? != EntityState::Added {
            self.generate_values(id).await?
        } else {
            Vec::new()
        };

        self.transition(id, state, generated)
    }

    async fn generate_values(&self, id: EntryId) -> Result<Vec<(usize, Value)>, InternalError> {
        let entry = self.arena.get(id)?;
        let shape = Arc::clone(entry.shape());
        let planned = self.generators.plan(&shape, |i| entry.get_value(i))?;

        let mut values = Vec::with_capacity(planned.len());
        for (property, generator) in planned {
            let value = generator.next_value(shape.name(), &property).await?;
            values.push((property.index(), value));
        }

        if !values.is_empty() {
            self.record(MetricsEvent::ValuesGenerated {
                entity: shape.name(),
                count: values.len() as u64,
            });
        }

        Ok(values)
    }

    // Synchronous transition core: notify, apply, register, notify.
    fn transition(
        &mut self,
        id: EntryId,
        requested: EntityState,
        generated: Vec<(usize, Value)>,
    ) -> Result<(), InternalError> {
        let entry = self.arena.get(id)?;
        let (entity, old) = (entry.entity_name(), entry.state());

        // An Added entry was never persisted; deleting it just forgets it.
        let new = if old == EntityState::Added && requested == EntityState::Deleted {
            EntityState::Detached
        } else {
            requested
        };
        if new == EntityState::Modified && old == EntityState::Modified {
            self.arena
                .get_mut(id)?
                .bits_mut()
                .set_entity_state(EntityState::Modified);
            return Ok(());
        }
        if old == new {
            return Ok(());
        }

        if !old.is_tracked() && new.is_tracked() {
            self.check_registration(id, new, &generated)?;
        }

        let change = StateChange {
            entry: id,
            entity,
            old,
            new,
        };
        self.listeners.state_changing(&change);
        self.apply_transition(id, old, new, generated)?;

        if self.options.is_debug() {
            tracing::debug!(entity, entry = %id, from = %old, to = %new, "state transition");
        }

        self.notify_changed(&change)
    }

    fn apply_transition(
        &mut self,
        id: EntryId,
        old: EntityState,
        new: EntityState,
        generated: Vec<(usize, Value)>,
    ) -> Result<(), InternalError> {
        let entry = self.arena.get_mut(id)?;
        let saved_bits = entry.bits().clone();
        let mut previous = Vec::with_capacity(generated.len());
        for (index, value) in generated {
            let before = entry.get_value(index)?;
            if let Err(err) = entry.write_value(index, value) {
                entry.restore(saved_bits, previous);
                return Err(err);
            }
            previous.push((index, before));
            entry.mark_temporary(index);
        }
        entry.bits_mut().set_entity_state(new);

        let registered = match (old.is_tracked(), new.is_tracked()) {
            (false, true) => self.start_tracking(id),
            (true, false) => self.stop_tracking(id),
            _ => Ok(()),
        };
        if let Err(err) = registered {
            self.arena.get_mut(id)?.restore(saved_bits, previous);
            return Err(err);
        }

        if old == EntityState::Added && new == EntityState::Detached {
            self.arena.get_mut(id)?.reset_temporary_values()?;
        }

        Ok(())
    }

    // Fixer first, then user listeners. Listeners always hear "changed"
    // once the transition is applied, even if fixup fails.
    fn notify_changed(&mut self, change: &StateChange) -> Result<(), InternalError> {
        let fixed = match self.fixer.as_mut() {
            Some(fixer) => {
                let scope = FixupScope {
                    model: &self.model,
                    arena: &self.arena,
                };
                if change.from_detached() {
                    fixer.entry_tracked(scope, change.entry)
                } else if change.to_detached() {
                    fixer.entry_untracked(scope, change.entry)
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        };
        self.listeners.state_changed(change);

        fixed
    }

    /// Register a tracked entry in the reference and key tables.
    ///
    /// Fails with a conflict when another entry owns the object or the key;
    /// the tables are untouched in that case.
    pub fn start_tracking(&mut self, id: EntryId) -> Result<(), InternalError> {
        let entry = self.arena.get(id)?;
        if !entry.state().is_tracked() {
            return Err(InternalError::tracking_invariant(format!(
                "entry {id} is Detached and cannot be registered"
            )));
        }
        if entry.sequence().is_some() {
            return Ok(());
        }

        let entity = entry.entity_name();
        let identity = entry.object().map(EntityRef::identity);
        let key = entry.key(self.model.entity_type(entity)?.key_factory())?;
        self.check_identity(id, entity, identity, key.as_ref())?;

        if let Some(identity) = identity {
            self.detached_by_reference.remove(&identity);
            self.by_reference.insert(identity, id);
        }
        if let Some(key) = &key {
            self.by_key.insert((entity, key.clone()), id);
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let entry = self.arena.get_mut(id)?;
        entry.set_registered_key(key);
        entry.set_sequence(Some(sequence));
        self.record(MetricsEvent::TrackingStarted { entity });

        Ok(())
    }

    // Conflict check for registering `id` in `state` once `pending` values
    // are written; runs before listeners hear about the transition.
    fn check_registration(
        &self,
        id: EntryId,
        state: EntityState,
        pending: &[(usize, Value)],
    ) -> Result<(), InternalError> {
        let entry = self.arena.get(id)?;
        let entity = entry.entity_name();
        let key = entry.key_in(self.model.entity_type(entity)?.key_factory(), state, pending)?;

        self.check_identity(id, entity, entry.object().map(EntityRef::identity), key.as_ref())
    }

    // Fails when another entry owns the object reference or the key slot.
    fn check_identity(
        &self,
        id: EntryId,
        entity: &'static str,
        identity: Option<ObjectId>,
        key: Option<&EntityKey>,
    ) -> Result<(), InternalError> {
        if let Some(identity) = identity
            && self.by_reference.get(&identity).is_some_and(|&owner| owner != id)
        {
            self.record(MetricsEvent::IdentityConflict { entity });
            tracing::debug!(entity, entry = %id, "reference conflict");
            return Err(InternalError::reference_conflict(entity));
        }
        if let Some(key) = key
            && self
                .by_key
                .get(&(entity, key.clone()))
                .is_some_and(|&owner| owner != id)
        {
            self.record(MetricsEvent::IdentityConflict { entity });
            tracing::debug!(entity, entry = %id, %key, "key conflict");
            return Err(InternalError::identity_conflict(entity, key.to_string()));
        }

        Ok(())
    }

    /// Remove a Detached entry from the reference and key tables. The entry
    /// stays addressable until released.
    pub fn stop_tracking(&mut self, id: EntryId) -> Result<(), InternalError> {
        let entry = self.arena.get(id)?;
        if entry.state().is_tracked() {
            return Err(InternalError::tracking_invariant(format!(
                "entry {id} is {} and cannot be unregistered",
                entry.state()
            )));
        }
        if entry.sequence().is_none() {
            return Ok(());
        }

        let entity = entry.entity_name();
        let identity = entry.object().map(EntityRef::identity);
        if let Some(key) = entry.registered_key().cloned()
            && self.by_key.get(&(entity, key.clone())) == Some(&id)
        {
            self.by_key.remove(&(entity, key));
        }
        if let Some(identity) = identity {
            if self.by_reference.get(&identity) == Some(&id) {
                self.by_reference.remove(&identity);
            }
            self.detached_by_reference.insert(identity, id);
        }

        let entry = self.arena.get_mut(id)?;
        entry.set_registered_key(None);
        entry.set_sequence(None);
        self.record(MetricsEvent::TrackingStopped { entity });

        Ok(())
    }

    // Move a tracked entry to the key slot of its current key values.
    fn rekey(&mut self, id: EntryId) -> Result<bool, InternalError> {
        let entry = self.arena.get(id)?;
        if entry.sequence().is_none() {
            return Ok(false);
        }
        let entity = entry.entity_name();
        let key = entry.key(self.model.entity_type(entity)?.key_factory())?;
        if key.as_ref() == entry.registered_key() {
            return Ok(false);
        }

        self.check_identity(id, entity, None, key.as_ref())?;

        if let Some(old) = entry.registered_key().cloned() {
            self.by_key.remove(&(entity, old));
        }
        if let Some(key) = &key {
            self.by_key.insert((entity, key.clone()), id);
        }
        self.arena.get_mut(id)?.set_registered_key(key);

        Ok(true)
    }

    /// Free a Detached entry's slot; its handle goes stale.
    pub fn release(&mut self, id: EntryId) -> Result<(), InternalError> {
        let state = self.state(id)?;
        if state.is_tracked() {
            return Err(InternalError::tracking_invariant(format!(
                "entry {id} is {state}; only Detached entries can be released"
            )));
        }
        self.discard(id);

        Ok(())
    }

    /// Apply a successful save to one entry: Added/Modified become
    /// Unchanged, Deleted becomes Detached.
    pub fn accept_changes(&mut self, id: EntryId) -> Result<(), InternalError> {
        let entry = self.arena.get(id)?;
        let (entity, old) = (entry.entity_name(), entry.state());
        let new = match old {
            EntityState::Added | EntityState::Modified => EntityState::Unchanged,
            EntityState::Deleted => EntityState::Detached,
            EntityState::Unchanged | EntityState::Detached => return Ok(()),
        };

        let change = StateChange {
            entry: id,
            entity,
            old,
            new,
        };
        self.listeners.state_changing(&change);
        self.arena.get_mut(id)?.accept_changes()?;
        if new == EntityState::Detached {
            self.stop_tracking(id)?;
        } else {
            self.rekey(id)?;
        }

        self.notify_changed(&change)
    }

    // ---------------------------------------------------------------------
    // Property flags
    // ---------------------------------------------------------------------

    /// Set or clear one property's modified flag.
    ///
    /// Marking a property of an Unchanged entry promotes it to Modified with
    /// only that flag set; clearing the last flag of a Modified entry demotes
    /// it to Unchanged. Key and read-only properties cannot be marked.
    pub fn set_property_modified(
        &mut self,
        id: EntryId,
        property: &str,
        modified: bool,
    ) -> Result<(), InternalError> {
        let entry = self.arena.get(id)?;
        let model = entry.property(property)?;
        if model.is_key() || model.is_read_only() {
            return Err(InternalError::read_only_property(entry.entity_name(), property));
        }
        let index = model.index();

        if modified {
            return self.mark_modified(id, index);
        }

        let entry = self.arena.get_mut(id)?;
        entry.bits_mut().set_property_modified(index, false)?;
        if entry.state() == EntityState::Modified && !entry.has_modified_properties() {
            return self.transition(id, EntityState::Unchanged, Vec::new());
        }

        Ok(())
    }

    fn mark_modified(&mut self, id: EntryId, index: usize) -> Result<(), InternalError> {
        let entry = self.arena.get_mut(id)?;
        entry.bits_mut().set_property_modified(index, true)?;
        if entry.state() != EntityState::Unchanged {
            return Ok(());
        }

        let change = StateChange {
            entry: id,
            entity: entry.entity_name(),
            old: EntityState::Unchanged,
            new: EntityState::Modified,
        };
        self.listeners.state_changing(&change);
        self.arena
            .get_mut(id)?
            .bits_mut()
            .set_entity_state_preserving_flags(EntityState::Modified);

        self.notify_changed(&change)
    }

    // ---------------------------------------------------------------------
    // Change detection
    // ---------------------------------------------------------------------

    /// Drain queued native change notices into dirty flags.
    ///
    /// Every drained notice is processed; a notice that fails (unknown
    /// property, key conflict) is skipped and the first such error is
    /// returned once the queue is empty.
    pub fn process_notifications(&mut self) -> Result<bool, InternalError> {
        let mut changed = false;
        let mut failed = None;
        for notice in self.notices.drain() {
            match self.process_notice(&notice) {
                Ok(flagged) => changed |= flagged,
                Err(err) => {
                    tracing::warn!(
                        entry = %notice.entry,
                        property = notice.property,
                        error = %err,
                        "change notice skipped"
                    );
                    failed.get_or_insert(err);
                }
            }
        }

        failed.map_or(Ok(changed), Err)
    }

    fn process_notice(&mut self, notice: &ChangeNotice) -> Result<bool, InternalError> {
        // Notices for released entries are dropped.
        let Ok(entry) = self.arena.get(notice.entry) else {
            return Ok(false);
        };
        let property = entry.property(notice.property)?.clone();
        let index = property.index();

        match notice.phase {
            ChangePhase::Changing => {
                self.arena
                    .get_mut(notice.entry)?
                    .ensure_original_snapshot(index)?;

                Ok(false)
            }
            ChangePhase::Changed => {
                if !matches!(entry.state(), EntityState::Unchanged | EntityState::Modified) {
                    return Ok(false);
                }
                if property.is_key() {
                    return self.rekey(notice.entry);
                }
                let differs = property.original_value_index().is_none()
                    || entry.original_value(index)? != entry.get_value(index)?;
                if differs {
                    self.mark_modified(notice.entry, index)?;
                }

                Ok(differs)
            }
        }
    }

    /// Compare current against original values for every tracked entry
    /// that does not push notifications, flip flags and states, and move
    /// entries whose key values changed. Returns whether anything changed.
    pub fn detect_changes(&mut self) -> Result<bool, InternalError> {
        let mut changed = self.process_notifications()?;

        let ids: Vec<EntryId> = self
            .arena
            .iter()
            .filter(|(_, entry)| {
                matches!(entry.state(), EntityState::Unchanged | EntityState::Modified)
                    && !entry.is_notifying()
            })
            .map(|(id, _)| id)
            .collect();

        let mut entries_changed = 0u64;
        for &id in &ids {
            if self.detect_entry_changes(id)? {
                entries_changed += 1;
                changed = true;
            }
        }

        self.record(MetricsEvent::DetectChanges {
            entries_scanned: ids.len() as u64,
            entries_changed,
        });

        Ok(changed)
    }

    fn detect_entry_changes(&mut self, id: EntryId) -> Result<bool, InternalError> {
        let entry = self.arena.get(id)?;
        let flagged = if entry.state() == EntityState::Modified {
            entry.bits().modified_indices()
        } else {
            Vec::new()
        };
        let pending: Vec<usize> = entry
            .changed_properties()?
            .into_iter()
            .filter(|i| !flagged.contains(i))
            .collect();

        let mut changed = false;
        for index in pending {
            self.mark_modified(id, index)?;
            changed = true;
        }

        Ok(self.rekey(id)? || changed)
    }

    // ---------------------------------------------------------------------
    // Relationships
    // ---------------------------------------------------------------------

    /// Tracked principal of `dependent` through the foreign key `fk`.
    pub fn principal_of(&self, dependent: EntryId, fk: &str) -> Result<Option<EntryId>, InternalError> {
        self.fixup_scope().principal_of(dependent, fk)
    }

    /// Tracked dependents of `principal` through foreign keys named `fk`.
    pub fn dependents_of(&self, principal: EntryId, fk: &str) -> Result<Vec<EntryId>, InternalError> {
        self.fixup_scope().dependents_of(principal, fk)
    }

    /// Principal wired by relationship fixup, `None` when fixup is off.
    #[must_use]
    pub fn linked_principal(&self, dependent: EntryId, fk: &str) -> Option<EntryId> {
        self.fixer.as_ref()?.linked_principal(dependent, fk)
    }

    fn fixup_scope(&self) -> FixupScope<'_> {
        FixupScope {
            model: &self.model,
            arena: &self.arena,
        }
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn record(&self, event: MetricsEvent) {
        sink::record(self.metrics, event);
    }

    fn dirty_entries(&self) -> Vec<EntryId> {
        self.entries()
            .into_iter()
            .filter(|(_, entry)| entry.state().is_dirty())
            .map(|(id, _)| id)
            .collect()
    }

    fn rollback_staging(&mut self, ids: &[EntryId]) {
        for &id in ids {
            if let Ok(entry) = self.arena.get_mut(id) {
                entry.auto_rollback_sidecars();
            }
        }
    }

    fn has_staging(&self, id: EntryId) -> bool {
        self.arena
            .get(id)
            .is_ok_and(|entry| entry.sidecar(&SidecarName::StoreGeneratedValues).is_some())
    }
}

impl fmt::Debug for StateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateManager")
            .field("entries", &self.arena.len())
            .field("tracked_by_reference", &self.by_reference.len())
            .field("tracked_by_key", &self.by_key.len())
            .field("listeners", &self.listeners)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
