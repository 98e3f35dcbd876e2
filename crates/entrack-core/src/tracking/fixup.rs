//! Relationship fixup between tracked entries.
//!
//! Principal and dependent lookups are linear scans over tracked entries,
//! comparing foreign-key values against the principal's registered key.
//! The fixer runs before any user listener.

use crate::{
    error::InternalError,
    model::{ForeignKeyModel, Model},
    tracking::{EntityKey, EntryId, TrackedEntry, manager::EntryArena},
};
use std::collections::HashMap;

///
/// FixupScope
///
/// Read-only view of the session state a lookup needs.
///

#[derive(Clone, Copy)]
pub(crate) struct FixupScope<'a> {
    pub(crate) model: &'a Model,
    pub(crate) arena: &'a EntryArena,
}

impl FixupScope<'_> {
    /// Principal key the dependent's foreign-key values point at.
    pub(crate) fn foreign_key_value(
        &self,
        dependent: &TrackedEntry,
        fk: &ForeignKeyModel,
    ) -> Result<Option<EntityKey>, InternalError> {
        let factory = self.model.entity_type(fk.principal())?.key_factory();
        let values = fk
            .properties()
            .iter()
            .map(|&i| dependent.get_value(i))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(factory.create(values))
    }

    /// Tracked principal of `dependent` through the foreign key `fk_name`.
    pub(crate) fn principal_of(&self, dependent: EntryId, fk_name: &str) -> Result<Option<EntryId>, InternalError> {
        let entry = self.arena.get(dependent)?;
        let fk = entry
            .shape()
            .foreign_key(fk_name)
            .ok_or_else(|| InternalError::unknown_property(entry.entity_name(), fk_name))?;
        let Some(key) = self.foreign_key_value(entry, fk)? else {
            return Ok(None);
        };

        Ok(self
            .arena
            .iter()
            .find(|(_, candidate)| {
                candidate.state().is_tracked()
                    && candidate.entity_name() == fk.principal()
                    && candidate.registered_key() == Some(&key)
            })
            .map(|(id, _)| id))
    }

    /// Tracked dependents pointing at `principal` through foreign keys named
    /// `fk_name`.
    pub(crate) fn dependents_of(&self, principal: EntryId, fk_name: &str) -> Result<Vec<EntryId>, InternalError> {
        let entry = self.arena.get(principal)?;
        let Some(key) = entry.registered_key() else {
            return Ok(Vec::new());
        };

        let mut dependents = Vec::new();
        for (id, candidate) in self.arena.iter() {
            if id == principal || !candidate.state().is_tracked() {
                continue;
            }
            let Some(fk) = candidate.shape().foreign_key(fk_name) else {
                continue;
            };
            if fk.principal() == entry.entity_name()
                && self.foreign_key_value(candidate, fk)?.as_ref() == Some(key)
            {
                dependents.push(id);
            }
        }

        Ok(dependents)
    }
}

///
/// RelationshipFixer
///
/// Keeps a link table `(dependent, foreign key) -> principal` in step with
/// tracking and pushes navigation updates into native objects.
///

#[derive(Debug, Default)]
pub(crate) struct RelationshipFixer {
    links: HashMap<(EntryId, &'static str), EntryId>,
}

impl RelationshipFixer {
    /// Wire a newly tracked entry to its principals and dependents.
    pub(crate) fn entry_tracked(&mut self, scope: FixupScope<'_>, id: EntryId) -> Result<(), InternalError> {
        let entry = scope.arena.get(id)?;

        // As a dependent.
        for fk in entry.shape().foreign_keys() {
            if let Some(principal) = scope.principal_of(id, fk.name())? {
                self.link(scope, id, fk.name(), principal)?;
            }
        }

        // As a principal.
        let mut pending = Vec::new();
        for (candidate_id, candidate) in scope.arena.iter() {
            for fk in candidate.shape().foreign_keys() {
                if fk.principal() == entry.entity_name() && !self.links.contains_key(&(candidate_id, fk.name())) {
                    pending.push(fk.name());
                }
            }
        }
        pending.sort_unstable();
        pending.dedup();
        for fk_name in pending {
            for dependent in scope.dependents_of(id, fk_name)? {
                if !self.links.contains_key(&(dependent, fk_name)) {
                    self.link(scope, dependent, fk_name, id)?;
                }
            }
        }

        Ok(())
    }

    /// Sever every link the entry takes part in.
    pub(crate) fn entry_untracked(&mut self, scope: FixupScope<'_>, id: EntryId) -> Result<(), InternalError> {
        let severed: Vec<(EntryId, &'static str)> = self
            .links
            .iter()
            .filter(|((dependent, _), principal)| *dependent == id || **principal == id)
            .map(|(link, _)| *link)
            .collect();

        for (dependent, fk_name) in severed {
            self.links.remove(&(dependent, fk_name));
            if let Ok(entry) = scope.arena.get(dependent)
                && let Some(object) = entry.object()
            {
                object.borrow_mut().set_navigation(fk_name, None);
            }
        }

        Ok(())
    }

    /// Linked principal, if fixup has wired one.
    pub(crate) fn linked_principal(&self, dependent: EntryId, fk_name: &str) -> Option<EntryId> {
        self.links
            .iter()
            .find(|((d, name), _)| *d == dependent && *name == fk_name)
            .map(|(_, principal)| *principal)
    }

    fn link(
        &mut self,
        scope: FixupScope<'_>,
        dependent: EntryId,
        fk_name: &'static str,
        principal: EntryId,
    ) -> Result<(), InternalError> {
        self.links.insert((dependent, fk_name), principal);

        let target = scope.arena.get(principal)?.object().cloned();
        if let Some(object) = scope.arena.get(dependent)?.object() {
            object.borrow_mut().set_navigation(fk_name, target);
        }

        Ok(())
    }
}
