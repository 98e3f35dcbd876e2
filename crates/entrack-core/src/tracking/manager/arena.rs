use crate::{error::InternalError, tracking::TrackedEntry};
use derive_more::Display;
use serde::Serialize;

///
/// EntryId
///
/// Generational handle into the session's entry arena. A handle whose slot
/// was released (and possibly reused) is stale and never resolves.
///

#[derive(Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[display("{index}:{generation}")]
pub struct EntryId {
    index: u32,
    generation: u32,
}

impl EntryId {
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

///
/// Slot
///

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    entry: Option<TrackedEntry>,
}

///
/// EntryArena
///

#[derive(Debug, Default)]
pub(crate) struct EntryArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl EntryArena {
    pub(crate) fn insert(&mut self, entry: TrackedEntry) -> Result<EntryId, InternalError> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);

            return Ok(EntryId {
                index,
                generation: slot.generation,
            });
        }

        let index = u32::try_from(self.slots.len())
            .map_err(|_| InternalError::tracking_invariant("entry arena is full"))?;
        self.slots.push(Slot {
            generation: 0,
            entry: Some(entry),
        });

        Ok(EntryId {
            index,
            generation: 0,
        })
    }

    pub(crate) fn get(&self, id: EntryId) -> Result<&TrackedEntry, InternalError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_ref())
            .ok_or_else(|| InternalError::stale_entry(id.index, id.generation))
    }

    pub(crate) fn get_mut(&mut self, id: EntryId) -> Result<&mut TrackedEntry, InternalError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.entry.as_mut())
            .ok_or_else(|| InternalError::stale_entry(id.index, id.generation))
    }

    /// Free the slot and bump its generation so `id` goes stale.
    pub(crate) fn remove(&mut self, id: EntryId) -> Result<TrackedEntry, InternalError> {
        self.get(id)?;
        let slot = &mut self.slots[id.index as usize];
        let entry = slot
            .entry
            .take()
            .ok_or_else(|| InternalError::stale_entry(id.index, id.generation))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        Ok(entry)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (EntryId, &TrackedEntry)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let entry = slot.entry.as_ref()?;
            let id = EntryId {
                index: u32::try_from(index).ok()?,
                generation: slot.generation,
            };

            Some((id, entry))
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}
