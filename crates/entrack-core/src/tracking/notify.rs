//! State-change fan-out and the native change-notification feed.
//!
//! Listeners are plain objects invoked synchronously in registration order.
//! Native objects never call back into the tracker; they push notices into
//! a shared queue that the manager drains.

use crate::tracking::{EntityState, EntryId};
use std::{cell::RefCell, collections::VecDeque, fmt, rc::Rc};

///
/// StateChange
///
/// One lifecycle transition, delivered as "changing" before the state bits
/// are written and as "changed" after registration bookkeeping.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StateChange {
    pub entry: EntryId,
    pub entity: &'static str,
    pub old: EntityState,
    pub new: EntityState,
}

impl StateChange {
    /// Whether this transition starts tracking the entry.
    #[must_use]
    pub const fn from_detached(&self) -> bool {
        matches!(self.old, EntityState::Detached) && !matches!(self.new, EntityState::Detached)
    }

    /// Whether this transition stops tracking the entry.
    #[must_use]
    pub const fn to_detached(&self) -> bool {
        !matches!(self.old, EntityState::Detached) && matches!(self.new, EntityState::Detached)
    }
}

///
/// StateListener
///

pub trait StateListener {
    fn state_changing(&mut self, change: &StateChange) {
        let _ = change;
    }

    fn state_changed(&mut self, change: &StateChange) {
        let _ = change;
    }
}

///
/// NotificationBus
///

#[derive(Default)]
pub struct NotificationBus {
    listeners: Vec<Box<dyn StateListener>>,
}

impl NotificationBus {
    pub fn add(&mut self, listener: Box<dyn StateListener>) {
        self.listeners.push(listener);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn state_changing(&mut self, change: &StateChange) {
        for listener in &mut self.listeners {
            listener.state_changing(change);
        }
    }

    pub fn state_changed(&mut self, change: &StateChange) {
        for listener in &mut self.listeners {
            listener.state_changed(change);
        }
    }
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBus")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

///
/// ChangePhase
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangePhase {
    Changing,
    Changed,
}

///
/// ChangeNotice
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChangeNotice {
    pub entry: EntryId,
    pub property: &'static str,
    pub phase: ChangePhase,
}

///
/// ChangeFeed
///
/// Handle given to a native object at subscription time. The object calls
/// `property_changing` / `property_changed` from its setters.
///

#[derive(Clone)]
pub struct ChangeFeed {
    entry: EntryId,
    queue: NoticeQueue,
}

impl ChangeFeed {
    pub(crate) const fn new(entry: EntryId, queue: NoticeQueue) -> Self {
        Self { entry, queue }
    }

    pub fn property_changing(&self, property: &'static str) {
        self.queue.push(ChangeNotice {
            entry: self.entry,
            property,
            phase: ChangePhase::Changing,
        });
    }

    pub fn property_changed(&self, property: &'static str) {
        self.queue.push(ChangeNotice {
            entry: self.entry,
            property,
            phase: ChangePhase::Changed,
        });
    }
}

impl fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeed").field("entry", &self.entry).finish_non_exhaustive()
    }
}

///
/// NoticeQueue
/// Session-wide FIFO of pending native change notices.
///

#[derive(Clone, Debug, Default)]
pub(crate) struct NoticeQueue(Rc<RefCell<VecDeque<ChangeNotice>>>);

impl NoticeQueue {
    fn push(&self, notice: ChangeNotice) {
        self.0.borrow_mut().push_back(notice);
    }

    pub(crate) fn drain(&self) -> Vec<ChangeNotice> {
        self.0.borrow_mut().drain(..).collect()
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingListener, manager};
    use crate::tracking::EntityRef;

    fn change(old: EntityState, new: EntityState) -> StateChange {
        let mut manager = manager();
        let entry = manager
            .get_or_create_entry(EntityRef::new(crate::test_support::Person::default()))
            .unwrap();

        StateChange {
            entry,
            entity: "Person",
            old,
            new,
        }
    }

    #[test]
    fn detached_edges_are_classified() {
        assert!(change(EntityState::Detached, EntityState::Added).from_detached());
        assert!(change(EntityState::Deleted, EntityState::Detached).to_detached());
        assert!(!change(EntityState::Unchanged, EntityState::Modified).from_detached());
        assert!(!change(EntityState::Unchanged, EntityState::Modified).to_detached());
    }

    #[test]
    fn bus_delivers_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bus = NotificationBus::default();
        bus.add(Box::new(RecordingListener::new("first", &log)));
        bus.add(Box::new(RecordingListener::new("second", &log)));
        let c = change(EntityState::Unchanged, EntityState::Deleted);

        bus.state_changing(&c);
        bus.state_changed(&c);

        assert_eq!(bus.len(), 2);
        assert_eq!(
            *log.borrow(),
            [
                "first changing Person Unchanged->Deleted",
                "second changing Person Unchanged->Deleted",
                "first changed Person Unchanged->Deleted",
                "second changed Person Unchanged->Deleted",
            ]
        );
    }

    #[test]
    fn feed_notices_drain_in_push_order() {
        let queue = NoticeQueue::default();
        let entry = change(EntityState::Detached, EntityState::Added).entry;
        let feed = ChangeFeed::new(entry, queue.clone());

        feed.property_changing("balance");
        feed.property_changed("balance");

        let notices = queue.drain();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].phase, ChangePhase::Changing);
        assert_eq!(notices[1].phase, ChangePhase::Changed);
        assert!(queue.drain().is_empty());
    }
}
