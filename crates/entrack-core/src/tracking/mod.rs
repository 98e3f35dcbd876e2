//! Change tracking: per-entry state, value storage, keys, sidecars, and the
//! session-level identity map.

mod bits;
mod entry;
mod fixup;
mod generate;
mod key;
mod manager;
mod notify;
mod options;
mod sidecar;
mod state;
mod storage;

// re-exports
pub use bits::StateBits;
pub use entry::TrackedEntry;
pub use generate::{SequenceValueGenerator, ValueGenerator};
pub use key::{
    CompositeEntityKey, CompositeEntityKeyFactory, EntityKey, EntityKeyFactory,
    KeyFactoryRegistry, SimpleEntityKey, SimpleEntityKeyFactory,
};
pub use manager::{EntryId, PendingChange, PersistenceSink, SaveBatch, StateManager};
pub use notify::{ChangeFeed, ChangeNotice, ChangePhase, NotificationBus, StateChange, StateListener};
pub use options::TrackingOptions;
pub use sidecar::{Sidecar, SidecarName, SidecarPolicy};
pub use state::EntityState;
pub use storage::{EntityObject, EntityRef, ObjectId, ValueStorage};
