//! Module: key
//! Responsibility: business-key identity values and the factories that build them.
//! Does not own: extraction of key values from entries (see `entry`).
//!
//! Invariants:
//! - Keys are immutable once constructed.
//! - Equal key-part values produce equal keys regardless of which factory
//!   instance built them.
//! - A key with a null part is never constructed (the key is not computable).


use crate::{
    model::PropertyModel,
    value::{Value, ValueKind},
};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    fmt::{self, Debug, Display},
    hash::{Hash, Hasher},
    sync::Arc,
};
use xxhash_rust::xxh3::xxh3_64_with_seed;

///
/// Constants
///

const COMPOSITE_SEED: u64 = 0x636f_6d70_6f73_6974;

///
/// EntityKey
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EntityKey {
    Simple(SimpleEntityKey),
    Composite(CompositeEntityKey),
}

impl EntityKey {
    /// Stable 64-bit fingerprint, salted by kind (simple) or by position
    /// (composite). Also the value fed to `Hash`.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        match self {
            Self::Simple(key) => key.fingerprint(),
            Self::Composite(key) => key.fingerprint(),
        }
    }

    /// Key-part values in key order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        match self {
            Self::Simple(key) => std::slice::from_ref(&key.value),
            Self::Composite(key) => &key.values,
        }
    }
}

impl Hash for EntityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.fingerprint());
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(key) => write!(f, "{}", key.value),
            Self::Composite(key) => {
                let parts: Vec<String> = key.values.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

///
/// SimpleEntityKey
/// Single-property key of a declared kind.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SimpleEntityKey {
    kind: ValueKind,
    value: Value,
}

impl SimpleEntityKey {
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        self.kind
    }

    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    fn fingerprint(&self) -> u64 {
        let mut bytes = Vec::with_capacity(16);
        self.value.write_canonical(&mut bytes);

        xxh3_64_with_seed(&bytes, u64::from(self.kind.tag()))
    }
}

///
/// CompositeEntityKey
/// Ordered multi-property key; equality is element-wise.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CompositeEntityKey {
    values: Box<[Value]>,
}

impl CompositeEntityKey {
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    fn fingerprint(&self) -> u64 {
        let mut bytes = Vec::with_capacity(16 * self.values.len());
        for (position, value) in self.values.iter().enumerate() {
            bytes.extend_from_slice(&(position as u32).to_be_bytes());
            value.write_canonical(&mut bytes);
        }

        xxh3_64_with_seed(&bytes, COMPOSITE_SEED)
    }
}

///
/// EntityKeyFactory
///
/// Builds keys from key-part values in key order. Returns `None` when the
/// key is not computable (wrong arity or a null part).
///

pub trait EntityKeyFactory: Debug + Send + Sync {
    fn create(&self, values: Vec<Value>) -> Option<EntityKey>;
}

///
/// SimpleEntityKeyFactory
///

#[derive(Debug)]
pub struct SimpleEntityKeyFactory {
    kind: ValueKind,
}

impl SimpleEntityKeyFactory {
    #[must_use]
    pub const fn new(kind: ValueKind) -> Self {
        Self { kind }
    }

    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        self.kind
    }
}

impl EntityKeyFactory for SimpleEntityKeyFactory {
    fn create(&self, values: Vec<Value>) -> Option<EntityKey> {
        let [value]: [Value; 1] = values.try_into().ok()?;
        if value.is_null() {
            return None;
        }

        Some(EntityKey::Simple(SimpleEntityKey {
            kind: self.kind,
            value,
        }))
    }
}

///
/// CompositeEntityKeyFactory
///

#[derive(Debug, Default)]
pub struct CompositeEntityKeyFactory;

impl EntityKeyFactory for CompositeEntityKeyFactory {
    fn create(&self, values: Vec<Value>) -> Option<EntityKey> {
        if values.is_empty() || values.iter().any(Value::is_null) {
            return None;
        }

        Some(EntityKey::Composite(CompositeEntityKey {
            values: values.into_boxed_slice(),
        }))
    }
}

///
/// KeyFactoryRegistry
///
/// Selects key factories by key shape. Single-property keys share one
/// factory per value kind, cached in a copy-on-write map: readers clone the
/// current `Arc` snapshot, writers publish a new map under the write lock
/// after re-checking, so racing writers never lose entries.
///

#[derive(Default)]
pub struct KeyFactoryRegistry {
    simple: RwLock<Arc<HashMap<ValueKind, Arc<SimpleEntityKeyFactory>>>>,
    composite: Arc<CompositeEntityKeyFactory>,
}

impl KeyFactoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory for the given key properties, in key order.
    pub fn key_factory(&self, properties: &[&PropertyModel]) -> Arc<dyn EntityKeyFactory> {
        match properties {
            [single] => self.simple_factory(single.kind()) as Arc<dyn EntityKeyFactory>,
            _ => Arc::clone(&self.composite) as Arc<dyn EntityKeyFactory>,
        }
    }

    /// Shared simple factory for `kind`, created on first use.
    pub fn simple_factory(&self, kind: ValueKind) -> Arc<SimpleEntityKeyFactory> {
        let snapshot = Arc::clone(&*self.simple.read());
        if let Some(factory) = snapshot.get(&kind) {
            return Arc::clone(factory);
        }

        let mut slot = self.simple.write();
        if let Some(factory) = slot.get(&kind) {
            return Arc::clone(factory);
        }
        let factory = Arc::new(SimpleEntityKeyFactory::new(kind));
        let mut next = HashMap::clone(&**slot);
        next.insert(kind, Arc::clone(&factory));
        *slot = Arc::new(next);

        factory
    }

    /// Number of cached simple factories.
    #[must_use]
    pub fn cached_kinds(&self) -> usize {
        self.simple.read().len()
    }
}

impl Debug for KeyFactoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyFactoryRegistry")
            .field("cached_kinds", &self.cached_kinds())
            .finish_non_exhaustive()
    }
}
