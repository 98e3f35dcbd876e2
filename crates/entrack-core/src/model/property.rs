use crate::value::ValueKind;

///
/// ValueGenerated
///
/// When the tracker asks a value generator for a property's value.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ValueGenerated {
    #[default]
    Never,
    OnAdd,
}

///
/// PropertyStorage
///
/// Where a property's current value lives: on the native object, or in the
/// tracker's shadow array at `shadow_index`.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PropertyStorage {
    Native,
    Shadow { shadow_index: usize },
}

///
/// PropertyModel
///
/// Runtime metadata for one persisted property. Dense indices are assigned
/// by `EntityShapeBuilder::build` in declaration order and never change.
///

#[derive(Clone, Debug)]
pub struct PropertyModel {
    name: &'static str,
    kind: ValueKind,
    index: usize,
    storage: PropertyStorage,
    original_value_index: Option<usize>,
    nullable: bool,
    read_only: bool,
    is_key: bool,
    track_original: bool,
    value_generated: ValueGenerated,
    store_generated: bool,
}

impl PropertyModel {
    const fn declare(name: &'static str, kind: ValueKind, storage: PropertyStorage) -> Self {
        Self {
            name,
            kind,
            index: 0,
            storage,
            original_value_index: None,
            nullable: false,
            read_only: false,
            is_key: false,
            track_original: true,
            value_generated: ValueGenerated::Never,
            store_generated: false,
        }
    }

    /// Declare a property backed by a field on the native object.
    #[must_use]
    pub const fn native(name: &'static str, kind: ValueKind) -> Self {
        Self::declare(name, kind, PropertyStorage::Native)
    }

    /// Declare a shadow property (no backing field).
    #[must_use]
    pub const fn shadow(name: &'static str, kind: ValueKind) -> Self {
        Self::declare(name, kind, PropertyStorage::Shadow { shadow_index: 0 })
    }

    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[must_use]
    pub const fn generated_on_add(mut self) -> Self {
        self.value_generated = ValueGenerated::OnAdd;
        self
    }

    /// Mark the property as assigned by the store during a save.
    #[must_use]
    pub const fn store_generated(mut self) -> Self {
        self.store_generated = true;
        self
    }

    /// Exclude the property from original-value tracking.
    #[must_use]
    pub const fn without_original_value(mut self) -> Self {
        self.track_original = false;
        self
    }

    // ---------------------------------------------------------------------
    // Layout (assigned by the shape builder)
    // ---------------------------------------------------------------------

    pub(crate) const fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub(crate) const fn set_shadow_index(&mut self, shadow_index: usize) {
        if let PropertyStorage::Shadow { .. } = self.storage {
            self.storage = PropertyStorage::Shadow { shadow_index };
        }
    }

    pub(crate) const fn set_original_value_index(&mut self, index: Option<usize>) {
        self.original_value_index = index;
    }

    pub(crate) const fn mark_key(&mut self) {
        self.is_key = true;
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        self.kind
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub const fn storage(&self) -> PropertyStorage {
        self.storage
    }

    #[must_use]
    pub const fn is_native(&self) -> bool {
        matches!(self.storage, PropertyStorage::Native)
    }

    #[must_use]
    pub const fn is_shadow(&self) -> bool {
        !self.is_native()
    }

    #[must_use]
    pub const fn shadow_index(&self) -> Option<usize> {
        match self.storage {
            PropertyStorage::Native => None,
            PropertyStorage::Shadow { shadow_index } => Some(shadow_index),
        }
    }

    #[must_use]
    pub const fn original_value_index(&self) -> Option<usize> {
        self.original_value_index
    }

    #[must_use]
    pub const fn is_nullable(&self) -> bool {
        self.nullable
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    #[must_use]
    pub const fn is_key(&self) -> bool {
        self.is_key
    }

    pub(crate) const fn tracks_original(&self) -> bool {
        self.track_original
    }

    #[must_use]
    pub const fn value_generated(&self) -> ValueGenerated {
        self.value_generated
    }

    #[must_use]
    pub const fn is_store_generated(&self) -> bool {
        self.store_generated
    }
}
