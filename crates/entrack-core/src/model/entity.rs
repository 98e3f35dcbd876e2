use crate::model::{ModelError, PropertyModel, relation::ForeignKeyModel};
use std::collections::HashSet;

///
/// EntityShape
///
/// Static per-entity-type layout: property indices, native vs shadow split,
/// original-value slots, primary key, and foreign keys.
/// Immutable once built and shared by every entry of the type.
///

#[derive(Clone, Debug)]
pub struct EntityShape {
    name: &'static str,
    has_native_type: bool,
    properties: Vec<PropertyModel>,
    shadow_property_count: usize,
    original_value_count: usize,
    primary_key: Vec<usize>,
    foreign_keys: Vec<ForeignKeyModel>,
}

impl EntityShape {
    /// Start a shape for an entity type backed by native objects.
    #[must_use]
    pub const fn builder(name: &'static str) -> EntityShapeBuilder {
        EntityShapeBuilder::new(name, true)
    }

    /// Start a shape for a pure shadow entity type (no native objects).
    #[must_use]
    pub const fn shadow_builder(name: &'static str) -> EntityShapeBuilder {
        EntityShapeBuilder::new(name, false)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn has_native_type(&self) -> bool {
        self.has_native_type
    }

    #[must_use]
    pub const fn property_count(&self) -> usize {
        self.properties.len()
    }

    #[must_use]
    pub const fn shadow_property_count(&self) -> usize {
        self.shadow_property_count
    }

    /// Number of properties participating in original-value tracking.
    #[must_use]
    pub const fn original_value_count(&self) -> usize {
        self.original_value_count
    }

    #[must_use]
    pub fn properties(&self) -> &[PropertyModel] {
        &self.properties
    }

    /// Property by dense index.
    #[must_use]
    pub fn property(&self, index: usize) -> Option<&PropertyModel> {
        self.properties.get(index)
    }

    /// Property by name.
    #[must_use]
    pub fn find_property(&self, name: &str) -> Option<&PropertyModel> {
        self.properties.iter().find(|p| p.name() == name)
    }

    /// Primary key property indices, in key order.
    #[must_use]
    pub fn primary_key(&self) -> &[usize] {
        &self.primary_key
    }

    #[must_use]
    pub fn primary_key_properties(&self) -> Vec<&PropertyModel> {
        self.primary_key
            .iter()
            .map(|&index| &self.properties[index])
            .collect()
    }

    #[must_use]
    pub fn foreign_keys(&self) -> &[ForeignKeyModel] {
        &self.foreign_keys
    }

    #[must_use]
    pub fn foreign_key(&self, name: &str) -> Option<&ForeignKeyModel> {
        self.foreign_keys.iter().find(|fk| fk.name() == name)
    }

    /// Storage variant entries of this shape use.
    #[must_use]
    pub const fn storage_layout(&self) -> StorageLayout {
        if !self.has_native_type {
            StorageLayout::ShadowOnly
        } else if self.shadow_property_count == 0 {
            StorageLayout::NativeOnly
        } else {
            StorageLayout::Mixed
        }
    }
}

///
/// StorageLayout
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StorageLayout {
    NativeOnly,
    ShadowOnly,
    Mixed,
}

///
/// EntityShapeBuilder
///
/// Collects declared properties and keys, then assigns the stable layout.
///

#[derive(Debug)]
pub struct EntityShapeBuilder {
    name: &'static str,
    has_native_type: bool,
    properties: Vec<PropertyModel>,
    primary_key: Vec<&'static str>,
    foreign_keys: Vec<(&'static str, Vec<&'static str>, &'static str)>,
}

impl EntityShapeBuilder {
    const fn new(name: &'static str, has_native_type: bool) -> Self {
        Self {
            name,
            has_native_type,
            properties: Vec::new(),
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    #[must_use]
    pub fn property(mut self, property: PropertyModel) -> Self {
        self.properties.push(property);
        self
    }

    #[must_use]
    pub fn primary_key(mut self, names: &[&'static str]) -> Self {
        self.primary_key = names.to_vec();
        self
    }

    #[must_use]
    pub fn foreign_key(
        mut self,
        name: &'static str,
        properties: &[&'static str],
        principal: &'static str,
    ) -> Self {
        self.foreign_keys.push((name, properties.to_vec(), principal));
        self
    }

    /// Validate declarations and assign dense, shadow, and original-value
    /// indices in declaration order.
    pub fn build(self) -> Result<EntityShape, ModelError> {
        let entity = self.name;
        if entity.is_empty() {
            return Err(ModelError::EmptyName);
        }

        // Phase 1: names and storage kinds.
        let mut seen = HashSet::new();
        for property in &self.properties {
            if property.name().is_empty() {
                return Err(ModelError::EmptyName);
            }
            if !seen.insert(property.name()) {
                return Err(ModelError::DuplicateProperty {
                    entity,
                    property: property.name(),
                });
            }
            if !self.has_native_type && property.is_native() {
                return Err(ModelError::NativePropertyOnShadowType {
                    entity,
                    property: property.name(),
                });
            }
        }

        let position = |name: &str| self.properties.iter().position(|p| p.name() == name);

        // Phase 2: keys.
        if self.primary_key.is_empty() {
            return Err(ModelError::MissingPrimaryKey { entity });
        }
        let mut primary_key = Vec::with_capacity(self.primary_key.len());
        for &name in &self.primary_key {
            let index = position(name).ok_or(ModelError::UnknownProperty {
                entity,
                property: name,
            })?;
            primary_key.push(index);
        }

        let mut foreign_keys = Vec::with_capacity(self.foreign_keys.len());
        for (fk_name, names, principal) in &self.foreign_keys {
            let (fk_name, principal) = (*fk_name, *principal);
            if names.is_empty() {
                return Err(ModelError::EmptyForeignKey {
                    entity,
                    foreign_key: fk_name,
                });
            }
            let mut indices = Vec::with_capacity(names.len());
            for &name in names {
                let index = position(name).ok_or(ModelError::UnknownProperty {
                    entity,
                    property: name,
                })?;
                indices.push(index);
            }
            foreign_keys.push(ForeignKeyModel::new(fk_name, indices, principal));
        }

        // Phase 3: layout.
        let mut properties = self.properties;
        let mut shadow_count = 0;
        let mut original_count = 0;
        for (index, property) in properties.iter_mut().enumerate() {
            property.set_index(index);
            if primary_key.contains(&index) {
                property.mark_key();
            }
            if property.is_shadow() {
                property.set_shadow_index(shadow_count);
                shadow_count += 1;
            }
            if !property.is_key() && property.tracks_original() {
                property.set_original_value_index(Some(original_count));
                original_count += 1;
            }
        }

        Ok(EntityShape {
            name: entity,
            has_native_type: self.has_native_type,
            properties,
            shadow_property_count: shadow_count,
            original_value_count: original_count,
            primary_key,
            foreign_keys,
        })
    }
}
