//! Runtime entity metadata.
//!
//! The schema/model builder that produces entity types lives outside this
//! crate; `model` holds the already-resolved runtime form the tracker reads:
//! - `EntityShape` defines *what exists* for one entity type
//! - `Model` binds shapes to key factories and materializers

mod entity;
mod property;
mod relation;

#[cfg(test)]
mod tests;

use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    tracking::{EntityKeyFactory, EntityRef, KeyFactoryRegistry},
    value::ValueBuffer,
};
use std::{collections::HashMap, fmt, sync::Arc};
use thiserror::Error as ThisError;

// re-exports
pub use entity::{EntityShape, EntityShapeBuilder, StorageLayout};
pub use property::{PropertyModel, PropertyStorage, ValueGenerated};
pub use relation::ForeignKeyModel;

///
/// ModelError
///

#[derive(Debug, Eq, PartialEq, ThisError)]
pub enum ModelError {
    #[error("entity and property names must be non-empty")]
    EmptyName,

    #[error("property '{property}' declared twice on '{entity}'")]
    DuplicateProperty {
        entity: &'static str,
        property: &'static str,
    },

    #[error("'{entity}' has no native type; '{property}' must be a shadow property")]
    NativePropertyOnShadowType {
        entity: &'static str,
        property: &'static str,
    },

    #[error("'{entity}' has no primary key")]
    MissingPrimaryKey { entity: &'static str },

    #[error("'{entity}' does not define property '{property}'")]
    UnknownProperty {
        entity: &'static str,
        property: &'static str,
    },

    #[error("foreign key '{foreign_key}' on '{entity}' has no properties")]
    EmptyForeignKey {
        entity: &'static str,
        foreign_key: &'static str,
    },

    #[error("foreign key '{foreign_key}' on '{entity}' targets unknown entity '{principal}'")]
    UnknownPrincipal {
        entity: &'static str,
        foreign_key: &'static str,
        principal: &'static str,
    },

    #[error(
        "foreign key '{foreign_key}' on '{entity}' has {found} properties, principal key has {expected}"
    )]
    ForeignKeyArity {
        entity: &'static str,
        foreign_key: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("entity type '{0}' registered twice")]
    DuplicateEntity(&'static str),

    #[error("materializer registered for unknown entity type '{0}'")]
    UnknownMaterializerTarget(&'static str),
}

impl From<ModelError> for InternalError {
    fn from(err: ModelError) -> Self {
        Self::new(ErrorClass::InvariantViolation, ErrorOrigin::Model, err.to_string())
    }
}

///
/// EntityMaterializer
///
/// Builds a native object from a raw row. Required for materializing entity
/// types that have a native type; pure shadow types never call it.
///

pub trait EntityMaterializer {
    fn materialize(&self, shape: &EntityShape, values: &ValueBuffer) -> Result<EntityRef, InternalError>;
}

impl<F> EntityMaterializer for F
where
    F: Fn(&ValueBuffer) -> EntityRef,
{
    fn materialize(&self, _: &EntityShape, values: &ValueBuffer) -> Result<EntityRef, InternalError> {
        Ok(self(values))
    }
}

///
/// EntityType
///
/// One registered entity type: its shape plus the collaborators resolved for
/// it at model build time.
///

#[derive(Clone)]
pub struct EntityType {
    shape: Arc<EntityShape>,
    key_factory: Arc<dyn EntityKeyFactory>,
    materializer: Option<Arc<dyn EntityMaterializer>>,
}

impl EntityType {
    #[must_use]
    pub const fn shape(&self) -> &Arc<EntityShape> {
        &self.shape
    }

    #[must_use]
    pub fn key_factory(&self) -> &dyn EntityKeyFactory {
        self.key_factory.as_ref()
    }

    #[must_use]
    pub fn materializer(&self) -> Option<&dyn EntityMaterializer> {
        self.materializer.as_deref()
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityType")
            .field("shape", &self.shape.name())
            .field("has_materializer", &self.materializer.is_some())
            .finish_non_exhaustive()
    }
}

///
/// Model
///
/// Finalized set of entity types. Built once, then shared by reference
/// between tracking sessions together with its key factory registry.
///

#[derive(Debug)]
pub struct Model {
    entities: HashMap<&'static str, EntityType>,
    key_factories: Arc<KeyFactoryRegistry>,
}

impl Model {
    #[must_use]
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    /// Look up an entity type by name.
    pub fn entity_type(&self, name: &str) -> Result<&EntityType, InternalError> {
        self.entities
            .get(name)
            .ok_or_else(|| InternalError::unknown_entity_type(name))
    }

    pub fn shape(&self, name: &str) -> Result<&Arc<EntityShape>, InternalError> {
        self.entity_type(name).map(EntityType::shape)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entities.keys().copied()
    }

    #[must_use]
    pub const fn key_factories(&self) -> &Arc<KeyFactoryRegistry> {
        &self.key_factories
    }
}

///
/// ModelBuilder
///

#[derive(Default)]
pub struct ModelBuilder {
    shapes: Vec<EntityShape>,
    materializers: Vec<(&'static str, Arc<dyn EntityMaterializer>)>,
    key_factories: Option<Arc<KeyFactoryRegistry>>,
}

impl ModelBuilder {
    #[must_use]
    pub fn entity(mut self, shape: EntityShape) -> Self {
        self.shapes.push(shape);
        self
    }

    #[must_use]
    pub fn materializer(
        mut self,
        entity: &'static str,
        materializer: impl EntityMaterializer + 'static,
    ) -> Self {
        self.materializers.push((entity, Arc::new(materializer)));
        self
    }

    /// Share an existing key factory registry (for example across models).
    #[must_use]
    pub fn key_factories(mut self, registry: Arc<KeyFactoryRegistry>) -> Self {
        self.key_factories = Some(registry);
        self
    }

    /// Validate cross-entity references and resolve key factories.
    pub fn build(self) -> Result<Model, ModelError> {
        let registry = self.key_factories.unwrap_or_default();

        let mut shapes: HashMap<&'static str, Arc<EntityShape>> = HashMap::new();
        for shape in self.shapes {
            let name = shape.name();
            if shapes.insert(name, Arc::new(shape)).is_some() {
                return Err(ModelError::DuplicateEntity(name));
            }
        }

        // Foreign keys must target a known principal with a matching key arity.
        for shape in shapes.values() {
            for fk in shape.foreign_keys() {
                let principal = shapes.get(fk.principal()).ok_or(ModelError::UnknownPrincipal {
                    entity: shape.name(),
                    foreign_key: fk.name(),
                    principal: fk.principal(),
                })?;
                let expected = principal.primary_key().len();
                let found = fk.properties().len();
                if expected != found {
                    return Err(ModelError::ForeignKeyArity {
                        entity: shape.name(),
                        foreign_key: fk.name(),
                        expected,
                        found,
                    });
                }
            }
        }

        let mut materializers: HashMap<&'static str, Arc<dyn EntityMaterializer>> = HashMap::new();
        for (entity, materializer) in self.materializers {
            if !shapes.contains_key(entity) {
                return Err(ModelError::UnknownMaterializerTarget(entity));
            }
            materializers.insert(entity, materializer);
        }

        let entities = shapes
            .into_iter()
            .map(|(name, shape)| {
                let key_factory = registry.key_factory(&shape.primary_key_properties());
                let entity = EntityType {
                    shape,
                    key_factory,
                    materializer: materializers.remove(name),
                };
                (name, entity)
            })
            .collect();

        Ok(Model {
            entities,
            key_factories: registry,
        })
    }
}
