use crate::{
    error::InternalError,
    model::{EntityShape, PropertyModel, StorageLayout},
    tracking::notify::ChangeFeed,
    value::{Value, ValueBuffer},
};
use std::{
    any::Any,
    cell::{Ref, RefCell, RefMut},
    fmt,
    rc::Rc,
};

///
/// EntityObject
///
/// Accessor contract implemented by native domain objects. Only native
/// properties of the object's shape are ever passed in.
///

pub trait EntityObject: Any {
    /// Name of the entity type this object belongs to.
    fn entity_type(&self) -> &'static str;

    fn get_value(&self, property: &PropertyModel) -> Value;

    fn set_value(&mut self, property: &PropertyModel, value: Value) -> Result<(), InternalError>;

    /// Register for property change notifications. Objects that push
    /// notices into `feed` from their setters return `true`; the tracker
    /// then relies on those notices instead of snapshot comparison.
    fn subscribe(&mut self, feed: ChangeFeed) -> bool {
        let _ = feed;
        false
    }

    /// Receive the principal resolved by relationship fixup for the
    /// foreign key `relationship` (`None` when the link is severed).
    fn set_navigation(&mut self, relationship: &str, target: Option<EntityRef>) {
        let _ = (relationship, target);
    }
}

///
/// ObjectId
///
/// Reference identity of a native object: the address of its shared
/// allocation. Stable while any `EntityRef` to the object is alive, and the
/// tracker holds one for every entry it knows.
///

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ObjectId(usize);

///
/// EntityRef
///
/// Shared handle to a native object. Equality and hashing are by reference,
/// never by the object's own notion of equality.
///

#[derive(Clone)]
pub struct EntityRef(Rc<RefCell<dyn EntityObject>>);

impl EntityRef {
    pub fn new<T: EntityObject>(object: T) -> Self {
        Self(Rc::new(RefCell::new(object)))
    }

    #[must_use]
    pub fn identity(&self) -> ObjectId {
        ObjectId(Rc::as_ptr(&self.0).cast::<()>() as usize)
    }

    #[must_use]
    pub fn borrow(&self) -> Ref<'_, dyn EntityObject> {
        self.0.borrow()
    }

    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<'_, dyn EntityObject> {
        self.0.borrow_mut()
    }

    /// Typed read access, `None` when the object is not a `T`.
    pub fn with<T: EntityObject, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let object = self.0.borrow();
        let any: &dyn Any = &*object;

        any.downcast_ref::<T>().map(f)
    }

    /// Typed write access, `None` when the object is not a `T`.
    pub fn with_mut<T: EntityObject, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut object = self.0.borrow_mut();
        let any: &mut dyn Any = &mut *object;

        any.downcast_mut::<T>().map(f)
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for EntityRef {}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityRef").field(&self.identity()).finish()
    }
}

///
/// ValueStorage
///
/// Primary per-entry storage of property values; the variant is chosen
/// from the shape's layout when the entry is created.
///

#[derive(Debug)]
pub enum ValueStorage {
    NativeOnly { object: EntityRef },
    ShadowOnly { values: Vec<Value> },
    Mixed { object: EntityRef, shadow: Vec<Value> },
}

impl ValueStorage {
    /// Storage for an entry with a native object. Shadow slots start null.
    pub fn for_object(shape: &EntityShape, object: EntityRef) -> Result<Self, InternalError> {
        match shape.storage_layout() {
            StorageLayout::NativeOnly => Ok(Self::NativeOnly { object }),
            StorageLayout::Mixed => Ok(Self::Mixed {
                object,
                shadow: vec![Value::Null; shape.shadow_property_count()],
            }),
            StorageLayout::ShadowOnly => Err(InternalError::tracking_invariant(format!(
                "'{}' is a shadow entity type and cannot wrap a native object",
                shape.name()
            ))),
        }
    }

    /// Storage for a pure shadow entry, optionally seeded from a row.
    pub fn shadow(shape: &EntityShape, row: Option<&ValueBuffer>) -> Result<Self, InternalError> {
        if shape.storage_layout() != StorageLayout::ShadowOnly {
            return Err(InternalError::tracking_invariant(format!(
                "'{}' has a native type; shadow-only storage requires a shadow entity type",
                shape.name()
            )));
        }
        let values = shape
            .properties()
            .iter()
            .map(|p| row.map_or(Value::Null, |row| row.value(p.index())))
            .collect();

        Ok(Self::ShadowOnly { values })
    }

    #[must_use]
    pub const fn object(&self) -> Option<&EntityRef> {
        match self {
            Self::NativeOnly { object } | Self::Mixed { object, .. } => Some(object),
            Self::ShadowOnly { .. } => None,
        }
    }

    pub fn get_value(&self, shape: &EntityShape, index: usize) -> Result<Value, InternalError> {
        let property = Self::property(shape, index)?;
        match self {
            Self::NativeOnly { object } => Ok(object.borrow().get_value(property)),
            Self::ShadowOnly { values } => Self::slot(values, shape, property).cloned(),
            Self::Mixed { object, shadow } => {
                if property.is_native() {
                    Ok(object.borrow().get_value(property))
                } else {
                    Self::slot(shadow, shape, property).cloned()
                }
            }
        }
    }

    pub fn set_value(
        &mut self,
        shape: &EntityShape,
        index: usize,
        value: Value,
    ) -> Result<(), InternalError> {
        let property = Self::property(shape, index)?;
        match self {
            Self::NativeOnly { object } => object.borrow_mut().set_value(property, value),
            Self::ShadowOnly { values } => {
                *Self::slot_mut(values, shape, property)? = value;
                Ok(())
            }
            Self::Mixed { object, shadow } => {
                if property.is_native() {
                    object.borrow_mut().set_value(property, value)
                } else {
                    *Self::slot_mut(shadow, shape, property)? = value;
                    Ok(())
                }
            }
        }
    }

    fn property(shape: &EntityShape, index: usize) -> Result<&PropertyModel, InternalError> {
        shape
            .property(index)
            .ok_or_else(|| InternalError::unknown_property(shape.name(), format!("#{index}")))
    }

    // Shadow-only shapes declare every property as shadow, so the shadow
    // index addresses both storage variants.
    fn slot<'a>(
        values: &'a [Value],
        shape: &EntityShape,
        property: &PropertyModel,
    ) -> Result<&'a Value, InternalError> {
        property
            .shadow_index()
            .and_then(|i| values.get(i))
            .ok_or_else(|| InternalError::unknown_property(shape.name(), property.name()))
    }

    fn slot_mut<'a>(
        values: &'a mut [Value],
        shape: &EntityShape,
        property: &PropertyModel,
    ) -> Result<&'a mut Value, InternalError> {
        property
            .shadow_index()
            .and_then(|i| values.get_mut(i))
            .ok_or_else(|| InternalError::unknown_property(shape.name(), property.name()))
    }
}

///
/// TESTS
///
