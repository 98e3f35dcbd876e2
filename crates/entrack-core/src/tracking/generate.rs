//! Value generation for properties declared `ValueGenerated::OnAdd`.
//!
//! Generators are the only suspending step of a state transition. The
//! manager awaits every generated value before it mutates anything, so a
//! dropped transition future leaves the entry untouched.

use crate::{
    error::InternalError,
    model::{EntityShape, PropertyModel, ValueGenerated},
    value::{Value, ValueKind},
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

///
/// ValueGenerator
///

#[async_trait]
pub trait ValueGenerator: Send + Sync {
    async fn next_value(&self, entity: &'static str, property: &PropertyModel) -> Result<Value, InternalError>;
}

///
/// SequenceValueGenerator
///
/// Monotonic integer sequence, shareable across sessions.
///

#[derive(Debug)]
pub struct SequenceValueGenerator {
    next: AtomicI64,
    step: i64,
}

impl SequenceValueGenerator {
    #[must_use]
    pub const fn new(start: i64) -> Self {
        Self::with_step(start, 1)
    }

    #[must_use]
    pub const fn with_step(start: i64, step: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
            step,
        }
    }
}

impl Default for SequenceValueGenerator {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl ValueGenerator for SequenceValueGenerator {
    async fn next_value(&self, entity: &'static str, property: &PropertyModel) -> Result<Value, InternalError> {
        let next = self.next.fetch_add(self.step, Ordering::Relaxed);
        match property.kind() {
            ValueKind::Int => Ok(Value::Int(next)),
            ValueKind::Uint => u64::try_from(next).map(Value::Uint).map_err(|_| {
                InternalError::generation_internal(format!(
                    "sequence for '{entity}.{}' produced negative value {next}",
                    property.name()
                ))
            }),
            kind => Err(InternalError::generation_internal(format!(
                "sequence cannot generate {kind} values for '{entity}.{}'",
                property.name()
            ))),
        }
    }
}

///
/// ValueGenerators
///
/// Generators registered per (entity type, property).
///

#[derive(Clone, Default)]
pub(crate) struct ValueGenerators {
    by_property: HashMap<(&'static str, &'static str), Arc<dyn ValueGenerator>>,
}

impl ValueGenerators {
    pub(crate) fn register(
        &mut self,
        entity: &'static str,
        property: &'static str,
        generator: Arc<dyn ValueGenerator>,
    ) {
        self.by_property.insert((entity, property), generator);
    }

    pub(crate) fn get(
        &self,
        entity: &'static str,
        property: &'static str,
    ) -> Option<&Arc<dyn ValueGenerator>> {
        self.by_property.get(&(entity, property))
    }

    /// Properties that need a generated value given the current values, with
    /// their generator. Composite keys with a generated part are rejected.
    pub(crate) fn plan(
        &self,
        shape: &EntityShape,
        current: impl Fn(usize) -> Result<Value, InternalError>,
    ) -> Result<Vec<(PropertyModel, Arc<dyn ValueGenerator>)>, InternalError> {
        let mut planned = Vec::new();
        for property in shape.properties() {
            if property.value_generated() != ValueGenerated::OnAdd {
                continue;
            }
            let Some(generator) = self.get(shape.name(), property.name()) else {
                continue;
            };
            if !property.kind().is_default(&current(property.index())?) {
                continue;
            }
            if property.is_key() && shape.primary_key().len() > 1 {
                return Err(InternalError::composite_key_generation(shape.name()));
            }
            planned.push((property.clone(), Arc::clone(generator)));
        }

        Ok(planned)
    }
}

impl fmt::Debug for ValueGenerators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueGenerators")
            .field("registered", &self.by_property.len())
            .finish()
    }
}

///
/// TESTS
///
