//! Shared fixtures: a small model with native, mixed, shadow, and
//! composite-key entity types, plus recording collaborators.

use crate::{
    error::InternalError,
    model::{EntityShape, Model, PropertyModel},
    tracking::{
        ChangeFeed, EntityObject, EntityRef, PersistenceSink, SaveBatch, StateChange,
        StateListener, StateManager,
    },
    value::{Value, ValueBuffer, ValueKind},
};
use async_trait::async_trait;
use std::{cell::RefCell, collections::HashMap, rc::Rc, sync::Arc};

pub(crate) const PERSON: &str = "Person";
pub(crate) const ORDER: &str = "Order";
pub(crate) const ACCOUNT: &str = "Account";
pub(crate) const TAG: &str = "Tag";
pub(crate) const ORDER_LINE: &str = "OrderLine";
pub(crate) const TICKET: &str = "Ticket";

///
/// Person
/// Native principal: generated int key, text name, nullable age.
///

#[derive(Debug, Default)]
pub(crate) struct Person {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) age: Option<i64>,
}

impl Person {
    pub(crate) fn new(id: i64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            age: None,
        }
    }
}

impl EntityObject for Person {
    fn entity_type(&self) -> &'static str {
        PERSON
    }

    fn get_value(&self, property: &PropertyModel) -> Value {
        match property.name() {
            "id" => Value::Int(self.id),
            "name" => Value::from(self.name.as_str()),
            "age" => Value::from(self.age),
            _ => Value::Null,
        }
    }

    fn set_value(&mut self, property: &PropertyModel, value: Value) -> Result<(), InternalError> {
        match (property.name(), value) {
            ("id", Value::Int(v)) => self.id = v,
            ("name", Value::Text(v)) => self.name = v,
            ("age", Value::Int(v)) => self.age = Some(v),
            ("age", Value::Null) => self.age = None,
            (name, value) => {
                return Err(InternalError::interface(format!("Person.{name} cannot hold {value}")));
            }
        }

        Ok(())
    }
}

///
/// Order
/// Native dependent with a shadow `note`, a store-generated `revision`,
/// and a `customer` navigation to Person.
///

#[derive(Debug, Default)]
pub(crate) struct Order {
    pub(crate) id: i64,
    pub(crate) person_id: Option<i64>,
    pub(crate) total: i64,
    pub(crate) revision: i64,
    pub(crate) customer: Option<EntityRef>,
}

impl Order {
    pub(crate) fn new(id: i64, person_id: Option<i64>, total: i64) -> Self {
        Self {
            id,
            person_id,
            total,
            ..Self::default()
        }
    }
}

impl EntityObject for Order {
    fn entity_type(&self) -> &'static str {
        ORDER
    }

    fn get_value(&self, property: &PropertyModel) -> Value {
        match property.name() {
            "id" => Value::Int(self.id),
            "person_id" => Value::from(self.person_id),
            "total" => Value::Int(self.total),
            "revision" => Value::Int(self.revision),
            _ => Value::Null,
        }
    }

    fn set_value(&mut self, property: &PropertyModel, value: Value) -> Result<(), InternalError> {
        match (property.name(), value) {
            ("id", Value::Int(v)) => self.id = v,
            ("person_id", Value::Int(v)) => self.person_id = Some(v),
            ("person_id", Value::Null) => self.person_id = None,
            ("total", Value::Int(v)) => self.total = v,
            ("revision", Value::Int(v)) => self.revision = v,
            (name, value) => {
                return Err(InternalError::interface(format!("Order.{name} cannot hold {value}")));
            }
        }

        Ok(())
    }

    fn set_navigation(&mut self, relationship: &str, target: Option<EntityRef>) {
        if relationship == "customer" {
            self.customer = target;
        }
    }
}

///
/// Account
/// Native object that pushes change notices from its setter.
///

#[derive(Debug, Default)]
pub(crate) struct Account {
    pub(crate) id: i64,
    pub(crate) balance: i64,
    feed: Option<ChangeFeed>,
}

impl Account {
    pub(crate) fn new(id: i64, balance: i64) -> Self {
        Self {
            id,
            balance,
            feed: None,
        }
    }

    pub(crate) fn set_balance(&mut self, balance: i64) {
        if let Some(feed) = &self.feed {
            feed.property_changing("balance");
        }
        self.balance = balance;
        if let Some(feed) = &self.feed {
            feed.property_changed("balance");
        }
    }

    /// Push a bare "changed" notice, as a setter the model does not know
    /// about would.
    pub(crate) fn announce(&self, property: &'static str) {
        if let Some(feed) = &self.feed {
            feed.property_changed(property);
        }
    }

    pub(crate) fn set_id(&mut self, id: i64) {
        if let Some(feed) = &self.feed {
            feed.property_changing("id");
        }
        self.id = id;
        if let Some(feed) = &self.feed {
            feed.property_changed("id");
        }
    }
}

impl EntityObject for Account {
    fn entity_type(&self) -> &'static str {
        ACCOUNT
    }

    fn get_value(&self, property: &PropertyModel) -> Value {
        match property.name() {
            "id" => Value::Int(self.id),
            "balance" => Value::Int(self.balance),
            _ => Value::Null,
        }
    }

    fn set_value(&mut self, property: &PropertyModel, value: Value) -> Result<(), InternalError> {
        match (property.name(), value) {
            ("id", Value::Int(v)) => self.id = v,
            ("balance", Value::Int(v)) => self.balance = v,
            (name, value) => {
                return Err(InternalError::interface(format!("Account.{name} cannot hold {value}")));
            }
        }

        Ok(())
    }

    fn subscribe(&mut self, feed: ChangeFeed) -> bool {
        self.feed = Some(feed);
        true
    }
}

pub(crate) fn person_shape() -> EntityShape {
    EntityShape::builder(PERSON)
        .property(PropertyModel::native("id", ValueKind::Int).generated_on_add())
        .property(PropertyModel::native("name", ValueKind::Text))
        .property(PropertyModel::native("age", ValueKind::Int).nullable())
        .primary_key(&["id"])
        .build()
        .expect("person shape")
}

pub(crate) fn order_shape() -> EntityShape {
    EntityShape::builder(ORDER)
        .property(PropertyModel::native("id", ValueKind::Int).generated_on_add())
        .property(PropertyModel::native("person_id", ValueKind::Int).nullable())
        .property(PropertyModel::native("total", ValueKind::Int))
        .property(PropertyModel::native("revision", ValueKind::Int).store_generated())
        .property(PropertyModel::shadow("note", ValueKind::Text).nullable())
        .primary_key(&["id"])
        .foreign_key("customer", &["person_id"], PERSON)
        .build()
        .expect("order shape")
}

pub(crate) fn account_shape() -> EntityShape {
    EntityShape::builder(ACCOUNT)
        .property(PropertyModel::native("id", ValueKind::Int))
        .property(PropertyModel::native("balance", ValueKind::Int))
        .primary_key(&["id"])
        .build()
        .expect("account shape")
}

pub(crate) fn tag_shape() -> EntityShape {
    EntityShape::shadow_builder(TAG)
        .property(PropertyModel::shadow("code", ValueKind::Text))
        .property(PropertyModel::shadow("label", ValueKind::Text).nullable())
        .property(PropertyModel::shadow("created_by", ValueKind::Text).read_only())
        .primary_key(&["code"])
        .build()
        .expect("tag shape")
}

/// Shadow type whose key the store assigns on insert.
pub(crate) fn ticket_shape() -> EntityShape {
    EntityShape::shadow_builder(TICKET)
        .property(PropertyModel::shadow("id", ValueKind::Int).store_generated())
        .property(PropertyModel::shadow("title", ValueKind::Text))
        .primary_key(&["id"])
        .build()
        .expect("ticket shape")
}

pub(crate) fn order_line_shape() -> EntityShape {
    EntityShape::shadow_builder(ORDER_LINE)
        .property(PropertyModel::shadow("order_id", ValueKind::Int))
        .property(PropertyModel::shadow("line_no", ValueKind::Int).generated_on_add())
        .property(PropertyModel::shadow("qty", ValueKind::Int))
        .primary_key(&["order_id", "line_no"])
        .foreign_key("order", &["order_id"], ORDER)
        .build()
        .expect("order line shape")
}

pub(crate) fn fixture_model() -> Arc<Model> {
    let model = Model::builder()
        .entity(person_shape())
        .entity(order_shape())
        .entity(account_shape())
        .entity(tag_shape())
        .entity(order_line_shape())
        .entity(ticket_shape())
        .materializer(PERSON, |row: &ValueBuffer| {
            EntityRef::new(Person {
                id: row.value(0).as_int().unwrap_or_default(),
                name: row.value(1).as_text().unwrap_or_default().to_string(),
                age: row.value(2).as_int(),
            })
        })
        .materializer(ORDER, |row: &ValueBuffer| {
            EntityRef::new(Order {
                id: row.value(0).as_int().unwrap_or_default(),
                person_id: row.value(1).as_int(),
                total: row.value(2).as_int().unwrap_or_default(),
                revision: row.value(3).as_int().unwrap_or_default(),
                customer: None,
            })
        })
        .build()
        .expect("fixture model");

    Arc::new(model)
}

pub(crate) fn manager() -> StateManager {
    StateManager::new(fixture_model())
}

pub(crate) fn person_row(id: i64, name: &str) -> ValueBuffer {
    ValueBuffer::new(vec![Value::Int(id), Value::from(name), Value::Null])
}

pub(crate) fn order_row(id: i64, person_id: i64, total: i64) -> ValueBuffer {
    ValueBuffer::new(vec![
        Value::Int(id),
        Value::Int(person_id),
        Value::Int(total),
        Value::Int(1),
        Value::Null,
    ])
}

///
/// RecordingListener
/// Appends "changing"/"changed" lines to a shared log.
///

pub(crate) struct RecordingListener {
    label: &'static str,
    log: Rc<RefCell<Vec<String>>>,
}

impl RecordingListener {
    pub(crate) fn new(label: &'static str, log: &Rc<RefCell<Vec<String>>>) -> Self {
        Self {
            label,
            log: Rc::clone(log),
        }
    }
}

impl StateListener for RecordingListener {
    fn state_changing(&mut self, change: &StateChange) {
        self.log.borrow_mut().push(format!(
            "{} changing {} {}->{}",
            self.label, change.entity, change.old, change.new
        ));
    }

    fn state_changed(&mut self, change: &StateChange) {
        self.log.borrow_mut().push(format!(
            "{} changed {} {}->{}",
            self.label, change.entity, change.old, change.new
        ));
    }
}

///
/// MemorySink
/// Records batches; optionally fails, and reports store values for
/// inserted rows.
///

#[derive(Debug, Default)]
pub(crate) struct MemorySink {
    pub(crate) batches: Vec<SaveBatch>,
    pub(crate) fail_with: Option<String>,
    pub(crate) store_values: HashMap<&'static str, Value>,
}

impl MemorySink {
    pub(crate) fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn generating(property: &'static str, value: Value) -> Self {
        let mut sink = Self::default();
        sink.store_values.insert(property, value);
        sink
    }
}

#[async_trait(?Send)]
impl PersistenceSink for MemorySink {
    async fn save(&mut self, batch: &mut SaveBatch) -> Result<usize, InternalError> {
        for change in batch.changes_mut() {
            for (property, value) in &self.store_values {
                if change.store_generated_properties().contains(property) {
                    change.set_generated(property, value.clone())?;
                }
            }
        }
        self.batches.push(batch.clone());

        match &self.fail_with {
            Some(message) => Err(InternalError::save_failed(message.clone())),
            None => Ok(batch.len()),
        }
    }
}
