use super::*;
use crate::{
    error::{ErrorClass, TrackingError},
    test_support::{Order, Person, order_shape, person_shape, tag_shape, ticket_shape},
    tracking::{SidecarPolicy, SimpleEntityKeyFactory},
    value::{ValueBuffer, ValueKind},
};

fn person_entry(id: i64, name: &str) -> TrackedEntry {
    let shape = Arc::new(person_shape());
    let storage = ValueStorage::for_object(&shape, EntityRef::new(Person::new(id, name))).unwrap();

    TrackedEntry::new(shape, storage).unwrap()
}

fn order_entry() -> TrackedEntry {
    let shape = Arc::new(order_shape());
    let storage = ValueStorage::for_object(&shape, EntityRef::new(Order::new(0, Some(3), 50))).unwrap();

    TrackedEntry::new(shape, storage).unwrap()
}

#[test]
fn new_entry_is_detached_with_originals_snapshotted() {
    let entry = person_entry(1, "Ada");

    assert_eq!(entry.state(), EntityState::Detached);
    assert_eq!(entry.bits().property_count(), entry.shape().property_count());
    let originals = entry.sidecar(&SidecarName::OriginalValues).expect("originals");
    assert_eq!(originals.len(), entry.shape().original_value_count());
}

#[test]
fn set_value_keeps_the_original_and_reports_change() {
    let mut entry = person_entry(1, "Ada");
    let name = entry.property_index("name").unwrap();

    assert!(entry.set_value(name, Value::from("Grace")).unwrap());
    assert!(!entry.set_value(name, Value::from("Grace")).unwrap());

    assert_eq!(entry.get_value(name).unwrap(), Value::from("Grace"));
    assert_eq!(entry.original_value(name).unwrap(), Value::from("Ada"));
    assert_eq!(entry.changed_properties().unwrap(), vec![name]);
}

#[test]
fn set_value_rejects_wrong_kinds() {
    let mut entry = person_entry(1, "Ada");
    let age = entry.property_index("age").unwrap();

    let err = entry.set_value(age, Value::from("old")).unwrap_err();

    assert_eq!(err.class, ErrorClass::Unsupported);
    assert!(entry.set_value(age, Value::Null).is_ok());
}

#[test]
fn read_only_properties_reject_writes() {
    let shape = Arc::new(tag_shape());
    let storage = ValueStorage::shadow(&shape, None).unwrap();
    let mut entry = TrackedEntry::new(shape, storage).unwrap();
    let created_by = entry.property_index("created_by").unwrap();

    let err = entry.set_value(created_by, Value::from("me")).unwrap_err();

    assert!(matches!(
        err.tracking_detail(),
        Some(TrackingError::ReadOnlyProperty { .. })
    ));
}

#[test]
fn key_properties_are_read_only_once_persisted() {
    let mut entry = person_entry(1, "Ada");
    let id = entry.property_index("id").unwrap();
    entry.bits_mut().set_entity_state(EntityState::Unchanged);

    assert!(entry.set_value(id, Value::Int(2)).is_err());

    entry.bits_mut().set_entity_state(EntityState::Added);
    assert!(entry.set_value(id, Value::Int(2)).unwrap());
}

#[test]
fn unknown_property_names_are_reported() {
    let entry = person_entry(1, "Ada");

    let err = entry.property_index("email").unwrap_err();

    assert_eq!(
        err.tracking_detail(),
        Some(&TrackingError::UnknownProperty {
            entity: "Person".to_string(),
            property: "email".to_string(),
        })
    );
}

#[test]
fn key_properties_never_report_modified() {
    let mut entry = person_entry(1, "Ada");
    entry.bits_mut().set_entity_state(EntityState::Modified);

    let id = entry.property_index("id").unwrap();
    let name = entry.property_index("name").unwrap();

    assert!(!entry.is_property_modified(id).unwrap());
    assert!(entry.is_property_modified(name).unwrap());
    assert_eq!(entry.modified_properties(), vec!["name", "age"]);
}

#[test]
fn bulk_marked_key_and_read_only_flags_are_not_writable() {
    let shape = Arc::new(tag_shape());
    let storage = ValueStorage::shadow(&shape, None).unwrap();
    let mut entry = TrackedEntry::new(shape, storage).unwrap();
    entry.bits_mut().set_entity_state(EntityState::Modified);

    assert_eq!(entry.modified_properties(), vec!["label"]);
    assert!(entry.has_modified_properties());

    let label = entry.property_index("label").unwrap();
    entry.bits_mut().set_property_modified(label, false).unwrap();
    assert!(!entry.has_modified_properties());
    assert!(entry.bits().any_properties_modified());
}

#[test]
fn unassigned_store_generated_key_is_not_computable_while_added() {
    let shape = Arc::new(ticket_shape());
    let row = ValueBuffer::new(vec![Value::Int(0), Value::from("a")]);
    let storage = ValueStorage::shadow(&shape, Some(&row)).unwrap();
    let mut entry = TrackedEntry::new(shape, storage).unwrap();
    let factory = SimpleEntityKeyFactory::new(ValueKind::Int);

    assert!(entry.key(&factory).unwrap().is_some());

    entry.bits_mut().set_entity_state(EntityState::Added);
    assert_eq!(entry.key(&factory).unwrap(), None);
    let assigned = entry
        .key_in(&factory, EntityState::Added, &[(0, Value::Int(4))])
        .unwrap()
        .expect("assigned key");
    assert_eq!(assigned.values(), &[Value::Int(4)]);
}

#[test]
fn key_is_none_while_any_part_is_null() {
    let shape = Arc::new(tag_shape());
    let storage = ValueStorage::shadow(&shape, None).unwrap();
    let mut entry = TrackedEntry::new(shape, storage).unwrap();
    let factory = SimpleEntityKeyFactory::new(ValueKind::Text);

    assert_eq!(entry.key(&factory).unwrap(), None);

    let code = entry.property_index("code").unwrap();
    entry.set_value(code, Value::from("rust")).unwrap();
    let key = entry.key(&factory).unwrap().expect("key");
    assert_eq!(key.values(), &[Value::from("rust")]);
}

#[test]
fn shadow_values_live_in_the_entry() {
    let mut entry = order_entry();
    let note = entry.property_index("note").unwrap();

    entry.set_value(note, Value::from("gift")).unwrap();

    assert_eq!(entry.get_value(note).unwrap(), Value::from("gift"));
    assert_eq!(entry.original_value(note).unwrap(), Value::Null);
}

#[test]
fn transparent_sidecars_capture_reads_and_writes() {
    let mut entry = order_entry();
    let total = entry.property_index("total").unwrap();
    entry.add_sidecar(Sidecar::custom("draft", SidecarPolicy::STAGING));

    entry.set_value(total, Value::Int(75)).unwrap();

    assert_eq!(entry.get_value(total).unwrap(), Value::Int(75));
    assert_eq!(entry.storage().get_value(entry.shape(), total).unwrap(), Value::Int(50));

    let draft = SidecarName::Custom("draft".to_string());
    assert!(entry.commit_sidecar(&draft).unwrap());
    assert!(entry.sidecar(&draft).is_none());
    assert_eq!(entry.storage().get_value(entry.shape(), total).unwrap(), Value::Int(75));
}

#[test]
fn rollback_sidecar_discards_staged_writes() {
    let mut entry = order_entry();
    let total = entry.property_index("total").unwrap();
    let draft = SidecarName::Custom("draft".to_string());
    entry.add_sidecar(Sidecar::custom("draft", SidecarPolicy::STAGING));

    entry.set_value(total, Value::Int(75)).unwrap();

    assert!(entry.rollback_sidecar(&draft));
    assert!(!entry.rollback_sidecar(&draft));
    assert_eq!(entry.get_value(total).unwrap(), Value::Int(50));
}

#[test]
fn add_sidecar_replaces_a_sidecar_with_the_same_name() {
    let mut entry = order_entry();

    assert!(entry.add_sidecar(Sidecar::custom("draft", SidecarPolicy::SNAPSHOT)).is_none());
    let replaced = entry
        .add_sidecar(Sidecar::custom("draft", SidecarPolicy::STAGING))
        .expect("replaced");

    assert_eq!(replaced.policy(), SidecarPolicy::SNAPSHOT);
    assert_eq!(entry.sidecars().count(), 2);
}

#[test]
fn prepare_to_save_stages_store_generated_values_for_added_entries() {
    let mut entry = order_entry();
    entry.prepare_to_save();
    assert!(entry.sidecar(&SidecarName::StoreGeneratedValues).is_none());

    entry.bits_mut().set_entity_state(EntityState::Added);
    entry.prepare_to_save();
    assert!(entry.sidecar(&SidecarName::StoreGeneratedValues).is_some());

    entry.auto_rollback_sidecars();
    assert!(entry.sidecar(&SidecarName::StoreGeneratedValues).is_none());
    assert!(entry.sidecar(&SidecarName::OriginalValues).is_some());
}

#[test]
fn accept_changes_refreshes_originals() {
    let mut entry = person_entry(1, "Ada");
    let name = entry.property_index("name").unwrap();
    entry.bits_mut().set_entity_state(EntityState::Added);
    entry.set_value(name, Value::from("Grace")).unwrap();

    assert_eq!(entry.accept_changes().unwrap(), EntityState::Unchanged);

    assert_eq!(entry.original_value(name).unwrap(), Value::from("Grace"));
    assert!(entry.changed_properties().unwrap().is_empty());
}

#[test]
fn accept_changes_detaches_deleted_entries() {
    let mut entry = person_entry(1, "Ada");
    entry.bits_mut().set_entity_state(EntityState::Deleted);

    assert_eq!(entry.accept_changes().unwrap(), EntityState::Detached);
    assert_eq!(entry.state(), EntityState::Detached);
}

#[test]
fn temporary_values_reset_to_the_kind_default() {
    let mut entry = person_entry(0, "Ada");
    let id = entry.property_index("id").unwrap();
    entry.write_value(id, Value::Int(41)).unwrap();
    entry.mark_temporary(id);

    assert!(entry.is_temporary(id));
    entry.reset_temporary_values().unwrap();

    assert!(!entry.is_temporary(id));
    assert_eq!(entry.get_value(id).unwrap(), Value::Int(0));
}

#[test]
fn explicit_writes_clear_the_temporary_mark() {
    let mut entry = person_entry(0, "Ada");
    let id = entry.property_index("id").unwrap();
    entry.write_value(id, Value::Int(41)).unwrap();
    entry.mark_temporary(id);

    entry.set_value(id, Value::Int(99)).unwrap();

    assert!(!entry.is_temporary(id));
}

#[test]
fn restore_puts_back_bits_and_values() {
    let mut entry = person_entry(0, "Ada");
    let id = entry.property_index("id").unwrap();
    let saved = entry.bits().clone();

    entry.write_value(id, Value::Int(5)).unwrap();
    entry.mark_temporary(id);
    entry.bits_mut().set_entity_state(EntityState::Added);
    entry.restore(saved, vec![(id, Value::Int(0))]);

    assert_eq!(entry.state(), EntityState::Detached);
    assert_eq!(entry.get_value(id).unwrap(), Value::Int(0));
    assert!(!entry.is_temporary(id));
}
