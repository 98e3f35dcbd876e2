use super::{EntityShape, Model, ModelError, PropertyModel, StorageLayout};
use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    test_support::{ORDER, ORDER_LINE, PERSON, TAG, fixture_model, order_shape, person_shape},
    value::ValueKind,
};

#[test]
fn shape_assigns_dense_shadow_and_original_indices_in_declaration_order() {
    let shape = order_shape();

    let names: Vec<_> = shape.properties().iter().map(PropertyModel::name).collect();
    assert_eq!(names, ["id", "person_id", "total", "revision", "note"]);
    for (i, property) in shape.properties().iter().enumerate() {
        assert_eq!(property.index(), i);
    }

    let note = shape.find_property("note").expect("note");
    assert_eq!(note.shadow_index(), Some(0));
    assert_eq!(shape.shadow_property_count(), 1);

    // Key properties have no original-value slot.
    let id = shape.find_property("id").expect("id");
    assert!(id.is_key());
    assert_eq!(id.original_value_index(), None);
    assert_eq!(
        shape.find_property("person_id").and_then(PropertyModel::original_value_index),
        Some(0)
    );
    assert_eq!(shape.original_value_count(), 4);
}

#[test]
fn storage_layout_follows_native_and_shadow_split() {
    let model = fixture_model();

    assert_eq!(model.shape(PERSON).unwrap().storage_layout(), StorageLayout::NativeOnly);
    assert_eq!(model.shape(ORDER).unwrap().storage_layout(), StorageLayout::Mixed);
    assert_eq!(model.shape(TAG).unwrap().storage_layout(), StorageLayout::ShadowOnly);
}

#[test]
fn without_original_value_skips_the_snapshot_slot() {
    let shape = EntityShape::builder("Audit")
        .property(PropertyModel::native("id", ValueKind::Int))
        .property(PropertyModel::native("touched", ValueKind::Int).without_original_value())
        .property(PropertyModel::native("label", ValueKind::Text))
        .primary_key(&["id"])
        .build()
        .unwrap();

    assert_eq!(shape.original_value_count(), 1);
    assert_eq!(shape.find_property("label").unwrap().original_value_index(), Some(0));
    assert_eq!(shape.find_property("touched").unwrap().original_value_index(), None);
}

#[test]
fn shape_rejects_duplicate_properties() {
    let err = EntityShape::builder("Dup")
        .property(PropertyModel::native("id", ValueKind::Int))
        .property(PropertyModel::native("id", ValueKind::Int))
        .primary_key(&["id"])
        .build()
        .unwrap_err();

    assert_eq!(
        err,
        ModelError::DuplicateProperty {
            entity: "Dup",
            property: "id"
        }
    );
}

#[test]
fn shape_requires_a_primary_key() {
    let err = EntityShape::builder("NoKey")
        .property(PropertyModel::native("id", ValueKind::Int))
        .build()
        .unwrap_err();

    assert_eq!(err, ModelError::MissingPrimaryKey { entity: "NoKey" });
}

#[test]
fn shadow_type_rejects_native_properties() {
    let err = EntityShape::shadow_builder("Join")
        .property(PropertyModel::native("id", ValueKind::Int))
        .primary_key(&["id"])
        .build()
        .unwrap_err();

    assert!(matches!(err, ModelError::NativePropertyOnShadowType { .. }));
}

#[test]
fn model_rejects_foreign_key_to_unknown_principal() {
    let err = Model::builder().entity(order_shape()).build().unwrap_err();

    assert_eq!(
        err,
        ModelError::UnknownPrincipal {
            entity: ORDER,
            foreign_key: "customer",
            principal: PERSON,
        }
    );
}

#[test]
fn model_rejects_foreign_key_arity_mismatch() {
    let bad = EntityShape::builder("Review")
        .property(PropertyModel::native("id", ValueKind::Int))
        .property(PropertyModel::native("a", ValueKind::Int))
        .property(PropertyModel::native("b", ValueKind::Int))
        .primary_key(&["id"])
        .foreign_key("author", &["a", "b"], PERSON)
        .build()
        .unwrap();

    let err = Model::builder()
        .entity(person_shape())
        .entity(bad)
        .build()
        .unwrap_err();

    assert!(matches!(
        err,
        ModelError::ForeignKeyArity {
            expected: 1,
            found: 2,
            ..
        }
    ));
}

#[test]
fn model_shares_simple_key_factories_by_kind() {
    let model = fixture_model();

    // Person, Order, Account, and Ticket keys are Int; Tag is Text; OrderLine is composite.
    assert_eq!(model.key_factories().cached_kinds(), 2);
    assert!(model.entity_type(ORDER_LINE).is_ok());
}

#[test]
fn unknown_entity_type_is_not_found() {
    let err = fixture_model().entity_type("Ghost").unwrap_err();

    assert_eq!(err.class, ErrorClass::NotFound);
    assert_eq!(err.origin, ErrorOrigin::Model);
}

#[test]
fn model_error_converts_to_invariant_violation() {
    let err: InternalError = ModelError::EmptyName.into();

    assert_eq!(err.class, ErrorClass::InvariantViolation);
    assert_eq!(err.origin, ErrorOrigin::Model);
}
