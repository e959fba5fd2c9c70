//! Integration tests for schema migrations

use memorealm::{DataType, DbError, MigrationErrorKind, ObjectSchema, Property, Realm, RealmConfig, SchemaSet, Value};
use memorealm::storage::RowStore;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn dog_v1() -> ObjectSchema {
    ObjectSchema::new("Dog")
        .property(Property::new("id", DataType::Integer).required())
        .property(Property::new("name", DataType::Text))
}

fn dog_v2() -> ObjectSchema {
    ObjectSchema::new("Dog")
        .property(Property::new("id", DataType::Integer).required().primary_key())
        .property(Property::new("name", DataType::Text))
}

fn person_v1() -> ObjectSchema {
    ObjectSchema::new("Person")
        .property(Property::new("id", DataType::Integer).required().primary_key())
        .property(Property::new("name", DataType::Text))
        .property(Property::new("years", DataType::Integer).required())
        .property(Property::object("dog", "Dog"))
}

fn person_v2() -> ObjectSchema {
    ObjectSchema::new("Person")
        .property(Property::new("id", DataType::Integer).required().primary_key())
        .property(Property::new("full_name", DataType::Text).required())
        .property(Property::new("age", DataType::Integer).required().indexed())
        .property(Property::object("dog", "Dog"))
        .property(Property::new("email", DataType::Text))
}

fn tag() -> ObjectSchema {
    ObjectSchema::new("Tag").property(Property::new("label", DataType::Text).required())
}

fn v1(path: &Path) -> RealmConfig {
    let schema = SchemaSet::new(vec![dog_v1(), person_v1()]).unwrap();
    RealmConfig::new(schema).path(path).schema_version(1)
}

fn v2(path: &Path) -> RealmConfig {
    let schema = SchemaSet::new(vec![dog_v2(), person_v2(), tag()]).unwrap();
    RealmConfig::new(schema).path(path).schema_version(2)
}

fn seed(path: &Path) {
    let mut realm = Realm::open(v1(path)).unwrap();
    realm
        .write(|realm| {
            let dog = realm.create_object("Dog")?;
            dog.set(realm, "id", 7)?;
            dog.set(realm, "name", "Rex")?;
            let ann = realm.create_object_with_primary_key("Person", 1)?;
            ann.set(realm, "name", "Ann")?;
            ann.set(realm, "years", 30)?;
            ann.set_link(realm, "dog", Some(&dog.to_ref()))?;
            let anon = realm.create_object_with_primary_key("Person", 2)?;
            anon.set(realm, "years", 5)?;
            Ok(())
        })
        .unwrap();
    realm.close().unwrap();
}

#[test]
fn test_migration_callback_on_version_bump() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("migrate.realm");
    seed(&path);

    let config = v2(&path).migration(|editor, from, to| {
        if (from, to) != (1, 2) {
            return Err(DbError::ExecutionError(format!("unexpected versions {from} -> {to}")));
        }
        editor.rename_property("Person", "name", "full_name")?;
        editor.set_required("Person", "full_name", true)?;
        editor.rename_property("Person", "years", "age")?;
        editor.add_index("Person", "age")?;
        editor.add_property("Person", Property::new("email", DataType::Text))?;
        for row in editor.rows("Person")? {
            if let Value::Text(name) = editor.get_value("Person", row, "full_name")? {
                editor.set_value("Person", row, "email", format!("{name}@example.com"))?;
            }
        }
        editor.set_primary_key("Dog", Some("id"))?;
        Ok(())
    });
    let realm = Realm::open(config).unwrap();

    assert_eq!(realm.schema_version(), 2);
    assert_eq!(realm.count("Tag").unwrap(), 0);

    let ann = realm.find_by_primary_key("Person", 1).unwrap().unwrap();
    assert_eq!(ann.get_string(&realm, "full_name").unwrap().as_deref(), Some("Ann"));
    assert_eq!(ann.get_i64(&realm, "age").unwrap(), Some(30));
    assert_eq!(ann.get_string(&realm, "email").unwrap().as_deref(), Some("Ann@example.com"));
    let dog = ann.get_link(&realm, "dog").unwrap().unwrap();
    assert_eq!(realm.find_by_primary_key("Dog", 7).unwrap(), Some(dog));

    // Nulls become the type default once a field is required.
    let anon = realm.find_by_primary_key("Person", 2).unwrap().unwrap();
    assert_eq!(anon.get_string(&realm, "full_name").unwrap().as_deref(), Some(""));
}

#[test]
fn test_version_bump_without_migration_fails_validation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("migrate.realm");
    seed(&path);

    let err = Realm::open(v2(&path)).unwrap_err();
    match err {
        DbError::Migration(e) => {
            assert_eq!(e.class_name, "Dog");
            assert_eq!(e.kind, MigrationErrorKind::PrimaryKeyMismatch);
        }
        other => panic!("expected a migration error, got {other:?}"),
    }
}

#[test]
fn test_failed_migration_leaves_data_untouched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("migrate.realm");
    seed(&path);

    let config = v2(&path).migration(|editor, _, _| {
        editor.rename_property("Person", "name", "full_name")?;
        editor.remove_class("Dog")
    });
    let err = Realm::open(config).unwrap_err();
    assert!(matches!(err, DbError::ExecutionError(ref m) if m.contains("still referenced")));

    let realm = Realm::open(v1(&path)).unwrap();
    assert_eq!(realm.schema_version(), 1);
    let ann = realm.find_by_primary_key("Person", 1).unwrap().unwrap();
    assert_eq!(ann.get_string(&realm, "name").unwrap().as_deref(), Some("Ann"));
}

#[test]
fn test_duplicate_values_block_new_primary_key() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("migrate.realm");
    seed(&path);

    let mut realm = Realm::open(v1(&path)).unwrap();
    realm
        .write(|realm| {
            let dog = realm.create_object("Dog")?;
            dog.set(realm, "id", 7)
        })
        .unwrap();
    realm.close().unwrap();

    let config = v2(&path).migration(|editor, _, _| editor.set_primary_key("Dog", Some("id")));
    let err = Realm::open(config).unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey { .. }));
}

#[test]
fn test_migrate_open_realm() {
    let schema = SchemaSet::new(vec![dog_v2(), person_v1()]).unwrap();
    let mut realm = Realm::open(RealmConfig::new(schema).schema_version(1)).unwrap();
    realm.write(|realm| realm.create_object_with_primary_key("Dog", 1).map(|_| ())).unwrap();
    let person_before = realm.descriptor("Person").unwrap();
    let generation = realm.schema_generation();

    let dog = ObjectSchema::new("Dog")
        .property(Property::new("id", DataType::Integer).required().primary_key())
        .property(Property::new("name", DataType::Text))
        .property(Property::new("weight", DataType::Double).required());
    let next = SchemaSet::new(vec![dog, person_v1(), tag()]).unwrap();
    realm
        .migrate(next, 2, |editor, _, _| {
            editor.add_property("Dog", Property::new("weight", DataType::Double).required())?;
            for row in editor.rows("Dog")? {
                editor.set_value("Dog", row, "weight", 12.5)?;
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(realm.schema_version(), 2);
    assert_eq!(realm.schema_generation(), generation + 1);
    assert!(Arc::ptr_eq(&person_before, &realm.descriptor("Person").unwrap()));
    assert_eq!(realm.descriptor("Dog").unwrap().generation(), generation + 1);
    assert!(realm.schema().contains("Tag"));

    let dog = realm.find_by_primary_key("Dog", 1).unwrap().unwrap();
    assert_eq!(dog.get(&realm, "weight").unwrap(), Value::Double(12.5));
}

#[test]
fn test_migrate_open_realm_rolls_back_on_mismatch() {
    let schema = SchemaSet::new(vec![dog_v2()]).unwrap();
    let mut realm = Realm::open(RealmConfig::new(schema.clone())).unwrap();
    let generation = realm.schema_generation();

    let dog = ObjectSchema::new("Dog")
        .property(Property::new("id", DataType::Integer).required().primary_key())
        .property(Property::new("name", DataType::Text))
        .property(Property::new("weight", DataType::Double).required());
    let next = SchemaSet::new(vec![dog]).unwrap();
    // The callback adds the column with the wrong nullability.
    let err = realm
        .migrate(next, 1, |editor, _, _| {
            editor.add_property("Dog", Property::new("weight", DataType::Double))
        })
        .unwrap_err();
    assert!(matches!(err, DbError::Migration(ref e) if e.field.as_deref() == Some("weight")));

    assert_eq!(realm.schema_generation(), generation);
    assert_eq!(realm.schema(), &schema);
    assert!(!realm.is_in_transaction());
    assert_eq!(realm.store().column_count("class_Dog").ok(), Some(2));
    realm.write(|realm| realm.create_object_with_primary_key("Dog", 1).map(|_| ())).unwrap();
}

#[test]
fn test_editor_rejects_unknown_targets() {
    let schema = SchemaSet::new(vec![dog_v2()]).unwrap();
    let mut realm = Realm::open(RealmConfig::new(schema)).unwrap();

    let err = realm
        .migrate(SchemaSet::new(vec![dog_v2()]).unwrap(), 1, |editor, _, _| {
            editor.rename_property("Cat", "a", "b")
        })
        .unwrap_err();
    assert!(matches!(err, DbError::ClassNotFound(ref c) if c == "Cat"));

    let err = realm
        .migrate(SchemaSet::new(vec![dog_v2()]).unwrap(), 1, |editor, _, _| {
            editor.add_class(dog_v1())
        })
        .unwrap_err();
    assert!(matches!(err, DbError::TableExists(_)));
}
