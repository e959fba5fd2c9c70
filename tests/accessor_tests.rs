//! Integration tests for managed object accessors

mod common;

use memorealm::object::ObjectGraph;
use memorealm::{ConstructionPolicy, DbError, DetachedObject, ManagedObject, ObjectRef, Realm, SourceSet, Value};

#[test]
fn test_scalar_round_trip() {
    let mut realm = common::open();
    let birthday = Value::date_from_millis(-86_400_000).unwrap();

    realm.begin_write().unwrap();
    let person = realm.create_object_with_primary_key("Person", 1).unwrap();
    person.set(&mut realm, "name", "Ann").unwrap();
    person.set(&mut realm, "age", 30).unwrap();
    person.set(&mut realm, "score", 1.5f64).unwrap();
    person.set(&mut realm, "weight", 62.5f32).unwrap();
    person.set(&mut realm, "active", true).unwrap();
    person.set(&mut realm, "birthday", birthday.clone()).unwrap();
    person.set(&mut realm, "avatar", vec![1u8, 2, 3]).unwrap();
    realm.commit_write().unwrap();

    assert_eq!(person.get_i64(&realm, "id").unwrap(), Some(1));
    assert_eq!(person.get_string(&realm, "name").unwrap().as_deref(), Some("Ann"));
    assert_eq!(person.get_i32(&realm, "age").unwrap(), Some(30));
    assert_eq!(person.get_f64(&realm, "score").unwrap(), Some(1.5));
    assert_eq!(person.get_f32(&realm, "weight").unwrap(), Some(62.5));
    assert_eq!(person.get_bool(&realm, "active").unwrap(), Some(true));
    assert_eq!(person.get_date(&realm, "birthday").unwrap(), birthday.as_date());
    assert_eq!(person.get_binary(&realm, "avatar").unwrap(), Some(vec![1, 2, 3]));
}

#[test]
fn test_fresh_table_scenario() {
    let mut realm = common::open();

    realm.begin_write().unwrap();
    let person = realm.create_object_with_primary_key("Person", 7).unwrap();
    person.set(&mut realm, "age", 30).unwrap();
    person.set(&mut realm, "nickname", "Al").unwrap();
    person.set(&mut realm, "nickname", Value::Null).unwrap();
    realm.commit_write().unwrap();

    assert_eq!(person.get_i32(&realm, "age").unwrap(), Some(30));
    assert_eq!(person.get(&realm, "nickname").unwrap(), Value::Null);
    assert_eq!(person.get_string(&realm, "nickname").unwrap(), None);
}

#[test]
fn test_required_field_rejects_null() {
    let mut realm = common::open();
    realm.begin_write().unwrap();
    let person = realm.create_object_with_primary_key("Person", 1).unwrap();

    let err = person.set(&mut realm, "name", Value::Null).unwrap_err();
    assert!(matches!(err, DbError::NonNullableViolation { ref field } if field == "name"));
    assert_eq!(person.get_string(&realm, "name").unwrap().as_deref(), Some(""));
}

#[test]
fn test_primary_key_is_immutable() {
    let mut realm = common::open();
    realm.begin_write().unwrap();
    let person = realm.create_object_with_primary_key("Person", 1).unwrap();

    let same = person.set(&mut realm, "id", 1).unwrap_err();
    assert!(matches!(same, DbError::ImmutableKey { .. }));
    let other = person.set(&mut realm, "id", 2).unwrap_err();
    assert!(matches!(other, DbError::ImmutableKey { .. }));
}

#[test]
fn test_under_construction_ignores_primary_key_writes() {
    let mut realm = common::open();
    realm.begin_write().unwrap();
    let person = realm
        .create_object_with(
            "Person",
            Some(Value::Integer(2)),
            ConstructionPolicy::accepting_defaults(),
            |realm, object| {
                object.set(realm, "id", 99)?;
                object.set(realm, "name", "Bo")
            },
        )
        .unwrap();

    assert!(person.phase().is_live());
    assert_eq!(person.get_i64(&realm, "id").unwrap(), Some(2));
    assert_eq!(person.get_string(&realm, "name").unwrap().as_deref(), Some("Bo"));
}

#[test]
fn test_construction_policy() {
    let mut realm = common::open();
    realm.begin_write().unwrap();

    // Without accepting defaults, a null on a required field is skipped.
    let skipped = realm
        .create_object_with("Person", Some(Value::Integer(1)), ConstructionPolicy::default(), |realm, object| {
            object.set(realm, "name", Value::Null)
        })
        .unwrap();
    assert_eq!(skipped.get_string(&realm, "name").unwrap().as_deref(), Some(""));

    // Accepting defaults, it fails.
    let err = realm
        .create_object_with(
            "Person",
            Some(Value::Integer(2)),
            ConstructionPolicy::accepting_defaults(),
            |realm, object| object.set(realm, "name", Value::Null),
        )
        .unwrap_err();
    assert!(matches!(err, DbError::NonNullableViolation { .. }));

    // Excluded fields are left alone.
    let excluded = realm
        .create_object_with(
            "Person",
            Some(Value::Integer(3)),
            ConstructionPolicy::accepting_defaults().excluding(["nickname"]),
            |realm, object| {
                object.set(realm, "nickname", "ignored")?;
                object.set(realm, "name", "Cy")
            },
        )
        .unwrap();
    assert_eq!(excluded.get(&realm, "nickname").unwrap(), Value::Null);
    assert_eq!(excluded.get_string(&realm, "name").unwrap().as_deref(), Some("Cy"));
}

#[test]
fn test_declared_defaults_applied_on_create() {
    let mut realm = common::open();
    realm.begin_write().unwrap();

    let note = realm.create_object("Note").unwrap();
    assert_eq!(note.get_string(&realm, "text").unwrap().as_deref(), Some("untitled"));
    assert_eq!(note.get_i64(&realm, "priority").unwrap(), Some(3));

    let bare = realm
        .create_object_with(
            "Note",
            None,
            ConstructionPolicy::accepting_defaults().excluding(["text"]),
            |_, _| Ok(()),
        )
        .unwrap();
    assert_eq!(bare.get_string(&realm, "text").unwrap().as_deref(), Some(""));
    assert_eq!(bare.get_i64(&realm, "priority").unwrap(), Some(3));
}

#[test]
fn test_create_requires_matching_primary_key() {
    let mut realm = common::open();
    realm.begin_write().unwrap();
    assert!(realm.create_object("Person").is_err());
    assert!(realm.create_object_with_primary_key("Note", 1).is_err());

    realm.create_object_with_primary_key("Dog", 1).unwrap();
    let err = realm.create_object_with_primary_key("Dog", 1).unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey { .. }));
}

#[test]
fn test_typed_getters_check_range() {
    let mut realm = common::open();
    realm.begin_write().unwrap();
    let person = realm.create_object_with_primary_key("Person", 1).unwrap();
    person.set(&mut realm, "age", 300).unwrap();

    assert!(matches!(person.get_i8(&realm, "age"), Err(DbError::TypeMismatch(_))));
    assert_eq!(person.get_i16(&realm, "age").unwrap(), Some(300));
    assert!(person.set(&mut realm, "age", "three hundred").is_err());
    assert!(person.get_string(&realm, "age").is_err());
}

#[test]
fn test_writes_need_transaction() {
    let mut realm = common::open();
    let person = realm
        .write(|realm| realm.create_object_with_primary_key("Person", 1))
        .unwrap();

    let err = person.set(&mut realm, "name", "Ann").unwrap_err();
    assert!(matches!(err, DbError::Transaction(_)));
}

#[test]
fn test_cancel_discards_writes() {
    let mut realm = common::open();
    realm.begin_write().unwrap();
    let person = realm.create_object_with_primary_key("Person", 1).unwrap();
    person.set(&mut realm, "name", "Ann").unwrap();
    realm.cancel_write().unwrap();

    assert_eq!(realm.count("Person").unwrap(), 0);
    assert!(!person.is_valid(&realm));
}

#[test]
fn test_deleted_object_is_stale() {
    let mut realm = common::open();
    realm.begin_write().unwrap();
    let dog = realm.create_object_with_primary_key("Dog", 1).unwrap();
    let person = realm.create_object_with_primary_key("Person", 1).unwrap();
    person.set_link(&mut realm, "dog", Some(&dog.to_ref())).unwrap();

    realm.delete_object(dog.clone()).unwrap();
    assert!(matches!(dog.get(&realm, "name"), Err(DbError::StaleObject(_))));
    assert!(person.get_link(&realm, "dog").unwrap().is_none());
}

#[test]
fn test_closed_realm_invalidates_objects() {
    let mut realm = common::open();
    let person = realm
        .write(|realm| realm.create_object_with_primary_key("Person", 1))
        .unwrap();
    realm.close().unwrap();

    assert!(matches!(person.get(&realm, "name"), Err(DbError::StaleObject(_))));
}

#[test]
fn test_live_links_must_be_managed_here() {
    let mut realm = common::open();
    let mut other = common::open();
    let foreign = other
        .write(|realm| realm.create_object_with_primary_key("Dog", 1))
        .unwrap();

    realm.begin_write().unwrap();
    let person = realm.create_object_with_primary_key("Person", 1).unwrap();
    let err = person.set_link(&mut realm, "dog", Some(&foreign.to_ref())).unwrap_err();
    assert!(matches!(err, DbError::CrossDatabaseReference(_)));

    let mut graph = ObjectGraph::new();
    let unmanaged = graph.add(DetachedObject::new("Dog").with("id", 2).with("name", "Rex"));
    let err = person
        .set_link_from(&mut realm, "dog", Some(&unmanaged.into()), SourceSet::graph(&graph))
        .unwrap_err();
    assert!(matches!(err, DbError::CrossDatabaseReference(_)));

    person.set_link(&mut realm, "best_friend", Some(&person.to_ref())).unwrap();
    let err = person.set_link(&mut realm, "dog", Some(&person.to_ref())).unwrap_err();
    assert!(matches!(err, DbError::TypeMismatch(_)));
}

#[test]
fn test_construction_copies_unmanaged_links() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let dog = graph.add(DetachedObject::new("Dog").with("id", 5).with("name", "Rex"));

    realm.begin_write().unwrap();
    let person = realm
        .create_object_with(
            "Person",
            Some(Value::Integer(1)),
            ConstructionPolicy::accepting_defaults(),
            |realm, object| object.set_link_from(realm, "dog", Some(&ObjectRef::from(dog)), SourceSet::graph(&graph)),
        )
        .unwrap();

    let linked = person.get_link(&realm, "dog").unwrap().unwrap();
    assert_eq!(linked.get_string(&realm, "name").unwrap().as_deref(), Some("Rex"));
    assert_eq!(realm.find_by_primary_key("Dog", 5).unwrap(), Some(linked));
}

#[test]
fn test_object_identity() {
    let mut realm = common::open();
    let person = realm
        .write(|realm| realm.create_object_with_primary_key("Person", 1))
        .unwrap();

    let found = realm.find_by_primary_key("Person", 1).unwrap().unwrap();
    assert_eq!(found, person);
    assert_eq!(realm.all_objects("Person").unwrap(), vec![person]);
    assert!(realm.find_by_primary_key("Person", 2).unwrap().is_none());
}

#[test]
fn test_lists_and_embedded_objects() {
    let mut realm = common::open();
    realm.begin_write().unwrap();
    let ann = realm.create_object_with_primary_key("Person", 1).unwrap();
    let bo = realm.create_object_with_primary_key("Person", 2).unwrap();
    let cy = realm.create_object_with_primary_key("Person", 3).unwrap();

    ann.set_list(&mut realm, "friends", &[bo.to_ref(), cy.to_ref()]).unwrap();
    ann.set_values(&mut realm, "tags", vec![Value::from("a"), Value::from("b")]).unwrap();

    let home = realm.create_embedded_object(&ann, "home").unwrap();
    home.set(&mut realm, "street", "Main St").unwrap();
    let replaced = realm.create_embedded_object(&ann, "home").unwrap();
    replaced.set(&mut realm, "street", "Side St").unwrap();
    realm.commit_write().unwrap();

    assert_eq!(ann.get_list(&realm, "friends").unwrap(), vec![bo, cy]);
    assert_eq!(ann.get_values(&realm, "tags").unwrap(), vec![Value::from("a"), Value::from("b")]);
    assert_eq!(realm.count("Address").unwrap(), 1);
    let current = ann.get_link(&realm, "home").unwrap().unwrap();
    assert_eq!(current.get_string(&realm, "street").unwrap().as_deref(), Some("Side St"));
    assert!(!home.is_valid(&realm));

    realm.begin_write().unwrap();
    assert!(realm.create_object("Address").is_err());
    realm.delete_object(ann).unwrap();
    realm.commit_write().unwrap();
    assert_eq!(realm.count("Address").unwrap(), 0);
}

fn streets(realm: &Realm, person: &ManagedObject) -> Vec<String> {
    person
        .get_list(realm, "previous")
        .unwrap()
        .iter()
        .map(|a| a.get_string(realm, "street").unwrap().unwrap())
        .collect()
}

#[test]
fn test_assign_detached_embedded_to_live_object() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let home = graph.add(DetachedObject::new("Address").with("street", "Main St").with("city", "Oslo"));
    let first = graph.add(DetachedObject::new("Address").with("street", "a"));
    let second = graph.add(DetachedObject::new("Address").with("street", "b"));

    realm.begin_write().unwrap();
    let ann = realm.create_object_with_primary_key("Person", 1).unwrap();
    ann.set_link_from(&mut realm, "home", Some(&home.into()), SourceSet::graph(&graph))
        .unwrap();
    ann.set_list_from(&mut realm, "previous", &[first.into(), second.into()], SourceSet::graph(&graph))
        .unwrap();
    realm.commit_write().unwrap();

    let home = ann.get_link(&realm, "home").unwrap().unwrap();
    assert_eq!(home.get_string(&realm, "street").unwrap().as_deref(), Some("Main St"));
    assert_eq!(home.get_string(&realm, "city").unwrap().as_deref(), Some("Oslo"));
    assert_eq!(streets(&realm, &ann), vec!["a", "b"]);
    assert_eq!(realm.count("Address").unwrap(), 3);

    // Clearing the slot deletes the child.
    realm.write(|realm| ann.set_link(realm, "home", None)).unwrap();
    assert!(!home.is_valid(&realm));
    assert_eq!(realm.count("Address").unwrap(), 2);
}

#[test]
fn test_self_assign_embedded_link() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let home = graph.add(DetachedObject::new("Address").with("street", "Main St").with("city", "Oslo"));
    let root = graph.add(DetachedObject::new("Person").with("id", 1).with_link("home", Some(home.into())));
    let ann = realm.write(|realm| realm.copy_to_realm(&graph, root)).unwrap();
    let before = ann.get_link(&realm, "home").unwrap().unwrap();

    realm
        .write(|realm| ann.set_link(realm, "home", Some(&before.to_ref())))
        .unwrap();

    let after = ann.get_link(&realm, "home").unwrap().unwrap();
    assert_eq!(after.get_string(&realm, "street").unwrap().as_deref(), Some("Main St"));
    assert_eq!(after.get_string(&realm, "city").unwrap().as_deref(), Some("Oslo"));
    assert_eq!(realm.count("Address").unwrap(), 1);
}

#[test]
fn test_self_assign_embedded_list() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let a = graph.add(DetachedObject::new("Address").with("street", "a"));
    let b = graph.add(DetachedObject::new("Address").with("street", "b"));
    let root = graph.add(DetachedObject::new("Person").with("id", 1).with_list("previous", vec![a.into(), b.into()]));
    let ann = realm.write(|realm| realm.copy_to_realm(&graph, root)).unwrap();

    let current: Vec<ObjectRef> = ann
        .get_list(&realm, "previous")
        .unwrap()
        .iter()
        .map(|child| child.to_ref())
        .collect();
    realm.write(|realm| ann.set_list(realm, "previous", &current)).unwrap();

    assert_eq!(streets(&realm, &ann), vec!["a", "b"]);
    assert_eq!(realm.count("Address").unwrap(), 2);
}

#[test]
fn test_cancel_restores_replaced_embedded_child() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let home = graph.add(DetachedObject::new("Address").with("street", "Main St"));
    let root = graph.add(DetachedObject::new("Person").with("id", 1).with_link("home", Some(home.into())));
    let ann = realm.write(|realm| realm.copy_to_realm(&graph, root)).unwrap();
    let old = ann.get_link(&realm, "home").unwrap().unwrap();

    let mut replacement = ObjectGraph::new();
    let side = replacement.add(DetachedObject::new("Address").with("street", "Side St"));
    realm.begin_write().unwrap();
    ann.set_link_from(&mut realm, "home", Some(&side.into()), SourceSet::graph(&replacement))
        .unwrap();
    assert!(!old.is_valid(&realm));
    realm.cancel_write().unwrap();

    assert!(old.is_valid(&realm));
    assert_eq!(old.get_string(&realm, "street").unwrap().as_deref(), Some("Main St"));
    assert_eq!(ann.get_link(&realm, "home").unwrap(), Some(old));
    assert_eq!(realm.count("Address").unwrap(), 1);
}
