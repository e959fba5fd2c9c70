//! Integration tests for bulk insert and insert-or-update

mod common;

use memorealm::bulk;
use memorealm::copy::CopyCache;
use memorealm::{DbError, DetachedObject, ObjectGraph, ObjectRef, SourceSet, Value};

fn person(id: i64, name: &str) -> DetachedObject {
    DetachedObject::new("Person")
        .with("id", id)
        .with("name", name)
        .with("age", 40)
}

#[test]
fn test_insert_shares_referenced_objects() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let rex = graph.add(DetachedObject::new("Dog").with("id", 1).with("name", "Rex"));
    let roots: Vec<_> = (1..=3)
        .map(|id| graph.add(person(id, "P").with_link("dog", Some(rex.into()))))
        .collect();

    realm.begin_write().unwrap();
    let targets = realm.insert(&graph, &roots).unwrap();
    realm.commit_write().unwrap();

    assert_eq!(targets.len(), 3);
    assert_eq!(realm.count("Person").unwrap(), 3);
    assert_eq!(realm.count("Dog").unwrap(), 1);
    let dog = realm.find_by_primary_key("Dog", 1).unwrap();
    for target in targets {
        let person = realm.object(&target.class_name, target.row).unwrap();
        assert_eq!(person.get_link(&realm, "dog").unwrap(), dog);
    }
}

#[test]
fn test_insert_rejects_existing_key() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let a = graph.add(person(1, "A"));
    realm.write(|realm| realm.insert(&graph, &[a])).unwrap();

    realm.begin_write().unwrap();
    let err = realm.insert(&graph, &[a]).unwrap_err();
    assert!(matches!(err, DbError::DuplicateKey { .. }));
}

#[test]
fn test_insert_skips_absent_values() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let a = graph.add(
        DetachedObject::new("Person")
            .with("id", 1)
            .with("name", Value::Null)
            .with("nickname", Value::Null),
    );

    realm.begin_write().unwrap();
    realm.insert(&graph, &[a]).unwrap();
    realm.commit_write().unwrap();

    let person = realm.find_by_primary_key("Person", 1).unwrap().unwrap();
    assert_eq!(person.get_string(&realm, "name").unwrap().as_deref(), Some(""));
    assert_eq!(person.get(&realm, "nickname").unwrap(), Value::Null);
    assert_eq!(person.get_i64(&realm, "age").unwrap(), Some(0));
}

#[test]
fn test_upsert_clears_stale_values() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let rex = graph.add(DetachedObject::new("Dog").with("id", 1).with("name", "Rex"));
    let b = graph.add(person(2, "B"));
    let a = graph.add(
        person(1, "A")
            .with("nickname", "Al")
            .with_link("dog", Some(rex.into()))
            .with_list("friends", vec![b.into()])
            .with_values("tags", vec![Value::from("t")]),
    );
    realm.write(|realm| realm.insert(&graph, &[a])).unwrap();

    let mut update = ObjectGraph::new();
    let a = update.add(person(1, "Alan"));
    realm.begin_write().unwrap();
    let targets = realm.insert_or_update(&update, &[a]).unwrap();
    realm.commit_write().unwrap();

    let person = realm.object("Person", targets[0].row).unwrap();
    assert_eq!(realm.count("Person").unwrap(), 2);
    assert_eq!(person.get_string(&realm, "name").unwrap().as_deref(), Some("Alan"));
    assert_eq!(person.get(&realm, "nickname").unwrap(), Value::Null);
    assert!(person.get_link(&realm, "dog").unwrap().is_none());
    assert!(person.get_list(&realm, "friends").unwrap().is_empty());
    assert!(person.get_values(&realm, "tags").unwrap().is_empty());
}

#[test]
fn test_upsert_rejects_null_required_value() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let a = graph.add(person(1, "A").with("score", Value::Null));

    realm.begin_write().unwrap();
    let err = realm.insert_or_update(&graph, &[a]).unwrap_err();
    assert!(matches!(err, DbError::NonNullableViolation { ref field } if field == "score"));
}

#[test]
fn test_managed_objects_are_linked_not_copied() {
    let mut realm = common::open();
    realm.begin_write().unwrap();
    let dog = realm.create_object_with_primary_key("Dog", 9).unwrap();

    let mut graph = ObjectGraph::new();
    let a = graph.add(person(1, "A").with_link("dog", Some(dog.to_ref())));
    realm.insert(&graph, &[a]).unwrap();
    realm.commit_write().unwrap();

    assert_eq!(realm.count("Dog").unwrap(), 1);
    let person = realm.find_by_primary_key("Person", 1).unwrap().unwrap();
    assert_eq!(person.get_link(&realm, "dog").unwrap(), Some(dog));
}

#[test]
fn test_embedded_objects_in_bulk() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let home = graph.add(DetachedObject::new("Address").with("street", "Main St"));
    let old = graph.add(DetachedObject::new("Address").with("street", "Old Rd"));
    let a = graph.add(
        person(1, "A")
            .with_link("home", Some(home.into()))
            .with_list("previous", vec![old.into()]),
    );
    realm.write(|realm| realm.insert(&graph, &[a])).unwrap();
    assert_eq!(realm.count("Address").unwrap(), 2);

    let mut update = ObjectGraph::new();
    let first = update.add(DetachedObject::new("Address").with("street", "First"));
    let second = update.add(DetachedObject::new("Address").with("street", "Second"));
    let a = update.add(person(1, "A").with_list("previous", vec![first.into(), second.into()]));
    realm.write(|realm| realm.insert_or_update(&update, &[a])).unwrap();

    // The absent home is cleared, the list replaced.
    let person = realm.find_by_primary_key("Person", 1).unwrap().unwrap();
    assert!(person.get_link(&realm, "home").unwrap().is_none());
    let streets: Vec<String> = person
        .get_list(&realm, "previous")
        .unwrap()
        .iter()
        .map(|a| a.get_string(&realm, "street").unwrap().unwrap())
        .collect();
    assert_eq!(streets, vec!["First", "Second"]);
    assert_eq!(realm.count("Address").unwrap(), 2);
}

#[test]
fn test_embedded_duplicate_in_bulk_fails() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let home = graph.add(DetachedObject::new("Address").with("street", "Main St"));
    let a = graph.add(person(1, "A").with_link("home", Some(home.into())));
    let b = graph.add(person(2, "B").with_link("home", Some(home.into())));

    realm.begin_write().unwrap();
    let err = realm.insert(&graph, &[a, b]).unwrap_err();
    assert!(matches!(err, DbError::EmbeddedObjectAlreadyOwned));

    let err = realm.insert(&graph, &[home]).unwrap_err();
    assert!(matches!(err, DbError::ExecutionError(_)));
}

#[test]
fn test_shared_cache_across_batches() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let a = graph.add(person(1, "A"));
    let roots = [ObjectRef::from(a)];
    let mut cache = CopyCache::new();

    realm.begin_write().unwrap();
    let first = bulk::insert(&mut realm, SourceSet::graph(&graph), &roots, &mut cache).unwrap();
    let second = bulk::insert(&mut realm, SourceSet::graph(&graph), &roots, &mut cache).unwrap();
    let single = bulk::insert_one(&mut realm, SourceSet::graph(&graph), &roots[0], &mut cache).unwrap();
    realm.commit_write().unwrap();

    assert_eq!(first, second);
    assert_eq!(first[0], single);
    assert_eq!(realm.count("Person").unwrap(), 1);
}

#[test]
fn test_upsert_one_updates_in_place() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let a = graph.add(person(1, "A"));
    let mut update = ObjectGraph::new();
    let newer = update.add(person(1, "B"));

    realm.begin_write().unwrap();
    let inserted = bulk::insert_one(&mut realm, SourceSet::graph(&graph), &a.into(), &mut CopyCache::new()).unwrap();
    let updated =
        bulk::upsert_one(&mut realm, SourceSet::graph(&update), &newer.into(), &mut CopyCache::new()).unwrap();
    realm.commit_write().unwrap();

    assert_eq!(inserted, updated);
    let person = realm.object("Person", updated.row).unwrap();
    assert_eq!(person.get_string(&realm, "name").unwrap().as_deref(), Some("B"));
}

#[test]
fn test_bulk_needs_write_transaction() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let a = graph.add(person(1, "A"));
    assert!(matches!(realm.insert(&graph, &[a]), Err(DbError::Transaction(_))));
}
