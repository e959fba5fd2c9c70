//! Integration tests for JSON import and export

mod common;

use memorealm::json::{
    JsonError, class_to_json, create_from_json_stream, create_or_update_from_json, export_class, export_object, to_json,
};
use memorealm::{DbError, DetachedObject, FieldValue, ObjectGraph, Realm, RealmConfig, Value};
use serde_json::json;

#[test]
fn test_create_from_json_object() {
    let mut realm = common::open();
    let document = json!({
        "id": 1,
        "name": "Ann",
        "age": "41",
        "score": 7.5,
        "birthday": "/Date(86400000)/",
        "avatar": "AQID",
        "unknown_field": {"ignored": true},
        "dog": {"id": 10, "name": "Rex"},
        "friends": [
            {"id": 2, "name": "Bo"},
            {"id": 3, "name": "Cy"}
        ],
        "home": {"street": "Main St", "city": "Oslo"},
        "previous": [{"street": "Old Rd"}],
        "tags": ["a", "b"]
    });

    realm.begin_write().unwrap();
    let person = create_or_update_from_json(&mut realm, "Person", &document, false).unwrap();
    realm.commit_write().unwrap();

    assert_eq!(person.get_string(&realm, "name").unwrap().as_deref(), Some("Ann"));
    assert_eq!(person.get_i32(&realm, "age").unwrap(), Some(41));
    assert_eq!(person.get_f64(&realm, "score").unwrap(), Some(7.5));
    assert_eq!(
        person.get_date(&realm, "birthday").unwrap().map(|d| d.timestamp_millis()),
        Some(86_400_000)
    );
    assert_eq!(person.get_binary(&realm, "avatar").unwrap(), Some(vec![1, 2, 3]));

    let dog = person.get_link(&realm, "dog").unwrap().unwrap();
    assert_eq!(dog.get_string(&realm, "name").unwrap().as_deref(), Some("Rex"));
    assert_eq!(person.get_list(&realm, "friends").unwrap().len(), 2);
    assert_eq!(realm.count("Person").unwrap(), 3);

    let home = person.get_link(&realm, "home").unwrap().unwrap();
    assert_eq!(home.get_string(&realm, "city").unwrap().as_deref(), Some("Oslo"));
    assert_eq!(person.get_list(&realm, "previous").unwrap().len(), 1);
    assert_eq!(
        person.get_values(&realm, "tags").unwrap(),
        vec![Value::from("a"), Value::from("b")]
    );
}

#[test]
fn test_missing_primary_key() {
    let mut realm = common::open();
    realm.begin_write().unwrap();

    let err = create_or_update_from_json(&mut realm, "Person", &json!({"name": "Ann"}), false).unwrap_err();
    assert!(matches!(err.as_db_error(), Some(DbError::MissingPrimaryKey(_))));

    let err = create_from_json_stream(&mut realm, "Dog", r#"{"name": "Rex"}"#.as_bytes()).unwrap_err();
    assert!(matches!(err.as_db_error(), Some(DbError::MissingPrimaryKey(_))));
}

#[test]
fn test_update_existing_object() {
    let mut realm = common::open();
    realm.begin_write().unwrap();
    create_or_update_from_json(
        &mut realm,
        "Person",
        &json!({"id": 1, "name": "Ann", "nickname": "An", "age": 3}),
        false,
    )
    .unwrap();

    let err = create_or_update_from_json(&mut realm, "Person", &json!({"id": 1, "name": "Bo"}), false).unwrap_err();
    assert!(matches!(err.as_db_error(), Some(DbError::DuplicateKey { .. })));

    let person = create_or_update_from_json(
        &mut realm,
        "Person",
        &json!({"id": 1, "name": "Bo", "nickname": null}),
        true,
    )
    .unwrap();
    realm.commit_write().unwrap();

    assert_eq!(realm.count("Person").unwrap(), 1);
    assert_eq!(person.get_string(&realm, "name").unwrap().as_deref(), Some("Bo"));
    assert_eq!(person.get(&realm, "nickname").unwrap(), Value::Null);
    assert_eq!(person.get_i64(&realm, "age").unwrap(), Some(3));
}

#[test]
fn test_null_on_required_field() {
    let mut realm = common::open();
    realm.begin_write().unwrap();
    let err = create_or_update_from_json(&mut realm, "Person", &json!({"id": 1, "name": null}), false).unwrap_err();
    assert!(matches!(err.as_db_error(), Some(DbError::NonNullableViolation { .. })));
}

#[test]
fn test_invalid_documents() {
    let mut realm = common::open();
    realm.begin_write().unwrap();

    let err = create_or_update_from_json(&mut realm, "Person", &json!([1, 2]), false).unwrap_err();
    assert!(matches!(err, JsonError::InvalidStructure(_)));

    let err = create_or_update_from_json(&mut realm, "Person", &json!({"id": 1, "age": true}), false).unwrap_err();
    assert!(matches!(err, JsonError::TypeMismatch(_)));

    let err = create_from_json_stream(&mut realm, "Dog", "{not json".as_bytes()).unwrap_err();
    assert!(matches!(err, JsonError::ParseError(_)));

    let err = create_or_update_from_json(&mut realm, "Address", &json!({"street": "x"}), false).unwrap_err();
    assert!(matches!(err.as_db_error(), Some(DbError::ExecutionError(_))));
}

#[test]
fn test_declared_defaults_with_json() {
    let mut realm = common::open();
    realm.begin_write().unwrap();

    let note = create_or_update_from_json(&mut realm, "Note", &json!({"priority": 5}), false).unwrap();
    assert_eq!(note.get_string(&realm, "text").unwrap().as_deref(), Some("untitled"));
    assert_eq!(note.get_i64(&realm, "priority").unwrap(), Some(5));

    let note = create_or_update_from_json(&mut realm, "Note", &json!({"text": "hi", "dog": null}), false).unwrap();
    assert_eq!(note.get_string(&realm, "text").unwrap().as_deref(), Some("hi"));
    assert!(note.get_link(&realm, "dog").unwrap().is_none());
}

#[test]
fn test_create_from_stream() {
    let mut realm = common::open();
    let input = r#"{
        "id": 5,
        "name": "Eve",
        "birthday": -1000,
        "dog": {"id": 1, "name": "Rex"},
        "home": {"street": "Main St"}
    }"#;

    realm.begin_write().unwrap();
    let person = create_from_json_stream(&mut realm, "Person", input.as_bytes()).unwrap();
    realm.commit_write().unwrap();

    assert_eq!(person.get_i64(&realm, "id").unwrap(), Some(5));
    assert_eq!(
        person.get_date(&realm, "birthday").unwrap().map(|d| d.timestamp_millis()),
        Some(-1000)
    );
    assert!(person.get_link(&realm, "dog").unwrap().is_some());
    assert_eq!(realm.count("Address").unwrap(), 1);
}

#[test]
fn test_export_to_json() {
    let mut realm = common::open();
    realm.begin_write().unwrap();
    let person = create_or_update_from_json(
        &mut realm,
        "Person",
        &json!({
            "id": 1,
            "name": "Ann",
            "birthday": "2017-07-14T02:40:00Z",
            "avatar": "AQID",
            "best_friend": {"id": 2, "name": "Bo", "best_friend": {"id": 3, "name": "Cy"}},
            "tags": ["x"]
        }),
        false,
    )
    .unwrap();
    realm.commit_write().unwrap();

    let exported = to_json(&realm, &person, 1).unwrap();
    assert_eq!(exported["name"], json!("Ann"));
    assert_eq!(exported["birthday"], json!(1_500_000_000_000i64));
    assert_eq!(exported["avatar"], json!("AQID"));
    assert_eq!(exported["nickname"], json!(null));
    assert_eq!(exported["tags"], json!(["x"]));
    assert_eq!(exported["best_friend"]["name"], json!("Bo"));
    assert!(exported["best_friend"].get("best_friend").is_none());
    assert!(exported["best_friend"].get("tags").is_some());

    let flat = to_json(&realm, &person, 0).unwrap();
    assert!(flat.get("best_friend").is_none());
    assert!(flat.get("friends").is_none());

    let all = class_to_json(&realm, "Person", 0).unwrap();
    assert_eq!(all.as_array().map(Vec::len), Some(3));
}

#[test]
fn test_import_export_round_trip() {
    let mut source = common::open();
    source.begin_write().unwrap();
    let original = create_or_update_from_json(
        &mut source,
        "Person",
        &json!({"id": 1, "name": "Ann", "age": 30, "score": 1.25, "weight": 60.5, "active": false}),
        false,
    )
    .unwrap();
    source.commit_write().unwrap();
    let exported = to_json(&source, &original, 0).unwrap();

    let mut target = common::open();
    target.begin_write().unwrap();
    let copy = create_or_update_from_json(&mut target, "Person", &exported, false).unwrap();
    target.commit_write().unwrap();

    assert_eq!(to_json(&target, &copy, 0).unwrap(), exported);
}

#[test]
fn test_export_cycles_as_primary_keys() {
    let mut realm = common::open();
    let mut graph = ObjectGraph::new();
    let ann = graph.add(DetachedObject::new("Person").with("id", 1).with("name", "Ann"));
    let bo = graph.add(
        DetachedObject::new("Person")
            .with("id", 2)
            .with("name", "Bo")
            .with_link("best_friend", Some(ann.into())),
    );
    graph
        .get_mut(ann)
        .unwrap()
        .set("best_friend", FieldValue::Link(Some(bo.into())));

    let ann = realm
        .write(|realm| {
            let ann = realm.copy_to_realm(&graph, ann)?;
            ann.set_list(realm, "friends", &[ann.to_ref()])?;
            Ok(ann)
        })
        .unwrap();

    let exported = to_json(&realm, &ann, usize::MAX).unwrap();
    assert_eq!(exported["best_friend"]["name"], json!("Bo"));
    assert_eq!(exported["best_friend"]["best_friend"], json!(1));
    assert_eq!(exported["friends"], json!([1]));
    assert_eq!(exported["best_friend"]["friends"], json!([]));

    // The default detach depth is unlimited.
    assert_eq!(export_object(&realm, &ann).unwrap(), exported);
}

#[test]
fn test_export_uses_configured_depth() {
    let mut realm = Realm::open(RealmConfig::new(common::schema()).max_detach_depth(0)).unwrap();
    realm.begin_write().unwrap();
    let person = create_or_update_from_json(
        &mut realm,
        "Person",
        &json!({"id": 1, "name": "Ann", "dog": {"id": 2, "name": "Rex"}}),
        false,
    )
    .unwrap();
    realm.commit_write().unwrap();

    let flat = export_object(&realm, &person).unwrap();
    assert_eq!(flat["name"], json!("Ann"));
    assert!(flat.get("dog").is_none());
    assert_eq!(export_class(&realm, "Person").unwrap(), json!([flat]));
    assert_eq!(to_json(&realm, &person, 1).unwrap()["dog"]["name"], json!("Rex"));
}
