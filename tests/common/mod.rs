#![allow(dead_code)]

use memorealm::{DataType, ObjectSchema, Property, Realm, RealmConfig, SchemaSet};

pub fn dog() -> ObjectSchema {
    ObjectSchema::new("Dog")
        .property(Property::new("id", DataType::Integer).required().primary_key())
        .property(Property::new("name", DataType::Text).required())
}

pub fn address() -> ObjectSchema {
    ObjectSchema::new("Address")
        .embedded()
        .property(Property::new("street", DataType::Text).required())
        .property(Property::new("city", DataType::Text))
}

pub fn person() -> ObjectSchema {
    ObjectSchema::new("Person")
        .property(Property::new("id", DataType::Integer).required().primary_key())
        .property(Property::new("name", DataType::Text).required())
        .property(Property::new("age", DataType::Integer).required())
        .property(Property::new("nickname", DataType::Text))
        .property(Property::new("score", DataType::Double).required())
        .property(Property::new("weight", DataType::Float))
        .property(Property::new("active", DataType::Boolean))
        .property(Property::new("birthday", DataType::Date))
        .property(Property::new("avatar", DataType::Binary))
        .property(Property::object("dog", "Dog"))
        .property(Property::object("best_friend", "Person"))
        .property(Property::list("friends", "Person"))
        .property(Property::object("home", "Address"))
        .property(Property::object("work", "Address"))
        .property(Property::list("previous", "Address"))
        .property(Property::scalar_list("tags", DataType::Text).required())
}

/// A class without primary key, with declared defaults.
pub fn note() -> ObjectSchema {
    ObjectSchema::new("Note")
        .property(Property::new("text", DataType::Text).required().default_value("untitled"))
        .property(Property::new("priority", DataType::Integer).required().default_value(3))
        .property(Property::object("dog", "Dog"))
}

pub fn schema() -> SchemaSet {
    SchemaSet::new(vec![dog(), address(), person(), note()]).unwrap()
}

pub fn open() -> Realm {
    Realm::open(RealmConfig::new(schema())).unwrap()
}
