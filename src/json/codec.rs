//! Building managed objects from JSON documents and exporting them back.

use super::converter::{JsonToValueConverter, ValueToJsonConverter};
use super::error::{JsonError, JsonResult};
use crate::accessor::{ConstructionPolicy, ManagedObject};
use crate::core::{DbError, FieldType, Value};
use crate::facade::Realm;
use crate::object::{DetachedObject, FieldValue, ObjectGraph, ObjectId, ObjectRef};
use crate::schema::{ColumnDetails, SchemaDescriptor};
use crate::storage::RowKey;
use serde_json::{Map, Value as JsonValue};
use std::io::Read;
use tracing::{Level, event};

fn as_object<'a>(json: &'a JsonValue, class_name: &str) -> JsonResult<&'a Map<String, JsonValue>> {
    json.as_object().ok_or_else(|| {
        JsonError::InvalidStructure(format!("Expected a JSON object for class '{}'", class_name))
    })
}

fn link_target(column: &ColumnDetails) -> JsonResult<&str> {
    column
        .link_target
        .as_deref()
        .ok_or_else(|| JsonError::InvalidStructure(format!("Field '{}' has no link target", column.name)))
}

fn expect_array<'a>(json: &'a JsonValue, column: &ColumnDetails) -> JsonResult<&'a [JsonValue]> {
    json.as_array().map(Vec::as_slice).ok_or_else(|| {
        JsonError::TypeMismatch(format!("Field '{}' expects a JSON array", column.name))
    })
}

/// Relationship fields present in the document. Defaults are not applied to
/// them while the object is under construction.
fn relationship_fields(descriptor: &SchemaDescriptor, object: &Map<String, JsonValue>) -> Vec<String> {
    descriptor
        .columns()
        .iter()
        .filter(|c| !c.field_type.is_scalar() && object.contains_key(&c.name))
        .map(|c| c.name.clone())
        .collect()
}

// ============================================================================
// JSON -> Realm
// ============================================================================

/// Creates an object of `class_name` from a JSON object, or updates the
/// existing one with the same primary key when `update` is set.
///
/// Unknown JSON keys are ignored, missing keys leave fields untouched,
/// nested objects and arrays are imported recursively.
pub fn create_or_update_from_json(
    realm: &mut Realm,
    class_name: &str,
    json: &JsonValue,
    update: bool,
) -> JsonResult<ManagedObject> {
    realm.ensure_in_write()?;
    let descriptor = realm.descriptor(class_name)?;
    if descriptor.is_embedded() {
        return Err(DbError::ExecutionError(format!(
            "Embedded class '{}' can only be created through its parent",
            class_name
        ))
        .into());
    }
    let document = as_object(json, class_name)?;

    let mut existing = None;
    let mut key = None;
    if let Some(pk) = descriptor.primary_key() {
        let raw = document
            .get(&pk.name)
            .ok_or_else(|| DbError::MissingPrimaryKey(format!("{}.{}", class_name, pk.name)))?;
        let value = scalar_value(raw, pk)?;
        if update {
            existing = realm.find_by_primary_key(class_name, value.clone())?;
        }
        key = Some(value);
    }

    let object = match existing {
        Some(object) => object,
        None => {
            let policy = ConstructionPolicy::accepting_defaults()
                .excluding(relationship_fields(&descriptor, document));
            realm.create_object_with(class_name, key, policy, |_, _| Ok(()))?
        }
    };
    populate(realm, &object, &descriptor, document, update)?;
    event!(Level::TRACE, class = class_name, row = object.row().0, "imported JSON object");
    Ok(object)
}

fn populate(
    realm: &mut Realm,
    object: &ManagedObject,
    descriptor: &SchemaDescriptor,
    document: &Map<String, JsonValue>,
    update: bool,
) -> JsonResult<()> {
    for column in descriptor.columns() {
        if column.primary_key {
            continue;
        }
        let Some(raw) = document.get(&column.name) else {
            continue;
        };
        match &column.field_type {
            FieldType::Scalar(_) => {
                let value = scalar_value(raw, column)?;
                object.set(realm, &column.name, value)?;
            }
            FieldType::ScalarList(data_type) => {
                let values = if raw.is_null() {
                    Vec::new()
                } else {
                    expect_array(raw, column)?
                        .iter()
                        .map(|item| JsonToValueConverter::convert(item, data_type))
                        .collect::<JsonResult<Vec<_>>>()?
                };
                object.set_values(realm, &column.name, values)?;
            }
            FieldType::Object if raw.is_null() => object.set_link(realm, &column.name, None)?,
            FieldType::Object if column.target_embedded => {
                let child = realm.create_embedded_object(object, &column.name)?;
                populate_embedded(realm, &child, raw, update)?;
            }
            FieldType::Object => {
                let target = create_or_update_from_json(realm, link_target(column)?, raw, update)?;
                object.set_link(realm, &column.name, Some(&target.to_ref()))?;
            }
            FieldType::List if column.target_embedded => {
                object.set_list(realm, &column.name, &[])?;
                if !raw.is_null() {
                    for item in expect_array(raw, column)? {
                        let child = realm.create_embedded_object(object, &column.name)?;
                        populate_embedded(realm, &child, item, update)?;
                    }
                }
            }
            FieldType::List => {
                let mut items = Vec::new();
                if !raw.is_null() {
                    let target = link_target(column)?;
                    for item in expect_array(raw, column)? {
                        items.push(create_or_update_from_json(realm, target, item, update)?.to_ref());
                    }
                }
                object.set_list(realm, &column.name, &items)?;
            }
        }
    }
    Ok(())
}

fn populate_embedded(realm: &mut Realm, child: &ManagedObject, json: &JsonValue, update: bool) -> JsonResult<()> {
    let descriptor = realm.descriptor(child.class_name())?;
    let document = as_object(json, child.class_name())?;
    populate(realm, child, &descriptor, document, update)
}

fn scalar_value(raw: &JsonValue, column: &ColumnDetails) -> JsonResult<Value> {
    match column.field_type {
        FieldType::Scalar(data_type) => {
            let value = JsonToValueConverter::convert(raw, &data_type)?;
            if value.is_null() && !column.nullable {
                return Err(DbError::NonNullableViolation {
                    field: column.name.clone(),
                }
                .into());
            }
            Ok(value)
        }
        _ => Err(JsonError::TypeMismatch(format!("Field '{}' is not a scalar", column.name))),
    }
}

/// Reads one JSON object from `reader` and inserts it as a new object.
///
/// The whole document is read into an unmanaged graph first, so a class with
/// a primary key must carry it somewhere in the document.
pub fn create_from_json_stream<R: Read>(realm: &mut Realm, class_name: &str, reader: R) -> JsonResult<ManagedObject> {
    let json: JsonValue = serde_json::from_reader(reader)?;
    let mut graph = ObjectGraph::new();
    let root = detach_json(realm, &mut graph, class_name, &json)?;
    Ok(realm.copy_to_realm(&graph, root)?)
}

/// Builds unmanaged objects for a JSON document, nested objects included.
pub fn detach_json(
    realm: &Realm,
    graph: &mut ObjectGraph,
    class_name: &str,
    json: &JsonValue,
) -> JsonResult<ObjectId> {
    let descriptor = realm.descriptor(class_name)?;
    let document = as_object(json, class_name)?;
    if let Some(pk) = descriptor.primary_key()
        && !document.contains_key(&pk.name)
    {
        return Err(DbError::MissingPrimaryKey(format!("{}.{}", class_name, pk.name)).into());
    }

    let mut object = DetachedObject::new(class_name);
    for column in descriptor.columns() {
        let Some(raw) = document.get(&column.name) else {
            continue;
        };
        let field = match &column.field_type {
            FieldType::Scalar(_) => FieldValue::Value(scalar_value(raw, column)?),
            FieldType::ScalarList(_) if raw.is_null() => FieldValue::Values(None),
            FieldType::ScalarList(data_type) => FieldValue::Values(Some(
                expect_array(raw, column)?
                    .iter()
                    .map(|item| JsonToValueConverter::convert(item, data_type))
                    .collect::<JsonResult<Vec<_>>>()?,
            )),
            FieldType::Object if raw.is_null() => FieldValue::Link(None),
            FieldType::Object => {
                let child = detach_json(realm, graph, link_target(column)?, raw)?;
                FieldValue::Link(Some(ObjectRef::from(child)))
            }
            FieldType::List if raw.is_null() => FieldValue::List(None),
            FieldType::List => {
                let target = link_target(column)?;
                let mut items = Vec::new();
                for item in expect_array(raw, column)? {
                    items.push(ObjectRef::from(detach_json(realm, graph, target, item)?));
                }
                FieldValue::List(Some(items))
            }
        };
        object.set(column.name.clone(), field);
    }
    Ok(graph.add(object))
}

// ============================================================================
// Realm -> JSON
// ============================================================================

/// Exports a managed object as a JSON object.
///
/// Relationship fields are followed up to `max_depth` levels and left out
/// beyond it. Dates are written as epoch millis, binary as base64. A link back
/// to an object already being exported on the current path is written as that
/// object's primary key (`null` for classes without one).
pub fn to_json(realm: &Realm, object: &ManagedObject, max_depth: usize) -> JsonResult<JsonValue> {
    let mut path = Vec::new();
    render(realm, object, max_depth, &mut path)
}

/// [`to_json`] with the Realm's configured `max_detach_depth`.
pub fn export_object(realm: &Realm, object: &ManagedObject) -> JsonResult<JsonValue> {
    to_json(realm, object, realm.config().max_detach_depth)
}

/// Exports every object of a class as a JSON array.
pub fn class_to_json(realm: &Realm, class_name: &str, max_depth: usize) -> JsonResult<JsonValue> {
    realm
        .all_objects(class_name)?
        .iter()
        .map(|object| to_json(realm, object, max_depth))
        .collect::<JsonResult<Vec<_>>>()
        .map(JsonValue::Array)
}

/// [`class_to_json`] with the Realm's configured `max_detach_depth`.
pub fn export_class(realm: &Realm, class_name: &str) -> JsonResult<JsonValue> {
    class_to_json(realm, class_name, realm.config().max_detach_depth)
}

fn render(
    realm: &Realm,
    object: &ManagedObject,
    max_depth: usize,
    path: &mut Vec<(String, RowKey)>,
) -> JsonResult<JsonValue> {
    object.ensure_valid(realm)?;
    let descriptor = realm.descriptor(object.class_name())?;
    path.push((object.class_name().to_string(), object.row()));

    let mut document = Map::new();
    for column in descriptor.columns() {
        let value = match &column.field_type {
            FieldType::Scalar(_) => ValueToJsonConverter::convert(&object.get(realm, &column.name)?),
            FieldType::ScalarList(_) => JsonValue::Array(
                object
                    .get_values(realm, &column.name)?
                    .iter()
                    .map(ValueToJsonConverter::convert)
                    .collect(),
            ),
            _ if max_depth == 0 => continue,
            FieldType::Object => match object.get_link(realm, &column.name)? {
                Some(target) => render_link(realm, &target, max_depth - 1, path)?,
                None => JsonValue::Null,
            },
            FieldType::List => JsonValue::Array(
                object
                    .get_list(realm, &column.name)?
                    .iter()
                    .map(|item| render_link(realm, item, max_depth - 1, path))
                    .collect::<JsonResult<Vec<_>>>()?,
            ),
        };
        document.insert(column.name.clone(), value);
    }

    path.pop();
    Ok(JsonValue::Object(document))
}

fn render_link(
    realm: &Realm,
    target: &ManagedObject,
    max_depth: usize,
    path: &mut Vec<(String, RowKey)>,
) -> JsonResult<JsonValue> {
    let on_path = path
        .iter()
        .any(|(class_name, row)| class_name == target.class_name() && *row == target.row());
    if !on_path {
        return render(realm, target, max_depth, path);
    }
    match target.descriptor().primary_key() {
        Some(pk) => Ok(ValueToJsonConverter::convert(&target.get(realm, &pk.name)?)),
        None => Ok(JsonValue::Null),
    }
}
