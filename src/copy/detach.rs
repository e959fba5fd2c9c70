use super::cache::IdentityCache;
use crate::accessor::ManagedObject;
use crate::core::{FieldType, Result};
use crate::facade::Realm;
use crate::object::{DetachedObject, FieldValue, ObjectGraph, ObjectId, ObjectRef};
use crate::schema::SchemaDescriptor;
use crate::storage::{RowKey, RowStore};
use std::sync::Arc;
use tracing::{Level, event};

type DetachCache = IdentityCache<(String, RowKey), ObjectId>;

/// One object whose relationship fields are being walked.
struct Frame {
    id: ObjectId,
    descriptor: Arc<SchemaDescriptor>,
    row: RowKey,
    depth: usize,
    field: usize,
    item: usize,
    items: Vec<RowKey>,
}

/// Creates an unmanaged deep copy of `object`.
///
/// Relationships are followed up to `max_depth` levels below the root; the
/// relationship fields of objects at `max_depth` are left unspecified. An
/// object reachable along several paths is copied once and filled in to the
/// shallowest depth at which it is reached.
pub fn create_detached_copy(realm: &Realm, object: &ManagedObject, max_depth: usize) -> Result<(ObjectGraph, ObjectId)> {
    object.ensure_valid(realm)?;
    let mut graph = ObjectGraph::new();
    let mut cache = DetachCache::new();
    let mut stack = Vec::new();

    let (root, _) = visit(realm, &mut graph, &mut cache, object.class_name(), object.row(), 0)?;
    stack.push(frame(realm, root, object.class_name(), object.row(), 0)?);

    while let Some(top) = stack.last_mut() {
        let Some(column) = top.descriptor.columns().get(top.field).cloned() else {
            stack.pop();
            continue;
        };
        if !column.field_type.is_link() || top.depth >= max_depth {
            top.field += 1;
            continue;
        }
        let Some(target_class) = column.link_target.clone() else {
            top.field += 1;
            continue;
        };
        let table = top.descriptor.table_name();
        let store = realm.store();

        let (id, row, depth) = (top.id, top.row, top.depth);
        let child = match column.field_type {
            FieldType::Object => {
                top.field += 1;
                match store.get_link(&table, row, column.key)? {
                    None => {
                        graph.get_mut(id)?.set(column.name.clone(), FieldValue::Link(None));
                        None
                    }
                    Some(target) => {
                        let (child, descend) = visit(realm, &mut graph, &mut cache, &target_class, target, depth + 1)?;
                        graph
                            .get_mut(id)?
                            .set(column.name.clone(), FieldValue::Link(Some(ObjectRef::Detached(child))));
                        descend.then_some((child, target))
                    }
                }
            }
            _ => {
                if top.item == 0 {
                    let size = store.list_size(&table, row, column.key)?;
                    top.items = (0..size)
                        .map(|i| store.list_get(&table, row, column.key, i))
                        .collect::<Result<Vec<_>>>()?
                        .into_iter()
                        .filter_map(|entry| entry.as_row())
                        .collect();
                    graph.get_mut(id)?.set(column.name.clone(), FieldValue::List(Some(Vec::new())));
                }
                match top.items.get(top.item).copied() {
                    None => {
                        top.field += 1;
                        top.item = 0;
                        top.items.clear();
                        None
                    }
                    Some(target) => {
                        top.item += 1;
                        let (child, descend) = visit(realm, &mut graph, &mut cache, &target_class, target, depth + 1)?;
                        if let Some(FieldValue::List(Some(items))) = graph.get_mut(id)?.get_mut(&column.name) {
                            items.push(ObjectRef::Detached(child));
                        }
                        descend.then_some((child, target))
                    }
                }
            }
        };

        if let Some((child, target)) = child {
            stack.push(frame(realm, child, &target_class, target, depth + 1)?);
        }
    }

    event!(Level::DEBUG, class = object.class_name(), objects = graph.len(), max_depth, "Created detached copy");
    Ok((graph, root))
}

fn frame(realm: &Realm, id: ObjectId, class_name: &str, row: RowKey, depth: usize) -> Result<Frame> {
    Ok(Frame {
        id,
        descriptor: realm.descriptor(class_name)?,
        row,
        depth,
        field: 0,
        item: 0,
        items: Vec::new(),
    })
}

/// Returns the detached copy of a row and whether its relationships still
/// have to be walked from `depth`.
fn visit(
    realm: &Realm,
    graph: &mut ObjectGraph,
    cache: &mut DetachCache,
    class_name: &str,
    row: RowKey,
    depth: usize,
) -> Result<(ObjectId, bool)> {
    let key = (class_name.to_string(), row);
    if let Some(&id) = cache.target(&key) {
        let shallower = cache.reach(&key, depth);
        return Ok((id, shallower));
    }

    let descriptor = realm.descriptor(class_name)?;
    let table = descriptor.table_name();
    let store = realm.store();
    let mut object = DetachedObject::new(class_name);
    for column in descriptor.columns() {
        match column.field_type {
            FieldType::Scalar(_) => {
                object.set(column.name.clone(), FieldValue::Value(store.get_scalar(&table, row, column.key)?));
            }
            FieldType::ScalarList(_) => {
                let size = store.list_size(&table, row, column.key)?;
                let values = (0..size)
                    .map(|i| store.list_get(&table, row, column.key, i))
                    .collect::<Result<Vec<_>>>()?
                    .into_iter()
                    .filter_map(|entry| entry.into_value())
                    .collect();
                object.set(column.name.clone(), FieldValue::Values(Some(values)));
            }
            FieldType::Object | FieldType::List => {}
        }
    }

    let id = graph.add(object);
    cache.insert(key, id, depth);
    Ok((id, true))
}
