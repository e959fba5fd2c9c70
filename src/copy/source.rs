use crate::core::{DbError, FieldType, Result};
use crate::facade::Realm;
use crate::object::{DetachedObject, FieldValue, ManagedRef, ObjectGraph, ObjectRef, SourceKey};
use crate::storage::RowStore;
use std::collections::HashMap;

/// Where the objects referenced by a copy or insert can be read from: the
/// detached graph, plus any other open Realms whose managed objects appear in it.
#[derive(Clone, Copy, Default)]
pub struct SourceSet<'a> {
    graph: Option<&'a ObjectGraph>,
    realms: &'a [&'a Realm],
}

impl<'a> SourceSet<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn graph(graph: &'a ObjectGraph) -> Self {
        Self {
            graph: Some(graph),
            realms: &[],
        }
    }

    pub fn with_realms(mut self, realms: &'a [&'a Realm]) -> Self {
        self.realms = realms;
        self
    }

    /// Reads the current state of `source` as a detached snapshot.
    pub fn read(&self, target: &Realm, source: &ObjectRef) -> Result<DetachedObject> {
        match source {
            ObjectRef::Detached(id) => {
                let graph = self.graph.ok_or_else(|| {
                    DbError::ExecutionError(format!("Detached object {} has no graph to read from", id))
                })?;
                Ok(graph.get(*id)?.clone())
            }
            ObjectRef::Managed(m) if m.database == target.id() => read_managed(target, m),
            ObjectRef::Managed(m) => {
                if m.context != target.context() {
                    return Err(DbError::CrossContext);
                }
                let owner = self
                    .realms
                    .iter()
                    .find(|r| r.id() == m.database)
                    .ok_or_else(|| {
                        DbError::CrossDatabaseReference(format!("the Realm owning {} was not supplied", m))
                    })?;
                read_managed(owner, m)
            }
        }
    }
}

/// Snapshot of a managed row with relationships expressed as managed refs.
pub fn read_managed(realm: &Realm, reference: &ManagedRef) -> Result<DetachedObject> {
    realm.ensure_open()?;
    let descriptor = realm.descriptor(&reference.class_name)?;
    let table = descriptor.table_name();
    let store = realm.store();
    if !store.is_row_valid(&table, reference.row) {
        return Err(DbError::StaleObject(format!("{} has been deleted", reference)));
    }

    let mut object = DetachedObject::new(reference.class_name.clone());
    for column in descriptor.columns() {
        let value = match column.field_type {
            FieldType::Scalar(_) => FieldValue::Value(store.get_scalar(&table, reference.row, column.key)?),
            FieldType::Object => {
                let target = store.get_link(&table, reference.row, column.key)?;
                FieldValue::Link(target.map(|row| ObjectRef::Managed(related(realm, column.link_target.as_deref(), row))))
            }
            FieldType::List => {
                let size = store.list_size(&table, reference.row, column.key)?;
                let mut items = Vec::with_capacity(size);
                for index in 0..size {
                    if let Some(row) = store.list_get(&table, reference.row, column.key, index)?.as_row() {
                        items.push(ObjectRef::Managed(related(realm, column.link_target.as_deref(), row)));
                    }
                }
                FieldValue::List(Some(items))
            }
            FieldType::ScalarList(_) => {
                let size = store.list_size(&table, reference.row, column.key)?;
                let mut items = Vec::with_capacity(size);
                for index in 0..size {
                    if let Some(v) = store.list_get(&table, reference.row, column.key, index)?.into_value() {
                        items.push(v);
                    }
                }
                FieldValue::Values(Some(items))
            }
        };
        object.set(column.name.clone(), value);
    }
    Ok(object)
}

fn related(realm: &Realm, class_name: Option<&str>, row: crate::storage::RowKey) -> ManagedRef {
    realm.managed_ref(class_name.unwrap_or_default(), row)
}

/// Reads sources for one operation, holding snapshots of objects that the
/// operation itself is about to overwrite.
#[derive(Debug, Default)]
pub struct SourceReader {
    prefetched: HashMap<SourceKey, DetachedObject>,
}

impl SourceReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self, realm: &Realm, sources: &SourceSet<'_>, source: &ObjectRef) -> Result<DetachedObject> {
        if let Some(snapshot) = self.prefetched.get(&SourceKey::from(source)) {
            return Ok(snapshot.clone());
        }
        sources.read(realm, source)
    }

    /// Snapshots `source` and its embedded subtree when it lives in `realm`,
    /// so that replacing embedded children cannot destroy data still to be copied.
    pub fn prefetch_local(&mut self, realm: &Realm, source: &ObjectRef) -> Result<()> {
        let ObjectRef::Managed(root) = source else {
            return Ok(());
        };
        if root.database != realm.id() {
            return Ok(());
        }

        let mut pending = vec![root.clone()];
        while let Some(reference) = pending.pop() {
            let key = SourceKey::from(&ObjectRef::Managed(reference.clone()));
            if self.prefetched.contains_key(&key) {
                continue;
            }
            let snapshot = read_managed(realm, &reference)?;
            let descriptor = realm.descriptor(&reference.class_name)?;
            for column in descriptor.columns().iter().filter(|c| c.is_embedded_link()) {
                match snapshot.get(&column.name) {
                    Some(FieldValue::Link(Some(ObjectRef::Managed(child)))) => pending.push(child.clone()),
                    Some(FieldValue::List(Some(items))) => pending.extend(items.iter().filter_map(|i| match i {
                        ObjectRef::Managed(child) => Some(child.clone()),
                        ObjectRef::Detached(_) => None,
                    })),
                    _ => {}
                }
            }
            self.prefetched.insert(key, snapshot);
        }
        Ok(())
    }
}
