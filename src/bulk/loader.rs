use crate::copy::{CopyCache, CopyTarget, SourceReader, SourceSet};
use crate::core::{DbError, FieldType, Result};
use crate::facade::Realm;
use crate::object::{DetachedObject, FieldValue, ObjectRef, SourceKey};
use crate::schema::{ColumnDetails, SchemaDescriptor};
use crate::storage::{ListEntry, RowKey, RowStore, replace_list};
use std::sync::Arc;
use tracing::{Level, event, info_span};

/// How existing rows and absent values are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// New rows only; a taken primary key is an error and absent values are skipped.
    Insert,
    /// Rows with a known primary key are overwritten, absent values clear their column.
    Upsert,
}

impl LoadMode {
    fn is_upsert(self) -> bool {
        self == Self::Upsert
    }
}

/// Writes every object in `objects` (and everything they reference) into `realm`.
pub fn insert(
    realm: &mut Realm,
    sources: SourceSet<'_>,
    objects: &[ObjectRef],
    cache: &mut CopyCache,
) -> Result<Vec<CopyTarget>> {
    load_all(realm, sources, objects, LoadMode::Insert, cache)
}

pub fn insert_or_update(
    realm: &mut Realm,
    sources: SourceSet<'_>,
    objects: &[ObjectRef],
    cache: &mut CopyCache,
) -> Result<Vec<CopyTarget>> {
    load_all(realm, sources, objects, LoadMode::Upsert, cache)
}

pub fn insert_one(
    realm: &mut Realm,
    sources: SourceSet<'_>,
    object: &ObjectRef,
    cache: &mut CopyCache,
) -> Result<CopyTarget> {
    realm.ensure_in_write()?;
    let mut loader = BulkLoader::new(realm, sources, LoadMode::Insert, cache);
    let target = loader.load(object)?;
    loader.drain()?;
    Ok(target)
}

pub fn upsert_one(
    realm: &mut Realm,
    sources: SourceSet<'_>,
    object: &ObjectRef,
    cache: &mut CopyCache,
) -> Result<CopyTarget> {
    realm.ensure_in_write()?;
    let mut loader = BulkLoader::new(realm, sources, LoadMode::Upsert, cache);
    let target = loader.load(object)?;
    loader.drain()?;
    Ok(target)
}

fn load_all(
    realm: &mut Realm,
    sources: SourceSet<'_>,
    objects: &[ObjectRef],
    mode: LoadMode,
    cache: &mut CopyCache,
) -> Result<Vec<CopyTarget>> {
    let span = info_span!("bulk_load", ?mode, objects = objects.len());
    let _enter = span.enter();

    realm.ensure_in_write()?;
    let before = cache.len();
    let mut loader = BulkLoader::new(realm, sources, mode, cache);
    let mut targets = Vec::with_capacity(objects.len());
    for object in objects {
        targets.push(loader.load(object)?);
        loader.drain()?;
    }
    drop(loader);

    event!(Level::DEBUG, written = cache.len() - before, "Bulk load finished");
    Ok(targets)
}

struct Pending {
    descriptor: Arc<SchemaDescriptor>,
    row: RowKey,
    source: DetachedObject,
}

struct BulkLoader<'r, 's, 'c> {
    realm: &'r mut Realm,
    sources: SourceSet<'s>,
    reader: SourceReader,
    cache: &'c mut CopyCache,
    mode: LoadMode,
    pending: Vec<Pending>,
}

impl<'r, 's, 'c> BulkLoader<'r, 's, 'c> {
    fn new(realm: &'r mut Realm, sources: SourceSet<'s>, mode: LoadMode, cache: &'c mut CopyCache) -> Self {
        Self {
            realm,
            sources,
            reader: SourceReader::new(),
            cache,
            mode,
            pending: Vec::new(),
        }
    }

    fn drain(&mut self) -> Result<()> {
        while let Some(next) = self.pending.pop() {
            self.write_relations(next)?;
        }
        Ok(())
    }

    fn load(&mut self, source: &ObjectRef) -> Result<CopyTarget> {
        let key = SourceKey::from(source);
        if let Some(target) = self.cache.target(&key) {
            return Ok(target.clone());
        }

        if let ObjectRef::Managed(managed) = source {
            if managed.database == self.realm.id() {
                let target = CopyTarget {
                    class_name: managed.class_name.clone(),
                    row: managed.row,
                };
                self.cache.insert(key, target.clone(), 0);
                return Ok(target);
            }
            if managed.context != self.realm.context() {
                return Err(DbError::CrossContext);
            }
        }

        let snapshot = self.reader.read(self.realm, &self.sources, source)?;
        let descriptor = self.realm.descriptor(snapshot.class_name())?;
        if descriptor.is_embedded() {
            return Err(DbError::ExecutionError(format!(
                "Embedded objects of class '{}' can only be inserted through a parent object",
                descriptor.class_name()
            )));
        }

        let row = self.locate_row(&descriptor, &snapshot)?;
        let target = CopyTarget {
            class_name: descriptor.class_name().to_string(),
            row,
        };
        self.cache.insert(key, target.clone(), 0);
        self.write_scalars(&descriptor, row, &snapshot)?;
        self.pending.push(Pending {
            descriptor,
            row,
            source: snapshot,
        });
        Ok(target)
    }

    fn locate_row(&mut self, descriptor: &SchemaDescriptor, snapshot: &DetachedObject) -> Result<RowKey> {
        let Some(pk) = descriptor.primary_key() else {
            return self.realm.allocate_row(descriptor, None);
        };
        let key = snapshot.value(&pk.name).cloned().unwrap_or_else(|| pk.default_value());
        if self.mode.is_upsert()
            && let Some(existing) = self.realm.store().find_first(&descriptor.table_name(), pk.key, &key)?
        {
            return Ok(existing);
        }
        self.realm.allocate_row(descriptor, Some(key))
    }

    fn write_scalars(&mut self, descriptor: &SchemaDescriptor, row: RowKey, snapshot: &DetachedObject) -> Result<()> {
        let table = descriptor.table_name();
        let upsert = self.mode.is_upsert();
        let store = self.realm.store_mut();

        for column in descriptor.columns().iter().filter(|c| c.field_type.is_scalar() && !c.primary_key) {
            match snapshot.value(&column.name) {
                Some(value) if !value.is_null() => {
                    store.set_scalar(&table, row, column.key, value.clone(), false)?;
                }
                Some(_) if upsert && !column.nullable => {
                    return Err(DbError::NonNullableViolation {
                        field: column.name.clone(),
                    });
                }
                _ if upsert && column.nullable => store.set_null(&table, row, column.key)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn write_relations(&mut self, pending: Pending) -> Result<()> {
        let Pending {
            descriptor,
            row,
            source,
        } = pending;
        let table = descriptor.table_name();
        let upsert = self.mode.is_upsert();

        for column in descriptor.columns() {
            let field = source.get(&column.name);
            match column.field_type {
                FieldType::Scalar(_) => {}
                FieldType::Object => {
                    let link = match field {
                        Some(FieldValue::Link(link)) => link.as_ref(),
                        None => None,
                        Some(_) => return Err(shape_error(&descriptor, column)),
                    };
                    match link {
                        Some(source) if column.target_embedded => {
                            self.reader.prefetch_local(self.realm, source)?;
                            let (key, snapshot) = self.claim(column, source)?;
                            let child = self.realm.store_mut().create_embedded_child(&table, row, column.key)?;
                            self.populate(key, snapshot, child)?;
                        }
                        Some(source) => {
                            let target = self.load(source)?;
                            crate::copy::engine::expect_class(column, &target.class_name)?;
                            self.realm.store_mut().set_link(&table, row, column.key, target.row)?;
                        }
                        None if upsert => self.realm.store_mut().nullify_link(&table, row, column.key)?,
                        None => {}
                    }
                }
                FieldType::List => {
                    let items = match field {
                        Some(FieldValue::List(items)) => items.as_deref(),
                        None => None,
                        Some(_) => return Err(shape_error(&descriptor, column)),
                    };
                    if column.target_embedded {
                        self.write_embedded_list(&table, row, column, items)?;
                    } else {
                        self.write_link_list(&table, row, column, items)?;
                    }
                }
                FieldType::ScalarList(_) => {
                    let values = match field {
                        Some(FieldValue::Values(values)) => values.as_deref(),
                        None => None,
                        Some(_) => return Err(shape_error(&descriptor, column)),
                    };
                    let entries: Vec<ListEntry> = values
                        .unwrap_or_default()
                        .iter()
                        .cloned()
                        .map(ListEntry::Value)
                        .collect();
                    self.write_entries(&table, row, column, entries, values.is_some())?;
                }
            }
        }
        Ok(())
    }

    fn write_link_list(
        &mut self,
        table: &str,
        row: RowKey,
        column: &ColumnDetails,
        items: Option<&[ObjectRef]>,
    ) -> Result<()> {
        let mut entries = Vec::new();
        for item in items.unwrap_or_default() {
            let target = self.load(item)?;
            crate::copy::engine::expect_class(column, &target.class_name)?;
            entries.push(ListEntry::Row(target.row));
        }
        self.write_entries(table, row, column, entries, items.is_some())
    }

    /// Insert appends; upsert replaces, clearing the list when it is absent.
    fn write_entries(
        &mut self,
        table: &str,
        row: RowKey,
        column: &ColumnDetails,
        entries: Vec<ListEntry>,
        present: bool,
    ) -> Result<()> {
        let store = self.realm.store_mut();
        match self.mode {
            LoadMode::Upsert if present => replace_list(store, table, row, column.key, entries),
            LoadMode::Upsert => store.list_remove_all(table, row, column.key),
            LoadMode::Insert => {
                for entry in entries {
                    store.list_append(table, row, column.key, entry)?;
                }
                Ok(())
            }
        }
    }

    fn write_embedded_list(
        &mut self,
        table: &str,
        row: RowKey,
        column: &ColumnDetails,
        items: Option<&[ObjectRef]>,
    ) -> Result<()> {
        let items = items.unwrap_or_default();
        for item in items {
            self.reader.prefetch_local(self.realm, item)?;
        }
        if self.mode.is_upsert() {
            self.realm.store_mut().list_remove_all(table, row, column.key)?;
        }
        for item in items {
            let (key, snapshot) = self.claim(column, item)?;
            let child = self.realm.store_mut().create_embedded_child(table, row, column.key)?;
            self.populate(key, snapshot, child)?;
        }
        Ok(())
    }

    /// Reads the source of an embedded child that must not have a parent yet.
    fn claim(&mut self, column: &ColumnDetails, source: &ObjectRef) -> Result<(SourceKey, DetachedObject)> {
        let key = SourceKey::from(source);
        if self.cache.contains(&key) {
            return Err(DbError::EmbeddedObjectAlreadyOwned);
        }
        let snapshot = self.reader.read(self.realm, &self.sources, source)?;
        crate::copy::engine::expect_class(column, snapshot.class_name())?;
        Ok((key, snapshot))
    }

    /// Fills a freshly created embedded row.
    fn populate(&mut self, key: SourceKey, snapshot: DetachedObject, child: RowKey) -> Result<()> {
        let descriptor = self.realm.descriptor(snapshot.class_name())?;
        self.cache.insert(
            key,
            CopyTarget {
                class_name: descriptor.class_name().to_string(),
                row: child,
            },
            0,
        );
        self.write_scalars(&descriptor, child, &snapshot)?;
        self.pending.push(Pending {
            descriptor,
            row: child,
            source: snapshot,
        });
        Ok(())
    }
}

fn shape_error(descriptor: &SchemaDescriptor, column: &ColumnDetails) -> DbError {
    DbError::TypeMismatch(format!(
        "Field '{}' of class '{}' expects a {} value",
        column.name,
        descriptor.class_name(),
        column.field_type
    ))
}
