use super::source::{SourceReader, SourceSet};
use super::{CopyCache, CopyTarget, ImportFlags};
use crate::accessor::ManagedObject;
use crate::core::{DbError, FieldType, Result};
use crate::facade::Realm;
use crate::object::{DetachedObject, FieldValue, ObjectRef, SourceKey};
use crate::schema::{ColumnDetails, SchemaDescriptor};
use crate::storage::{ListEntry, RowKey, RowStore, replace_list};
use std::sync::Arc;
use tracing::{Level, event};

/// Copies `root` and everything reachable from it into `realm`.
///
/// With `update`, objects whose primary key already exists are updated in
/// place instead of failing with a duplicate key. Every source object is
/// materialized at most once per `cache`, which is also what terminates cycles.
pub fn copy_or_update(
    realm: &mut Realm,
    sources: SourceSet<'_>,
    root: &ObjectRef,
    update: bool,
    flags: ImportFlags,
    cache: &mut CopyCache,
) -> Result<ManagedObject> {
    realm.ensure_in_write()?;
    let before = cache.len();
    let target = {
        let mut engine = CopyEngine::new(realm, sources, update, flags, cache);
        let target = engine.resolve(root, 0)?;
        engine.drain()?;
        target
    };

    event!(
        Level::DEBUG,
        class = %target.class_name,
        update,
        copied = cache.len() - before,
        "Copied object graph"
    );
    realm.object(&target.class_name, target.row)
}

/// Creates a new embedded child of `parent` in the single-valued `field`
/// from `value` and populates it, including its own relationships.
pub fn assign_embedded(
    realm: &mut Realm,
    sources: SourceSet<'_>,
    parent: &ManagedObject,
    field: &str,
    value: Option<&ObjectRef>,
    cache: &mut CopyCache,
) -> Result<()> {
    let (table, column) = embedded_column(realm, parent, field)?;
    let mut engine = CopyEngine::new(realm, sources, false, ImportFlags::default(), cache);
    engine.embed_one(&table, parent.row(), &column, value, true, 0)?;
    engine.drain()
}

/// Replaces the embedded children held by the list `field` of `parent`.
pub fn assign_embedded_list(
    realm: &mut Realm,
    sources: SourceSet<'_>,
    parent: &ManagedObject,
    field: &str,
    items: &[ObjectRef],
    cache: &mut CopyCache,
) -> Result<()> {
    let (table, column) = embedded_column(realm, parent, field)?;
    let mut engine = CopyEngine::new(realm, sources, false, ImportFlags::default(), cache);
    engine.embed_list(&table, parent.row(), &column, Some(items), true, 0)?;
    engine.drain()
}

fn embedded_column(realm: &Realm, parent: &ManagedObject, field: &str) -> Result<(String, ColumnDetails)> {
    realm.ensure_in_write()?;
    let descriptor = realm.descriptor(parent.class_name())?;
    let column = descriptor.require(field)?.clone();
    if !column.is_embedded_link() {
        return Err(DbError::TypeMismatch(format!(
            "Field '{}' does not reference an embedded class",
            field
        )));
    }
    Ok((descriptor.table_name(), column))
}

/// An object whose row exists and whose scalars are written, but whose
/// relationship fields still have to be copied.
struct Pending {
    descriptor: Arc<SchemaDescriptor>,
    row: RowKey,
    source: DetachedObject,
    fresh: bool,
    depth: usize,
}

struct CopyEngine<'r, 's, 'c> {
    realm: &'r mut Realm,
    sources: SourceSet<'s>,
    reader: SourceReader,
    cache: &'c mut CopyCache,
    update: bool,
    flags: ImportFlags,
    pending: Vec<Pending>,
}

impl<'r, 's, 'c> CopyEngine<'r, 's, 'c> {
    fn new(
        realm: &'r mut Realm,
        sources: SourceSet<'s>,
        update: bool,
        flags: ImportFlags,
        cache: &'c mut CopyCache,
    ) -> Self {
        Self {
            realm,
            sources,
            reader: SourceReader::new(),
            cache,
            update,
            flags,
            pending: Vec::new(),
        }
    }

    fn drain(&mut self) -> Result<()> {
        while let Some(next) = self.pending.pop() {
            self.copy_relations(next)?;
        }
        Ok(())
    }

    // ========================================================================
    // Top-level objects
    // ========================================================================

    /// Maps a source reference to its managed row in the target Realm,
    /// materializing it on first sight.
    fn resolve(&mut self, source: &ObjectRef, depth: usize) -> Result<CopyTarget> {
        if let ObjectRef::Managed(managed) = source {
            if managed.database == self.realm.id() {
                let descriptor = self.realm.descriptor(&managed.class_name)?;
                if !self.realm.store().is_row_valid(&descriptor.table_name(), managed.row) {
                    return Err(DbError::StaleObject(format!("{} has been deleted", managed)));
                }
                return Ok(CopyTarget {
                    class_name: managed.class_name.clone(),
                    row: managed.row,
                });
            }
            if managed.context != self.realm.context() {
                return Err(DbError::CrossContext);
            }
        }

        let key = SourceKey::from(source);
        if let Some(target) = self.cache.target(&key) {
            return Ok(target.clone());
        }

        let snapshot = self.reader.read(self.realm, &self.sources, source)?;
        let descriptor = self.realm.descriptor(snapshot.class_name())?;
        if descriptor.is_embedded() {
            return Err(DbError::ExecutionError(format!(
                "Embedded objects of class '{}' can only be created through a parent object",
                descriptor.class_name()
            )));
        }

        let (row, fresh) = self.locate_row(&descriptor, &snapshot)?;
        let target = CopyTarget {
            class_name: descriptor.class_name().to_string(),
            row,
        };
        self.cache.insert(key, target.clone(), depth);
        self.write_scalars(&descriptor, row, &snapshot, fresh)?;
        self.pending.push(Pending {
            descriptor,
            row,
            source: snapshot,
            fresh,
            depth,
        });
        Ok(target)
    }

    /// Existing row with the same primary key when updating, otherwise a new row.
    fn locate_row(&mut self, descriptor: &SchemaDescriptor, snapshot: &DetachedObject) -> Result<(RowKey, bool)> {
        let Some(pk) = descriptor.primary_key() else {
            return Ok((self.realm.allocate_row(descriptor, None)?, true));
        };

        let key = snapshot.value(&pk.name).cloned().unwrap_or_else(|| pk.default_value());
        if self.update
            && let Some(existing) = self.realm.store().find_first(&descriptor.table_name(), pk.key, &key)?
        {
            return Ok((existing, false));
        }
        Ok((self.realm.allocate_row(descriptor, Some(key))?, true))
    }

    // ========================================================================
    // Field writers
    // ========================================================================

    fn write_scalars(
        &mut self,
        descriptor: &SchemaDescriptor,
        row: RowKey,
        snapshot: &DetachedObject,
        fresh: bool,
    ) -> Result<()> {
        let table = descriptor.table_name();
        let compare = self.flags.check_same_values_before_set && !fresh;
        let store = self.realm.store_mut();

        for column in descriptor.columns() {
            if column.primary_key || !column.field_type.is_scalar() {
                continue;
            }
            let Some(value) = snapshot.value(&column.name) else {
                continue;
            };
            if value.is_null() && !column.nullable {
                return Err(DbError::NonNullableViolation {
                    field: column.name.clone(),
                });
            }
            // A value written as a default is rewritten so it becomes explicit.
            if compare
                && store.get_scalar(&table, row, column.key)? == *value
                && !store.is_default(&table, row, column.key)?
            {
                continue;
            }
            if value.is_null() {
                store.set_null(&table, row, column.key)?;
            } else {
                store.set_scalar(&table, row, column.key, value.clone(), false)?;
            }
        }
        Ok(())
    }

    fn copy_relations(&mut self, pending: Pending) -> Result<()> {
        let Pending {
            descriptor,
            row,
            source,
            fresh,
            depth,
        } = pending;
        let table = descriptor.table_name();

        for column in descriptor.columns() {
            let Some(field) = source.get(&column.name) else {
                continue;
            };
            match (column.field_type, field) {
                (FieldType::Scalar(_), _) => {}
                (FieldType::Object, FieldValue::Link(link)) => {
                    if column.target_embedded {
                        self.embed_one(&table, row, column, link.as_ref(), fresh, depth)?;
                    } else {
                        self.link_one(&table, row, column, link.as_ref(), fresh, depth)?;
                    }
                }
                (FieldType::List, FieldValue::List(items)) => {
                    if column.target_embedded {
                        self.embed_list(&table, row, column, items.as_deref(), fresh, depth)?;
                    } else {
                        self.link_list(&table, row, column, items.as_deref(), fresh, depth)?;
                    }
                }
                (FieldType::ScalarList(_), FieldValue::Values(values)) => {
                    let entries: Vec<ListEntry> = values
                        .iter()
                        .flatten()
                        .cloned()
                        .map(ListEntry::Value)
                        .collect();
                    self.write_list(&table, row, column, entries, fresh)?;
                }
                (field_type, _) => {
                    return Err(DbError::TypeMismatch(format!(
                        "Field '{}' of class '{}' expects a {} value",
                        column.name,
                        descriptor.class_name(),
                        field_type
                    )));
                }
            }
        }
        Ok(())
    }

    fn link_one(
        &mut self,
        table: &str,
        row: RowKey,
        column: &ColumnDetails,
        link: Option<&ObjectRef>,
        fresh: bool,
        depth: usize,
    ) -> Result<()> {
        let Some(source) = link else {
            return self.realm.store_mut().nullify_link(table, row, column.key);
        };
        let target = self.resolve(source, depth + 1)?;
        expect_class(column, &target.class_name)?;

        let store = self.realm.store_mut();
        if self.flags.check_same_values_before_set && !fresh && store.get_link(table, row, column.key)? == Some(target.row) {
            return Ok(());
        }
        store.set_link(table, row, column.key, target.row)
    }

    fn link_list(
        &mut self,
        table: &str,
        row: RowKey,
        column: &ColumnDetails,
        items: Option<&[ObjectRef]>,
        fresh: bool,
        depth: usize,
    ) -> Result<()> {
        let mut entries = Vec::new();
        for item in items.unwrap_or_default() {
            let target = self.resolve(item, depth + 1)?;
            expect_class(column, &target.class_name)?;
            entries.push(ListEntry::Row(target.row));
        }
        self.write_list(table, row, column, entries, fresh)
    }

    fn write_list(
        &mut self,
        table: &str,
        row: RowKey,
        column: &ColumnDetails,
        entries: Vec<ListEntry>,
        fresh: bool,
    ) -> Result<()> {
        let store = self.realm.store_mut();
        if self.flags.check_same_values_before_set && !fresh && list_entries(&*store, table, row, column)? == entries {
            return Ok(());
        }
        replace_list(store, table, row, column.key, entries)
    }

    // ========================================================================
    // Embedded objects
    // ========================================================================

    /// Reads the source of an embedded child and claims it for one parent slot.
    fn claim_embedded(&mut self, column: &ColumnDetails, source: &ObjectRef) -> Result<(SourceKey, DetachedObject)> {
        let key = SourceKey::from(source);
        if self.cache.contains(&key) {
            return Err(DbError::EmbeddedObjectAlreadyOwned);
        }
        let snapshot = self.reader.read(self.realm, &self.sources, source)?;
        expect_class(column, snapshot.class_name())?;
        Ok((key, snapshot))
    }

    fn populate_embedded(
        &mut self,
        key: SourceKey,
        snapshot: DetachedObject,
        row: RowKey,
        fresh: bool,
        depth: usize,
    ) -> Result<()> {
        let descriptor = self.realm.descriptor(snapshot.class_name())?;
        self.cache.insert(
            key,
            CopyTarget {
                class_name: descriptor.class_name().to_string(),
                row,
            },
            depth,
        );
        self.write_scalars(&descriptor, row, &snapshot, fresh)?;
        self.pending.push(Pending {
            descriptor,
            row,
            source: snapshot,
            fresh,
            depth,
        });
        Ok(())
    }

    fn embed_one(
        &mut self,
        table: &str,
        row: RowKey,
        column: &ColumnDetails,
        link: Option<&ObjectRef>,
        fresh: bool,
        depth: usize,
    ) -> Result<()> {
        let Some(source) = link else {
            return self.realm.store_mut().nullify_link(table, row, column.key);
        };
        self.reader.prefetch_local(self.realm, source)?;
        let (key, snapshot) = self.claim_embedded(column, source)?;

        let existing = if fresh {
            None
        } else {
            self.realm.store().get_link(table, row, column.key)?
        };
        let (child, child_fresh) = match existing {
            Some(child) => (child, false),
            None => (self.realm.store_mut().create_embedded_child(table, row, column.key)?, true),
        };
        self.populate_embedded(key, snapshot, child, child_fresh, depth + 1)
    }

    fn embed_list(
        &mut self,
        table: &str,
        row: RowKey,
        column: &ColumnDetails,
        items: Option<&[ObjectRef]>,
        fresh: bool,
        depth: usize,
    ) -> Result<()> {
        let items = items.unwrap_or_default();
        for item in items {
            self.reader.prefetch_local(self.realm, item)?;
        }

        let current = self.realm.store().list_size(table, row, column.key)?;
        if !fresh && current == items.len() {
            for (index, item) in items.iter().enumerate() {
                let (key, snapshot) = self.claim_embedded(column, item)?;
                let entry = self.realm.store().list_get(table, row, column.key, index)?;
                let child = entry.as_row().ok_or_else(|| {
                    DbError::TypeMismatch(format!("List '{}' does not hold objects", column.name))
                })?;
                self.populate_embedded(key, snapshot, child, false, depth + 1)?;
            }
            return Ok(());
        }

        self.realm.store_mut().list_remove_all(table, row, column.key)?;
        for item in items {
            let (key, snapshot) = self.claim_embedded(column, item)?;
            let child = self.realm.store_mut().create_embedded_child(table, row, column.key)?;
            self.populate_embedded(key, snapshot, child, true, depth + 1)?;
        }
        Ok(())
    }
}

/// Fails unless `class_name` is the class the relationship column points at.
pub(crate) fn expect_class(column: &ColumnDetails, class_name: &str) -> Result<()> {
    match column.link_target.as_deref() {
        Some(expected) if expected == class_name => Ok(()),
        expected => Err(DbError::TypeMismatch(format!(
            "Field '{}' expects objects of class '{}', got '{}'",
            column.name,
            expected.unwrap_or_default(),
            class_name
        ))),
    }
}

pub(crate) fn list_entries(
    store: &dyn RowStore,
    table: &str,
    row: RowKey,
    column: &ColumnDetails,
) -> Result<Vec<ListEntry>> {
    let size = store.list_size(table, row, column.key)?;
    (0..size).map(|index| store.list_get(table, row, column.key, index)).collect()
}
