use super::phase::{ConstructionPolicy, Phase};
use crate::copy::{self, CopyCache, ImportFlags, SourceSet};
use crate::core::{DbError, FieldType, Result, Value};
use crate::facade::Realm;
use crate::object::{DatabaseId, FieldValue, ManagedRef, ObjectRef};
use crate::schema::{ColumnDetails, SchemaDescriptor};
use crate::storage::{ListEntry, RowKey, RowStore, replace_list};
use chrono::{DateTime, Utc};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// How a write that passed the phase checks reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Skip,
    Default,
    Live,
}

impl WriteMode {
    fn is_default(self) -> bool {
        self == Self::Default
    }
}

/// A model object bound to a row of an open Realm.
///
/// Every operation takes the owning [`Realm`] explicitly and checks that the
/// object still belongs to it. Equality is row identity.
#[derive(Debug, Clone)]
pub struct ManagedObject {
    reference: ManagedRef,
    descriptor: Arc<SchemaDescriptor>,
    phase: Phase,
}

impl PartialEq for ManagedObject {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl Eq for ManagedObject {}

impl Hash for ManagedObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.reference.hash(state);
    }
}

impl From<&ManagedObject> for ObjectRef {
    fn from(object: &ManagedObject) -> Self {
        ObjectRef::Managed(object.reference.clone())
    }
}

impl ManagedObject {
    pub(crate) fn live(reference: ManagedRef, descriptor: Arc<SchemaDescriptor>) -> Self {
        Self {
            reference,
            descriptor,
            phase: Phase::Live,
        }
    }

    pub(crate) fn under_construction(
        reference: ManagedRef,
        descriptor: Arc<SchemaDescriptor>,
        policy: ConstructionPolicy,
    ) -> Self {
        Self {
            reference,
            descriptor,
            phase: Phase::UnderConstruction(policy),
        }
    }

    pub fn reference(&self) -> &ManagedRef {
        &self.reference
    }

    pub fn to_ref(&self) -> ObjectRef {
        ObjectRef::from(self)
    }

    pub fn class_name(&self) -> &str {
        &self.reference.class_name
    }

    pub fn row(&self) -> RowKey {
        self.reference.row
    }

    pub fn database(&self) -> DatabaseId {
        self.reference.database
    }

    pub fn descriptor(&self) -> &Arc<SchemaDescriptor> {
        &self.descriptor
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn finish_construction(&mut self) {
        if self.phase.is_under_construction() {
            self.phase = Phase::Live;
        }
    }

    pub fn invalidate(&mut self) {
        self.phase = Phase::Invalid;
    }

    // ========================================================================
    // Validity
    // ========================================================================

    pub fn ensure_valid(&self, realm: &Realm) -> Result<()> {
        if self.phase.is_invalid() {
            return Err(DbError::StaleObject(format!("{} was invalidated", self.reference)));
        }
        realm.ensure_open()?;
        if self.reference.database != realm.id() {
            return Err(DbError::CrossDatabaseReference(format!(
                "{} belongs to a different Realm",
                self.reference
            )));
        }
        let descriptor = self.current_descriptor(realm)?;
        if !realm.store().is_row_valid(&descriptor.table_name(), self.reference.row) {
            return Err(DbError::StaleObject(format!("{} has been deleted", self.reference)));
        }
        Ok(())
    }

    pub fn is_valid(&self, realm: &Realm) -> bool {
        self.ensure_valid(realm).is_ok()
    }

    /// Column handles of the schema generation the Realm is currently on.
    fn current_descriptor(&self, realm: &Realm) -> Result<Arc<SchemaDescriptor>> {
        if self.descriptor.generation() == realm.schema_generation() {
            Ok(Arc::clone(&self.descriptor))
        } else {
            realm.descriptor(self.class_name())
        }
    }

    fn column(&self, realm: &Realm, field: &str) -> Result<(Arc<SchemaDescriptor>, ColumnDetails)> {
        self.ensure_valid(realm)?;
        let descriptor = self.current_descriptor(realm)?;
        let column = descriptor.require(field)?.clone();
        Ok((descriptor, column))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Current value of a scalar field; `Value::Null` when absent.
    pub fn get(&self, realm: &Realm, field: &str) -> Result<Value> {
        let (descriptor, column) = self.column(realm, field)?;
        expect_kind(&column, column.field_type.is_scalar(), "scalar")?;
        let table = descriptor.table_name();
        let store = realm.store();
        if column.nullable && store.is_null(&table, self.row(), column.key)? {
            return Ok(Value::Null);
        }
        store.get_scalar(&table, self.row(), column.key)
    }

    fn typed<T>(
        &self,
        realm: &Realm,
        field: &str,
        expected: &str,
        convert: impl FnOnce(&Value) -> Option<T>,
    ) -> Result<Option<T>> {
        let value = self.get(realm, field)?;
        if value.is_null() {
            return Ok(None);
        }
        convert(&value).map(Some).ok_or_else(|| {
            DbError::TypeMismatch(format!(
                "Field '{}' holds {} which is not a valid {}",
                field,
                value.type_name(),
                expected
            ))
        })
    }

    pub fn get_string(&self, realm: &Realm, field: &str) -> Result<Option<String>> {
        self.typed(realm, field, "string", |v| v.as_str().map(str::to_string))
    }

    pub fn get_bool(&self, realm: &Realm, field: &str) -> Result<Option<bool>> {
        self.typed(realm, field, "boolean", Value::as_bool)
    }

    pub fn get_i8(&self, realm: &Realm, field: &str) -> Result<Option<i8>> {
        self.typed(realm, field, "i8", |v| v.as_i64().and_then(|n| i8::try_from(n).ok()))
    }

    pub fn get_i16(&self, realm: &Realm, field: &str) -> Result<Option<i16>> {
        self.typed(realm, field, "i16", |v| v.as_i64().and_then(|n| i16::try_from(n).ok()))
    }

    pub fn get_i32(&self, realm: &Realm, field: &str) -> Result<Option<i32>> {
        self.typed(realm, field, "i32", |v| v.as_i64().and_then(|n| i32::try_from(n).ok()))
    }

    pub fn get_i64(&self, realm: &Realm, field: &str) -> Result<Option<i64>> {
        self.typed(realm, field, "i64", Value::as_i64)
    }

    pub fn get_f32(&self, realm: &Realm, field: &str) -> Result<Option<f32>> {
        self.typed(realm, field, "float", Value::as_f32)
    }

    pub fn get_f64(&self, realm: &Realm, field: &str) -> Result<Option<f64>> {
        self.typed(realm, field, "double", Value::as_f64)
    }

    pub fn get_binary(&self, realm: &Realm, field: &str) -> Result<Option<Vec<u8>>> {
        self.typed(realm, field, "binary", |v| v.as_bytes().map(<[u8]>::to_vec))
    }

    pub fn get_date(&self, realm: &Realm, field: &str) -> Result<Option<DateTime<Utc>>> {
        self.typed(realm, field, "date", Value::as_date)
    }

    pub fn get_link(&self, realm: &Realm, field: &str) -> Result<Option<ManagedObject>> {
        let (descriptor, column) = self.column(realm, field)?;
        expect_kind(&column, column.field_type == FieldType::Object, "object")?;
        match realm.store().get_link(&descriptor.table_name(), self.row(), column.key)? {
            Some(row) => realm.object(target_class(&column)?, row).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_list(&self, realm: &Realm, field: &str) -> Result<Vec<ManagedObject>> {
        let (descriptor, column) = self.column(realm, field)?;
        expect_kind(&column, column.field_type == FieldType::List, "object list")?;
        let entries = copy::engine::list_entries(realm.store(), &descriptor.table_name(), self.row(), &column)?;
        let class_name = target_class(&column)?;
        entries
            .iter()
            .filter_map(ListEntry::as_row)
            .map(|row| realm.object(class_name, row))
            .collect()
    }

    pub fn get_values(&self, realm: &Realm, field: &str) -> Result<Vec<Value>> {
        let (descriptor, column) = self.column(realm, field)?;
        expect_kind(&column, matches!(column.field_type, FieldType::ScalarList(_)), "value list")?;
        let entries = copy::engine::list_entries(realm.store(), &descriptor.table_name(), self.row(), &column)?;
        Ok(entries.into_iter().filter_map(ListEntry::into_value).collect())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    fn write_mode(&self, realm: &Realm, column: &ColumnDetails) -> Result<WriteMode> {
        realm.ensure_in_write()?;
        match &self.phase {
            Phase::Invalid => Err(DbError::StaleObject(format!("{} was invalidated", self.reference))),
            Phase::UnderConstruction(_) if column.primary_key => Ok(WriteMode::Skip),
            Phase::UnderConstruction(policy) if !policy.admits(&column.name) => Ok(WriteMode::Skip),
            Phase::UnderConstruction(_) => Ok(WriteMode::Default),
            Phase::Live if column.primary_key => Err(DbError::ImmutableKey {
                field: column.name.clone(),
            }),
            Phase::Live => Ok(WriteMode::Live),
        }
    }

    /// Writes a scalar field. `Value::Null` clears a nullable field.
    pub fn set(&self, realm: &mut Realm, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let (descriptor, column) = self.column(realm, field)?;
        expect_kind(&column, column.field_type.is_scalar(), "scalar")?;
        let mode = self.write_mode(realm, &column)?;
        if mode == WriteMode::Skip {
            return Ok(());
        }

        let table = descriptor.table_name();
        if value.is_null() {
            if !column.nullable {
                return Err(DbError::NonNullableViolation { field: column.name });
            }
            return realm.store_mut().set_null(&table, self.row(), column.key);
        }
        realm
            .store_mut()
            .set_scalar(&table, self.row(), column.key, value, mode.is_default())
    }

    pub fn set_link(&self, realm: &mut Realm, field: &str, value: Option<&ObjectRef>) -> Result<()> {
        self.set_link_from(realm, field, value, SourceSet::new())
    }

    /// Like [`set_link`](Self::set_link), reading unmanaged values from `sources`.
    pub fn set_link_from(
        &self,
        realm: &mut Realm,
        field: &str,
        value: Option<&ObjectRef>,
        sources: SourceSet<'_>,
    ) -> Result<()> {
        let (descriptor, column) = self.column(realm, field)?;
        expect_kind(&column, column.field_type == FieldType::Object, "object")?;
        let mode = self.write_mode(realm, &column)?;
        if mode == WriteMode::Skip {
            return Ok(());
        }
        if column.target_embedded {
            return copy::assign_embedded(realm, sources, self, field, value, &mut CopyCache::new());
        }

        let table = descriptor.table_name();
        let Some(value) = value else {
            return realm.store_mut().nullify_link(&table, self.row(), column.key);
        };
        let target = self.link_target(realm, &column, value, mode, sources)?;
        realm.store_mut().set_link(&table, self.row(), column.key, target)
    }

    pub fn set_list(&self, realm: &mut Realm, field: &str, items: &[ObjectRef]) -> Result<()> {
        self.set_list_from(realm, field, items, SourceSet::new())
    }

    pub fn set_list_from(
        &self,
        realm: &mut Realm,
        field: &str,
        items: &[ObjectRef],
        sources: SourceSet<'_>,
    ) -> Result<()> {
        let (descriptor, column) = self.column(realm, field)?;
        expect_kind(&column, column.field_type == FieldType::List, "object list")?;
        let mode = self.write_mode(realm, &column)?;
        if mode == WriteMode::Skip {
            return Ok(());
        }
        if column.target_embedded {
            return copy::assign_embedded_list(realm, sources, self, field, items, &mut CopyCache::new());
        }

        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            entries.push(ListEntry::Row(self.link_target(realm, &column, item, mode, sources)?));
        }
        replace_list(realm.store_mut(), &descriptor.table_name(), self.row(), column.key, entries)
    }

    pub fn set_values(&self, realm: &mut Realm, field: &str, values: Vec<Value>) -> Result<()> {
        let (descriptor, column) = self.column(realm, field)?;
        expect_kind(&column, matches!(column.field_type, FieldType::ScalarList(_)), "value list")?;
        if self.write_mode(realm, &column)? == WriteMode::Skip {
            return Ok(());
        }
        let entries = values.into_iter().map(ListEntry::Value).collect();
        replace_list(realm.store_mut(), &descriptor.table_name(), self.row(), column.key, entries)
    }

    /// Writes any kind of field from its detached representation.
    pub fn set_field(&self, realm: &mut Realm, field: &str, value: FieldValue, sources: SourceSet<'_>) -> Result<()> {
        match value {
            FieldValue::Value(v) => self.set(realm, field, v),
            FieldValue::Link(link) => self.set_link_from(realm, field, link.as_ref(), sources),
            FieldValue::List(items) => self.set_list_from(realm, field, &items.unwrap_or_default(), sources),
            FieldValue::Values(values) => self.set_values(realm, field, values.unwrap_or_default()),
        }
    }

    /// Row a relationship write points at. Live objects only accept managed
    /// objects of this Realm; objects under construction copy unmanaged values in.
    fn link_target(
        &self,
        realm: &mut Realm,
        column: &ColumnDetails,
        value: &ObjectRef,
        mode: WriteMode,
        sources: SourceSet<'_>,
    ) -> Result<RowKey> {
        let (class_name, row) = match value {
            ObjectRef::Managed(managed) if managed.database == realm.id() => {
                let target = realm.object(&managed.class_name, managed.row)?;
                target.ensure_valid(realm)?;
                (managed.class_name.clone(), managed.row)
            }
            _ if mode == WriteMode::Live => {
                return Err(DbError::CrossDatabaseReference(format!(
                    "'{}' is not a valid managed object of this Realm",
                    column.name
                )));
            }
            _ => {
                let target_class = target_class(column)?;
                let update = realm.descriptor(target_class)?.primary_key().is_some();
                let copied =
                    copy::copy_or_update(realm, sources, value, update, ImportFlags::default(), &mut CopyCache::new())?;
                (copied.class_name().to_string(), copied.row())
            }
        };
        copy::engine::expect_class(column, &class_name)?;
        Ok(row)
    }
}

fn expect_kind(column: &ColumnDetails, matches: bool, expected: &str) -> Result<()> {
    if matches {
        Ok(())
    } else {
        Err(DbError::TypeMismatch(format!(
            "Field '{}' is a {} field, not a {} field",
            column.name, column.field_type, expected
        )))
    }
}

fn target_class(column: &ColumnDetails) -> Result<&str> {
    column
        .link_target
        .as_deref()
        .ok_or_else(|| DbError::TypeMismatch(format!("Field '{}' has no link target", column.name)))
}
