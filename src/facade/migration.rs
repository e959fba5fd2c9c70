use crate::core::{DbError, Result, Value};
use crate::schema::{ColumnDetails, ObjectSchema, Property, SchemaCatalog, SchemaDescriptor, init_table, table_name_for};
use crate::storage::{ColumnKey, ColumnSpec, InMemoryStore, RowKey, RowStore};
use std::collections::{HashMap, HashSet};
use tracing::{Level, event};

/// Changes the stored schema from inside a migration callback.
///
/// Every class the editor touches gets a mutable staging descriptor so field
/// names keep resolving to the right columns across renames; touched classes
/// are revalidated once the callback returns.
pub struct SchemaEditor<'a> {
    store: &'a mut InMemoryStore,
    catalog: &'a SchemaCatalog,
    staged: HashMap<String, SchemaDescriptor>,
    touched: HashSet<String>,
}

impl<'a> SchemaEditor<'a> {
    pub(crate) fn new(store: &'a mut InMemoryStore, catalog: &'a SchemaCatalog) -> Self {
        Self {
            store,
            catalog,
            staged: HashMap::new(),
            touched: HashSet::new(),
        }
    }

    /// Classes whose tables were changed.
    pub(crate) fn into_touched(self) -> HashSet<String> {
        self.touched
    }

    pub fn has_class(&self, class_name: &str) -> bool {
        self.store.has_table(&table_name_for(class_name))
    }

    fn staged(&mut self, class_name: &str) -> Result<&mut SchemaDescriptor> {
        if !self.staged.contains_key(class_name) {
            if !self.has_class(class_name) {
                return Err(DbError::ClassNotFound(class_name.to_string()));
            }
            let descriptor = match self.catalog.get(class_name) {
                Ok(current) if !self.touched.contains(class_name) => current.copy(true),
                _ => SchemaDescriptor::from_stored(&*self.store, class_name, self.catalog.generation())?,
            };
            self.staged.insert(class_name.to_string(), descriptor);
        }
        self.staged
            .get_mut(class_name)
            .ok_or_else(|| DbError::ClassNotFound(class_name.to_string()))
    }

    fn column(&mut self, class_name: &str, field: &str) -> Result<ColumnKey> {
        self.staged(class_name)?.column_key(field)
    }

    fn touch(&mut self, class_name: &str) {
        self.touched.insert(class_name.to_string());
    }

    // ========================================================================
    // Classes
    // ========================================================================

    pub fn add_class(&mut self, schema: ObjectSchema) -> Result<()> {
        schema.validate_definition()?;
        if self.has_class(&schema.class_name) {
            return Err(DbError::TableExists(schema.table_name()));
        }
        init_table(&mut *self.store, &schema)?;
        self.staged.remove(&schema.class_name);
        self.touch(&schema.class_name);
        event!(Level::DEBUG, class = %schema.class_name, "migration added class");
        Ok(())
    }

    /// Drops a class and all of its objects.
    pub fn remove_class(&mut self, class_name: &str) -> Result<()> {
        let table = table_name_for(class_name);
        for other in self.store.table_names() {
            if other == table {
                continue;
            }
            let referenced = self
                .store
                .column_specs(&other)?
                .iter()
                .any(|(_, spec)| spec.link_target.as_deref() == Some(table.as_str()));
            if referenced {
                return Err(DbError::ExecutionError(format!(
                    "Class '{}' is still referenced by table '{}'",
                    class_name, other
                )));
            }
        }
        self.store.drop_table(&table)?;
        self.staged.remove(class_name);
        self.touch(class_name);
        event!(Level::DEBUG, class = class_name, "migration removed class");
        Ok(())
    }

    // ========================================================================
    // Properties
    // ========================================================================

    pub fn add_property(&mut self, class_name: &str, property: Property) -> Result<()> {
        let table = table_name_for(class_name);
        self.staged(class_name)?;
        let link_target = property.link_target.as_deref().map(table_name_for);
        let target_embedded = match &link_target {
            Some(target) => self.store.is_embedded(target)?,
            None => false,
        };
        let mut spec = ColumnSpec::new(property.name.clone(), property.field_type, property.nullable);
        spec.link_target = link_target;
        spec.indexed = property.indexed || property.primary_key;

        let key = self.store.add_column(&table, spec)?;
        if property.primary_key {
            self.store.set_primary_key(&table, Some(key))?;
        }
        let staged = self.staged(class_name)?;
        staged.add_column(ColumnDetails {
            name: property.name.clone(),
            key,
            field_type: property.field_type,
            nullable: property.nullable,
            primary_key: property.primary_key,
            link_target: property.link_target.clone(),
            target_embedded,
        })?;
        if property.primary_key {
            staged.set_primary_key(Some(&property.name))?;
        }
        self.touch(class_name);
        Ok(())
    }

    pub fn remove_property(&mut self, class_name: &str, field: &str) -> Result<()> {
        let table = table_name_for(class_name);
        let key = self.column(class_name, field)?;
        if self.store.primary_key(&table)? == Some(key) {
            self.store.set_primary_key(&table, None)?;
        }
        self.store.remove_column(&table, key)?;
        self.staged(class_name)?.remove_column(field)?;
        self.touch(class_name);
        Ok(())
    }

    /// Renames a field; its column and data stay in place.
    pub fn rename_property(&mut self, class_name: &str, from: &str, to: &str) -> Result<()> {
        let key = self.column(class_name, from)?;
        self.store.rename_column(&table_name_for(class_name), key, to)?;
        self.staged(class_name)?.rename_column(from, to)?;
        self.touch(class_name);
        Ok(())
    }

    /// Makes a field required or nullable. Existing nulls become the type default.
    pub fn set_required(&mut self, class_name: &str, field: &str, required: bool) -> Result<()> {
        let key = self.column(class_name, field)?;
        self.store
            .set_column_nullable(&table_name_for(class_name), key, !required)?;
        self.staged(class_name)?.set_nullable(field, !required)?;
        self.touch(class_name);
        Ok(())
    }

    pub fn add_index(&mut self, class_name: &str, field: &str) -> Result<()> {
        let key = self.column(class_name, field)?;
        self.store.add_search_index(&table_name_for(class_name), key)?;
        self.touch(class_name);
        Ok(())
    }

    pub fn remove_index(&mut self, class_name: &str, field: &str) -> Result<()> {
        let key = self.column(class_name, field)?;
        self.store.remove_search_index(&table_name_for(class_name), key)?;
        self.touch(class_name);
        Ok(())
    }

    /// Moves the primary key to `field`, or removes it. Fails on duplicate values.
    pub fn set_primary_key(&mut self, class_name: &str, field: Option<&str>) -> Result<()> {
        let table = table_name_for(class_name);
        let key = match field {
            Some(name) => Some(self.column(class_name, name)?),
            None => None,
        };
        self.store.set_primary_key(&table, key)?;
        if let Some(key) = key {
            self.store.add_search_index(&table, key)?;
        }
        self.staged(class_name)?.set_primary_key(field)?;
        self.touch(class_name);
        Ok(())
    }

    // ========================================================================
    // Data
    // ========================================================================

    pub fn rows(&mut self, class_name: &str) -> Result<Vec<RowKey>> {
        self.staged(class_name)?;
        self.store.rows(&table_name_for(class_name))
    }

    pub fn get_value(&mut self, class_name: &str, row: RowKey, field: &str) -> Result<Value> {
        let key = self.column(class_name, field)?;
        self.store.get_scalar(&table_name_for(class_name), row, key)
    }

    pub fn set_value(&mut self, class_name: &str, row: RowKey, field: &str, value: impl Into<Value>) -> Result<()> {
        let key = self.column(class_name, field)?;
        let value = value.into();
        let table = table_name_for(class_name);
        if value.is_null() {
            self.store.set_null(&table, row, key)
        } else {
            self.store.set_scalar(&table, row, key, value, false)
        }
    }
}
