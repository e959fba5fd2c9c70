use super::object_schema::{ObjectSchema, Property, class_name_for};
use crate::core::{DbError, FieldType, Result, Value};
use crate::storage::{ColumnKey, RowStore};
use std::collections::HashMap;
use std::sync::Arc;

/// A declared field bound to its native column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDetails {
    pub name: String,
    pub key: ColumnKey,
    pub field_type: FieldType,
    pub nullable: bool,
    pub primary_key: bool,
    /// Referenced class for object and list fields.
    pub link_target: Option<String>,
    pub target_embedded: bool,
}

impl ColumnDetails {
    pub fn is_embedded_link(&self) -> bool {
        self.field_type.is_link() && self.target_embedded
    }

    /// Value a fresh row holds in this column.
    pub fn default_value(&self) -> Value {
        match self.field_type {
            FieldType::Scalar(data_type) if !self.nullable => data_type.default_value(),
            _ => Value::Null,
        }
    }
}

/// Per-class mapping from field name to column handle, valid for one schema
/// generation of an open Realm.
///
/// Built by validation and immutable afterwards. Migrations work on a
/// mutable staging copy obtained through [`SchemaDescriptor::copy`]; the
/// class metadata itself is shared between copies.
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    schema: Arc<ObjectSchema>,
    columns: Vec<ColumnDetails>,
    by_name: HashMap<String, usize>,
    mutable: bool,
    generation: u64,
}

impl SchemaDescriptor {
    pub(crate) fn new(schema: Arc<ObjectSchema>, columns: Vec<ColumnDetails>, generation: u64) -> Self {
        let by_name = index_by_name(&columns);
        Self {
            schema,
            columns,
            by_name,
            mutable: false,
            generation,
        }
    }

    /// Describes a table as it is currently stored, for classes that are
    /// being migrated and may not match any declared schema.
    pub fn from_stored(store: &dyn RowStore, class_name: &str, generation: u64) -> Result<Self> {
        let table = super::object_schema::table_name_for(class_name);
        let primary_key = store.primary_key(&table)?;
        let mut schema = ObjectSchema::new(class_name);
        schema.embedded = store.is_embedded(&table)?;
        let mut columns = Vec::new();

        for (key, spec) in store.column_specs(&table)? {
            let link_target = spec.link_target.as_deref().map(|t| class_name_for(t).to_string());
            let target_embedded = match &spec.link_target {
                Some(t) => store.is_embedded(t)?,
                None => false,
            };
            schema.properties.push(Property {
                name: spec.name.clone(),
                field_type: spec.field_type,
                nullable: spec.nullable,
                primary_key: primary_key == Some(key),
                indexed: spec.indexed,
                link_target: link_target.clone(),
                default_value: None,
            });
            columns.push(ColumnDetails {
                name: spec.name,
                key,
                field_type: spec.field_type,
                nullable: spec.nullable,
                primary_key: primary_key == Some(key),
                link_target,
                target_embedded,
            });
        }

        let mut descriptor = Self::new(Arc::new(schema), columns, generation);
        descriptor.mutable = true;
        Ok(descriptor)
    }

    /// Structural copy sharing the class metadata.
    pub fn copy(&self, mutable: bool) -> Self {
        Self {
            schema: Arc::clone(&self.schema),
            columns: self.columns.clone(),
            by_name: self.by_name.clone(),
            mutable,
            generation: self.generation,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.schema.class_name
    }

    pub fn table_name(&self) -> String {
        self.schema.table_name()
    }

    pub fn schema(&self) -> &Arc<ObjectSchema> {
        &self.schema
    }

    pub fn is_embedded(&self) -> bool {
        self.schema.embedded
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn columns(&self) -> &[ColumnDetails] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDetails> {
        self.by_name.get(name).map(|&i| &self.columns[i])
    }

    pub fn require(&self, name: &str) -> Result<&ColumnDetails> {
        self.column(name)
            .ok_or_else(|| DbError::FieldNotFound(name.to_string(), self.class_name().to_string()))
    }

    pub fn column_key(&self, name: &str) -> Result<ColumnKey> {
        self.require(name).map(|c| c.key)
    }

    pub fn primary_key(&self) -> Option<&ColumnDetails> {
        self.columns.iter().find(|c| c.primary_key)
    }

    // ========================================================================
    // Patching (staging copies only)
    // ========================================================================

    fn ensure_mutable(&self) -> Result<()> {
        if !self.mutable {
            return Err(DbError::ExecutionError(format!(
                "Schema descriptor of '{}' is immutable",
                self.class_name()
            )));
        }
        Ok(())
    }

    pub fn add_column(&mut self, details: ColumnDetails) -> Result<()> {
        self.ensure_mutable()?;
        if self.by_name.contains_key(&details.name) {
            return Err(DbError::ExecutionError(format!(
                "Field '{}' already exists in class '{}'",
                details.name,
                self.class_name()
            )));
        }
        self.by_name.insert(details.name.clone(), self.columns.len());
        self.columns.push(details);
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Result<ColumnDetails> {
        self.ensure_mutable()?;
        let index = self
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| DbError::FieldNotFound(name.to_string(), self.class_name().to_string()))?;
        let removed = self.columns.remove(index);
        self.by_name = index_by_name(&self.columns);
        Ok(removed)
    }

    /// Renames a field, keeping its column handle.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        self.ensure_mutable()?;
        let index = self
            .by_name
            .remove(from)
            .ok_or_else(|| DbError::FieldNotFound(from.to_string(), self.class_name().to_string()))?;
        self.columns[index].name = to.to_string();
        self.by_name.insert(to.to_string(), index);
        Ok(())
    }

    pub fn set_nullable(&mut self, name: &str, nullable: bool) -> Result<()> {
        self.ensure_mutable()?;
        let index = self
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| DbError::FieldNotFound(name.to_string(), self.class_name().to_string()))?;
        self.columns[index].nullable = nullable;
        Ok(())
    }

    pub fn set_primary_key(&mut self, name: Option<&str>) -> Result<()> {
        self.ensure_mutable()?;
        if let Some(name) = name
            && !self.by_name.contains_key(name)
        {
            return Err(DbError::FieldNotFound(name.to_string(), self.class_name().to_string()));
        }
        for column in &mut self.columns {
            column.primary_key = Some(column.name.as_str()) == name;
        }
        Ok(())
    }
}

fn index_by_name(columns: &[ColumnDetails]) -> HashMap<String, usize> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.name.clone(), i))
        .collect()
}
