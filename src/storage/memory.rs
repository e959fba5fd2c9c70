use super::engine::{ColumnKey, ColumnSpec, ListEntry, RowKey, RowStore};
use super::table::{Cell, ParentSlot, Table};
use crate::core::{DbError, FieldType, Result, Value};
use crate::transaction::Change;
use std::collections::BTreeMap;
use tracing::{Level, event};

/// In-memory native store with an undo journal.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: BTreeMap<String, Table>,
    schema_version: u64,
    journal: Vec<Change>,
    recording: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a store from persisted tables.
    pub fn from_tables(tables: BTreeMap<String, Table>, schema_version: u64) -> Self {
        let tables = tables
            .into_iter()
            .map(|(name, mut table)| {
                table.rebuild_indexes();
                (name, table)
            })
            .collect();
        Self {
            tables,
            schema_version,
            journal: Vec::new(),
            recording: false,
        }
    }

    pub fn tables(&self) -> &BTreeMap<String, Table> {
        &self.tables
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    fn record(&mut self, change: Change) {
        if self.recording {
            self.journal.push(change);
        }
    }

    /// Applies a structural change, journaling the table as it was before.
    fn alter<T>(&mut self, table: &str, f: impl FnOnce(&mut Table) -> Result<T>) -> Result<T> {
        let previous = if self.recording {
            Some(Box::new(self.table(table)?.clone()))
        } else {
            None
        };
        let out = f(self.table_mut(table)?)?;
        if let Some(previous) = previous {
            self.record(Change::TableAltered { previous });
        }
        Ok(out)
    }

    fn write_cell(&mut self, table: &str, row: RowKey, column: ColumnKey, cell: Cell, is_default: bool) -> Result<()> {
        let (previous, was_default) = self.table_mut(table)?.put_cell(row, column, cell, is_default)?;
        self.record(Change::CellWritten {
            table: table.to_string(),
            row,
            column,
            previous,
            was_default,
        });
        Ok(())
    }

    fn spec(&self, table: &str, column: ColumnKey) -> Result<&ColumnSpec> {
        self.table(table)?.column(column)
    }

    /// Link target table of a link/list column and whether it holds embedded rows.
    fn link_target(&self, table: &str, column: ColumnKey) -> Result<(String, bool)> {
        let spec = self.spec(table, column)?;
        let target = spec.link_target.clone().ok_or_else(|| {
            DbError::TypeMismatch(format!("Field '{}' of '{}' is not a link column", spec.name, table))
        })?;
        let embedded = self.table(&target)?.is_embedded();
        Ok((target, embedded))
    }

    fn check_scalar(&self, table: &str, column: ColumnKey, value: Value) -> Result<Value> {
        let spec = self.spec(table, column)?;
        let FieldType::Scalar(dt) = spec.field_type else {
            return Err(DbError::TypeMismatch(format!(
                "Field '{}' of '{}' is a {}, not a scalar",
                spec.name, table, spec.field_type
            )));
        };
        if value.is_null() && !spec.nullable {
            return Err(DbError::NonNullableViolation {
                field: spec.name.clone(),
            });
        }
        let type_name = value.type_name();
        dt.coerce(value).ok_or_else(|| {
            DbError::TypeMismatch(format!("Field '{}' expects type {}, got {}", spec.name, dt, type_name))
        })
    }

    fn check_entry(&self, table: &str, column: ColumnKey, entry: ListEntry) -> Result<ListEntry> {
        let spec = self.spec(table, column)?;
        match (spec.field_type, entry) {
            (FieldType::List, ListEntry::Row(row)) => {
                let (target, _) = self.link_target(table, column)?;
                if !self.table(&target)?.contains_row(row) {
                    return Err(DbError::StaleObject(format!("{} no longer exists in table '{}'", row, target)));
                }
                Ok(ListEntry::Row(row))
            }
            (FieldType::ScalarList(dt), ListEntry::Value(value)) => {
                if value.is_null() && !spec.nullable {
                    return Err(DbError::NonNullableViolation {
                        field: spec.name.clone(),
                    });
                }
                let type_name = value.type_name();
                dt.coerce(value).map(ListEntry::Value).ok_or_else(|| {
                    DbError::TypeMismatch(format!("List '{}' holds {}, got {}", spec.name, dt, type_name))
                })
            }
            (field_type, _) => Err(DbError::TypeMismatch(format!(
                "Field '{}' of type {} does not accept this list entry",
                spec.name, field_type
            ))),
        }
    }

    fn ensure_embedded_free(&self, table: &str, column: ColumnKey) -> Result<()> {
        if self.link_target(table, column)?.1 {
            let name = self.spec(table, column)?.name.clone();
            return Err(DbError::ExecutionError(format!(
                "Field '{}' holds embedded objects; they can only be created through their parent",
                name
            )));
        }
        Ok(())
    }

    /// Removes every link and list entry pointing at `row` of `target`.
    fn unlink_incoming(&mut self, target: &str, row: RowKey) -> Result<()> {
        let mut incoming = Vec::new();
        for (name, table) in &self.tables {
            for (column, spec) in table.columns() {
                if spec.link_target.as_deref() == Some(target) {
                    for source in table.referencing_rows(column, row) {
                        incoming.push((name.clone(), source, column));
                    }
                }
            }
        }

        for (table, source, column) in incoming {
            match self.table(&table)?.cell(source, column)?.clone() {
                Cell::Link(_) => self.write_cell(&table, source, column, Cell::Link(None), false)?,
                Cell::List(entries) => {
                    for index in (0..entries.len()).rev() {
                        if entries[index] == ListEntry::Row(row) {
                            let previous = self.table_mut(&table)?.list_mut(source, column)?.remove(index);
                            self.record(Change::ListItemRemoved {
                                table: table.clone(),
                                row: source,
                                column,
                                index,
                                previous,
                            });
                        }
                    }
                }
                Cell::Value(_) => {}
            }
        }
        Ok(())
    }
}

impl RowStore for InMemoryStore {
    fn begin_recording(&mut self) {
        self.journal.clear();
        self.recording = true;
    }

    fn take_changes(&mut self) -> Vec<Change> {
        self.recording = false;
        std::mem::take(&mut self.journal)
    }

    fn pending_changes(&self) -> &[Change] {
        &self.journal
    }

    fn rollback(&mut self) -> Result<usize> {
        let changes = self.take_changes();
        let count = changes.len();
        for change in changes.into_iter().rev() {
            change.undo(&mut self.tables)?;
        }
        event!(Level::DEBUG, reverted = count, "rolled back native store");
        Ok(count)
    }

    fn schema_version(&self) -> u64 {
        self.schema_version
    }

    fn set_schema_version(&mut self, version: u64) {
        self.schema_version = version;
    }

    fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    fn create_table(&mut self, table: &str, embedded: bool) -> Result<()> {
        if self.tables.contains_key(table) {
            return Err(DbError::TableExists(table.to_string()));
        }
        self.tables.insert(table.to_string(), Table::new(table, embedded));
        self.record(Change::TableCreated {
            table: table.to_string(),
        });
        Ok(())
    }

    fn drop_table(&mut self, table: &str) -> Result<()> {
        let dropped = self
            .tables
            .remove(table)
            .ok_or_else(|| DbError::TableNotFound(table.to_string()))?;
        self.record(Change::TableDropped {
            table: Box::new(dropped),
        });
        Ok(())
    }

    fn is_embedded(&self, table: &str) -> Result<bool> {
        Ok(self.table(table)?.is_embedded())
    }

    fn add_column(&mut self, table: &str, spec: ColumnSpec) -> Result<ColumnKey> {
        if let Some(target) = &spec.link_target
            && !self.tables.contains_key(target)
        {
            return Err(DbError::TableNotFound(target.clone()));
        }
        self.alter(table, |t| t.add_column(spec))
    }

    fn remove_column(&mut self, table: &str, column: ColumnKey) -> Result<()> {
        self.alter(table, |t| t.remove_column(column).map(|_| ()))
    }

    fn rename_column(&mut self, table: &str, column: ColumnKey, name: &str) -> Result<()> {
        if self.table(table)?.find_column(name).is_some() {
            return Err(DbError::ExecutionError(format!(
                "Column '{}' already exists in table '{}'",
                name, table
            )));
        }
        self.alter(table, |t| {
            t.column_mut(column)?.name = name.to_string();
            Ok(())
        })
    }

    fn set_column_nullable(&mut self, table: &str, column: ColumnKey, nullable: bool) -> Result<()> {
        self.alter(table, |t| t.set_nullable(column, nullable))
    }

    fn set_primary_key(&mut self, table: &str, column: Option<ColumnKey>) -> Result<()> {
        self.alter(table, |t| t.set_primary_key(column))
    }

    fn primary_key(&self, table: &str) -> Result<Option<ColumnKey>> {
        Ok(self.table(table)?.primary_key())
    }

    fn add_search_index(&mut self, table: &str, column: ColumnKey) -> Result<()> {
        self.alter(table, |t| t.set_indexed(column, true))
    }

    fn remove_search_index(&mut self, table: &str, column: ColumnKey) -> Result<()> {
        self.alter(table, |t| t.set_indexed(column, false))
    }

    fn column_specs(&self, table: &str) -> Result<Vec<(ColumnKey, ColumnSpec)>> {
        Ok(self
            .table(table)?
            .columns()
            .map(|(k, spec)| (k, spec.clone()))
            .collect())
    }

    fn column_spec(&self, table: &str, column: ColumnKey) -> Result<ColumnSpec> {
        self.spec(table, column).cloned()
    }

    fn resolve_column(&self, table: &str, name: &str) -> Option<ColumnKey> {
        self.tables.get(table).and_then(|t| t.find_column(name))
    }

    fn column_count(&self, table: &str) -> Result<usize> {
        Ok(self.table(table)?.column_count())
    }

    fn create_row(&mut self, table: &str) -> Result<RowKey> {
        let t = self.table_mut(table)?;
        if t.is_embedded() {
            return Err(DbError::ExecutionError(format!(
                "Embedded objects of '{}' can only be created through their parent",
                table
            )));
        }
        let row = t.allocate_row(None);
        self.record(Change::RowCreated {
            table: table.to_string(),
            row,
        });
        Ok(row)
    }

    fn create_row_with_key(&mut self, table: &str, column: ColumnKey, key: Value) -> Result<RowKey> {
        let key = self.check_scalar(table, column, key)?;
        if self.table(table)?.find_first(column, &key).is_some() {
            return Err(DbError::DuplicateKey {
                class: table.to_string(),
                key: key.to_string(),
            });
        }
        let row = self.create_row(table)?;
        self.write_cell(table, row, column, Cell::Value(key), false)?;
        Ok(row)
    }

    fn create_embedded_child(&mut self, table: &str, parent: RowKey, column: ColumnKey) -> Result<RowKey> {
        let (target, embedded) = self.link_target(table, column)?;
        if !embedded {
            return Err(DbError::ExecutionError(format!(
                "Table '{}' does not hold embedded objects",
                target
            )));
        }
        let previous = self.table(table)?.cell(parent, column)?.clone();

        if let Cell::Link(Some(old)) = previous {
            self.delete_row(&target, old)?;
        }

        let slot = ParentSlot {
            table: table.to_string(),
            row: parent,
            column,
        };
        let child = self.table_mut(&target)?.allocate_row(Some(slot));
        self.record(Change::RowCreated {
            table: target.clone(),
            row: child,
        });

        match previous {
            Cell::List(_) => {
                self.table_mut(table)?
                    .list_mut(parent, column)?
                    .push(ListEntry::Row(child));
                self.record(Change::ListItemAppended {
                    table: table.to_string(),
                    row: parent,
                    column,
                });
            }
            _ => self.write_cell(table, parent, column, Cell::Link(Some(child)), false)?,
        }
        Ok(child)
    }

    fn delete_row(&mut self, table: &str, row: RowKey) -> Result<()> {
        let mut pending = vec![(table.to_string(), row)];
        while let Some((table, row)) = pending.pop() {
            if !self.table(&table)?.contains_row(row) {
                continue;
            }

            let mut children = Vec::new();
            for (column, spec) in self.table(&table)?.columns() {
                let Some(target) = &spec.link_target else {
                    continue;
                };
                if !self.table(target)?.is_embedded() {
                    continue;
                }
                match self.table(&table)?.cell(row, column)? {
                    Cell::Link(Some(child)) => children.push((target.clone(), *child)),
                    Cell::List(entries) => {
                        children.extend(entries.iter().filter_map(|e| e.as_row()).map(|r| (target.clone(), r)))
                    }
                    _ => {}
                }
            }

            self.unlink_incoming(&table, row)?;
            if let Some(data) = self.table_mut(&table)?.remove_row(row) {
                self.record(Change::RowDeleted {
                    table: table.clone(),
                    row,
                    data,
                });
            }
            pending.extend(children);
        }
        Ok(())
    }

    fn is_row_valid(&self, table: &str, row: RowKey) -> bool {
        self.tables.get(table).is_some_and(|t| t.contains_row(row))
    }

    fn rows(&self, table: &str) -> Result<Vec<RowKey>> {
        Ok(self.table(table)?.row_keys())
    }

    fn row_count(&self, table: &str) -> Result<usize> {
        Ok(self.table(table)?.row_count())
    }

    fn find_first(&self, table: &str, column: ColumnKey, key: &Value) -> Result<Option<RowKey>> {
        let t = self.table(table)?;
        let key = match t.column(column)?.field_type {
            FieldType::Scalar(dt) => dt.coerce(key.clone()).unwrap_or_else(|| key.clone()),
            _ => key.clone(),
        };
        Ok(t.find_first(column, &key))
    }

    fn get_scalar(&self, table: &str, row: RowKey, column: ColumnKey) -> Result<Value> {
        match self.table(table)?.cell(row, column)? {
            Cell::Value(v) => Ok(v.clone()),
            _ => Err(DbError::TypeMismatch(format!("Column {} of '{}' is not a scalar", column, table))),
        }
    }

    fn set_scalar(&mut self, table: &str, row: RowKey, column: ColumnKey, value: Value, is_default: bool) -> Result<()> {
        let value = self.check_scalar(table, column, value)?;
        let t = self.table(table)?;
        if t.primary_key() == Some(column)
            && let Some(existing) = t.find_first(column, &value)
            && existing != row
        {
            return Err(DbError::DuplicateKey {
                class: table.to_string(),
                key: value.to_string(),
            });
        }
        self.write_cell(table, row, column, Cell::Value(value), is_default)
    }

    fn is_default(&self, table: &str, row: RowKey, column: ColumnKey) -> Result<bool> {
        self.table(table)?.is_default(row, column)
    }

    fn is_null(&self, table: &str, row: RowKey, column: ColumnKey) -> Result<bool> {
        Ok(matches!(
            self.table(table)?.cell(row, column)?,
            Cell::Value(Value::Null) | Cell::Link(None)
        ))
    }

    fn set_null(&mut self, table: &str, row: RowKey, column: ColumnKey) -> Result<()> {
        match self.spec(table, column)?.field_type {
            FieldType::Scalar(_) => self.set_scalar(table, row, column, Value::Null, false),
            FieldType::Object => self.nullify_link(table, row, column),
            FieldType::List | FieldType::ScalarList(_) => Err(DbError::TypeMismatch(format!(
                "List column {} of '{}' cannot be set to null",
                column, table
            ))),
        }
    }

    fn get_link(&self, table: &str, row: RowKey, column: ColumnKey) -> Result<Option<RowKey>> {
        match self.table(table)?.cell(row, column)? {
            Cell::Link(target) => Ok(*target),
            _ => Err(DbError::TypeMismatch(format!("Column {} of '{}' is not a link", column, table))),
        }
    }

    fn set_link(&mut self, table: &str, row: RowKey, column: ColumnKey, target: RowKey) -> Result<()> {
        if self.spec(table, column)?.field_type != FieldType::Object {
            return Err(DbError::TypeMismatch(format!("Column {} of '{}' is not a link", column, table)));
        }
        self.ensure_embedded_free(table, column)?;
        let (target_table, _) = self.link_target(table, column)?;
        if !self.table(&target_table)?.contains_row(target) {
            return Err(DbError::StaleObject(format!(
                "{} no longer exists in table '{}'",
                target, target_table
            )));
        }
        self.write_cell(table, row, column, Cell::Link(Some(target)), false)
    }

    fn nullify_link(&mut self, table: &str, row: RowKey, column: ColumnKey) -> Result<()> {
        let current = self.get_link(table, row, column)?;
        let (target, embedded) = self.link_target(table, column)?;
        match current {
            // Deleting the child also clears the slot
            Some(child) if embedded => self.delete_row(&target, child),
            Some(_) => self.write_cell(table, row, column, Cell::Link(None), false),
            None => Ok(()),
        }
    }

    fn list_size(&self, table: &str, row: RowKey, column: ColumnKey) -> Result<usize> {
        match self.table(table)?.cell(row, column)? {
            Cell::List(entries) => Ok(entries.len()),
            _ => Err(DbError::TypeMismatch(format!("Column {} of '{}' is not a list", column, table))),
        }
    }

    fn list_get(&self, table: &str, row: RowKey, column: ColumnKey, index: usize) -> Result<ListEntry> {
        match self.table(table)?.cell(row, column)? {
            Cell::List(entries) => entries.get(index).cloned().ok_or_else(|| {
                DbError::ExecutionError(format!("List index {} out of bounds ({})", index, entries.len()))
            }),
            _ => Err(DbError::TypeMismatch(format!("Column {} of '{}' is not a list", column, table))),
        }
    }

    fn list_set(&mut self, table: &str, row: RowKey, column: ColumnKey, index: usize, entry: ListEntry) -> Result<()> {
        if self.spec(table, column)?.field_type == FieldType::List {
            self.ensure_embedded_free(table, column)?;
        }
        let entry = self.check_entry(table, column, entry)?;
        let list = self.table_mut(table)?.list_mut(row, column)?;
        let len = list.len();
        let slot = list
            .get_mut(index)
            .ok_or_else(|| DbError::ExecutionError(format!("List index {} out of bounds ({})", index, len)))?;
        let previous = std::mem::replace(slot, entry);
        self.record(Change::ListItemSet {
            table: table.to_string(),
            row,
            column,
            index,
            previous,
        });
        Ok(())
    }

    fn list_append(&mut self, table: &str, row: RowKey, column: ColumnKey, entry: ListEntry) -> Result<()> {
        if self.spec(table, column)?.field_type == FieldType::List {
            self.ensure_embedded_free(table, column)?;
        }
        let entry = self.check_entry(table, column, entry)?;
        self.table_mut(table)?.list_mut(row, column)?.push(entry);
        self.record(Change::ListItemAppended {
            table: table.to_string(),
            row,
            column,
        });
        Ok(())
    }

    fn list_remove_all(&mut self, table: &str, row: RowKey, column: ColumnKey) -> Result<()> {
        if self.spec(table, column)?.field_type == FieldType::List {
            let (target, embedded) = self.link_target(table, column)?;
            if embedded {
                let children: Vec<RowKey> = self
                    .table_mut(table)?
                    .list_mut(row, column)?
                    .iter()
                    .filter_map(|e| e.as_row())
                    .collect();
                for child in children {
                    self.delete_row(&target, child)?;
                }
                return Ok(());
            }
        }

        let list = self.table_mut(table)?.list_mut(row, column)?;
        if list.is_empty() {
            return Ok(());
        }
        let previous = std::mem::take(list);
        self.record(Change::ListCleared {
            table: table.to_string(),
            row,
            column,
            previous,
        });
        Ok(())
    }
}
