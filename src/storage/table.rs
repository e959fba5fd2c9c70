use super::engine::{ColumnKey, ColumnSpec, ListEntry, RowKey};
use crate::core::{DbError, FieldType, Result, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Content of a single cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    Value(Value),
    Link(Option<RowKey>),
    List(Vec<ListEntry>),
}

impl Cell {
    /// Cell content of a freshly created row.
    pub fn initial(spec: &ColumnSpec) -> Self {
        match spec.field_type {
            FieldType::Scalar(_) if spec.nullable => Cell::Value(Value::Null),
            FieldType::Scalar(dt) => Cell::Value(dt.default_value()),
            FieldType::Object => Cell::Link(None),
            FieldType::List | FieldType::ScalarList(_) => Cell::List(Vec::new()),
        }
    }
}

/// The link slot owning an embedded row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentSlot {
    pub table: String,
    pub row: RowKey,
    pub column: ColumnKey,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowData {
    pub cells: BTreeMap<ColumnKey, Cell>,
    /// Columns whose current value was written as a default.
    pub defaults: BTreeSet<ColumnKey>,
    pub parent: Option<ParentSlot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    name: String,
    embedded: bool,
    columns: BTreeMap<ColumnKey, ColumnSpec>,
    next_column: u32,
    primary_key: Option<ColumnKey>,
    rows: BTreeMap<RowKey, RowData>,
    next_row: u64,
    /// Value lookup for indexed and primary key columns, rebuilt after load.
    #[serde(skip)]
    indexes: HashMap<ColumnKey, HashMap<Value, BTreeSet<RowKey>>>,
}

impl Table {
    pub fn new(name: impl Into<String>, embedded: bool) -> Self {
        Self {
            name: name.into(),
            embedded,
            columns: BTreeMap::new(),
            next_column: 0,
            primary_key: None,
            rows: BTreeMap::new(),
            next_row: 0,
            indexes: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_embedded(&self) -> bool {
        self.embedded
    }

    // ========================================================================
    // Columns
    // ========================================================================

    pub fn columns(&self) -> impl Iterator<Item = (ColumnKey, &ColumnSpec)> {
        self.columns.iter().map(|(k, s)| (*k, s))
    }

    pub fn column(&self, key: ColumnKey) -> Result<&ColumnSpec> {
        self.columns
            .get(&key)
            .ok_or_else(|| DbError::ExecutionError(format!("Column {} not found in table '{}'", key, self.name)))
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn find_column(&self, name: &str) -> Option<ColumnKey> {
        self.columns
            .iter()
            .find(|(_, spec)| spec.name == name)
            .map(|(key, _)| *key)
    }

    pub fn add_column(&mut self, spec: ColumnSpec) -> Result<ColumnKey> {
        if self.find_column(&spec.name).is_some() {
            return Err(DbError::ExecutionError(format!(
                "Column '{}' already exists in table '{}'",
                spec.name, self.name
            )));
        }

        let key = ColumnKey(self.next_column);
        self.next_column += 1;

        let initial = Cell::initial(&spec);
        for data in self.rows.values_mut() {
            data.cells.insert(key, initial.clone());
        }
        let indexed = spec.indexed;
        self.columns.insert(key, spec);
        if indexed {
            self.build_index(key);
        }
        Ok(key)
    }

    pub fn remove_column(&mut self, key: ColumnKey) -> Result<ColumnSpec> {
        let spec = self
            .columns
            .remove(&key)
            .ok_or_else(|| DbError::ExecutionError(format!("Column {} not found in table '{}'", key, self.name)))?;
        for data in self.rows.values_mut() {
            data.cells.remove(&key);
            data.defaults.remove(&key);
        }
        if self.primary_key == Some(key) {
            self.primary_key = None;
        }
        self.indexes.remove(&key);
        Ok(spec)
    }

    pub fn column_mut(&mut self, key: ColumnKey) -> Result<&mut ColumnSpec> {
        let name = self.name.clone();
        self.columns
            .get_mut(&key)
            .ok_or_else(|| DbError::ExecutionError(format!("Column {} not found in table '{}'", key, name)))
    }

    /// Changes nullability. Nulls in a column made required fall back to the type default.
    pub fn set_nullable(&mut self, key: ColumnKey, nullable: bool) -> Result<()> {
        let field_type = {
            let spec = self.column_mut(key)?;
            spec.nullable = nullable;
            spec.field_type
        };
        if let (false, FieldType::Scalar(dt)) = (nullable, field_type) {
            for data in self.rows.values_mut() {
                if let Some(Cell::Value(v)) = data.cells.get_mut(&key)
                    && v.is_null()
                {
                    *v = dt.default_value();
                }
            }
            if self.indexes.contains_key(&key) {
                self.build_index(key);
            }
        }
        Ok(())
    }

    pub fn primary_key(&self) -> Option<ColumnKey> {
        self.primary_key
    }

    pub fn set_primary_key(&mut self, key: Option<ColumnKey>) -> Result<()> {
        if let Some(column) = key {
            let spec = self.column(column)?;
            if !matches!(spec.field_type, FieldType::Scalar(_)) {
                return Err(DbError::TypeMismatch(format!(
                    "Field '{}' of type {} cannot be a primary key",
                    spec.name, spec.field_type
                )));
            }
            let mut seen = HashSet::new();
            for data in self.rows.values() {
                if let Some(Cell::Value(v)) = data.cells.get(&column)
                    && !seen.insert(v.clone())
                {
                    return Err(DbError::DuplicateKey {
                        class: self.name.clone(),
                        key: v.to_string(),
                    });
                }
            }
            self.build_index(column);
        }
        if let Some(old) = self.primary_key
            && Some(old) != key
            && !self.columns.get(&old).is_some_and(|s| s.indexed)
        {
            self.indexes.remove(&old);
        }
        self.primary_key = key;
        Ok(())
    }

    pub fn set_indexed(&mut self, key: ColumnKey, indexed: bool) -> Result<()> {
        self.column_mut(key)?.indexed = indexed;
        if indexed {
            self.build_index(key);
        } else if self.primary_key != Some(key) {
            self.indexes.remove(&key);
        }
        Ok(())
    }

    // ========================================================================
    // Rows
    // ========================================================================

    pub fn row_keys(&self) -> Vec<RowKey> {
        self.rows.keys().copied().collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn contains_row(&self, row: RowKey) -> bool {
        self.rows.contains_key(&row)
    }

    pub fn row(&self, row: RowKey) -> Result<&RowData> {
        self.rows
            .get(&row)
            .ok_or_else(|| DbError::StaleObject(format!("{} no longer exists in table '{}'", row, self.name)))
    }

    /// Allocates a new row with every cell at its initial content.
    pub fn allocate_row(&mut self, parent: Option<ParentSlot>) -> RowKey {
        let key = RowKey(self.next_row);
        self.next_row += 1;
        let cells = self
            .columns
            .iter()
            .map(|(k, spec)| (*k, Cell::initial(spec)))
            .collect();
        self.insert_row_data(
            key,
            RowData {
                cells,
                defaults: BTreeSet::new(),
                parent,
            },
        );
        key
    }

    pub fn insert_row_data(&mut self, row: RowKey, data: RowData) {
        for (column, index) in self.indexes.iter_mut() {
            if let Some(Cell::Value(v)) = data.cells.get(column) {
                index.entry(v.clone()).or_default().insert(row);
            }
        }
        self.next_row = self.next_row.max(row.0 + 1);
        self.rows.insert(row, data);
    }

    pub fn remove_row(&mut self, row: RowKey) -> Option<RowData> {
        let data = self.rows.remove(&row)?;
        for (column, index) in self.indexes.iter_mut() {
            if let Some(Cell::Value(v)) = data.cells.get(column)
                && let Some(rows) = index.get_mut(v)
            {
                rows.remove(&row);
                if rows.is_empty() {
                    index.remove(v);
                }
            }
        }
        Some(data)
    }

    pub fn cell(&self, row: RowKey, column: ColumnKey) -> Result<&Cell> {
        self.row(row)?
            .cells
            .get(&column)
            .ok_or_else(|| DbError::ExecutionError(format!("Column {} not found in table '{}'", column, self.name)))
    }

    /// Replaces a cell, returning the previous content and default flag.
    pub fn put_cell(&mut self, row: RowKey, column: ColumnKey, cell: Cell, is_default: bool) -> Result<(Cell, bool)> {
        let table = self.name.clone();
        let data = self
            .rows
            .get_mut(&row)
            .ok_or_else(|| DbError::StaleObject(format!("{} no longer exists in table '{}'", row, table)))?;
        let slot = data
            .cells
            .get_mut(&column)
            .ok_or_else(|| DbError::ExecutionError(format!("Column {} not found in table '{}'", column, table)))?;
        let previous = std::mem::replace(slot, cell.clone());
        let was_default = if is_default {
            !data.defaults.insert(column)
        } else {
            data.defaults.remove(&column)
        };

        if let Some(index) = self.indexes.get_mut(&column) {
            if let Cell::Value(old) = &previous
                && let Some(rows) = index.get_mut(old)
            {
                rows.remove(&row);
                if rows.is_empty() {
                    index.remove(old);
                }
            }
            if let Cell::Value(new) = cell {
                index.entry(new).or_default().insert(row);
            }
        }
        Ok((previous, was_default))
    }

    pub fn list_mut(&mut self, row: RowKey, column: ColumnKey) -> Result<&mut Vec<ListEntry>> {
        let table = self.name.clone();
        let data = self
            .rows
            .get_mut(&row)
            .ok_or_else(|| DbError::StaleObject(format!("{} no longer exists in table '{}'", row, table)))?;
        match data.cells.get_mut(&column) {
            Some(Cell::List(entries)) => Ok(entries),
            Some(_) => Err(DbError::TypeMismatch(format!("Column {} of '{}' is not a list", column, table))),
            None => Err(DbError::ExecutionError(format!("Column {} not found in table '{}'", column, table))),
        }
    }

    pub fn is_default(&self, row: RowKey, column: ColumnKey) -> Result<bool> {
        Ok(self.row(row)?.defaults.contains(&column))
    }

    pub fn find_first(&self, column: ColumnKey, key: &Value) -> Option<RowKey> {
        if let Some(index) = self.indexes.get(&column) {
            return index.get(key).and_then(|rows| rows.iter().next().copied());
        }
        self.rows
            .iter()
            .find(|(_, data)| matches!(data.cells.get(&column), Some(Cell::Value(v)) if v == key))
            .map(|(row, _)| *row)
    }

    /// Rows holding a link or list entry that points at `target`.
    pub fn referencing_rows(&self, column: ColumnKey, target: RowKey) -> Vec<RowKey> {
        self.rows
            .iter()
            .filter(|(_, data)| match data.cells.get(&column) {
                Some(Cell::Link(Some(r))) => *r == target,
                Some(Cell::List(entries)) => entries.contains(&ListEntry::Row(target)),
                _ => false,
            })
            .map(|(row, _)| *row)
            .collect()
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    fn build_index(&mut self, column: ColumnKey) {
        let mut index: HashMap<Value, BTreeSet<RowKey>> = HashMap::new();
        for (row, data) in &self.rows {
            if let Some(Cell::Value(v)) = data.cells.get(&column) {
                index.entry(v.clone()).or_default().insert(*row);
            }
        }
        self.indexes.insert(column, index);
    }

    /// Recreates the lookup structures skipped by serialization.
    pub fn rebuild_indexes(&mut self) {
        self.indexes.clear();
        let keys: Vec<ColumnKey> = self
            .columns
            .iter()
            .filter(|(k, spec)| spec.indexed || self.primary_key == Some(**k))
            .map(|(k, _)| *k)
            .collect();
        for key in keys {
            self.build_index(key);
        }
    }
}
