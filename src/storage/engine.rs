use crate::core::{FieldType, Result, Value};
use crate::transaction::Change;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable column handle. Never reused within a table, survives renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnKey(pub u32);

/// Row handle, unique within its table for the table's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey(pub u64);

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "col#{}", self.0)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row#{}", self.0)
    }
}

/// One element of a list column: a row of the link target table, or a primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListEntry {
    Row(RowKey),
    Value(Value),
}

impl ListEntry {
    pub fn as_row(&self) -> Option<RowKey> {
        match self {
            Self::Row(r) => Some(*r),
            Self::Value(_) => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Row(_) => None,
        }
    }
}

/// Stored description of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub field_type: FieldType,
    pub nullable: bool,
    /// Table name of the link target, for `Object` and `List` columns.
    pub link_target: Option<String>,
    pub indexed: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable,
            link_target: None,
            indexed: false,
        }
    }

    pub fn linking(mut self, target_table: impl Into<String>) -> Self {
        self.link_target = Some(target_table.into());
        self
    }
}

/// The transactional row/table store consumed by the object layer.
///
/// Rows are addressed by table name plus [`RowKey`], cells by [`ColumnKey`].
/// Every mutation made while recording is journaled as a [`Change`] so the
/// enclosing write transaction can be rolled back.
pub trait RowStore: Send {
    // ---- transactions -------------------------------------------------

    fn begin_recording(&mut self);

    /// Stops recording and returns the journal of the finished transaction.
    fn take_changes(&mut self) -> Vec<Change>;

    /// Changes recorded so far by the running transaction.
    fn pending_changes(&self) -> &[Change];

    /// Reverts every recorded change, newest first, and stops recording.
    fn rollback(&mut self) -> Result<usize>;

    fn schema_version(&self) -> u64;

    fn set_schema_version(&mut self, version: u64);

    // ---- tables and columns -------------------------------------------

    fn has_table(&self, table: &str) -> bool;

    fn table_names(&self) -> Vec<String>;

    fn create_table(&mut self, table: &str, embedded: bool) -> Result<()>;

    fn drop_table(&mut self, table: &str) -> Result<()>;

    fn is_embedded(&self, table: &str) -> Result<bool>;

    fn add_column(&mut self, table: &str, spec: ColumnSpec) -> Result<ColumnKey>;

    fn remove_column(&mut self, table: &str, column: ColumnKey) -> Result<()>;

    fn rename_column(&mut self, table: &str, column: ColumnKey, name: &str) -> Result<()>;

    fn set_column_nullable(&mut self, table: &str, column: ColumnKey, nullable: bool) -> Result<()>;

    fn set_primary_key(&mut self, table: &str, column: Option<ColumnKey>) -> Result<()>;

    fn primary_key(&self, table: &str) -> Result<Option<ColumnKey>>;

    fn add_search_index(&mut self, table: &str, column: ColumnKey) -> Result<()>;

    fn remove_search_index(&mut self, table: &str, column: ColumnKey) -> Result<()>;

    /// Column specs in creation order.
    fn column_specs(&self, table: &str) -> Result<Vec<(ColumnKey, ColumnSpec)>>;

    fn column_spec(&self, table: &str, column: ColumnKey) -> Result<ColumnSpec>;

    fn resolve_column(&self, table: &str, name: &str) -> Option<ColumnKey>;

    fn column_count(&self, table: &str) -> Result<usize>;

    // ---- rows ---------------------------------------------------------

    fn create_row(&mut self, table: &str) -> Result<RowKey>;

    /// Creates a row whose primary key column holds `key`.
    /// Fails with `DuplicateKey` if another row already holds it.
    fn create_row_with_key(&mut self, table: &str, column: ColumnKey, key: Value) -> Result<RowKey>;

    /// Creates a row in the embedded target table of `column`, owned by
    /// `parent`. A single link slot drops its previous child; a list slot
    /// appends the new child.
    fn create_embedded_child(&mut self, table: &str, parent: RowKey, column: ColumnKey) -> Result<RowKey>;

    /// Deletes a row, its embedded children, and every link pointing to it.
    fn delete_row(&mut self, table: &str, row: RowKey) -> Result<()>;

    fn is_row_valid(&self, table: &str, row: RowKey) -> bool;

    fn rows(&self, table: &str) -> Result<Vec<RowKey>>;

    fn row_count(&self, table: &str) -> Result<usize>;

    fn find_first(&self, table: &str, column: ColumnKey, key: &Value) -> Result<Option<RowKey>>;

    // ---- scalars ------------------------------------------------------

    fn get_scalar(&self, table: &str, row: RowKey, column: ColumnKey) -> Result<Value>;

    fn set_scalar(&mut self, table: &str, row: RowKey, column: ColumnKey, value: Value, is_default: bool) -> Result<()>;

    fn is_default(&self, table: &str, row: RowKey, column: ColumnKey) -> Result<bool>;

    fn is_null(&self, table: &str, row: RowKey, column: ColumnKey) -> Result<bool>;

    fn set_null(&mut self, table: &str, row: RowKey, column: ColumnKey) -> Result<()>;

    // ---- links --------------------------------------------------------

    fn get_link(&self, table: &str, row: RowKey, column: ColumnKey) -> Result<Option<RowKey>>;

    fn set_link(&mut self, table: &str, row: RowKey, column: ColumnKey, target: RowKey) -> Result<()>;

    fn nullify_link(&mut self, table: &str, row: RowKey, column: ColumnKey) -> Result<()>;

    // ---- lists --------------------------------------------------------

    fn list_size(&self, table: &str, row: RowKey, column: ColumnKey) -> Result<usize>;

    fn list_get(&self, table: &str, row: RowKey, column: ColumnKey, index: usize) -> Result<ListEntry>;

    fn list_set(&mut self, table: &str, row: RowKey, column: ColumnKey, index: usize, entry: ListEntry) -> Result<()>;

    fn list_append(&mut self, table: &str, row: RowKey, column: ColumnKey, entry: ListEntry) -> Result<()>;

    fn list_remove_all(&mut self, table: &str, row: RowKey, column: ColumnKey) -> Result<()>;
}

/// Replaces the content of a list column.
///
/// Equal lengths are overwritten position by position so that assigning a
/// list onto itself never passes through an empty state; otherwise the list
/// is cleared and refilled.
pub fn replace_list(
    store: &mut dyn RowStore,
    table: &str,
    row: RowKey,
    column: ColumnKey,
    entries: Vec<ListEntry>,
) -> Result<()> {
    if store.list_size(table, row, column)? == entries.len() {
        for (index, entry) in entries.into_iter().enumerate() {
            store.list_set(table, row, column, index, entry)?;
        }
        return Ok(());
    }

    store.list_remove_all(table, row, column)?;
    for entry in entries {
        store.list_append(table, row, column, entry)?;
    }
    Ok(())
}
