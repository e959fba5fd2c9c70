// ============================================================================
// Transaction Change Tracking
// ============================================================================
//
// Every native write made inside a write transaction is journaled as a
// Change carrying enough of the previous state to revert it. Rollback
// replays the journal backwards.
//
// ============================================================================

use crate::core::{DbError, Result};
use crate::storage::engine::{ColumnKey, ListEntry, RowKey};
use crate::storage::table::{Cell, RowData, Table};
use std::collections::BTreeMap;

/// A single reversible native write.
#[derive(Debug, Clone)]
pub enum Change {
    TableCreated {
        table: String,
    },

    TableDropped {
        table: Box<Table>,
    },

    /// Structural change (columns, keys, indexes); keeps the whole table.
    TableAltered {
        previous: Box<Table>,
    },

    RowCreated {
        table: String,
        row: RowKey,
    },

    RowDeleted {
        table: String,
        row: RowKey,
        data: RowData,
    },

    CellWritten {
        table: String,
        row: RowKey,
        column: ColumnKey,
        previous: Cell,
        was_default: bool,
    },

    ListCleared {
        table: String,
        row: RowKey,
        column: ColumnKey,
        previous: Vec<ListEntry>,
    },

    ListItemSet {
        table: String,
        row: RowKey,
        column: ColumnKey,
        index: usize,
        previous: ListEntry,
    },

    ListItemAppended {
        table: String,
        row: RowKey,
        column: ColumnKey,
    },

    ListItemRemoved {
        table: String,
        row: RowKey,
        column: ColumnKey,
        index: usize,
        previous: ListEntry,
    },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::TableCreated { table } => table,
            Change::TableDropped { table } => table.name(),
            Change::TableAltered { previous } => previous.name(),
            Change::RowCreated { table, .. }
            | Change::RowDeleted { table, .. }
            | Change::CellWritten { table, .. }
            | Change::ListCleared { table, .. }
            | Change::ListItemSet { table, .. }
            | Change::ListItemAppended { table, .. }
            | Change::ListItemRemoved { table, .. } => table,
        }
    }

    /// Check if this is a structural (schema) change
    pub fn is_ddl(&self) -> bool {
        matches!(
            self,
            Change::TableCreated { .. } | Change::TableDropped { .. } | Change::TableAltered { .. }
        )
    }

    pub fn is_list_change(&self) -> bool {
        matches!(
            self,
            Change::ListCleared { .. }
                | Change::ListItemSet { .. }
                | Change::ListItemAppended { .. }
                | Change::ListItemRemoved { .. }
        )
    }

    /// Reverts this change against the raw table map.
    pub(crate) fn undo(self, tables: &mut BTreeMap<String, Table>) -> Result<()> {
        match self {
            Change::TableCreated { table } => {
                tables.remove(&table);
            }
            Change::TableDropped { table } | Change::TableAltered { previous: table } => {
                let mut table = *table;
                table.rebuild_indexes();
                tables.insert(table.name().to_string(), table);
            }
            Change::RowCreated { table, row } => {
                table_mut(tables, &table)?.remove_row(row);
            }
            Change::RowDeleted { table, row, data } => {
                table_mut(tables, &table)?.insert_row_data(row, data);
            }
            Change::CellWritten {
                table,
                row,
                column,
                previous,
                was_default,
            } => {
                table_mut(tables, &table)?.put_cell(row, column, previous, was_default)?;
            }
            Change::ListCleared {
                table,
                row,
                column,
                previous,
            } => {
                *table_mut(tables, &table)?.list_mut(row, column)? = previous;
            }
            Change::ListItemSet {
                table,
                row,
                column,
                index,
                previous,
            } => {
                let list = table_mut(tables, &table)?.list_mut(row, column)?;
                if let Some(slot) = list.get_mut(index) {
                    *slot = previous;
                }
            }
            Change::ListItemAppended { table, row, column } => {
                table_mut(tables, &table)?.list_mut(row, column)?.pop();
            }
            Change::ListItemRemoved {
                table,
                row,
                column,
                index,
                previous,
            } => {
                let list = table_mut(tables, &table)?.list_mut(row, column)?;
                let at = index.min(list.len());
                list.insert(at, previous);
            }
        }
        Ok(())
    }
}

fn table_mut<'a>(tables: &'a mut BTreeMap<String, Table>, name: &str) -> Result<&'a mut Table> {
    tables
        .get_mut(name)
        .ok_or_else(|| DbError::TableNotFound(name.to_string()))
}
