pub mod engine;
pub mod memory;
pub mod persistence;
pub mod table;

pub use engine::{ColumnKey, ColumnSpec, ListEntry, RowKey, RowStore, replace_list};
pub use memory::InMemoryStore;
pub use persistence::{SnapshotManager, StoreSnapshot};
pub use table::{Cell, Table};
