pub mod cache;
pub mod detach;
pub mod engine;
pub mod source;

use crate::object::SourceKey;
use crate::storage::RowKey;

pub use cache::{CacheData, IdentityCache};
pub use detach::create_detached_copy;
pub use engine::{assign_embedded, assign_embedded_list, copy_or_update};
pub use source::{SourceReader, SourceSet, read_managed};

/// Options for copying objects into a Realm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportFlags {
    /// Skip native writes whose value already matches the stored one.
    pub check_same_values_before_set: bool,
}

impl ImportFlags {
    pub fn check_same_values_before_set() -> Self {
        Self {
            check_same_values_before_set: true,
        }
    }
}

/// Managed row a source object was materialized into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTarget {
    pub class_name: String,
    pub row: RowKey,
}

/// Cache shared by the graph-copy engine and the bulk loader.
pub type CopyCache = IdentityCache<SourceKey, CopyTarget>;
