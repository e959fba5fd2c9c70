use super::graph::ObjectId;
use crate::storage::RowKey;
use std::fmt;
use std::thread::{self, ThreadId};
use uuid::Uuid;

/// Identity of one open Realm instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatabaseId(Uuid);

impl DatabaseId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DatabaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The execution context (thread) a Realm instance is confined to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(ThreadId);

impl ContextId {
    pub fn current() -> Self {
        Self(thread::current().id())
    }
}

/// Address of a managed row: which Realm, which context, which class, which row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ManagedRef {
    pub database: DatabaseId,
    pub context: ContextId,
    pub class_name: String,
    pub row: RowKey,
}

impl fmt::Display for ManagedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.class_name, self.row.0, self.database)
    }
}

/// A reference held by a relationship field of a detached object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectRef {
    Detached(ObjectId),
    Managed(ManagedRef),
}

impl From<ObjectId> for ObjectRef {
    fn from(id: ObjectId) -> Self {
        Self::Detached(id)
    }
}

impl From<ManagedRef> for ObjectRef {
    fn from(r: ManagedRef) -> Self {
        Self::Managed(r)
    }
}

impl From<&ManagedRef> for ObjectRef {
    fn from(r: &ManagedRef) -> Self {
        Self::Managed(r.clone())
    }
}

/// Surrogate identity of a source object inside one copy or insert operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceKey {
    Detached(ObjectId),
    Managed {
        database: DatabaseId,
        class_name: String,
        row: RowKey,
    },
}

impl From<&ObjectRef> for SourceKey {
    fn from(r: &ObjectRef) -> Self {
        match r {
            ObjectRef::Detached(id) => Self::Detached(*id),
            ObjectRef::Managed(m) => Self::Managed {
                database: m.database,
                class_name: m.class_name.clone(),
                row: m.row,
            },
        }
    }
}
