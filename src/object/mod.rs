pub mod graph;
pub mod identity;

pub use graph::{DetachedObject, FieldValue, ObjectGraph, ObjectId};
pub use identity::{ContextId, DatabaseId, ManagedRef, ObjectRef, SourceKey};
