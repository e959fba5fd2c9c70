// ============================================================================
// memorealm Library
// ============================================================================

//! Schema-driven object mapping over an in-memory row/table store.
//!
//! Model classes are declared as [`ObjectSchema`]s, validated against the
//! stored tables when a [`Realm`] opens, and read or written through
//! [`ManagedObject`] accessors. Unmanaged object graphs are copied in with
//! identity-based memoization, in bulk, or from JSON documents.
//!
//! ```
//! use memorealm::{DataType, ObjectSchema, Property, Realm, RealmConfig, SchemaSet};
//!
//! # fn main() -> memorealm::Result<()> {
//! let schema = SchemaSet::new(vec![
//!     ObjectSchema::new("Person")
//!         .property(Property::new("name", DataType::Text).required())
//!         .property(Property::new("age", DataType::Integer).required()),
//! ])?;
//! let mut realm = Realm::open(RealmConfig::new(schema))?;
//!
//! realm.begin_write()?;
//! let person = realm.create_object("Person")?;
//! person.set(&mut realm, "age", 30)?;
//! realm.commit_write()?;
//!
//! assert_eq!(person.get_i32(&realm, "age")?, Some(30));
//! # Ok(())
//! # }
//! ```

pub mod accessor;
pub mod bulk;
pub mod copy;
pub mod core;
pub mod facade;
pub mod json;
pub mod object;
pub mod schema;
pub mod storage;
pub mod transaction;

// Re-export main types for convenience
pub use accessor::{ConstructionPolicy, ManagedObject, Phase};
pub use copy::{CopyTarget, ImportFlags, SourceSet};
pub use core::{DataType, DbError, FieldType, MigrationError, MigrationErrorKind, Result, Value};
pub use facade::{Realm, RealmConfig, SchemaEditor};
pub use object::{DetachedObject, FieldValue, ObjectGraph, ObjectId, ObjectRef};
pub use schema::{ObjectSchema, Property, SchemaDescriptor, SchemaSet};
