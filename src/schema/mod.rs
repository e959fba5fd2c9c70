pub mod catalog;
pub mod descriptor;
pub mod object_schema;
pub mod validate;

pub use catalog::SchemaCatalog;
pub use descriptor::{ColumnDetails, SchemaDescriptor};
pub use object_schema::{ObjectSchema, Property, SchemaSet, class_name_for, table_name_for};
pub use validate::{init_missing_tables, init_table, validate_table};
