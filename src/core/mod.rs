pub mod error;
pub mod types;
pub mod value;

pub use error::{DbError, MigrationError, MigrationErrorKind, Result};
pub use types::{DataType, FieldType};
pub use value::Value;
