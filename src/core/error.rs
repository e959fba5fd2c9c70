use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("Trying to set non-nullable field '{field}' to null.")]
    NonNullableViolation { field: String },

    #[error("Primary key field '{field}' cannot be changed after object was created.")]
    ImmutableKey { field: String },

    #[error("Primary key value already exists: {key} in class '{class}'")]
    DuplicateKey { class: String, key: String },

    #[error(
        "Embedded objects can only have one parent pointing to them. This object was already copied, so another object is pointing to it."
    )]
    EmbeddedObjectAlreadyOwned,

    #[error("Cannot reference objects managed by another database: {0}")]
    CrossDatabaseReference(String),

    #[error(
        "Objects which belong to Realm instances in other threads cannot be copied into this Realm instance."
    )]
    CrossContext,

    #[error("Object is no longer valid to operate on: {0}")]
    StaleObject(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Class '{0}' is not part of the schema for this Realm")]
    ClassNotFound(String),

    #[error("Field '{0}' not found in class '{1}'")]
    FieldNotFound(String, String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("JSON object doesn't have the primary key field '{0}'.")]
    MissingPrimaryKey(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<std::io::Error> for DbError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

/// What kind of mismatch was found between the stored and the declared schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationErrorKind {
    MissingTable,
    ColumnCountMismatch { expected: usize, actual: usize },
    MissingField,
    TypeMismatch,
    /// `expected_nullable` is the declared nullability; the stored column has the opposite.
    NullabilityMismatch { expected_nullable: bool },
    LinkTargetMismatch,
    MissingLinkTarget,
    PrimaryKeyMismatch,
    IndexMismatch,
}

impl fmt::Display for MigrationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MissingTable => "missing table",
            Self::ColumnCountMismatch { .. } => "column count mismatch",
            Self::MissingField => "missing field",
            Self::TypeMismatch => "type mismatch",
            Self::NullabilityMismatch { .. } => "nullability mismatch",
            Self::LinkTargetMismatch => "link target mismatch",
            Self::MissingLinkTarget => "missing link target",
            Self::PrimaryKeyMismatch => "primary key mismatch",
            Self::IndexMismatch => "index mismatch",
        };
        f.write_str(name)
    }
}

/// Raised when a stored table does not line up with the declared schema.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Migration is required due to the following errors: {message}")]
pub struct MigrationError {
    pub kind: MigrationErrorKind,
    pub class_name: String,
    pub field: Option<String>,
    pub message: String,
}

impl MigrationError {
    pub fn new(kind: MigrationErrorKind, class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            class_name: class_name.into(),
            field: None,
            message: message.into(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}
