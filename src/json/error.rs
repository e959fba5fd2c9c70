//! JSON-specific error types

use crate::core::DbError;
use thiserror::Error;

pub type JsonResult<T> = Result<T, JsonError>;

#[derive(Debug, Error)]
pub enum JsonError {
    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Invalid document structure: {0}")]
    InvalidStructure(String),

    #[error(transparent)]
    DatabaseError(#[from] DbError),
}

impl JsonError {
    /// The database error behind this one, if any.
    pub fn as_db_error(&self) -> Option<&DbError> {
        match self {
            JsonError::DatabaseError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for JsonError {
    fn from(err: serde_json::Error) -> Self {
        JsonError::ParseError(err.to_string())
    }
}
