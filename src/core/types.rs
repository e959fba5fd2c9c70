use super::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Native column value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Integer,
    Boolean,
    Float,
    Double,
    Text,
    Binary,
    Date,
}

impl DataType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (Self::Integer, Value::Integer(_))
                | (Self::Boolean, Value::Boolean(_))
                | (Self::Float, Value::Float(_))
                | (Self::Double, Value::Double(_))
                | (Self::Text, Value::Text(_))
                | (Self::Binary, Value::Binary(_))
                | (Self::Date, Value::Date(_))
        )
    }

    /// Value a freshly created non-nullable column holds.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Integer => Value::Integer(0),
            Self::Boolean => Value::Boolean(false),
            Self::Float => Value::Float(0.0),
            Self::Double => Value::Double(0.0),
            Self::Text => Value::Text(String::new()),
            Self::Binary => Value::Binary(Vec::new()),
            Self::Date => Value::Date(chrono::DateTime::<chrono::Utc>::UNIX_EPOCH),
        }
    }

    /// Converts numeric values to the column representation; other kinds must match exactly.
    pub fn coerce(&self, value: Value) -> Option<Value> {
        match (self, value) {
            (_, Value::Null) => Some(Value::Null),
            (Self::Double, Value::Float(f)) => Some(Value::Double(f64::from(f))),
            (Self::Double, Value::Integer(i)) => Some(Value::Double(i as f64)),
            (Self::Float, Value::Integer(i)) => Some(Value::Float(i as f32)),
            (Self::Float, Value::Double(d)) => Some(Value::Float(d as f32)),
            (dt, v) if dt.is_compatible(&v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "int",
            Self::Boolean => "boolean",
            Self::Float => "float",
            Self::Double => "double",
            Self::Text => "string",
            Self::Binary => "binary",
            Self::Date => "date",
        };
        f.write_str(name)
    }
}

/// Semantic type of a persisted property / native column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Scalar(DataType),
    /// Single-valued link to a row of another table.
    Object,
    /// Ordered list of links.
    List,
    /// Ordered list of primitive values.
    ScalarList(DataType),
}

impl FieldType {
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }

    pub fn is_link(&self) -> bool {
        matches!(self, Self::Object | Self::List)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List | Self::ScalarList(_))
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(dt) => write!(f, "{}", dt),
            Self::Object => f.write_str("object"),
            Self::List => f.write_str("list"),
            Self::ScalarList(dt) => write!(f, "list<{}>", dt),
        }
    }
}
