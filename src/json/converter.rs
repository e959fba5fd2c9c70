//! Conversion between JSON values and stored values

use super::error::{JsonError, JsonResult};
use crate::core::{DataType, Value};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::DateTime;
use serde_json::{Number, Value as JsonValue};

/// Converts JSON values to stored values
pub struct JsonToValueConverter;

impl JsonToValueConverter {
    pub fn convert(json_value: &JsonValue, expected_type: &DataType) -> JsonResult<Value> {
        match (json_value, expected_type) {
            (JsonValue::Null, _) => Ok(Value::Null),

            (JsonValue::Bool(b), DataType::Boolean) => Ok(Value::Boolean(*b)),

            (JsonValue::Number(n), DataType::Integer) => n
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| JsonError::TypeMismatch(format!("Cannot convert {} to int", n))),
            (JsonValue::String(s), DataType::Integer) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| JsonError::TypeMismatch(format!("Cannot convert '{}' to int", s))),

            (JsonValue::Number(n), DataType::Float) => n
                .as_f64()
                .map(|f| Value::Float(f as f32))
                .ok_or_else(|| JsonError::TypeMismatch(format!("Cannot convert {} to float", n))),
            (JsonValue::Number(n), DataType::Double) => n
                .as_f64()
                .map(Value::Double)
                .ok_or_else(|| JsonError::TypeMismatch(format!("Cannot convert {} to double", n))),
            (JsonValue::String(s), DataType::Float | DataType::Double) => {
                let parsed = s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| JsonError::TypeMismatch(format!("Cannot convert '{}' to {}", s, expected_type)))?;
                Ok(match expected_type {
                    DataType::Float => Value::Float(parsed as f32),
                    _ => Value::Double(parsed),
                })
            }

            (JsonValue::String(s), DataType::Text) => Ok(Value::Text(s.clone())),
            (JsonValue::Number(_) | JsonValue::Bool(_), DataType::Text) => Ok(Value::Text(json_value.to_string())),

            (JsonValue::String(s), DataType::Binary) => STANDARD
                .decode(s)
                .map(Value::Binary)
                .map_err(|e| JsonError::TypeMismatch(format!("Invalid base64 binary: {}", e))),

            (JsonValue::Number(n), DataType::Date) => {
                let millis = n
                    .as_i64()
                    .ok_or_else(|| JsonError::TypeMismatch(format!("Invalid date timestamp: {}", n)))?;
                date_from_millis(millis)
            }
            (JsonValue::String(s), DataType::Date) => parse_date(s),

            (value, data_type) => Err(JsonError::TypeMismatch(format!(
                "Cannot convert JSON {} to {}",
                json_type_name(value),
                data_type
            ))),
        }
    }
}

fn date_from_millis(millis: i64) -> JsonResult<Value> {
    Value::date_from_millis(millis)
        .ok_or_else(|| JsonError::TypeMismatch(format!("Date timestamp {} is out of range", millis)))
}

/// Accepts epoch millis, `/Date(millis)/` and RFC 3339.
fn parse_date(s: &str) -> JsonResult<Value> {
    let trimmed = s.trim();
    if let Ok(millis) = trimmed.parse::<i64>() {
        return date_from_millis(millis);
    }
    if let Some(inner) = trimmed.strip_prefix("/Date(").and_then(|rest| rest.strip_suffix(")/")) {
        let digits: String = inner
            .chars()
            .enumerate()
            .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '-'))
            .map(|(_, c)| c)
            .collect();
        let millis = digits
            .parse::<i64>()
            .map_err(|_| JsonError::TypeMismatch(format!("Invalid date: '{}'", s)))?;
        return date_from_millis(millis);
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| Value::Date(dt.to_utc()))
        .map_err(|e| JsonError::TypeMismatch(format!("Invalid date '{}': {}", s, e)))
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Converts stored values to JSON
pub struct ValueToJsonConverter;

impl ValueToJsonConverter {
    /// Dates become epoch millis, binary becomes base64.
    pub fn convert(value: &Value) -> JsonValue {
        match value {
            Value::Null => JsonValue::Null,
            Value::Boolean(b) => JsonValue::Bool(*b),
            Value::Integer(i) => JsonValue::Number((*i).into()),
            Value::Float(f) => Number::from_f64(f64::from(*f)).map_or(JsonValue::Null, JsonValue::Number),
            Value::Double(d) => Number::from_f64(*d).map_or(JsonValue::Null, JsonValue::Number),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Binary(bytes) => JsonValue::String(STANDARD.encode(bytes)),
            Value::Date(dt) => JsonValue::Number(dt.timestamp_millis().into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_convert_dates() {
        let expected = Value::date_from_millis(1_500_000_000_000).unwrap();
        assert_eq!(
            JsonToValueConverter::convert(&json!(1_500_000_000_000i64), &DataType::Date).unwrap(),
            expected
        );
        assert_eq!(
            JsonToValueConverter::convert(&json!("1500000000000"), &DataType::Date).unwrap(),
            expected
        );
        assert_eq!(
            JsonToValueConverter::convert(&json!("/Date(1500000000000)/"), &DataType::Date).unwrap(),
            expected
        );
        assert_eq!(
            JsonToValueConverter::convert(&json!("2017-07-14T02:40:00Z"), &DataType::Date).unwrap(),
            expected
        );
    }

    #[test]
    fn test_negative_millis_are_dates() {
        let value = JsonToValueConverter::convert(&json!(-1000), &DataType::Date).unwrap();
        assert_eq!(value.as_date().unwrap().timestamp_millis(), -1000);
    }

    #[test]
    fn test_binary_base64() {
        let value = JsonToValueConverter::convert(&json!("AQID"), &DataType::Binary).unwrap();
        assert_eq!(value, Value::Binary(vec![1, 2, 3]));
        assert_eq!(ValueToJsonConverter::convert(&value), json!("AQID"));
        assert!(JsonToValueConverter::convert(&json!("not base64!"), &DataType::Binary).is_err());
    }

    #[test]
    fn test_type_mismatch() {
        let err = JsonToValueConverter::convert(&json!({"a": 1}), &DataType::Integer).unwrap_err();
        assert!(matches!(err, JsonError::TypeMismatch(_)));
        assert_eq!(
            JsonToValueConverter::convert(&json!(null), &DataType::Integer).unwrap(),
            Value::Null
        );
    }
}
