//! Cross-engine SQL value representation.
//!
//! Both backends decode native driver values into [`SqlValue`], a tagged sum
//! over the broker's normalized type vocabulary. Field metadata carries the
//! same category names, so callers discriminate on the tag without knowing
//! which engine produced the row.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use hydra_common::{BrokerError, Result};

/// A single value extracted from a database row.
///
/// Integer widths collapse into one variant; the original engine type is
/// reported separately through column metadata where it matters.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value
    Null,
    /// Boolean (BOOLEAN, TINYINT(1))
    Bool(bool),
    /// Any integer width (TINYINT..BIGINT, SMALLSERIAL..BIGSERIAL)
    Int(i64),
    /// Floating point (FLOAT, DOUBLE, REAL)
    Float(f64),
    /// Exact numeric (DECIMAL, NUMERIC)
    Decimal(Decimal),
    /// Character data (CHAR, VARCHAR, TEXT families)
    Text(String),
    /// Binary data (BLOB, BYTEA, VARBINARY)
    Bytes(Vec<u8>),
    /// Calendar date (DATE)
    Date(NaiveDate),
    /// Wall-clock time (TIME)
    Time(NaiveTime),
    /// Date and time without zone (DATETIME, TIMESTAMP WITHOUT TIME ZONE)
    DateTime(NaiveDateTime),
    /// Point in time with zone (TIMESTAMP, TIMESTAMPTZ)
    Timestamp(DateTime<Utc>),
    /// JSON / JSONB payload
    Json(JsonValue),
    /// UUID (PostgreSQL UUID, MySQL BINARY(16) convention)
    Uuid(Uuid),
}

impl SqlValue {
    /// Returns the normalized category name for this value.
    pub fn category(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "boolean",
            SqlValue::Int(_) => "integer",
            SqlValue::Float(_) => "float",
            SqlValue::Decimal(_) => "decimal",
            SqlValue::Text(_) => "string",
            SqlValue::Bytes(_) => "binary",
            SqlValue::Date(_) => "date",
            SqlValue::Time(_) => "time",
            SqlValue::DateTime(_) => "datetime",
            SqlValue::Timestamp(_) => "timestamp",
            SqlValue::Json(_) => "json",
            SqlValue::Uuid(_) => "uuid",
        }
    }

    /// Returns true for the NULL variant.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Converts the value into its JSON representation.
    ///
    /// Binary data is base16-encoded; temporal values use RFC 3339 / ISO
    /// formatting so results survive a JSON round-trip unambiguously.
    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(v) => JsonValue::Bool(*v),
            SqlValue::Int(v) => JsonValue::from(*v),
            SqlValue::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SqlValue::Decimal(v) => JsonValue::String(v.to_string()),
            SqlValue::Text(v) => JsonValue::String(v.clone()),
            SqlValue::Bytes(v) => {
                let mut hex = String::with_capacity(v.len() * 2);
                for byte in v {
                    hex.push_str(&format!("{:02x}", byte));
                }
                JsonValue::String(hex)
            }
            SqlValue::Date(v) => JsonValue::String(v.format("%Y-%m-%d").to_string()),
            SqlValue::Time(v) => JsonValue::String(v.format("%H:%M:%S%.f").to_string()),
            SqlValue::DateTime(v) => {
                JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
            }
            SqlValue::Timestamp(v) => JsonValue::String(v.to_rfc3339()),
            SqlValue::Json(v) => v.clone(),
            SqlValue::Uuid(v) => JsonValue::String(v.to_string()),
        }
    }

    /// Builds a value from a JSON parameter supplied by the caller.
    ///
    /// Tool-level parameters arrive as JSON; integers stay integers, other
    /// numbers become floats, and structured payloads bind as JSON.
    pub fn from_json(value: &JsonValue) -> Result<Self> {
        Ok(match value {
            JsonValue::Null => SqlValue::Null,
            JsonValue::Bool(v) => SqlValue::Bool(*v),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SqlValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    SqlValue::Float(f)
                } else {
                    return Err(BrokerError::Serialization(format!(
                        "Unrepresentable numeric parameter: {}",
                        n
                    )));
                }
            }
            JsonValue::String(s) => SqlValue::Text(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => SqlValue::Json(value.clone()),
        })
    }

    /// Converts a list of JSON parameters in one pass.
    pub fn params_from_json(values: &[JsonValue]) -> Result<Vec<SqlValue>> {
        values.iter().map(Self::from_json).collect()
    }

    /// Numeric view of the value, when one exists.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Int(v) => Some(*v as f64),
            SqlValue::Float(v) => Some(*v),
            SqlValue::Decimal(v) => {
                use rust_decimal::prelude::ToPrimitive;
                v.to_f64()
            }
            SqlValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// String view of the value, when one exists.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Integer view of the value, when one exists.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_category_names() {
        assert_eq!(SqlValue::Null.category(), "null");
        assert_eq!(SqlValue::Int(1).category(), "integer");
        assert_eq!(SqlValue::Float(1.5).category(), "float");
        assert_eq!(SqlValue::Text("a".into()).category(), "string");
        assert_eq!(SqlValue::Bytes(vec![0]).category(), "binary");
        assert_eq!(SqlValue::Json(json!({})).category(), "json");
    }

    #[test]
    fn test_json_round_trip_scalars() {
        assert_eq!(SqlValue::Int(42).to_json(), json!(42));
        assert_eq!(SqlValue::Bool(true).to_json(), json!(true));
        assert_eq!(SqlValue::Text("hello".into()).to_json(), json!("hello"));
        assert_eq!(SqlValue::Null.to_json(), JsonValue::Null);
    }

    #[test]
    fn test_bytes_hex_encoding() {
        let value = SqlValue::Bytes(vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(value.to_json(), json!("deadbeef"));
    }

    #[test]
    fn test_from_json_integer_stays_integer() {
        let value = SqlValue::from_json(&json!(7)).unwrap();
        assert_eq!(value, SqlValue::Int(7));
    }

    #[test]
    fn test_from_json_fraction_becomes_float() {
        let value = SqlValue::from_json(&json!(2.5)).unwrap();
        assert_eq!(value, SqlValue::Float(2.5));
    }

    #[test]
    fn test_from_json_structured_binds_as_json() {
        let payload = json!({"tags": ["a", "b"]});
        let value = SqlValue::from_json(&payload).unwrap();
        assert_eq!(value, SqlValue::Json(payload));
    }

    #[test]
    fn test_params_from_json() {
        let params =
            SqlValue::params_from_json(&[json!(1), json!("x"), JsonValue::Null]).unwrap();
        assert_eq!(
            params,
            vec![SqlValue::Int(1), SqlValue::Text("x".into()), SqlValue::Null]
        );
    }

    #[test]
    fn test_numeric_views() {
        assert_eq!(SqlValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(SqlValue::Float(0.5).as_f64(), Some(0.5));
        assert_eq!(SqlValue::Text("x".into()).as_f64(), None);
        assert_eq!(SqlValue::Bool(true).as_i64(), Some(1));
    }

    #[test]
    fn test_date_formats() {
        let date = SqlValue::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap());
        assert_eq!(date.to_json(), json!("2024-03-09"));
    }
}
