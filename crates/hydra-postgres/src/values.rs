//! Value conversion between sqlx PostgreSQL rows and the broker's value
//! model.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, Postgres};
use sqlx::{Column, Row as SqlxRow, TypeInfo};
use uuid::Uuid;

use hydra_common::Result;
use hydra_core::result::{FieldInfo, Row};
use hydra_core::value::SqlValue;

/// Maps a PostgreSQL type name to the broker's normalized category.
pub fn normalize_type(native: &str) -> &'static str {
    match native.to_lowercase().as_str() {
        "smallint" | "integer" | "bigint" | "int2" | "int4" | "int8" | "smallserial"
        | "serial" | "bigserial" | "oid" => "integer",
        "numeric" | "decimal" | "money" => "decimal",
        "real" | "double precision" | "float4" | "float8" => "float",
        "character varying" | "varchar" | "character" | "char" | "bpchar" | "name" | "citext" => {
            "string"
        }
        "text" => "text",
        "bytea" => "binary",
        "date" => "date",
        "time" | "timetz" | "time without time zone" | "time with time zone" => "time",
        "timestamp" | "timestamp without time zone" => "datetime",
        "timestamptz" | "timestamp with time zone" => "timestamp",
        "json" | "jsonb" => "json",
        "uuid" => "uuid",
        "boolean" | "bool" => "boolean",
        "geometry" | "geography" | "point" | "polygon" | "path" | "circle" | "line" | "lseg"
        | "box" => "geometry",
        _ => "string",
    }
}

/// Decodes one column of a row into a [`SqlValue`] using the driver type.
pub fn decode_column(row: &PgRow, index: usize, type_name: &str) -> SqlValue {
    match type_name.to_uppercase().as_str() {
        "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null),
        "INT2" => row
            .try_get::<Option<i16>, _>(index)
            .ok()
            .flatten()
            .map(|v| SqlValue::Int(i64::from(v)))
            .unwrap_or(SqlValue::Null),
        "INT4" => row
            .try_get::<Option<i32>, _>(index)
            .ok()
            .flatten()
            .map(|v| SqlValue::Int(i64::from(v)))
            .unwrap_or(SqlValue::Null),
        "INT8" | "OID" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Int)
            .unwrap_or(SqlValue::Null),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| SqlValue::Float(f64::from(v)))
            .unwrap_or(SqlValue::Null),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Float)
            .unwrap_or(SqlValue::Null),
        "NUMERIC" | "MONEY" => row
            .try_get::<Option<Decimal>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Decimal)
            .unwrap_or(SqlValue::Null),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Date)
            .unwrap_or(SqlValue::Null),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Time)
            .unwrap_or(SqlValue::Null),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Timestamp)
            .unwrap_or(SqlValue::Null),
        "JSON" | "JSONB" => row
            .try_get::<Option<JsonValue>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Json)
            .unwrap_or(SqlValue::Null),
        "UUID" => row
            .try_get::<Option<Uuid>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Uuid)
            .unwrap_or(SqlValue::Null),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Bytes)
            .unwrap_or(SqlValue::Null),
        // "CHAR" here is the internal one-byte pg type used by catalogs
        "\"CHAR\"" => row
            .try_get::<Option<i8>, _>(index)
            .ok()
            .flatten()
            .map(|v| SqlValue::Text((v as u8 as char).to_string()))
            .unwrap_or(SqlValue::Null),
        _ => row
            .try_get::<Option<String>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Text)
            .unwrap_or(SqlValue::Null),
    }
}

/// Converts a full driver row into the broker row shape.
pub fn row_to_broker(row: &PgRow) -> Row {
    let mut columns = std::collections::HashMap::with_capacity(row.columns().len());
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, index, column.type_info().name());
        columns.insert(column.name().to_string(), value);
    }
    Row::new(columns)
}

/// Builds field metadata for a result set; nullability comes from the first
/// row's values.
pub fn fields_from_rows(rows: &[PgRow]) -> Vec<FieldInfo> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    first
        .columns()
        .iter()
        .enumerate()
        .map(|(index, column)| {
            let native = column.type_info().name();
            let value = decode_column(first, index, native);
            FieldInfo::new(column.name(), normalize_type(native), value.is_null())
        })
        .collect()
}

/// Binds a broker value onto a PostgreSQL query.
pub fn bind_value<'q>(
    query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    value: &'q SqlValue,
) -> Result<sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>> {
    Ok(match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::Decimal(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Date(v) => query.bind(*v),
        SqlValue::Time(v) => query.bind(*v),
        SqlValue::DateTime(v) => query.bind(*v),
        SqlValue::Timestamp(v) => query.bind(*v),
        SqlValue::Json(v) => query.bind(v.clone()),
        SqlValue::Uuid(v) => query.bind(*v),
    })
}

/// Validates and double-quotes an identifier for interpolation into
/// introspection SQL.
pub fn quote_identifier(name: &str) -> Result<String> {
    if name.is_empty() || name.len() > 63 {
        return Err(hydra_common::BrokerError::Validation(format!(
            "Invalid identifier: '{}'",
            name
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return Err(hydra_common::BrokerError::Validation(format!(
            "Invalid identifier: '{}'",
            name
        )));
    }
    Ok(format!("\"{}\"", name))
}

/// Maps a `pg_constraint` action code to its SQL rule name.
pub fn referential_action(code: i8) -> &'static str {
    match code as u8 as char {
        'c' => "CASCADE",
        'n' => "SET NULL",
        'd' => "SET DEFAULT",
        'r' => "RESTRICT",
        _ => "NO ACTION",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_integer_family() {
        for native in ["smallint", "integer", "bigint", "int2", "int4", "int8", "serial"] {
            assert_eq!(normalize_type(native), "integer");
        }
    }

    #[test]
    fn test_normalize_temporal_split() {
        assert_eq!(normalize_type("timestamp without time zone"), "datetime");
        assert_eq!(normalize_type("timestamp with time zone"), "timestamp");
        assert_eq!(normalize_type("timestamptz"), "timestamp");
        assert_eq!(normalize_type("date"), "date");
        assert_eq!(normalize_type("timetz"), "time");
    }

    #[test]
    fn test_normalize_string_json_uuid() {
        assert_eq!(normalize_type("character varying"), "string");
        assert_eq!(normalize_type("text"), "text");
        assert_eq!(normalize_type("jsonb"), "json");
        assert_eq!(normalize_type("uuid"), "uuid");
        assert_eq!(normalize_type("bytea"), "binary");
        assert_eq!(normalize_type("tsvector"), "string");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("users").unwrap(), "\"users\"");
        assert!(quote_identifier("bad\"name").is_err());
        assert!(quote_identifier("name; DROP").is_err());
        assert!(quote_identifier(&"x".repeat(64)).is_err());
    }

    #[test]
    fn test_referential_action_codes() {
        assert_eq!(referential_action('c' as i8), "CASCADE");
        assert_eq!(referential_action('n' as i8), "SET NULL");
        assert_eq!(referential_action('d' as i8), "SET DEFAULT");
        assert_eq!(referential_action('r' as i8), "RESTRICT");
        assert_eq!(referential_action('a' as i8), "NO ACTION");
    }
}
