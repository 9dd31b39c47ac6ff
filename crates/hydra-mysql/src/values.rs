//! Value conversion between sqlx MySQL rows and the broker's value model.
//!
//! Decoding is driven by the driver-reported type name; anything unknown
//! falls back to a string read so exotic column types degrade gracefully
//! instead of failing the whole row.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySql, MySqlRow};
use sqlx::{Column, Row as SqlxRow, TypeInfo};

use hydra_core::result::{FieldInfo, Row};
use hydra_core::value::SqlValue;
use hydra_common::Result;

/// Maps a MySQL type name to the broker's normalized category.
pub fn normalize_type(native: &str) -> &'static str {
    match native.to_lowercase().as_str() {
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "year" | "bit"
        | "tinyint unsigned" | "smallint unsigned" | "mediumint unsigned" | "int unsigned"
        | "bigint unsigned" => "integer",
        "decimal" | "numeric" => "decimal",
        "float" | "double" | "real" => "float",
        "char" | "varchar" | "enum" | "set" => "string",
        "tinytext" | "text" | "mediumtext" | "longtext" => "text",
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => "binary",
        "date" => "date",
        "time" => "time",
        "datetime" => "datetime",
        "timestamp" => "timestamp",
        "json" => "json",
        "geometry" | "point" | "linestring" | "polygon" | "multipoint" | "multilinestring"
        | "multipolygon" | "geometrycollection" => "geometry",
        "boolean" | "bool" => "boolean",
        _ => "string",
    }
}

/// Decodes one column of a row into a [`SqlValue`] using the driver type.
pub fn decode_column(row: &MySqlRow, index: usize, type_name: &str) -> SqlValue {
    match type_name.to_uppercase().as_str() {
        "BOOLEAN" | "BOOL" => row
            .try_get::<Option<bool>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "YEAR" => row
            .try_get::<Option<i64>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Int)
            .unwrap_or(SqlValue::Null),
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" | "BIT" => row
            .try_get::<Option<u64>, _>(index)
            .ok()
            .flatten()
            .map(|v| SqlValue::Int(v as i64))
            .unwrap_or(SqlValue::Null),
        "FLOAT" => row
            .try_get::<Option<f32>, _>(index)
            .ok()
            .flatten()
            .map(|v| SqlValue::Float(f64::from(v)))
            .unwrap_or(SqlValue::Null),
        "DOUBLE" | "REAL" => row
            .try_get::<Option<f64>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Float)
            .unwrap_or(SqlValue::Null),
        "DECIMAL" | "NEWDECIMAL" | "NUMERIC" => row
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
        "DATETIME" => row
            .try_get::<Option<NaiveDateTime>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null),
        "TIMESTAMP" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Timestamp)
            .unwrap_or(SqlValue::Null),
        "JSON" => row
            .try_get::<Option<JsonValue>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Json)
            .unwrap_or(SqlValue::Null),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => row
            .try_get::<Option<Vec<u8>>, _>(index)
            .ok()
            .flatten()
            .map(SqlValue::Bytes)
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
pub fn row_to_broker(row: &MySqlRow) -> Row {
    let mut columns = std::collections::HashMap::with_capacity(row.columns().len());
    for (index, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, index, column.type_info().name());
        columns.insert(column.name().to_string(), value);
    }
    Row::new(columns)
}

/// Builds field metadata for a result set.
///
/// Nullability comes from the first row's values; the driver does not expose
/// column nullability on ad-hoc statements.
pub fn fields_from_rows(rows: &[MySqlRow]) -> Vec<FieldInfo> {
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

/// Binds a broker value onto a MySQL query.
pub fn bind_value<'q>(
    query: sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>,
    value: &'q SqlValue,
) -> Result<sqlx::query::Query<'q, MySql, sqlx::mysql::MySqlArguments>> {
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
        // MySQL has no native UUID type; bind the canonical text form
        SqlValue::Uuid(v) => query.bind(v.to_string()),
    })
}

/// Validates and backtick-quotes an identifier for interpolation into
/// introspection SQL. Only word characters and `$` are accepted.
pub fn quote_identifier(name: &str) -> Result<String> {
    if name.is_empty() || name.len() > 64 {
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
    Ok(format!("`{}`", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_integer_family() {
        for native in ["tinyint", "smallint", "mediumint", "int", "bigint", "year"] {
            assert_eq!(normalize_type(native), "integer");
        }
        assert_eq!(normalize_type("BIGINT UNSIGNED"), "integer");
    }

    #[test]
    fn test_normalize_string_and_text_families() {
        assert_eq!(normalize_type("varchar"), "string");
        assert_eq!(normalize_type("char"), "string");
        assert_eq!(normalize_type("enum"), "string");
        assert_eq!(normalize_type("text"), "text");
        assert_eq!(normalize_type("longtext"), "text");
    }

    #[test]
    fn test_normalize_binary_temporal_and_json() {
        assert_eq!(normalize_type("blob"), "binary");
        assert_eq!(normalize_type("varbinary"), "binary");
        assert_eq!(normalize_type("date"), "date");
        assert_eq!(normalize_type("datetime"), "datetime");
        assert_eq!(normalize_type("timestamp"), "timestamp");
        assert_eq!(normalize_type("json"), "json");
        assert_eq!(normalize_type("geometry"), "geometry");
    }

    #[test]
    fn test_normalize_unknown_falls_back_to_string() {
        assert_eq!(normalize_type("inet6"), "string");
    }

    #[test]
    fn test_quote_identifier_accepts_word_names() {
        assert_eq!(quote_identifier("users").unwrap(), "`users`");
        assert_eq!(quote_identifier("order_items_2024").unwrap(), "`order_items_2024`");
    }

    #[test]
    fn test_quote_identifier_rejects_injection_shapes() {
        assert!(quote_identifier("users; DROP TABLE x").is_err());
        assert!(quote_identifier("a`b").is_err());
        assert!(quote_identifier("").is_err());
        assert!(quote_identifier(&"x".repeat(65)).is_err());
    }
}
