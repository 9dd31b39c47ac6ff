//! Query result representation.
//!
//! Adapters normalize native driver rows into [`QueryResult`], the one shape
//! the executor, dispatcher, and tool surface all speak.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::validator::QueryAnalysis;
use crate::value::SqlValue;
use hydra_common::{BrokerError, Result};

/// Metadata for one result column.
///
/// `type` carries the normalized category name; consumers treat it as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub nullable: bool,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable,
        }
    }
}

/// A single result row: column name to value mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Row {
    #[serde(flatten)]
    pub columns: HashMap<String, SqlValue>,
}

impl Row {
    pub fn new(columns: HashMap<String, SqlValue>) -> Self {
        Self { columns }
    }

    /// Gets a value by column name.
    pub fn get(&self, column: &str) -> Result<&SqlValue> {
        self.columns
            .get(column)
            .ok_or_else(|| BrokerError::Query(format!("Column '{}' not found in result set", column)))
    }

    /// Gets a value by column name, treating absence as NULL.
    pub fn get_or_null(&self, column: &str) -> SqlValue {
        self.columns.get(column).cloned().unwrap_or(SqlValue::Null)
    }

    /// Converts the row to a JSON object.
    pub fn to_json(&self) -> JsonValue {
        let mut map = serde_json::Map::new();
        for (key, value) in &self.columns {
            map.insert(key.clone(), value.to_json());
        }
        JsonValue::Object(map)
    }
}

impl FromIterator<(String, SqlValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Non-rowset execution metadata (SHOW, DESCRIBE, and friends pass through
/// whatever the driver reported).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionMetadata {
    pub affected_rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<u64>,
}

/// The uniform result of one statement execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub fields: Vec<FieldInfo>,
    pub row_count: usize,
    /// Wall-clock execution time in milliseconds
    pub execution_time_ms: u64,
    /// Set when the row-set was sliced to the executor's row cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    /// Total rows the statement produced before slicing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExecutionMetadata>,
    /// True when served from the executor's result cache
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    /// Milliseconds since the cached entry was stored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_age_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<QueryAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
}

impl QueryResult {
    /// A row-set result with fields extracted by the adapter.
    pub fn with_rows(rows: Vec<Row>, fields: Vec<FieldInfo>, execution_time_ms: u64) -> Self {
        let row_count = rows.len();
        Self {
            rows,
            fields,
            row_count,
            execution_time_ms,
            ..Default::default()
        }
    }

    /// A non-rowset result carrying driver metadata.
    pub fn with_metadata(metadata: ExecutionMetadata, execution_time_ms: u64) -> Self {
        Self {
            row_count: metadata.affected_rows as usize,
            execution_time_ms,
            metadata: Some(metadata),
            ..Default::default()
        }
    }

    /// Whether the result carries a row-set (as opposed to pass-through
    /// driver metadata).
    pub fn is_row_set(&self) -> bool {
        self.metadata.is_none()
    }

    /// Converts rows to a JSON array.
    pub fn rows_to_json(&self) -> JsonValue {
        JsonValue::Array(self.rows.iter().map(Row::to_json).collect())
    }
}

/// One statement of an internal transaction.
#[derive(Debug, Clone)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl SqlStatement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_row() -> Row {
        Row::from_iter([
            ("id".to_string(), SqlValue::Int(1)),
            ("name".to_string(), SqlValue::Text("alice".into())),
        ])
    }

    #[test]
    fn test_row_get() {
        let row = sample_row();
        assert_eq!(row.get("id").unwrap(), &SqlValue::Int(1));
        assert!(row.get("missing").is_err());
        assert_eq!(row.get_or_null("missing"), SqlValue::Null);
    }

    #[test]
    fn test_row_to_json() {
        let json = sample_row().to_json();
        assert_eq!(json["id"], json!(1));
        assert_eq!(json["name"], json!("alice"));
    }

    #[test]
    fn test_with_rows_sets_count() {
        let result = QueryResult::with_rows(
            vec![sample_row(), sample_row()],
            vec![FieldInfo::new("id", "integer", false)],
            12,
        );
        assert_eq!(result.row_count, 2);
        assert_eq!(result.execution_time_ms, 12);
        assert!(result.is_row_set());
        assert!(result.truncated.is_none());
    }

    #[test]
    fn test_metadata_result_is_not_row_set() {
        let result = QueryResult::with_metadata(
            ExecutionMetadata {
                affected_rows: 3,
                last_insert_id: None,
            },
            5,
        );
        assert_eq!(result.row_count, 3);
        assert!(!result.is_row_set());
    }
}
