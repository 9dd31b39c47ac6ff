//! Schema introspection model.
//!
//! The per-engine analyzers produce these shapes from `INFORMATION_SCHEMA`
//! (MySQL) or `information_schema` + `pg_catalog` (PostgreSQL). Column types
//! are normalized into the broker's cross-engine vocabulary before they leave
//! the analyzer.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hydra_common::Result;

/// One column of a table or view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Normalized type category, not the engine-native name
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    pub is_primary_key: bool,
    pub is_auto_increment: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// One index; `columns` preserves the key order reported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
    /// Engine-reported index method (BTREE, HASH, gin, ...)
    #[serde(rename = "type")]
    pub index_type: String,
}

/// One foreign key; `columns` and `referenced_columns` are parallel,
/// ordinal-ordered lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_update: String,
    pub on_delete: String,
}

/// One table with everything the analyzer knows about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub schema: String,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewInfo {
    pub name: String,
    pub schema: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureInfo {
    pub name: String,
    pub schema: String,
    /// `PROCEDURE` or `FUNCTION`
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
}

/// Full introspection result for one database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub tables: Vec<TableInfo>,
    pub views: Vec<ViewInfo>,
    pub procedures: Vec<ProcedureInfo>,
}

/// Physical statistics for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStatistics {
    pub table_name: String,
    pub row_count: u64,
    pub data_length: u64,
    pub index_length: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_increment: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Server-level description of the connected database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub database_name: String,
    pub version: String,
    pub database_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_set: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_in_bytes: Option<u64>,
    pub table_count: usize,
}

/// Table name to insertion-ordered, distinct list of referenced tables.
///
/// PostgreSQL keys are `schema.table`; MySQL keys are bare `table`.
pub type RelationshipMap = HashMap<String, Vec<String>>;

/// The introspection contract each adapter owns.
#[async_trait]
pub trait SchemaAnalyzer: Send + Sync {
    /// Tables, views, and procedures in one pass.
    async fn full_schema(&self) -> Result<SchemaInfo>;

    /// Table names only (cheap listing).
    async fn table_names(&self) -> Result<Vec<String>>;

    /// Everything about one table; errors when the table is unknown.
    async fn table_info(&self, table: &str) -> Result<TableInfo>;

    async fn table_statistics(&self, table: &str) -> Result<TableStatistics>;

    /// Foreign-key graph over the scanned schema(s).
    async fn relationships(&self) -> Result<RelationshipMap>;

    async fn database_info(&self) -> Result<DatabaseInfo>;
}

/// Appends a referenced table, keeping the target list distinct and in
/// insertion order.
pub fn record_relationship(map: &mut RelationshipMap, table: &str, referenced: &str) {
    let targets = map.entry(table.to_string()).or_default();
    if !targets.iter().any(|existing| existing == referenced) {
        targets.push(referenced.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_relationship_deduplicates() {
        let mut map = RelationshipMap::new();
        record_relationship(&mut map, "orders", "customers");
        record_relationship(&mut map, "orders", "products");
        record_relationship(&mut map, "orders", "customers");

        assert_eq!(
            map.get("orders").unwrap(),
            &vec!["customers".to_string(), "products".to_string()]
        );
    }

    #[test]
    fn test_record_relationship_preserves_insertion_order() {
        let mut map = RelationshipMap::new();
        record_relationship(&mut map, "a", "z");
        record_relationship(&mut map, "a", "m");
        record_relationship(&mut map, "a", "b");

        assert_eq!(map.get("a").unwrap(), &vec!["z", "m", "b"]);
    }
}
