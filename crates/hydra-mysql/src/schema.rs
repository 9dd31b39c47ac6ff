//! MySQL schema introspection over `INFORMATION_SCHEMA`.
//!
//! All catalog reads are scoped to `DATABASE()`, so the analyzer only ever
//! sees the schema the pool is connected to. System-prefixed tables
//! (`mysql_*`, `sys_*`) are excluded.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::mysql::MySqlRow;
use sqlx::Row as SqlxRow;
use tracing::instrument;

use hydra_common::{BrokerError, Result};
use hydra_core::schema::{
    record_relationship, ColumnInfo, DatabaseInfo, ForeignKeyInfo, IndexInfo, ProcedureInfo,
    RelationshipMap, SchemaAnalyzer, SchemaInfo, TableInfo, TableStatistics, ViewInfo,
};

use crate::adapter::PoolHolder;
use crate::values::{normalize_type, quote_identifier};

const TABLES_SQL: &str = r"
    SELECT TABLE_NAME AS table_name, TABLE_SCHEMA AS table_schema,
           TABLE_ROWS AS table_rows, DATA_LENGTH AS data_length,
           INDEX_LENGTH AS index_length, ENGINE AS engine,
           AUTO_INCREMENT AS auto_increment,
           CREATE_TIME AS create_time, UPDATE_TIME AS update_time
    FROM INFORMATION_SCHEMA.TABLES
    WHERE TABLE_SCHEMA = DATABASE()
      AND TABLE_TYPE = 'BASE TABLE'
      AND TABLE_NAME NOT LIKE 'mysql\_%'
      AND TABLE_NAME NOT LIKE 'sys\_%'
    ORDER BY TABLE_NAME";

const COLUMNS_SQL: &str = r"
    SELECT TABLE_NAME AS table_name, COLUMN_NAME AS column_name,
           DATA_TYPE AS data_type, IS_NULLABLE AS is_nullable,
           COLUMN_DEFAULT AS column_default, COLUMN_KEY AS column_key,
           EXTRA AS extra, CHARACTER_MAXIMUM_LENGTH AS max_length,
           NUMERIC_PRECISION AS numeric_precision, NUMERIC_SCALE AS numeric_scale,
           COLUMN_COMMENT AS column_comment
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = DATABASE()
    ORDER BY TABLE_NAME, ORDINAL_POSITION";

const INDEXES_SQL: &str = r"
    SELECT TABLE_NAME AS table_name, INDEX_NAME AS index_name,
           COLUMN_NAME AS column_name, NON_UNIQUE AS non_unique,
           INDEX_TYPE AS index_type
    FROM INFORMATION_SCHEMA.STATISTICS
    WHERE TABLE_SCHEMA = DATABASE()
    ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX";

const FOREIGN_KEYS_SQL: &str = r"
    SELECT kcu.TABLE_NAME AS table_name, kcu.CONSTRAINT_NAME AS constraint_name,
           kcu.COLUMN_NAME AS column_name,
           kcu.REFERENCED_TABLE_NAME AS referenced_table,
           kcu.REFERENCED_COLUMN_NAME AS referenced_column,
           rc.UPDATE_RULE AS update_rule, rc.DELETE_RULE AS delete_rule
    FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
    JOIN INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc
      ON rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
     AND rc.CONSTRAINT_SCHEMA = kcu.TABLE_SCHEMA
    WHERE kcu.TABLE_SCHEMA = DATABASE()
      AND kcu.REFERENCED_TABLE_NAME IS NOT NULL
    ORDER BY kcu.TABLE_NAME, kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION";

const VIEWS_SQL: &str = r"
    SELECT TABLE_NAME AS view_name, TABLE_SCHEMA AS view_schema,
           VIEW_DEFINITION AS definition
    FROM INFORMATION_SCHEMA.VIEWS
    WHERE TABLE_SCHEMA = DATABASE()
    ORDER BY TABLE_NAME";

const ROUTINES_SQL: &str = r"
    SELECT ROUTINE_NAME AS routine_name, ROUTINE_SCHEMA AS routine_schema,
           ROUTINE_TYPE AS routine_type, DTD_IDENTIFIER AS return_type
    FROM INFORMATION_SCHEMA.ROUTINES
    WHERE ROUTINE_SCHEMA = DATABASE()
    ORDER BY ROUTINE_NAME";

const RELATIONSHIPS_SQL: &str = r"
    SELECT TABLE_NAME AS table_name, REFERENCED_TABLE_NAME AS referenced_table
    FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
    WHERE TABLE_SCHEMA = DATABASE()
      AND REFERENCED_TABLE_NAME IS NOT NULL
    ORDER BY TABLE_NAME, ORDINAL_POSITION";

/// Raw index row before grouping by index name.
#[derive(Debug, Clone)]
pub(crate) struct IndexRowRaw {
    pub table_name: String,
    pub index_name: String,
    pub column_name: String,
    pub non_unique: bool,
    pub index_type: String,
}

/// Raw foreign-key row before grouping by constraint name.
#[derive(Debug, Clone)]
pub(crate) struct ForeignKeyRowRaw {
    pub table_name: String,
    pub constraint_name: String,
    pub column_name: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub update_rule: String,
    pub delete_rule: String,
}

/// Groups ordered index rows into `IndexInfo`, preserving `SEQ_IN_INDEX`
/// column order within each index.
pub(crate) fn group_indexes(rows: &[IndexRowRaw]) -> HashMap<String, Vec<IndexInfo>> {
    let mut by_table: HashMap<String, Vec<IndexInfo>> = HashMap::new();
    for row in rows {
        let indexes = by_table.entry(row.table_name.clone()).or_default();
        match indexes.iter_mut().find(|idx| idx.name == row.index_name) {
            Some(index) => index.columns.push(row.column_name.clone()),
            None => indexes.push(IndexInfo {
                name: row.index_name.clone(),
                columns: vec![row.column_name.clone()],
                is_unique: !row.non_unique,
                is_primary: row.index_name == "PRIMARY",
                index_type: row.index_type.clone(),
            }),
        }
    }
    by_table
}

/// Groups ordered FK rows into `ForeignKeyInfo`, keeping the local and
/// referenced column lists parallel.
pub(crate) fn group_foreign_keys(
    rows: &[ForeignKeyRowRaw],
) -> HashMap<String, Vec<ForeignKeyInfo>> {
    let mut by_table: HashMap<String, Vec<ForeignKeyInfo>> = HashMap::new();
    for row in rows {
        let keys = by_table.entry(row.table_name.clone()).or_default();
        match keys.iter_mut().find(|fk| fk.name == row.constraint_name) {
            Some(fk) => {
                fk.columns.push(row.column_name.clone());
                fk.referenced_columns.push(row.referenced_column.clone());
            }
            None => keys.push(ForeignKeyInfo {
                name: row.constraint_name.clone(),
                columns: vec![row.column_name.clone()],
                referenced_table: row.referenced_table.clone(),
                referenced_columns: vec![row.referenced_column.clone()],
                on_update: row.update_rule.clone(),
                on_delete: row.delete_rule.clone(),
            }),
        }
    }
    by_table
}

fn get_string(row: &MySqlRow, name: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(name).ok().flatten()
}

/// `INFORMATION_SCHEMA` counters are BIGINT UNSIGNED on most builds but
/// signed on some forks; accept both.
fn get_u64(row: &MySqlRow, name: &str) -> Option<u64> {
    if let Ok(Some(value)) = row.try_get::<Option<u64>, _>(name) {
        return Some(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<i64>, _>(name) {
        return Some(value.max(0) as u64);
    }
    None
}

fn get_i64(row: &MySqlRow, name: &str) -> Option<i64> {
    if let Ok(Some(value)) = row.try_get::<Option<i64>, _>(name) {
        return Some(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<u64>, _>(name) {
        return Some(value.min(i64::MAX as u64) as i64);
    }
    None
}

fn get_datetime(row: &MySqlRow, name: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    row.try_get::<Option<NaiveDateTime>, _>(name)
        .ok()
        .flatten()
        .map(|naive| naive.and_utc())
}

fn column_from_row(row: &MySqlRow) -> ColumnInfo {
    let data_type = get_string(row, "data_type").unwrap_or_default();
    let column_key = get_string(row, "column_key").unwrap_or_default();
    let extra = get_string(row, "extra").unwrap_or_default();
    let comment = get_string(row, "column_comment").filter(|c| !c.is_empty());
    ColumnInfo {
        name: get_string(row, "column_name").unwrap_or_default(),
        data_type: normalize_type(&data_type).to_string(),
        nullable: get_string(row, "is_nullable").as_deref() == Some("YES"),
        default_value: get_string(row, "column_default"),
        is_primary_key: column_key == "PRI",
        is_auto_increment: extra.contains("auto_increment"),
        max_length: get_i64(row, "max_length"),
        precision: get_i64(row, "numeric_precision"),
        scale: get_i64(row, "numeric_scale"),
        comment,
    }
}

/// MySQL implementation of the analyzer contract.
pub struct MySqlSchemaAnalyzer {
    pool: Arc<PoolHolder>,
}

impl MySqlSchemaAnalyzer {
    pub(crate) fn new(pool: Arc<PoolHolder>) -> Self {
        Self { pool }
    }

    async fn fetch_index_rows(&self) -> Result<Vec<IndexRowRaw>> {
        let pool = self.pool.get()?;
        let rows = sqlx::query(INDEXES_SQL).fetch_all(&pool).await?;
        Ok(rows
            .iter()
            .map(|row| IndexRowRaw {
                table_name: get_string(row, "table_name").unwrap_or_default(),
                index_name: get_string(row, "index_name").unwrap_or_default(),
                column_name: get_string(row, "column_name").unwrap_or_default(),
                non_unique: get_u64(row, "non_unique").unwrap_or(0) == 1,
                index_type: get_string(row, "index_type").unwrap_or_else(|| "BTREE".to_string()),
            })
            .collect())
    }

    async fn fetch_foreign_key_rows(&self) -> Result<Vec<ForeignKeyRowRaw>> {
        let pool = self.pool.get()?;
        let rows = sqlx::query(FOREIGN_KEYS_SQL).fetch_all(&pool).await?;
        Ok(rows
            .iter()
            .map(|row| ForeignKeyRowRaw {
                table_name: get_string(row, "table_name").unwrap_or_default(),
                constraint_name: get_string(row, "constraint_name").unwrap_or_default(),
                column_name: get_string(row, "column_name").unwrap_or_default(),
                referenced_table: get_string(row, "referenced_table").unwrap_or_default(),
                referenced_column: get_string(row, "referenced_column").unwrap_or_default(),
                update_rule: get_string(row, "update_rule").unwrap_or_else(|| "RESTRICT".into()),
                delete_rule: get_string(row, "delete_rule").unwrap_or_else(|| "RESTRICT".into()),
            })
            .collect())
    }

    async fn fetch_columns_by_table(&self) -> Result<HashMap<String, Vec<ColumnInfo>>> {
        let pool = self.pool.get()?;
        let rows = sqlx::query(COLUMNS_SQL).fetch_all(&pool).await?;
        let mut by_table: HashMap<String, Vec<ColumnInfo>> = HashMap::new();
        for row in &rows {
            let table = get_string(row, "table_name").unwrap_or_default();
            by_table.entry(table).or_default().push(column_from_row(row));
        }
        Ok(by_table)
    }
}

#[async_trait]
impl SchemaAnalyzer for MySqlSchemaAnalyzer {
    #[instrument(skip(self))]
    async fn full_schema(&self) -> Result<SchemaInfo> {
        let pool = self.pool.get()?;
        let table_rows = sqlx::query(TABLES_SQL).fetch_all(&pool).await?;
        let mut columns = self.fetch_columns_by_table().await?;
        let mut indexes = group_indexes(&self.fetch_index_rows().await?);
        let mut foreign_keys = group_foreign_keys(&self.fetch_foreign_key_rows().await?);

        let tables = table_rows
            .iter()
            .map(|row| {
                let name = get_string(row, "table_name").unwrap_or_default();
                let data_length = get_u64(row, "data_length").unwrap_or(0);
                let index_length = get_u64(row, "index_length").unwrap_or(0);
                TableInfo {
                    schema: get_string(row, "table_schema").unwrap_or_default(),
                    columns: columns.remove(&name).unwrap_or_default(),
                    indexes: indexes.remove(&name).unwrap_or_default(),
                    foreign_keys: foreign_keys.remove(&name).unwrap_or_default(),
                    row_count: get_u64(row, "table_rows"),
                    size_in_bytes: Some(data_length + index_length),
                    name,
                }
            })
            .collect();

        let view_rows = sqlx::query(VIEWS_SQL).fetch_all(&pool).await?;
        let views = view_rows
            .iter()
            .map(|row| ViewInfo {
                name: get_string(row, "view_name").unwrap_or_default(),
                schema: get_string(row, "view_schema").unwrap_or_default(),
                definition: get_string(row, "definition"),
            })
            .collect();

        let routine_rows = sqlx::query(ROUTINES_SQL).fetch_all(&pool).await?;
        let procedures = routine_rows
            .iter()
            .map(|row| ProcedureInfo {
                name: get_string(row, "routine_name").unwrap_or_default(),
                schema: get_string(row, "routine_schema").unwrap_or_default(),
                kind: get_string(row, "routine_type").unwrap_or_else(|| "PROCEDURE".into()),
                parameters: None,
                return_type: get_string(row, "return_type"),
            })
            .collect();

        Ok(SchemaInfo {
            tables,
            views,
            procedures,
        })
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        let pool = self.pool.get()?;
        let rows = sqlx::query(TABLES_SQL).fetch_all(&pool).await?;
        Ok(rows
            .iter()
            .filter_map(|row| get_string(row, "table_name"))
            .collect())
    }

    #[instrument(skip(self))]
    async fn table_info(&self, table: &str) -> Result<TableInfo> {
        let schema = self.full_schema().await?;
        schema
            .tables
            .into_iter()
            .find(|t| t.name == table)
            .ok_or_else(|| BrokerError::NotFound(format!("Table '{}' not found", table)))
    }

    #[instrument(skip(self))]
    async fn table_statistics(&self, table: &str) -> Result<TableStatistics> {
        let pool = self.pool.get()?;
        let sql = r"
            SELECT TABLE_ROWS AS table_rows, DATA_LENGTH AS data_length,
                   INDEX_LENGTH AS index_length, ENGINE AS engine,
                   AUTO_INCREMENT AS auto_increment,
                   CREATE_TIME AS create_time, UPDATE_TIME AS update_time
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ?";
        let row = sqlx::query(sql)
            .bind(table)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| BrokerError::NotFound(format!("Table '{}' not found", table)))?;

        // TABLE_ROWS is an estimate for InnoDB; fall back to a live count
        // when the statistics row carries nothing.
        let row_count = match get_u64(&row, "table_rows") {
            Some(count) => count,
            None => {
                let count_sql = format!("SELECT COUNT(*) AS n FROM {}", quote_identifier(table)?);
                let count_row = sqlx::query(&count_sql).fetch_one(&pool).await?;
                get_u64(&count_row, "n").unwrap_or(0)
            }
        };

        Ok(TableStatistics {
            table_name: table.to_string(),
            row_count,
            data_length: get_u64(&row, "data_length").unwrap_or(0),
            index_length: get_u64(&row, "index_length").unwrap_or(0),
            engine: get_string(&row, "engine"),
            auto_increment: get_u64(&row, "auto_increment"),
            created_at: get_datetime(&row, "create_time"),
            updated_at: get_datetime(&row, "update_time"),
        })
    }

    #[instrument(skip(self))]
    async fn relationships(&self) -> Result<RelationshipMap> {
        let pool = self.pool.get()?;
        let rows = sqlx::query(RELATIONSHIPS_SQL).fetch_all(&pool).await?;
        let mut map = RelationshipMap::new();
        for row in &rows {
            let table = get_string(row, "table_name").unwrap_or_default();
            let referenced = get_string(row, "referenced_table").unwrap_or_default();
            if !table.is_empty() && !referenced.is_empty() {
                record_relationship(&mut map, &table, &referenced);
            }
        }
        Ok(map)
    }

    #[instrument(skip(self))]
    async fn database_info(&self) -> Result<DatabaseInfo> {
        let pool = self.pool.get()?;

        let basics = sqlx::query("SELECT DATABASE() AS db, VERSION() AS version")
            .fetch_one(&pool)
            .await?;
        let charset_sql = r"
            SELECT DEFAULT_CHARACTER_SET_NAME AS charset,
                   DEFAULT_COLLATION_NAME AS collation
            FROM INFORMATION_SCHEMA.SCHEMATA
            WHERE SCHEMA_NAME = DATABASE()";
        let charset_row = sqlx::query(charset_sql).fetch_optional(&pool).await?;
        let size_sql = r"
            SELECT SUM(DATA_LENGTH + INDEX_LENGTH) AS total_size,
                   COUNT(*) AS table_count
            FROM INFORMATION_SCHEMA.TABLES
            WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE'";
        let size_row = sqlx::query(size_sql).fetch_one(&pool).await?;

        Ok(DatabaseInfo {
            database_name: get_string(&basics, "db").unwrap_or_default(),
            version: get_string(&basics, "version").unwrap_or_default(),
            database_type: "mysql".to_string(),
            character_set: charset_row.as_ref().and_then(|row| get_string(row, "charset")),
            collation: charset_row.as_ref().and_then(|row| get_string(row, "collation")),
            size_in_bytes: get_u64(&size_row, "total_size"),
            table_count: get_u64(&size_row, "table_count").unwrap_or(0) as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_row(table: &str, index: &str, column: &str, non_unique: bool) -> IndexRowRaw {
        IndexRowRaw {
            table_name: table.to_string(),
            index_name: index.to_string(),
            column_name: column.to_string(),
            non_unique,
            index_type: "BTREE".to_string(),
        }
    }

    #[test]
    fn test_group_indexes_preserves_column_order() {
        let rows = vec![
            index_row("users", "idx_name_email", "name", true),
            index_row("users", "idx_name_email", "email", true),
            index_row("users", "PRIMARY", "id", false),
        ];
        let grouped = group_indexes(&rows);
        let indexes = &grouped["users"];

        let composite = indexes.iter().find(|i| i.name == "idx_name_email").unwrap();
        assert_eq!(composite.columns, vec!["name", "email"]);
        assert!(!composite.is_unique);
        assert!(!composite.is_primary);

        let primary = indexes.iter().find(|i| i.name == "PRIMARY").unwrap();
        assert!(primary.is_unique);
        assert!(primary.is_primary);
    }

    #[test]
    fn test_group_foreign_keys_parallel_columns() {
        let rows = vec![
            ForeignKeyRowRaw {
                table_name: "order_items".into(),
                constraint_name: "fk_order".into(),
                column_name: "order_id".into(),
                referenced_table: "orders".into(),
                referenced_column: "id".into(),
                update_rule: "CASCADE".into(),
                delete_rule: "RESTRICT".into(),
            },
            ForeignKeyRowRaw {
                table_name: "order_items".into(),
                constraint_name: "fk_order".into(),
                column_name: "order_region".into(),
                referenced_table: "orders".into(),
                referenced_column: "region".into(),
                update_rule: "CASCADE".into(),
                delete_rule: "RESTRICT".into(),
            },
        ];
        let grouped = group_foreign_keys(&rows);
        let fk = &grouped["order_items"][0];

        assert_eq!(fk.columns, vec!["order_id", "order_region"]);
        assert_eq!(fk.referenced_columns, vec!["id", "region"]);
        assert_eq!(fk.referenced_table, "orders");
        assert_eq!(fk.on_update, "CASCADE");
        assert_eq!(fk.on_delete, "RESTRICT");
    }

    #[test]
    fn test_group_foreign_keys_separates_constraints() {
        let rows = vec![
            ForeignKeyRowRaw {
                table_name: "order_items".into(),
                constraint_name: "fk_order".into(),
                column_name: "order_id".into(),
                referenced_table: "orders".into(),
                referenced_column: "id".into(),
                update_rule: "NO ACTION".into(),
                delete_rule: "NO ACTION".into(),
            },
            ForeignKeyRowRaw {
                table_name: "order_items".into(),
                constraint_name: "fk_product".into(),
                column_name: "product_id".into(),
                referenced_table: "products".into(),
                referenced_column: "id".into(),
                update_rule: "NO ACTION".into(),
                delete_rule: "CASCADE".into(),
            },
        ];
        let grouped = group_foreign_keys(&rows);
        assert_eq!(grouped["order_items"].len(), 2);
    }
}
