//! PostgreSQL schema introspection over `information_schema` and
//! `pg_catalog`.
//!
//! Index columns are expanded per `indkey` ordinal with a lateral unnest so
//! key order survives; foreign keys unnest `conkey`/`confkey` pairwise so the
//! local and referenced column lists stay parallel. The default scan covers
//! the `public` schema; an explicit schema set widens it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row as SqlxRow;
use tracing::instrument;

use hydra_common::{BrokerError, Result};
use hydra_core::schema::{
    record_relationship, ColumnInfo, DatabaseInfo, ForeignKeyInfo, IndexInfo, ProcedureInfo,
    RelationshipMap, SchemaAnalyzer, SchemaInfo, TableInfo, TableStatistics, ViewInfo,
};

use crate::adapter::PoolHolder;
use crate::values::{normalize_type, quote_identifier, referential_action};

const TABLES_SQL: &str = r"
    SELECT t.table_name, t.table_schema
    FROM information_schema.tables t
    WHERE t.table_schema = ANY($1) AND t.table_type = 'BASE TABLE'
    ORDER BY t.table_schema, t.table_name";

const COLUMNS_SQL: &str = r"
    SELECT c.table_schema, c.table_name, c.column_name, c.data_type,
           c.is_nullable, c.column_default, c.character_maximum_length,
           c.numeric_precision, c.numeric_scale, c.is_identity,
           EXISTS (
               SELECT 1
               FROM information_schema.table_constraints tc
               JOIN information_schema.key_column_usage kcu
                 ON kcu.constraint_name = tc.constraint_name
                AND kcu.table_schema = tc.table_schema
               WHERE tc.constraint_type = 'PRIMARY KEY'
                 AND tc.table_schema = c.table_schema
                 AND tc.table_name = c.table_name
                 AND kcu.column_name = c.column_name
           ) AS is_primary
    FROM information_schema.columns c
    WHERE c.table_schema = ANY($1)
    ORDER BY c.table_schema, c.table_name, c.ordinal_position";

const INDEXES_SQL: &str = r"
    SELECT n.nspname AS schema_name, t.relname AS table_name,
           i.relname AS index_name, a.attname AS column_name,
           ix.indisunique AS is_unique, ix.indisprimary AS is_primary,
           am.amname AS index_type
    FROM pg_index ix
    JOIN pg_class t ON t.oid = ix.indrelid
    JOIN pg_class i ON i.oid = ix.indexrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_am am ON am.oid = i.relam
    CROSS JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    WHERE n.nspname = ANY($1)
    ORDER BY t.relname, i.relname, k.ord";

const FOREIGN_KEYS_SQL: &str = r"
    SELECT n.nspname AS schema_name, t.relname AS table_name,
           con.conname AS constraint_name, a.attname AS column_name,
           fn.nspname AS foreign_schema, ft.relname AS foreign_table,
           fa.attname AS foreign_column,
           con.confupdtype AS update_action, con.confdeltype AS delete_action
    FROM pg_constraint con
    JOIN pg_class t ON t.oid = con.conrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_class ft ON ft.oid = con.confrelid
    JOIN pg_namespace fn ON fn.oid = ft.relnamespace
    CROSS JOIN LATERAL unnest(con.conkey, con.confkey)
         WITH ORDINALITY AS k(attnum, fattnum, ord)
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    JOIN pg_attribute fa ON fa.attrelid = ft.oid AND fa.attnum = k.fattnum
    WHERE con.contype = 'f' AND n.nspname = ANY($1)
    ORDER BY t.relname, con.conname, k.ord";

const STATISTICS_SQL: &str = r"
    SELECT s.schemaname, s.relname, s.n_live_tup,
           pg_total_relation_size(s.relid) AS total_size
    FROM pg_stat_user_tables s
    WHERE s.schemaname = ANY($1)
    ORDER BY s.relname";

const VIEWS_SQL: &str = r"
    SELECT v.table_name AS view_name, v.table_schema AS view_schema,
           v.view_definition AS definition
    FROM information_schema.views v
    WHERE v.table_schema = ANY($1)
    ORDER BY v.table_name";

const ROUTINES_SQL: &str = r"
    SELECT p.proname AS routine_name, n.nspname AS routine_schema,
           p.prokind AS routine_kind,
           pg_get_function_arguments(p.oid) AS parameters,
           pg_get_function_result(p.oid) AS return_type
    FROM pg_proc p
    JOIN pg_namespace n ON n.oid = p.pronamespace
    WHERE n.nspname = ANY($1) AND p.prokind IN ('f', 'p')
    ORDER BY p.proname";

fn get_string(row: &PgRow, name: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(name).ok().flatten()
}

fn get_i64(row: &PgRow, name: &str) -> Option<i64> {
    if let Ok(Some(value)) = row.try_get::<Option<i64>, _>(name) {
        return Some(value);
    }
    if let Ok(Some(value)) = row.try_get::<Option<i32>, _>(name) {
        return Some(i64::from(value));
    }
    None
}

fn get_bool(row: &PgRow, name: &str) -> bool {
    row.try_get::<Option<bool>, _>(name)
        .ok()
        .flatten()
        .unwrap_or(false)
}

fn get_char(row: &PgRow, name: &str) -> Option<i8> {
    row.try_get::<Option<i8>, _>(name).ok().flatten()
}

/// `schema.table` key used throughout the PostgreSQL analyzer output.
fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", schema, table)
}

fn column_from_row(row: &PgRow) -> ColumnInfo {
    let data_type = get_string(row, "data_type").unwrap_or_default();
    let default_value = get_string(row, "column_default");
    let is_identity = get_string(row, "is_identity").as_deref() == Some("YES");
    let is_serial = default_value
        .as_deref()
        .map(|d| d.starts_with("nextval("))
        .unwrap_or(false);
    ColumnInfo {
        name: get_string(row, "column_name").unwrap_or_default(),
        data_type: normalize_type(&data_type).to_string(),
        nullable: get_string(row, "is_nullable").as_deref() == Some("YES"),
        default_value,
        is_primary_key: get_bool(row, "is_primary"),
        is_auto_increment: is_identity || is_serial,
        max_length: get_i64(row, "character_maximum_length"),
        precision: get_i64(row, "numeric_precision"),
        scale: get_i64(row, "numeric_scale"),
        comment: None,
    }
}

/// PostgreSQL implementation of the analyzer contract.
pub struct PgSchemaAnalyzer {
    pool: Arc<PoolHolder>,
    schemas: Vec<String>,
}

impl PgSchemaAnalyzer {
    pub(crate) fn new(pool: Arc<PoolHolder>) -> Self {
        Self {
            pool,
            schemas: vec!["public".to_string()],
        }
    }

    /// Widens the scan beyond `public`.
    pub fn with_schemas(pool: Arc<PoolHolder>, schemas: Vec<String>) -> Self {
        Self { pool, schemas }
    }

    async fn fetch_indexes(&self) -> Result<HashMap<String, Vec<IndexInfo>>> {
        let pool = self.pool.get()?;
        let rows = sqlx::query(INDEXES_SQL)
            .bind(&self.schemas)
            .fetch_all(&pool)
            .await?;

        let mut by_table: HashMap<String, Vec<IndexInfo>> = HashMap::new();
        for row in &rows {
            let schema = get_string(row, "schema_name").unwrap_or_default();
            let table = get_string(row, "table_name").unwrap_or_default();
            let index_name = get_string(row, "index_name").unwrap_or_default();
            let column = get_string(row, "column_name").unwrap_or_default();
            let indexes = by_table.entry(qualified(&schema, &table)).or_default();
            match indexes.iter_mut().find(|idx| idx.name == index_name) {
                Some(index) => index.columns.push(column),
                None => indexes.push(IndexInfo {
                    name: index_name,
                    columns: vec![column],
                    is_unique: get_bool(row, "is_unique"),
                    is_primary: get_bool(row, "is_primary"),
                    index_type: get_string(row, "index_type")
                        .unwrap_or_else(|| "btree".to_string()),
                }),
            }
        }
        Ok(by_table)
    }

    async fn fetch_foreign_keys(&self) -> Result<HashMap<String, Vec<ForeignKeyInfo>>> {
        let pool = self.pool.get()?;
        let rows = sqlx::query(FOREIGN_KEYS_SQL)
            .bind(&self.schemas)
            .fetch_all(&pool)
            .await?;

        let mut by_table: HashMap<String, Vec<ForeignKeyInfo>> = HashMap::new();
        for row in &rows {
            let schema = get_string(row, "schema_name").unwrap_or_default();
            let table = get_string(row, "table_name").unwrap_or_default();
            let constraint = get_string(row, "constraint_name").unwrap_or_default();
            let column = get_string(row, "column_name").unwrap_or_default();
            let foreign_schema = get_string(row, "foreign_schema").unwrap_or_default();
            let foreign_table = get_string(row, "foreign_table").unwrap_or_default();
            let foreign_column = get_string(row, "foreign_column").unwrap_or_default();

            let keys = by_table.entry(qualified(&schema, &table)).or_default();
            match keys.iter_mut().find(|fk| fk.name == constraint) {
                Some(fk) => {
                    fk.columns.push(column);
                    fk.referenced_columns.push(foreign_column);
                }
                None => keys.push(ForeignKeyInfo {
                    name: constraint,
                    columns: vec![column],
                    referenced_table: qualified(&foreign_schema, &foreign_table),
                    referenced_columns: vec![foreign_column],
                    on_update: referential_action(get_char(row, "update_action").unwrap_or(0))
                        .to_string(),
                    on_delete: referential_action(get_char(row, "delete_action").unwrap_or(0))
                        .to_string(),
                }),
            }
        }
        Ok(by_table)
    }

    async fn fetch_columns(&self) -> Result<HashMap<String, Vec<ColumnInfo>>> {
        let pool = self.pool.get()?;
        let rows = sqlx::query(COLUMNS_SQL)
            .bind(&self.schemas)
            .fetch_all(&pool)
            .await?;
        let mut by_table: HashMap<String, Vec<ColumnInfo>> = HashMap::new();
        for row in &rows {
            let schema = get_string(row, "table_schema").unwrap_or_default();
            let table = get_string(row, "table_name").unwrap_or_default();
            by_table
                .entry(qualified(&schema, &table))
                .or_default()
                .push(column_from_row(row));
        }
        Ok(by_table)
    }

    async fn fetch_statistics(&self) -> Result<HashMap<String, (u64, u64)>> {
        let pool = self.pool.get()?;
        let rows = sqlx::query(STATISTICS_SQL)
            .bind(&self.schemas)
            .fetch_all(&pool)
            .await?;
        let mut by_table = HashMap::new();
        for row in &rows {
            let schema = get_string(row, "schemaname").unwrap_or_default();
            let table = get_string(row, "relname").unwrap_or_default();
            let live = get_i64(row, "n_live_tup").unwrap_or(0).max(0) as u64;
            let size = get_i64(row, "total_size").unwrap_or(0).max(0) as u64;
            by_table.insert(qualified(&schema, &table), (live, size));
        }
        Ok(by_table)
    }
}

#[async_trait]
impl SchemaAnalyzer for PgSchemaAnalyzer {
    #[instrument(skip(self))]
    async fn full_schema(&self) -> Result<SchemaInfo> {
        let pool = self.pool.get()?;
        let table_rows = sqlx::query(TABLES_SQL)
            .bind(&self.schemas)
            .fetch_all(&pool)
            .await?;
        let mut columns = self.fetch_columns().await?;
        let mut indexes = self.fetch_indexes().await?;
        let mut foreign_keys = self.fetch_foreign_keys().await?;
        let statistics = self.fetch_statistics().await?;

        let tables = table_rows
            .iter()
            .map(|row| {
                let schema = get_string(row, "table_schema").unwrap_or_default();
                let name = get_string(row, "table_name").unwrap_or_default();
                let key = qualified(&schema, &name);
                let (row_count, size) = statistics.get(&key).copied().unwrap_or((0, 0));
                TableInfo {
                    columns: columns.remove(&key).unwrap_or_default(),
                    indexes: indexes.remove(&key).unwrap_or_default(),
                    foreign_keys: foreign_keys.remove(&key).unwrap_or_default(),
                    row_count: Some(row_count),
                    size_in_bytes: Some(size),
                    name,
                    schema,
                }
            })
            .collect();

        let view_rows = sqlx::query(VIEWS_SQL)
            .bind(&self.schemas)
            .fetch_all(&pool)
            .await?;
        let views = view_rows
            .iter()
            .map(|row| ViewInfo {
                name: get_string(row, "view_name").unwrap_or_default(),
                schema: get_string(row, "view_schema").unwrap_or_default(),
                definition: get_string(row, "definition"),
            })
            .collect();

        let routine_rows = sqlx::query(ROUTINES_SQL)
            .bind(&self.schemas)
            .fetch_all(&pool)
            .await?;
        let procedures = routine_rows
            .iter()
            .map(|row| {
                let kind = match get_char(row, "routine_kind").map(|c| c as u8 as char) {
                    Some('p') => "PROCEDURE",
                    _ => "FUNCTION",
                };
                ProcedureInfo {
                    name: get_string(row, "routine_name").unwrap_or_default(),
                    schema: get_string(row, "routine_schema").unwrap_or_default(),
                    kind: kind.to_string(),
                    parameters: get_string(row, "parameters"),
                    return_type: get_string(row, "return_type"),
                }
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
        let rows = sqlx::query(TABLES_SQL)
            .bind(&self.schemas)
            .fetch_all(&pool)
            .await?;
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
            .find(|t| t.name == table || qualified(&t.schema, &t.name) == table)
            .ok_or_else(|| BrokerError::NotFound(format!("Table '{}' not found", table)))
    }

    #[instrument(skip(self))]
    async fn table_statistics(&self, table: &str) -> Result<TableStatistics> {
        let pool = self.pool.get()?;
        let sql = r"
            SELECT s.n_live_tup, pg_total_relation_size(s.relid) AS total_size
            FROM pg_stat_user_tables s
            WHERE s.schemaname = ANY($1) AND s.relname = $2";
        let row = sqlx::query(sql)
            .bind(&self.schemas)
            .bind(table)
            .fetch_optional(&pool)
            .await?;

        let (row_count, total_size) = match &row {
            Some(row) => (
                get_i64(row, "n_live_tup").unwrap_or(0).max(0) as u64,
                get_i64(row, "total_size").unwrap_or(0).max(0) as u64,
            ),
            None => (0, 0),
        };

        // The statistics collector lags behind fresh tables; fall back to a
        // live count when it reports nothing.
        let row_count = if row_count == 0 {
            let count_sql = format!("SELECT COUNT(*) AS n FROM {}", quote_identifier(table)?);
            let count_row = sqlx::query(&count_sql).fetch_one(&pool).await?;
            get_i64(&count_row, "n").unwrap_or(0).max(0) as u64
        } else {
            row_count
        };

        Ok(TableStatistics {
            table_name: table.to_string(),
            row_count,
            data_length: total_size,
            index_length: 0,
            engine: None,
            auto_increment: None,
            created_at: None,
            updated_at: None,
        })
    }

    #[instrument(skip(self))]
    async fn relationships(&self) -> Result<RelationshipMap> {
        let foreign_keys = self.fetch_foreign_keys().await?;
        let mut map = RelationshipMap::new();
        for (table, keys) in foreign_keys {
            for fk in keys {
                record_relationship(&mut map, &table, &fk.referenced_table);
            }
        }
        Ok(map)
    }

    #[instrument(skip(self))]
    async fn database_info(&self) -> Result<DatabaseInfo> {
        let pool = self.pool.get()?;
        let basics_sql = r"
            SELECT current_database() AS db, version() AS version,
                   pg_database_size(current_database()) AS db_size,
                   pg_encoding_to_char(d.encoding) AS charset,
                   d.datcollate AS collation
            FROM pg_database d
            WHERE d.datname = current_database()";
        let basics = sqlx::query(basics_sql).fetch_one(&pool).await?;

        let count_sql = r"
            SELECT COUNT(*) AS n FROM information_schema.tables
            WHERE table_schema = ANY($1) AND table_type = 'BASE TABLE'";
        let count_row = sqlx::query(count_sql)
            .bind(&self.schemas)
            .fetch_one(&pool)
            .await?;

        Ok(DatabaseInfo {
            database_name: get_string(&basics, "db").unwrap_or_default(),
            version: get_string(&basics, "version").unwrap_or_default(),
            database_type: "postgresql".to_string(),
            character_set: get_string(&basics, "charset"),
            collation: get_string(&basics, "collation"),
            size_in_bytes: get_i64(&basics, "db_size").map(|v| v.max(0) as u64),
            table_count: get_i64(&count_row, "n").unwrap_or(0).max(0) as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_key_shape() {
        assert_eq!(qualified("public", "users"), "public.users");
        assert_eq!(qualified("audit", "events"), "audit.events");
    }

    #[test]
    fn test_default_scan_covers_public() {
        let analyzer = PgSchemaAnalyzer::new(crate::adapter::PoolHolder::new_for_tests());
        assert_eq!(analyzer.schemas, vec!["public"]);
    }
}
