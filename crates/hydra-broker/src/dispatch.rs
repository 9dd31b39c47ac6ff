//! Cross-database fan-out.
//!
//! Items execute concurrently on distinct pools; results come back in input
//! order with per-item success or error. This is the only place partial
//! success is observable to the caller. The dispatcher never consults or
//! fills the executor's result cache: cross-DB fan-out is an exploratory,
//! uncached path.

use std::time::Instant;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use hydra_core::result::{FieldInfo, Row};
use hydra_core::validator::QueryValidator;
use hydra_core::value::SqlValue;

use crate::manager::ConnectionManager;

const SQL_EXCERPT_LIMIT: usize = 100;

/// One query of a cross-database call.
#[derive(Debug, Clone, Deserialize)]
pub struct CrossQueryItem {
    /// Pool name (the `database` argument of single-pool tools)
    pub pool: String,
    pub sql: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub parameters: Vec<serde_json::Value>,
}

/// Outcome of one item, labeled with its pool and alias.
#[derive(Debug, Clone, Serialize)]
pub struct CrossQueryItemResult {
    pub pool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub sql_excerpt: String,
    pub success: bool,
    pub execution_time_ms: u64,
    pub row_count: usize,
    pub rows: Vec<Row>,
    pub fields: Vec<FieldInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CrossQuerySummary {
    pub total_queries: usize,
    pub total_rows: usize,
    pub total_execution_time_ms: u64,
    pub failed_queries: usize,
}

/// Merged, per-pool-labeled result of one fan-out call.
#[derive(Debug, Clone, Serialize)]
pub struct CrossQueryResult {
    pub summary: CrossQuerySummary,
    pub results: Vec<CrossQueryItemResult>,
}

fn excerpt(sql: &str) -> String {
    sql.chars().take(SQL_EXCERPT_LIMIT).collect()
}

fn failed_item(item: &CrossQueryItem, error: String) -> CrossQueryItemResult {
    CrossQueryItemResult {
        pool: item.pool.clone(),
        alias: item.alias.clone(),
        sql_excerpt: excerpt(&item.sql),
        success: false,
        execution_time_ms: 0,
        row_count: 0,
        rows: Vec::new(),
        fields: Vec::new(),
        error: Some(error),
    }
}

/// Executes the items concurrently across their pools.
///
/// Every statement still passes the read-only validator; a rejection is an
/// item-level error with no adapter round-trip for that item.
#[instrument(skip(manager, validator, items), fields(item_count = items.len()))]
pub async fn cross_query(
    manager: &ConnectionManager,
    validator: &QueryValidator,
    items: &[CrossQueryItem],
) -> CrossQueryResult {
    let tasks = items.iter().map(|item| async move {
        let report = validator.validate(&item.sql);
        if !report.is_valid {
            return failed_item(item, report.failure_message());
        }
        let sanitized = report.sanitized_query.unwrap_or_else(|| item.sql.clone());

        let adapter = match manager.get_connection(Some(&item.pool)) {
            Ok(adapter) => adapter,
            Err(error) => return failed_item(item, error.to_string()),
        };

        let params = match SqlValue::params_from_json(&item.parameters) {
            Ok(params) => params,
            Err(error) => return failed_item(item, error.to_string()),
        };

        let started = Instant::now();
        match adapter.query(&sanitized, &params).await {
            Ok(result) => CrossQueryItemResult {
                pool: item.pool.clone(),
                alias: item.alias.clone(),
                sql_excerpt: excerpt(&item.sql),
                success: true,
                execution_time_ms: started.elapsed().as_millis() as u64,
                row_count: result.row_count,
                rows: result.rows,
                fields: result.fields,
                error: None,
            },
            Err(error) => failed_item(item, error.to_string()),
        }
    });

    // join_all preserves input order in its output.
    let results = join_all(tasks).await;

    let summary = CrossQuerySummary {
        total_queries: results.len(),
        total_rows: results.iter().map(|r| r.row_count).sum(),
        total_execution_time_ms: results.iter().map(|r| r.execution_time_ms).sum(),
        failed_queries: results.iter().filter(|r| !r.success).count(),
    };

    CrossQueryResult { summary, results }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydra_core::config::SecurityConfig;
    use hydra_core::testing::StubAdapter;
    use std::sync::Arc;

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row::from_iter([("id".to_string(), SqlValue::Int(i as i64))]))
            .collect()
    }

    fn entry() -> hydra_core::config::ConnectionConfig {
        serde_json::from_value(serde_json::json!({
            "host": "stub", "user": "u", "database": "d"
        }))
        .unwrap()
    }

    fn item(pool: &str, alias: Option<&str>) -> CrossQueryItem {
        CrossQueryItem {
            pool: pool.to_string(),
            sql: "SELECT id FROM t LIMIT 10".to_string(),
            alias: alias.map(str::to_string),
            parameters: Vec::new(),
        }
    }

    fn validator() -> QueryValidator {
        QueryValidator::new(&SecurityConfig::default())
    }

    #[tokio::test]
    async fn test_fan_out_preserves_order_and_totals() {
        let manager = ConnectionManager::new();
        manager.register(
            "a",
            entry(),
            Arc::new(StubAdapter::connected().with_rows(rows(3))),
        );
        manager.register(
            "b",
            entry(),
            Arc::new(StubAdapter::connected_postgres().with_rows(rows(5))),
        );

        let items = vec![item("a", Some("A")), item("b", Some("B"))];
        let outcome = cross_query(&manager, &validator(), &items).await;

        assert_eq!(outcome.summary.total_queries, 2);
        assert_eq!(outcome.summary.total_rows, 8);
        assert_eq!(outcome.summary.failed_queries, 0);

        assert_eq!(outcome.results[0].pool, "a");
        assert_eq!(outcome.results[0].alias.as_deref(), Some("A"));
        assert_eq!(outcome.results[0].row_count, 3);
        assert_eq!(outcome.results[1].pool, "b");
        assert_eq!(outcome.results[1].alias.as_deref(), Some("B"));
        assert_eq!(outcome.results[1].row_count, 5);
    }

    #[tokio::test]
    async fn test_partial_failure_is_per_item() {
        let manager = ConnectionManager::new();
        manager.register(
            "good",
            entry(),
            Arc::new(StubAdapter::connected().with_rows(rows(2))),
        );
        manager.register(
            "bad",
            entry(),
            Arc::new(StubAdapter::connected().with_failure("table 'd.t' doesn't exist")),
        );

        let items = vec![item("good", None), item("bad", None)];
        let outcome = cross_query(&manager, &validator(), &items).await;

        assert_eq!(outcome.summary.failed_queries, 1);
        assert_eq!(outcome.summary.total_rows, 2);
        assert!(outcome.results[0].success);
        assert!(!outcome.results[1].success);
        assert!(outcome.results[1]
            .error
            .as_deref()
            .unwrap()
            .contains("doesn't exist"));
    }

    #[tokio::test]
    async fn test_unknown_pool_is_an_item_error() {
        let manager = ConnectionManager::new();
        manager.register(
            "only",
            entry(),
            Arc::new(StubAdapter::connected().with_rows(rows(1))),
        );

        let items = vec![item("missing", None), item("only", None)];
        let outcome = cross_query(&manager, &validator(), &items).await;

        assert!(!outcome.results[0].success);
        assert!(outcome.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("not found"));
        assert!(outcome.results[1].success);
    }

    #[tokio::test]
    async fn test_rejected_sql_never_reaches_the_adapter() {
        let manager = ConnectionManager::new();
        let stub = Arc::new(StubAdapter::connected().with_rows(rows(1)));
        let adapter: Arc<dyn hydra_core::adapter::DatabaseAdapter> =
            Arc::clone(&stub) as Arc<dyn hydra_core::adapter::DatabaseAdapter>;
        manager.register("a", entry(), adapter);

        let items = vec![CrossQueryItem {
            pool: "a".to_string(),
            sql: "DELETE FROM t".to_string(),
            alias: None,
            parameters: Vec::new(),
        }];
        let outcome = cross_query(&manager, &validator(), &items).await;

        assert!(!outcome.results[0].success);
        assert!(outcome.results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("DELETE"));
        assert_eq!(stub.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_sql_excerpt_is_bounded() {
        let manager = ConnectionManager::new();
        manager.register(
            "a",
            entry(),
            Arc::new(StubAdapter::connected().with_rows(rows(1))),
        );

        let long_sql = format!("SELECT id FROM t WHERE id IN ({}) LIMIT 1", "1,".repeat(200));
        let items = vec![CrossQueryItem {
            pool: "a".to_string(),
            sql: long_sql,
            alias: None,
            parameters: Vec::new(),
        }];
        let outcome = cross_query(&manager, &validator(), &items).await;
        assert_eq!(outcome.results[0].sql_excerpt.chars().count(), 100);
    }
}
