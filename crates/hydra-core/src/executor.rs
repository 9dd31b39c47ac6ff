//! Timeout-bounded, row-bounded, cached query execution.
//!
//! The executor is the only path caller-supplied SQL takes to an adapter:
//! validate, consult the result cache, race the statement against a timer,
//! cap the row-set, and audit the outcome. Cross-database fan-out bypasses
//! this module by design.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::adapter::DatabaseAdapter;
use crate::config::SecurityConfig;
use crate::result::{FieldInfo, QueryResult};
use crate::validator::{normalize_query, QueryAnalysis, QueryValidator, ValidationReport};
use crate::value::SqlValue;
use hydra_common::{BrokerError, Result};

/// Per-call knobs; unset fields fall back to the security config.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub timeout_ms: Option<u64>,
    pub max_rows: Option<usize>,
    pub enable_audit: bool,
    pub dry_run: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            max_rows: None,
            enable_audit: true,
            dry_run: false,
        }
    }
}

impl QueryOptions {
    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Default::default()
        }
    }

    pub fn unaudited() -> Self {
        Self {
            enable_audit: false,
            ..Default::default()
        }
    }
}

/// One line of the bounded audit ring.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    /// First 1000 characters of the statement
    pub query: String,
    pub execution_time_ms: u64,
    pub row_count: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Validation plus structural analysis, with no database round-trip.
#[derive(Debug, Clone, Serialize)]
pub struct QueryInspection {
    pub validation: ValidationReport,
    pub analysis: QueryAnalysis,
}

/// Executor-level counters for the statistics block.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutorStats {
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub audited_queries: usize,
}

struct CachedResult {
    result: QueryResult,
    stored_at: Instant,
}

/// Result-cache entries older than this are expired.
const RESULT_CACHE_TTL: Duration = Duration::from_secs(30);
/// Opportunistic cleanup threshold.
const RESULT_CACHE_SOFT_CAP: usize = 100;
/// Results larger than this never enter the cache.
const CACHEABLE_ROW_LIMIT: usize = 1_000;
/// Audit ring capacity; oldest entries are dropped first.
const AUDIT_RING_CAPACITY: usize = 1_000;
/// Statements are truncated to this length in audit entries.
const AUDIT_QUERY_LIMIT: usize = 1_000;

/// Calls that make a statement non-deterministic and therefore uncacheable.
const NON_DETERMINISTIC_CALLS: [&str; 4] = ["NOW(", "RAND(", "UUID(", "CONNECTION_ID("];

struct CacheCounters {
    hits: u64,
    misses: u64,
}

/// Validating, caching, auditing execution front for one adapter fleet.
pub struct QueryExecutor {
    validator: QueryValidator,
    security: SecurityConfig,
    result_cache: Mutex<HashMap<String, CachedResult>>,
    cache_counters: Mutex<CacheCounters>,
    audit_ring: Mutex<VecDeque<AuditEntry>>,
}

impl QueryExecutor {
    pub fn new(security: SecurityConfig) -> Self {
        Self {
            validator: QueryValidator::new(&security),
            security,
            result_cache: Mutex::new(HashMap::new()),
            cache_counters: Mutex::new(CacheCounters { hits: 0, misses: 0 }),
            audit_ring: Mutex::new(VecDeque::with_capacity(128)),
        }
    }

    pub fn validator(&self) -> &QueryValidator {
        &self.validator
    }

    /// Executes one statement through `adapter` under the configured bounds.
    pub async fn execute(
        &self,
        adapter: &dyn DatabaseAdapter,
        sql: &str,
        params: &[SqlValue],
        options: &QueryOptions,
    ) -> Result<QueryResult> {
        let report = self.validator.validate(sql);
        if !report.is_valid {
            return Err(BrokerError::Validation(report.failure_message()));
        }
        for warning in &report.warnings {
            warn!(warning = %warning, "Query admitted with warning");
        }

        let sanitized = report
            .sanitized_query
            .unwrap_or_else(|| normalize_query(sql));
        let timeout_ms = options
            .timeout_ms
            .unwrap_or(self.security.max_execution_time_ms);
        let max_rows = options.max_rows.unwrap_or(self.security.max_result_rows);

        let cache_key = Self::cache_key(&sanitized, params)?;
        if !options.dry_run {
            if let Some(hit) = self.cache_lookup(&cache_key) {
                debug!(cache_age_ms = hit.cache_age_ms.unwrap_or(0), "Result cache hit");
                return Ok(hit);
            }
        }

        if options.dry_run {
            let analysis = self.validator.analyze(&sanitized);
            return Ok(QueryResult {
                analysis: Some(analysis),
                cached: Some(false),
                dry_run: Some(true),
                ..Default::default()
            });
        }

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            adapter.query(&sanitized, params),
        )
        .await;

        let mut result = match outcome {
            Err(_elapsed) => {
                // The in-flight statement is dropped, not killed; the
                // adapter's guard records the abandonment.
                let error = BrokerError::Timeout(timeout_ms);
                self.audit(
                    options,
                    &sanitized,
                    started.elapsed().as_millis() as u64,
                    0,
                    Some(error.to_string()),
                );
                return Err(error);
            }
            Ok(Err(error)) => {
                self.audit(
                    options,
                    &sanitized,
                    started.elapsed().as_millis() as u64,
                    0,
                    Some(error.to_string()),
                );
                self.report_suspicious_failure(&sanitized, &error);
                return Err(error);
            }
            Ok(Ok(result)) => result,
        };

        if result.is_row_set() {
            let total = result.rows.len();
            if total > max_rows {
                result.rows.truncate(max_rows);
                result.row_count = max_rows;
                result.truncated = Some(true);
            } else {
                result.truncated = Some(false);
            }
            result.total_rows = Some(total);
            if result.fields.is_empty() {
                result.fields = Self::fields_from_first_row(&result);
            }
        }

        if Self::is_cacheable(&sanitized, &result) {
            self.cache_store(cache_key, &result);
        }

        self.audit(
            options,
            &sanitized,
            result.execution_time_ms,
            result.row_count,
            None,
        );
        Ok(result)
    }

    /// `EXPLAIN`-prefixed execution; never audited.
    pub async fn explain(
        &self,
        adapter: &dyn DatabaseAdapter,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<QueryResult> {
        let explain_sql = format!("EXPLAIN {}", sql);
        self.execute(adapter, &explain_sql, params, &QueryOptions::unaudited())
            .await
    }

    /// Validator-only inspection; never touches the database.
    pub fn inspect(&self, sql: &str) -> QueryInspection {
        QueryInspection {
            validation: self.validator.validate(sql),
            analysis: self.validator.analyze(sql),
        }
    }

    /// Most recent audit entries, newest last.
    pub fn recent_audit(&self, limit: usize) -> Vec<AuditEntry> {
        let ring = self.audit_ring.lock();
        ring.iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> ExecutorStats {
        let counters = self.cache_counters.lock();
        ExecutorStats {
            cache_entries: self.result_cache.lock().len(),
            cache_hits: counters.hits,
            cache_misses: counters.misses,
            audited_queries: self.audit_ring.lock().len(),
        }
    }

    /// Drops every cached result.
    pub fn clear_result_cache(&self) {
        self.result_cache.lock().clear();
    }

    fn cache_key(sanitized: &str, params: &[SqlValue]) -> Result<String> {
        let params_json = serde_json::to_string(params)?;
        Ok(format!("{}:{}", sanitized, params_json))
    }

    fn cache_lookup(&self, key: &str) -> Option<QueryResult> {
        let cache = self.result_cache.lock();
        let Some(entry) = cache.get(key) else {
            drop(cache);
            self.cache_counters.lock().misses += 1;
            return None;
        };
        let age = entry.stored_at.elapsed();
        if age > RESULT_CACHE_TTL {
            drop(cache);
            self.result_cache.lock().remove(key);
            self.cache_counters.lock().misses += 1;
            return None;
        }
        let mut result = entry.result.clone();
        result.cached = Some(true);
        result.cache_age_ms = Some(age.as_millis() as u64);
        self.cache_counters.lock().hits += 1;
        Some(result)
    }

    fn cache_store(&self, key: String, result: &QueryResult) {
        let mut cache = self.result_cache.lock();
        if cache.len() >= RESULT_CACHE_SOFT_CAP {
            cache.retain(|_, entry| entry.stored_at.elapsed() <= RESULT_CACHE_TTL);
        }
        cache.insert(
            key,
            CachedResult {
                result: result.clone(),
                stored_at: Instant::now(),
            },
        );
    }

    /// SELECT-only, deterministic, bounded results with no driver metadata.
    fn is_cacheable(sanitized: &str, result: &QueryResult) -> bool {
        let upper = sanitized.to_uppercase();
        if !upper.starts_with("SELECT") {
            return false;
        }
        if NON_DETERMINISTIC_CALLS
            .iter()
            .any(|call| upper.contains(call))
        {
            return false;
        }
        result.row_count <= CACHEABLE_ROW_LIMIT && result.metadata.is_none()
    }

    fn fields_from_first_row(result: &QueryResult) -> Vec<FieldInfo> {
        let Some(first) = result.rows.first() else {
            return Vec::new();
        };
        first
            .columns
            .iter()
            .map(|(name, value)| FieldInfo::new(name.clone(), value.category(), value.is_null()))
            .collect()
    }

    fn audit(
        &self,
        options: &QueryOptions,
        sanitized: &str,
        execution_time_ms: u64,
        row_count: usize,
        error_message: Option<String>,
    ) {
        if !options.enable_audit || !self.security.enable_audit {
            return;
        }
        let mut ring = self.audit_ring.lock();
        if ring.len() >= AUDIT_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(AuditEntry {
            timestamp: Utc::now(),
            query: sanitized.chars().take(AUDIT_QUERY_LIMIT).collect(),
            execution_time_ms,
            row_count,
            success: error_message.is_none(),
            error_message,
        });
    }

    /// Flags failures whose error text matches common probing shapes.
    fn report_suspicious_failure(&self, sanitized: &str, error: &BrokerError) {
        let message = error.to_string();
        if BrokerError::looks_suspicious(&message) {
            let excerpt: String = sanitized.chars().take(200).collect();
            warn!(
                event = "suspicious_query_error",
                query = %excerpt,
                error = %message,
                "Query failed with a suspicious error shape"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Row;
    use crate::testing::StubAdapter;

    fn executor() -> QueryExecutor {
        QueryExecutor::new(SecurityConfig::default())
    }

    fn rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row::from_iter([("id".to_string(), SqlValue::Int(i as i64))]))
            .collect()
    }

    #[tokio::test]
    async fn test_rejected_query_never_reaches_adapter() {
        let adapter = StubAdapter::connected();
        let executor = executor();

        let error = executor
            .execute(&adapter, "DELETE FROM users", &[], &QueryOptions::default())
            .await
            .unwrap_err();

        assert!(error.to_string().contains("DELETE"));
        assert_eq!(adapter.query_calls(), 0);
        assert_eq!(adapter.metrics().queries_executed, 0);
        assert!(executor.recent_audit(10).is_empty());
    }

    #[tokio::test]
    async fn test_timeout_surfaces_and_restores_active_queries() {
        let adapter = StubAdapter::connected().with_delay_ms(5_000);
        let executor = executor();
        let before = adapter.connection_status().active_queries;

        let error = executor
            .execute(
                &adapter,
                "SELECT 1",
                &[],
                &QueryOptions {
                    timeout_ms: Some(100),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "Query timeout after 100ms");
        assert_eq!(adapter.connection_status().active_queries, before);
        assert_eq!(adapter.metrics().error_count, 1);
    }

    #[tokio::test]
    async fn test_second_call_is_served_from_cache() {
        let adapter = StubAdapter::connected().with_rows(rows(10));
        let executor = executor();
        let options = QueryOptions::default();

        let first = executor
            .execute(&adapter, "SELECT id FROM t LIMIT 10", &[], &options)
            .await
            .unwrap();
        assert_ne!(first.cached, Some(true));

        let second = executor
            .execute(&adapter, "SELECT id FROM t LIMIT 10", &[], &options)
            .await
            .unwrap();

        assert_eq!(second.cached, Some(true));
        assert!(second.cache_age_ms.is_some());
        assert_eq!(second.rows, first.rows);
        assert_eq!(adapter.query_calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_key_distinguishes_params() {
        let adapter = StubAdapter::connected().with_rows(rows(1));
        let executor = executor();
        let options = QueryOptions::default();

        executor
            .execute(
                &adapter,
                "SELECT id FROM t WHERE id = ? LIMIT 1",
                &[SqlValue::Int(1)],
                &options,
            )
            .await
            .unwrap();
        executor
            .execute(
                &adapter,
                "SELECT id FROM t WHERE id = ? LIMIT 1",
                &[SqlValue::Int(2)],
                &options,
            )
            .await
            .unwrap();

        assert_eq!(adapter.query_calls(), 2);
    }

    #[tokio::test]
    async fn test_row_cap_boundary() {
        let executor = executor();
        let options = QueryOptions {
            max_rows: Some(5),
            ..Default::default()
        };

        let at_cap = StubAdapter::connected().with_rows(rows(5));
        let result = executor
            .execute(&at_cap, "SELECT id FROM t", &[], &options)
            .await
            .unwrap();
        assert_eq!(result.truncated, Some(false));
        assert_eq!(result.rows.len(), 5);
        assert_eq!(result.total_rows, Some(5));

        let over_cap = StubAdapter::connected().with_rows(rows(6));
        let result = executor
            .execute(&over_cap, "SELECT id FROM t", &[], &options)
            .await
            .unwrap();
        assert_eq!(result.truncated, Some(true));
        assert_eq!(result.rows.len(), 5);
        assert_eq!(result.total_rows, Some(6));
    }

    #[tokio::test]
    async fn test_dry_run_returns_analysis_without_execution() {
        let adapter = StubAdapter::connected().with_rows(rows(3));
        let executor = executor();

        let result = executor
            .execute(&adapter, "SELECT id FROM t", &[], &QueryOptions::dry_run())
            .await
            .unwrap();

        assert_eq!(result.dry_run, Some(true));
        assert_eq!(result.cached, Some(false));
        assert!(result.rows.is_empty());
        let analysis = result.analysis.unwrap();
        assert_eq!(analysis.operation, "SELECT");
        assert_eq!(adapter.query_calls(), 0);
    }

    #[tokio::test]
    async fn test_non_deterministic_queries_are_not_cached() {
        let adapter = StubAdapter::connected().with_rows(rows(1));
        let executor = executor();
        let options = QueryOptions::default();

        // RAND() warns but is admitted; it must not be served from cache.
        executor
            .execute(&adapter, "SELECT RAND() FROM t LIMIT 1", &[], &options)
            .await
            .unwrap();
        executor
            .execute(&adapter, "SELECT RAND() FROM t LIMIT 1", &[], &options)
            .await
            .unwrap();

        assert_eq!(adapter.query_calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_query_is_audited_not_cached() {
        let adapter = StubAdapter::connected().with_failure("table 'app.missing' doesn't exist");
        let executor = executor();

        let error = executor
            .execute(&adapter, "SELECT id FROM missing", &[], &QueryOptions::default())
            .await
            .unwrap_err();
        assert!(error.to_string().contains("doesn't exist"));

        let audit = executor.recent_audit(10);
        assert_eq!(audit.len(), 1);
        assert!(!audit[0].success);
        assert!(audit[0].error_message.as_ref().unwrap().contains("doesn't exist"));
        assert_eq!(executor.stats().cache_entries, 0);
    }

    #[tokio::test]
    async fn test_audit_can_be_suppressed() {
        let adapter = StubAdapter::connected().with_rows(rows(1));
        let executor = executor();

        executor
            .execute(&adapter, "SELECT id FROM t LIMIT 1", &[], &QueryOptions::unaudited())
            .await
            .unwrap();

        assert!(executor.recent_audit(10).is_empty());
    }

    #[tokio::test]
    async fn test_audit_truncates_long_statements() {
        let adapter = StubAdapter::connected().with_rows(rows(1));
        let executor = executor();

        let long_list = (0..600).map(|i| i.to_string()).collect::<Vec<_>>().join(",");
        let sql = format!("SELECT id FROM t WHERE id IN ({}) LIMIT 1", long_list);
        executor
            .execute(&adapter, &sql, &[], &QueryOptions::default())
            .await
            .unwrap();

        let audit = executor.recent_audit(1);
        assert_eq!(audit[0].query.chars().count(), 1_000);
    }

    #[tokio::test]
    async fn test_explain_prefixes_and_skips_audit() {
        let adapter = StubAdapter::connected().with_rows(rows(1));
        let executor = executor();

        executor
            .explain(&adapter, "SELECT id FROM t LIMIT 1", &[])
            .await
            .unwrap();

        assert_eq!(
            adapter.last_query().unwrap(),
            "EXPLAIN SELECT id FROM t LIMIT 1"
        );
        assert!(executor.recent_audit(10).is_empty());
    }

    #[test]
    fn test_inspect_reports_validation_and_analysis() {
        let executor = executor();
        let inspection = executor.inspect("SELECT id FROM users JOIN orders ON 1=1");
        assert!(inspection.validation.is_valid);
        assert!(inspection.analysis.has_joins);

        let rejected = executor.inspect("DROP TABLE users");
        assert!(!rejected.validation.is_valid);
    }

    #[tokio::test]
    async fn test_metadata_results_pass_through_uncapped() {
        let adapter = StubAdapter::connected().with_affected_rows(7);
        let executor = executor();

        let result = executor
            .execute(&adapter, "SHOW TABLES", &[], &QueryOptions::default())
            .await
            .unwrap();

        assert!(!result.is_row_set());
        assert_eq!(result.row_count, 7);
        assert!(result.truncated.is_none());
    }
}
