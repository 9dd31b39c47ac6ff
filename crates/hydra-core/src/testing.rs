//! In-memory stub adapter for tests.
//!
//! Implements the full [`DatabaseAdapter`] contract against canned data so
//! executor, manager, and dispatcher behavior can be exercised without a
//! database. Kept in the library (not behind `cfg(test)`) so downstream
//! crates can drive their own tests with it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::adapter::{
    AdapterEvent, AdapterMetrics, AdapterState, ConnectionInfo, ConnectionStatus, DatabaseAdapter,
    DatabaseType, HealthStatus,
};
use crate::profile::{
    assess_table_quality, ColumnProfile, DataProfiler, ProfileOptions, SamplingInfo, TableProfile,
    TableRelationships,
};
use crate::result::{ExecutionMetadata, FieldInfo, QueryResult, Row, SqlStatement};
use crate::schema::{
    DatabaseInfo, RelationshipMap, SchemaAnalyzer, SchemaInfo, TableInfo, TableStatistics,
};
use crate::value::SqlValue;
use hydra_common::{BrokerError, Result};

/// Canned behavior for one stub query call.
#[derive(Debug, Clone, Default)]
enum StubResponse {
    #[default]
    Empty,
    Rows(Vec<Row>),
    AffectedRows(u64),
    Failure(String),
}

/// A scriptable adapter for tests.
pub struct StubAdapter {
    state: Arc<AdapterState>,
    database_type: DatabaseType,
    response: Mutex<StubResponse>,
    delay_ms: Mutex<u64>,
    connect_error: Mutex<Option<String>>,
    health_error: Mutex<Option<String>>,
    health_latency_ms: Mutex<u64>,
    query_calls: AtomicU64,
    last_query: Mutex<Option<String>>,
    schema: Mutex<SchemaInfo>,
}

impl StubAdapter {
    pub fn new(database_type: DatabaseType) -> Self {
        let adapter_id = format!("{}-stub-0-test", database_type);
        Self {
            state: AdapterState::new(adapter_id, database_type),
            database_type,
            response: Mutex::new(StubResponse::Empty),
            delay_ms: Mutex::new(0),
            connect_error: Mutex::new(None),
            health_error: Mutex::new(None),
            health_latency_ms: Mutex::new(1),
            query_calls: AtomicU64::new(0),
            last_query: Mutex::new(None),
            schema: Mutex::new(SchemaInfo::default()),
        }
    }

    /// A MySQL-typed stub already in the connected state.
    pub fn connected() -> Self {
        let stub = Self::new(DatabaseType::MySql);
        stub.state.mark_connected();
        stub
    }

    pub fn connected_postgres() -> Self {
        let stub = Self::new(DatabaseType::PostgreSql);
        stub.state.mark_connected();
        stub
    }

    pub fn with_rows(self, rows: Vec<Row>) -> Self {
        *self.response.lock() = StubResponse::Rows(rows);
        self
    }

    pub fn with_affected_rows(self, affected: u64) -> Self {
        *self.response.lock() = StubResponse::AffectedRows(affected);
        self
    }

    pub fn with_failure(self, message: impl Into<String>) -> Self {
        *self.response.lock() = StubResponse::Failure(message.into());
        self
    }

    pub fn with_delay_ms(self, delay_ms: u64) -> Self {
        *self.delay_ms.lock() = delay_ms;
        self
    }

    pub fn with_connect_failure(self, message: impl Into<String>) -> Self {
        *self.connect_error.lock() = Some(message.into());
        self
    }

    pub fn with_health_failure(self, message: impl Into<String>) -> Self {
        *self.health_error.lock() = Some(message.into());
        self
    }

    pub fn with_health_latency_ms(self, latency_ms: u64) -> Self {
        *self.health_latency_ms.lock() = latency_ms;
        self
    }

    pub fn with_schema(self, schema: SchemaInfo) -> Self {
        *self.schema.lock() = schema;
        self
    }

    /// How many times `query` reached the stub (admission failures never do).
    pub fn query_calls(&self) -> u64 {
        self.query_calls.load(Ordering::Acquire)
    }

    pub fn last_query(&self) -> Option<String> {
        self.last_query.lock().clone()
    }

    pub fn state(&self) -> &Arc<AdapterState> {
        &self.state
    }

    fn respond(&self, guard: crate::adapter::ActiveQueryGuard) -> Result<QueryResult> {
        match self.response.lock().clone() {
            StubResponse::Empty => {
                let elapsed = guard.success(0);
                Ok(QueryResult::with_rows(Vec::new(), Vec::new(), elapsed))
            }
            StubResponse::Rows(rows) => {
                let fields = rows
                    .first()
                    .map(|row| {
                        row.columns
                            .iter()
                            .map(|(name, value)| {
                                FieldInfo::new(name.clone(), value.category(), value.is_null())
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                let count = rows.len();
                let elapsed = guard.success(count);
                Ok(QueryResult::with_rows(rows, fields, elapsed))
            }
            StubResponse::AffectedRows(affected) => {
                let elapsed = guard.success(affected as usize);
                Ok(QueryResult::with_metadata(
                    ExecutionMetadata {
                        affected_rows: affected,
                        last_insert_id: None,
                    },
                    elapsed,
                ))
            }
            StubResponse::Failure(message) => {
                guard.failure(&message);
                Err(BrokerError::Query(message))
            }
        }
    }
}

#[async_trait]
impl DatabaseAdapter for StubAdapter {
    fn adapter_id(&self) -> String {
        self.state.adapter_id().to_string()
    }

    fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    async fn connect(&self) -> Result<()> {
        if let Some(message) = self.connect_error.lock().clone() {
            return Err(BrokerError::Connection(format!(
                "connection failed: {}",
                message
            )));
        }
        self.state.mark_connected();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.begin_shutdown();
        self.state.mark_disconnected();
        Ok(())
    }

    async fn query(&self, sql: &str, _params: &[SqlValue]) -> Result<QueryResult> {
        self.state.ensure_ready()?;
        let guard = self.state.begin_query();
        self.query_calls.fetch_add(1, Ordering::AcqRel);
        *self.last_query.lock() = Some(sql.to_string());

        let delay = *self.delay_ms.lock();
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        self.respond(guard)
    }

    async fn transaction(&self, statements: &[SqlStatement]) -> Result<Vec<QueryResult>> {
        self.state.ensure_ready()?;
        let mut results = Vec::with_capacity(statements.len());
        for statement in statements {
            results.push(self.query(&statement.sql, &statement.params).await?);
        }
        Ok(results)
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        if let Some(message) = self.health_error.lock().clone() {
            self.state.events.emit(AdapterEvent::HealthCheckFailed {
                adapter_id: self.adapter_id(),
                error: message.clone(),
            });
            return Err(BrokerError::Connection(message));
        }
        let latency = *self.health_latency_ms.lock();
        self.state.events.emit(AdapterEvent::HealthCheckPassed {
            adapter_id: self.adapter_id(),
            response_time_ms: latency,
        });
        Ok(HealthStatus::healthy(latency))
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.state.status(1, 1)
    }

    fn metrics(&self) -> AdapterMetrics {
        self.state.metrics.snapshot()
    }

    fn reset_metrics(&self) {
        self.state.metrics.reset();
    }

    fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            adapter_id: self.adapter_id(),
            database_type: self.database_type,
            host: "stub".to_string(),
            port: self.database_type.default_port(),
            database: "test".to_string(),
            user: "stub".to_string(),
            ssl: false,
            connection_limit: 1,
        }
    }

    fn schema_analyzer(&self) -> Arc<dyn SchemaAnalyzer> {
        Arc::new(StubSchemaAnalyzer {
            schema: self.schema.lock().clone(),
        })
    }

    fn data_profiler(&self) -> Arc<dyn DataProfiler> {
        Arc::new(StubDataProfiler)
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.state.events.subscribe()
    }
}

struct StubSchemaAnalyzer {
    schema: SchemaInfo,
}

#[async_trait]
impl SchemaAnalyzer for StubSchemaAnalyzer {
    async fn full_schema(&self) -> Result<SchemaInfo> {
        Ok(self.schema.clone())
    }

    async fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.schema.tables.iter().map(|t| t.name.clone()).collect())
    }

    async fn table_info(&self, table: &str) -> Result<TableInfo> {
        self.schema
            .tables
            .iter()
            .find(|t| t.name == table)
            .cloned()
            .ok_or_else(|| BrokerError::NotFound(format!("Table '{}' not found", table)))
    }

    async fn table_statistics(&self, table: &str) -> Result<TableStatistics> {
        let info = self.table_info(table).await?;
        Ok(TableStatistics {
            table_name: info.name,
            row_count: info.row_count.unwrap_or(0),
            data_length: info.size_in_bytes.unwrap_or(0),
            index_length: 0,
            engine: None,
            auto_increment: None,
            created_at: None,
            updated_at: None,
        })
    }

    async fn relationships(&self) -> Result<RelationshipMap> {
        let mut map = RelationshipMap::new();
        for table in &self.schema.tables {
            for fk in &table.foreign_keys {
                crate::schema::record_relationship(&mut map, &table.name, &fk.referenced_table);
            }
        }
        Ok(map)
    }

    async fn database_info(&self) -> Result<DatabaseInfo> {
        Ok(DatabaseInfo {
            database_name: "test".to_string(),
            version: "stub-1.0".to_string(),
            database_type: "stub".to_string(),
            character_set: None,
            collation: None,
            size_in_bytes: None,
            table_count: self.schema.tables.len(),
        })
    }
}

struct StubDataProfiler;

#[async_trait]
impl DataProfiler for StubDataProfiler {
    async fn profile_table(&self, table: &str, options: &ProfileOptions) -> Result<TableProfile> {
        let columns = vec![ColumnProfile::new("id", "integer")];
        Ok(TableProfile {
            table_name: table.to_string(),
            total_rows: 0,
            total_columns: columns.len(),
            estimated_size_bytes: 0,
            data_quality: assess_table_quality(table, &columns, None, None),
            columns,
            relationships: TableRelationships::default(),
            sampling: SamplingInfo::for_table(0, options),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_tracks_query_calls() {
        let stub = StubAdapter::connected().with_rows(vec![Row::from_iter([(
            "id".to_string(),
            SqlValue::Int(1),
        )])]);

        let result = stub.query("SELECT 1", &[]).await.unwrap();
        assert_eq!(result.row_count, 1);
        assert_eq!(stub.query_calls(), 1);
        assert_eq!(stub.last_query().unwrap(), "SELECT 1");
    }

    #[tokio::test]
    async fn test_stub_rejects_queries_when_disconnected() {
        let stub = StubAdapter::new(DatabaseType::MySql);
        assert!(stub.query("SELECT 1", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_stub_shutdown_fails_fast() {
        let stub = StubAdapter::connected();
        stub.disconnect().await.unwrap();
        match stub.query("SELECT 1", &[]).await {
            Err(BrokerError::Shutdown) => {}
            other => panic!("expected shutdown error, got {:?}", other),
        }
    }
}
