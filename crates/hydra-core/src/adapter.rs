//! The uniform database adapter contract.
//!
//! Every backend implements [`DatabaseAdapter`]; the manager, executor, and
//! dispatcher only ever see this trait. The module also carries the shared
//! runtime machinery (status flags, metrics recorder, event bus, active-query
//! guard) so both backends keep identical lifecycle semantics.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::profile::DataProfiler;
use crate::result::{QueryResult, SqlStatement};
use crate::schema::SchemaAnalyzer;
use crate::value::SqlValue;
use hydra_common::{BrokerError, Result};

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatabaseType {
    #[serde(rename = "mysql", alias = "mariadb")]
    MySql,
    #[serde(rename = "postgresql", alias = "postgres", alias = "pg")]
    PostgreSql,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::MySql => "mysql",
            DatabaseType::PostgreSql => "postgresql",
        }
    }

    /// Default port for the engine.
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::MySql => 3306,
            DatabaseType::PostgreSql => 5432,
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseType {
    type Err = BrokerError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DatabaseType::MySql),
            "postgresql" | "postgres" | "pg" => Ok(DatabaseType::PostgreSql),
            other => Err(BrokerError::Unsupported(other.to_string())),
        }
    }
}

/// Point-in-time view of one adapter's connection state.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub is_connected: bool,
    /// Current physical connections held by the pool
    pub connection_count: u32,
    /// Idle connections available in the pool
    pub idle_connections: u32,
    /// Statements currently in flight through this adapter
    pub active_queries: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_connection_time: Option<DateTime<Utc>>,
    pub uptime_ms: u64,
    pub database_type: DatabaseType,
}

/// Cumulative execution counters for one adapter.
#[derive(Debug, Clone, Serialize)]
pub struct AdapterMetrics {
    pub queries_executed: u64,
    pub total_execution_time_ms: u64,
    pub average_execution_time_ms: f64,
    pub error_count: u64,
    /// Percentage of executions that succeeded, 0-100
    pub success_rate: f64,
    pub last_metrics_reset: DateTime<Utc>,
}

/// Health probe outcome.
///
/// Manager-level aggregation converts probe failures into
/// `{is_healthy: false, response_time_ms: 0, error}` entries so one bad pool
/// never hides the others.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub response_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthStatus {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            is_healthy: true,
            response_time_ms,
            error: None,
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            is_healthy: false,
            response_time_ms: 0,
            error: Some(error.into()),
        }
    }
}

/// Secret-free description of where an adapter points.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionInfo {
    pub adapter_id: String,
    pub database_type: DatabaseType,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub ssl: bool,
    pub connection_limit: u32,
}

/// Events emitted by adapters, best-effort and ordered only within one
/// adapter by their cause.
#[derive(Debug, Clone)]
pub enum AdapterEvent {
    Connected {
        adapter_id: String,
    },
    Disconnected {
        adapter_id: String,
    },
    QueryExecuted {
        adapter_id: String,
        execution_time_ms: u64,
        row_count: usize,
    },
    QueryFailed {
        adapter_id: String,
        error: String,
    },
    HealthCheckPassed {
        adapter_id: String,
        response_time_ms: u64,
    },
    HealthCheckFailed {
        adapter_id: String,
        error: String,
    },
    /// Fires once every 100 executed queries
    MetricsCollected {
        adapter_id: String,
        metrics: AdapterMetrics,
    },
}

/// Every 100 executed queries an adapter publishes a metrics snapshot.
pub const METRICS_EMIT_INTERVAL: u64 = 100;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Broadcast fan-out for adapter events.
///
/// Emission never blocks; lagging receivers lose events rather than stall
/// the query path.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<AdapterEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn emit(&self, event: AdapterEvent) {
        // No receivers is fine; consumers are optional.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct MetricsInner {
    queries_executed: u64,
    total_execution_time_ms: u64,
    error_count: u64,
    last_metrics_reset: DateTime<Utc>,
}

/// Interior-mutable metrics store shared by both backends.
///
/// Counters are updated under one lock so a snapshot never observes a torn
/// average.
#[derive(Debug)]
pub struct MetricsRecorder {
    inner: Mutex<MetricsInner>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsInner {
                queries_executed: 0,
                total_execution_time_ms: 0,
                error_count: 0,
                last_metrics_reset: Utc::now(),
            }),
        }
    }

    /// Records a successful execution and returns the running total, so the
    /// caller can decide whether a `MetricsCollected` event is due.
    pub fn record_success(&self, execution_time_ms: u64) -> u64 {
        let mut inner = self.inner.lock();
        inner.queries_executed += 1;
        inner.total_execution_time_ms += execution_time_ms;
        inner.queries_executed
    }

    /// Records a failed execution. Failures count toward `queries_executed`
    /// so the success rate reflects every attempt.
    pub fn record_failure(&self, execution_time_ms: u64) -> u64 {
        let mut inner = self.inner.lock();
        inner.queries_executed += 1;
        inner.total_execution_time_ms += execution_time_ms;
        inner.error_count += 1;
        inner.queries_executed
    }

    pub fn snapshot(&self) -> AdapterMetrics {
        let inner = self.inner.lock();
        let average = if inner.queries_executed > 0 {
            inner.total_execution_time_ms as f64 / inner.queries_executed as f64
        } else {
            0.0
        };
        let success_rate = if inner.queries_executed > 0 {
            (inner.queries_executed - inner.error_count) as f64 / inner.queries_executed as f64
                * 100.0
        } else {
            100.0
        };
        AdapterMetrics {
            queries_executed: inner.queries_executed,
            total_execution_time_ms: inner.total_execution_time_ms,
            average_execution_time_ms: average,
            error_count: inner.error_count,
            success_rate,
            last_metrics_reset: inner.last_metrics_reset,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.queries_executed = 0;
        inner.total_execution_time_ms = 0;
        inner.error_count = 0;
        inner.last_metrics_reset = Utc::now();
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared lifecycle state for one adapter instance.
///
/// Both backends hold an `Arc<AdapterState>` and route connect/disconnect,
/// query accounting, metrics, and events through it, which keeps the state
/// machine (`UNCREATED -> CONNECTING -> CONNECTED -> DISCONNECTING ->
/// DISCONNECTED`) identical across engines.
#[derive(Debug)]
pub struct AdapterState {
    adapter_id: String,
    database_type: DatabaseType,
    connected: AtomicBool,
    shutting_down: AtomicBool,
    active_queries: AtomicU64,
    connected_at: Mutex<Option<DateTime<Utc>>>,
    pub metrics: MetricsRecorder,
    pub events: EventBus,
}

impl AdapterState {
    pub fn new(adapter_id: impl Into<String>, database_type: DatabaseType) -> Arc<Self> {
        Arc::new(Self {
            adapter_id: adapter_id.into(),
            database_type,
            connected: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            active_queries: AtomicU64::new(0),
            connected_at: Mutex::new(None),
            metrics: MetricsRecorder::new(),
            events: EventBus::new(),
        })
    }

    pub fn adapter_id(&self) -> &str {
        &self.adapter_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn active_queries(&self) -> u64 {
        self.active_queries.load(Ordering::Acquire)
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        *self.connected_at.lock()
    }

    pub fn uptime_ms(&self) -> u64 {
        self.connected_at()
            .map(|at| (Utc::now() - at).num_milliseconds().max(0) as u64)
            .unwrap_or(0)
    }

    /// Rejects calls arriving while disconnected or after shutdown began.
    pub fn ensure_ready(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(BrokerError::Shutdown);
        }
        if !self.is_connected() {
            return Err(BrokerError::Connection(
                "adapter is not connected".to_string(),
            ));
        }
        Ok(())
    }

    pub fn mark_connected(&self) {
        self.connected.store(true, Ordering::Release);
        self.shutting_down.store(false, Ordering::Release);
        *self.connected_at.lock() = Some(Utc::now());
        self.events.emit(AdapterEvent::Connected {
            adapter_id: self.adapter_id.clone(),
        });
    }

    /// Flips the shutdown flag; later `query`/`transaction` calls fail fast.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
        *self.connected_at.lock() = None;
        self.events.emit(AdapterEvent::Disconnected {
            adapter_id: self.adapter_id.clone(),
        });
    }

    /// Starts tracking one in-flight statement.
    ///
    /// The returned guard restores `active_queries` on every exit path,
    /// including a caller dropping the future mid-race.
    pub fn begin_query(self: &Arc<Self>) -> ActiveQueryGuard {
        self.active_queries.fetch_add(1, Ordering::AcqRel);
        ActiveQueryGuard {
            state: Arc::clone(self),
            started: Instant::now(),
            settled: false,
        }
    }

    pub fn status(&self, connection_count: u32, idle_connections: u32) -> ConnectionStatus {
        ConnectionStatus {
            is_connected: self.is_connected(),
            connection_count,
            idle_connections,
            active_queries: self.active_queries(),
            last_connection_time: self.connected_at(),
            uptime_ms: self.uptime_ms(),
            database_type: self.database_type,
        }
    }

    fn settle_success(&self, execution_time_ms: u64, row_count: usize) {
        let executed = self.metrics.record_success(execution_time_ms);
        self.active_queries.fetch_sub(1, Ordering::AcqRel);
        self.events.emit(AdapterEvent::QueryExecuted {
            adapter_id: self.adapter_id.clone(),
            execution_time_ms,
            row_count,
        });
        self.maybe_emit_metrics(executed);
    }

    fn settle_failure(&self, execution_time_ms: u64, error: &str) {
        let executed = self.metrics.record_failure(execution_time_ms);
        self.active_queries.fetch_sub(1, Ordering::AcqRel);
        self.events.emit(AdapterEvent::QueryFailed {
            adapter_id: self.adapter_id.clone(),
            error: error.to_string(),
        });
        self.maybe_emit_metrics(executed);
    }

    fn maybe_emit_metrics(&self, executed: u64) {
        if executed > 0 && executed % METRICS_EMIT_INTERVAL == 0 {
            self.events.emit(AdapterEvent::MetricsCollected {
                adapter_id: self.adapter_id.clone(),
                metrics: self.metrics.snapshot(),
            });
        }
    }
}

/// RAII accounting for one in-flight statement.
///
/// Call [`success`](Self::success) or [`failure`](Self::failure) when the
/// statement settles; if the guard is dropped while still armed (the caller
/// abandoned the future, e.g. a lost timeout race), the statement is recorded
/// as a failure so `active_queries` and `error_count` stay truthful.
#[derive(Debug)]
pub struct ActiveQueryGuard {
    state: Arc<AdapterState>,
    started: Instant,
    settled: bool,
}

impl ActiveQueryGuard {
    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub fn success(mut self, row_count: usize) -> u64 {
        let elapsed = self.elapsed_ms();
        self.settled = true;
        self.state.settle_success(elapsed, row_count);
        elapsed
    }

    pub fn failure(mut self, error: &str) -> u64 {
        let elapsed = self.elapsed_ms();
        self.settled = true;
        self.state.settle_failure(elapsed, error);
        elapsed
    }
}

impl Drop for ActiveQueryGuard {
    fn drop(&mut self) {
        if !self.settled {
            let elapsed = self.elapsed_ms();
            warn!(
                adapter_id = %self.state.adapter_id,
                elapsed_ms = elapsed,
                "In-flight statement abandoned before completion"
            );
            self.state.settle_failure(elapsed, "statement abandoned before completion");
        }
    }
}

/// The capability set every backend exposes.
///
/// Adapters never interpret SQL; read-only enforcement belongs to the
/// validator upstream.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Stable identifier of shape `type-host-port-database`.
    fn adapter_id(&self) -> String;

    fn database_type(&self) -> DatabaseType;

    /// Establishes the pool and verifies it with a ping. Idempotent when
    /// already connected (warn + no-op).
    async fn connect(&self) -> Result<()>;

    /// Sets the shutdown flag, then closes the pool.
    async fn disconnect(&self) -> Result<()>;

    /// Executes a single parameterized statement through the pool.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult>;

    /// Runs the statements on one dedicated connection inside an explicit
    /// BEGIN/COMMIT, rolling back on the first failure.
    async fn transaction(&self, statements: &[SqlStatement]) -> Result<Vec<QueryResult>>;

    async fn health_check(&self) -> Result<HealthStatus>;

    fn connection_status(&self) -> ConnectionStatus;

    fn metrics(&self) -> AdapterMetrics;

    fn reset_metrics(&self);

    /// Secret-free connection description.
    fn connection_info(&self) -> ConnectionInfo;

    fn schema_analyzer(&self) -> Arc<dyn SchemaAnalyzer>;

    fn data_profiler(&self) -> Arc<dyn DataProfiler>;

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent>;
}

impl fmt::Debug for dyn DatabaseAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatabaseAdapter({})", self.adapter_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_parsing() {
        assert_eq!("mysql".parse::<DatabaseType>().unwrap(), DatabaseType::MySql);
        assert_eq!(
            "PostgreSQL".parse::<DatabaseType>().unwrap(),
            DatabaseType::PostgreSql
        );
        assert_eq!("pg".parse::<DatabaseType>().unwrap(), DatabaseType::PostgreSql);
        assert!("oracle".parse::<DatabaseType>().is_err());
    }

    #[test]
    fn test_metrics_average_and_success_rate() {
        let recorder = MetricsRecorder::new();
        recorder.record_success(10);
        recorder.record_success(30);
        recorder.record_failure(20);

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.queries_executed, 3);
        assert_eq!(snapshot.total_execution_time_ms, 60);
        assert!((snapshot.average_execution_time_ms - 20.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.error_count, 1);
        assert!((snapshot.success_rate - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_metrics_reset() {
        let recorder = MetricsRecorder::new();
        recorder.record_success(5);
        recorder.reset();
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.queries_executed, 0);
        assert_eq!(snapshot.error_count, 0);
        assert!((snapshot.success_rate - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_active_query_guard_success_path() {
        let state = AdapterState::new("mysql-localhost-3306-test", DatabaseType::MySql);
        let guard = state.begin_query();
        assert_eq!(state.active_queries(), 1);
        guard.success(10);
        assert_eq!(state.active_queries(), 0);
        assert_eq!(state.metrics.snapshot().error_count, 0);
    }

    #[test]
    fn test_active_query_guard_failure_path() {
        let state = AdapterState::new("mysql-localhost-3306-test", DatabaseType::MySql);
        let guard = state.begin_query();
        guard.failure("boom");
        assert_eq!(state.active_queries(), 0);
        assert_eq!(state.metrics.snapshot().error_count, 1);
    }

    #[test]
    fn test_active_query_guard_abandonment_counts_as_failure() {
        let state = AdapterState::new("mysql-localhost-3306-test", DatabaseType::MySql);
        {
            let _guard = state.begin_query();
            assert_eq!(state.active_queries(), 1);
            // Dropped without settling, as when a timeout race drops the future.
        }
        assert_eq!(state.active_queries(), 0);
        assert_eq!(state.metrics.snapshot().error_count, 1);
    }

    #[test]
    fn test_lifecycle_flags() {
        let state = AdapterState::new("postgresql-localhost-5432-test", DatabaseType::PostgreSql);
        assert!(state.ensure_ready().is_err());

        state.mark_connected();
        assert!(state.ensure_ready().is_ok());
        assert!(state.connected_at().is_some());

        state.begin_shutdown();
        match state.ensure_ready() {
            Err(BrokerError::Shutdown) => {}
            other => panic!("expected shutdown error, got {:?}", other),
        }

        state.mark_disconnected();
        assert!(!state.is_connected());
    }

    #[test]
    fn test_metrics_collected_every_hundred_queries() {
        let state = AdapterState::new("mysql-localhost-3306-test", DatabaseType::MySql);
        let mut receiver = state.events.subscribe();

        for _ in 0..METRICS_EMIT_INTERVAL {
            state.begin_query().success(1);
        }

        let mut saw_metrics_event = false;
        while let Ok(event) = receiver.try_recv() {
            if matches!(event, AdapterEvent::MetricsCollected { .. }) {
                saw_metrics_event = true;
            }
        }
        assert!(saw_metrics_event);
    }

    #[test]
    fn test_health_status_constructors() {
        let ok = HealthStatus::healthy(42);
        assert!(ok.is_healthy);
        assert_eq!(ok.response_time_ms, 42);
        assert!(ok.error.is_none());

        let bad = HealthStatus::unhealthy("ping failed");
        assert!(!bad.is_healthy);
        assert_eq!(bad.response_time_ms, 0);
        assert_eq!(bad.error.as_deref(), Some("ping failed"));
    }
}
