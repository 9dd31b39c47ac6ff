//! MySQL adapter: pool lifecycle, parameterized execution, transactions,
//! and health probing.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use sqlx::ConnectOptions;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use hydra_common::{BrokerError, Result};
use hydra_core::adapter::{
    AdapterEvent, AdapterMetrics, AdapterState, ConnectionInfo, ConnectionStatus, DatabaseAdapter,
    DatabaseType, HealthStatus,
};
use hydra_core::config::{ConnectionConfig, PoolSettings, RetryConfig, SslMode};
use hydra_core::profile::DataProfiler;
use hydra_core::result::{QueryResult, SqlStatement};
use hydra_core::schema::SchemaAnalyzer;
use hydra_core::value::SqlValue;

use crate::profiler::MySqlDataProfiler;
use crate::schema::MySqlSchemaAnalyzer;
use crate::values::{bind_value, fields_from_rows, row_to_broker};

/// Shared handle to the pool slot; the analyzer and profiler read through it
/// so they observe connect/disconnect without holding the adapter.
pub(crate) struct PoolHolder {
    inner: RwLock<Option<MySqlPool>>,
}

impl PoolHolder {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(None),
        })
    }

    pub(crate) fn get(&self) -> Result<MySqlPool> {
        self.inner
            .read()
            .clone()
            .ok_or_else(|| BrokerError::Connection("adapter is not connected".to_string()))
    }

    fn set(&self, pool: MySqlPool) {
        *self.inner.write() = Some(pool);
    }

    fn take(&self) -> Option<MySqlPool> {
        self.inner.write().take()
    }

    fn gauges(&self) -> (u32, u32) {
        match self.inner.read().as_ref() {
            Some(pool) => (pool.size(), pool.num_idle() as u32),
            None => (0, 0),
        }
    }
}

/// The MySQL implementation of the adapter contract.
pub struct MySqlAdapter {
    config: ConnectionConfig,
    pool_settings: PoolSettings,
    #[allow(dead_code)]
    retry: RetryConfig,
    state: Arc<AdapterState>,
    pool: Arc<PoolHolder>,
    analyzer: Arc<MySqlSchemaAnalyzer>,
    profiler: Arc<MySqlDataProfiler>,
}

impl MySqlAdapter {
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        Self::with_retry(config, RetryConfig::default())
    }

    pub fn with_retry(config: ConnectionConfig, retry: RetryConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(BrokerError::Configuration(
                "MySQL adapter requires a host".to_string(),
            ));
        }
        let port = config.effective_port().unwrap_or(3306);
        let adapter_id = format!("mysql-{}-{}-{}", config.host, port, config.database);
        let pool_settings = PoolSettings::from_config(&config);
        let pool = PoolHolder::new();
        let analyzer = Arc::new(MySqlSchemaAnalyzer::new(Arc::clone(&pool)));
        let profiler = Arc::new(MySqlDataProfiler::new(Arc::clone(&pool)));
        Ok(Self {
            state: AdapterState::new(adapter_id, DatabaseType::MySql),
            config,
            pool_settings,
            retry,
            pool,
            analyzer,
            profiler,
        })
    }

    fn port(&self) -> u16 {
        self.config.effective_port().unwrap_or(3306)
    }

    fn connect_options(&self) -> Result<MySqlConnectOptions> {
        let mut options = MySqlConnectOptions::new()
            .host(&self.config.host)
            .port(self.port())
            .username(&self.config.user)
            .password(&self.config.password)
            .database(&self.config.database);

        if let Some(ssl) = &self.config.ssl {
            options = options.ssl_mode(match ssl.mode {
                SslMode::Required => MySqlSslMode::VerifyCa,
                SslMode::Preferred => MySqlSslMode::Preferred,
                SslMode::Disabled => MySqlSslMode::Disabled,
            });
            if let Some(ca) = &ssl.ca {
                options = options.ssl_ca(std::path::Path::new(ca));
            }
            if let Some(cert) = &ssl.cert {
                options = options.ssl_client_cert(std::path::Path::new(cert));
            }
            if let Some(key) = &ssl.key {
                options = options.ssl_client_key(std::path::Path::new(key));
            }
        } else {
            options = options.ssl_mode(MySqlSslMode::Preferred);
        }

        // Keep driver-side statement logging out of the broker's logs;
        // execution is traced at the adapter level instead.
        options = options.disable_statement_logging();
        Ok(options)
    }

    async fn run_statement(
        &self,
        pool: &MySqlPool,
        sql: &str,
        params: &[SqlValue],
    ) -> std::result::Result<QueryResult, sqlx::Error> {
        let started = Instant::now();
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param).map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
        }
        let driver_rows = query.fetch_all(pool).await?;
        let fields = fields_from_rows(&driver_rows);
        let rows = driver_rows.iter().map(row_to_broker).collect();
        Ok(QueryResult::with_rows(
            rows,
            fields,
            started.elapsed().as_millis() as u64,
        ))
    }
}

#[async_trait]
impl DatabaseAdapter for MySqlAdapter {
    fn adapter_id(&self) -> String {
        self.state.adapter_id().to_string()
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySql
    }

    #[instrument(skip(self), fields(adapter_id = %self.state.adapter_id()))]
    async fn connect(&self) -> Result<()> {
        if self.state.is_connected() {
            warn!("connect() called on an already-connected adapter");
            return Ok(());
        }

        let options = self.connect_options()?;
        let pool = MySqlPoolOptions::new()
            .min_connections(self.pool_settings.min_connections)
            .max_connections(self.pool_settings.max_connections)
            .acquire_timeout(Duration::from_millis(self.pool_settings.acquire_timeout_ms))
            .idle_timeout(Duration::from_millis(self.pool_settings.idle_timeout_ms))
            .connect_lazy_with(options);

        // Acquire one connection and ping before declaring the pool live.
        let ping = async {
            let mut conn = pool.acquire().await?;
            sqlx::Connection::ping(&mut *conn).await?;
            Ok::<_, sqlx::Error>(())
        }
        .await;

        if let Err(error) = ping {
            pool.close().await;
            return Err(BrokerError::Connection(format!(
                "connection failed: {}",
                error
            )));
        }

        self.pool.set(pool);
        self.state.mark_connected();
        info!("MySQL adapter connected");
        Ok(())
    }

    #[instrument(skip(self), fields(adapter_id = %self.state.adapter_id()))]
    async fn disconnect(&self) -> Result<()> {
        self.state.begin_shutdown();
        if let Some(pool) = self.pool.take() {
            pool.close().await;
        }
        self.state.mark_disconnected();
        info!("MySQL adapter disconnected");
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult> {
        self.state.ensure_ready()?;
        let pool = self.pool.get()?;
        let guard = self.state.begin_query();

        match self.run_statement(&pool, sql, params).await {
            Ok(mut result) => {
                let elapsed = guard.success(result.row_count);
                result.execution_time_ms = elapsed;
                Ok(result)
            }
            Err(error) => {
                let broker_error = BrokerError::from(error);
                guard.failure(&broker_error.to_string());
                Err(broker_error)
            }
        }
    }

    async fn transaction(&self, statements: &[SqlStatement]) -> Result<Vec<QueryResult>> {
        self.state.ensure_ready()?;
        let pool = self.pool.get()?;
        let guard = self.state.begin_query();

        let mut conn = match pool.acquire().await {
            Ok(conn) => conn,
            Err(error) => {
                let broker_error = BrokerError::from(error);
                guard.failure(&broker_error.to_string());
                return Err(broker_error);
            }
        };

        let outcome = async {
            sqlx::query("BEGIN").execute(&mut *conn).await?;
            let mut results = Vec::with_capacity(statements.len());
            for statement in statements {
                let started = Instant::now();
                let mut query = sqlx::query(&statement.sql);
                for param in &statement.params {
                    query = bind_value(query, param)
                        .map_err(|e| sqlx::Error::Protocol(e.to_string()))?;
                }
                let driver_rows = query.fetch_all(&mut *conn).await?;
                let fields = fields_from_rows(&driver_rows);
                let rows: Vec<_> = driver_rows.iter().map(row_to_broker).collect();
                results.push(QueryResult::with_rows(
                    rows,
                    fields,
                    started.elapsed().as_millis() as u64,
                ));
            }
            sqlx::query("COMMIT").execute(&mut *conn).await?;
            Ok::<_, sqlx::Error>(results)
        }
        .await;

        // The connection returns to the pool when `conn` drops, on every path.
        match outcome {
            Ok(results) => {
                let total: usize = results.iter().map(|r| r.row_count).sum();
                guard.success(total);
                Ok(results)
            }
            Err(error) => {
                if let Err(rollback_error) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                    warn!(%rollback_error, "Rollback after failed transaction also failed");
                }
                let broker_error = BrokerError::from(error);
                guard.failure(&broker_error.to_string());
                Err(broker_error)
            }
        }
    }

    #[instrument(skip(self), fields(adapter_id = %self.state.adapter_id()))]
    async fn health_check(&self) -> Result<HealthStatus> {
        self.state.ensure_ready()?;
        let pool = self.pool.get()?;
        let started = Instant::now();

        let probe = async {
            let mut conn = pool.acquire().await?;
            sqlx::Connection::ping(&mut *conn).await?;
            Ok::<_, sqlx::Error>(())
        }
        .await;

        match probe {
            Ok(()) => {
                let response_time_ms = started.elapsed().as_millis() as u64;
                self.state.events.emit(AdapterEvent::HealthCheckPassed {
                    adapter_id: self.adapter_id(),
                    response_time_ms,
                });
                Ok(HealthStatus::healthy(response_time_ms))
            }
            Err(error) => {
                self.state.events.emit(AdapterEvent::HealthCheckFailed {
                    adapter_id: self.adapter_id(),
                    error: error.to_string(),
                });
                Err(BrokerError::Connection(error.to_string()))
            }
        }
    }

    fn connection_status(&self) -> ConnectionStatus {
        let (connections, idle) = self.pool.gauges();
        self.state.status(connections, idle)
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
            database_type: DatabaseType::MySql,
            host: self.config.host.clone(),
            port: self.port(),
            database: self.config.database.clone(),
            user: self.config.user.clone(),
            ssl: self.config.ssl.is_some(),
            connection_limit: self.pool_settings.max_connections,
        }
    }

    fn schema_analyzer(&self) -> Arc<dyn SchemaAnalyzer> {
        Arc::clone(&self.analyzer) as Arc<dyn SchemaAnalyzer>
    }

    fn data_profiler(&self) -> Arc<dyn DataProfiler> {
        Arc::clone(&self.profiler) as Arc<dyn DataProfiler>
    }

    fn subscribe(&self) -> broadcast::Receiver<AdapterEvent> {
        self.state.events.subscribe()
    }
}

impl std::fmt::Debug for MySqlAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlAdapter")
            .field("adapter_id", &self.state.adapter_id())
            .field("connected", &self.state.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ConnectionConfig {
        serde_json::from_value(serde_json::json!({
            "host": "localhost",
            "user": "reader",
            "password": "pw",
            "database": "app"
        }))
        .unwrap()
    }

    #[test]
    fn test_adapter_id_shape() {
        let adapter = MySqlAdapter::new(config()).unwrap();
        assert_eq!(adapter.adapter_id(), "mysql-localhost-3306-app");
        assert_eq!(adapter.database_type(), DatabaseType::MySql);
    }

    #[test]
    fn test_connection_info_hides_password() {
        let adapter = MySqlAdapter::new(config()).unwrap();
        let info = adapter.connection_info();
        let rendered = serde_json::to_string(&info).unwrap();
        assert!(!rendered.contains("pw"));
        assert_eq!(info.port, 3306);
        assert_eq!(info.connection_limit, 10);
    }

    #[test]
    fn test_rejects_empty_host() {
        let mut bad = config();
        bad.host = String::new();
        assert!(MySqlAdapter::new(bad).is_err());
    }

    #[tokio::test]
    async fn test_query_before_connect_fails() {
        let adapter = MySqlAdapter::new(config()).unwrap();
        let error = adapter.query("SELECT 1", &[]).await.unwrap_err();
        assert!(error.to_string().contains("not connected"));
    }

    #[tokio::test]
    async fn test_disconnect_then_query_reports_shutdown() {
        let adapter = MySqlAdapter::new(config()).unwrap();
        adapter.disconnect().await.unwrap();
        match adapter.query("SELECT 1", &[]).await {
            Err(BrokerError::Shutdown) => {}
            other => panic!("expected shutdown error, got {:?}", other),
        }
    }

    #[test]
    fn test_status_reports_disconnected_pool() {
        let adapter = MySqlAdapter::new(config()).unwrap();
        let status = adapter.connection_status();
        assert!(!status.is_connected);
        assert_eq!(status.connection_count, 0);
        assert_eq!(status.active_queries, 0);
    }
}
